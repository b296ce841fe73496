//! Cooperative task runtime shared by every long operation.
//!
//! Long operations are written as resumable [`Stepper`]s that do one bounded
//! unit of work per call (one directory entry, one file, one buffer). The
//! [`drive`] scheduler calls `step` until the stepper is ready and checks the
//! [`CancelFlag`] between every two steps, which is the only place a cancel
//! request is observed.
//!
//! Components never reach back into a UI. Everything they need (status and
//! progress sinks, the cancel flag, the operator prompts and the shared busy
//! counter) arrives through an explicit [`TaskContext`].

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{LauncherError, Result};

/// Cloneable cancel token. Setting it is the single cancel entry point of a
/// workflow.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Advisory count of long operations in flight, for enabling and disabling
/// UI surfaces. Not a lock.
#[derive(Debug, Clone, Default)]
pub struct BusyCounter(Arc<AtomicUsize>);

impl BusyCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_busy(&self) -> bool {
        self.count() > 0
    }

    /// Increment now, decrement when the guard is dropped.
    pub fn enter(&self) -> BusyGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        BusyGuard(self.0.clone())
    }
}

#[derive(Debug)]
pub struct BusyGuard(Arc<AtomicUsize>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Progress snapshot published by a running step.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Short stage label, e.g. "Downloading".
    pub stage: String,
    /// File or entry currently being processed.
    pub current: Option<String>,
    /// Units done (bytes or files, depending on the stage).
    pub done: u64,
    /// Units expected, 0 when unknown.
    pub total: u64,
    /// Bytes per second when the stage measures throughput.
    pub rate: Option<u64>,
}

impl Progress {
    pub fn new(stage: impl Into<String>, done: u64, total: u64) -> Self {
        Self {
            stage: stage.into(),
            current: None,
            done,
            total,
            rate: None,
        }
    }

    pub fn with_current(mut self, current: impl Into<String>) -> Self {
        self.current = Some(current.into());
        self
    }

    pub fn with_rate(mut self, rate: Option<u64>) -> Self {
        self.rate = rate;
        self
    }

    /// Fraction complete in `0.0..=1.0`, or `None` when the total is unknown.
    pub fn fraction(&self) -> Option<f32> {
        if self.total == 0 {
            None
        } else {
            Some((self.done as f64 / self.total as f64).min(1.0) as f32)
        }
    }
}

/// Human-readable status line. Every workflow ends with exactly one
/// `Finished`, `Cancelled` or `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Stage(String),
    Warning(String),
    Finished(String),
    Cancelled(String),
    Failed(String),
}

/// Question put to the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    /// The selected build is the one already installed.
    ReinstallSameBuild { build: i64 },
    /// An installed entry already carries one of these identities.
    DuplicateContent { identities: Vec<String> },
}

/// Answer to a retry-or-cancel prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Cancel,
}

/// Decisions only a human can make. Implemented by the UI layer.
pub trait Operator: Send + Sync {
    fn confirm(&self, prompt: &Prompt) -> bool;

    /// Called when a filesystem step failed, usually because another process
    /// holds a file.
    fn retry_or_cancel(&self, error: &LauncherError) -> RetryDecision;

    /// Browser-mediated downloads: show `url`, suggest `suggested` as the save
    /// location, and return the file the operator actually downloaded.
    fn locate_download(&self, url: &str, suggested: &Path) -> Option<PathBuf>;
}

/// Operator for unattended use: declines every confirmation and cancels on
/// every failure.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unattended;

impl Operator for Unattended {
    fn confirm(&self, _prompt: &Prompt) -> bool {
        false
    }

    fn retry_or_cancel(&self, _error: &LauncherError) -> RetryDecision {
        RetryDecision::Cancel
    }

    fn locate_download(&self, _url: &str, _suggested: &Path) -> Option<PathBuf> {
        None
    }
}

type StatusSink = Arc<dyn Fn(Status) + Send + Sync>;
type ProgressSink = Arc<dyn Fn(Progress) + Send + Sync>;

/// Everything a component needs from its surroundings.
#[derive(Clone)]
pub struct TaskContext {
    on_status: StatusSink,
    on_progress: ProgressSink,
    cancel: CancelFlag,
    operator: Arc<dyn Operator>,
    busy: BusyCounter,
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("busy", &self.busy.count())
            .finish()
    }
}

impl TaskContext {
    pub fn new(
        on_status: impl Fn(Status) + Send + Sync + 'static,
        on_progress: impl Fn(Progress) + Send + Sync + 'static,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            on_status: Arc::new(on_status),
            on_progress: Arc::new(on_progress),
            cancel,
            operator: Arc::new(Unattended),
            busy: BusyCounter::new(),
        }
    }

    /// Context that only logs. Handy for tests and headless callers.
    pub fn silent() -> Self {
        Self::new(
            |status| tracing::debug!("status: {status:?}"),
            |_| {},
            CancelFlag::new(),
        )
    }

    pub fn with_operator(mut self, operator: Arc<dyn Operator>) -> Self {
        self.operator = operator;
        self
    }

    pub fn with_busy_counter(mut self, busy: BusyCounter) -> Self {
        self.busy = busy;
        self
    }

    /// Same sinks, operator and busy counter, but a fresh cancel flag. Used
    /// to run rollback work to completion after a cancel was observed.
    pub fn for_rollback(&self) -> Self {
        Self {
            cancel: CancelFlag::new(),
            ..self.clone()
        }
    }

    pub fn status(&self, status: Status) {
        (self.on_status)(status);
    }

    pub fn stage(&self, label: &str) {
        tracing::info!("{label}");
        self.status(Status::Stage(label.to_string()));
    }

    pub fn warn(&self, message: String) {
        tracing::warn!("{message}");
        self.status(Status::Warning(message));
    }

    pub fn progress(&self, progress: Progress) {
        (self.on_progress)(progress);
    }

    pub fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    pub fn operator(&self) -> &dyn Operator {
        self.operator.as_ref()
    }

    pub fn busy(&self) -> &BusyCounter {
        &self.busy
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Publish the one terminal status of a workflow ending with `result`.
    pub fn conclude<T>(&self, result: &Result<T>, on_success: impl FnOnce(&T) -> String) {
        let status = match result {
            Ok(value) => {
                let message = on_success(value);
                tracing::info!("{message}");
                Status::Finished(message)
            }
            Err(e @ (LauncherError::Cancelled | LauncherError::Declined)) => {
                tracing::info!("{e}");
                Status::Cancelled(e.to_string())
            }
            Err(e) => {
                tracing::error!("{e}");
                Status::Failed(e.to_string())
            }
        };
        self.status(status);
    }

    /// Step boundary: fail with `Cancelled` if a cancel was requested.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(LauncherError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick<T> {
    Pending,
    Ready(T),
}

/// A resumable operation that does one bounded unit of work per call.
pub trait Stepper {
    type Output;

    fn step(&mut self, ctx: &TaskContext) -> Result<Tick<Self::Output>>;
}

/// Run a stepper to completion, observing cancellation between steps.
pub fn drive<S: Stepper>(stepper: &mut S, ctx: &TaskContext) -> Result<S::Output> {
    loop {
        ctx.checkpoint()?;
        if let Tick::Ready(output) = stepper.step(ctx)? {
            return Ok(output);
        }
    }
}

/// Like [`drive`], but a failed step is put to the operator: `Retry` runs the
/// same step again, `Cancel` turns the failure into `Cancelled`. Only
/// retryable (filesystem) errors are offered.
pub fn drive_with_retry<S: Stepper>(stepper: &mut S, ctx: &TaskContext) -> Result<S::Output> {
    loop {
        ctx.checkpoint()?;
        match stepper.step(ctx) {
            Ok(Tick::Ready(output)) => return Ok(output),
            Ok(Tick::Pending) => {}
            Err(e) if e.is_retryable() => {
                tracing::warn!("Step failed: {e}");
                match ctx.operator().retry_or_cancel(&e) {
                    RetryDecision::Retry => continue,
                    RetryDecision::Cancel => return Err(LauncherError::Cancelled),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run a single filesystem operation, putting retryable failures to the
/// operator the same way [`drive_with_retry`] does for steppers.
pub fn retry<T>(ctx: &TaskContext, mut op: impl FnMut() -> Result<T>) -> Result<T> {
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() => {
                tracing::warn!("Operation failed: {e}");
                match ctx.operator().retry_or_cancel(&e) {
                    RetryDecision::Retry => {}
                    RetryDecision::Cancel => return Err(LauncherError::Cancelled),
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Number of progress ticks between two throughput samples.
pub const THROUGHPUT_SAMPLE_EVERY: u32 = 5;

/// Bytes-per-second estimate, resampled every fifth tick over a simple
/// moving window of the most recent samples.
#[derive(Debug, Clone)]
pub struct Throughput {
    ticks: u32,
    window: VecDeque<(Instant, u64)>,
    window_len: usize,
    rate: Option<u64>,
}

impl Default for Throughput {
    fn default() -> Self {
        Self::new()
    }
}

impl Throughput {
    pub fn new() -> Self {
        Self {
            ticks: 0,
            window: VecDeque::new(),
            window_len: 4,
            rate: None,
        }
    }

    /// Record a tick at `done` bytes. Returns the current estimate.
    pub fn tick(&mut self, done: u64) -> Option<u64> {
        self.tick_at(Instant::now(), done)
    }

    fn tick_at(&mut self, now: Instant, done: u64) -> Option<u64> {
        if self.ticks % THROUGHPUT_SAMPLE_EVERY == 0 {
            self.window.push_back((now, done));
            while self.window.len() > self.window_len {
                self.window.pop_front();
            }
            if let (Some(&(t0, b0)), Some(&(t1, b1))) = (self.window.front(), self.window.back()) {
                let secs = t1.duration_since(t0).as_secs_f64();
                if secs > 0.0 {
                    self.rate = Some((b1.saturating_sub(b0) as f64 / secs) as u64);
                }
            }
        }
        self.ticks = self.ticks.wrapping_add(1);
        self.rate
    }

    pub fn rate(&self) -> Option<u64> {
        self.rate
    }
}
