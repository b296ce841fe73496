//! Progress-reporting copy/move of a directory subtree.
//!
//! The copier first walks the source to learn the byte total, then copies one
//! buffer per step. A failed step keeps its position: the file being copied
//! is reopened from the start on the next step, so `drive_with_retry` can
//! resume after the operator closed whatever held the file.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};
use crate::paths::names_equal;
use crate::task::{Progress, Stepper, TaskContext, Throughput, Tick};
use crate::tree::walker::{TreeEntry, TreeWalker};

/// Bytes copied per step.
const CHUNK_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    Copy,
    /// Copy, then remove each source object once it is fully written.
    Move,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopySummary {
    pub files: u64,
    pub bytes: u64,
    pub skipped: u64,
}

struct OpenFile {
    reader: File,
    writer: File,
}

enum Phase {
    Scanning(TreeWalker),
    Copying,
    RemovingSources,
    Done,
}

pub struct TreeCopier {
    src: PathBuf,
    dst: PathBuf,
    mode: CopyMode,
    skip: Vec<String>,
    stage: String,
    phase: Phase,
    entries: Vec<TreeEntry>,
    index: usize,
    open: Option<OpenFile>,
    file_done: u64,
    total_bytes: u64,
    summary: CopySummary,
    throughput: Throughput,
}

impl TreeCopier {
    pub fn new(src: impl Into<PathBuf>, dst: impl Into<PathBuf>, mode: CopyMode) -> Self {
        let src = src.into();
        let walker = TreeWalker::new(src.clone()).collect_entries(true);
        Self {
            src,
            dst: dst.into(),
            mode,
            skip: Vec::new(),
            stage: match mode {
                CopyMode::Copy => "Copying".to_string(),
                CopyMode::Move => "Moving".to_string(),
            },
            phase: Phase::Scanning(walker),
            entries: Vec::new(),
            index: 0,
            open: None,
            file_done: 0,
            total_bytes: 0,
            summary: CopySummary::default(),
            throughput: Throughput::new(),
        }
    }

    /// File names (any depth, case-insensitive) left out of the copy.
    pub fn skip_names(mut self, names: &[&str]) -> Self {
        self.skip = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Label used in progress reports.
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    fn is_skipped(&self, entry: &TreeEntry) -> bool {
        if entry.is_dir {
            return false;
        }
        let name = entry.path.file_name().map(|n| n.to_string_lossy());
        match name {
            Some(name) => self.skip.iter().any(|s| names_equal(s, &name)),
            None => false,
        }
    }

    fn progress_for(&mut self, current: &Path) -> Progress {
        let rate = self.throughput.tick(self.summary.bytes);
        Progress::new(self.stage.clone(), self.summary.bytes, self.total_bytes)
            .with_current(current.to_string_lossy())
            .with_rate(rate)
    }

    /// Copy at most one buffer of the current entry. Returns true once the
    /// entry is finished.
    fn copy_step(&mut self) -> Result<bool> {
        let entry = &self.entries[self.index];
        let target = self.dst.join(&entry.relative);

        if entry.is_dir {
            fs::create_dir_all(&target).at(&target)?;
            return Ok(true);
        }

        if self.open.is_none() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).at(parent)?;
            }
            let reader = File::open(&entry.path).at(&entry.path)?;
            let writer = File::create(&target).at(&target)?;
            self.open = Some(OpenFile { reader, writer });
            self.file_done = 0;
        }

        let mut buf = vec![0u8; CHUNK_SIZE];
        let Some(open) = self.open.as_mut() else {
            return Ok(true);
        };
        let n = open.reader.read(&mut buf).at(&entry.path)?;
        if n == 0 {
            open.writer.flush().at(&target)?;
            self.open = None;
            if self.mode == CopyMode::Move {
                fs::remove_file(&entry.path).at(&entry.path)?;
            }
            self.summary.files += 1;
            return Ok(true);
        }
        open.writer.write_all(&buf[..n]).at(&target)?;
        self.file_done += n as u64;
        self.summary.bytes += n as u64;
        Ok(false)
    }
}

impl Stepper for TreeCopier {
    type Output = CopySummary;

    fn step(&mut self, ctx: &TaskContext) -> Result<Tick<CopySummary>> {
        match &mut self.phase {
            Phase::Scanning(walker) => {
                if !self.src.exists() {
                    self.phase = Phase::Done;
                    return Ok(Tick::Pending);
                }
                if let Tick::Ready(summary) = walker.step(ctx)? {
                    tracing::debug!(
                        "{} {:?} -> {:?}: {} files, {} bytes",
                        self.stage,
                        self.src,
                        self.dst,
                        summary.files,
                        summary.bytes
                    );
                    self.total_bytes = summary.bytes;
                    self.entries = summary.entries;
                    fs::create_dir_all(&self.dst).at(&self.dst)?;
                    self.phase = Phase::Copying;
                }
                Ok(Tick::Pending)
            }
            Phase::Copying => {
                if self.index >= self.entries.len() {
                    self.phase = match self.mode {
                        CopyMode::Copy => Phase::Done,
                        CopyMode::Move => Phase::RemovingSources,
                    };
                    return Ok(Tick::Pending);
                }
                if self.is_skipped(&self.entries[self.index]) {
                    self.summary.skipped += 1;
                    self.index += 1;
                    return Ok(Tick::Pending);
                }
                let result = self.copy_step();
                if result.is_err() {
                    self.summary.bytes -= self.file_done;
                    self.file_done = 0;
                    self.open = None;
                }
                let finished = result?;
                let current = self.entries[self.index].relative.clone();
                ctx.progress(self.progress_for(&current));
                if finished {
                    self.index += 1;
                }
                Ok(Tick::Pending)
            }
            Phase::RemovingSources => {
                // Skipped files keep their directories alive; leave those.
                for entry in self.entries.iter().rev().filter(|e| e.is_dir) {
                    if fs::remove_dir(&entry.path).is_err() {
                        tracing::debug!("Keeping non-empty source dir {:?}", entry.path);
                    }
                }
                if self.summary.skipped == 0 {
                    fs::remove_dir(&self.src).at(&self.src)?;
                }
                self.phase = Phase::Done;
                Ok(Tick::Pending)
            }
            Phase::Done => Ok(Tick::Ready(std::mem::take(&mut self.summary))),
        }
    }
}

/// Copy `src` into `dst` (merged, existing files overwritten).
pub fn copy_tree(src: &Path, dst: &Path, skip: &[&str], ctx: &TaskContext) -> Result<CopySummary> {
    let mut copier = TreeCopier::new(src, dst, CopyMode::Copy).skip_names(skip);
    crate::task::drive_with_retry(&mut copier, ctx)
}
