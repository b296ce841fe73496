//! Game updates.
//!
//! [`UpdateOrchestrator::start_update`] takes one install directory from its
//! current build to a selected one:
//!
//! `Idle -> ClearingPreviousSnapshot -> SnapshottingCurrentInstall ->
//! Downloading -> VerifyingArchive -> ExtractingArchive ->
//! AnalyzingNewExecutable -> MergingForwardUserContent -> [PurgingSnapshot]
//! -> Idle`
//!
//! The current install is moved aside into `previous_version` before
//! anything new lands, so a failure or cancel between download and analysis
//! can always put it back (see [`snapshot::restore_snapshot`]). A failure
//! while the snapshot is being taken leaves the moved entries where they
//! are. Once the new executable is identified the update is committed:
//! later failures leave both trees on disk.

pub mod merge;
pub mod snapshot;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use merge::{custom_assets, merge_forward, CustomAsset, MergeReport};
pub use snapshot::{restore_snapshot, take_snapshot, EntryMover, SnapshotPolicy};

use crate::archive::{verify_archive, ArchiveExtractor};
use crate::catalog::Build;
use crate::config::settings::Preferences;
use crate::config::version_index::VersionIndex;
use crate::config::ConfigStore;
use crate::download::ContentFetcher;
use crate::error::{IoResultExt, LauncherError, Result};
use crate::game::{analyze_executable, find_executable, ExecutableReport, InstallState};
use crate::paths::{GameLayout, TEMP_PREFIX};
use crate::task::{drive, BusyGuard, Prompt, RetryDecision, TaskContext};
use crate::tree::{is_empty_dir, remove_tree};

// ── Stages ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStage {
    Idle,
    ClearingPreviousSnapshot,
    SnapshottingCurrentInstall,
    Downloading,
    VerifyingArchive,
    ExtractingArchive,
    AnalyzingNewExecutable,
    MergingForwardUserContent,
    PurgingSnapshot,
}

impl UpdateStage {
    pub fn label(self) -> &'static str {
        match self {
            UpdateStage::Idle => "Idle",
            UpdateStage::ClearingPreviousSnapshot => "Removing previous version",
            UpdateStage::SnapshottingCurrentInstall => "Moving current version aside",
            UpdateStage::Downloading => "Downloading",
            UpdateStage::VerifyingArchive => "Verifying archive",
            UpdateStage::ExtractingArchive => "Extracting",
            UpdateStage::AnalyzingNewExecutable => "Analyzing new executable",
            UpdateStage::MergingForwardUserContent => "Restoring user content",
            UpdateStage::PurgingSnapshot => "Removing previous version",
        }
    }

    /// Whether a failure in this stage puts the snapshot back.
    pub fn restores_snapshot(self) -> bool {
        matches!(
            self,
            UpdateStage::Downloading
                | UpdateStage::VerifyingArchive
                | UpdateStage::ExtractingArchive
                | UpdateStage::AnalyzingNewExecutable
        )
    }
}

// ── Options and outcome ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Leave `save/` in place instead of moving it into the snapshot.
    pub prevent_save_move: bool,
    /// Delete `previous_version` once the update succeeded.
    pub remove_previous_version: bool,
    /// The running launcher; never moved when it lives in the install dir.
    pub launcher_exe: Option<PathBuf>,
}

impl UpdateOptions {
    pub fn from_settings(settings: &dyn ConfigStore) -> Self {
        Self {
            prevent_save_move: settings.prevent_save_move(),
            remove_previous_version: settings.remove_previous_version(),
            launcher_exe: std::env::current_exe().ok(),
        }
    }

    fn snapshot_policy(&self) -> SnapshotPolicy {
        SnapshotPolicy {
            keep_save: self.prevent_save_move,
            launcher_exe: self.launcher_exe.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub state: InstallState,
    pub merge: MergeReport,
    pub snapshot_purged: bool,
}

impl UpdateOutcome {
    pub fn summary(&self) -> String {
        let build = self
            .state
            .build_number
            .map(|n| format!("build {n}"))
            .unwrap_or_else(|| "the new build".to_string());
        let restored = self.merge.copied_assets().count();
        if restored == 0 {
            format!("Update to {build} finished")
        } else {
            format!("Update to {build} finished, {restored} custom assets restored")
        }
    }
}

// ── In-flight registry ──────────────────────────────────────────────────

/// Install directories with an update in flight. One update per directory.
#[derive(Debug, Default)]
pub struct UpdateRegistry {
    active: Mutex<HashSet<PathBuf>>,
}

impl UpdateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, install_dir: &Path) -> Result<UpdateClaim<'_>> {
        let key = registry_key(install_dir);
        if !self.lock().insert(key.clone()) {
            return Err(LauncherError::UpdateInProgress(install_dir.to_path_buf()));
        }
        Ok(UpdateClaim {
            registry: self,
            key,
        })
    }

    pub fn is_updating(&self, install_dir: &Path) -> bool {
        self.lock().contains(&registry_key(install_dir))
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn registry_key(dir: &Path) -> PathBuf {
    fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
}

/// Releases the directory when dropped.
#[derive(Debug)]
pub struct UpdateClaim<'a> {
    registry: &'a UpdateRegistry,
    key: PathBuf,
}

impl Drop for UpdateClaim<'_> {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}

// ── Orchestrator ────────────────────────────────────────────────────────

enum Attempt {
    Finished(UpdateOutcome),
    Restart,
}

pub struct UpdateOrchestrator<'a> {
    fetcher: &'a ContentFetcher,
    index: &'a Mutex<VersionIndex>,
    registry: &'a UpdateRegistry,
    options: UpdateOptions,
    stage: UpdateStage,
    _stage_busy: Option<BusyGuard>,
}

impl<'a> UpdateOrchestrator<'a> {
    pub fn new(
        fetcher: &'a ContentFetcher,
        index: &'a Mutex<VersionIndex>,
        registry: &'a UpdateRegistry,
        options: UpdateOptions,
    ) -> Self {
        Self {
            fetcher,
            index,
            registry,
            options,
            stage: UpdateStage::Idle,
            _stage_busy: None,
        }
    }

    pub fn stage(&self) -> UpdateStage {
        self.stage
    }

    /// Update `install_dir` to `build`. Emits exactly one terminal status.
    pub fn start_update(
        &mut self,
        install_dir: &Path,
        build: &Build,
        ctx: &TaskContext,
    ) -> Result<UpdateOutcome> {
        tracing::info!("Updating {:?} to {}", install_dir, build.name);
        let result = self.run(install_dir, build, ctx);
        self.enter(UpdateStage::Idle, ctx);
        ctx.conclude(&result, UpdateOutcome::summary);
        result
    }

    fn run(&mut self, install_dir: &Path, build: &Build, ctx: &TaskContext) -> Result<UpdateOutcome> {
        let registry = self.registry;
        let _claim = registry.claim(install_dir)?;

        let current = {
            let index = lock_index(self.index);
            InstallState::scan(install_dir, &index, ctx)?
        };
        if !current.has_executable() && !is_empty_dir(install_dir)? {
            return Err(LauncherError::InstallDirNotEmpty(install_dir.to_path_buf()));
        }
        if let (Some(selected), Some(installed)) = (build.number, current.build_number) {
            if selected == installed
                && !ctx
                    .operator()
                    .confirm(&Prompt::ReinstallSameBuild { build: selected })
            {
                return Err(LauncherError::Declined);
            }
        }

        loop {
            match self.attempt(install_dir, build, ctx)? {
                Attempt::Finished(outcome) => return Ok(outcome),
                Attempt::Restart => tracing::info!("Restarting update of {:?}", install_dir),
            }
        }
    }

    fn attempt(&mut self, install_dir: &Path, build: &Build, ctx: &TaskContext) -> Result<Attempt> {
        let layout = GameLayout::new(install_dir);
        let snapshot_dir = layout.previous_version();
        let policy = self.options.snapshot_policy();

        self.enter(UpdateStage::ClearingPreviousSnapshot, ctx);
        if snapshot_dir.exists() {
            remove_tree(&snapshot_dir, ctx)?;
        }

        self.enter(UpdateStage::SnapshottingCurrentInstall, ctx);
        fs::create_dir_all(install_dir).at(install_dir)?;
        let moved = take_snapshot(install_dir, &policy, ctx)?;

        let (exe, report) = match self.install_build(install_dir, build, ctx) {
            Ok(installed) => installed,
            Err(e) => return self.recover(install_dir, &policy, e, ctx),
        };
        let state = self.record_new_build(install_dir, build, exe, report, ctx);

        self.enter(UpdateStage::MergingForwardUserContent, ctx);
        let merge = merge_forward(&snapshot_dir, install_dir, policy.keep_save, ctx)?;
        if moved == 0 && is_empty_dir(&snapshot_dir)? {
            fs::remove_dir(&snapshot_dir).at(&snapshot_dir)?;
        }

        let mut snapshot_purged = false;
        if self.options.remove_previous_version && snapshot_dir.exists() {
            self.enter(UpdateStage::PurgingSnapshot, ctx);
            match remove_tree(&snapshot_dir, ctx) {
                Ok(_) => snapshot_purged = true,
                Err(e) => ctx.warn(format!("Could not remove {:?}: {e}", snapshot_dir)),
            }
        }

        Ok(Attempt::Finished(UpdateOutcome {
            state,
            merge,
            snapshot_purged,
        }))
    }

    /// Download, verify, extract and identify the new build.
    fn install_build(
        &mut self,
        install_dir: &Path,
        build: &Build,
        ctx: &TaskContext,
    ) -> Result<(PathBuf, ExecutableReport)> {
        self.enter(UpdateStage::Downloading, ctx);
        let tmp = std::env::temp_dir();
        let download_dir = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir()
            .at(&tmp)?;
        let download = self
            .fetcher
            .download(&build.download_url, download_dir.path(), false, ctx)?;

        self.enter(UpdateStage::VerifyingArchive, ctx);
        let mut reader = verify_archive(&download.path, ctx)?;

        self.enter(UpdateStage::ExtractingArchive, ctx);
        let mut extractor = ArchiveExtractor::new(reader.as_mut(), install_dir);
        let summary = drive(&mut extractor, ctx)?;
        tracing::info!(
            "Extracted {} files ({} bytes) into {:?}",
            summary.files,
            summary.bytes,
            install_dir
        );

        self.enter(UpdateStage::AnalyzingNewExecutable, ctx);
        let exe = find_executable(install_dir)
            .ok_or_else(|| LauncherError::NoExecutableFound(install_dir.to_path_buf()))?;
        let report = analyze_executable(&exe, ctx)?;
        Ok((exe, report))
    }

    /// Roll back after `err` according to the stage it happened in. An
    /// extraction blocked by a file in use may restart the whole update.
    fn recover(
        &mut self,
        install_dir: &Path,
        policy: &SnapshotPolicy,
        err: LauncherError,
        ctx: &TaskContext,
    ) -> Result<Attempt> {
        let stage = self.stage;
        tracing::warn!("{} failed: {err}", stage.label());

        if let LauncherError::NoExecutableFound(_) = err {
            ctx.warn(format!(
                "{err}; the previous version is kept in {:?} for a manual restore",
                GameLayout::new(install_dir).previous_version()
            ));
            return Err(err);
        }

        let restart = stage == UpdateStage::ExtractingArchive
            && err.is_retryable()
            && ctx.operator().retry_or_cancel(&err) == RetryDecision::Retry;

        if stage.restores_snapshot() {
            if let Err(rollback) = restore_snapshot(install_dir, policy, ctx) {
                ctx.warn(format!("Could not restore the previous version: {rollback}"));
                return Err(rollback);
            }
        }

        if restart {
            Ok(Attempt::Restart)
        } else if stage == UpdateStage::ExtractingArchive && err.is_retryable() {
            Err(LauncherError::Cancelled)
        } else {
            Err(err)
        }
    }

    /// Remember what the digest of the new executable means, and describe
    /// the new install.
    fn record_new_build(
        &self,
        install_dir: &Path,
        build: &Build,
        exe: PathBuf,
        report: ExecutableReport,
        ctx: &TaskContext,
    ) -> InstallState {
        let mut index = lock_index(self.index);
        if let Some(version) = &report.version {
            index.record_version(&report.digest, version);
        }
        if let Some(number) = build.number {
            index.record_build(&report.digest, number, build.published_at);
        }
        if let Err(e) = index.save() {
            ctx.warn(format!("Could not save the version index: {e:#}"));
        }
        let detected_version_string = report
            .version
            .clone()
            .or_else(|| index.version_for(&report.digest).map(str::to_string));
        tracing::info!(
            "New executable {:?} (version {:?}, build {:?})",
            exe,
            detected_version_string,
            build.number
        );
        InstallState {
            install_dir: install_dir.to_path_buf(),
            executable_path: Some(exe),
            detected_version_string,
            content_hash: Some(report.digest),
            build_number: build.number,
            is_running: false,
            pid: None,
        }
    }

    /// Leave the current stage (dropping its busy guard) and enter `stage`.
    fn enter(&mut self, stage: UpdateStage, ctx: &TaskContext) {
        self._stage_busy = None;
        self.stage = stage;
        if stage != UpdateStage::Idle {
            ctx.stage(stage.label());
            self._stage_busy = Some(ctx.busy().enter());
        }
    }
}

fn lock_index(index: &Mutex<VersionIndex>) -> MutexGuard<'_, VersionIndex> {
    index.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::BusyCounter;

    fn build(number: i64) -> Build {
        Build {
            number: Some(number),
            name: format!("cataclysmdda-0.E-{number}.zip"),
            download_url: "http://127.0.0.1:9/unreachable.zip".to_string(),
            published_at: None,
        }
    }

    #[test]
    fn test_registry_single_claim() {
        let registry = UpdateRegistry::new();
        let tmp = tempfile::tempdir().unwrap();
        let claim = registry.claim(tmp.path()).unwrap();
        assert!(registry.is_updating(tmp.path()));
        assert!(matches!(
            registry.claim(tmp.path()),
            Err(LauncherError::UpdateInProgress(_))
        ));
        drop(claim);
        assert!(!registry.is_updating(tmp.path()));
        assert!(registry.claim(tmp.path()).is_ok());
    }

    #[test]
    fn test_refuses_foreign_directory() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("notes.txt"), "mine").unwrap();
        let fetcher = ContentFetcher::new();
        let index = Mutex::new(VersionIndex::in_memory());
        let registry = UpdateRegistry::new();
        let mut orchestrator =
            UpdateOrchestrator::new(&fetcher, &index, &registry, UpdateOptions::default());
        assert!(matches!(
            orchestrator.start_update(tmp.path(), &build(10600), &TaskContext::silent()),
            Err(LauncherError::InstallDirNotEmpty(_))
        ));
        assert!(tmp.path().join("notes.txt").exists());
        assert_eq!(orchestrator.stage(), UpdateStage::Idle);
    }

    #[test]
    fn test_same_build_needs_confirmation() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("cataclysm-tiles"), b"binary").unwrap();
        let digest = analyze_executable(&tmp.path().join("cataclysm-tiles"), &TaskContext::silent())
            .unwrap()
            .digest;
        let mut known = VersionIndex::in_memory();
        known.record_build(&digest, 10600, None);
        let index = Mutex::new(known);
        let fetcher = ContentFetcher::new();
        let registry = UpdateRegistry::new();
        let mut orchestrator =
            UpdateOrchestrator::new(&fetcher, &index, &registry, UpdateOptions::default());
        assert!(matches!(
            orchestrator.start_update(tmp.path(), &build(10600), &TaskContext::silent()),
            Err(LauncherError::Declined)
        ));
        assert!(!tmp.path().join("previous_version").exists());
    }

    #[test]
    fn test_download_failure_restores_install() {
        let tmp = tempfile::tempdir().unwrap();
        let install = tmp.path().join("game");
        fs::create_dir_all(install.join("save/World")).unwrap();
        fs::write(install.join("cataclysm-tiles"), b"old").unwrap();
        fs::create_dir_all(install.join("previous_version/stale")).unwrap();

        let busy = BusyCounter::new();
        let ctx = TaskContext::silent().with_busy_counter(busy.clone());
        let fetcher = ContentFetcher::new();
        let index = Mutex::new(VersionIndex::in_memory());
        let registry = UpdateRegistry::new();
        let mut orchestrator =
            UpdateOrchestrator::new(&fetcher, &index, &registry, UpdateOptions::default());
        let err = orchestrator
            .start_update(&install, &build(10600), &ctx)
            .unwrap_err();
        assert!(matches!(err, LauncherError::DownloadFailed(_)));
        assert_eq!(
            crate::tree::child_names(&install).unwrap(),
            vec!["cataclysm-tiles", "save"]
        );
        assert!(!busy.is_busy());
        assert!(!registry.is_updating(&install));
    }

    #[test]
    fn test_restoring_stages() {
        assert!(!UpdateStage::SnapshottingCurrentInstall.restores_snapshot());
        assert!(UpdateStage::Downloading.restores_snapshot());
        assert!(UpdateStage::ExtractingArchive.restores_snapshot());
        assert!(!UpdateStage::MergingForwardUserContent.restores_snapshot());
    }
}
