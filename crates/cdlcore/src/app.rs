//! Application context.
//!
//! One [`AppContext`] is built at startup and passed by reference to
//! whatever drives the workflows. It owns the shared state the components
//! need (settings, version index, HTTP fetcher, busy counter and the set of
//! install directories with an update in flight) and hands out
//! ready-wired components.

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use crate::backup::BackupEngine;
use crate::catalog::changelog::{fetch_changelog, ChangelogEntry, CHANGELOG_URL};
use crate::catalog::{fetch_builds, Build, BuildSource};
use crate::config::settings::{LauncherSettings, Preferences};
use crate::config::version_index::VersionIndex;
use crate::config::ConfigStore;
use crate::content::{install_target, ContentInstaller, ContentKind};
use crate::download::ContentFetcher;
use crate::error::Result;
use crate::game::InstallState;
use crate::paths::{GameLayout, TEMP_PREFIX};
use crate::task::{BusyCounter, CancelFlag, Progress, Status, TaskContext};
use crate::update::{UpdateOptions, UpdateOrchestrator, UpdateRegistry};

pub struct AppContext {
    settings: Box<dyn ConfigStore>,
    index: Mutex<VersionIndex>,
    fetcher: ContentFetcher,
    busy: BusyCounter,
    updates: UpdateRegistry,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("game_directory", &self.settings.game_directory())
            .field("busy", &self.busy.count())
            .finish()
    }
}

impl AppContext {
    pub fn new(settings: Box<dyn ConfigStore>, index: VersionIndex) -> Self {
        Self {
            settings,
            index: Mutex::new(index),
            fetcher: ContentFetcher::new(),
            busy: BusyCounter::new(),
            updates: UpdateRegistry::new(),
        }
    }

    /// Settings and version index from their default locations.
    pub fn load() -> anyhow::Result<Self> {
        let settings = LauncherSettings::load()?;
        tracing::info!("Settings loaded from {:?}", settings.path());
        let index = VersionIndex::load(&VersionIndex::default_path())?;
        Ok(Self::new(Box::new(settings), index))
    }

    pub fn settings(&self) -> &dyn ConfigStore {
        self.settings.as_ref()
    }

    pub fn settings_mut(&mut self) -> &mut dyn ConfigStore {
        self.settings.as_mut()
    }

    pub fn version_index(&self) -> &Mutex<VersionIndex> {
        &self.index
    }

    pub fn fetcher(&self) -> &ContentFetcher {
        &self.fetcher
    }

    pub fn busy(&self) -> &BusyCounter {
        &self.busy
    }

    pub fn updates(&self) -> &UpdateRegistry {
        &self.updates
    }

    /// Prefix of every temporary file and directory the launcher creates.
    pub fn temp_prefix(&self) -> &'static str {
        TEMP_PREFIX
    }

    /// Task context wired to the shared busy counter.
    pub fn task_context(
        &self,
        on_status: impl Fn(Status) + Send + Sync + 'static,
        on_progress: impl Fn(Progress) + Send + Sync + 'static,
        cancel: CancelFlag,
    ) -> TaskContext {
        TaskContext::new(on_status, on_progress, cancel).with_busy_counter(self.busy.clone())
    }

    /// The configured game directory, if any.
    pub fn game_layout(&self) -> Option<GameLayout> {
        self.settings.game_directory().map(GameLayout::new)
    }

    pub fn scan_install(&self, install_dir: &Path, ctx: &TaskContext) -> Result<InstallState> {
        let index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        InstallState::scan(install_dir, &index, ctx)
    }

    pub fn build_source(&self) -> BuildSource {
        BuildSource::new(self.settings.graphics(), self.settings.platform())
    }

    pub fn fetch_builds(&self, ctx: &TaskContext) -> Result<Vec<Build>> {
        fetch_builds(&self.fetcher, &self.build_source(), ctx)
    }

    pub fn fetch_changelog(&self, ctx: &TaskContext) -> Result<Vec<ChangelogEntry>> {
        fetch_changelog(&self.fetcher, CHANGELOG_URL, ctx)
    }

    /// Orchestrator configured from the current settings.
    pub fn update_orchestrator(&self) -> UpdateOrchestrator<'_> {
        UpdateOrchestrator::new(
            &self.fetcher,
            &self.index,
            &self.updates,
            UpdateOptions::from_settings(self.settings.as_ref()),
        )
    }

    pub fn backup_engine(&self, game_dir: &Path) -> BackupEngine {
        BackupEngine::new(game_dir)
    }

    /// Installer placing `kind` content into its live directory under
    /// `game_dir`.
    pub fn content_installer(&self, kind: ContentKind, game_dir: &Path) -> ContentInstaller<'_> {
        let target = install_target(&GameLayout::new(game_dir), kind);
        ContentInstaller::new(kind, &target, &self.fetcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::KEY_PREVENT_SAVE_MOVE;
    use crate::config::MemoryConfig;

    fn app() -> AppContext {
        AppContext::new(Box::new(MemoryConfig::new()), VersionIndex::in_memory())
    }

    #[test]
    fn test_task_context_shares_busy_counter() {
        let app = app();
        let ctx = app.task_context(|_| {}, |_| {}, CancelFlag::new());
        let guard = ctx.busy().enter();
        assert!(app.busy().is_busy());
        drop(guard);
        assert!(!app.busy().is_busy());
    }

    #[test]
    fn test_settings_flow_into_components() {
        let mut app = app();
        assert!(app.game_layout().is_none());
        app.settings_mut().set_game_directory(Path::new("/games/cdda"));
        app.settings_mut().set_bool(KEY_PREVENT_SAVE_MOVE, true);

        let layout = app.game_layout().unwrap();
        assert_eq!(layout.root(), Path::new("/games/cdda"));
        assert!(app.build_source().listing_url.ends_with('/'));

        let installer = app.content_installer(ContentKind::Mod, layout.root());
        assert_eq!(installer.target_dir(), Path::new("/games/cdda/mods"));
        let backups = app.backup_engine(layout.root());
        assert_eq!(backups.layout().backups_dir(), Path::new("/games/cdda/save_backups"));
        assert_eq!(app.temp_prefix(), "cddagl");
    }

    #[test]
    fn test_one_update_per_directory() {
        let app = app();
        let tmp = tempfile::tempdir().unwrap();
        let _claim = app.updates().claim(tmp.path()).unwrap();
        let mut orchestrator = app.update_orchestrator();
        let build = Build {
            number: Some(1),
            name: "b".into(),
            download_url: "http://127.0.0.1:9/b.zip".into(),
            published_at: None,
        };
        let ctx = app.task_context(|_| {}, |_| {}, CancelFlag::new());
        assert!(matches!(
            orchestrator.start_update(tmp.path(), &build, &ctx),
            Err(crate::error::LauncherError::UpdateInProgress(_))
        ));
    }
}
