//! The installed game: where its executable is, which build it is, and
//! whether it is running.

pub mod analyze;

use std::path::{Path, PathBuf};

pub use analyze::{analyze_executable, ExecutableAnalyzer, ExecutableReport};

use crate::config::version_index::VersionIndex;
use crate::error::Result;
use crate::paths::GameLayout;
use crate::task::TaskContext;

/// Executable names tried in order: console build before tiles build.
pub const EXECUTABLE_NAMES: &[&str] = &[
    "cataclysm.exe",
    "cataclysm-tiles.exe",
    "cataclysm",
    "cataclysm-tiles",
];

/// First known executable present directly in `dir`.
pub fn find_executable(dir: &Path) -> Option<PathBuf> {
    EXECUTABLE_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallState {
    pub install_dir: PathBuf,
    pub executable_path: Option<PathBuf>,
    pub detected_version_string: Option<String>,
    pub content_hash: Option<String>,
    pub build_number: Option<i64>,
    pub is_running: bool,
    pub pid: Option<u32>,
}

impl InstallState {
    /// State of a directory nothing is known about yet.
    pub fn empty(install_dir: &Path) -> Self {
        Self {
            install_dir: install_dir.to_path_buf(),
            ..Default::default()
        }
    }

    /// Inspect `install_dir`: locate the executable, hash it while looking
    /// for its version marker, and fill in what the index knows about the
    /// digest. A directory without an executable scans fine and simply has
    /// no executable.
    pub fn scan(install_dir: &Path, index: &VersionIndex, ctx: &TaskContext) -> Result<Self> {
        let mut state = Self::empty(install_dir);
        let Some(exe) = find_executable(install_dir) else {
            tracing::info!("No game executable in {:?}", install_dir);
            return Ok(state);
        };

        let report = analyze_executable(&exe, ctx)?;
        state.detected_version_string = report
            .version
            .or_else(|| index.version_for(&report.digest).map(str::to_string));
        state.build_number = index.build_for(&report.digest).map(|b| b.number);
        tracing::info!(
            "Found {:?} (version {:?}, build {:?})",
            exe,
            state.detected_version_string,
            state.build_number
        );
        state.content_hash = Some(report.digest);
        state.executable_path = Some(exe);
        Ok(state)
    }

    pub fn has_executable(&self) -> bool {
        self.executable_path.is_some()
    }

    /// Whether an update snapshot is available for manual restore.
    pub fn has_previous_version(&self) -> bool {
        GameLayout::new(&self.install_dir).has_previous_version()
    }

    pub fn mark_running(&mut self, pid: u32) {
        tracing::info!("Game started (pid {pid})");
        self.is_running = true;
        self.pid = Some(pid);
    }

    pub fn mark_exited(&mut self) {
        if let Some(pid) = self.pid.take() {
            tracing::info!("Game exited (pid {pid})");
        }
        self.is_running = false;
    }
}
