//! Error taxonomy shared by every workflow.
//!
//! OS-level failures are split into [`LauncherError::FileSystemBusy`] (another
//! process plausibly holds the file, operator may retry) and
//! [`LauncherError::FileSystemError`] (anything else). Cancellation and
//! declined confirmations are ordinary variants so callers can tell an aborted
//! workflow from a failed one.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::tree::lock::{find_blocking_process, BlockingProcess};

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Invalid archive {path:?}: {reason}")]
    InvalidArchive { path: PathBuf, reason: String },

    #[error("Incomplete download {path:?}: {reason}")]
    IncompleteDownload { path: PathBuf, reason: String },

    #[error("No executable found in {0:?}")]
    NoExecutableFound(PathBuf),

    #[error("Install directory {0:?} is not empty and has no recognized game")]
    InstallDirNotEmpty(PathBuf),

    #[error("{path:?} is in use{}: {source}", process_suffix(.process))]
    FileSystemBusy {
        path: PathBuf,
        #[source]
        source: io::Error,
        process: Option<BlockingProcess>,
    },

    #[error("File system error on {path:?}: {source}")]
    FileSystemError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("No content found in archive {0:?}")]
    NoContentInArchive(PathBuf),

    #[error("Destination already exists: {0:?}")]
    DestinationCollision(PathBuf),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation declined by the operator")]
    Declined,

    #[error("An update is already running for {0:?}")]
    UpdateInProgress(PathBuf),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LauncherError>;

fn process_suffix(process: &Option<BlockingProcess>) -> String {
    match process {
        Some(p) => format!(" by {} (pid {})", p.name, p.pid),
        None => String::new(),
    }
}

impl LauncherError {
    /// Classify an OS error raised while touching `path`.
    pub fn from_io(path: &Path, source: io::Error) -> Self {
        if is_busy_error(&source) {
            let process = find_blocking_process(path);
            LauncherError::FileSystemBusy {
                path: path.to_path_buf(),
                source,
                process,
            }
        } else {
            LauncherError::FileSystemError {
                path: path.to_path_buf(),
                source,
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LauncherError::Cancelled)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, LauncherError::FileSystemBusy { .. })
    }

    /// Errors the operator can resolve by retrying after closing whatever
    /// holds the file.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LauncherError::FileSystemBusy { .. } | LauncherError::FileSystemError { .. }
        )
    }
}

impl From<anyhow::Error> for LauncherError {
    fn from(err: anyhow::Error) -> Self {
        LauncherError::Config(format!("{err:#}"))
    }
}

/// Whether an OS error looks like another process holding the file open.
pub fn is_busy_error(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::PermissionDenied {
        return true;
    }
    match err.raw_os_error() {
        #[cfg(windows)]
        Some(32) | Some(33) => true,
        #[cfg(unix)]
        Some(code) if code == libc::EBUSY || code == libc::ETXTBSY => true,
        _ => false,
    }
}

/// Attach a path to an `io::Result`, classifying the failure.
pub trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|e| LauncherError::from_io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_plain_fs_error() {
        let err = LauncherError::from_io(
            Path::new("/nonexistent/file"),
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert!(matches!(err, LauncherError::FileSystemError { .. }));
        assert!(err.is_retryable());
        assert!(!err.is_busy());
    }

    #[test]
    fn test_permission_denied_is_busy() {
        let err = LauncherError::from_io(
            Path::new("/nonexistent/locked.exe"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(err.is_busy());
        assert!(err.to_string().contains("in use"));
    }

    #[cfg(unix)]
    #[test]
    fn test_ebusy_is_busy() {
        let err = io::Error::from_raw_os_error(libc::EBUSY);
        assert!(is_busy_error(&err));
    }

    #[test]
    fn test_cancelled_predicate() {
        assert!(LauncherError::Cancelled.is_cancelled());
        assert!(!LauncherError::Declined.is_cancelled());
        assert!(!LauncherError::Cancelled.is_retryable());
    }
}
