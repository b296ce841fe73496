//! Logging setup.
//!
//! Components log through `tracing` macros only. The embedding application
//! calls [`init`] once at startup; output goes to a log file under the
//! launcher data directory, or to stderr when no file is given.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

/// Rotate the log file once it grows past this size.
const MAX_LOG_SIZE: u64 = 2 * 1024 * 1024;

/// Default log file location (`<data dir>/cddagl/logs/launcher.log`).
pub fn default_log_file() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("~/.local/share"))
        .join("cddagl")
        .join("logs")
        .join("launcher.log")
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info`
/// filter.
pub fn init(log_file: Option<&Path>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true);

    match log_file {
        Some(path) => {
            let file = open_log_file(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {e}"))?;
        }
        None => {
            builder
                .with_writer(std::io::stderr)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {e}"))?;
        }
    }

    tracing::info!(
        "cdlcore {} logging initialized",
        env!("CARGO_PKG_VERSION")
    );
    Ok(())
}

fn open_log_file(path: &Path) -> anyhow::Result<fs::File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory {:?}", parent))?;
    }

    if let Ok(meta) = fs::metadata(path) {
        if meta.len() > MAX_LOG_SIZE {
            let old = path.with_extension("log.old");
            let _ = fs::rename(path, &old);
        }
    }

    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_log_file_rotates_large_file() {
        let tmp = tempfile::tempdir().unwrap();
        let log = tmp.path().join("logs/launcher.log");
        fs::create_dir_all(log.parent().unwrap()).unwrap();
        fs::write(&log, vec![b'x'; (MAX_LOG_SIZE + 1) as usize]).unwrap();

        let _file = open_log_file(&log).unwrap();
        assert!(tmp.path().join("logs/launcher.log.old").exists());
        assert_eq!(fs::metadata(&log).unwrap().len(), 0);
    }

    #[test]
    fn test_default_log_file_name() {
        assert!(default_log_file().ends_with("cddagl/logs/launcher.log"));
    }
}
