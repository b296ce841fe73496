//! Directory tree primitives: walking, copying/moving and deleting subtrees
//! one filesystem object per step, and identifying processes that hold files.

pub mod copy;
pub mod delete;
pub mod lock;
pub mod walker;

use std::fs;
use std::io;
use std::path::Path;

pub use copy::{copy_tree, CopyMode, CopySummary, TreeCopier};
pub use delete::{remove_tree, DeleteSummary, TreeRemover};
pub use walker::{scan_tree, TreeEntry, TreeSummary, TreeWalker};

use crate::error::{IoResultExt, Result};
use crate::task::TaskContext;

fn is_cross_device(err: &io::Error) -> bool {
    match err.raw_os_error() {
        #[cfg(unix)]
        Some(code) => code == libc::EXDEV,
        #[cfg(windows)]
        Some(code) => code == 17,
        _ => false,
    }
}

/// Move one file or directory. A plain rename when source and destination
/// share a filesystem, a progress-reporting copy-then-delete otherwise.
pub fn move_path(src: &Path, dst: &Path, ctx: &TaskContext) -> Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            tracing::debug!("Cross-device move {:?} -> {:?}", src, dst);
            if src.is_dir() {
                let mut mover = TreeCopier::new(src, dst, CopyMode::Move);
                crate::task::drive_with_retry(&mut mover, ctx)?;
            } else {
                fs::copy(src, dst).at(dst)?;
                fs::remove_file(src).at(src)?;
            }
            Ok(())
        }
        Err(e) => Err(crate::error::LauncherError::from_io(src, e)),
    }
}

/// Names of the direct children of `dir`, sorted. A missing directory has
/// no children.
pub fn child_names(dir: &Path) -> Result<Vec<String>> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(crate::error::LauncherError::from_io(dir, e)),
    };
    let mut names = Vec::new();
    for entry in read {
        let entry = entry.at(dir)?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// Whether `dir` is missing or has no entries.
pub fn is_empty_dir(dir: &Path) -> Result<bool> {
    Ok(child_names(dir)?.is_empty())
}
