//! Whole-archive staging for formats that cannot seek to a single entry.
//!
//! The first `extract_entry` call unpacks everything into a private temp
//! directory; each call then places one staged entry at its destination.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};
use crate::paths::{safe_join, TEMP_PREFIX};

#[derive(Default)]
pub(crate) struct Staging {
    dir: Option<tempfile::TempDir>,
}

impl Staging {
    /// Staging root, unpacking with `fill` on first use.
    pub(crate) fn ensure(&mut self, fill: impl FnOnce(&Path) -> Result<()>) -> Result<PathBuf> {
        if let Some(dir) = &self.dir {
            return Ok(dir.path().to_path_buf());
        }
        let tmp = std::env::temp_dir();
        let dir = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir()
            .at(&tmp)?;
        fill(dir.path())?;
        let root = dir.path().to_path_buf();
        self.dir = Some(dir);
        Ok(root)
    }

    /// Copy staged entry `name` to the same relative path under `dest_root`.
    pub(crate) fn place(
        staged_root: &Path,
        name: &str,
        is_dir: bool,
        dest_root: &Path,
    ) -> Result<Option<PathBuf>> {
        let (Some(src), Some(target)) = (safe_join(staged_root, name), safe_join(dest_root, name))
        else {
            return Ok(None);
        };
        if is_dir {
            fs::create_dir_all(&target).at(&target)?;
            return Ok(Some(target));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        fs::copy(&src, &target).at(&target)?;
        Ok(Some(target))
    }
}
