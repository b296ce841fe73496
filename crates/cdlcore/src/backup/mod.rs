//! Save backups.
//!
//! The backup store is the flat `save_backups/` directory of zip archives,
//! each rooted at `save/`. Records are derived by scanning it; nothing else
//! is persisted.

pub mod engine;
pub mod naming;

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

pub use engine::{BackupEngine, BEFORE_LAST_RESTORE};
pub use naming::unique_backup_name;

use crate::archive::zip::ZipReader;
use crate::archive::{ArchiveEntry, ArchiveReader};
use crate::error::{IoResultExt, LauncherError, Result};
use crate::paths::SAVE_DIR;
use crate::task::TaskContext;

pub const BACKUP_EXTENSION: &str = "zip";

/// Prefix of backups taken automatically; only these are pruned.
pub const AUTO_PREFIX: &str = "auto";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub archive_path: PathBuf,
    /// File stem of the archive.
    pub display_name: String,
    pub modified_at: DateTime<Local>,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub world_count: usize,
    pub character_count: usize,
}

fn save_prefix() -> String {
    format!("{SAVE_DIR}/")
}

/// Whether every entry lives under `save/`.
pub fn is_save_archive(entries: &[ArchiveEntry]) -> bool {
    let prefix = save_prefix();
    !entries.is_empty() && entries.iter().all(|e| e.name.starts_with(&prefix))
}

/// World directories (`save/<world>/`) and characters (`save/<world>/*.sav`).
fn count_worlds_and_characters(entries: &[ArchiveEntry]) -> (usize, usize) {
    let prefix = save_prefix();
    let mut worlds = BTreeSet::new();
    let mut characters = 0;
    for entry in entries {
        let Some(rest) = entry.name.strip_prefix(&prefix) else {
            continue;
        };
        let parts: Vec<&str> = rest.split('/').filter(|p| !p.is_empty()).collect();
        if parts.len() >= 2 || (parts.len() == 1 && entry.is_dir) {
            worlds.insert(parts[0].to_string());
        }
        if parts.len() == 2 && !entry.is_dir && parts[1].ends_with(".sav") {
            characters += 1;
        }
    }
    (worlds.len(), characters)
}

/// Paths of the `*.zip` files in `dir`. A missing directory has none.
pub fn backup_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LauncherError::from_io(dir, e)),
    };
    let mut archives = Vec::new();
    for entry in read {
        let path = entry.at(dir)?.path();
        let is_zip = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(BACKUP_EXTENSION));
        if is_zip && path.is_file() {
            archives.push(path);
        }
    }
    archives.sort();
    Ok(archives)
}

/// File stems of the archives in `dir`, used for name collision checks.
pub fn backup_names(dir: &Path) -> Result<Vec<String>> {
    Ok(backup_archives(dir)?
        .iter()
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect())
}

/// Inspect one archive. `Ok(None)` for archives that are not save backups.
pub fn read_backup_record(path: &Path) -> Result<Option<BackupRecord>> {
    let reader = ZipReader::open(path)?;
    let entries = reader.entries();
    if !is_save_archive(entries) {
        return Ok(None);
    }
    let (world_count, character_count) = count_worlds_and_characters(entries);
    let modified = fs::metadata(path).at(path)?.modified().at(path)?;
    Ok(Some(BackupRecord {
        archive_path: path.to_path_buf(),
        display_name: path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
        modified_at: DateTime::<Local>::from(modified),
        uncompressed_size: reader.total_size(),
        compressed_size: reader.total_compressed_size(),
        world_count,
        character_count,
    }))
}

/// Every valid backup in `dir`, in natural name order. Unreadable or foreign
/// archives are logged and left out.
pub fn list_backups(dir: &Path, ctx: &TaskContext) -> Result<Vec<BackupRecord>> {
    let mut records = Vec::new();
    for path in backup_archives(dir)? {
        ctx.checkpoint()?;
        match read_backup_record(&path) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => tracing::warn!("Ignoring {:?}: not rooted at {SAVE_DIR}/", path),
            Err(e) => tracing::warn!("Ignoring unreadable backup {:?}: {e}", path),
        }
    }
    records.sort_by_key(|r| naming::natural_key(&r.display_name));
    Ok(records)
}
