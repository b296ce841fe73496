//! Backup, restore and pruning of the save directory.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use rand::Rng;

use super::{backup_archives, backup_names, naming, AUTO_PREFIX, BACKUP_EXTENSION};
use crate::archive::zip::ZipArchiveWriter;
use crate::archive::{open_archive, ArchiveExtractor};
use crate::error::{IoResultExt, LauncherError, Result};
use crate::paths::{file_name_lossy, names_equal, to_archive_path, GameLayout, SAVE_DIR};
use crate::task::{self, Progress, Stepper, TaskContext, Throughput, Tick};
use crate::tree::walker::{TreeEntry, TreeWalker};
use crate::tree::{move_path, remove_tree, CopyMode, TreeCopier};

/// Name of the safety backup taken before a restore.
pub const BEFORE_LAST_RESTORE: &str = "before_last_restore";

/// Bytes compressed per step.
const CHUNK_SIZE: usize = 256 * 1024;

/// Attempts at finding a free name for the set-aside save directory.
const ASIDE_ATTEMPTS: u32 = 32;

enum Phase {
    Scanning(TreeWalker),
    Writing,
    Done,
}

/// Streams the save directory into a zip, one buffer per step. Entry names
/// are relative to the game directory, so the archive root is `save/`.
pub struct BackupWriter {
    game_dir: PathBuf,
    writer: Option<ZipArchiveWriter>,
    phase: Phase,
    entries: Vec<TreeEntry>,
    root_written: bool,
    index: usize,
    open: Option<File>,
    done_bytes: u64,
    total_bytes: u64,
    throughput: Throughput,
}

impl BackupWriter {
    pub fn new(layout: &GameLayout, writer: ZipArchiveWriter) -> Self {
        let walker = TreeWalker::new(layout.save_dir()).collect_entries(true);
        Self {
            game_dir: layout.root().to_path_buf(),
            writer: Some(writer),
            phase: Phase::Scanning(walker),
            entries: Vec::new(),
            root_written: false,
            index: 0,
            open: None,
            done_bytes: 0,
            total_bytes: 0,
            throughput: Throughput::new(),
        }
    }

    fn archive_name(&self, entry: &TreeEntry) -> String {
        let relative = entry
            .path
            .strip_prefix(&self.game_dir)
            .unwrap_or(&entry.relative);
        to_archive_path(relative)
    }

    /// Write one buffer of the current entry. Returns true once the entry is
    /// complete.
    fn write_step(&mut self) -> Result<bool> {
        let entry = self.entries[self.index].clone();
        let name = self.archive_name(&entry);
        let Some(writer) = self.writer.as_mut() else {
            return Err(LauncherError::Cancelled);
        };

        if entry.is_dir {
            writer.add_directory(&format!("{name}/"))?;
            return Ok(true);
        }
        if self.open.is_none() {
            let file = File::open(&entry.path).at(&entry.path)?;
            writer.start_file(&name)?;
            self.open = Some(file);
        }
        let Some(file) = self.open.as_mut() else {
            return Ok(true);
        };
        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = file.read(&mut buf).at(&entry.path)?;
        if n == 0 {
            self.open = None;
            return Ok(true);
        }
        writer.write_chunk(&buf[..n])?;
        self.done_bytes += n as u64;
        Ok(false)
    }

    /// Take the writer out so the archive can be finished or discarded.
    fn take_writer(&mut self) -> Option<ZipArchiveWriter> {
        self.open = None;
        self.writer.take()
    }
}

impl Stepper for BackupWriter {
    type Output = u64;

    fn step(&mut self, ctx: &TaskContext) -> Result<Tick<u64>> {
        match &mut self.phase {
            Phase::Scanning(walker) => {
                if let Tick::Ready(summary) = walker.step(ctx)? {
                    self.total_bytes = summary.bytes;
                    self.entries = summary.entries;
                    tracing::info!(
                        "Backing up {} files ({} bytes)",
                        summary.files,
                        self.total_bytes
                    );
                    self.phase = Phase::Writing;
                }
                Ok(Tick::Pending)
            }
            Phase::Writing => {
                if !self.root_written {
                    // `save/` first, so an empty save directory still makes a save archive.
                    let Some(writer) = self.writer.as_mut() else {
                        return Err(LauncherError::Cancelled);
                    };
                    writer.add_directory(&format!("{SAVE_DIR}/"))?;
                    self.root_written = true;
                    return Ok(Tick::Pending);
                }
                if self.index >= self.entries.len() {
                    self.phase = Phase::Done;
                    return Ok(Tick::Pending);
                }
                let finished = self.write_step()?;
                let current = self.entries[self.index].relative.to_string_lossy().into_owned();
                let rate = self.throughput.tick(self.done_bytes);
                ctx.progress(
                    Progress::new("Compressing", self.done_bytes, self.total_bytes)
                        .with_current(current)
                        .with_rate(rate),
                );
                if finished {
                    self.index += 1;
                }
                Ok(Tick::Pending)
            }
            Phase::Done => {
                let Some(writer) = self.take_writer() else {
                    return Err(LauncherError::Cancelled);
                };
                writer.finish()?;
                Ok(Tick::Ready(self.done_bytes))
            }
        }
    }
}

/// Backup workflows for one game directory.
#[derive(Debug, Clone)]
pub struct BackupEngine {
    layout: GameLayout,
}

impl BackupEngine {
    pub fn new(game_dir: &Path) -> Self {
        Self {
            layout: GameLayout::new(game_dir),
        }
    }

    pub fn layout(&self) -> &GameLayout {
        &self.layout
    }

    fn archive_path(&self, name: &str) -> PathBuf {
        self.layout
            .backups_dir()
            .join(format!("{name}.{BACKUP_EXTENSION}"))
    }

    /// Compress the save directory into `save_backups/<name>.zip`.
    ///
    /// With `exclusive_single_file` the archive is written under exactly
    /// `name` and an existing file is a `DestinationCollision`; otherwise a
    /// taken name gets a numeric suffix. A cancelled or failed backup leaves
    /// no archive behind.
    pub fn backup_saves(
        &self,
        name: &str,
        exclusive_single_file: bool,
        ctx: &TaskContext,
    ) -> Result<PathBuf> {
        let _busy = ctx.busy().enter();
        let result = self.write_backup(name, exclusive_single_file, ctx);
        ctx.conclude(&result, |path| format!("Backup saved to {:?}", path));
        result
    }

    fn write_backup(&self, name: &str, exclusive: bool, ctx: &TaskContext) -> Result<PathBuf> {
        let save_dir = self.layout.save_dir();
        if !save_dir.is_dir() {
            return Err(LauncherError::from_io(
                &save_dir,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }
        let writer = if exclusive {
            ZipArchiveWriter::create_new(&self.archive_path(name))?
        } else {
            let existing = backup_names(&self.layout.backups_dir())?;
            let unique = naming::unique_backup_name(name, &existing);
            ZipArchiveWriter::create_new(&self.archive_path(&unique))?
        };
        let path = writer.path().to_path_buf();
        ctx.stage(&format!("Backing up saves to {}", file_name_lossy(&path)));

        let mut stepper = BackupWriter::new(&self.layout, writer);
        match task::drive(&mut stepper, ctx) {
            Ok(bytes) => {
                tracing::info!("Wrote {:?} ({} bytes of saves)", path, bytes);
                Ok(path)
            }
            Err(e) => {
                drop(stepper.take_writer());
                if let Err(rm) = fs::remove_file(&path) {
                    tracing::warn!("Could not remove partial backup {:?}: {rm}", path);
                }
                Err(e)
            }
        }
    }

    /// Replace the save directory with the contents of `archive`.
    ///
    /// Unless `safety_backup` is off, the current saves are first backed up
    /// as `before_last_restore` (an older backup of that name is renamed
    /// out of the way). The live save directory is set aside under a random
    /// name and only deleted once extraction completed; on failure or cancel
    /// it is moved back.
    pub fn restore_backup(
        &self,
        archive: &Path,
        safety_backup: bool,
        ctx: &TaskContext,
    ) -> Result<()> {
        let _busy = ctx.busy().enter();
        let result = self.run_restore(archive, safety_backup, ctx);
        ctx.conclude(&result, |_| {
            format!("Restored saves from {}", file_name_lossy(archive))
        });
        result
    }

    fn run_restore(&self, archive: &Path, safety_backup: bool, ctx: &TaskContext) -> Result<()> {
        let mut archive = archive.to_path_buf();
        let save_dir = self.layout.save_dir();
        let has_saves = !crate::tree::is_empty_dir(&save_dir)?;

        if safety_backup && has_saves {
            ctx.stage("Backing up current saves");
            if let Some((from, to)) = self.rename_previous_safety_backup(ctx)? {
                if archive == from {
                    archive = to;
                }
            }
            self.write_backup(BEFORE_LAST_RESTORE, true, ctx)?;
        }

        let mut reader = open_archive(&archive)?;
        if reader.entries().is_empty() {
            return Err(LauncherError::InvalidArchive {
                path: archive,
                reason: "the archive is empty".to_string(),
            });
        }
        if !super::is_save_archive(reader.entries()) {
            return Err(LauncherError::InvalidArchive {
                path: archive,
                reason: format!("not a save backup (entries outside {SAVE_DIR}/)"),
            });
        }

        let aside = if save_dir.exists() {
            Some(self.set_save_aside(ctx)?)
        } else {
            None
        };

        ctx.stage(&format!("Restoring {}", file_name_lossy(&archive)));
        let prefix = format!("{SAVE_DIR}/");
        let mut extractor = ArchiveExtractor::new(reader.as_mut(), self.layout.root())
            .with_stage("Restoring")
            .with_filter(move |e| e.name.starts_with(&prefix));
        let extracted = task::drive(&mut extractor, ctx);

        match (extracted, aside) {
            (Ok(summary), Some(aside)) => {
                tracing::info!("Restored {} files from {:?}", summary.files, archive);
                if let Err(e) = remove_tree(&aside, &ctx.for_rollback()) {
                    ctx.warn(format!("Could not remove old saves at {:?}: {e}", aside));
                }
                Ok(())
            }
            (Ok(_), None) => Ok(()),
            (Err(e), Some(aside)) => {
                tracing::warn!("Restore interrupted ({e}), putting original saves back");
                self.put_save_back(&aside, &ctx.for_rollback())?;
                Err(e)
            }
            (Err(e), None) => Err(e),
        }
    }

    /// Rename an existing `before_last_restore` archive out of the way.
    /// Returns the rename performed, if any.
    fn rename_previous_safety_backup(&self, ctx: &TaskContext) -> Result<Option<(PathBuf, PathBuf)>> {
        let dir = self.layout.backups_dir();
        let Some(old) = backup_archives(&dir)?.into_iter().find(|p| {
            p.file_stem()
                .is_some_and(|s| names_equal(&s.to_string_lossy(), BEFORE_LAST_RESTORE))
        }) else {
            return Ok(None);
        };
        let existing = backup_names(&dir)?;
        let new_name = naming::unique_backup_name(BEFORE_LAST_RESTORE, &existing);
        let target = self.archive_path(&new_name);
        task::retry(ctx, || fs::rename(&old, &target).at(&old))?;
        tracing::info!("Kept previous safety backup as {:?}", target);
        Ok(Some((old, target)))
    }

    /// Move `save/` to a random sibling name and return it.
    fn set_save_aside(&self, ctx: &TaskContext) -> Result<PathBuf> {
        let save_dir = self.layout.save_dir();
        let mut rng = rand::rng();
        for _ in 0..ASIDE_ATTEMPTS {
            let suffix: u32 = rng.random();
            let aside = self.layout.root().join(format!("{SAVE_DIR}-{suffix:08x}"));
            if aside.exists() {
                continue;
            }
            task::retry(ctx, || fs::rename(&save_dir, &aside).at(&save_dir))?;
            tracing::info!("Set current saves aside as {:?}", aside);
            return Ok(aside);
        }
        Err(LauncherError::DestinationCollision(save_dir))
    }

    /// Bring the set-aside saves back into `save/`, over anything a partial
    /// extraction wrote.
    fn put_save_back(&self, aside: &Path, ctx: &TaskContext) -> Result<()> {
        let save_dir = self.layout.save_dir();
        if !save_dir.exists() {
            return task::retry(ctx, || fs::rename(aside, &save_dir).at(aside));
        }
        let mut mover = TreeCopier::new(aside, &save_dir, CopyMode::Move).with_stage("Restoring saves");
        task::drive_with_retry(&mut mover, ctx)?;
        Ok(())
    }

    /// Delete the oldest `auto*` backups until fewer than `max` remain.
    /// Returns the deleted archives.
    pub fn prune_auto_backups(&self, max: u32, ctx: &TaskContext) -> Result<Vec<PathBuf>> {
        let mut autos = Vec::new();
        for path in backup_archives(&self.layout.backups_dir())? {
            let is_auto = file_name_lossy(&path)
                .to_lowercase()
                .starts_with(AUTO_PREFIX);
            if is_auto {
                let modified = fs::metadata(&path).at(&path)?.modified().at(&path)?;
                autos.push((modified, path));
            }
        }
        autos.sort();

        let mut deleted = Vec::new();
        let mut remaining = autos.len();
        for (_, path) in autos {
            if remaining < max as usize {
                break;
            }
            ctx.checkpoint()?;
            task::retry(ctx, || fs::remove_file(&path).at(&path))?;
            tracing::info!("Pruned old automatic backup {:?}", path);
            deleted.push(path);
            remaining -= 1;
        }
        Ok(deleted)
    }

    /// Prune, then back up under `auto_<timestamp>_<reason>`.
    pub fn auto_backup(&self, reason: &str, max: u32, ctx: &TaskContext) -> Result<PathBuf> {
        self.prune_auto_backups(max, ctx)?;
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.backup_saves(&format!("{AUTO_PREFIX}_{stamp}_{reason}"), false, ctx)
    }

    pub fn delete_backup(&self, archive: &Path, ctx: &TaskContext) -> Result<()> {
        task::retry(ctx, || fs::remove_file(archive).at(archive))?;
        tracing::info!("Deleted backup {:?}", archive);
        Ok(())
    }

    /// Rename a backup. A name already used by another archive is a
    /// `DestinationCollision`.
    pub fn rename_backup(&self, archive: &Path, new_name: &str, ctx: &TaskContext) -> Result<PathBuf> {
        let target = self.archive_path(new_name);
        let taken = backup_names(&self.layout.backups_dir())?
            .iter()
            .any(|n| names_equal(n, new_name));
        let same_file = archive
            .file_stem()
            .is_some_and(|s| names_equal(&s.to_string_lossy(), new_name));
        if taken && !same_file {
            return Err(LauncherError::DestinationCollision(target));
        }
        task::retry(ctx, || move_path(archive, &target, ctx))?;
        tracing::info!("Renamed backup {:?} to {:?}", archive, target);
        Ok(target)
    }
}
