//! The `previous_version` snapshot: taking it and putting it back.
//!
//! Both directions move top-level entries one per step with [`EntryMover`],
//! so a cancel or a locked file is observed between two entries.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};
use crate::paths::{file_name_lossy, PREVIOUS_VERSION_DIR, SAVE_DIR, TEMP_PREFIX};
use crate::task::{drive_with_retry, Progress, Stepper, TaskContext, Tick};
use crate::tree::{child_names, move_path};

/// Moves the named children of one directory into another, one per step.
/// A failed move leaves the index where it was, so driving again retries
/// the same entry.
pub struct EntryMover {
    from: PathBuf,
    to: PathBuf,
    names: Vec<String>,
    index: usize,
    stage: String,
}

impl EntryMover {
    pub fn new(from: &Path, to: &Path, names: Vec<String>, stage: impl Into<String>) -> Self {
        Self {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            names,
            index: 0,
            stage: stage.into(),
        }
    }

    /// Names moved so far.
    pub fn moved(&self) -> &[String] {
        &self.names[..self.index]
    }
}

impl Stepper for EntryMover {
    type Output = usize;

    fn step(&mut self, ctx: &TaskContext) -> Result<Tick<usize>> {
        let Some(name) = self.names.get(self.index) else {
            return Ok(Tick::Ready(self.index));
        };
        if self.index == 0 {
            fs::create_dir_all(&self.to).at(&self.to)?;
        }
        move_path(&self.from.join(name), &self.to.join(name), ctx)?;
        self.index += 1;
        ctx.progress(
            Progress::new(self.stage.clone(), self.index as u64, self.names.len() as u64)
                .with_current(name.clone()),
        );
        Ok(Tick::Pending)
    }
}

/// What stays behind in the install directory when a snapshot is taken.
#[derive(Debug, Clone, Default)]
pub struct SnapshotPolicy {
    pub keep_save: bool,
    /// The running launcher, when it lives inside the install directory.
    pub launcher_exe: Option<PathBuf>,
}

impl SnapshotPolicy {
    /// Top-level names of `install_dir` that belong in the snapshot.
    pub fn entries_to_move(&self, install_dir: &Path) -> Result<Vec<String>> {
        let launcher = self
            .launcher_exe
            .as_deref()
            .filter(|exe| exe.parent() == Some(install_dir))
            .map(file_name_lossy);
        Ok(child_names(install_dir)?
            .into_iter()
            .filter(|name| name != PREVIOUS_VERSION_DIR)
            .filter(|name| !(self.keep_save && name == SAVE_DIR))
            .filter(|name| launcher.as_deref() != Some(name.as_str()))
            .collect())
    }
}

/// Move everything the policy allows from `install_dir` into a fresh
/// `previous_version`. Returns the number of entries moved.
pub fn take_snapshot(install_dir: &Path, policy: &SnapshotPolicy, ctx: &TaskContext) -> Result<usize> {
    let names = policy.entries_to_move(install_dir)?;
    let snapshot = install_dir.join(PREVIOUS_VERSION_DIR);
    fs::create_dir_all(&snapshot).at(&snapshot)?;
    tracing::info!("Moving {} entries into {:?}", names.len(), snapshot);
    let mut mover = EntryMover::new(install_dir, &snapshot, names, "Moving to previous version");
    drive_with_retry(&mut mover, ctx)
}

/// Put the snapshot back after a failed update.
///
/// Whatever the update left in `install_dir` is parked in a holding
/// directory, the snapshot's entries are moved back, and the parked entries
/// end up in a re-created `previous_version` for inspection. When nothing
/// was parked the snapshot directory is simply removed. Entries the policy
/// kept in place stay untouched.
///
/// Runs with a rollback context, so an earlier cancel does not interrupt it.
pub fn restore_snapshot(install_dir: &Path, policy: &SnapshotPolicy, ctx: &TaskContext) -> Result<()> {
    let ctx = &ctx.for_rollback();
    let snapshot = install_dir.join(PREVIOUS_VERSION_DIR);
    if !snapshot.is_dir() {
        return Ok(());
    }
    ctx.stage("Restoring previous version");

    let holding_parent = install_dir.parent().unwrap_or(install_dir);
    let holding = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempdir_in(holding_parent)
        .at(holding_parent)?;

    let leftovers = policy.entries_to_move(install_dir)?;
    let mut park = EntryMover::new(install_dir, holding.path(), leftovers, "Collecting partial update");
    let parked = drive_with_retry(&mut park, ctx)?;

    let previous = child_names(&snapshot)?;
    let mut back = EntryMover::new(&snapshot, install_dir, previous, "Restoring previous version");
    drive_with_retry(&mut back, ctx)?;
    fs::remove_dir(&snapshot).at(&snapshot)?;

    if parked > 0 {
        let names = child_names(holding.path())?;
        let mut keep = EntryMover::new(holding.path(), &snapshot, names, "Keeping partial update");
        drive_with_retry(&mut keep, ctx)?;
    }
    let holding_path = holding.path().to_path_buf();
    if let Err(e) = holding.close() {
        tracing::warn!("Could not remove holding directory {:?}: {e}", holding_path);
    }
    tracing::info!("Previous version restored into {:?}", install_dir);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populate(dir: &Path, names: &[&str]) {
        for name in names {
            if name.contains('.') {
                fs::write(dir.join(name), name).unwrap();
            } else {
                fs::create_dir_all(dir.join(name)).unwrap();
                fs::write(dir.join(name).join("inner.txt"), name).unwrap();
            }
        }
    }

    #[test]
    fn test_policy_filters() {
        let tmp = tempfile::tempdir().unwrap();
        populate(tmp.path(), &["save", "gfx", "previous_version", "launcher.exe", "cataclysm.exe"]);
        let policy = SnapshotPolicy {
            keep_save: true,
            launcher_exe: Some(tmp.path().join("launcher.exe")),
        };
        assert_eq!(
            policy.entries_to_move(tmp.path()).unwrap(),
            vec!["cataclysm.exe", "gfx"]
        );
        let outside = SnapshotPolicy {
            keep_save: false,
            launcher_exe: Some(PathBuf::from("/usr/bin/launcher.exe")),
        };
        assert_eq!(outside.entries_to_move(tmp.path()).unwrap().len(), 4);
    }

    #[test]
    fn test_snapshot_then_restore_without_leftovers() {
        let tmp = tempfile::tempdir().unwrap();
        let install = tmp.path().join("game");
        fs::create_dir_all(&install).unwrap();
        populate(&install, &["cataclysm-tiles.x", "data", "save"]);

        let policy = SnapshotPolicy::default();
        let ctx = TaskContext::silent();
        assert_eq!(take_snapshot(&install, &policy, &ctx).unwrap(), 3);
        assert_eq!(child_names(&install).unwrap(), vec!["previous_version"]);

        restore_snapshot(&install, &policy, &ctx).unwrap();
        assert_eq!(
            child_names(&install).unwrap(),
            vec!["cataclysm-tiles.x", "data", "save"]
        );
    }

    #[test]
    fn test_restore_parks_partial_update() {
        let tmp = tempfile::tempdir().unwrap();
        let install = tmp.path().join("game");
        fs::create_dir_all(&install).unwrap();
        populate(&install, &["data", "save"]);

        let policy = SnapshotPolicy {
            keep_save: true,
            launcher_exe: None,
        };
        let ctx = TaskContext::silent();
        take_snapshot(&install, &policy, &ctx).unwrap();
        populate(&install, &["data", "gfx", "half.bin"]);
        fs::write(install.join("data/new.txt"), "new").unwrap();

        ctx.cancel_flag().cancel();
        restore_snapshot(&install, &policy, &ctx).unwrap();
        assert_eq!(
            child_names(&install).unwrap(),
            vec!["data", "previous_version", "save"]
        );
        assert!(!install.join("data/new.txt").exists());
        assert_eq!(
            child_names(&install.join("previous_version")).unwrap(),
            vec!["data", "gfx", "half.bin"]
        );
    }
}
