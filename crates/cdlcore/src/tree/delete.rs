//! Progress-reporting removal of a directory subtree, one object per step.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{IoResultExt, Result};
use crate::task::{Progress, Stepper, TaskContext, Tick};
use crate::tree::walker::{TreeEntry, TreeWalker};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub files: u64,
    pub dirs: u64,
}

enum Phase {
    Scanning(TreeWalker),
    Removing,
    RemovingRoot,
    Done,
}

pub struct TreeRemover {
    root: PathBuf,
    keep_root: bool,
    stage: String,
    phase: Phase,
    /// Contents-first order: children always precede their parent.
    entries: Vec<TreeEntry>,
    index: usize,
    summary: DeleteSummary,
}

impl TreeRemover {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let walker = TreeWalker::new(root.clone()).collect_entries(true);
        Self {
            root,
            keep_root: false,
            stage: "Deleting".to_string(),
            phase: Phase::Scanning(walker),
            entries: Vec::new(),
            index: 0,
            summary: DeleteSummary::default(),
        }
    }

    /// Empty the directory but leave it in place.
    pub fn keep_root(mut self, keep: bool) -> Self {
        self.keep_root = keep;
        self
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }
}

/// Remove a file, clearing the read-only bit once if that is what blocks it.
fn remove_file_forced(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            let mut perms = fs::symlink_metadata(path)?.permissions();
            if !perms.readonly() {
                return Err(e);
            }
            #[allow(clippy::permissions_set_readonly_false)]
            perms.set_readonly(false);
            fs::set_permissions(path, perms)?;
            fs::remove_file(path)
        }
        other => other,
    }
}

impl Stepper for TreeRemover {
    type Output = DeleteSummary;

    fn step(&mut self, ctx: &TaskContext) -> Result<Tick<DeleteSummary>> {
        match &mut self.phase {
            Phase::Scanning(walker) => {
                if !self.root.exists() {
                    self.phase = Phase::Done;
                    return Ok(Tick::Pending);
                }
                if let Tick::Ready(summary) = walker.step(ctx)? {
                    let mut entries = summary.entries;
                    entries.reverse();
                    self.entries = entries;
                    self.phase = Phase::Removing;
                }
                Ok(Tick::Pending)
            }
            Phase::Removing => {
                let Some(entry) = self.entries.get(self.index) else {
                    self.phase = if self.keep_root {
                        Phase::Done
                    } else {
                        Phase::RemovingRoot
                    };
                    return Ok(Tick::Pending);
                };
                if entry.is_dir {
                    fs::remove_dir(&entry.path).at(&entry.path)?;
                    self.summary.dirs += 1;
                } else {
                    remove_file_forced(&entry.path).at(&entry.path)?;
                    self.summary.files += 1;
                }
                ctx.progress(
                    Progress::new(
                        self.stage.clone(),
                        (self.index + 1) as u64,
                        self.entries.len() as u64,
                    )
                    .with_current(entry.relative.to_string_lossy()),
                );
                self.index += 1;
                Ok(Tick::Pending)
            }
            Phase::RemovingRoot => {
                fs::remove_dir(&self.root).at(&self.root)?;
                self.phase = Phase::Done;
                Ok(Tick::Pending)
            }
            Phase::Done => Ok(Tick::Ready(std::mem::take(&mut self.summary))),
        }
    }
}

/// Delete `root` and everything below it. Locked files are put to the
/// operator as retry-or-cancel.
pub fn remove_tree(root: &Path, ctx: &TaskContext) -> Result<DeleteSummary> {
    let mut remover = TreeRemover::new(root);
    crate::task::drive_with_retry(&mut remover, ctx)
}
