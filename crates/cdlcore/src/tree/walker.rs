//! Lazy, restartable enumeration of a directory subtree.
//!
//! A [`TreeWalker`] wraps a `walkdir` iterator and processes a bounded batch
//! of entries per step, so a large tree never blocks the caller for longer
//! than one batch. Driven to completion it yields a [`TreeSummary`] with the
//! totals every progress bar needs as its denominator.

use std::path::{Path, PathBuf};

use crate::error::{LauncherError, Result};
use crate::task::{Progress, Stepper, TaskContext, Tick};

/// Entries examined per step.
const BATCH_SIZE: usize = 64;

/// One filesystem object found under the walked root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: PathBuf,
    /// Path relative to the walked root.
    pub relative: PathBuf,
    pub is_dir: bool,
    /// File size in bytes, 0 for directories.
    pub size: u64,
}

/// Totals (and optionally the full entry list) of a walked tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeSummary {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
    pub entries: Vec<TreeEntry>,
}

pub struct TreeWalker {
    root: PathBuf,
    iter: walkdir::IntoIter,
    keep_entries: bool,
    summary: TreeSummary,
}

impl TreeWalker {
    /// Walk everything below `root` (the root itself is not reported).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let iter = Self::make_iter(&root);
        Self {
            root,
            iter,
            keep_entries: false,
            summary: TreeSummary::default(),
        }
    }

    /// Also collect every entry into the summary, not just the totals.
    pub fn collect_entries(mut self, keep: bool) -> Self {
        self.keep_entries = keep;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start over from the beginning, discarding partial totals.
    pub fn restart(&mut self) {
        self.iter = Self::make_iter(&self.root);
        self.summary = TreeSummary::default();
    }

    fn make_iter(root: &Path) -> walkdir::IntoIter {
        walkdir::WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
    }

    fn to_entry(&self, dent: walkdir::DirEntry) -> Result<TreeEntry> {
        let is_dir = dent.file_type().is_dir();
        let size = if is_dir {
            0
        } else {
            dent.metadata()
                .map_err(|e| walk_error(dent.path(), e))?
                .len()
        };
        let relative = dent
            .path()
            .strip_prefix(&self.root)
            .unwrap_or(dent.path())
            .to_path_buf();
        Ok(TreeEntry {
            path: dent.into_path(),
            relative,
            is_dir,
            size,
        })
    }
}

fn walk_error(fallback: &Path, err: walkdir::Error) -> LauncherError {
    let path = err.path().unwrap_or(fallback).to_path_buf();
    let io = std::io::Error::from(err);
    LauncherError::from_io(&path, io)
}

impl Iterator for TreeWalker {
    type Item = Result<TreeEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.iter.next()?;
        Some(
            next.map_err(|e| walk_error(&self.root, e))
                .and_then(|dent| self.to_entry(dent)),
        )
    }
}

impl Stepper for TreeWalker {
    type Output = TreeSummary;

    fn step(&mut self, ctx: &TaskContext) -> Result<Tick<TreeSummary>> {
        for _ in 0..BATCH_SIZE {
            match self.next() {
                Some(entry) => {
                    let entry = entry?;
                    if entry.is_dir {
                        self.summary.dirs += 1;
                    } else {
                        self.summary.files += 1;
                        self.summary.bytes += entry.size;
                    }
                    if self.keep_entries {
                        self.summary.entries.push(entry);
                    }
                }
                None => return Ok(Tick::Ready(std::mem::take(&mut self.summary))),
            }
        }
        ctx.progress(Progress::new(
            "Scanning",
            self.summary.files + self.summary.dirs,
            0,
        ));
        Ok(Tick::Pending)
    }
}

/// Walk `root` to completion. A missing root is an empty tree.
pub fn scan_tree(root: &Path, keep_entries: bool, ctx: &TaskContext) -> Result<TreeSummary> {
    if !root.exists() {
        return Ok(TreeSummary::default());
    }
    let mut walker = TreeWalker::new(root).collect_entries(keep_entries);
    crate::task::drive(&mut walker, ctx)
}
