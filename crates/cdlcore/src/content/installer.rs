//! Installing soundpacks and mods from archives.
//!
//! Both entry points converge on the same pipeline: test the archive,
//! extract it into a private scratch directory, find every content root by
//! its descriptor, then move each root into the live content directory
//! unless something of the same name is already there. Nothing is ever
//! extracted straight into the live directory, and nothing is overwritten.

use std::path::{Path, PathBuf};

use crate::archive::{verify_archive, ArchiveExtractor};
use crate::download::{filename_from_url, ContentFetcher};
use crate::error::{IoResultExt, LauncherError, Result};
use crate::paths::{file_name_lossy, find_case_insensitive, TEMP_PREFIX};
use crate::task::{drive, Prompt, TaskContext};
use crate::tree::{move_path, remove_tree, DeleteSummary};

use super::descriptor::ContentKind;
use super::repository::{DownloadMethod, RepositoryEntry};
use super::{find_content_roots, ContentEntry};

/// What an install placed in the content directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub installed: Vec<PathBuf>,
    /// Roots not moved because their name was already taken.
    pub collisions: Vec<PathBuf>,
}

impl InstallReport {
    pub fn summary(&self) -> String {
        let names: Vec<String> = self.installed.iter().map(|p| file_name_lossy(p)).collect();
        let mut message = format!("Installed {}", names.join(", "));
        if !self.collisions.is_empty() {
            let skipped: Vec<String> = self.collisions.iter().map(|p| file_name_lossy(p)).collect();
            message.push_str(&format!(" (already present, skipped: {})", skipped.join(", ")));
        }
        message
    }
}

pub struct ContentInstaller<'a> {
    kind: ContentKind,
    target_dir: PathBuf,
    fetcher: &'a ContentFetcher,
}

impl<'a> ContentInstaller<'a> {
    pub fn new(kind: ContentKind, target_dir: &Path, fetcher: &'a ContentFetcher) -> Self {
        Self {
            kind,
            target_dir: target_dir.to_path_buf(),
            fetcher,
        }
    }

    pub fn target_dir(&self) -> &Path {
        &self.target_dir
    }

    /// Fetch `entry` (directly or through the operator's browser) and
    /// install it. `installed` is the current listing, used to warn about
    /// identities that are already present.
    pub fn install_from_repository(
        &self,
        entry: &RepositoryEntry,
        installed: &[ContentEntry],
        ctx: &TaskContext,
    ) -> Result<InstallReport> {
        let _busy = ctx.busy().enter();
        let result = self.run_repository_install(entry, installed, ctx);
        ctx.conclude(&result, InstallReport::summary);
        result
    }

    /// Install from an archive the operator already has.
    pub fn install_from_file(&self, archive: &Path, ctx: &TaskContext) -> Result<InstallReport> {
        let _busy = ctx.busy().enter();
        let result = self.with_scratch(|scratch| {
            self.install_archive(archive, scratch, &archive_stem(archive), ctx)
        });
        ctx.conclude(&result, InstallReport::summary);
        result
    }

    /// Remove an installed entry with progress.
    pub fn delete_entry(&self, entry: &ContentEntry, ctx: &TaskContext) -> Result<DeleteSummary> {
        let _busy = ctx.busy().enter();
        ctx.stage(&format!("Deleting {}", entry.display_name));
        let result = if entry.path.is_dir() {
            remove_tree(&entry.path, ctx)
        } else {
            std::fs::remove_file(&entry.path)
                .at(&entry.path)
                .map(|()| DeleteSummary { files: 1, dirs: 0 })
        };
        ctx.conclude(&result, |_| format!("Deleted {}", entry.display_name));
        result
    }

    fn run_repository_install(
        &self,
        entry: &RepositoryEntry,
        installed: &[ContentEntry],
        ctx: &TaskContext,
    ) -> Result<InstallReport> {
        let duplicates: Vec<String> = entry
            .identities()
            .into_iter()
            .filter(|id| installed.iter().any(|e| e.identities.contains(id)))
            .collect();
        if !duplicates.is_empty() {
            tracing::info!("Already installed: {}", duplicates.join(", "));
            let prompt = Prompt::DuplicateContent {
                identities: duplicates,
            };
            if !ctx.operator().confirm(&prompt) {
                return Err(LauncherError::Declined);
            }
        }

        self.with_scratch(|scratch| {
            let archive = match entry.method {
                DownloadMethod::DirectDownload => {
                    ctx.stage(&format!("Downloading {}", entry.display_name()));
                    let use_disposition = self.kind == ContentKind::Mod;
                    self.fetcher
                        .download(&entry.url, &scratch.join("download"), use_disposition, ctx)?
                        .path
                }
                DownloadMethod::BrowserDownload => {
                    let file_name = entry
                        .expected_filename
                        .clone()
                        .unwrap_or_else(|| filename_from_url(&entry.url));
                    let suggested = dirs::download_dir()
                        .unwrap_or_else(std::env::temp_dir)
                        .join(file_name);
                    ctx.stage(&format!("Waiting for browser download of {}", entry.url));
                    ctx.operator()
                        .locate_download(&entry.url, &suggested)
                        .ok_or(LauncherError::Cancelled)?
                }
            };
            ctx.checkpoint()?;
            self.install_archive(&archive, scratch, &entry.name, ctx)
        })
    }

    /// Run `work` with a fresh scratch directory, removed afterwards on a
    /// best-effort basis.
    fn with_scratch<T>(&self, work: impl FnOnce(&Path) -> Result<T>) -> Result<T> {
        let tmp = std::env::temp_dir();
        let scratch = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempdir()
            .at(&tmp)?;
        let result = work(scratch.path());
        let path = scratch.path().to_path_buf();
        if let Err(e) = scratch.close() {
            tracing::warn!("Could not remove scratch directory {:?}: {e}", path);
        }
        result
    }

    fn install_archive(
        &self,
        archive: &Path,
        scratch: &Path,
        fallback_name: &str,
        ctx: &TaskContext,
    ) -> Result<InstallReport> {
        ctx.stage("Verifying archive");
        let mut reader = verify_archive(archive, ctx)?;

        ctx.stage("Extracting archive");
        let extracted = scratch.join("extracted");
        let mut extractor = ArchiveExtractor::new(reader.as_mut(), &extracted);
        drive(&mut extractor, ctx)?;

        let roots = find_content_roots(&extracted, self.kind)?;
        if roots.is_empty() {
            return Err(LauncherError::NoContentInArchive(archive.to_path_buf()));
        }

        ctx.stage(&format!("Installing {}", self.kind.label()));
        std::fs::create_dir_all(&self.target_dir).at(&self.target_dir)?;
        let mut report = InstallReport::default();
        for root in roots {
            ctx.checkpoint()?;
            let name = if root == extracted {
                fallback_name.to_string()
            } else {
                file_name_lossy(&root)
            };
            let dest = self.target_dir.join(&name);
            if dest.exists() || find_case_insensitive(&self.target_dir, &name).is_some() {
                ctx.warn(LauncherError::DestinationCollision(dest.clone()).to_string());
                report.collisions.push(dest);
                continue;
            }
            move_path(&root, &dest, ctx)?;
            tracing::info!("Installed {} into {:?}", self.kind.label(), dest);
            report.installed.push(dest);
        }
        Ok(report)
    }
}

fn archive_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "content".to_string())
}
