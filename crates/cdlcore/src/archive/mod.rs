//! Uniform access to zip, 7z and rar archives.
//!
//! Readers expose the entry list up front and then test or extract one entry
//! per call, so [`ArchiveTester`] and [`ArchiveExtractor`] can drive them as
//! cancellable steppers. Only zip can be written ([`zip::ZipArchiveWriter`]).
//!
//! Failure classes:
//! - the container cannot be opened or parsed at all: `IncompleteDownload`
//! - an entry fails its integrity check: `InvalidArchive`
//! - writing the extracted file fails: `FileSystemBusy` / `FileSystemError`

pub mod rar;
pub mod sevenz;
mod staging;
pub mod zip;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{LauncherError, Result};
use crate::task::{Progress, Stepper, TaskContext, Throughput, Tick};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    SevenZ,
    Rar,
}

impl ArchiveFormat {
    /// Detect by magic bytes, falling back to the file extension.
    pub fn detect(path: &Path) -> Option<Self> {
        let mut magic = [0u8; 6];
        let read = File::open(path)
            .and_then(|mut f| f.read(&mut magic))
            .unwrap_or(0);
        let magic = &magic[..read];
        if magic.starts_with(b"PK\x03\x04") || magic.starts_with(b"PK\x05\x06") {
            return Some(ArchiveFormat::Zip);
        }
        if magic.starts_with(&[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C]) {
            return Some(ArchiveFormat::SevenZ);
        }
        if magic.starts_with(b"Rar!") {
            return Some(ArchiveFormat::Rar);
        }
        Self::from_extension(path)
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())?;
        match ext.as_str() {
            "zip" => Some(ArchiveFormat::Zip),
            "7z" => Some(ArchiveFormat::SevenZ),
            "rar" => Some(ArchiveFormat::Rar),
            _ => None,
        }
    }
}

/// One archive member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Member path with forward slashes, as stored.
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Compressed size where the format records one per entry, else 0.
    pub compressed_size: u64,
}

pub trait ArchiveReader {
    fn format(&self) -> ArchiveFormat;

    fn path(&self) -> &Path;

    fn entries(&self) -> &[ArchiveEntry];

    /// Verify one entry's data. Formats without per-entry checks verify
    /// what they can on the first call and accept the rest.
    fn test_entry(&mut self, index: usize) -> Result<()>;

    /// Extract one entry below `dest_root`, keeping its relative path.
    /// Returns the written path, or `None` when the entry name was unsafe and
    /// skipped.
    fn extract_entry(&mut self, index: usize, dest_root: &Path) -> Result<Option<PathBuf>>;

    fn total_size(&self) -> u64 {
        self.entries().iter().map(|e| e.size).sum()
    }

    fn total_compressed_size(&self) -> u64 {
        self.entries().iter().map(|e| e.compressed_size).sum()
    }
}

/// Open `path` with the reader matching its format.
pub fn open_archive(path: &Path) -> Result<Box<dyn ArchiveReader>> {
    match ArchiveFormat::detect(path) {
        Some(ArchiveFormat::Zip) => Ok(Box::new(zip::ZipReader::open(path)?)),
        Some(ArchiveFormat::SevenZ) => Ok(Box::new(sevenz::SevenZipReader::open(path)?)),
        Some(ArchiveFormat::Rar) => rar::open(path),
        None => Err(LauncherError::IncompleteDownload {
            path: path.to_path_buf(),
            reason: "not a zip, 7z or rar archive".to_string(),
        }),
    }
}

pub(crate) fn incomplete(path: &Path, reason: impl std::fmt::Display) -> LauncherError {
    LauncherError::IncompleteDownload {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

pub(crate) fn invalid(path: &Path, reason: impl std::fmt::Display) -> LauncherError {
    LauncherError::InvalidArchive {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Tests every entry, one per step.
pub struct ArchiveTester<'a> {
    reader: &'a mut dyn ArchiveReader,
    index: usize,
}

impl<'a> ArchiveTester<'a> {
    pub fn new(reader: &'a mut dyn ArchiveReader) -> Self {
        Self { reader, index: 0 }
    }
}

impl Stepper for ArchiveTester<'_> {
    type Output = ();

    fn step(&mut self, ctx: &TaskContext) -> Result<Tick<()>> {
        let total = self.reader.entries().len();
        if self.index >= total {
            return Ok(Tick::Ready(()));
        }
        let name = self.reader.entries()[self.index].name.clone();
        self.reader.test_entry(self.index)?;
        self.index += 1;
        ctx.progress(
            Progress::new("Verifying", self.index as u64, total as u64).with_current(name),
        );
        Ok(Tick::Pending)
    }
}

/// Open and fully test `path`. Returns the opened reader for extraction.
pub fn verify_archive(path: &Path, ctx: &TaskContext) -> Result<Box<dyn ArchiveReader>> {
    let mut reader = open_archive(path)?;
    let mut tester = ArchiveTester::new(reader.as_mut());
    crate::task::drive(&mut tester, ctx)?;
    tracing::info!(
        "Verified {:?}: {} entries, {} bytes",
        path,
        reader.entries().len(),
        reader.total_size()
    );
    Ok(reader)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: u64,
    pub dirs: u64,
    pub bytes: u64,
    pub skipped: u64,
}

/// Extracts entries one per step into a destination directory.
///
/// On a failed step the index is not advanced, so driving again retries the
/// same entry.
pub struct ArchiveExtractor<'a> {
    reader: &'a mut dyn ArchiveReader,
    dest_root: PathBuf,
    stage: String,
    index: usize,
    done_bytes: u64,
    total_bytes: u64,
    filter: Option<Box<dyn Fn(&ArchiveEntry) -> bool + 'a>>,
    summary: ExtractSummary,
    throughput: Throughput,
}

impl<'a> ArchiveExtractor<'a> {
    pub fn new(reader: &'a mut dyn ArchiveReader, dest_root: &Path) -> Self {
        let total_bytes = reader.total_size();
        Self {
            reader,
            dest_root: dest_root.to_path_buf(),
            stage: "Extracting".to_string(),
            index: 0,
            done_bytes: 0,
            total_bytes,
            filter: None,
            summary: ExtractSummary::default(),
            throughput: Throughput::new(),
        }
    }

    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = stage.into();
        self
    }

    /// Only extract entries accepted by `keep`.
    pub fn with_filter(mut self, keep: impl Fn(&ArchiveEntry) -> bool + 'a) -> Self {
        let total: u64 = self
            .reader
            .entries()
            .iter()
            .filter(|&e| keep(e))
            .map(|e| e.size)
            .sum();
        self.total_bytes = total;
        self.filter = Some(Box::new(keep));
        self
    }

    /// Index of the next entry to extract.
    pub fn position(&self) -> usize {
        self.index
    }
}

impl Stepper for ArchiveExtractor<'_> {
    type Output = ExtractSummary;

    fn step(&mut self, ctx: &TaskContext) -> Result<Tick<ExtractSummary>> {
        let Some(entry) = self.reader.entries().get(self.index).cloned() else {
            return Ok(Tick::Ready(std::mem::take(&mut self.summary)));
        };
        if let Some(keep) = &self.filter {
            if !keep(&entry) {
                self.index += 1;
                return Ok(Tick::Pending);
            }
        }

        match self.reader.extract_entry(self.index, &self.dest_root)? {
            Some(_) if entry.is_dir => self.summary.dirs += 1,
            Some(_) => {
                self.summary.files += 1;
                self.summary.bytes += entry.size;
            }
            None => {
                tracing::warn!("Skipped unsafe archive entry {:?}", entry.name);
                self.summary.skipped += 1;
            }
        }
        self.index += 1;
        self.done_bytes += entry.size;
        let rate = self.throughput.tick(self.done_bytes);
        ctx.progress(
            Progress::new(self.stage.clone(), self.done_bytes, self.total_bytes)
                .with_current(entry.name)
                .with_rate(rate),
        );
        Ok(Tick::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_zip(path: &Path, files: &[(&str, &[u8])]) {
        let mut writer = super::zip::ZipArchiveWriter::create(path).unwrap();
        for (name, data) in files {
            writer.start_file(name).unwrap();
            writer.write_chunk(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_detect_by_magic_and_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let zip_path = tmp.path().join("no_extension");
        make_zip(&zip_path, &[("a.txt", b"a")]);
        assert_eq!(ArchiveFormat::detect(&zip_path), Some(ArchiveFormat::Zip));

        let seven = tmp.path().join("x.bin");
        std::fs::File::create(&seven)
            .unwrap()
            .write_all(&[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C, 0, 4])
            .unwrap();
        assert_eq!(ArchiveFormat::detect(&seven), Some(ArchiveFormat::SevenZ));

        assert_eq!(
            ArchiveFormat::detect(&tmp.path().join("missing.rar")),
            Some(ArchiveFormat::Rar)
        );
        assert_eq!(ArchiveFormat::detect(&tmp.path().join("missing.txt")), None);
    }

    #[test]
    fn test_extract_with_progress() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("build.zip");
        make_zip(
            &archive,
            &[
                ("cataclysm-tiles", b"binary"),
                ("data/json/items.json", b"[]"),
                ("gfx/Default/tileset.txt", b"NAME: default"),
            ],
        );

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let ctx = TaskContext::new(
            |_| {},
            move |p| sink.lock().unwrap().push(p),
            crate::task::CancelFlag::new(),
        );

        let mut reader = verify_archive(&archive, &ctx).unwrap();
        let dest = tmp.path().join("install");
        let mut extractor = ArchiveExtractor::new(reader.as_mut(), &dest);
        let summary = crate::task::drive(&mut extractor, &ctx).unwrap();
        assert_eq!(summary.files, 3);
        assert_eq!(summary.bytes, 6 + 2 + 13);
        assert_eq!(
            std::fs::read_to_string(dest.join("gfx/Default/tileset.txt")).unwrap(),
            "NAME: default"
        );

        let seen = seen.lock().unwrap();
        let last = seen.iter().rev().find(|p| p.stage == "Extracting").unwrap();
        assert_eq!(last.done, last.total);
    }

    #[test]
    fn test_extract_with_filter() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = tmp.path().join("backup.zip");
        make_zip(&archive, &[("save/w/a.sav", b"1"), ("other/b.txt", b"2")]);

        let mut reader = open_archive(&archive).unwrap();
        let dest = tmp.path().join("game");
        let mut extractor = ArchiveExtractor::new(reader.as_mut(), &dest)
            .with_filter(|e| e.name.starts_with("save/"));
        let summary = crate::task::drive(&mut extractor, &TaskContext::silent()).unwrap();
        assert_eq!(summary.files, 1);
        assert!(dest.join("save/w/a.sav").exists());
        assert!(!dest.join("other").exists());
    }

    #[test]
    fn test_garbage_is_incomplete_download() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cataclysmdda-0.C-10600.zip");
        std::fs::write(&path, b"<html>502 Bad Gateway</html>").unwrap();
        assert!(matches!(
            open_archive(&path),
            Err(LauncherError::IncompleteDownload { .. })
        ));

        let path = tmp.path().join("unknown.bin");
        std::fs::write(&path, b"nothing").unwrap();
        assert!(matches!(
            open_archive(&path),
            Err(LauncherError::IncompleteDownload { .. })
        ));
    }
}
