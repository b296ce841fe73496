//! Zip reading and writing.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ::zip::result::ZipError;
use ::zip::write::SimpleFileOptions;
use ::zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{incomplete, invalid, ArchiveEntry, ArchiveFormat, ArchiveReader};
use crate::error::{IoResultExt, LauncherError, Result};
use crate::paths::safe_join;

pub struct ZipReader {
    path: PathBuf,
    archive: ZipArchive<File>,
    entries: Vec<ArchiveEntry>,
}

impl ZipReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).at(path)?;
        let mut archive = ZipArchive::new(file).map_err(|e| incomplete(path, e))?;
        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i).map_err(|e| incomplete(path, e))?;
            entries.push(ArchiveEntry {
                name: entry.name().replace('\\', "/"),
                is_dir: entry.is_dir(),
                size: entry.size(),
                compressed_size: entry.compressed_size(),
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
            archive,
            entries,
        })
    }
}

impl ArchiveReader for ZipReader {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn test_entry(&mut self, index: usize) -> Result<()> {
        let mut file = self
            .archive
            .by_index(index)
            .map_err(|e| invalid(&self.path, e))?;
        if file.is_dir() {
            return Ok(());
        }
        let name = file.name().to_string();
        // The CRC is checked when the reader hits end of data.
        io::copy(&mut file, &mut io::sink())
            .map_err(|e| invalid(&self.path, format!("{name}: {e}")))?;
        Ok(())
    }

    fn extract_entry(&mut self, index: usize, dest_root: &Path) -> Result<Option<PathBuf>> {
        let mut file = self
            .archive
            .by_index(index)
            .map_err(|e| invalid(&self.path, e))?;
        let name = file.name().to_string();
        let Some(target) = safe_join(dest_root, &name) else {
            return Ok(None);
        };

        if file.is_dir() {
            fs::create_dir_all(&target).at(&target)?;
            return Ok(Some(target));
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        let mut out = File::create(&target).at(&target)?;
        copy_entry(&mut file, &mut out, &self.path, &name, &target)?;
        Ok(Some(target))
    }
}

/// Copy archive data to `out`, telling read failures (corrupt archive)
/// apart from write failures (destination trouble).
fn copy_entry(
    src: &mut impl io::Read,
    out: &mut File,
    archive: &Path,
    name: &str,
    target: &Path,
) -> Result<u64> {
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(invalid(archive, format!("{name}: {e}"))),
        };
        out.write_all(&buf[..n]).at(target)?;
        total += n as u64;
    }
    out.flush().at(target)?;
    Ok(total)
}

/// Deflate-compressed zip writer fed one chunk at a time.
pub struct ZipArchiveWriter {
    path: PathBuf,
    inner: ZipWriter<File>,
    options: SimpleFileOptions,
}

impl ZipArchiveWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        let file = File::create(path).at(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            inner: ZipWriter::new(file),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        })
    }

    /// Create only if nothing exists at `path` yet.
    pub fn create_new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }
        let file = match File::options().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LauncherError::DestinationCollision(path.to_path_buf()))
            }
            Err(e) => return Err(LauncherError::from_io(path, e)),
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner: ZipWriter::new(file),
            options: SimpleFileOptions::default().compression_method(CompressionMethod::Deflated),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Begin a new member. Following `write_chunk` calls fill it.
    pub fn start_file(&mut self, name: &str) -> Result<()> {
        self.inner
            .start_file(name.to_string(), self.options)
            .map_err(|e| self.write_error(e))
    }

    pub fn add_directory(&mut self, name: &str) -> Result<()> {
        self.inner
            .add_directory(name.to_string(), self.options)
            .map_err(|e| self.write_error(e))
    }

    pub fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        self.inner.write_all(data).at(&self.path)
    }

    /// Write the central directory and close the file.
    pub fn finish(self) -> Result<()> {
        let path = self.path;
        self.inner
            .finish()
            .map_err(|e| zip_write_error(&path, e))?;
        Ok(())
    }

    fn write_error(&self, err: ZipError) -> LauncherError {
        zip_write_error(&self.path, err)
    }
}

fn zip_write_error(path: &Path, err: ZipError) -> LauncherError {
    match err {
        ZipError::Io(e) => LauncherError::from_io(path, e),
        other => LauncherError::FileSystemError {
            path: path.to_path_buf(),
            source: io::Error::other(other.to_string()),
        },
    }
}
