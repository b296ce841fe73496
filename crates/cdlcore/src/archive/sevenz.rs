//! 7z reading. There is no per-entry integrity test: an archive that opens
//! and parses is accepted, and data errors surface during extraction.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sevenz_rust2::Password;

use super::staging::Staging;
use super::{incomplete, invalid, ArchiveEntry, ArchiveFormat, ArchiveReader};
use crate::error::{IoResultExt, LauncherError, Result};
use crate::paths::safe_join;

pub struct SevenZipReader {
    path: PathBuf,
    entries: Vec<ArchiveEntry>,
    staging: Staging,
}

impl SevenZipReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).at(path)?;
        let reader = sevenz_rust2::SevenZReader::new(file, Password::empty())
            .map_err(|e| incomplete(path, e))?;
        let entries = reader
            .archive()
            .files
            .iter()
            .map(|e| ArchiveEntry {
                name: e.name.replace('\\', "/"),
                is_dir: e.is_directory,
                size: e.size,
                compressed_size: 0,
            })
            .collect();
        Ok(Self {
            path: path.to_path_buf(),
            entries,
            staging: Staging::default(),
        })
    }

    fn unpack_all(path: &Path, dest: &Path) -> Result<()> {
        let file = File::open(path).at(path)?;
        let mut write_error: Option<LauncherError> = None;

        let mut extract_fn = |entry: &sevenz_rust2::SevenZArchiveEntry,
                              reader: &mut dyn Read,
                              _dest_path: &PathBuf|
         -> std::result::Result<bool, sevenz_rust2::Error> {
            let written = match safe_join(dest, &entry.name) {
                None => io::copy(reader, &mut io::sink())
                    .map(|_| ())
                    .map_err(|e| invalid(Path::new(&entry.name), e)),
                Some(target) if entry.is_directory => fs::create_dir_all(&target).at(&target),
                Some(target) => write_entry(reader, &target),
            };
            match written {
                Ok(()) => Ok(true),
                Err(e) => {
                    write_error = Some(e);
                    Ok(false)
                }
            }
        };

        let result = sevenz_rust2::decompress_with_extract_fn(file, dest, &mut extract_fn);
        if let Some(e) = write_error {
            return Err(e);
        }
        result.map_err(|e| invalid(path, e))
    }
}

fn write_entry(reader: &mut dyn Read, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    let mut out = File::create(target).at(target)?;
    io::copy(reader, &mut out).at(target)?;
    Ok(())
}

impl ArchiveReader for SevenZipReader {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::SevenZ
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    fn test_entry(&mut self, _index: usize) -> Result<()> {
        Ok(())
    }

    fn extract_entry(&mut self, index: usize, dest_root: &Path) -> Result<Option<PathBuf>> {
        let path = self.path.clone();
        let staged = self
            .staging
            .ensure(|dir| Self::unpack_all(&path, dir))?;
        let Some(entry) = self.entries.get(index) else {
            return Ok(None);
        };
        Staging::place(&staged, &entry.name, entry.is_dir, dest_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_7z_is_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("pack.7z");
        fs::write(&path, [b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C, 0, 4, 1, 2]).unwrap();
        assert!(matches!(
            SevenZipReader::open(&path),
            Err(LauncherError::IncompleteDownload { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_fs_error() {
        assert!(matches!(
            SevenZipReader::open(Path::new("/nonexistent/pack.7z")),
            Err(LauncherError::FileSystemError { .. })
        ));
    }
}
