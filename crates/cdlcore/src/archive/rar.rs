//! RAR reading through the native unrar library (`rar` feature).

use std::path::Path;

use super::ArchiveReader;
use crate::error::Result;

#[cfg(not(feature = "rar"))]
pub fn open(path: &Path) -> Result<Box<dyn ArchiveReader>> {
    Err(super::invalid(
        path,
        "RAR support is not enabled in this build",
    ))
}

#[cfg(feature = "rar")]
pub fn open(path: &Path) -> Result<Box<dyn ArchiveReader>> {
    Ok(Box::new(imp::RarReader::open(path)?))
}

#[cfg(feature = "rar")]
mod imp {
    use std::path::{Path, PathBuf};

    use crate::archive::staging::Staging;
    use crate::archive::{incomplete, invalid, ArchiveEntry, ArchiveFormat, ArchiveReader};
    use crate::error::Result;

    pub struct RarReader {
        path: PathBuf,
        entries: Vec<ArchiveEntry>,
        tested: bool,
        staging: Staging,
    }

    impl RarReader {
        pub fn open(path: &Path) -> Result<Self> {
            let listing = unrar::Archive::new(path)
                .open_for_listing()
                .map_err(|e| incomplete(path, e))?;
            let mut entries = Vec::new();
            for header in listing {
                let header = header.map_err(|e| incomplete(path, e))?;
                entries.push(ArchiveEntry {
                    name: header.filename.to_string_lossy().replace('\\', "/"),
                    is_dir: header.is_directory(),
                    size: header.unpacked_size,
                    compressed_size: 0,
                });
            }
            Ok(Self {
                path: path.to_path_buf(),
                entries,
                tested: false,
                staging: Staging::default(),
            })
        }

        /// Test every file in one pass; unrar has no random access.
        fn test_all(&self) -> Result<()> {
            let mut archive = unrar::Archive::new(&self.path)
                .open_for_processing()
                .map_err(|e| invalid(&self.path, e))?;
            while let Some(header) = archive.read_header().map_err(|e| invalid(&self.path, e))? {
                archive = if header.entry().is_file() {
                    header.test().map_err(|e| invalid(&self.path, e))?
                } else {
                    header.skip().map_err(|e| invalid(&self.path, e))?
                };
            }
            Ok(())
        }

        fn unpack_all(path: &Path, dest: &Path) -> Result<()> {
            let mut archive = unrar::Archive::new(path)
                .open_for_processing()
                .map_err(|e| invalid(path, e))?;
            while let Some(header) = archive.read_header().map_err(|e| invalid(path, e))? {
                archive = if header.entry().is_file() {
                    header.extract_with_base(dest).map_err(|e| invalid(path, e))?
                } else {
                    header.skip().map_err(|e| invalid(path, e))?
                };
            }
            Ok(())
        }
    }

    impl ArchiveReader for RarReader {
        fn format(&self) -> ArchiveFormat {
            ArchiveFormat::Rar
        }

        fn path(&self) -> &Path {
            &self.path
        }

        fn entries(&self) -> &[ArchiveEntry] {
            &self.entries
        }

        fn test_entry(&mut self, _index: usize) -> Result<()> {
            if !self.tested {
                self.test_all()?;
                self.tested = true;
            }
            Ok(())
        }

        fn extract_entry(&mut self, index: usize, dest_root: &Path) -> Result<Option<PathBuf>> {
            let path = self.path.clone();
            let staged = self.staging.ensure(|dir| Self::unpack_all(&path, dir))?;
            let Some(entry) = self.entries.get(index) else {
                return Ok(None);
            };
            Staging::place(&staged, &entry.name, entry.is_dir, dest_root)
        }
    }
}

#[cfg(all(test, not(feature = "rar")))]
mod tests {
    use super::*;
    use crate::error::LauncherError;

    #[test]
    fn test_rar_without_feature_is_invalid() {
        let err = open(Path::new("/tmp/pack.rar")).err().unwrap();
        assert!(matches!(err, LauncherError::InvalidArchive { .. }));
        assert!(err.to_string().contains("RAR support"));
    }
}
