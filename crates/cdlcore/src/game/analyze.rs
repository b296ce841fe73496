//! Executable analysis: SHA-256 digest plus the embedded version marker,
//! computed in a single streaming pass one buffer per step.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::bytes::Regex;
use sha2::{Digest, Sha256};

use crate::error::{IoResultExt, Result};
use crate::task::{Progress, Stepper, TaskContext, Tick};

const READ_BUFFER: usize = 1024 * 1024;

/// Bytes carried over between reads so a marker split across two buffers
/// is still found.
const MARKER_OVERLAP: usize = 64;

/// Version strings are NUL-terminated in the binary, e.g. `0.E-1234-gabc123\0`.
static VERSION_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)(?P<version>[01]\.[A-F](?:-\d+-g[0-9a-f]+)?)\x00")
        .expect("valid version marker regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableReport {
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the whole file.
    pub digest: String,
    pub version: Option<String>,
    pub size: u64,
}

pub struct ExecutableAnalyzer {
    path: PathBuf,
    file: Option<File>,
    hasher: Sha256,
    tail: Vec<u8>,
    buf: Vec<u8>,
    version: Option<String>,
    done: u64,
    total: u64,
}

impl ExecutableAnalyzer {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: None,
            hasher: Sha256::new(),
            tail: Vec::new(),
            buf: vec![0u8; READ_BUFFER],
            version: None,
            done: 0,
            total: 0,
        }
    }

    fn scan_for_marker(&mut self, chunk: &[u8]) {
        if self.version.is_some() {
            return;
        }
        let mut window = std::mem::take(&mut self.tail);
        window.extend_from_slice(chunk);
        if let Some(caps) = VERSION_MARKER_RE.captures(&window) {
            self.version = caps
                .name("version")
                .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned());
            return;
        }
        let keep = window.len().min(MARKER_OVERLAP);
        self.tail = window.split_off(window.len() - keep);
    }
}

impl Stepper for ExecutableAnalyzer {
    type Output = ExecutableReport;

    fn step(&mut self, ctx: &TaskContext) -> Result<Tick<ExecutableReport>> {
        if self.file.is_none() {
            let file = File::open(&self.path).at(&self.path)?;
            self.total = file.metadata().at(&self.path)?.len();
            self.file = Some(file);
            return Ok(Tick::Pending);
        }

        let n = match self.file.as_mut() {
            Some(file) => file.read(&mut self.buf).at(&self.path)?,
            None => 0,
        };
        if n == 0 {
            let digest = hex::encode(std::mem::take(&mut self.hasher).finalize());
            return Ok(Tick::Ready(ExecutableReport {
                path: self.path.clone(),
                digest,
                version: self.version.take(),
                size: self.done,
            }));
        }

        let buf = std::mem::take(&mut self.buf);
        self.hasher.update(&buf[..n]);
        self.scan_for_marker(&buf[..n]);
        self.buf = buf;
        self.done += n as u64;
        ctx.progress(
            Progress::new("Analyzing executable", self.done, self.total)
                .with_current(self.path.to_string_lossy()),
        );
        Ok(Tick::Pending)
    }
}

/// Hash `path` and look for its version marker.
pub fn analyze_executable(path: &Path, ctx: &TaskContext) -> Result<ExecutableReport> {
    let mut analyzer = ExecutableAnalyzer::new(path);
    crate::task::drive(&mut analyzer, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_and_version() {
        let tmp = tempfile::tempdir().unwrap();
        let exe = tmp.path().join("cataclysm-tiles");
        let mut data = vec![0x7Fu8, b'E', b'L', b'F'];
        data.extend_from_slice(b"junk 9.Z\0 more junk ");
        data.extend_from_slice(b"0.E-2345-g1a2b3c4\0");
        data.extend_from_slice(&[0u8; 100]);
        std::fs::write(&exe, &data).unwrap();

        let report = analyze_executable(&exe, &TaskContext::silent()).unwrap();
        assert_eq!(report.version.as_deref(), Some("0.E-2345-g1a2b3c4"));
        assert_eq!(report.size, data.len() as u64);
        assert_eq!(report.digest, hex::encode(Sha256::digest(&data)));
    }

    #[test]
    fn test_multi_buffer_file_reuses_buffer() {
        let tmp = tempfile::tempdir().unwrap();
        let exe = tmp.path().join("cataclysm-tiles");
        let mut data: Vec<u8> = (0..READ_BUFFER * 2 + 1000).map(|i| (i % 251) as u8).collect();
        let marker = b"0.F-10600-gabc1234\0";
        let marker_at = READ_BUFFER - 5;
        data[marker_at..marker_at + marker.len()].copy_from_slice(marker);
        std::fs::write(&exe, &data).unwrap();

        let ctx = TaskContext::silent();
        let mut analyzer = ExecutableAnalyzer::new(&exe);
        let report = loop {
            match analyzer.step(&ctx).unwrap() {
                Tick::Pending => assert_eq!(analyzer.buf.len(), READ_BUFFER),
                Tick::Ready(report) => break report,
            }
        };
        assert_eq!(report.size, data.len() as u64);
        assert_eq!(report.digest, hex::encode(Sha256::digest(&data)));
        assert_eq!(report.version.as_deref(), Some("0.F-10600-gabc1234"));
    }

    #[test]
    fn test_marker_split_across_reads() {
        let mut analyzer = ExecutableAnalyzer::new(Path::new("unused"));
        analyzer.scan_for_marker(b"xxxxxxxxxxxx0.D-1");
        assert_eq!(analyzer.version, None);
        analyzer.scan_for_marker(b"0-gdeadbee\0rest");
        assert_eq!(analyzer.version.as_deref(), Some("0.D-10-gdeadbee"));
    }

    #[test]
    fn test_plain_release_version() {
        let mut analyzer = ExecutableAnalyzer::new(Path::new("unused"));
        analyzer.scan_for_marker(b"\x010.F\0");
        assert_eq!(analyzer.version.as_deref(), Some("0.F"));
    }

    #[test]
    fn test_no_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let exe = tmp.path().join("cataclysm");
        std::fs::write(&exe, b"no version here").unwrap();
        let report = analyze_executable(&exe, &TaskContext::silent()).unwrap();
        assert_eq!(report.version, None);
        assert_eq!(report.digest.len(), 64);
    }
}
