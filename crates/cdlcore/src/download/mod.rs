//! HTTP transfers.
//!
//! [`ContentFetcher`] performs chained GETs, following redirects one hop per
//! step, and streams the final body to disk one buffer per step so a
//! transfer can be cancelled between any two reads. Progress carries bytes
//! read, the `Content-Length` total when the server sent one, and the
//! sampled throughput.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{IoResultExt, LauncherError, Result};
use crate::task::{Progress, Stepper, TaskContext, Throughput, Tick};

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: u32 = 10;

/// Bytes read per step.
const READ_BUFFER: usize = 64 * 1024;

/// Cap for in-memory text responses (listing pages, changelogs).
const MAX_TEXT_SIZE: u64 = 16 * 1024 * 1024;

/// User agent sent with every request.
pub fn user_agent() -> String {
    format!("CDDA-Game-Launcher/{}", env!("CARGO_PKG_VERSION"))
}

/// A finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    pub file_name: String,
    pub bytes: u64,
    /// URL the body was finally served from, after redirects.
    pub final_url: String,
}

#[derive(Debug, Clone)]
pub struct ContentFetcher {
    agent: ureq::Agent,
}

impl Default for ContentFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentFetcher {
    pub fn new() -> Self {
        let agent = ureq::AgentBuilder::new()
            .redirects(0)
            .user_agent(&user_agent())
            .timeout_connect(Duration::from_secs(30))
            .build();
        Self { agent }
    }

    /// GET `url` (following redirects) and return the body as text.
    pub fn get_text(&self, url: &str, ctx: &TaskContext) -> Result<String> {
        let (resp, _) = self.follow(url, ctx)?;
        let mut body = String::new();
        resp.into_reader()
            .take(MAX_TEXT_SIZE)
            .read_to_string(&mut body)
            .map_err(|e| LauncherError::DownloadFailed(format!("{url}: {e}")))?;
        Ok(body)
    }

    /// Stream `url` into `dest_dir`. The file name comes from the final URL,
    /// or from a `Content-Disposition` header when `use_disposition` is set
    /// and the server sent one. A failed or cancelled transfer removes the
    /// partial file.
    pub fn download(
        &self,
        url: &str,
        dest_dir: &Path,
        use_disposition: bool,
        ctx: &TaskContext,
    ) -> Result<Download> {
        let mut task = FetchTask::new(self, url, dest_dir, use_disposition);
        let result = crate::task::drive(&mut task, ctx);
        if result.is_err() {
            task.discard_partial();
        }
        result
    }

    /// Blocking GET with manual redirect handling. Used by `get_text`; the
    /// stepwise path goes through [`FetchTask`].
    fn follow(&self, url: &str, ctx: &TaskContext) -> Result<(ureq::Response, String)> {
        let mut current = url.to_string();
        for _ in 0..=MAX_REDIRECTS {
            ctx.checkpoint()?;
            match self.request(&current)? {
                Hop::Redirect(next) => current = next,
                Hop::Body(resp) => return Ok((resp, current)),
            }
        }
        Err(LauncherError::DownloadFailed(format!(
            "Too many redirects starting at {url}"
        )))
    }

    fn request(&self, url: &str) -> Result<Hop> {
        tracing::debug!("GET {url}");
        let resp = match self.agent.get(url).call() {
            Ok(resp) => resp,
            Err(ureq::Error::Status(code, resp)) => {
                return Err(LauncherError::DownloadFailed(format!(
                    "{url}: HTTP {code} {}",
                    resp.status_text()
                )));
            }
            Err(e) => return Err(LauncherError::DownloadFailed(format!("{url}: {e}"))),
        };
        if (300..400).contains(&resp.status()) {
            let Some(location) = resp.header("Location") else {
                return Err(LauncherError::DownloadFailed(format!(
                    "{url}: redirect without Location"
                )));
            };
            let next = resolve_location(url, location);
            tracing::debug!("Redirect {url} -> {next}");
            return Ok(Hop::Redirect(next));
        }
        Ok(Hop::Body(resp))
    }
}

enum Hop {
    Redirect(String),
    Body(ureq::Response),
}

enum FetchState {
    Requesting { url: String, hops: u32 },
    Transferring(Transfer),
    Done,
}

struct Transfer {
    reader: Box<dyn Read + Send + Sync>,
    file: File,
    done: u64,
    total: u64,
    throughput: Throughput,
}

/// Stepwise download: one request per step while redirected, then one
/// buffer per step.
pub struct FetchTask<'a> {
    fetcher: &'a ContentFetcher,
    dest_dir: PathBuf,
    use_disposition: bool,
    state: FetchState,
    target: Option<PathBuf>,
    file_name: String,
    final_url: String,
}

impl<'a> FetchTask<'a> {
    pub fn new(
        fetcher: &'a ContentFetcher,
        url: &str,
        dest_dir: &Path,
        use_disposition: bool,
    ) -> Self {
        Self {
            fetcher,
            dest_dir: dest_dir.to_path_buf(),
            use_disposition,
            state: FetchState::Requesting {
                url: url.to_string(),
                hops: 0,
            },
            target: None,
            file_name: String::new(),
            final_url: url.to_string(),
        }
    }

    /// Remove whatever was written so far.
    pub fn discard_partial(&mut self) {
        self.state = FetchState::Done;
        if let Some(target) = self.target.take() {
            if let Err(e) = std::fs::remove_file(&target) {
                tracing::debug!("Could not remove partial download {:?}: {e}", target);
            }
        }
    }

    fn start_body(&mut self, resp: ureq::Response, url: String) -> Result<()> {
        let disposition = if self.use_disposition {
            resp.header("Content-Disposition")
                .and_then(filename_from_disposition)
        } else {
            None
        };
        let file_name = disposition.unwrap_or_else(|| filename_from_url(&url));
        let total = resp
            .header("Content-Length")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);

        std::fs::create_dir_all(&self.dest_dir).at(&self.dest_dir)?;
        let target = self.dest_dir.join(&file_name);
        let file = File::create(&target).at(&target)?;
        tracing::info!("Downloading {url} to {:?} ({} bytes expected)", target, total);

        self.target = Some(target);
        self.file_name = file_name;
        self.final_url = url;
        self.state = FetchState::Transferring(Transfer {
            reader: resp.into_reader(),
            file,
            done: 0,
            total,
            throughput: Throughput::new(),
        });
        Ok(())
    }
}

impl Stepper for FetchTask<'_> {
    type Output = Download;

    fn step(&mut self, ctx: &TaskContext) -> Result<Tick<Download>> {
        match &mut self.state {
            FetchState::Requesting { url, hops } => {
                if *hops > MAX_REDIRECTS {
                    return Err(LauncherError::DownloadFailed(format!(
                        "Too many redirects for {}",
                        self.final_url
                    )));
                }
                let url = url.clone();
                match self.fetcher.request(&url)? {
                    Hop::Redirect(next) => {
                        let hops = *hops + 1;
                        self.state = FetchState::Requesting { url: next, hops };
                    }
                    Hop::Body(resp) => self.start_body(resp, url)?,
                }
                Ok(Tick::Pending)
            }
            FetchState::Transferring(transfer) => {
                let mut buf = vec![0u8; READ_BUFFER];
                let n = transfer.reader.read(&mut buf).map_err(|e| {
                    LauncherError::DownloadFailed(format!("{}: {e}", self.final_url))
                })?;
                let target = self.target.clone().unwrap_or_default();
                if n == 0 {
                    transfer.file.flush().at(&target)?;
                    if transfer.total > 0 && transfer.done < transfer.total {
                        return Err(LauncherError::DownloadFailed(format!(
                            "{}: connection closed after {} of {} bytes",
                            self.final_url, transfer.done, transfer.total
                        )));
                    }
                    let download = Download {
                        path: target,
                        file_name: self.file_name.clone(),
                        bytes: transfer.done,
                        final_url: self.final_url.clone(),
                    };
                    self.state = FetchState::Done;
                    return Ok(Tick::Ready(download));
                }
                transfer.file.write_all(&buf[..n]).at(&target)?;
                transfer.done += n as u64;
                let rate = transfer.throughput.tick(transfer.done);
                ctx.progress(
                    Progress::new("Downloading", transfer.done, transfer.total)
                        .with_current(self.file_name.clone())
                        .with_rate(rate),
                );
                Ok(Tick::Pending)
            }
            FetchState::Done => Err(LauncherError::DownloadFailed(
                "Transfer already finished".to_string(),
            )),
        }
    }
}

/// Resolve a `Location` header against the URL that returned it.
pub fn resolve_location(base: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.to_string();
    }
    let scheme_end = base.find("://").map(|i| i + 3).unwrap_or(0);
    let host_end = base[scheme_end..]
        .find('/')
        .map(|i| i + scheme_end)
        .unwrap_or(base.len());
    if let Some(rest) = location.strip_prefix("//") {
        let scheme = &base[..scheme_end];
        return format!("{scheme}{rest}");
    }
    if location.starts_with('/') {
        return format!("{}{}", &base[..host_end], location);
    }
    let path_part = base.split(['?', '#']).next().unwrap_or(base);
    let dir_end = path_part.rfind('/').filter(|&i| i >= host_end).map(|i| i + 1);
    match dir_end {
        Some(end) => format!("{}{}", &path_part[..end], location),
        None => format!("{}/{}", &base[..host_end], location),
    }
}

/// File name from the last path segment of `url`, percent escapes decoded.
pub fn filename_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or("");
    let decoded = percent_decode(last);
    if decoded.is_empty() {
        "download".to_string()
    } else {
        sanitize_file_name(&decoded)
    }
}

/// File name from a `Content-Disposition` header. `filename*` (RFC 5987)
/// wins over `filename`.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;
    for part in header.split(';').map(str::trim) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                let value = value.trim().trim_matches('"');
                let encoded = value.splitn(3, '\'').nth(2).unwrap_or(value);
                extended = Some(percent_decode(encoded));
            }
            "filename" => plain = Some(value.trim().trim_matches('"').to_string()),
            _ => {}
        }
    }
    extended
        .or(plain)
        .map(|n| sanitize_file_name(&n))
        .filter(|n| !n.is_empty())
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    base.chars()
        .map(|c| if c.is_control() || ":*?\"<>|".contains(c) { '_' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(v) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Format a byte count for display (e.g. "1.5 MB", "320 KB").
pub fn format_size(bytes: u64) -> String {
    if bytes >= 1_073_741_824 {
        format!("{:.1} GB", bytes as f64 / 1_073_741_824.0)
    } else if bytes >= 1_048_576 {
        format!("{:.1} MB", bytes as f64 / 1_048_576.0)
    } else if bytes >= 1024 {
        format!("{:.0} KB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}

/// Format a transfer rate for display.
pub fn format_rate(bytes_per_sec: u64) -> String {
    format!("{}/s", format_size(bytes_per_sec))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_location() {
        let base = "http://dev.narc.ro/cataclysm/jenkins-latest/Windows_x64/Tiles/";
        assert_eq!(
            resolve_location(base, "https://cdn.example.org/a.zip"),
            "https://cdn.example.org/a.zip"
        );
        assert_eq!(
            resolve_location(base, "/other/b.zip"),
            "http://dev.narc.ro/other/b.zip"
        );
        assert_eq!(
            resolve_location(base, "c.zip"),
            "http://dev.narc.ro/cataclysm/jenkins-latest/Windows_x64/Tiles/c.zip"
        );
        assert_eq!(
            resolve_location("http://host", "d.zip"),
            "http://host/d.zip"
        );
        assert_eq!(
            resolve_location("https://host/x", "//mirror/e.zip"),
            "https://mirror/e.zip"
        );
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("http://host/builds/cataclysmdda-0.C-10600.zip?x=1"),
            "cataclysmdda-0.C-10600.zip"
        );
        assert_eq!(filename_from_url("http://host/My%20Mod.zip"), "My Mod.zip");
        assert_eq!(filename_from_url("http://host/"), "download");
    }

    #[test]
    fn test_filename_from_disposition() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"Arcana-1.2.zip\""),
            Some("Arcana-1.2.zip".to_string())
        );
        assert_eq!(
            filename_from_disposition(
                "attachment; filename=\"fallback.zip\"; filename*=UTF-8''Mod%20%C3%A9.zip"
            ),
            Some("Mod é.zip".to_string())
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=\"../../evil.zip\""),
            Some("evil.zip".to_string())
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(500), "500 B");
        assert_eq!(format_size(1024), "1 KB");
        assert_eq!(format_size(1_048_576), "1.0 MB");
        assert_eq!(format_size(1_573_741_824), "1.5 GB");
        assert_eq!(format_rate(2048), "2 KB/s");
    }

    #[test]
    fn test_user_agent() {
        assert!(user_agent().starts_with("CDDA-Game-Launcher/"));
    }
}
