//! Remote build catalog.
//!
//! Builds are published as a plain directory-listing page per graphics
//! variant and CPU architecture. Each archive link reads
//! `cataclysmdda-0.C-<build>.zip`; the publication time sits in the text
//! right after the link as `YYYY-MM-DD HH:MM`.

pub mod changelog;

use std::cmp::Ordering;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::download::{resolve_location, ContentFetcher};
use crate::error::Result;
use crate::task::TaskContext;

/// Archive names start with this prefix.
pub const ARCHIVE_PREFIX: &str = "cataclysmdda";

/// Version token between the prefix and the build number.
pub const VERSION_TOKEN: &str = "0.C";

const LISTING_ROOT: &str = "http://dev.narc.ro/cataclysm/jenkins-latest/";

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M";

static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*?href\s*=\s*["']([^"']+)["'][^>]*>(.*?)</a>"#)
        .expect("valid anchor regex")
});

static BUILD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"{}-{}-(?P<build>\d+)",
        regex::escape(ARCHIVE_PREFIX),
        regex::escape(VERSION_TOKEN)
    ))
    .expect("valid build regex")
});

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}").expect("valid date regex"));

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Graphics {
    Tiles,
    Console,
}

impl Graphics {
    pub fn as_str(self) -> &'static str {
        match self {
            Graphics::Tiles => "Tiles",
            Graphics::Console => "Console",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "tiles" => Some(Graphics::Tiles),
            "console" | "curses" => Some(Graphics::Console),
            _ => None,
        }
    }

    fn listing_dir(self) -> &'static str {
        match self {
            Graphics::Tiles => "Tiles",
            Graphics::Console => "Curses",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    X64,
    X86,
}

impl Platform {
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::X64 => "x64",
            Platform::X86 => "x86",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "x64" | "64" | "amd64" => Some(Platform::X64),
            "x86" | "32" | "i686" => Some(Platform::X86),
            _ => None,
        }
    }

    fn listing_dir(self) -> &'static str {
        match self {
            Platform::X64 => "Windows_x64",
            Platform::X86 => "Windows",
        }
    }
}

/// Listing location for one (graphics, platform) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSource {
    pub graphics: Graphics,
    pub platform: Platform,
    pub listing_url: String,
}

impl BuildSource {
    pub fn new(graphics: Graphics, platform: Platform) -> Self {
        Self::with_root(LISTING_ROOT, graphics, platform)
    }

    /// Same layout under a different root (mirrors, tests).
    pub fn with_root(root: &str, graphics: Graphics, platform: Platform) -> Self {
        let root = root.trim_end_matches('/');
        Self {
            graphics,
            platform,
            listing_url: format!(
                "{root}/{}/{}/",
                platform.listing_dir(),
                graphics.listing_dir()
            ),
        }
    }
}

/// One downloadable build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Build {
    pub number: Option<i64>,
    pub name: String,
    pub download_url: String,
    pub published_at: Option<DateTime<Utc>>,
}

impl Build {
    /// Catalog order: number descending, then date descending. Unknown
    /// numbers and dates sort last.
    pub fn catalog_cmp(&self, other: &Self) -> Ordering {
        desc_known_first(self.number, other.number)
            .then_with(|| desc_known_first(self.published_at, other.published_at))
    }
}

fn desc_known_first<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Stable sort into catalog order.
pub fn sort_builds(builds: &mut [Build]) {
    builds.sort_by(Build::catalog_cmp);
}

/// Extract builds from a listing page. `base_url` resolves relative links.
pub fn parse_listing(html: &str, base_url: &str) -> Vec<Build> {
    let anchors: Vec<_> = ANCHOR_RE.captures_iter(html).collect();
    let mut builds = Vec::new();

    for (i, caps) in anchors.iter().enumerate() {
        let (Some(whole), Some(href), Some(text)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let name = TAG_RE.replace_all(text.as_str(), "").trim().to_string();
        if !name.starts_with(ARCHIVE_PREFIX) {
            continue;
        }

        // The date lives in the text between this link and the next one.
        let tail_end = anchors
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map(|m| m.start())
            .unwrap_or(html.len());
        let tail = &html[whole.end()..tail_end];
        let published_at = DATE_RE
            .find(&TAG_RE.replace_all(tail, " "))
            .and_then(|m| NaiveDateTime::parse_from_str(m.as_str(), DATE_FORMAT).ok())
            .map(|naive| naive.and_utc());

        let number = BUILD_RE
            .captures(&name)
            .and_then(|c| c.name("build"))
            .and_then(|m| m.as_str().parse::<i64>().ok());

        builds.push(Build {
            number,
            name,
            download_url: resolve_location(base_url, href.as_str().trim()),
            published_at,
        });
    }

    sort_builds(&mut builds);
    builds
}

/// Fetch and parse the listing for `source`.
pub fn fetch_builds(
    fetcher: &ContentFetcher,
    source: &BuildSource,
    ctx: &TaskContext,
) -> Result<Vec<Build>> {
    ctx.stage("Fetching build list");
    let html = fetcher.get_text(&source.listing_url, ctx)?;
    let builds = parse_listing(&html, &source.listing_url);
    tracing::info!("Found {} builds at {}", builds.len(), source.listing_url);
    Ok(builds)
}
