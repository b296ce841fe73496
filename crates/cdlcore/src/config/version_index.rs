//! Executable digest index.
//!
//! Maps the SHA-256 of a game executable to the version string found inside
//! it and to the build it came from, so an install can be identified later
//! without re-downloading anything.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub number: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct IndexData {
    #[serde(default)]
    versions: BTreeMap<String, String>,
    #[serde(default)]
    builds: BTreeMap<String, BuildInfo>,
}

#[derive(Debug, Clone, Default)]
pub struct VersionIndex {
    data: IndexData,
    path: Option<PathBuf>,
}

impl VersionIndex {
    /// Index that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("cddagl")
            .join("versions.json")
    }

    /// Load from `path`. A missing file is an empty index.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read version index {:?}", path))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse version index {:?}", path))?
        } else {
            IndexData::default()
        };
        Ok(Self {
            data,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.data)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write version index {:?}", path))
    }

    pub fn version_for(&self, digest: &str) -> Option<&str> {
        self.data.versions.get(digest).map(String::as_str)
    }

    pub fn build_for(&self, digest: &str) -> Option<&BuildInfo> {
        self.data.builds.get(digest)
    }

    pub fn record_version(&mut self, digest: &str, version: &str) {
        self.data
            .versions
            .insert(digest.to_string(), version.to_string());
    }

    pub fn record_build(&mut self, digest: &str, number: i64, published_at: Option<DateTime<Utc>>) {
        self.data.builds.insert(
            digest.to_string(),
            BuildInfo {
                number,
                published_at,
            },
        );
    }
}
