//! Repository of installable soundpacks and mods.
//!
//! The repository is a JSON array of entries. Each entry is fetched either
//! directly (`direct_download`) or through the operator's browser
//! (`browser_download`, for hosts that need a human to click through).

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::descriptor::Idents;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadMethod {
    DirectDownload,
    BrowserDownload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryEntry {
    #[serde(rename = "type")]
    pub method: DownloadMethod,
    pub url: String,
    /// Soundpack `NAME`, or mod display name.
    pub name: String,
    #[serde(default, alias = "viewname")]
    pub view_name: Option<String>,
    /// Mod identities. Soundpacks use `name` instead.
    #[serde(default)]
    pub ident: Option<Idents>,
    /// File name a browser download is expected to produce.
    #[serde(default)]
    pub expected_filename: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl RepositoryEntry {
    /// Identities the installed content will carry.
    pub fn identities(&self) -> Vec<String> {
        match &self.ident {
            Some(ident) => ident.to_vec(),
            None => vec![self.name.clone()],
        }
    }

    pub fn display_name(&self) -> &str {
        self.view_name.as_deref().unwrap_or(&self.name)
    }
}

pub fn parse_repository(json: &str) -> anyhow::Result<Vec<RepositoryEntry>> {
    serde_json::from_str(json).context("Failed to parse content repository")
}

pub fn load_repository(path: &Path) -> anyhow::Result<Vec<RepositoryEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read content repository {:?}", path))?;
    parse_repository(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {
            "type": "direct_download",
            "viewname": "CO.AG SoundPack",
            "name": "CO.AG",
            "url": "https://example.invalid/coag.zip",
            "size": 123456
        },
        {
            "type": "browser_download",
            "name": "Arcana",
            "ident": ["arcana", "arcana_extras"],
            "url": "https://example.invalid/arcana",
            "expected_filename": "Arcana-master.zip",
            "authors": ["Chaosvolt"]
        }
    ]"#;

    #[test]
    fn test_parse_repository() {
        let entries = parse_repository(SAMPLE).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].method, DownloadMethod::DirectDownload);
        assert_eq!(entries[0].display_name(), "CO.AG SoundPack");
        assert_eq!(entries[0].identities(), vec!["CO.AG"]);
        assert_eq!(entries[0].size, Some(123456));

        assert_eq!(entries[1].method, DownloadMethod::BrowserDownload);
        assert_eq!(entries[1].identities(), vec!["arcana", "arcana_extras"]);
        assert_eq!(entries[1].expected_filename.as_deref(), Some("Arcana-master.zip"));
    }

    #[test]
    fn test_load_repository_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("soundpacks.json");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(load_repository(&path).unwrap().len(), 2);
        assert!(load_repository(&tmp.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_unknown_method_rejected() {
        let json = r#"[{"type": "torrent", "name": "x", "url": "magnet:"}]"#;
        assert!(parse_repository(json).is_err());
    }
}
