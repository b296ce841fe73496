//! Content descriptor files.
//!
//! Soundpacks and tilesets carry a line-oriented `KEY value` text file
//! (`soundpack.txt`, `tileset.txt`) where `NAME` is the identity and `VIEW`
//! the display name. Mods carry `modinfo.json`: a single object or an array
//! of objects, of which the one with `"type": "MOD_INFO"` describes the mod.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{LauncherError, Result};
use crate::paths::DISABLED_SUFFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Soundpack,
    Tileset,
    Mod,
    Font,
}

impl ContentKind {
    /// Marker file that makes a directory a content unit. Fonts are plain
    /// files and have none.
    pub fn descriptor_name(self) -> Option<&'static str> {
        match self {
            ContentKind::Soundpack => Some("soundpack.txt"),
            ContentKind::Tileset => Some("tileset.txt"),
            ContentKind::Mod => Some("modinfo.json"),
            ContentKind::Font => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ContentKind::Soundpack => "soundpack",
            ContentKind::Tileset => "tileset",
            ContentKind::Mod => "mod",
            ContentKind::Font => "font",
        }
    }
}

/// One identity or several, as found in `ident` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Idents {
    One(String),
    Many(Vec<String>),
}

impl Idents {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Idents::One(one) => vec![one.clone()],
            Idents::Many(many) => many.clone(),
        }
    }
}

/// Parsed descriptor of one content unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    pub identities: Vec<String>,
    pub display_name: String,
    pub authors: Vec<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub version: Option<String>,
}

impl Descriptor {
    pub fn identity(&self) -> Option<&str> {
        self.identities.first().map(String::as_str)
    }
}

/// Where a descriptor was found and whether its content is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorFile {
    pub path: PathBuf,
    pub enabled: bool,
}

/// Locate the descriptor of `kind` in `dir`, enabled name first.
pub fn find_descriptor(dir: &Path, kind: ContentKind) -> Option<DescriptorFile> {
    let name = kind.descriptor_name()?;
    let enabled = dir.join(name);
    if enabled.is_file() {
        return Some(DescriptorFile {
            path: enabled,
            enabled: true,
        });
    }
    let disabled = dir.join(format!("{name}{DISABLED_SUFFIX}"));
    disabled.is_file().then_some(DescriptorFile {
        path: disabled,
        enabled: false,
    })
}

/// Read the descriptor in `dir`. `Ok(None)` means there is none; an
/// unreadable or malformed file is an error.
pub fn read_descriptor(dir: &Path, kind: ContentKind) -> Result<Option<(Descriptor, DescriptorFile)>> {
    let Some(file) = find_descriptor(dir, kind) else {
        return Ok(None);
    };
    let content = match std::fs::read(&file.path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(LauncherError::from_io(&file.path, e)),
    };
    let descriptor = match kind {
        ContentKind::Mod => parse_modinfo(&content)
            .map_err(|e| LauncherError::Parse(format!("{:?}: {e}", file.path)))?,
        _ => Some(parse_text_descriptor(&content)),
    };
    Ok(descriptor.map(|d| (d, file)))
}

/// Parse `KEY value` lines. Keys may carry a trailing colon.
pub fn parse_text_descriptor(content: &str) -> Descriptor {
    let mut name = None;
    let mut view = None;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = match line.split_once(char::is_whitespace) {
            Some((key, value)) => (key, value.trim()),
            None => (line, ""),
        };
        match key.trim_end_matches(':').to_ascii_uppercase().as_str() {
            "NAME" if name.is_none() => name = Some(value.replace(',', "")),
            "VIEW" if view.is_none() => view = Some(value.to_string()),
            _ => {}
        }
    }
    let identities: Vec<String> = name.iter().filter(|n| !n.is_empty()).cloned().collect();
    let display_name = view
        .filter(|v| !v.is_empty())
        .or_else(|| identities.first().cloned())
        .unwrap_or_default();
    Descriptor {
        identities,
        display_name,
        ..Default::default()
    }
}

#[derive(Debug, Deserialize)]
struct ModInfoJson {
    #[serde(default, alias = "id")]
    ident: Option<Idents>,
    #[serde(default, deserialize_with = "lenient_string")]
    name: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    authors: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_string")]
    description: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    category: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    version: Option<String>,
}

/// Accept strings and numbers alike (`"version": 2` appears in the wild).
fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Option<String>, D::Error> {
    let value = Option::<serde_json::Value>::deserialize(de)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Parse `modinfo.json`. `Ok(None)` when the file holds no `MOD_INFO`
/// object.
pub fn parse_modinfo(content: &str) -> serde_json::Result<Option<Descriptor>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    let objects = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };
    for object in objects {
        let is_mod_info = object
            .get("type")
            .and_then(|t| t.as_str())
            .is_some_and(|t| t.eq_ignore_ascii_case("MOD_INFO"));
        if !is_mod_info {
            continue;
        }
        let info: ModInfoJson = serde_json::from_value(object)?;
        let identities = info.ident.map(|i| i.to_vec()).unwrap_or_default();
        let mut authors = info.authors.unwrap_or_default();
        if let Some(author) = info.author {
            authors.insert(0, author);
        }
        let display_name = info
            .name
            .or_else(|| identities.first().cloned())
            .unwrap_or_default();
        return Ok(Some(Descriptor {
            identities,
            display_name,
            authors,
            description: info.description,
            category: info.category,
            version: info.version,
        }));
    }
    Ok(None)
}
