//! Ordered INI reader/writer used for the launcher settings file.
//!
//! - Sections in `[brackets]`, keys with `=`
//! - Comments (`;` or `#`) and blank lines survive a load/save cycle
//! - Keys before the first section header live in the unnamed section
//! - Lines without `=` are kept verbatim as comments

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IniFile {
    /// Sections in file order. The unnamed section comes first.
    pub sections: Vec<IniSection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IniSection {
    pub name: String,
    pub lines: Vec<IniLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IniLine {
    Comment(String),
    Value { key: String, value: String },
    Blank,
}

impl IniSection {
    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            lines: Vec::new(),
        }
    }
}

impl IniFile {
    pub fn parse(content: &str) -> Self {
        let mut sections = Vec::new();
        let mut current = IniSection::named("");

        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() {
                current.lines.push(IniLine::Blank);
            } else if line.starts_with(';') || line.starts_with('#') {
                current.lines.push(IniLine::Comment(line.to_string()));
            } else if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                sections.push(std::mem::replace(&mut current, IniSection::named(name.trim())));
            } else if let Some((key, value)) = line.split_once('=') {
                current.lines.push(IniLine::Value {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                });
            } else {
                current.lines.push(IniLine::Comment(line.to_string()));
            }
        }

        sections.push(current);
        IniFile { sections }
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;
        Ok(Self::parse(&content))
    }

    pub fn write_to_string(&self) -> String {
        let mut out = String::new();
        let mut needs_gap = false;
        for section in &self.sections {
            if section.name.is_empty() {
                if section.lines.is_empty() {
                    continue;
                }
            } else {
                if needs_gap {
                    out.push('\n');
                }
                needs_gap = !matches!(section.lines.last(), Some(IniLine::Blank));
                out.push('[');
                out.push_str(&section.name);
                out.push_str("]\n");
            }
            for line in &section.lines {
                match line {
                    IniLine::Comment(c) => out.push_str(c),
                    IniLine::Value { key, value } => {
                        out.push_str(key);
                        out.push('=');
                        out.push_str(value);
                    }
                    IniLine::Blank => {}
                }
                out.push('\n');
            }
        }
        out
    }

    /// Write to `path`, creating the parent directory.
    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create settings directory {:?}", parent))?;
        }
        std::fs::write(path, self.write_to_string())
            .with_context(|| format!("Failed to write settings file {:?}", path))
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section).and_then(|s| {
            s.lines.iter().find_map(|l| match l {
                IniLine::Value { key: k, value } if k == key => Some(value.as_str()),
                _ => None,
            })
        })
    }

    /// Set a value, creating the section and key as needed.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        let idx = match self.sections.iter().position(|s| s.name == section) {
            Some(idx) => idx,
            None => {
                self.sections.push(IniSection::named(section));
                self.sections.len() - 1
            }
        };
        let sec = &mut self.sections[idx];
        for line in sec.lines.iter_mut() {
            if let IniLine::Value { key: k, value: v } = line {
                if k == key {
                    *v = value.to_string();
                    return;
                }
            }
        }
        // Keep trailing blank lines after the new key.
        let insert_at = sec
            .lines
            .iter()
            .rposition(|l| !matches!(l, IniLine::Blank))
            .map(|i| i + 1)
            .unwrap_or(0);
        sec.lines.insert(
            insert_at,
            IniLine::Value {
                key: key.to_string(),
                value: value.to_string(),
            },
        );
    }

    pub fn remove(&mut self, section: &str, key: &str) -> bool {
        let Some(sec) = self.sections.iter_mut().find(|s| s.name == section) else {
            return false;
        };
        let before = sec.lines.len();
        sec.lines
            .retain(|l| !matches!(l, IniLine::Value { key: k, .. } if k == key));
        sec.lines.len() != before
    }

    pub fn section_map(&self, section: &str) -> BTreeMap<String, String> {
        self.section(section)
            .map(|s| {
                s.lines
                    .iter()
                    .filter_map(|l| match l {
                        IniLine::Value { key, value } => Some((key.clone(), value.clone())),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn section(&self, name: &str) -> Option<&IniSection> {
        self.sections.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let ini = IniFile::parse("[General]\ngame_directory=/games/cdda\ngraphics=Tiles\n");
        assert_eq!(ini.get("General", "game_directory"), Some("/games/cdda"));
        assert_eq!(ini.get("General", "graphics"), Some("Tiles"));
        assert_eq!(ini.get("General", "missing"), None);
        assert_eq!(ini.get("Other", "graphics"), None);
    }

    #[test]
    fn test_roundtrip_preserves_comments() {
        let content = "; launcher settings\n[General]\ngraphics=Tiles\n\n[Window]\nwidth=800\n";
        let ini = IniFile::parse(content);
        assert_eq!(ini.write_to_string(), content);
    }

    #[test]
    fn test_set_creates_and_replaces() {
        let mut ini = IniFile::default();
        ini.set("General", "platform", "x64");
        ini.set("General", "platform", "x86");
        ini.set("General", "max_auto_backups", "6");
        assert_eq!(ini.get("General", "platform"), Some("x86"));
        assert_eq!(ini.section_map("General").len(), 2);
    }

    #[test]
    fn test_set_inserts_before_trailing_blank() {
        let mut ini = IniFile::parse("[General]\na=1\n\n[Other]\nb=2\n");
        ini.set("General", "c", "3");
        assert_eq!(ini.write_to_string(), "[General]\na=1\nc=3\n\n[Other]\nb=2\n");
    }

    #[test]
    fn test_remove() {
        let mut ini = IniFile::parse("[General]\nlast_build=10500\n");
        assert!(ini.remove("General", "last_build"));
        assert!(!ini.remove("General", "last_build"));
        assert!(!ini.remove("Nope", "x"));
    }

    #[test]
    fn test_read_write_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cddagl/settings.ini");
        let mut ini = IniFile::default();
        ini.set("General", "backup_on_end", "true");
        ini.write(&path).unwrap();
        let back = IniFile::read(&path).unwrap();
        assert_eq!(back.get("General", "backup_on_end"), Some("true"));
    }
}
