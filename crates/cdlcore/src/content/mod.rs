//! Optional game content: soundpacks, tilesets, mods and fonts.
//!
//! A content unit is a directory holding its descriptor file (fonts are
//! plain files). Nothing is persisted outside the game directory: listings
//! are rebuilt by scanning, and the enabled flag is the descriptor's name.

pub mod descriptor;
pub mod installer;
pub mod repository;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub use descriptor::{ContentKind, Descriptor};
pub use installer::{ContentInstaller, InstallReport};
pub use repository::{DownloadMethod, RepositoryEntry};

use crate::error::{IoResultExt, LauncherError, Result};
use crate::paths::{file_name_lossy, GameLayout, DISABLED_SUFFIX, OFFICIAL_FONTS_DIR, USER_FONTS_DIR};
use crate::task::TaskContext;
use crate::tree::scan_tree;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentEntry {
    pub kind: ContentKind,
    /// Identities, first one primary. Mods may bundle several.
    pub identities: Vec<String>,
    pub display_name: String,
    pub path: PathBuf,
    pub enabled: bool,
    pub size: u64,
    pub descriptor: Option<Descriptor>,
}

impl ContentEntry {
    pub fn identity(&self) -> Option<&str> {
        self.identities.first().map(String::as_str)
    }
}

fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>> {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LauncherError::from_io(dir, e)),
    };
    let mut children = Vec::new();
    for entry in read {
        children.push(entry.at(dir)?.path());
    }
    children.sort();
    Ok(children)
}

/// List the content units of `kind` directly under `dir`. Directories
/// without a descriptor are ignored; an unreadable descriptor is logged
/// and skipped.
pub fn scan_dir(kind: ContentKind, dir: &Path, ctx: &TaskContext) -> Result<Vec<ContentEntry>> {
    let mut entries = Vec::new();
    for path in sorted_children(dir)? {
        ctx.checkpoint()?;
        if kind == ContentKind::Font {
            if path.is_file() {
                let name = file_name_lossy(&path);
                let size = fs::metadata(&path).at(&path)?.len();
                entries.push(ContentEntry {
                    kind,
                    identities: vec![name.clone()],
                    display_name: name,
                    path,
                    enabled: true,
                    size,
                    descriptor: None,
                });
            }
            continue;
        }
        if !path.is_dir() {
            continue;
        }
        let (descriptor, file) = match descriptor::read_descriptor(&path, kind) {
            Ok(Some(found)) => found,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Skipping {} {:?}: {e}", kind.label(), path);
                continue;
            }
        };
        let size = scan_tree(&path, false, ctx)?.bytes;
        entries.push(ContentEntry {
            kind,
            identities: descriptor.identities.clone(),
            display_name: if descriptor.display_name.is_empty() {
                file_name_lossy(&path)
            } else {
                descriptor.display_name.clone()
            },
            path,
            enabled: file.enabled,
            size,
            descriptor: Some(descriptor),
        });
    }
    Ok(entries)
}

pub fn scan_soundpacks(layout: &GameLayout, ctx: &TaskContext) -> Result<Vec<ContentEntry>> {
    scan_dir(ContentKind::Soundpack, &layout.soundpacks_dir(), ctx)
}

pub fn scan_tilesets(layout: &GameLayout, ctx: &TaskContext) -> Result<Vec<ContentEntry>> {
    scan_dir(ContentKind::Tileset, &layout.tilesets_dir(), ctx)
}

/// Official mods (`data/mods`) followed by user mods (`mods`).
pub fn scan_mods(layout: &GameLayout, ctx: &TaskContext) -> Result<Vec<ContentEntry>> {
    let mut mods = scan_dir(ContentKind::Mod, &layout.official_mods_dir(), ctx)?;
    mods.extend(scan_dir(ContentKind::Mod, &layout.user_mods_dir(), ctx)?);
    Ok(mods)
}

pub fn scan_fonts(layout: &GameLayout, ctx: &TaskContext) -> Result<Vec<ContentEntry>> {
    let mut fonts = scan_dir(ContentKind::Font, &layout.root().join(OFFICIAL_FONTS_DIR), ctx)?;
    fonts.extend(scan_dir(ContentKind::Font, &layout.root().join(USER_FONTS_DIR), ctx)?);
    Ok(fonts)
}

/// Where newly installed content of `kind` goes. Mods install as user mods.
pub fn install_target(layout: &GameLayout, kind: ContentKind) -> PathBuf {
    match kind {
        ContentKind::Soundpack => layout.soundpacks_dir(),
        ContentKind::Tileset => layout.tilesets_dir(),
        ContentKind::Mod => layout.user_mods_dir(),
        ContentKind::Font => layout.root().join(USER_FONTS_DIR),
    }
}

/// Identity -> path over `entries`. The first occurrence of an identity wins.
pub fn identity_map(entries: &[ContentEntry]) -> BTreeMap<String, PathBuf> {
    let mut map = BTreeMap::new();
    for entry in entries {
        for identity in &entry.identities {
            map.entry(identity.clone())
                .or_insert_with(|| entry.path.clone());
        }
    }
    map
}

/// Identity -> path for the units of `kind` directly under `dir`, read from
/// descriptors alone. Fonts are keyed by file name. Cheaper than
/// [`scan_dir`] since nothing is sized.
pub fn directory_identities(kind: ContentKind, dir: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut map = BTreeMap::new();
    for path in sorted_children(dir)? {
        let identities = if kind == ContentKind::Font {
            if !path.is_file() {
                continue;
            }
            vec![file_name_lossy(&path)]
        } else {
            if !path.is_dir() {
                continue;
            }
            match descriptor::read_descriptor(&path, kind) {
                Ok(Some((descriptor, _))) => descriptor.identities,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Skipping {} {:?}: {e}", kind.label(), path);
                    continue;
                }
            }
        };
        for identity in identities {
            map.entry(identity).or_insert_with(|| path.clone());
        }
    }
    Ok(map)
}

/// Enable or disable by renaming the descriptor file. Listing data is left
/// as it was apart from the flag.
pub fn set_enabled(entry: &mut ContentEntry, enabled: bool) -> Result<()> {
    if entry.enabled == enabled {
        return Ok(());
    }
    let Some(name) = entry.kind.descriptor_name() else {
        tracing::warn!("{} entries cannot be disabled", entry.kind.label());
        return Ok(());
    };
    let on = entry.path.join(name);
    let off = entry.path.join(format!("{name}{DISABLED_SUFFIX}"));
    let (from, to) = if enabled { (off, on) } else { (on, off) };
    fs::rename(&from, &to).at(&from)?;
    tracing::info!(
        "{} {:?} {}",
        entry.kind.label(),
        entry.display_name,
        if enabled { "enabled" } else { "disabled" }
    );
    entry.enabled = enabled;
    Ok(())
}

/// Directories under `root` that directly hold the descriptor of `kind`.
/// A found root is not searched further.
pub fn find_content_roots(root: &Path, kind: ContentKind) -> Result<Vec<PathBuf>> {
    let Some(name) = kind.descriptor_name() else {
        return Ok(Vec::new());
    };
    let mut roots = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        if dir.join(name).is_file() {
            roots.push(dir);
            continue;
        }
        let mut subdirs: Vec<PathBuf> = sorted_children(&dir)?
            .into_iter()
            .filter(|p| p.is_dir())
            .collect();
        subdirs.reverse();
        pending.extend(subdirs);
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_soundpack(dir: &Path, name: &str, view: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join("soundpack.txt"), format!("NAME: {name}\nVIEW: {view}\n")).unwrap();
        fs::write(dir.join("sfx.ogg"), vec![0u8; 100]).unwrap();
    }

    #[test]
    fn test_scan_soundpacks() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = GameLayout::new(tmp.path());
        make_soundpack(&layout.soundpacks_dir().join("basic"), "basic", "Basic");
        make_soundpack(&layout.soundpacks_dir().join("zz_copy"), "basic", "Copy");
        fs::create_dir_all(layout.soundpacks_dir().join("empty")).unwrap();

        let entries = scan_soundpacks(&layout, &TaskContext::silent()).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].display_name, "Basic");
        assert!(entries[0].enabled);
        assert!(entries[0].size >= 100);

        let map = identity_map(&entries);
        assert_eq!(map.len(), 1);
        assert_eq!(map["basic"], layout.soundpacks_dir().join("basic"));
    }

    #[test]
    fn test_scan_tilesets() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = GameLayout::new(tmp.path());
        let dir = layout.tilesets_dir().join("Chesthole");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("tileset.txt"), "NAME: chesthole\nVIEW: Chesthole\n").unwrap();
        fs::create_dir_all(layout.tilesets_dir().join("fonts")).unwrap();

        let tilesets = scan_tilesets(&layout, &TaskContext::silent()).unwrap();
        assert_eq!(tilesets.len(), 1);
        assert_eq!(tilesets[0].kind, ContentKind::Tileset);
        assert_eq!(tilesets[0].identity(), Some("chesthole"));
    }

    #[test]
    fn test_toggle_renames_descriptor() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = GameLayout::new(tmp.path());
        make_soundpack(&layout.soundpacks_dir().join("basic"), "basic", "Basic");

        let mut entry = scan_soundpacks(&layout, &TaskContext::silent())
            .unwrap()
            .remove(0);
        let size = entry.size;
        set_enabled(&mut entry, false).unwrap();
        assert!(!entry.enabled);
        assert_eq!(entry.size, size);
        assert!(entry.path.join("soundpack.txt.disabled").exists());

        let rescanned = scan_soundpacks(&layout, &TaskContext::silent()).unwrap();
        assert!(!rescanned[0].enabled);

        set_enabled(&mut entry, true).unwrap();
        assert!(entry.path.join("soundpack.txt").exists());
    }

    #[test]
    fn test_scan_mods_and_fonts() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = GameLayout::new(tmp.path());
        let official = layout.official_mods_dir().join("dda");
        fs::create_dir_all(&official).unwrap();
        fs::write(
            official.join("modinfo.json"),
            r#"[{"type": "MOD_INFO", "ident": "dda", "name": "Dark Days Ahead"}]"#,
        )
        .unwrap();
        let user = layout.user_mods_dir().join("mine");
        fs::create_dir_all(&user).unwrap();
        fs::write(user.join("modinfo.json"), "{ broken").unwrap();
        fs::create_dir_all(tmp.path().join("font")).unwrap();
        fs::write(tmp.path().join("font/unifont.ttf"), "f").unwrap();

        let mods = scan_mods(&layout, &TaskContext::silent()).unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].identity(), Some("dda"));

        let fonts = scan_fonts(&layout, &TaskContext::silent()).unwrap();
        assert_eq!(fonts.len(), 1);
        assert_eq!(fonts[0].identity(), Some("unifont.ttf"));
    }

    #[test]
    fn test_find_content_roots_stops_at_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        make_soundpack(&root.join("pack-master/Pack"), "pack", "Pack");
        make_soundpack(&root.join("pack-master/Pack/bundled"), "inner", "Inner");
        make_soundpack(&root.join("other"), "other", "Other");
        fs::create_dir_all(root.join("docs")).unwrap();

        let roots = find_content_roots(root, ContentKind::Soundpack).unwrap();
        assert_eq!(
            roots,
            vec![root.join("other"), root.join("pack-master/Pack")]
        );
    }
}
