//! Carrying user content from the snapshot into a fresh install.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::content::{directory_identities, ContentKind};
use crate::error::{IoResultExt, Result};
use crate::paths::{
    file_name_lossy, DEBUG_LOG_FILES, OFFICIAL_FONTS_DIR, OFFICIAL_MODS_DIR, SAVE_DIR,
    SOUNDPACKS_DIR, TILESETS_DIR, USER_DATA_DIRS,
};
use crate::task::TaskContext;
use crate::tree::copy_tree;

/// Asset classes reconciled by identity, and where each lives.
pub const ASSET_CLASSES: &[(ContentKind, &str)] = &[
    (ContentKind::Tileset, TILESETS_DIR),
    (ContentKind::Soundpack, SOUNDPACKS_DIR),
    (ContentKind::Mod, OFFICIAL_MODS_DIR),
    (ContentKind::Font, OFFICIAL_FONTS_DIR),
];

/// One asset found in the snapshot but not shipped by the new build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomAsset {
    pub kind: ContentKind,
    pub identity: String,
    pub source: PathBuf,
    pub dest: PathBuf,
    /// False when the destination name was already taken.
    pub copied: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// User data directories copied from the snapshot.
    pub user_dirs: Vec<String>,
    pub custom: Vec<CustomAsset>,
}

impl MergeReport {
    pub fn copied_assets(&self) -> impl Iterator<Item = &CustomAsset> {
        self.custom.iter().filter(|a| a.copied)
    }
}

/// Entries of `previous` whose identity is missing from `official`, one per
/// source path. Multi-identity units are listed under their first custom
/// identity.
pub fn custom_assets(
    official: &BTreeMap<String, PathBuf>,
    previous: &BTreeMap<String, PathBuf>,
) -> Vec<(String, PathBuf)> {
    let mut seen = BTreeSet::new();
    previous
        .iter()
        .filter(|(identity, _)| !official.contains_key(*identity))
        .filter(|(_, path)| seen.insert((*path).clone()))
        .map(|(identity, path)| (identity.clone(), path.clone()))
        .collect()
}

/// Copy the user data directories from `snapshot` into `install_dir`,
/// leaving the game's debug logs behind. `save/` is skipped when it never
/// left the install directory.
pub fn copy_user_data(
    snapshot: &Path,
    install_dir: &Path,
    save_kept: bool,
    ctx: &TaskContext,
) -> Result<Vec<String>> {
    let mut copied = Vec::new();
    for name in USER_DATA_DIRS {
        if save_kept && *name == SAVE_DIR {
            continue;
        }
        let src = snapshot.join(name);
        if !src.is_dir() {
            continue;
        }
        ctx.stage(&format!("Restoring {name}"));
        copy_tree(&src, &install_dir.join(name), DEBUG_LOG_FILES, ctx)?;
        copied.push(name.to_string());
    }
    Ok(copied)
}

/// Find custom assets of every class and copy each one into the live tree
/// unless its name is already taken there.
pub fn carry_custom_assets(
    snapshot: &Path,
    install_dir: &Path,
    ctx: &TaskContext,
) -> Result<Vec<CustomAsset>> {
    let mut assets = Vec::new();
    for &(kind, rel) in ASSET_CLASSES {
        ctx.checkpoint()?;
        let live_dir = install_dir.join(rel);
        let official = directory_identities(kind, &live_dir)?;
        let previous = directory_identities(kind, &snapshot.join(rel))?;
        for (identity, source) in custom_assets(&official, &previous) {
            let dest = live_dir.join(file_name_lossy(&source));
            let copied = if dest.exists() {
                tracing::info!("Not restoring {} {identity}: {:?} exists", kind.label(), dest);
                false
            } else {
                ctx.stage(&format!("Restoring custom {} {identity}", kind.label()));
                if source.is_dir() {
                    copy_tree(&source, &dest, &[], ctx)?;
                } else {
                    fs::create_dir_all(&live_dir).at(&live_dir)?;
                    fs::copy(&source, &dest).at(&dest)?;
                }
                true
            };
            assets.push(CustomAsset {
                kind,
                identity,
                source,
                dest,
                copied,
            });
        }
    }
    Ok(assets)
}

/// Full merge-forward: user data first, then custom assets.
pub fn merge_forward(
    snapshot: &Path,
    install_dir: &Path,
    save_kept: bool,
    ctx: &TaskContext,
) -> Result<MergeReport> {
    let user_dirs = copy_user_data(snapshot, install_dir, save_kept, ctx)?;
    let custom = carry_custom_assets(snapshot, install_dir, ctx)?;
    Ok(MergeReport { user_dirs, custom })
}
