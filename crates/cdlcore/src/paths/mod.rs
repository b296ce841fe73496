//! Game directory layout and name-matching helpers.
//!
//! Everything the launcher persists lives inside the managed game directory:
//! - `previous_version/` - snapshot taken by the last update
//! - `save/` - live save data
//! - `save_backups/*.zip` - backup store, each archive rooted at `save/`
//! - `gfx/*` - tilesets (`tileset.txt`)
//! - `data/sound/*` - soundpacks (`soundpack.txt`)
//! - `data/mods/*`, `mods/*` - official and user mods (`modinfo.json`)
//! - `data/font/*`, `font/*` - fonts (plain files)
//!
//! Name comparisons that must be case-insensitive (backup names, archive
//! entries on Windows-made archives) go through [`normalize_for_lookup`].

use std::path::{Component, Path, PathBuf};

use unicode_normalization::UnicodeNormalization;

pub const PREVIOUS_VERSION_DIR: &str = "previous_version";
pub const SAVE_DIR: &str = "save";
pub const SAVE_BACKUPS_DIR: &str = "save_backups";
pub const CONFIG_DIR: &str = "config";
pub const TILESETS_DIR: &str = "gfx";
pub const SOUNDPACKS_DIR: &str = "data/sound";
pub const OFFICIAL_MODS_DIR: &str = "data/mods";
pub const USER_MODS_DIR: &str = "mods";
pub const OFFICIAL_FONTS_DIR: &str = "data/font";
pub const USER_FONTS_DIR: &str = "font";

/// Prefix for every scratch file and directory this process creates.
pub const TEMP_PREFIX: &str = "cddagl";

/// Suffix appended to a descriptor file to disable its content.
pub const DISABLED_SUFFIX: &str = ".disabled";

/// Debug logs the game writes into `config/`; never carried across updates.
pub const DEBUG_LOG_FILES: &[&str] = &["debug.log", "debug.log.prev"];

/// User data directories copied forward from the snapshot after an update.
pub const USER_DATA_DIRS: &[&str] = &[
    CONFIG_DIR,
    SAVE_DIR,
    "templates",
    "memorial",
    "graveyard",
    SAVE_BACKUPS_DIR,
    USER_MODS_DIR,
    USER_FONTS_DIR,
];

/// Typed view of a game directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameLayout {
    root: PathBuf,
}

impl GameLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn previous_version(&self) -> PathBuf {
        self.root.join(PREVIOUS_VERSION_DIR)
    }

    pub fn save_dir(&self) -> PathBuf {
        self.root.join(SAVE_DIR)
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join(SAVE_BACKUPS_DIR)
    }

    pub fn soundpacks_dir(&self) -> PathBuf {
        self.root.join(SOUNDPACKS_DIR)
    }

    pub fn tilesets_dir(&self) -> PathBuf {
        self.root.join(TILESETS_DIR)
    }

    pub fn official_mods_dir(&self) -> PathBuf {
        self.root.join(OFFICIAL_MODS_DIR)
    }

    pub fn user_mods_dir(&self) -> PathBuf {
        self.root.join(USER_MODS_DIR)
    }

    /// Whether an update snapshot is available. Derived from the filesystem.
    pub fn has_previous_version(&self) -> bool {
        self.previous_version().is_dir()
    }
}

/// Normalize a name for lookups and comparisons (NFC, lowercase, forward
/// slashes, trimmed).
pub fn normalize_for_lookup(path: &str) -> String {
    path.nfc()
        .collect::<String>()
        .to_lowercase()
        .replace('\\', "/")
        .trim_matches('/')
        .to_string()
}

/// Check if two names are equal (case-insensitive).
pub fn names_equal(a: &str, b: &str) -> bool {
    normalize_for_lookup(a) == normalize_for_lookup(b)
}

/// Find an entry case-insensitively within a directory.
pub fn find_case_insensitive(dir: &Path, name: &str) -> Option<PathBuf> {
    let target = normalize_for_lookup(name);
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .find(|e| normalize_for_lookup(&e.file_name().to_string_lossy()) == target)
        .map(|e| e.path())
}

/// Relative path rendered with forward slashes, as stored in zip archives.
pub fn to_archive_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Join an archive entry name onto `root`, refusing absolute paths and `..`.
pub fn safe_join(root: &Path, entry: &str) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for comp in Path::new(&entry.replace('\\', "/")).components() {
        match comp {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if clean.as_os_str().is_empty() {
        None
    } else {
        Some(root.join(clean))
    }
}

/// File name of `path` as a lossy string.
pub fn file_name_lossy(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
