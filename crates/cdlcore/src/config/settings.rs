//! Launcher settings stored at `~/.config/cddagl/settings.ini`.
//!
//! Values live in the `[General]` section. Typed access goes through
//! [`Preferences`], which every [`ConfigStore`] gets for free.

use std::path::{Path, PathBuf};

use crate::catalog::{Graphics, Platform};
use crate::config::ini::IniFile;
use crate::config::ConfigStore;

const SECTION: &str = "General";

pub const KEY_GAME_DIRECTORY: &str = "game_directory";
pub const KEY_GRAPHICS: &str = "graphics";
pub const KEY_PLATFORM: &str = "platform";
pub const KEY_REMOVE_PREVIOUS_VERSION: &str = "remove_previous_version";
pub const KEY_PREVENT_SAVE_MOVE: &str = "prevent_save_move";
pub const KEY_SKIP_BACKUP_BEFORE_RESTORE: &str = "skip_backup_before_restore";
pub const KEY_MAX_AUTO_BACKUPS: &str = "max_auto_backups";
pub const KEY_BACKUP_ON_END: &str = "backup_on_end";
pub const KEY_LAST_BUILD: &str = "last_build";

pub const DEFAULT_MAX_AUTO_BACKUPS: u32 = 6;

/// INI-backed settings file.
#[derive(Debug)]
pub struct LauncherSettings {
    ini: IniFile,
    path: PathBuf,
}

impl LauncherSettings {
    /// Load from the default location. A missing file yields defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_dir().join("settings.ini"))
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let ini = if path.exists() {
            IniFile::read(path)?
        } else {
            IniFile::default()
        };
        Ok(Self {
            ini,
            path: path.to_path_buf(),
        })
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.ini.write(&self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("cddagl")
    }
}

impl ConfigStore for LauncherSettings {
    fn get_value(&self, name: &str) -> Option<String> {
        self.ini.get(SECTION, name).map(str::to_string)
    }

    fn set_value(&mut self, name: &str, value: &str) {
        self.ini.set(SECTION, name, value);
    }

    fn remove_value(&mut self, name: &str) {
        self.ini.remove(SECTION, name);
    }

    fn flush(&self) -> anyhow::Result<()> {
        self.save()
    }
}

/// Typed launcher preferences over any store.
pub trait Preferences: ConfigStore {
    fn game_directory(&self) -> Option<PathBuf> {
        self.get_value(KEY_GAME_DIRECTORY)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
    }

    fn set_game_directory(&mut self, dir: &Path) {
        self.set_value(KEY_GAME_DIRECTORY, &dir.to_string_lossy());
    }

    fn graphics(&self) -> Graphics {
        self.get_value(KEY_GRAPHICS)
            .and_then(|v| Graphics::parse(&v))
            .unwrap_or(Graphics::Tiles)
    }

    fn set_graphics(&mut self, graphics: Graphics) {
        self.set_value(KEY_GRAPHICS, graphics.as_str());
    }

    fn platform(&self) -> Platform {
        self.get_value(KEY_PLATFORM)
            .and_then(|v| Platform::parse(&v))
            .unwrap_or(Platform::X64)
    }

    fn set_platform(&mut self, platform: Platform) {
        self.set_value(KEY_PLATFORM, platform.as_str());
    }

    /// Delete `previous_version` after a successful update.
    fn remove_previous_version(&self) -> bool {
        self.get_bool(KEY_REMOVE_PREVIOUS_VERSION, false)
    }

    /// Leave `save/` in place instead of moving it into the snapshot.
    fn prevent_save_move(&self) -> bool {
        self.get_bool(KEY_PREVENT_SAVE_MOVE, false)
    }

    fn skip_backup_before_restore(&self) -> bool {
        self.get_bool(KEY_SKIP_BACKUP_BEFORE_RESTORE, false)
    }

    fn max_auto_backups(&self) -> u32 {
        self.get_u32(KEY_MAX_AUTO_BACKUPS, DEFAULT_MAX_AUTO_BACKUPS)
    }

    fn backup_on_end(&self) -> bool {
        self.get_bool(KEY_BACKUP_ON_END, false)
    }

    fn last_build(&self) -> Option<i64> {
        self.get_value(KEY_LAST_BUILD)
            .and_then(|v| v.trim().parse().ok())
    }

    fn set_last_build(&mut self, build: i64) {
        self.set_value(KEY_LAST_BUILD, &build.to_string());
    }
}

impl<T: ConfigStore + ?Sized> Preferences for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;

    #[test]
    fn test_defaults() {
        let cfg = MemoryConfig::new();
        assert_eq!(cfg.game_directory(), None);
        assert_eq!(cfg.graphics(), Graphics::Tiles);
        assert_eq!(cfg.platform(), Platform::X64);
        assert!(!cfg.remove_previous_version());
        assert!(!cfg.prevent_save_move());
        assert!(!cfg.skip_backup_before_restore());
        assert_eq!(cfg.max_auto_backups(), 6);
        assert!(!cfg.backup_on_end());
        assert_eq!(cfg.last_build(), None);
    }

    #[test]
    fn test_settings_persist() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cddagl/settings.ini");

        let mut settings = LauncherSettings::load_from(&path).unwrap();
        settings.set_game_directory(Path::new("/games/cdda"));
        settings.set_graphics(Graphics::Console);
        settings.set_platform(Platform::X86);
        settings.set_last_build(10600);
        settings.set_bool(KEY_PREVENT_SAVE_MOVE, true);
        settings.flush().unwrap();

        let back = LauncherSettings::load_from(&path).unwrap();
        assert_eq!(back.game_directory(), Some(PathBuf::from("/games/cdda")));
        assert_eq!(back.graphics(), Graphics::Console);
        assert_eq!(back.platform(), Platform::X86);
        assert_eq!(back.last_build(), Some(10600));
        assert!(back.prevent_save_move());
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[General]\n"));
    }

    #[test]
    fn test_preferences_through_trait_object() {
        let mut boxed: Box<dyn ConfigStore> = Box::new(MemoryConfig::new());
        boxed.set_value(KEY_MAX_AUTO_BACKUPS, "3");
        assert_eq!(boxed.max_auto_backups(), 3);
    }
}
