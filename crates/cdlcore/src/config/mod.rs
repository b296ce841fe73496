//! Persistent configuration: the settings store and the executable version
//! index.

pub mod ini;
pub mod settings;
pub mod version_index;

use std::collections::BTreeMap;

/// Get/set configuration values by name.
pub trait ConfigStore: Send + Sync {
    fn get_value(&self, name: &str) -> Option<String>;

    fn set_value(&mut self, name: &str, value: &str);

    fn remove_value(&mut self, name: &str);

    /// Persist pending changes. Stores without backing storage do nothing.
    fn flush(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn get_bool(&self, name: &str, default: bool) -> bool {
        match self.get_value(name).as_deref().map(str::trim) {
            Some("true") | Some("1") => true,
            Some("false") | Some("0") => false,
            _ => default,
        }
    }

    fn set_bool(&mut self, name: &str, value: bool) {
        self.set_value(name, if value { "true" } else { "false" });
    }

    fn get_u32(&self, name: &str, default: u32) -> u32 {
        self.get_value(name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

/// In-memory store for tests and embedders that persist elsewhere.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
    values: BTreeMap<String, String>,
}

impl MemoryConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfig {
    fn get_value(&self, name: &str) -> Option<String> {
        self.values.get(name).cloned()
    }

    fn set_value(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }

    fn remove_value(&mut self, name: &str) {
        self.values.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_config_typed_accessors() {
        let mut cfg = MemoryConfig::new();
        assert!(cfg.get_bool("prevent_save_move", true));
        cfg.set_bool("prevent_save_move", false);
        assert!(!cfg.get_bool("prevent_save_move", true));

        cfg.set_value("max_auto_backups", " 4 ");
        assert_eq!(cfg.get_u32("max_auto_backups", 6), 4);
        cfg.set_value("max_auto_backups", "many");
        assert_eq!(cfg.get_u32("max_auto_backups", 6), 6);

        cfg.remove_value("max_auto_backups");
        assert_eq!(cfg.get_value("max_auto_backups"), None);
    }
}
