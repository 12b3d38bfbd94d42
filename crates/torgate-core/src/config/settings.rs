//! User settings persisted as a small JSON object
//!
//! ```json
//! { "bridges": "obfs4 1.2.3.4:443 FP", "bridge": true, "mode": "dark" }
//! ```

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Front-end color theme
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    /// Dark theme
    #[default]
    Dark,
    /// Light theme
    Light,
}

/// User-editable settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Bridge lines as entered by the user
    pub bridges: String,
    /// Use bridges
    pub bridge: bool,
    /// Theme
    pub mode: Theme,
}

/// Settings file with in-memory copy
pub struct SettingsStore {
    path: PathBuf,
    settings: RwLock<Settings>,
}

impl SettingsStore {
    /// Load settings from `path`; a missing or empty file yields defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let settings = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => Settings::default(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No settings file; using defaults");
                Settings::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            settings: RwLock::new(settings),
        })
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the current settings back to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&*self.settings.read())?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    /// Snapshot of all settings
    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    /// Modify settings in place (not saved)
    pub fn update<F: FnOnce(&mut Settings)>(&self, f: F) {
        f(&mut self.settings.write());
    }

    /// Value of one setting by its JSON key
    pub fn get(&self, key: &str) -> Option<Value> {
        match serde_json::to_value(&*self.settings.read()) {
            Ok(Value::Object(mut map)) => map.remove(key),
            _ => None,
        }
    }

    /// Set one setting by its JSON key (not saved)
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut settings = self.settings.write();
        let mut map = match serde_json::to_value(&*settings)? {
            Value::Object(map) => map,
            _ => return Err(Error::Config("settings are not a JSON object".into())),
        };
        if !map.contains_key(key) {
            return Err(Error::config_value(key, "Unknown setting"));
        }
        map.insert(key.to_string(), value);
        *settings = serde_json::from_value(Value::Object(map))
            .map_err(|e| Error::config_value(key, e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.settings(), Settings::default());
        assert_eq!(store.get("mode"), Some(json!("dark")));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let store = SettingsStore::load(&path).unwrap();
        store.set("bridge", json!(true)).unwrap();
        store.set("bridges", json!("obfs4 1.2.3.4:443 FP")).unwrap();
        store.update(|s| s.mode = Theme::Light);
        store.save().unwrap();

        let reloaded = SettingsStore::load(&path).unwrap();
        assert_eq!(
            reloaded.settings(),
            Settings {
                bridges: "obfs4 1.2.3.4:443 FP".into(),
                bridge: true,
                mode: Theme::Light,
            }
        );
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join("s.json")).unwrap();
        assert!(store.set("mode", json!("sepia")).is_err());
        assert!(store.set("colour", json!(1)).is_err());
        assert_eq!(store.settings(), Settings::default());
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(SettingsStore::load(&path).is_err());
    }

    #[test]
    fn test_settings_file_format() {
        let s: Settings =
            serde_json::from_str(r#"{"bridges": "", "bridge": false, "mode": "light"}"#).unwrap();
        assert_eq!(s.mode, Theme::Light);
    }
}
