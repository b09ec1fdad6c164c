//! Runtime settings that survive restarts.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Setting holding the tuned writer capacity.
pub const WRITER_CAPACITY_KEY: &str = "writer_capacity";

/// Named-setting provider.
pub trait SettingsStore: Send + Sync {
    /// Returns the value stored under `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-process settings, lost on exit.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemorySettings {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Settings persisted as a flat TOML table.
///
/// The file is rewritten on every `set`.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileSettings {
    /// Opens the settings file, starting empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let contents =
                std::fs::read_to_string(&path).map_err(|e| Error::failed("read_settings", e))?;
            let table: toml::Table =
                toml::from_str(&contents).map_err(|e| Error::failed("parse_settings", e))?;
            table
                .into_iter()
                .filter_map(|(key, value)| match scalar_string(value) {
                    Some(value) => Some((key, value)),
                    None => {
                        tracing::warn!(key = %key, path = %path.display(), "Ignoring non-scalar setting");
                        None
                    },
                })
                .collect()
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        values.insert(key.to_string(), value.to_string());

        let contents =
            toml::to_string(&*values).map_err(|e| Error::failed("serialize_settings", e))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::failed("write_settings", e))?;
        }
        std::fs::write(&self.path, contents).map_err(|e| Error::failed("write_settings", e))
    }
}

/// Hand-edited files may hold `writer_capacity = 3` rather than a string.
fn scalar_string(value: toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_settings_roundtrip() {
        let settings = MemorySettings::new();
        assert_eq!(settings.get(WRITER_CAPACITY_KEY), None);
        settings.set(WRITER_CAPACITY_KEY, "3").unwrap();
        assert_eq!(settings.get(WRITER_CAPACITY_KEY).as_deref(), Some("3"));
    }

    #[test]
    fn test_file_settings_persist_across_open() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");

        let settings = FileSettings::open(&path).unwrap();
        settings.set(WRITER_CAPACITY_KEY, "4").unwrap();
        drop(settings);

        let reopened = FileSettings::open(&path).unwrap();
        assert_eq!(reopened.get(WRITER_CAPACITY_KEY).as_deref(), Some("4"));
    }

    #[test]
    fn test_file_settings_accept_scalar_values() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "writer_capacity = 3\nverbose = true\nname = \"cache\"\n[nested]\nx = 1\n",
        )
        .unwrap();

        let settings = FileSettings::open(&path).unwrap();
        assert_eq!(settings.get(WRITER_CAPACITY_KEY).as_deref(), Some("3"));
        assert_eq!(settings.get("verbose").as_deref(), Some("true"));
        assert_eq!(settings.get("name").as_deref(), Some("cache"));
        assert_eq!(settings.get("nested"), None);
    }
}
