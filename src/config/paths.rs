//! Storage locations.
//!
//! Translates the logical storage locations the cache uses (database file,
//! snapshot files, settings file) into filesystem paths under one data
//! directory.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Name of the `SQLite` database file.
pub const DATABASE_FILE_NAME: &str = "mediacache.db";

/// Name of the persisted runtime settings file.
pub const SETTINGS_FILE_NAME: &str = "settings.toml";

/// Returns the platform user data directory for the cache.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn get_user_data_dir() -> Result<PathBuf> {
    directories::BaseDirs::new()
        .map(|b| b.data_local_dir().join("mediacache"))
        .ok_or_else(|| Error::failed("get_user_data_dir", "Could not determine user data directory"))
}

/// Constructs storage paths under a data directory.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    data_dir: PathBuf,
}

impl StoragePaths {
    /// Creates a path helper rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    /// Returns the data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// `{data_dir}/mediacache.db`
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE_NAME)
    }

    /// `{data_dir}/settings.toml`
    #[must_use]
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE_NAME)
    }

    /// `{data_dir}/snapshot-{timestamp}.txt`
    #[must_use]
    pub fn snapshot_path(&self, timestamp: i64) -> PathBuf {
        self.data_dir.join(format!("snapshot-{timestamp}.txt"))
    }

    /// Creates the data directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn ensure_data_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).map_err(|e| {
            Error::failed("create_data_dir", format!("{}: {e}", self.data_dir.display()))
        })
    }
}
