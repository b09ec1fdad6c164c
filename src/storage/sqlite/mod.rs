//! Embedded `SQLite` backend.
//!
//! One database file under the data directory. Connections run in WAL mode
//! so readers never wait on the single writer; the writer itself is gated
//! by the [`ConcurrencyThrottle`](crate::storage::ConcurrencyThrottle).

mod connection;

pub use connection::{SqliteConnection, classify, configure_connection};

use super::dialect::{Dialect, SqliteDialect};
use super::driver::{Backend, BackendKind, Connection, DriverError, DriverResult};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default driver-level busy wait before `SQLITE_BUSY` surfaces.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// File-backed `SQLite` engine.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    path: PathBuf,
    busy_timeout: Duration,
    dialect: SqliteDialect,
}

impl SqliteBackend {
    /// Creates a backend for the database file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            dialect: SqliteDialect,
        }
    }

    /// Overrides the driver busy timeout.
    #[must_use]
    pub const fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    /// Returns the database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Appends `suffix` to the file name of `path` (`cache.db` -> `cache.db-wal`).
#[must_use]
pub fn sibling_file(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

impl Backend for SqliteBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Embedded
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    fn open(&self) -> DriverResult<Box<dyn Connection>> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DriverError::other(format!(
                    "failed to create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let conn = rusqlite::Connection::open(&self.path).map_err(|e| classify(&e))?;
        configure_connection(&conn, self.busy_timeout);
        Ok(Box::new(SqliteConnection::new(conn)))
    }

    fn storage_files(&self) -> Vec<PathBuf> {
        vec![
            self.path.clone(),
            sibling_file(&self.path, "-wal"),
            sibling_file(&self.path, "-shm"),
        ]
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::value::Value;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cache.db");
        let backend = SqliteBackend::new(&path);

        let mut conn = backend.open().unwrap();
        conn.execute("CREATE TABLE t (a TEXT)", &[]).unwrap();
        conn.execute("INSERT INTO t VALUES (?)", &[Value::from("x")])
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_storage_files_include_wal_and_shm() {
        let backend = SqliteBackend::new("/tmp/cache.db");
        let files = backend.storage_files();
        assert_eq!(
            files,
            vec![
                PathBuf::from("/tmp/cache.db"),
                PathBuf::from("/tmp/cache.db-wal"),
                PathBuf::from("/tmp/cache.db-shm"),
            ]
        );
        assert_eq!(backend.kind(), BackendKind::Embedded);
        assert_eq!(backend.dialect().name(), "sqlite");
    }
}
