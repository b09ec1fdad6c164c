//! Structural-error recovery.
//!
//! A namespace operation that fails because a table or column is missing
//! is routed here. The controller migrates the schema (which rebuilds every
//! table while carrying durable rows over) and retries the operation once.
//! If the migration itself fails on the embedded backend, the database file
//! is moved aside and an empty schema is created in its place.

use super::migrator::{MigrationOutcome, SchemaMigrator};
use crate::clock::Clock;
use crate::config::RecoveryConfig;
use crate::observability::ProgressReporter;
use crate::storage::{BackendKind, StatementExecutor};
use crate::{Error, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const CONFIRM_REBUILD: &str = "The media cache database needs to be rebuilt. Continue?";

/// Migrates or resets the schema when an operation hits a missing object.
pub struct RecoveryController {
    executor: Arc<StatementExecutor>,
    migrator: Arc<SchemaMigrator>,
    progress: Arc<dyn ProgressReporter>,
    config: RecoveryConfig,
    clock: Arc<dyn Clock>,
    lock: Mutex<()>,
    recoveries: AtomicU64,
}

impl RecoveryController {
    /// Creates a controller.
    #[must_use]
    pub fn new(
        executor: Arc<StatementExecutor>,
        migrator: Arc<SchemaMigrator>,
        progress: Arc<dyn ProgressReporter>,
        config: RecoveryConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            migrator,
            progress,
            config,
            clock,
            lock: Mutex::new(()),
            recoveries: AtomicU64::new(0),
        }
    }

    /// Number of completed recoveries since startup.
    #[must_use]
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::SeqCst)
    }

    /// Runs the startup schema check, resetting an embedded database whose
    /// schema cannot be brought up to date.
    ///
    /// # Errors
    ///
    /// Returns the migration error on a networked backend, or the reset
    /// error if the embedded database cannot be replaced.
    pub fn initialize(&self) -> Result<MigrationOutcome> {
        match self.migrator.init() {
            Ok(outcome) => Ok(outcome),
            Err(e) if self.executor.backend_kind() == BackendKind::Embedded => {
                tracing::error!(error = %e, "Schema initialisation failed, resetting database");
                self.reset()?;
                Ok(MigrationOutcome::Created)
            },
            Err(e) => Err(e),
        }
    }

    /// Runs `f`, recovering from one structural error.
    ///
    /// On [`Error::Structural`] the schema is migrated (or, on the embedded
    /// backend, reset if migration fails) and `f` is retried once. Any other
    /// result is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns the error of the retried call, or the recovery error.
    pub fn run<T, F>(&self, operation: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        let seen = self.recoveries();
        match f() {
            Err(Error::Structural(cause)) => {
                self.recover(operation, &cause, seen)?;
                f()
            },
            other => other,
        }
    }

    fn recover(&self, operation: &'static str, cause: &str, seen: u64) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.recoveries() != seen {
            // Another caller rebuilt the schema while this one waited
            tracing::debug!(operation, "Schema already rebuilt, retrying");
            return Ok(());
        }

        tracing::warn!(operation, cause, "Schema object missing, rebuilding cache schema");
        if self.progress.is_interactive() && !self.progress.confirm(CONFIRM_REBUILD) {
            metrics::counter!("cache_recovery_total", "action" => "declined").increment(1);
            return Err(Error::Structural(cause.to_string()));
        }

        let result = match self.migrator.migrate(None) {
            Ok(outcome) => {
                tracing::info!(?outcome, "Schema rebuilt");
                metrics::counter!("cache_recovery_total", "action" => "migrate").increment(1);
                Ok(())
            },
            Err(e) if self.executor.backend_kind() == BackendKind::Embedded => {
                tracing::error!(error = %e, "Schema rebuild failed, resetting database");
                self.reset_locked()
            },
            Err(e) => {
                metrics::counter!("cache_recovery_total", "action" => "failed").increment(1);
                Err(e)
            },
        };
        if result.is_ok() {
            self.recoveries.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    /// Replaces the embedded database with an empty one.
    ///
    /// Closes every pooled handle, moves the database file and its side
    /// files to `<file>.<timestamp>.bak` (deleting them with retries if the
    /// rename fails), creates the schema and records the version. Backups are
    /// removed on a background thread after the configured delay.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on a networked backend and
    /// [`Error::Reset`] if a file can be neither renamed nor deleted.
    pub fn reset(&self) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let result = self.reset_locked();
        if result.is_ok() {
            self.recoveries.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    fn reset_locked(&self) -> Result<()> {
        let backend = self.executor.backend();
        if backend.kind() == BackendKind::Networked {
            return Err(Error::InvalidInput(format!(
                "reset is only supported on the embedded backend, not {}",
                backend.describe()
            )));
        }

        let closed = self.executor.pool().close_all();
        tracing::info!(closed, database = %backend.describe(), "Resetting cache database");

        let stamp = self.clock.now();
        let mut backups = Vec::new();
        for file in backend.storage_files() {
            if !file.exists() {
                continue;
            }
            let backup = backup_path(&file, stamp);
            match std::fs::rename(&file, &backup) {
                Ok(()) => backups.push(backup),
                Err(rename_err) => {
                    tracing::warn!(error = %rename_err, file = %file.display(), "Rename failed, deleting");
                    delete_with_retry(&file, self.config.delete_attempts, self.config.delete_backoff)
                        .map_err(|e| Error::Reset {
                            path: file.clone(),
                            cause: format!("rename failed: {rename_err}; delete failed: {e}"),
                        })?;
                },
            }
        }

        self.migrator.create_schema()?;
        self.migrator.record_version()?;
        metrics::counter!("cache_recovery_total", "action" => "reset").increment(1);
        tracing::info!(backups = backups.len(), "Cache database reset");

        if !backups.is_empty() {
            schedule_cleanup(backups, self.config.cleanup_delay);
        }
        Ok(())
    }
}

/// `<file>.<stamp>.bak`
fn backup_path(file: &Path, stamp: i64) -> PathBuf {
    let mut name = OsString::from(file.as_os_str());
    name.push(format!(".{stamp}.bak"));
    PathBuf::from(name)
}

fn delete_with_retry(file: &Path, attempts: u32, backoff: Duration) -> std::io::Result<()> {
    let attempts = attempts.max(1);
    let mut delay = backoff;
    let mut attempt = 1;
    loop {
        match std::fs::remove_file(file) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                tracing::debug!(error = %e, attempt, file = %file.display(), "Delete failed, retrying");
                std::thread::sleep(delay);
                delay = delay.saturating_mul(2);
                attempt += 1;
            },
        }
    }
}

fn schedule_cleanup(backups: Vec<PathBuf>, delay: Duration) {
    let spawned = std::thread::Builder::new()
        .name("mediacache-cleanup".to_string())
        .spawn(move || {
            std::thread::sleep(delay);
            for backup in backups {
                match std::fs::remove_file(&backup) {
                    Ok(()) => tracing::debug!(backup = %backup.display(), "Removed database backup"),
                    Err(e) => {
                        tracing::warn!(error = %e, backup = %backup.display(), "Could not remove backup");
                    },
                }
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "Could not schedule backup cleanup");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, MemorySettings};
    use crate::sql_params;
    use crate::MediaCache;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> MediaCache {
        MediaCache::builder(CacheConfig::new(dir.path()))
            .settings(Arc::new(MemorySettings::new()))
            .open()
            .unwrap()
    }

    #[test]
    fn test_backup_path() {
        assert_eq!(
            backup_path(Path::new("/d/mediacache.db-wal"), 42),
            PathBuf::from("/d/mediacache.db-wal.42.bak")
        );
    }

    #[test]
    fn test_delete_with_retry_missing_file_is_ok() {
        let dir = TempDir::new().unwrap();
        delete_with_retry(&dir.path().join("gone"), 3, Duration::from_millis(1)).unwrap();
    }

    #[test]
    fn test_delete_with_retry_gives_up() {
        let dir = TempDir::new().unwrap();
        // A directory cannot be removed with remove_file
        let err = delete_with_retry(dir.path(), 2, Duration::from_millis(1));
        assert!(err.is_err());
    }

    #[test]
    fn test_missing_table_is_rebuilt_and_retried() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.genres().set("movie", "28", "Action").unwrap();

        let drop = cache.executor().prepare("test.drop", "DROP TABLE bookmarks");
        cache.executor().execute(&drop, &[]).unwrap();

        cache.bookmarks().set("movie", "603", "The Matrix", None).unwrap();
        assert!(cache.bookmarks().get("movie", "603").unwrap().is_some());
        assert_eq!(cache.genres().get("movie", "28").unwrap().as_deref(), Some("Action"));
        assert_eq!(cache.recovery().recoveries(), 1);
    }

    #[test]
    fn test_missing_column_is_rebuilt() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        let exec = cache.executor();
        exec.execute(&exec.prepare("t", "DROP TABLE id_mapping"), &[]).unwrap();
        exec.execute(
            &exec.prepare("t", "CREATE TABLE id_mapping (source_id TEXT PRIMARY KEY, created_at INTEGER)"),
            &[],
        )
        .unwrap();
        exec.execute(
            &exec.prepare("t", "INSERT INTO id_mapping (source_id, created_at) VALUES (?, ?)"),
            &sql_params!["tt1", 1_i64],
        )
        .unwrap();

        cache.ids().set("tt2", "200").unwrap();
        assert_eq!(cache.ids().get("tt2").unwrap().as_deref(), Some("200"));
        // The carried-over row got an empty target for the missing column
        assert_eq!(cache.ids().get("tt1").unwrap().as_deref(), Some(""));
    }

    #[test]
    fn test_reset_moves_files_aside() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.bookmarks().set("movie", "603", "The Matrix", None).unwrap();

        cache.reset().unwrap();

        assert!(cache.bookmarks().get("movie", "603").unwrap().is_none());
        let backups = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".bak"))
            .count();
        assert!(backups >= 1);
    }

    struct Declines;

    impl ProgressReporter for Declines {
        fn is_interactive(&self) -> bool {
            true
        }

        fn begin(&self, _title: &str) {}

        fn update(&self, _percent: u8, _message: &str) {}

        fn confirm(&self, _message: &str) -> bool {
            false
        }

        fn finish(&self) {}
    }

    #[test]
    fn test_declined_rebuild_surfaces_structural() {
        let dir = TempDir::new().unwrap();
        let cache = MediaCache::builder(CacheConfig::new(dir.path()))
            .settings(Arc::new(MemorySettings::new()))
            .progress(Arc::new(Declines))
            .open()
            .unwrap();
        let exec = cache.executor();
        exec.execute(&exec.prepare("t", "DROP TABLE genre_cache"), &[]).unwrap();

        let err = cache.genres().get("movie", "28").unwrap_err();
        assert!(err.is_structural());
    }
}
