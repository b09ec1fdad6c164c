//! Cache namespaces and the [`MediaCache`] facade.
//!
//! Each namespace owns one table, compiles its statements once for the
//! active dialect, and routes every operation through the
//! [`RecoveryController`] so a missing table or column triggers a schema
//! migration and one retry instead of an error.

mod function;
mod id_mapping;
mod image;
mod lists;
mod related;
mod url;

pub use function::{FunctionCache, MAX_RESULT_BYTES};
pub use id_mapping::{ExternalIdStore, IdMapping};
pub use image::{ImageCache, ImageKey, ImageSet};
pub use lists::{Bookmark, Bookmarks, Genre, GenreCache, ListEntry, OtherLists, SavedSearch, SavedSearches};
pub use related::{RelatedUrlKey, RelatedUrls};
pub use url::{CachedResponse, UrlCache};

use crate::clock::{Clock, SystemClock};
use crate::config::{CacheConfig, FileSettings, SettingsStore};
use crate::migration::{MigrationOutcome, RecoveryController, SchemaMigrator};
use crate::observability::{NoopProgress, ProgressReporter};
use crate::storage::{
    self, Backend, ConcurrencyThrottle, ConnectionManager, Statement, StatementExecutor, TableDef,
};
use crate::{Error, Result};
use std::borrow::Cow;
use std::sync::Arc;

/// Every cache table, in creation and export order.
pub const TABLES: &[TableDef] = &[
    url::TABLE,
    function::TABLE,
    image::TABLE,
    id_mapping::TABLE,
    related::TABLE,
    lists::SAVED_SEARCHES,
    lists::BOOKMARKS,
    lists::OTHER_LISTS,
    lists::GENRES,
];

/// Looks up a cache table by name.
#[must_use]
pub fn table(name: &str) -> Option<&'static TableDef> {
    TABLES.iter().find(|t| t.name == name)
}

/// Shared state behind every namespace.
pub struct CacheStore {
    executor: Arc<StatementExecutor>,
    recovery: Arc<RecoveryController>,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    /// Creates the shared store.
    #[must_use]
    pub fn new(
        executor: Arc<StatementExecutor>,
        recovery: Arc<RecoveryController>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            executor,
            recovery,
            clock,
        }
    }

    /// The statement executor.
    #[must_use]
    pub fn executor(&self) -> &StatementExecutor {
        &self.executor
    }

    /// Current time in Unix seconds.
    #[must_use]
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    /// Runs a namespace operation with structural-error recovery.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or the recovery error if the schema
    /// could not be repaired.
    pub fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        self.recovery.run(operation, f)
    }

    /// Truncates a key value to its column bound on backends that enforce one.
    #[must_use]
    pub fn bound<'a>(&self, table: &TableDef, column: &str, value: &'a str) -> Cow<'a, str> {
        table.column(column).map_or(Cow::Borrowed(value), |c| {
            self.executor.dialect().bound_key(value, c.ty)
        })
    }
}

/// Entry point: one backend, every namespace.
pub struct MediaCache {
    config: CacheConfig,
    store: Arc<CacheStore>,
    migrator: Arc<SchemaMigrator>,
    recovery: Arc<RecoveryController>,
    counts: Vec<(&'static str, Statement)>,
    flushes: Vec<(&'static str, Statement)>,
    urls: UrlCache,
    functions: FunctionCache,
    images: ImageCache,
    ids: IdMapping,
    related: RelatedUrls,
    saved_searches: SavedSearches,
    bookmarks: Bookmarks,
    other_lists: OtherLists,
    genres: GenreCache,
}

impl MediaCache {
    /// Opens the cache with default collaborators and brings the schema up
    /// to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be opened or the schema cannot
    /// be initialised, migrated or reset.
    pub fn open(config: CacheConfig) -> Result<Self> {
        Self::builder(config).open()
    }

    /// Starts a builder for injecting collaborators.
    #[must_use]
    pub fn builder(config: CacheConfig) -> MediaCacheBuilder {
        MediaCacheBuilder {
            config,
            settings: None,
            progress: None,
            clock: None,
            backend: None,
        }
    }

    /// Configuration the cache was opened with.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Network response cache.
    #[must_use]
    pub const fn urls(&self) -> &UrlCache {
        &self.urls
    }

    /// Memoized function results.
    #[must_use]
    pub const fn functions(&self) -> &FunctionCache {
        &self.functions
    }

    /// Artwork URLs.
    #[must_use]
    pub const fn images(&self) -> &ImageCache {
        &self.images
    }

    /// External ID cross-references.
    #[must_use]
    pub const fn ids(&self) -> &IdMapping {
        &self.ids
    }

    /// Related-URL hints.
    #[must_use]
    pub const fn related(&self) -> &RelatedUrls {
        &self.related
    }

    /// Saved searches.
    #[must_use]
    pub const fn saved_searches(&self) -> &SavedSearches {
        &self.saved_searches
    }

    /// Bookmarks.
    #[must_use]
    pub const fn bookmarks(&self) -> &Bookmarks {
        &self.bookmarks
    }

    /// Named lists.
    #[must_use]
    pub const fn other_lists(&self) -> &OtherLists {
        &self.other_lists
    }

    /// Genre names.
    #[must_use]
    pub const fn genres(&self) -> &GenreCache {
        &self.genres
    }

    /// The schema migrator.
    #[must_use]
    pub fn migrator(&self) -> &SchemaMigrator {
        &self.migrator
    }

    /// The recovery controller.
    #[must_use]
    pub fn recovery(&self) -> &RecoveryController {
        &self.recovery
    }

    /// The statement executor.
    #[must_use]
    pub fn executor(&self) -> &StatementExecutor {
        self.store.executor()
    }

    /// Row count per table.
    ///
    /// # Errors
    ///
    /// Returns an error if a count query fails after recovery.
    pub fn stats(&self) -> Result<Vec<(&'static str, u64)>> {
        self.counts
            .iter()
            .map(|(name, stmt)| {
                let rows = self
                    .store
                    .run("stats", || self.store.executor().query(stmt, &[]))?;
                let count = rows.first().and_then(|r| r.integer(0)).unwrap_or(0);
                Ok((*name, u64::try_from(count).unwrap_or(0)))
            })
            .collect()
    }

    /// Deletes every row of the named table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an unknown table name.
    pub fn flush(&self, table_name: &str) -> Result<u64> {
        let (_, stmt) = self
            .flushes
            .iter()
            .find(|(name, _)| *name == table_name)
            .ok_or_else(|| {
                let known: Vec<&str> = TABLES.iter().map(|t| t.name).collect();
                Error::InvalidInput(format!(
                    "unknown cache table '{table_name}' (expected one of: {})",
                    known.join(", ")
                ))
            })?;
        let removed = self
            .store
            .run("flush", || self.store.executor().execute(stmt, &[]))?;
        tracing::info!(table = table_name, removed, "Flushed cache table");
        Ok(removed)
    }

    /// Destroys and recreates the embedded database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] on a networked backend and
    /// [`Error::Reset`] if the database file can be neither renamed nor
    /// deleted.
    pub fn reset(&self) -> Result<()> {
        self.recovery.reset()
    }

    /// Closes every pooled handle.
    pub fn close(&self) {
        self.store.executor().pool().close_all();
    }
}

/// Builder for [`MediaCache`].
pub struct MediaCacheBuilder {
    config: CacheConfig,
    settings: Option<Arc<dyn SettingsStore>>,
    progress: Option<Arc<dyn ProgressReporter>>,
    clock: Option<Arc<dyn Clock>>,
    backend: Option<Arc<dyn Backend>>,
}

impl MediaCacheBuilder {
    /// Uses `settings` instead of `{data_dir}/settings.toml`.
    #[must_use]
    pub fn settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Reports migrations to `progress` instead of discarding them.
    #[must_use]
    pub fn progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Uses `clock` for timestamps and TTL checks.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Uses an already constructed backend instead of the configured one.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Opens the cache and brings the schema up to date.
    ///
    /// # Errors
    ///
    /// See [`MediaCache::open`].
    pub fn open(self) -> Result<MediaCache> {
        let (cache, outcome) = self.open_with_outcome()?;
        tracing::debug!(?outcome, "Cache schema ready");
        Ok(cache)
    }

    /// Like [`open`](Self::open), also returning what initialisation did.
    ///
    /// # Errors
    ///
    /// See [`MediaCache::open`].
    pub fn open_with_outcome(self) -> Result<(MediaCache, MigrationOutcome)> {
        let config = self.config;
        let paths = config.paths();
        paths.ensure_data_dir()?;

        let settings = match self.settings {
            Some(settings) => settings,
            None => Arc::new(FileSettings::open(paths.settings_path())?),
        };
        let progress = self
            .progress
            .unwrap_or_else(|| Arc::new(NoopProgress) as Arc<dyn ProgressReporter>);
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let backend = match self.backend {
            Some(backend) => backend,
            None => storage::open_backend(&config)?,
        };

        tracing::info!(backend = %backend.describe(), kind = %backend.kind(), "Opening media cache");

        let pool = Arc::new(ConnectionManager::new(backend, config.pool.idle_timeout));
        let throttle = Arc::new(ConcurrencyThrottle::new(
            config.throttle.writer_capacity,
            settings,
            config.throttle.acquire_timeout_ms,
        ));
        let executor = Arc::new(StatementExecutor::new(pool, Some(throttle)));
        let migrator = Arc::new(SchemaMigrator::new(
            Arc::clone(&executor),
            paths,
            Arc::clone(&progress),
            Arc::clone(&clock),
        ));
        let recovery = Arc::new(RecoveryController::new(
            Arc::clone(&executor),
            Arc::clone(&migrator),
            progress,
            config.recovery.clone(),
            Arc::clone(&clock),
        ));
        let store = Arc::new(CacheStore::new(
            Arc::clone(&executor),
            Arc::clone(&recovery),
            clock,
        ));

        let outcome = recovery.initialize()?;

        let counts = TABLES
            .iter()
            .map(|t| {
                (
                    t.name,
                    executor.prepare("stats.count", &format!("SELECT COUNT(*) FROM {}", t.name)),
                )
            })
            .collect();
        let flushes = TABLES
            .iter()
            .map(|t| (t.name, executor.prepare("flush.table", &format!("DELETE FROM {}", t.name))))
            .collect();

        let cache = MediaCache {
            urls: UrlCache::new(Arc::clone(&store)),
            functions: FunctionCache::new(Arc::clone(&store)),
            images: ImageCache::new(Arc::clone(&store)),
            ids: IdMapping::new(Arc::clone(&store)),
            related: RelatedUrls::new(Arc::clone(&store)),
            saved_searches: SavedSearches::new(Arc::clone(&store)),
            bookmarks: Bookmarks::new(Arc::clone(&store)),
            other_lists: OtherLists::new(Arc::clone(&store)),
            genres: GenreCache::new(Arc::clone(&store)),
            counts,
            flushes,
            config,
            store,
            migrator,
            recovery,
        };
        Ok((cache, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySettings;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> MediaCache {
        MediaCache::builder(CacheConfig::new(dir.path()))
            .settings(Arc::new(MemorySettings::new()))
            .open()
            .unwrap()
    }

    #[test]
    fn test_table_lookup() {
        assert!(table("bookmarks").is_some_and(|t| t.durable));
        assert!(table("url_cache").is_some_and(|t| !t.durable));
        assert!(table("nope").is_none());
    }

    #[test]
    fn test_open_creates_schema() {
        let dir = TempDir::new().unwrap();
        let (_, outcome) = MediaCache::builder(CacheConfig::new(dir.path()))
            .settings(Arc::new(MemorySettings::new()))
            .open_with_outcome()
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::Created);
        assert!(dir.path().join("mediacache.db").exists());

        let (_, outcome) = MediaCache::builder(CacheConfig::new(dir.path()))
            .settings(Arc::new(MemorySettings::new()))
            .open_with_outcome()
            .unwrap();
        assert_eq!(outcome, MigrationOutcome::UpToDate);
    }

    #[test]
    fn test_stats_and_flush() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);

        cache.genres().set("movie", "28", "Action").unwrap();
        cache.genres().set("movie", "35", "Comedy").unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.len(), TABLES.len());
        assert!(stats.contains(&("genre_cache", 2)));

        assert_eq!(cache.flush("genre_cache").unwrap(), 2);
        assert!(matches!(cache.flush("nope"), Err(Error::InvalidInput(_))));
    }
}
