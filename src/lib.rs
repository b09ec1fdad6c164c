//! # mediacache
//!
//! Persistence and caching core for a media-metadata application.
//!
//! Stores fetched network responses, memoized function results, artwork
//! URLs, external-ID cross-references and small user lists, backed by either
//! an embedded `SQLite` file or a networked PostgreSQL server (`postgres`
//! feature).
//!
//! ## Layers
//!
//! - [`storage`]: backends, dialects, the keyed connection pool, the
//!   write-concurrency throttle and the retrying statement executor
//! - [`cache`]: per-purpose namespaces (URL cache, function cache, images,
//!   ID mappings, related URLs and user lists)
//! - [`migration`]: schema versioning, snapshot export/import and recovery
//!
//! ## Example
//!
//! ```rust,ignore
//! use mediacache::{CacheConfig, MediaCache};
//! use std::time::Duration;
//!
//! let cache = MediaCache::open(CacheConfig::load_default())?;
//! cache.urls().set("https://example.org", b"<html>ok</html>", "", &headers)?;
//! let response = cache.urls().get("https://example.org", "", Duration::from_secs(8 * 3600))?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;
use thiserror::Error as ThisError;

pub mod cache;
pub mod clock;
pub mod config;
pub mod migration;
pub mod observability;
pub mod storage;

pub use cache::{
    Bookmark, Bookmarks, CachedResponse, FunctionCache, GenreCache, IdMapping, ImageCache,
    ImageKey, ImageSet, MediaCache, OtherLists, RelatedUrlKey, RelatedUrls, SavedSearch,
    SavedSearches, UrlCache,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BackendConfig, CacheConfig, FileSettings, MemorySettings, SettingsStore};
pub use migration::{MigrationOutcome, RecoveryController, SchemaMigrator};
pub use observability::{NoopProgress, ProgressReporter};
pub use storage::{BackendKind, StatementExecutor};

/// Application schema version recorded in the `cache_version` table.
///
/// A mismatch between this value and the recorded one triggers a
/// snapshot migration on startup.
pub const SCHEMA_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error type for cache operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Malformed configuration, unknown namespace names |
/// | `OperationFailed` | I/O, serialization, throttle permit timeouts |
/// | `Structural` | An expected table or column is missing |
/// | `Driver` | Any other backend error, including exhausted lock retries |
/// | `Export` / `Import` | Snapshot migration fails |
/// | `Reset` | The database file could be neither renamed nor deleted |
/// | `Cancelled` | The progress surface cancelled a snapshot import |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An operation failed outside the database driver.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },

    /// An expected schema object is missing.
    ///
    /// Routed to the [`RecoveryController`], which rebuilds the schema.
    #[error("schema is missing an expected table or column: {0}")]
    Structural(String),

    /// The backend driver reported a non-recoverable error.
    #[error("database operation '{operation}' failed: {cause}")]
    Driver {
        /// The operation that failed.
        operation: String,
        /// The driver's message.
        cause: String,
    },

    /// Exporting the durable tables to a snapshot failed.
    #[error("snapshot export failed: {0}")]
    Export(String),

    /// Reimporting a snapshot failed.
    #[error("snapshot import failed at record {line}: {cause}")]
    Import {
        /// 1-based record number in the snapshot file.
        line: usize,
        /// The underlying cause.
        cause: String,
    },

    /// The database could not be reset.
    #[error(
        "could not reset database at {}: {cause}; close the host application and delete the file manually",
        path.display()
    )]
    Reset {
        /// Database file that could not be removed.
        path: PathBuf,
        /// The last rename/delete error.
        cause: String,
    },

    /// A snapshot import was cancelled by the user.
    #[error("snapshot import cancelled")]
    Cancelled,
}

impl Error {
    /// Returns `true` for missing-table/column errors.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Structural(_))
    }

    pub(crate) fn failed(operation: &str, cause: impl std::fmt::Display) -> Self {
        Self::OperationFailed {
            operation: operation.to_string(),
            cause: cause.to_string(),
        }
    }
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in seconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
