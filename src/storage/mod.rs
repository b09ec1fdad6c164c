//! Storage layer.
//!
//! Bottom-up:
//! - **Backends**: embedded `SQLite` ([`sqlite`]) and networked PostgreSQL
//!   ([`postgresql`], `postgres` feature), behind the [`Backend`] and
//!   [`Connection`] traits
//! - **Dialects**: placeholder style, upsert form and DDL per engine
//! - **Pool**: one native handle per calling thread ([`ConnectionManager`])
//! - **Throttle**: self-tuning write permits for the embedded backend
//! - **Executor**: retrying statement runner used by every cache namespace,
//!   timed through [`metrics::record_operation_metrics`]

// Capacity gauges are reported as f64.
#![allow(clippy::cast_precision_loss)]
// Pool guards are held for the whole statement on purpose.
#![allow(clippy::significant_drop_tightening)]

pub mod dialect;
pub mod driver;
pub mod executor;
pub mod metrics;
pub mod pool;
pub mod postgresql;
pub mod schema;
pub mod sqlite;
pub mod throttle;
pub mod value;

pub use dialect::{Dialect, PostgresDialect, SqliteDialect};
pub use driver::{Backend, BackendKind, Connection, DriverError, DriverErrorKind, DriverResult};
pub use executor::{Cursor, MAX_TRIES, Statement, StatementExecutor, StatementKind};
pub use pool::{ConnectionManager, PooledConnection};
#[cfg(feature = "postgres")]
pub use postgresql::PostgresBackend;
pub use schema::{Column, ColumnType, TableDef};
pub use sqlite::SqliteBackend;
pub use throttle::{CapacityChange, ConcurrencyThrottle, TuningState, WritePermit};
pub use value::{Row, Value};

use crate::config::{BackendConfig, CacheConfig};
use crate::Result;
use std::sync::Arc;

/// Builds the backend selected by `config`.
///
/// # Errors
///
/// Returns [`crate::Error::InvalidInput`] when PostgreSQL is selected but the
/// crate was built without the `postgres` feature.
pub fn open_backend(config: &CacheConfig) -> Result<Arc<dyn Backend>> {
    match &config.backend {
        BackendConfig::Sqlite { .. } => {
            let path = config
                .sqlite_path()
                .unwrap_or_else(|| config.paths().database_path());
            let backend = SqliteBackend::new(path).with_busy_timeout(config.pool.connect_timeout);
            Ok(Arc::new(backend))
        },
        #[cfg(feature = "postgres")]
        BackendConfig::Postgres(pg) => Ok(Arc::new(PostgresBackend::new(
            pg,
            config.pool.connect_timeout,
        )?)),
        #[cfg(not(feature = "postgres"))]
        BackendConfig::Postgres(_) => Err(crate::Error::InvalidInput(
            "PostgreSQL backend requires the 'postgres' feature".to_string(),
        )),
    }
}
