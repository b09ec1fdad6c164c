//! Retrying statement executor.
//!
//! Every statement the cache runs goes through [`StatementExecutor`]:
//!
//! 1. writes on the embedded backend take a [`ConcurrencyThrottle`] permit
//!    for the whole call
//! 2. a pooled handle is checked out for the calling thread
//! 3. the statement runs; a busy/locked failure invalidates the handle and
//!    retries on a fresh one, up to [`MAX_TRIES`] attempts
//! 4. a missing table or column is reported as [`Error::Structural`] at once
//! 5. anything else rolls back, drops the handle and returns [`Error::Driver`]
//!
//! The number of lock errors a write saw is fed to the throttle once the
//! write has finished, whether it succeeded or ran out of attempts.

use super::dialect::Dialect;
use super::driver::{
    Backend, BackendKind, Connection, DriverError, DriverErrorKind, DriverResult,
};
use super::pool::ConnectionManager;
use super::schema::TableDef;
use super::metrics::record_operation_metrics;
use super::throttle::ConcurrencyThrottle;
use super::value::{Row, Value};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Instant;

/// Attempts per statement before a lock error becomes fatal.
pub const MAX_TRIES: u32 = 5;

/// Attempts for the `BEGIN` of an explicit transaction.
const MAX_BEGIN_TRIES: u32 = MAX_TRIES;

/// Whether a statement reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Row-returning statement.
    Read,
    /// Anything that modifies data or schema.
    Write,
}

impl StatementKind {
    /// Classifies SQL by its leading keyword.
    #[must_use]
    pub fn classify(sql: &str) -> Self {
        let head: String = sql
            .trim_start()
            .chars()
            .take_while(char::is_ascii_alphabetic)
            .collect::<String>()
            .to_ascii_uppercase();
        match head.as_str() {
            "SELECT" | "SHOW" | "WITH" => Self::Read,
            _ => Self::Write,
        }
    }
}

/// A statement already rewritten for the active dialect.
#[derive(Debug, Clone)]
pub struct Statement {
    label: &'static str,
    sql: String,
    kind: StatementKind,
}

impl Statement {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }

    /// Dialect-specific SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Read/write classification.
    #[must_use]
    pub const fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Returns `true` for writes.
    #[must_use]
    pub fn is_write(&self) -> bool {
        self.kind == StatementKind::Write
    }
}

/// Runs statements with pooling, throttling and lock retries.
pub struct StatementExecutor {
    pool: Arc<ConnectionManager>,
    throttle: Option<Arc<ConcurrencyThrottle>>,
}

impl StatementExecutor {
    /// Creates an executor.
    ///
    /// The throttle only applies to the embedded backend; it is ignored for
    /// networked backends.
    #[must_use]
    pub fn new(pool: Arc<ConnectionManager>, throttle: Option<Arc<ConcurrencyThrottle>>) -> Self {
        let throttle = match pool.backend().kind() {
            BackendKind::Embedded => throttle,
            BackendKind::Networked => None,
        };
        Self { pool, throttle }
    }

    /// The backend statements run against.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        self.pool.backend()
    }

    /// Backend family.
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        self.pool.backend().kind()
    }

    /// The active SQL dialect.
    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        self.pool.backend().dialect()
    }

    /// The connection pool.
    #[must_use]
    pub fn pool(&self) -> &Arc<ConnectionManager> {
        &self.pool
    }

    /// The write throttle, present only on the embedded backend.
    #[must_use]
    pub fn throttle(&self) -> Option<&Arc<ConcurrencyThrottle>> {
        self.throttle.as_ref()
    }

    /// Compiles a `?`-placeholder template for the active dialect.
    #[must_use]
    pub fn prepare(&self, label: &'static str, template: &str) -> Statement {
        let sql = self.dialect().normalize(template);
        let kind = StatementKind::classify(&sql);
        Statement { label, sql, kind }
    }

    /// Compiles the insert-or-replace statement for every non-surrogate
    /// column of `table`.
    #[must_use]
    pub fn upsert(&self, label: &'static str, table: &TableDef) -> Statement {
        self.upsert_columns(label, table, &table.data_column_names())
    }

    /// Compiles the insert-or-replace statement for `columns` of `table`.
    #[must_use]
    pub fn upsert_columns(
        &self,
        label: &'static str,
        table: &TableDef,
        columns: &[&str],
    ) -> Statement {
        Statement {
            label,
            sql: self.dialect().upsert(table, columns),
            kind: StatementKind::Write,
        }
    }

    /// Compiles a DDL or maintenance statement that is already dialect-specific.
    #[must_use]
    pub fn raw(&self, label: &'static str, sql: String) -> Statement {
        let kind = StatementKind::classify(&sql);
        Statement { label, sql, kind }
    }

    /// Runs a row-returning statement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] for missing tables or columns and
    /// [`Error::Driver`] for any other failure, including exhausted lock
    /// retries.
    pub fn query(&self, stmt: &Statement, params: &[Value]) -> Result<Vec<Row>> {
        self.run(stmt, |conn| conn.query(&stmt.sql, params))
    }

    /// Runs a statement and returns the affected row count.
    ///
    /// # Errors
    ///
    /// Same as [`query`](Self::query).
    pub fn execute(&self, stmt: &Statement, params: &[Value]) -> Result<u64> {
        self.run(stmt, |conn| conn.execute(&stmt.sql, params))
    }

    /// Runs `f` inside one explicit transaction on one handle.
    ///
    /// Commits when `f` returns `Ok`, rolls back and returns the error when it
    /// returns `Err`. On the embedded backend one write permit is held for
    /// the whole transaction.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or a driver error from `BEGIN`/`COMMIT`.
    pub fn transaction<T, F>(&self, label: &'static str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Cursor<'_>) -> Result<T>,
    {
        let start = Instant::now();
        let backend = self.dialect().name();
        let _permit = self.throttle.as_ref().map(|t| t.acquire()).transpose()?;

        let mut locks = 0_u32;
        let mut conn = loop {
            let mut conn = self.pool.checkout()?;
            match conn.begin() {
                Ok(()) => break conn,
                Err(e) if e.kind == DriverErrorKind::Busy && locks + 1 < MAX_BEGIN_TRIES => {
                    locks += 1;
                    conn.invalidate();
                    metrics::counter!("cache_lock_retries_total", "operation" => label)
                        .increment(1);
                    tracing::debug!(operation = label, attempt = locks, "Lock on BEGIN, retrying");
                },
                Err(e) => {
                    conn.invalidate();
                    self.record_write(locks + u32::from(e.kind == DriverErrorKind::Busy));
                    record_operation_metrics(backend, label, start, "error");
                    return Err(map_driver_error(label, e));
                },
            }
        };

        let outcome = {
            let mut cursor = Cursor {
                conn: &mut *conn,
                label,
            };
            f(&mut cursor)
        };

        let result = match outcome {
            Ok(value) => match conn.commit() {
                Ok(()) => Ok(value),
                Err(e) => {
                    let _ = conn.rollback();
                    conn.invalidate();
                    Err(map_driver_error(label, e))
                },
            },
            Err(err) => {
                if conn.rollback().is_err() {
                    conn.invalidate();
                }
                tracing::debug!(operation = label, error = %err, "Transaction rolled back");
                Err(err)
            },
        };

        self.record_write(locks);
        let status = if result.is_ok() { "success" } else { "error" };
        record_operation_metrics(backend, label, start, status);
        result
    }

    fn run<T, F>(&self, stmt: &Statement, mut op: F) -> Result<T>
    where
        F: FnMut(&mut dyn Connection) -> DriverResult<T>,
    {
        let start = Instant::now();
        let backend = self.dialect().name();
        let _permit = if stmt.is_write() {
            self.throttle.as_ref().map(|t| t.acquire()).transpose()?
        } else {
            None
        };

        let mut locks = 0_u32;
        let mut last_error = None;
        for attempt in 1..=MAX_TRIES {
            let mut conn = self.pool.checkout()?;
            match op(&mut *conn) {
                Ok(value) => {
                    if stmt.is_write() {
                        self.record_write(locks);
                    }
                    record_operation_metrics(backend, stmt.label, start, "success");
                    return Ok(value);
                },
                Err(e) => match e.kind {
                    DriverErrorKind::Busy => {
                        locks += 1;
                        conn.invalidate();
                        metrics::counter!("cache_lock_retries_total", "operation" => stmt.label)
                            .increment(1);
                        tracing::debug!(
                            operation = stmt.label,
                            attempt,
                            error = %e.message,
                            "Database locked, retrying on a fresh handle"
                        );
                        last_error = Some(e);
                    },
                    DriverErrorKind::MissingObject => {
                        conn.invalidate();
                        record_operation_metrics(backend, stmt.label, start, "error");
                        tracing::warn!(operation = stmt.label, error = %e.message, "Schema object missing");
                        return Err(Error::Structural(format!("{}: {}", stmt.label, e.message)));
                    },
                    DriverErrorKind::Other => {
                        if conn.in_transaction() {
                            let _ = conn.rollback();
                        }
                        conn.invalidate();
                        record_operation_metrics(backend, stmt.label, start, "error");
                        tracing::error!(operation = stmt.label, error = %e.message, "Statement failed");
                        return Err(Error::Driver {
                            operation: stmt.label.to_string(),
                            cause: e.message,
                        });
                    },
                },
            }
        }

        if stmt.is_write() {
            self.record_write(locks);
        }
        record_operation_metrics(backend, stmt.label, start, "locked");
        let cause = last_error.map_or_else(String::new, |e| e.message);
        tracing::warn!(operation = stmt.label, attempts = MAX_TRIES, "Giving up on locked database");
        Err(Error::Driver {
            operation: stmt.label.to_string(),
            cause: format!("database locked after {MAX_TRIES} attempts: {cause}"),
        })
    }

    fn record_write(&self, locks: u32) {
        if let Some(throttle) = &self.throttle {
            throttle.record_write(locks);
        }
    }
}

fn map_driver_error(label: &str, e: DriverError) -> Error {
    match e.kind {
        DriverErrorKind::MissingObject => Error::Structural(format!("{label}: {}", e.message)),
        DriverErrorKind::Busy | DriverErrorKind::Other => Error::Driver {
            operation: label.to_string(),
            cause: e.message,
        },
    }
}

/// Statement runner handed to [`StatementExecutor::transaction`] closures.
///
/// Statements run on the transaction's handle without retries.
pub struct Cursor<'a> {
    conn: &'a mut dyn Connection,
    label: &'static str,
}

impl Cursor<'_> {
    /// Runs a row-returning statement inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] or [`Error::Driver`].
    pub fn query(&mut self, stmt: &Statement, params: &[Value]) -> Result<Vec<Row>> {
        self.conn
            .query(&stmt.sql, params)
            .map_err(|e| map_driver_error(stmt.label, e))
    }

    /// Runs a statement inside the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Structural`] or [`Error::Driver`].
    pub fn execute(&mut self, stmt: &Statement, params: &[Value]) -> Result<u64> {
        self.conn
            .execute(&stmt.sql, params)
            .map_err(|e| map_driver_error(stmt.label, e))
    }

    /// Label of the enclosing transaction.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemorySettings;
    use crate::sql_params;
    use crate::storage::sqlite::SqliteBackend;
    use std::time::Duration;
    use tempfile::TempDir;
    use test_case::test_case;

    fn executor(dir: &TempDir) -> StatementExecutor {
        let backend: Arc<dyn Backend> = Arc::new(SqliteBackend::new(dir.path().join("exec.db")));
        let pool = Arc::new(ConnectionManager::new(backend, Duration::from_secs(60)));
        let throttle = Arc::new(ConcurrencyThrottle::new(
            2,
            Arc::new(MemorySettings::new()),
            1_000,
        ));
        StatementExecutor::new(pool, Some(throttle))
    }

    #[test_case("SELECT 1", StatementKind::Read ; "select")]
    #[test_case("  with x as (select 1) select * from x", StatementKind::Read ; "with")]
    #[test_case("SHOW server_version", StatementKind::Read ; "show")]
    #[test_case("INSERT INTO t VALUES (1)", StatementKind::Write ; "insert")]
    #[test_case("DELETE FROM t", StatementKind::Write ; "delete")]
    #[test_case("CREATE TABLE t (a TEXT)", StatementKind::Write ; "ddl")]
    fn test_statement_classification(sql: &str, expected: StatementKind) {
        assert_eq!(StatementKind::classify(sql), expected);
    }

    #[test]
    fn test_execute_and_query() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);

        let create = exec.prepare("test.create", "CREATE TABLE t (a TEXT, b INTEGER)");
        exec.execute(&create, &[]).unwrap();
        let insert = exec.prepare("test.insert", "INSERT INTO t (a, b) VALUES (?, ?)");
        assert!(insert.is_write());
        assert_eq!(exec.execute(&insert, &sql_params!["x", 1_i64]).unwrap(), 1);

        let select = exec.prepare("test.select", "SELECT a, b FROM t WHERE a = ?");
        assert_eq!(select.kind(), StatementKind::Read);
        let rows = exec.query(&select, &sql_params!["x"]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].integer(1), Some(1));

        let tuning = exec.throttle().unwrap().tuning();
        assert_eq!(tuning.writes, 2);
        assert_eq!(tuning.locks, 0);
    }

    #[test]
    fn test_missing_table_is_structural() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);

        let select = exec.prepare("test.select", "SELECT a FROM nowhere");
        let err = exec.query(&select, &[]).unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn test_syntax_error_is_driver_error() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);

        let bad = exec.prepare("test.bad", "INSERT INTO");
        let err = exec.execute(&bad, &[]).unwrap_err();
        assert!(matches!(err, Error::Driver { .. }));
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        exec.execute(&exec.prepare("c", "CREATE TABLE t (a TEXT)"), &[])
            .unwrap();
        let insert = exec.prepare("i", "INSERT INTO t (a) VALUES (?)");
        let count = exec.prepare("n", "SELECT COUNT(*) FROM t");

        exec.transaction("test.tx", |cursor| {
            cursor.execute(&insert, &sql_params!["a"])?;
            cursor.execute(&insert, &sql_params!["b"])?;
            Ok(())
        })
        .unwrap();

        let rows = exec.query(&count, &[]).unwrap();
        assert_eq!(rows[0].integer(0), Some(2));
    }

    #[test]
    fn test_transaction_rolls_back_on_err() {
        let dir = TempDir::new().unwrap();
        let exec = executor(&dir);
        exec.execute(&exec.prepare("c", "CREATE TABLE t (a TEXT)"), &[])
            .unwrap();
        let insert = exec.prepare("i", "INSERT INTO t (a) VALUES (?)");
        let count = exec.prepare("n", "SELECT COUNT(*) FROM t");

        let result: Result<()> = exec.transaction("test.tx", |cursor| {
            cursor.execute(&insert, &sql_params!["a"])?;
            Err(Error::InvalidInput("abort".to_string()))
        });
        assert!(matches!(result, Err(Error::InvalidInput(_))));

        let rows = exec.query(&count, &[]).unwrap();
        assert_eq!(rows[0].integer(0), Some(0));
    }
}
