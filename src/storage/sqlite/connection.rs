//! `SQLite` connection handling.

use crate::storage::driver::{Connection, DriverError, DriverErrorKind, DriverResult};
use crate::storage::value::{Row, Value};
use rusqlite::ffi::ErrorCode;
use std::time::Duration;

/// Configures a `SQLite` connection for concurrent use.
///
/// # Configuration Applied
///
/// - **WAL mode**: readers do not block the single writer
/// - **NORMAL synchronous**: balances durability with performance
/// - **`busy_timeout`**: waits up to `busy_timeout` for locks before the
///   driver reports `SQLITE_BUSY`
pub fn configure_connection(conn: &rusqlite::Connection, busy_timeout: Duration) {
    // journal_mode returns a row, so pragma_update's result is ignored
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    let _ = conn.pragma_update(None, "synchronous", "NORMAL");
    let _ = conn.busy_timeout(busy_timeout);
}

/// Classifies a rusqlite error for the executor.
///
/// `SQLITE_BUSY` and `SQLITE_LOCKED` are transient. "no such table" and
/// column errors mean the schema is out of date.
pub fn classify(err: &rusqlite::Error) -> DriverError {
    if matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    ) {
        return DriverError::new(DriverErrorKind::Busy, err.to_string());
    }

    let message = err.to_string();
    if is_missing_object_message(&message) {
        return DriverError::new(DriverErrorKind::MissingObject, message);
    }
    DriverError::other(message)
}

fn is_missing_object_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("no such table")
        || lower.contains("no such column")
        || lower.contains("has no column named")
}

#[allow(clippy::needless_pass_by_value)]
fn classify_owned(err: rusqlite::Error) -> DriverError {
    classify(&err)
}

/// A native `SQLite` handle.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl SqliteConnection {
    /// Wraps an open rusqlite connection.
    #[must_use]
    pub const fn new(conn: rusqlite::Connection) -> Self {
        Self { conn }
    }
}

impl Connection for SqliteConnection {
    fn query(&mut self, sql: &str, params: &[Value]) -> DriverResult<Vec<Row>> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(classify_owned)?;
        let columns = stmt.column_count();
        let mapped = stmt
            .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                (0..columns)
                    .map(|i| row.get_ref(i).map(Value::from))
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map(Row)
            })
            .map_err(classify_owned)?;
        let rows = mapped.collect::<rusqlite::Result<Vec<_>>>();
        rows.map_err(classify_owned)
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<u64> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(classify_owned)?;
        let affected = stmt
            .execute(rusqlite::params_from_iter(params.iter()))
            .map_err(classify_owned)?;
        Ok(affected as u64)
    }

    fn begin(&mut self) -> DriverResult<()> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(classify_owned)
    }

    fn commit(&mut self) -> DriverResult<()> {
        self.conn.execute_batch("COMMIT").map_err(classify_owned)
    }

    fn rollback(&mut self) -> DriverResult<()> {
        self.conn.execute_batch("ROLLBACK").map_err(classify_owned)
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_connection() -> SqliteConnection {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        configure_connection(&conn, Duration::from_secs(5));
        SqliteConnection::new(conn)
    }

    #[test]
    fn test_configure_connection() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        configure_connection(&conn, Duration::from_millis(5000));

        // In-memory databases report "memory" instead of "wal"
        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert!(
            journal_mode.eq_ignore_ascii_case("wal") || journal_mode.eq_ignore_ascii_case("memory"),
            "unexpected journal mode '{journal_mode}'"
        );

        let synchronous: i32 = conn
            .pragma_query_value(None, "synchronous", |row| row.get(0))
            .unwrap();
        assert_eq!(synchronous, 1);

        let busy_timeout: i32 = conn
            .pragma_query_value(None, "busy_timeout", |row| row.get(0))
            .unwrap();
        assert_eq!(busy_timeout, 5000);
    }

    #[test]
    fn test_missing_table_is_classified() {
        let mut conn = memory_connection();
        let err = conn.query("SELECT a FROM missing", &[]).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::MissingObject);
    }

    #[test]
    fn test_missing_column_is_classified() {
        let mut conn = memory_connection();
        conn.execute("CREATE TABLE t (a TEXT)", &[]).unwrap();
        let err = conn
            .execute("INSERT INTO t (b) VALUES (?)", &[Value::from("x")])
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::MissingObject);
    }

    #[test]
    fn test_syntax_error_is_other() {
        let mut conn = memory_connection();
        let err = conn.execute("NOT SQL AT ALL", &[]).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Other);
    }

    #[test]
    fn test_query_and_transaction_state() {
        let mut conn = memory_connection();
        conn.execute("CREATE TABLE t (a TEXT, b INTEGER, c BLOB)", &[])
            .unwrap();

        conn.begin().unwrap();
        assert!(conn.in_transaction());
        conn.execute(
            "INSERT INTO t VALUES (?, ?, ?)",
            &[Value::from("x"), Value::Integer(3), Value::Null],
        )
        .unwrap();
        conn.commit().unwrap();
        assert!(!conn.in_transaction());

        let rows = conn.query("SELECT a, b, c FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text(0).as_deref(), Some("x"));
        assert_eq!(rows[0].integer(1), Some(3));
        assert_eq!(rows[0].get(2), Some(&Value::Null));
    }

    #[test]
    fn test_busy_is_classified() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("busy.db");

        let holder = rusqlite::Connection::open(&path).unwrap();
        holder.execute_batch("CREATE TABLE t (a TEXT)").unwrap();
        holder.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let other = rusqlite::Connection::open(&path).unwrap();
        other.busy_timeout(Duration::from_millis(10)).unwrap();
        let mut other = SqliteConnection::new(other);
        let err = other
            .execute("INSERT INTO t VALUES (?)", &[Value::from("x")])
            .unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::Busy);
    }
}
