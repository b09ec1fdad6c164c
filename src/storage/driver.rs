//! Backend driver seam.
//!
//! A [`Backend`] knows how to open native connections and which
//! [`Dialect`] they speak. A [`Connection`] runs already-normalized SQL and
//! reports failures as [`DriverError`]s classified into the three kinds the
//! executor reacts to differently.

use super::dialect::Dialect;
use super::value::{Row, Value};
use std::fmt;
use std::path::PathBuf;

/// Which family of engine a backend is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-process single-file engine.
    Embedded,
    /// Client/server engine reached over a connection.
    Networked,
}

impl BackendKind {
    /// Returns the name used in logs and metrics labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Embedded => "embedded",
            Self::Networked => "networked",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the executor should react to a driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Resource busy or locked; worth retrying on a fresh handle.
    Busy,
    /// A table or column the statement needs does not exist.
    MissingObject,
    /// Anything else.
    Other,
}

/// A classified backend failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    /// Classification.
    pub kind: DriverErrorKind,
    /// Driver message.
    pub message: String,
}

impl DriverError {
    /// Creates a driver error.
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates an unclassified driver error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Other, message)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for DriverError {}

/// Result of a driver call.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// An open native database handle.
pub trait Connection: Send {
    /// Runs a row-returning statement.
    fn query(&mut self, sql: &str, params: &[Value]) -> DriverResult<Vec<Row>>;

    /// Runs a statement and returns the number of affected rows.
    fn execute(&mut self, sql: &str, params: &[Value]) -> DriverResult<u64>;

    /// Starts an explicit transaction.
    fn begin(&mut self) -> DriverResult<()>;

    /// Commits the open transaction.
    fn commit(&mut self) -> DriverResult<()>;

    /// Rolls back the open transaction.
    fn rollback(&mut self) -> DriverResult<()>;

    /// Returns `true` while an explicit transaction is open.
    fn in_transaction(&self) -> bool;
}

/// A configured database engine.
pub trait Backend: Send + Sync {
    /// Engine family.
    fn kind(&self) -> BackendKind;

    /// SQL dialect spoken by this backend's connections.
    fn dialect(&self) -> &dyn Dialect;

    /// Opens a new native connection.
    fn open(&self) -> DriverResult<Box<dyn Connection>>;

    /// Files that make up the store on disk (empty for networked backends).
    fn storage_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Human-readable location for logs.
    fn describe(&self) -> String;
}
