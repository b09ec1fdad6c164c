//! Schema creation and version migration.
//!
//! On a version mismatch the durable tables are exported to a snapshot
//! file, every table is dropped, the current schema is created and the
//! snapshot is reimported row by row. Volatile tables (URL and function
//! caches) start empty.

use super::snapshot::{SnapshotFile, SnapshotRecord, SnapshotWriter, decode_field};
use crate::cache::{TABLES, table};
use crate::clock::Clock;
use crate::config::StoragePaths;
use crate::observability::ProgressReporter;
use crate::sql_params;
use crate::storage::{Column, ColumnType, Statement, StatementExecutor, TableDef, Value};
use crate::{Error, Result, SCHEMA_VERSION};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::instrument;

/// Table holding the single recorded schema version.
pub const VERSION_TABLE: TableDef = TableDef {
    name: "cache_version",
    columns: &[
        Column::required("id", ColumnType::Integer),
        Column::required("version", ColumnType::Text),
    ],
    key: &["id"],
    indexes: &[],
    durable: false,
};

/// Rows committed per import transaction.
const IMPORT_BATCH_ROWS: usize = 500;

/// What [`SchemaMigrator::init`] or [`SchemaMigrator::migrate`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Empty database; schema created.
    Created,
    /// Recorded version matched; nothing migrated.
    UpToDate,
    /// Durable data was carried over from another schema version.
    Migrated {
        /// Recorded version before the migration, if any.
        from: Option<String>,
        /// Rows reimported from the snapshot.
        rows: usize,
    },
}

/// Totals of one snapshot import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Rows written.
    pub rows: usize,
    /// Rows skipped because a field did not fit its column.
    pub skipped: usize,
    /// Whether the progress surface stopped the import early.
    pub cancelled: bool,
}

struct ImportTarget {
    table: &'static TableDef,
    statement: Statement,
    // Snapshot field index per inserted column; `None` takes the default
    sources: Vec<(Option<usize>, &'static Column)>,
}

struct PendingRow {
    statement: Statement,
    params: Vec<Value>,
    line: usize,
}

enum Section {
    Start,
    Header(&'static TableDef),
    Rows(ImportTarget),
    // Marker naming no durable table; any data row under it is fatal
    Unknown { table: String, header_seen: bool },
}

/// Creates, versions and migrates the cache schema.
pub struct SchemaMigrator {
    executor: Arc<StatementExecutor>,
    paths: StoragePaths,
    progress: Arc<dyn ProgressReporter>,
    clock: Arc<dyn Clock>,
    version: String,
    read_version: Statement,
    write_version: Statement,
    list_tables: Statement,
    lock: Mutex<()>,
}

impl SchemaMigrator {
    /// Creates a migrator for [`SCHEMA_VERSION`].
    #[must_use]
    pub fn new(
        executor: Arc<StatementExecutor>,
        paths: StoragePaths,
        progress: Arc<dyn ProgressReporter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let read_version = executor.prepare(
            "schema.version",
            "SELECT version FROM cache_version WHERE id = 1",
        );
        let write_version = executor.upsert("schema.record_version", &VERSION_TABLE);
        let list_tables = executor.raw(
            "schema.list_tables",
            executor.dialect().list_tables().to_string(),
        );
        Self {
            executor,
            paths,
            progress,
            clock,
            version: SCHEMA_VERSION.to_string(),
            read_version,
            write_version,
            list_tables,
            lock: Mutex::new(()),
        }
    }

    /// Expects `version` instead of [`SCHEMA_VERSION`].
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// The version this migrator brings the schema to.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Brings the schema to the expected version.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created or migrated.
    #[instrument(skip(self), fields(operation = "schema.init", version = %self.version))]
    pub fn init(&self) -> Result<MigrationOutcome> {
        match self.recorded_version()? {
            Some(recorded) if recorded == self.version => {
                self.create_schema()?;
                Ok(MigrationOutcome::UpToDate)
            },
            None if self.existing_tables()?.is_empty() => {
                self.create_schema()?;
                self.record_version()?;
                tracing::info!("Created cache schema");
                Ok(MigrationOutcome::Created)
            },
            prior => self.migrate(prior.as_deref()),
        }
    }

    /// Reads the recorded schema version; `None` when the version table is
    /// missing or empty.
    ///
    /// # Errors
    ///
    /// Returns a driver error other than a missing table.
    pub fn recorded_version(&self) -> Result<Option<String>> {
        match self.executor.query(&self.read_version, &[]) {
            Ok(rows) => Ok(rows.first().and_then(|r| r.text(0))),
            Err(Error::Structural(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Lists the cache tables present in the database.
    ///
    /// Tables the cache does not own are ignored, so a shared database keeps
    /// them through migrations and resets.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    pub fn existing_tables(&self) -> Result<Vec<String>> {
        let rows = self.executor.query(&self.list_tables, &[])?;
        Ok(rows
            .iter()
            .filter_map(|r| r.text(0))
            .filter(|name| is_cache_table(name))
            .collect())
    }

    /// Creates every missing table and index.
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails.
    pub fn create_schema(&self) -> Result<()> {
        let dialect = self.executor.dialect();
        for def in TABLES.iter().chain(std::iter::once(&VERSION_TABLE)) {
            for ddl in dialect.create_table(def) {
                self.executor
                    .execute(&self.executor.raw("schema.create", ddl), &[])?;
            }
        }
        Ok(())
    }

    /// Records the expected version.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn record_version(&self) -> Result<()> {
        self.executor
            .execute(&self.write_version, &sql_params![1_i64, self.version.as_str()])?;
        Ok(())
    }

    /// Drops every cache table in the database.
    ///
    /// # Errors
    ///
    /// Returns an error if a table cannot be dropped.
    pub fn drop_all(&self) -> Result<usize> {
        let tables = self.existing_tables()?;
        let dialect = self.executor.dialect();
        for name in &tables {
            self.executor
                .execute(&self.executor.raw("schema.drop", dialect.drop_table(name)), &[])?;
        }
        Ok(tables.len())
    }

    /// Carries durable data over to the expected schema version.
    ///
    /// `prior` is the recorded version, if known. Only one migration runs at
    /// a time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Export`] or [`Error::Import`] when the snapshot
    /// cannot be written or read back, or a driver error from the rebuild.
    /// The snapshot file is kept when the import fails.
    pub fn migrate(&self, prior: Option<&str>) -> Result<MigrationOutcome> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let start = Instant::now();
        tracing::info!(
            from = prior.unwrap_or("unknown"),
            to = %self.version,
            "Migrating cache schema"
        );

        self.progress.begin("Upgrading media cache");
        let result = self.migrate_locked(prior);
        self.progress.finish();

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::counter!("cache_migrations_total", "status" => status).increment(1);
        metrics::histogram!("cache_migration_duration_ms")
            .record(start.elapsed().as_millis() as f64);
        result
    }

    fn migrate_locked(&self, prior: Option<&str>) -> Result<MigrationOutcome> {
        let snapshot = self.paths.snapshot_path(self.clock.now());

        self.progress.update(0, "Saving cached data");
        let exported = self.export_snapshot(&snapshot)?;

        self.progress.update(30, "Rebuilding tables");
        let dropped = self.drop_all()?;
        self.create_schema()?;
        self.executor.pool().close_all();
        tracing::debug!(exported, dropped, "Schema rebuilt");

        self.progress.update(40, "Restoring cached data");
        let summary = self.import(&snapshot).inspect_err(|e| {
            tracing::error!(
                error = %e,
                snapshot = %snapshot.display(),
                "Snapshot import failed; keeping snapshot file"
            );
        })?;
        if summary.cancelled {
            tracing::warn!(rows = summary.rows, "Snapshot import cancelled; remaining rows dropped");
        }

        self.record_version()?;
        if let Err(e) = std::fs::remove_file(&snapshot) {
            tracing::warn!(error = %e, snapshot = %snapshot.display(), "Could not remove snapshot");
        }
        self.progress.update(100, "Done");

        tracing::info!(rows = summary.rows, skipped = summary.skipped, "Cache schema migrated");
        Ok(MigrationOutcome::Migrated {
            from: prior.map(ToString::to_string),
            rows: summary.rows,
        })
    }

    /// Writes every durable table to a snapshot file at `path`.
    ///
    /// Missing tables and columns are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Export`] if the file cannot be written or a table
    /// cannot be read.
    #[instrument(skip(self), fields(operation = "snapshot.export"))]
    pub fn export_snapshot(&self, path: &Path) -> Result<usize> {
        let recorded = self
            .recorded_version()
            .ok()
            .flatten()
            .unwrap_or_else(|| "unknown".to_string());
        let existing: BTreeSet<String> = self
            .existing_tables()
            .map_err(|e| Error::Export(e.to_string()))?
            .into_iter()
            .map(|t| t.to_ascii_lowercase())
            .collect();

        let mut writer = SnapshotWriter::create(path, &recorded)?;
        for def in TABLES.iter().filter(|t| t.durable) {
            if !existing.contains(def.name) {
                tracing::warn!(table = def.name, "Table missing, not exported");
                continue;
            }
            self.export_table(&mut writer, def)?;
        }
        let rows = writer.finish()?;
        tracing::info!(rows, path = %path.display(), "Exported snapshot");
        Ok(rows)
    }

    fn export_table<W: std::io::Write>(
        &self,
        writer: &mut SnapshotWriter<W>,
        def: &TableDef,
    ) -> Result<()> {
        let all = def.column_names();
        let rows = match self.select_columns(def, &all) {
            Err(Error::Structural(_)) => None,
            other => Some(other.map_err(|e| Error::Export(format!("{}: {e}", def.name)))?),
        };
        let (columns, rows) = match rows {
            Some(rows) => (all, rows),
            None => {
                let present = self.present_columns(def)?;
                if present.is_empty() {
                    tracing::warn!(table = def.name, "No known columns, not exported");
                    return Ok(());
                }
                let rows = self
                    .select_columns(def, &present)
                    .map_err(|e| Error::Export(format!("{}: {e}", def.name)))?;
                (present, rows)
            },
        };

        writer.begin_table(def.name, &columns)?;
        for row in rows {
            writer.write_row(&row.into_values())?;
        }
        Ok(())
    }

    fn select_columns(&self, def: &TableDef, columns: &[&str]) -> Result<Vec<crate::storage::Row>> {
        let sql = format!("SELECT {} FROM {}", columns.join(", "), def.name);
        self.executor
            .query(&self.executor.prepare("snapshot.export", &sql), &[])
    }

    fn present_columns(&self, def: &TableDef) -> Result<Vec<&'static str>> {
        let mut present = Vec::new();
        for column in def.columns {
            let sql = format!("SELECT {} FROM {} WHERE 1 = 0", column.name, def.name);
            match self
                .executor
                .query(&self.executor.prepare("snapshot.probe", &sql), &[])
            {
                Ok(_) => present.push(column.name),
                Err(Error::Structural(_)) => {
                    tracing::warn!(table = def.name, column = column.name, "Column missing, not exported");
                },
                Err(e) => return Err(Error::Export(format!("{}: {e}", def.name))),
            }
        }
        Ok(present)
    }

    /// Upserts every row of the snapshot at `path` into the current schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Import`] for unreadable files or a row that precedes
    /// every table marker, and [`Error::Cancelled`] if the progress surface
    /// stopped the import. Rows committed before cancellation stay.
    pub fn import_snapshot(&self, path: &Path) -> Result<usize> {
        let summary = self.import(path)?;
        if summary.cancelled {
            return Err(Error::Cancelled);
        }
        Ok(summary.rows)
    }

    #[instrument(skip(self), fields(operation = "snapshot.import"))]
    fn import(&self, path: &Path) -> Result<ImportSummary> {
        let file = SnapshotFile::read(path)?;
        tracing::info!(from_version = file.version(), "Importing snapshot");

        let total = file.len().max(1);
        let mut summary = ImportSummary::default();
        let mut section = Section::Start;
        let mut batch: Vec<PendingRow> = Vec::with_capacity(IMPORT_BATCH_ROWS);
        let mut touched: Vec<&'static TableDef> = Vec::new();

        for record in file.records() {
            let (line, offset, record) = record?;
            match record {
                SnapshotRecord::Table(name) => {
                    section = match table(&name).filter(|t| t.durable) {
                        Some(def) => Section::Header(def),
                        None => Section::Unknown {
                            table: name,
                            header_seen: false,
                        },
                    };
                },
                SnapshotRecord::Fields(fields) => match section {
                    Section::Start => {
                        return Err(Error::Import {
                            line,
                            cause: "row before any table marker".to_string(),
                        });
                    },
                    Section::Unknown {
                        ref mut header_seen,
                        ..
                    } if !*header_seen => *header_seen = true,
                    Section::Unknown { ref table, .. } => {
                        return Err(Error::Import {
                            line,
                            cause: format!("row under unknown table '{table}'"),
                        });
                    },
                    Section::Header(def) => {
                        let target = self.import_target(def, &fields);
                        if !touched.iter().any(|t| t.name == def.name) {
                            touched.push(def);
                        }
                        section = Section::Rows(target);
                    },
                    Section::Rows(ref target) => {
                        if self.progress.is_cancelled() {
                            self.flush_batch(&mut batch)?;
                            summary.cancelled = true;
                            break;
                        }
                        match row_params(target, &fields) {
                            Ok(params) => {
                                batch.push(PendingRow {
                                    statement: target.statement.clone(),
                                    params,
                                    line,
                                });
                                summary.rows += 1;
                            },
                            Err(cause) => {
                                tracing::warn!(table = target.table.name, line, cause = %cause, "Skipping snapshot row");
                                summary.skipped += 1;
                            },
                        }
                        if batch.len() >= IMPORT_BATCH_ROWS {
                            self.flush_batch(&mut batch)?;
                            let done = 40 + offset.saturating_mul(60) / total;
                            self.progress
                                .update(u8::try_from(done.min(99)).unwrap_or(99), "Restoring cached data");
                        }
                    },
                },
            }
        }
        self.flush_batch(&mut batch)?;
        self.sync_serials(&touched)?;
        Ok(summary)
    }

    fn import_target(&self, def: &'static TableDef, header: &[String]) -> ImportTarget {
        for name in header {
            if def.column(name).is_none() {
                tracing::warn!(table = def.name, column = %name, "Unknown column in snapshot, skipping");
            }
        }
        let sources: Vec<(Option<usize>, &'static Column)> = def
            .columns
            .iter()
            .filter_map(|column| {
                let source = header.iter().position(|h| h == column.name);
                // Absent nullable and serial columns are left to the database
                match (source, column.nullable || column.ty == ColumnType::Serial) {
                    (None, true) => None,
                    (source, _) => Some((source, column)),
                }
            })
            .collect();
        let columns: Vec<&str> = sources.iter().map(|(_, c)| c.name).collect();
        ImportTarget {
            table: def,
            statement: self
                .executor
                .upsert_columns("snapshot.import", def, &columns),
            sources,
        }
    }

    fn flush_batch(&self, batch: &mut Vec<PendingRow>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let rows = std::mem::take(batch);
        self.executor.transaction("snapshot.import", |cursor| {
            for row in &rows {
                cursor
                    .execute(&row.statement, &row.params)
                    .map_err(|e| Error::Import {
                        line: row.line,
                        cause: e.to_string(),
                    })?;
            }
            Ok(())
        })
    }

    fn sync_serials(&self, touched: &[&'static TableDef]) -> Result<()> {
        let dialect = self.executor.dialect();
        for def in touched {
            let Some(column) = def.serial_column() else {
                continue;
            };
            if let Some(sql) = dialect.sync_serial(def, column) {
                self.executor
                    .query(&self.executor.raw("snapshot.sync_serial", sql), &[])?;
            }
        }
        Ok(())
    }
}

fn is_cache_table(name: &str) -> bool {
    name.eq_ignore_ascii_case(VERSION_TABLE.name)
        || TABLES.iter().any(|t| t.name.eq_ignore_ascii_case(name))
}

fn row_params(target: &ImportTarget, fields: &[String]) -> std::result::Result<Vec<Value>, String> {
    target
        .sources
        .iter()
        .map(|(source, column)| match source.and_then(|i| fields.get(i)) {
            Some(field) => decode_field(field, column.ty),
            None => Ok(default_value(column)),
        })
        .collect()
}

fn default_value(column: &Column) -> Value {
    if column.nullable {
        return Value::Null;
    }
    match column.ty {
        ColumnType::Integer | ColumnType::Serial => Value::Integer(0),
        ColumnType::Text | ColumnType::Key(_) => Value::Text(String::new()),
        ColumnType::Blob => Value::Blob(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{CacheConfig, MemorySettings};
    use crate::MediaCache;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;
    use test_case::test_case;

    fn open(dir: &TempDir) -> MediaCache {
        MediaCache::builder(CacheConfig::new(dir.path()))
            .settings(Arc::new(MemorySettings::new()))
            .clock(Arc::new(ManualClock::new(1_700_000_000)))
            .open()
            .unwrap()
    }

    #[test]
    fn test_recorded_version_after_open() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        assert_eq!(
            cache.migrator().recorded_version().unwrap().as_deref(),
            Some(SCHEMA_VERSION)
        );
        let tables = cache.migrator().existing_tables().unwrap();
        assert!(tables.iter().any(|t| t == "cache_version"));
        assert!(tables.iter().any(|t| t == "bookmarks"));
    }

    #[test]
    fn test_recorded_version_missing_table() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.migrator().drop_all().unwrap();
        assert_eq!(cache.migrator().recorded_version().unwrap(), None);
    }

    #[test]
    fn test_drop_all_leaves_foreign_tables() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        let exec = cache.executor();
        exec.execute(
            &exec.prepare("test.foreign", "CREATE TABLE host_settings (k TEXT, v TEXT)"),
            &[],
        )
        .unwrap();
        exec.execute(
            &exec.prepare("test.foreign_row", "INSERT INTO host_settings (k, v) VALUES ('a', 'b')"),
            &[],
        )
        .unwrap();

        let tables = cache.migrator().existing_tables().unwrap();
        assert!(!tables.iter().any(|t| t == "host_settings"));

        let dropped = cache.migrator().drop_all().unwrap();
        assert_eq!(dropped, TABLES.len() + 1);
        assert!(cache.migrator().existing_tables().unwrap().is_empty());

        let rows = exec
            .query(&exec.prepare("test.foreign_count", "SELECT COUNT(*) FROM host_settings"), &[])
            .unwrap();
        assert_eq!(rows[0].integer(0), Some(1));
    }

    #[test]
    fn test_init_with_only_foreign_tables_creates_schema() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        let exec = cache.executor();
        exec.execute(
            &exec.prepare("test.foreign", "CREATE TABLE host_settings (k TEXT)"),
            &[],
        )
        .unwrap();
        cache.migrator().drop_all().unwrap();

        assert_eq!(cache.migrator().init().unwrap(), MigrationOutcome::Created);
    }

    #[test]
    fn test_migrate_keeps_durable_drops_volatile() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        cache.bookmarks().set("movie", "603", "The Matrix", None).unwrap();
        cache.urls().set("https://x", b"body", "", &Default::default()).unwrap();

        let outcome = cache.migrator().migrate(Some("0.0.1")).unwrap();
        assert_eq!(
            outcome,
            MigrationOutcome::Migrated {
                from: Some("0.0.1".to_string()),
                rows: 1
            }
        );
        assert!(cache.bookmarks().get("movie", "603").unwrap().is_some());
        assert!(cache
            .urls()
            .get("https://x", "", std::time::Duration::from_secs(60))
            .unwrap()
            .is_empty());
        assert!(!dir.path().join("snapshot-1700000000.txt").exists());
    }

    #[test]
    fn test_row_before_marker_is_import_error() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, "#mediacache-snapshot 1\nmovie\t603\n").unwrap();

        let err = cache.migrator().import_snapshot(&path).unwrap_err();
        assert!(matches!(err, Error::Import { line: 2, .. }));
    }

    #[test]
    fn test_import_skips_unknown_columns() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        let path = dir.path().join("snap.txt");
        std::fs::write(
            &path,
            "#mediacache-snapshot 1\n\
             [genre_cache]\n\
             media_type\tgenre_id\tname\tlegacy\n\
             movie\t28\tAction\tx\n",
        )
        .unwrap();

        assert_eq!(cache.migrator().import_snapshot(&path).unwrap(), 1);
        assert_eq!(cache.genres().get("movie", "28").unwrap().as_deref(), Some("Action"));
    }

    #[test_case("[retired_table]\na\tb\n1\t2\n", 4 ; "unknown table")]
    #[test_case("[url_cache]\nurl\nhttp://x\n", 4 ; "volatile table")]
    #[test_case("[genre_cache]\nmedia_type\tgenre_id\tname\nmovie\t1\tA\n[gone]\nx\ny\n", 7 ; "after a known table")]
    fn test_row_under_unknown_marker_is_import_error(body: &str, expected_line: usize) {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        let path = dir.path().join("snap.txt");
        std::fs::write(&path, format!("#mediacache-snapshot 1\n{body}")).unwrap();

        let err = cache.migrator().import_snapshot(&path).unwrap_err();
        let Error::Import { line, cause } = err else {
            panic!("expected an import error, got {err:?}");
        };
        assert_eq!(line, expected_line);
        assert!(cause.contains("unknown table"), "{cause}");
    }

    #[test]
    fn test_unknown_marker_without_rows_is_accepted() {
        let dir = TempDir::new().unwrap();
        let cache = open(&dir);
        let path = dir.path().join("snap.txt");
        std::fs::write(
            &path,
            "#mediacache-snapshot 1\n[retired_table]\na\tb\n[genre_cache]\n\
             media_type\tgenre_id\tname\nmovie\t28\tAction\n",
        )
        .unwrap();

        assert_eq!(cache.migrator().import_snapshot(&path).unwrap(), 1);
    }

    struct CancelAfterFirstCheck(AtomicBool);

    impl ProgressReporter for CancelAfterFirstCheck {
        fn begin(&self, _title: &str) {}

        fn update(&self, _percent: u8, _message: &str) {}

        fn is_cancelled(&self) -> bool {
            self.0.swap(true, Ordering::SeqCst)
        }

        fn finish(&self) {}
    }

    #[test]
    fn test_cancelled_import_keeps_committed_rows() {
        let dir = TempDir::new().unwrap();
        let cache = MediaCache::builder(CacheConfig::new(dir.path()))
            .settings(Arc::new(MemorySettings::new()))
            .progress(Arc::new(CancelAfterFirstCheck(AtomicBool::new(false))))
            .open()
            .unwrap();
        let path = dir.path().join("snap.txt");
        std::fs::write(
            &path,
            "#mediacache-snapshot 1\n[genre_cache]\nmedia_type\tgenre_id\tname\n\
             movie\t1\tA\nmovie\t2\tB\n",
        )
        .unwrap();

        let err = cache.migrator().import_snapshot(&path).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(cache.genres().list("movie").unwrap().len(), 1);
    }
}
