//! Snapshot file format.
//!
//! ```text
//! #mediacache-snapshot 0.3.0
//! [bookmarks]
//! content_type	item_id	title	url	created_at
//! movie	603	The Matrix	\N	1700000000
//! [genre_cache]
//! ...
//! ```
//!
//! The first line names the schema version the data was exported from. The
//! rest is tab-delimited CSV: a one-field `[table]` marker opens a section,
//! the next record lists the exported columns, and every further record is
//! one row. `NULL` is written as `\N`, text starting with a backslash or
//! `[` gets a backslash in front, and blobs are written as `\x` followed by
//! hex.

use crate::storage::{ColumnType, Value};
use crate::{Error, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// First token of every snapshot file.
pub const SNAPSHOT_HEADER: &str = "#mediacache-snapshot";

const NULL_MARKER: &str = "\\N";
const BLOB_PREFIX: &str = "\\x";

/// Encodes one value as a snapshot field.
#[must_use]
pub fn encode_value(value: &Value) -> String {
    match value {
        Value::Null => NULL_MARKER.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(t) if t.starts_with(['\\', '[']) => format!("\\{t}"),
        Value::Text(t) => t.clone(),
        Value::Blob(b) => format!("{BLOB_PREFIX}{}", hex::encode(b)),
    }
}

/// Decodes a snapshot field for a column of type `ty`.
///
/// # Errors
///
/// Returns a message when the field does not fit the column type.
pub fn decode_field(field: &str, ty: ColumnType) -> std::result::Result<Value, String> {
    if field == NULL_MARKER {
        return Ok(Value::Null);
    }
    if let Some(hex_digits) = field.strip_prefix(BLOB_PREFIX) {
        let bytes = hex::decode(hex_digits).map_err(|e| format!("bad blob field: {e}"))?;
        return Ok(match ty {
            ColumnType::Blob => Value::Blob(bytes),
            _ => Value::Text(String::from_utf8_lossy(&bytes).into_owned()),
        });
    }
    if let Some(text) = field.strip_prefix('\\') {
        return Ok(Value::Text(text.to_string()));
    }
    match ty {
        ColumnType::Integer | ColumnType::Serial => field
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|e| format!("bad integer '{field}': {e}")),
        ColumnType::Blob => Ok(Value::Blob(field.as_bytes().to_vec())),
        ColumnType::Text | ColumnType::Key(_) => Ok(Value::Text(field.to_string())),
    }
}

/// Returns the table name if `fields` is a section marker.
fn marker(fields: &csv::StringRecord) -> Option<&str> {
    if fields.len() != 1 {
        return None;
    }
    fields
        .get(0)
        .and_then(|f| f.strip_prefix('['))
        .and_then(|f| f.strip_suffix(']'))
}

/// Streams durable tables into a snapshot file.
pub struct SnapshotWriter<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl SnapshotWriter<BufWriter<File>> {
    /// Creates `path` and writes the header line.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Export`] if the file cannot be created.
    pub fn create(path: &Path, version: &str) -> Result<Self> {
        let file = File::create(path)
            .map_err(|e| Error::Export(format!("{}: {e}", path.display())))?;
        Self::new(BufWriter::new(file), version)
    }
}

impl<W: Write> SnapshotWriter<W> {
    /// Writes the header line to `inner`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Export`] on I/O failure.
    pub fn new(mut inner: W, version: &str) -> Result<Self> {
        writeln!(inner, "{SNAPSHOT_HEADER} {version}").map_err(export_error)?;
        let writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .has_headers(false)
            .from_writer(inner);
        Ok(Self { writer, rows: 0 })
    }

    /// Opens a table section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Export`] on I/O failure.
    pub fn begin_table(&mut self, name: &str, columns: &[&str]) -> Result<()> {
        self.writer
            .write_record([format!("[{name}]")])
            .map_err(export_error)?;
        self.writer.write_record(columns).map_err(export_error)
    }

    /// Writes one row of the current section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Export`] on I/O failure.
    pub fn write_row(&mut self, values: &[Value]) -> Result<()> {
        self.writer
            .write_record(values.iter().map(encode_value))
            .map_err(export_error)?;
        self.rows += 1;
        Ok(())
    }

    /// Flushes the file and returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Export`] on I/O failure.
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush().map_err(export_error)?;
        Ok(self.rows)
    }
}

fn export_error(e: impl std::fmt::Display) -> Error {
    Error::Export(e.to_string())
}

/// One record read back from a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotRecord {
    /// Start of a table section.
    Table(String),
    /// A column list or data row.
    Fields(Vec<String>),
}

/// A snapshot file loaded for import.
#[derive(Debug)]
pub struct SnapshotFile {
    version: String,
    body: String,
}

impl SnapshotFile {
    /// Reads `path`, decoding UTF-8 and falling back to Latin-1.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Import`] if the file cannot be read or lacks the
    /// snapshot header.
    pub fn read(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| Error::Import {
            line: 0,
            cause: format!("{}: {e}", path.display()),
        })?;
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Snapshot is not UTF-8, reading as Latin-1");
                e.into_bytes().into_iter().map(char::from).collect()
            },
        };
        Self::parse(text)
    }

    /// Splits the header line off `text`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Import`] if the header is missing.
    pub fn parse(text: String) -> Result<Self> {
        let (first, body) = text.split_once('\n').unwrap_or((text.as_str(), ""));
        let version = first
            .trim_end_matches('\r')
            .strip_prefix(SNAPSHOT_HEADER)
            .map(|v| v.trim().to_string())
            .ok_or_else(|| Error::Import {
                line: 1,
                cause: "missing snapshot header".to_string(),
            })?;
        Ok(Self {
            version,
            body: body.to_string(),
        })
    }

    /// Schema version the snapshot was exported from.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Size of the record section in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Returns `true` when the snapshot holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.trim().is_empty()
    }

    /// Iterates records as `(line, byte offset, record)`.
    ///
    /// Line numbers are 1-based and count the header line.
    pub fn records(&self) -> impl Iterator<Item = Result<(usize, usize, SnapshotRecord)>> + '_ {
        csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .has_headers(false)
            .from_reader(self.body.as_bytes())
            .into_records()
            .map(|record| {
                let record = record.map_err(|e| Error::Import {
                    line: e.position().map_or(0, |p| to_usize(p.line()) + 1),
                    cause: e.to_string(),
                })?;
                let (line, offset) = record
                    .position()
                    .map_or((0, 0), |p| (to_usize(p.line()) + 1, to_usize(p.byte())));
                let parsed = match marker(&record) {
                    Some(name) => SnapshotRecord::Table(name.to_string()),
                    None => SnapshotRecord::Fields(record.iter().map(str::to_string).collect()),
                };
                Ok((line, offset, parsed))
            })
    }
}

fn to_usize(v: u64) -> usize {
    usize::try_from(v).unwrap_or(usize::MAX)
}
