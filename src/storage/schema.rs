//! Static table definitions.
//!
//! Every cache table is described once as a [`TableDef`]. Dialects turn the
//! definitions into DDL and upsert statements, and the snapshot exporter
//! uses them to know which columns to carry.

/// Logical column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Unbounded text.
    Text,
    /// Text used in a key; size-bounded on backends that need it.
    Key(usize),
    /// 64-bit integer.
    Integer,
    /// Binary data.
    Blob,
    /// Auto-incrementing surrogate primary key.
    Serial,
}

/// One column of a table.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    /// Column name.
    pub name: &'static str,
    /// Column type.
    pub ty: ColumnType,
    /// Whether `NULL` is allowed.
    pub nullable: bool,
}

impl Column {
    /// A `NOT NULL` column.
    #[must_use]
    pub const fn required(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
        }
    }

    /// A nullable column.
    #[must_use]
    pub const fn optional(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
        }
    }
}

/// A cache table.
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    /// Table name; doubles as the snapshot section marker.
    pub name: &'static str,
    /// Columns in storage order.
    pub columns: &'static [Column],
    /// Natural key. Primary key, or a unique constraint when the table has a
    /// [`ColumnType::Serial`] column.
    pub key: &'static [&'static str],
    /// Single-column secondary indexes.
    pub indexes: &'static [&'static str],
    /// Whether the table survives a schema migration.
    pub durable: bool,
}

impl TableDef {
    /// All column names in storage order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    /// Column names excluding the surrogate key.
    #[must_use]
    pub fn data_column_names(&self) -> Vec<&'static str> {
        self.columns
            .iter()
            .filter(|c| c.ty != ColumnType::Serial)
            .map(|c| c.name)
            .collect()
    }

    /// The surrogate key column, if any.
    #[must_use]
    pub fn serial_column(&self) -> Option<&Column> {
        self.columns.iter().find(|c| c.ty == ColumnType::Serial)
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: TableDef = TableDef {
        name: "sample",
        columns: &[
            Column::required("id", ColumnType::Serial),
            Column::required("kind", ColumnType::Key(32)),
            Column::optional("note", ColumnType::Text),
        ],
        key: &["kind"],
        indexes: &[],
        durable: true,
    };

    #[test]
    fn test_column_helpers() {
        assert_eq!(SAMPLE.column_names(), vec!["id", "kind", "note"]);
        assert_eq!(SAMPLE.data_column_names(), vec!["kind", "note"]);
        assert_eq!(SAMPLE.serial_column().map(|c| c.name), Some("id"));
        assert!(SAMPLE.column("note").is_some_and(|c| c.nullable));
        assert!(SAMPLE.column("missing").is_none());
    }
}
