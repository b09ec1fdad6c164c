//! SQL dialects.
//!
//! Each backend picks its [`Dialect`] once at construction. Namespaces
//! compile their statements through it when they are created, so no SQL
//! text is rewritten on the hot path.

use super::schema::{Column, ColumnType, TableDef};
use std::borrow::Cow;
use std::fmt::{self, Write as _};

/// Backend-specific SQL generation.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Dialect name for logs.
    fn name(&self) -> &'static str;

    /// Positional parameter marker for the 1-based `index`.
    fn placeholder(&self, index: usize) -> String;

    /// SQL type (and inline constraints) for a column type.
    fn column_type(&self, ty: ColumnType) -> String;

    /// Insert-or-update for `columns` of `table`, keyed by the table's
    /// natural key. A conflicting row keeps its surrogate id.
    fn upsert(&self, table: &TableDef, columns: &[&str]) -> String {
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !table.key.contains(c))
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        let action = if updates.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", updates.join(", "))
        };
        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {action}",
            table.name,
            columns.join(", "),
            value_list(self, columns.len()),
            table.key.join(", ")
        )
    }

    /// Query listing every user table; the first column is the table name.
    fn list_tables(&self) -> &'static str;

    /// Length bound enforced on [`ColumnType::Key`] columns, if any.
    fn bounds_keys(&self) -> bool {
        false
    }

    /// Statement that realigns a serial sequence after explicit-id inserts.
    fn sync_serial(&self, _table: &TableDef, _column: &Column) -> Option<String> {
        None
    }

    /// Rewrites `?` markers outside string literals into this dialect's
    /// placeholders.
    fn normalize(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len() + 8);
        let mut index = 0;
        let mut in_literal = false;
        for ch in template.chars() {
            match ch {
                '\'' => {
                    in_literal = !in_literal;
                    out.push(ch);
                },
                '?' if !in_literal => {
                    index += 1;
                    out.push_str(&self.placeholder(index));
                },
                _ => out.push(ch),
            }
        }
        out
    }

    /// Truncates a key value to its column bound on backends that enforce one.
    fn bound_key<'a>(&self, value: &'a str, ty: ColumnType) -> Cow<'a, str> {
        match ty {
            ColumnType::Key(max) if self.bounds_keys() && value.chars().count() > max => {
                Cow::Owned(value.chars().take(max).collect())
            },
            _ => Cow::Borrowed(value),
        }
    }

    /// `CREATE TABLE` and `CREATE INDEX` statements for `table`.
    fn create_table(&self, table: &TableDef) -> Vec<String> {
        let mut ddl = format!("CREATE TABLE IF NOT EXISTS {} (", table.name);
        for (i, column) in table.columns.iter().enumerate() {
            if i > 0 {
                ddl.push_str(", ");
            }
            let _ = write!(ddl, "{} {}", column.name, self.column_type(column.ty));
            if !column.nullable && column.ty != ColumnType::Serial {
                ddl.push_str(" NOT NULL");
            }
        }
        let constraint = if table.serial_column().is_some() {
            "UNIQUE"
        } else {
            "PRIMARY KEY"
        };
        let _ = write!(ddl, ", {constraint} ({}))", table.key.join(", "));

        let mut statements = vec![ddl];
        statements.extend(table.indexes.iter().map(|column| {
            format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table} ({column})",
                table = table.name
            )
        }));
        statements
    }

    /// `DROP TABLE` for a cache table name read from the catalog.
    fn drop_table(&self, name: &str) -> String {
        format!("DROP TABLE IF EXISTS \"{}\"", name.replace('"', "\"\""))
    }
}

fn value_list<D: Dialect + ?Sized>(dialect: &D, count: usize) -> String {
    (1..=count)
        .map(|i| dialect.placeholder(i))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `SQLite` dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn column_type(&self, ty: ColumnType) -> String {
        match ty {
            ColumnType::Text | ColumnType::Key(_) => "TEXT".to_string(),
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::Blob => "BLOB".to_string(),
            ColumnType::Serial => "INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
        }
    }

    fn list_tables(&self) -> &'static str {
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'"
    }

    fn normalize(&self, template: &str) -> String {
        template.to_string()
    }
}

/// PostgreSQL dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn column_type(&self, ty: ColumnType) -> String {
        match ty {
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::Key(max) => format!("VARCHAR({max})"),
            ColumnType::Integer => "BIGINT".to_string(),
            ColumnType::Blob => "BYTEA".to_string(),
            ColumnType::Serial => "BIGSERIAL PRIMARY KEY".to_string(),
        }
    }

    fn list_tables(&self) -> &'static str {
        "SELECT tablename FROM pg_tables WHERE schemaname = current_schema()"
    }

    fn bounds_keys(&self) -> bool {
        true
    }

    fn sync_serial(&self, table: &TableDef, column: &Column) -> Option<String> {
        Some(format!(
            "SELECT setval(pg_get_serial_sequence('{table}', '{column}'), COALESCE(MAX({column}), 0) + 1, false) FROM {table}",
            table = table.name,
            column = column.name
        ))
    }
}
