//! Backend-neutral parameter and column values.

use rusqlite::types::{ToSqlOutput, ValueRef};

/// A single SQL value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// Double-precision float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl Value {
    /// Returns `true` for `NULL`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::Blob(v.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(f) => Self::Real(f),
            ValueRef::Text(t) => Self::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Self::Blob(b.to_vec()),
        }
    }
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Self::Text(t) => ToSqlOutput::Borrowed(ValueRef::Text(t.as_bytes())),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

/// Builds a parameter list from heterogeneous values.
#[macro_export]
macro_rules! sql_params {
    () => { Vec::<$crate::storage::Value>::new() };
    ($($v:expr),+ $(,)?) => { vec![$($crate::storage::Value::from($v)),+] };
}

/// One result row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(pub Vec<Value>);

impl Row {
    /// Returns the raw value at `idx`.
    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.0.get(idx)
    }

    /// Returns column `idx` as text; `None` for `NULL`, missing or non-text.
    #[must_use]
    pub fn text(&self, idx: usize) -> Option<String> {
        match self.0.get(idx) {
            Some(Value::Text(t)) => Some(t.clone()),
            Some(Value::Blob(b)) => Some(String::from_utf8_lossy(b).into_owned()),
            Some(Value::Integer(i)) => Some(i.to_string()),
            _ => None,
        }
    }

    /// Returns column `idx` as an integer.
    #[must_use]
    pub fn integer(&self, idx: usize) -> Option<i64> {
        match self.0.get(idx) {
            Some(Value::Integer(i)) => Some(*i),
            #[allow(clippy::cast_possible_truncation)]
            Some(Value::Real(f)) => Some(*f as i64),
            Some(Value::Text(t)) => t.parse().ok(),
            _ => None,
        }
    }

    /// Returns column `idx` as bytes.
    #[must_use]
    pub fn blob(&self, idx: usize) -> Option<Vec<u8>> {
        match self.0.get(idx) {
            Some(Value::Blob(b)) => Some(b.clone()),
            Some(Value::Text(t)) => Some(t.as_bytes().to_vec()),
            _ => None,
        }
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the row into its values.
    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_converts_to_null() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::Text("x".to_string()));
    }

    #[test]
    fn test_row_accessors_coerce() {
        let row = Row(vec![
            Value::Text("42".to_string()),
            Value::Integer(7),
            Value::Null,
            Value::Blob(b"abc".to_vec()),
        ]);
        assert_eq!(row.integer(0), Some(42));
        assert_eq!(row.text(1).as_deref(), Some("7"));
        assert_eq!(row.text(2), None);
        assert_eq!(row.blob(3).as_deref(), Some(&b"abc"[..]));
        assert_eq!(row.text(9), None);
    }

    #[test]
    fn test_sql_params_macro() {
        let params = crate::sql_params!["a", 1_i64, None::<String>];
        assert_eq!(
            params,
            vec![Value::Text("a".to_string()), Value::Integer(1), Value::Null]
        );
    }
}
