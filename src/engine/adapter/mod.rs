//! Store Adapter Layer
//!
//! Backend implementations of the [`Store`](super::store::Store) contract.
//! `MemoryStore` keeps records in process; `SqliteStore` persists them as JSON
//! documents and compiles queries to SQLite's JSON functions.

pub mod memory;
pub mod sql;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SqliteParameters, SqliteStore};

use rusqlite::types::{ToSql, ToSqlOutput, Value as RusqliteValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// SQL value for parameterized queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    /// Bind form of a JSON scalar, matching what `json_extract` yields.
    /// Objects and arrays bind as their JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(*b as i64),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }

    /// Bind a value as JSON text, to be wrapped in `json(?)`
    pub fn json_text(value: &Value) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<&str> for SqlValue {
    fn from(s: &str) -> Self {
        SqlValue::Text(s.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(s: String) -> Self {
        SqlValue::Text(s)
    }
}

impl From<i64> for SqlValue {
    fn from(i: i64) -> Self {
        SqlValue::Integer(i)
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(RusqliteValue::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(RusqliteValue::Integer(*i)),
            SqlValue::Real(f) => ToSqlOutput::Owned(RusqliteValue::Real(*f)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(s.as_str().into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sql_value_from_json() {
        assert_eq!(SqlValue::from_json(&json!(true)), SqlValue::Integer(1));
        assert_eq!(SqlValue::from_json(&json!(3)), SqlValue::Integer(3));
        assert_eq!(SqlValue::from_json(&json!(1.5)), SqlValue::Real(1.5));
        assert_eq!(SqlValue::from_json(&json!("a")), SqlValue::Text("a".into()));
        assert_eq!(SqlValue::from_json(&json!(null)), SqlValue::Null);
        assert_eq!(
            SqlValue::from_json(&json!({"k": 1})),
            SqlValue::Text("{\"k\":1}".into())
        );
    }
}
