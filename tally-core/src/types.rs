//! Core types for Tally

use crate::{Result, TallyError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Instant in UTC, millisecond precision when written
pub type Timestamp = DateTime<Utc>;

/// A literal value written to a column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// UTF-8 text
    Text(String),
    /// 64-bit signed integer
    Integer(i64),
    /// 64-bit float
    Float(f64),
    /// Boolean
    Boolean(bool),
    /// Instant, written as epoch milliseconds
    Timestamp(Timestamp),
    /// UUID
    Uuid(Uuid),
}

impl Value {
    /// Render as a CQL literal
    pub fn to_cql(&self) -> String {
        match self {
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Integer(v) => v.to_string(),
            Value::Float(v) => {
                if v.is_nan() {
                    "NaN".to_string()
                } else if v.is_infinite() {
                    let sign = if *v > 0.0 { "" } else { "-" };
                    format!("{}Infinity", sign)
                } else {
                    v.to_string()
                }
            }
            Value::Boolean(v) => v.to_string(),
            Value::Timestamp(t) => t.timestamp_millis().to_string(),
            Value::Uuid(u) => u.hyphenated().to_string(),
        }
    }

    /// Get as i64 if possible
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            Value::Timestamp(t) => Some(t.timestamp_millis()),
            _ => None,
        }
    }

    /// Get as str if this is text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_cql())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

/// Equality predicates identifying a row (or a partition, when only a
/// prefix of the primary key is given)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowKey {
    columns: Vec<(String, Value)>,
}

impl RowKey {
    /// Create a single-column key
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            columns: vec![(column.into(), value.into())],
        }
    }

    /// Add another key column
    pub fn and(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.push((column.into(), value.into()));
        self
    }

    /// Key columns in the order they were given
    pub fn columns(&self) -> &[(String, Value)] {
        &self.columns
    }

    /// Get the value of a key column
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Number of key columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column-sorted literal form, independent of the order columns were given
    pub fn canonical(&self) -> BTreeMap<String, String> {
        self.columns
            .iter()
            .map(|(name, value)| (name.clone(), value.to_cql()))
            .collect()
    }

    /// Render as a CQL WHERE clause body
    pub fn to_where_clause(&self) -> String {
        self.columns
            .iter()
            .map(|(name, value)| format!("{}={}", name, value.to_cql()))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

impl<C: Into<String>, V: Into<Value>> From<(C, V)> for RowKey {
    fn from((column, value): (C, V)) -> Self {
        RowKey::new(column, value)
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_where_clause())
    }
}

/// Check that a keyspace, table or column name is a plain CQL identifier
pub(crate) fn validate_identifier(what: &str, name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            first.is_ascii_alphabetic() && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(TallyError::Config(format!(
            "A non-empty {} name made of letters, digits and underscores is required, got {:?}",
            what, name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_value_literals() {
        assert_eq!(Value::from("it's").to_cql(), "'it''s'");
        assert_eq!(Value::from(42i64).to_cql(), "42");
        assert_eq!(Value::from(-3).to_cql(), "-3");
        assert_eq!(Value::from(true).to_cql(), "true");
        assert_eq!(Value::Float(2.5).to_cql(), "2.5");
        assert_eq!(Value::Float(f64::NEG_INFINITY).to_cql(), "-Infinity");

        let t = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 1).unwrap();
        assert_eq!(Value::from(t).to_cql(), "1000");

        let id = Uuid::nil();
        assert_eq!(Value::from(id).to_cql(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_row_key() {
        let key = RowKey::new("name", "signups").and("kind", "counts");
        assert_eq!(key.to_where_clause(), "name='signups' AND kind='counts'");
        assert_eq!(key.get("kind"), Some(&Value::from("counts")));
        assert_eq!(key.len(), 2);

        let swapped = RowKey::new("kind", "counts").and("name", "signups");
        assert_eq!(key.canonical(), swapped.canonical());

        let single: RowKey = ("id", 1).into();
        assert_eq!(single.to_string(), "id=1");
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("table", "counters").is_ok());
        assert!(validate_identifier("table", "app_logs2").is_ok());
        assert!(validate_identifier("table", "").is_err());
        assert!(validate_identifier("table", "2fast").is_err());
        assert!(validate_identifier("table", "drop table;").is_err());
    }
}
