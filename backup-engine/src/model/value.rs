//! Schema-less row payloads.
//!
//! Rows are sorted maps of column name to a tagged [`Value`], and a snapshot
//! is a sorted map of table name to rows, so the serialized payload is
//! byte-for-byte deterministic for the same data.

use crate::utils::errors::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One column value. Serialized as `{"t": "<kind>", "v": <value>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "lowercase")]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
}

pub type Row = BTreeMap<String, Value>;

/// Table name to rows.
pub type Snapshot = BTreeMap<String, Vec<Row>>;

impl Value {
    /// Interpret the value as an instant. Strings are accepted when they hold RFC 3339 text.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// First column of `row` holding a NaN or infinite float. JSON has no
/// representation for those, so such rows cannot be stored.
pub fn non_finite_column(row: &Row) -> Option<&str> {
    row.iter()
        .find(|(_, v)| matches!(v, Value::Float(f) if !f.is_finite()))
        .map(|(column, _)| column.as_str())
}

/// Serialize a snapshot to the uncompressed payload format.
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(snapshot)?)
}

pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Build a row from `(column, value)` pairs.
pub fn row<I, K, V>(columns: I) -> Row
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    columns
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
