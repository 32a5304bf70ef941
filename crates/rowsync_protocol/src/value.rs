//! Column values exchanged between replicas.

use serde::{Deserialize, Serialize};

/// Declared type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    /// Boolean.
    Bool,
    /// 64-bit signed integer.
    Integer,
    /// 64-bit float.
    Real,
    /// UTF-8 text.
    Text,
    /// Raw bytes.
    Bytes,
}

/// A single column value.
///
/// `Null` is distinct from empty text and empty bytes; the codec must
/// round-trip that distinction exactly, along with full 64-bit integer
/// precision (timestamps travel as `Integer`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    /// Absent value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Integer(i64),
    /// Float value.
    Real(f64),
    /// Text value.
    Text(String),
    /// Byte-string value.
    Bytes(Vec<u8>),
}

impl ColumnValue {
    /// Returns true if the value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }

    /// Returns the integer value, if this is an `Integer`.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ColumnValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the text value, if this is a `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ColumnValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Estimated encoded size in bytes, used for batch partitioning.
    pub fn estimated_size(&self) -> usize {
        match self {
            ColumnValue::Null => 1,
            ColumnValue::Bool(_) => 1,
            ColumnValue::Integer(_) => 9,
            ColumnValue::Real(_) => 9,
            ColumnValue::Text(s) => 5 + s.len(),
            ColumnValue::Bytes(b) => 5 + b.len(),
        }
    }
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        ColumnValue::Integer(v)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::Text(v.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::Text(v)
    }
}

impl From<f64> for ColumnValue {
    fn from(v: f64) -> Self {
        ColumnValue::Real(v)
    }
}

impl From<bool> for ColumnValue {
    fn from(v: bool) -> Self {
        ColumnValue::Bool(v)
    }
}
