//! Tracked rows.

use crate::codec::to_cbor;
use crate::error::ProtocolResult;
use crate::value::ColumnValue;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Classification of a selected change, derived at selection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowState {
    /// Row created after the watermark.
    Insert,
    /// Row existed at the watermark and changed since.
    Update,
    /// Row deleted (tombstone).
    Delete,
}

/// The row-state unit exchanged between replicas.
///
/// A `TrackedRow` carries the primary-key values, the mutable column values
/// (empty for tombstones), the logical timestamp of the last change in the
/// source store, and the identity of the participant that last wrote it.
/// `last_writer == None` means the row was modified locally and not yet
/// attributed to any peer; such rows are always eligible for selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedRow {
    /// Table the row belongs to.
    pub table: String,
    /// Primary-key values, in primary-key column order.
    pub key: Vec<ColumnValue>,
    /// Column values in table column order; empty for tombstones.
    pub values: Vec<ColumnValue>,
    /// True if the row is a deletion marker.
    pub tombstone: bool,
    /// Logical timestamp of the last change, in the source store's domain.
    pub timestamp: u64,
    /// Participant that last wrote the row; `None` for local edits.
    pub last_writer: Option<Uuid>,
}

impl TrackedRow {
    /// Creates a live row.
    pub fn new(
        table: impl Into<String>,
        key: Vec<ColumnValue>,
        values: Vec<ColumnValue>,
        timestamp: u64,
        last_writer: Option<Uuid>,
    ) -> Self {
        Self {
            table: table.into(),
            key,
            values,
            tombstone: false,
            timestamp,
            last_writer,
        }
    }

    /// Creates a tombstone row.
    pub fn tombstone(
        table: impl Into<String>,
        key: Vec<ColumnValue>,
        timestamp: u64,
        last_writer: Option<Uuid>,
    ) -> Self {
        Self {
            table: table.into(),
            key,
            values: Vec::new(),
            tombstone: true,
            timestamp,
            last_writer,
        }
    }

    /// Canonical encoding of the primary key, usable as a map key.
    pub fn key_bytes(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(&self.key)
    }

    /// Estimated encoded size in bytes, used for batch partitioning.
    pub fn estimated_size(&self) -> usize {
        let values: usize = self
            .key
            .iter()
            .chain(self.values.iter())
            .map(ColumnValue::estimated_size)
            .sum();
        32 + self.table.len() + values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_cbor, to_cbor};

    #[test]
    fn tracked_row_roundtrip() {
        let row = TrackedRow::new(
            "customer",
            vec![ColumnValue::Integer(7)],
            vec![ColumnValue::Text("Ada".into()), ColumnValue::Null],
            42,
            Some(Uuid::from_u128(1)),
        );

        let bytes = to_cbor(&row).unwrap();
        let decoded: TrackedRow = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, row);
    }

    #[test]
    fn tombstone_has_no_values() {
        let row = TrackedRow::tombstone("customer", vec![ColumnValue::Integer(7)], 42, None);
        assert!(row.tombstone);
        assert!(row.values.is_empty());
        assert_eq!(row.timestamp, 42);
    }

    #[test]
    fn key_bytes_deterministic() {
        let a = TrackedRow::new("t", vec![ColumnValue::Integer(1)], vec![], 1, None);
        let b = TrackedRow::tombstone("t", vec![ColumnValue::Integer(1)], 9, None);
        assert_eq!(a.key_bytes().unwrap(), b.key_bytes().unwrap());
    }
}
