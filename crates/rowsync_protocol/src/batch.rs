//! Change-set batching metadata.

use crate::row::TrackedRow;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rows of one table, in selection order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRows {
    /// Table name.
    pub table: String,
    /// Rows, in selection order.
    pub rows: Vec<TrackedRow>,
}

impl TableRows {
    /// Creates a row group for a table.
    pub fn new(table: impl Into<String>, rows: Vec<TrackedRow>) -> Self {
        Self {
            table: table.into(),
            rows,
        }
    }
}

/// A change set: tables in dependency order, each with its selected rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    /// Non-empty table groups, parents before children.
    pub tables: Vec<TableRows>,
}

impl ChangeSet {
    /// Total number of rows across all tables.
    pub fn row_count(&self) -> u64 {
        self.tables.iter().map(|t| t.rows.len() as u64).sum()
    }

    /// True if no table has rows.
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(|t| t.rows.is_empty())
    }
}

/// Metadata for one transmittable fragment of a change set.
///
/// Parts are immutable once produced: re-reading or re-sending part `i`
/// yields identical content for the lifetime of the batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchPartInfo {
    /// 0-based, strictly increasing part index.
    pub index: u32,
    /// Tables contained in this part, in order.
    pub tables: Vec<String>,
    /// Rows in this part.
    pub row_count: u64,
    /// True for the final part of the batch.
    pub is_last: bool,
}

/// Metadata for a change set split across ordered parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchInfo {
    /// Resumption token: identifies the batch across requests.
    pub batch_token: Uuid,
    /// Total rows across all parts.
    pub row_count: u64,
    /// True when the whole batch fits in one in-memory part, letting the
    /// receiver skip resume bookkeeping.
    pub in_memory: bool,
    /// Part metadata, in index order.
    pub parts: Vec<BatchPartInfo>,
    /// Source-store timestamp read at the start of selection.
    pub timestamp: u64,
}

impl BatchInfo {
    /// Creates an empty batch (no changes to transmit).
    pub fn empty(timestamp: u64) -> Self {
        Self {
            batch_token: Uuid::new_v4(),
            row_count: 0,
            in_memory: true,
            parts: Vec::new(),
            timestamp,
        }
    }

    /// Number of parts.
    pub fn part_count(&self) -> u32 {
        self.parts.len() as u32
    }

    /// True if the batch carries no rows.
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ColumnValue;

    #[test]
    fn change_set_counts() {
        let set = ChangeSet {
            tables: vec![
                TableRows::new(
                    "customer",
                    vec![TrackedRow::new(
                        "customer",
                        vec![ColumnValue::Integer(1)],
                        vec![ColumnValue::Text("Ada".into())],
                        5,
                        None,
                    )],
                ),
                TableRows::new("order", vec![]),
            ],
        };

        assert_eq!(set.row_count(), 1);
        assert!(!set.is_empty());
        assert!(ChangeSet::default().is_empty());
    }

    #[test]
    fn empty_batch() {
        let batch = BatchInfo::empty(10);
        assert!(batch.is_empty());
        assert!(batch.in_memory);
        assert_eq!(batch.part_count(), 0);
        assert_eq!(batch.timestamp, 10);
    }
}
