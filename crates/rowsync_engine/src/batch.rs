//! Batch partitioning and part storage.

use crate::error::SyncErrorKind;
use rowsync_protocol::{from_cbor, to_cbor, BatchInfo, BatchPartInfo, ChangeSet, TableRows};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Partitions change sets into size-bounded, ordered, resumable parts.
///
/// Parts are table-aligned: a table's rows stay contiguous and in order
/// across consecutive parts; one part may carry several whole tables. Once
/// produced, parts are immutable, so re-reading or re-sending a part is
/// idempotent.
pub struct Batcher;

/// A partitioned change set plus access to its part payloads.
///
/// Payloads live in memory when the set fits one part (or no spool directory
/// is configured), otherwise they are spooled to disk under a
/// per-batch directory that [`ProducedBatch::cleanup`] reclaims.
pub struct ProducedBatch {
    /// Transport metadata for the batch.
    pub info: BatchInfo,
    payloads: PartStore,
}

enum PartStore {
    Memory(Vec<Vec<TableRows>>),
    Spooled(PathBuf),
}

impl Batcher {
    /// Partitions a change set into parts of at most `max_part_size_bytes`
    /// (estimated encoded size). `timestamp` is the source-store watermark
    /// read at the start of selection.
    pub fn partition(
        change_set: ChangeSet,
        timestamp: u64,
        max_part_size_bytes: usize,
        spool_dir: Option<&Path>,
    ) -> Result<ProducedBatch, SyncErrorKind> {
        if change_set.is_empty() {
            return Ok(ProducedBatch {
                info: BatchInfo::empty(timestamp),
                payloads: PartStore::Memory(Vec::new()),
            });
        }

        let mut parts: Vec<Vec<TableRows>> = Vec::new();
        let mut current: Vec<TableRows> = Vec::new();
        let mut current_size = 0usize;

        for table_rows in change_set.tables {
            let mut group = TableRows::new(table_rows.table.clone(), Vec::new());
            for row in table_rows.rows {
                let row_size = row.estimated_size();
                if current_size > 0 && current_size + row_size > max_part_size_bytes {
                    if !group.rows.is_empty() {
                        current.push(std::mem::replace(
                            &mut group,
                            TableRows::new(table_rows.table.clone(), Vec::new()),
                        ));
                    }
                    parts.push(std::mem::take(&mut current));
                    current_size = 0;
                }
                current_size += row_size;
                group.rows.push(row);
            }
            if !group.rows.is_empty() {
                current.push(group);
            }
        }
        if !current.is_empty() {
            parts.push(current);
        }

        let batch_token = Uuid::new_v4();
        let part_infos: Vec<BatchPartInfo> = parts
            .iter()
            .enumerate()
            .map(|(index, part)| BatchPartInfo {
                index: index as u32,
                tables: part.iter().map(|t| t.table.clone()).collect(),
                row_count: part.iter().map(|t| t.rows.len() as u64).sum(),
                is_last: index == parts.len() - 1,
            })
            .collect();

        let row_count = part_infos.iter().map(|p| p.row_count).sum();

        // Multi-part batches spool to disk when a directory is configured;
        // each part is its own file so resumption can re-read any index.
        let payloads = match spool_dir {
            Some(root) if parts.len() > 1 => {
                let dir = root.join(batch_token.to_string());
                fs::create_dir_all(&dir)?;
                for (index, part) in parts.iter().enumerate() {
                    let bytes = to_cbor(part)?;
                    fs::write(dir.join(format!("part-{index}.cbor")), bytes)?;
                }
                debug!(batch = %batch_token, parts = parts.len(), dir = %dir.display(), "spooled batch");
                PartStore::Spooled(dir)
            }
            _ => PartStore::Memory(parts),
        };

        Ok(ProducedBatch {
            info: BatchInfo {
                batch_token,
                row_count,
                in_memory: matches!(payloads, PartStore::Memory(_)),
                parts: part_infos,
                timestamp,
            },
            payloads,
        })
    }
}

impl ProducedBatch {
    /// Reads the payload of one part. Deterministic and restartable: the
    /// same index always yields the same rows.
    pub fn read_part(&self, index: u32) -> Result<Vec<TableRows>, SyncErrorKind> {
        match &self.payloads {
            PartStore::Memory(parts) => {
                parts
                    .get(index as usize)
                    .cloned()
                    .ok_or(SyncErrorKind::MissingBatchPart {
                        batch_token: self.info.batch_token,
                        index,
                    })
            }
            PartStore::Spooled(dir) => {
                if index >= self.info.part_count() {
                    return Err(SyncErrorKind::MissingBatchPart {
                        batch_token: self.info.batch_token,
                        index,
                    });
                }
                let bytes = fs::read(dir.join(format!("part-{index}.cbor")))?;
                Ok(from_cbor(&bytes)?)
            }
        }
    }

    /// Reclaims spooled storage. In-memory batches are a no-op.
    pub fn cleanup(&self) {
        if let PartStore::Spooled(dir) = &self.payloads {
            let _ = fs::remove_dir_all(dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rowsync_protocol::{ColumnValue, TrackedRow};

    fn row(table: &str, id: i64, payload: &str) -> TrackedRow {
        TrackedRow::new(
            table,
            vec![ColumnValue::Integer(id)],
            vec![ColumnValue::Text(payload.into())],
            id as u64,
            None,
        )
    }

    fn change_set(rows_per_table: &[(&str, usize)]) -> ChangeSet {
        ChangeSet {
            tables: rows_per_table
                .iter()
                .map(|(table, count)| {
                    TableRows::new(
                        *table,
                        (0..*count as i64).map(|i| row(table, i, "x")).collect(),
                    )
                })
                .collect(),
        }
    }

    fn reassemble(batch: &ProducedBatch) -> Vec<TrackedRow> {
        (0..batch.info.part_count())
            .flat_map(|i| batch.read_part(i).unwrap())
            .flat_map(|t| t.rows)
            .collect()
    }

    #[test]
    fn empty_change_set_yields_empty_batch() {
        let batch = Batcher::partition(ChangeSet::default(), 5, 1024, None).unwrap();
        assert!(batch.info.is_empty());
        assert_eq!(batch.info.part_count(), 0);
        assert_eq!(batch.info.timestamp, 5);
    }

    #[test]
    fn small_set_fits_one_part() {
        let batch = Batcher::partition(change_set(&[("customer", 3)]), 1, 64 * 1024, None).unwrap();
        assert_eq!(batch.info.part_count(), 1);
        assert!(batch.info.in_memory);
        assert!(batch.info.parts[0].is_last);
        assert_eq!(batch.info.row_count, 3);
    }

    #[test]
    fn large_table_spans_consecutive_parts() {
        let set = change_set(&[("customer", 100)]);
        let batch = Batcher::partition(set.clone(), 1, 256, None).unwrap();
        assert!(batch.info.part_count() > 1);

        // Index order reassembly equals the original row sequence.
        let rows = reassemble(&batch);
        let original: Vec<TrackedRow> = set.tables.into_iter().flat_map(|t| t.rows).collect();
        assert_eq!(rows, original);

        // Strictly increasing indices, exactly one last part.
        for (i, part) in batch.info.parts.iter().enumerate() {
            assert_eq!(part.index, i as u32);
            assert_eq!(part.is_last, i == batch.info.parts.len() - 1);
        }
    }

    #[test]
    fn tables_stay_contiguous_across_parts() {
        let set = change_set(&[("customer", 30), ("order", 30)]);
        let batch = Batcher::partition(set, 1, 512, None).unwrap();

        let rows = reassemble(&batch);
        let first_order = rows.iter().position(|r| r.table == "order").unwrap();
        assert!(rows[..first_order].iter().all(|r| r.table == "customer"));
        assert!(rows[first_order..].iter().all(|r| r.table == "order"));
    }

    #[test]
    fn rereading_a_part_is_deterministic() {
        let batch = Batcher::partition(change_set(&[("customer", 50)]), 1, 256, None).unwrap();
        let first = batch.read_part(1).unwrap();
        let second = batch.read_part(1).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn missing_part_is_an_error() {
        let batch = Batcher::partition(change_set(&[("customer", 1)]), 1, 1024, None).unwrap();
        assert!(matches!(
            batch.read_part(9),
            Err(SyncErrorKind::MissingBatchPart { index: 9, .. })
        ));
    }

    #[test]
    fn spooled_batch_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let set = change_set(&[("customer", 40)]);
        let batch = Batcher::partition(set.clone(), 1, 256, Some(dir.path())).unwrap();

        assert!(batch.info.part_count() > 1);
        assert!(!batch.info.in_memory);

        let rows = reassemble(&batch);
        let original: Vec<TrackedRow> = set.tables.into_iter().flat_map(|t| t.rows).collect();
        assert_eq!(rows, original);

        batch.cleanup();
        assert!(!dir
            .path()
            .join(batch.info.batch_token.to_string())
            .exists());
    }

    proptest! {
        #[test]
        fn reassembly_equals_input(
            counts in proptest::collection::vec(0usize..40, 1..4),
            max_size in 64usize..2048,
        ) {
            let names = ["alpha", "beta", "gamma"];
            let layout: Vec<(&str, usize)> = counts
                .iter()
                .enumerate()
                .map(|(i, c)| (names[i % names.len()], *c))
                .collect();
            let set = change_set(&layout);
            let original: Vec<TrackedRow> =
                set.tables.iter().flat_map(|t| t.rows.clone()).collect();

            let batch = Batcher::partition(set, 1, max_size, None).unwrap();
            prop_assert_eq!(batch.info.row_count as usize, original.len());
            prop_assert_eq!(reassemble(&batch), original);
        }
    }
}
