//! Storage collaborator boundary.
//!
//! The engine never generates SQL or touches a concrete storage engine; it
//! consumes these traits. A production implementation wraps a relational
//! store and its change-tracking metadata; [`crate::MemoryStore`] is the
//! in-process reference implementation.

use rowsync_protocol::{ColumnValue, RowState, ScopeInfo, ScopeInfoClient, TrackedRow};
use thiserror::Error;
use uuid::Uuid;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the storage collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The table is not part of the store's schema.
    #[error("table {0} not found")]
    TableNotFound(String),

    /// The row is not present.
    #[error("row not found in table {0}")]
    RowNotFound(String),

    /// A referenced column does not exist.
    #[error("column {column} not found in table {table}")]
    ColumnNotFound {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A foreign-key check failed for one row.
    #[error("constraint violation on table {table}: missing parent row in {parent}")]
    ConstraintViolation {
        /// Referencing table.
        table: String,
        /// Referenced table whose row is missing.
        parent: String,
    },

    /// A transaction is already active.
    #[error("transaction already active")]
    TransactionActive,

    /// No transaction is active.
    #[error("no active transaction")]
    NoTransaction,

    /// The store became unreachable; the surrounding transaction is lost.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Key or value encoding failed.
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl StoreError {
    /// True for per-row failures that do not poison the surrounding
    /// transaction (the rest of the batch part can proceed).
    pub fn is_row_error(&self) -> bool {
        matches!(
            self,
            StoreError::ConstraintViolation { .. } | StoreError::RowNotFound(_)
        )
    }
}

/// Current version of a destination row, read for conflict comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct RowVersion {
    /// Column values; empty for tombstones.
    pub values: Vec<ColumnValue>,
    /// True if the row is a deletion marker.
    pub tombstone: bool,
    /// Logical timestamp of the last change.
    pub timestamp: u64,
    /// Participant that last wrote the row; `None` for local edits.
    pub last_writer: Option<Uuid>,
}

/// One selected change plus its classification relative to the watermark.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedRow {
    /// The row.
    pub row: TrackedRow,
    /// Insert, update or delete.
    pub state: RowState,
}

/// The tracked-change store consumed by the engine.
///
/// All row writes must update the co-located tracking metadata (timestamp,
/// last-writer, tombstone flag) atomically with the row itself.
pub trait SyncStore: Send + Sync {
    /// Selects rows of `table` whose change timestamp is greater than
    /// `since`, excluding rows last written by `exclude_writer`. Live rows
    /// must additionally match `filter` (column equality) when given;
    /// tombstones always pass filters.
    fn select_changes(
        &self,
        table: &str,
        since: u64,
        exclude_writer: Option<Uuid>,
        filter: Option<(&str, &ColumnValue)>,
    ) -> StoreResult<Vec<SelectedRow>>;

    /// Reads the current version of a row, tombstones included.
    fn fetch_row(&self, table: &str, key: &[ColumnValue]) -> StoreResult<Option<RowVersion>>;

    /// Writes a live row, stamping the tracking metadata with `writer`.
    /// When `check_constraints` is set, a missing foreign parent is a
    /// [`StoreError::ConstraintViolation`].
    fn upsert_row(
        &self,
        table: &str,
        key: &[ColumnValue],
        values: &[ColumnValue],
        writer: Option<Uuid>,
        check_constraints: bool,
    ) -> StoreResult<()>;

    /// Writes a tombstone, stamping the tracking metadata with `writer`.
    fn delete_row(&self, table: &str, key: &[ColumnValue], writer: Option<Uuid>)
        -> StoreResult<()>;

    /// Removes all rows and tracking metadata of a table (reinitialization).
    fn reset_table(&self, table: &str) -> StoreResult<()>;

    /// Begins a unit of work covering subsequent writes.
    fn begin(&self) -> StoreResult<()>;

    /// Commits the active unit of work.
    fn commit(&self) -> StoreResult<()>;

    /// Rolls back the active unit of work.
    fn rollback(&self) -> StoreResult<()>;

    /// Current logical timestamp (monotonic, incremented on every tracked
    /// mutation).
    fn local_timestamp(&self) -> StoreResult<u64>;

    /// Minimum retained timestamp. Watermarks below this value cannot be
    /// served incrementally.
    fn min_timestamp(&self) -> StoreResult<u64>;

    /// Purges tracking metadata (tombstones) older than `before`, raising
    /// the retention floor. Returns the number of purged records.
    fn delete_metadata(&self, before: u64) -> StoreResult<u64>;

    /// Number of live rows in a table.
    fn row_count(&self, table: &str) -> StoreResult<u64>;
}

/// Durable record of sync progress per scope.
pub trait ScopeStore: Send + Sync {
    /// Reads a scope record.
    fn get_scope_info(&self, name: &str) -> StoreResult<Option<ScopeInfo>>;

    /// Writes a scope record.
    fn save_scope_info(&self, info: &ScopeInfo) -> StoreResult<()>;

    /// Reads the client bookkeeping record for a scope.
    fn get_scope_info_client(&self, scope_name: &str) -> StoreResult<Option<ScopeInfoClient>>;

    /// Writes the client bookkeeping record for a scope.
    fn save_scope_info_client(&self, client: &ScopeInfoClient) -> StoreResult<()>;
}
