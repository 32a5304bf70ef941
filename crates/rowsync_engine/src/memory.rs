//! In-memory tracked store.
//!
//! Reference implementation of the storage collaborator, suitable for unit
//! tests, integration tests and demos. Rows carry their tracking metadata
//! (timestamp, last-writer, tombstone flag) inline; a monotonic counter
//! plays the role of the store's logical clock.

use crate::store::{
    RowVersion, ScopeStore, SelectedRow, StoreError, StoreResult, SyncStore,
};
use parking_lot::Mutex;
use rowsync_protocol::{
    to_cbor, ColumnValue, RowState, ScopeInfo, ScopeInfoClient, SyncSchema, TrackedRow,
};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredRow {
    key: Vec<ColumnValue>,
    values: Vec<ColumnValue>,
    tombstone: bool,
    timestamp: u64,
    created: u64,
    last_writer: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
struct TableData {
    rows: BTreeMap<Vec<u8>, StoredRow>,
}

#[derive(Debug, Clone, Default)]
struct State {
    tables: BTreeMap<String, TableData>,
    counter: u64,
    floor: u64,
    scopes: BTreeMap<String, ScopeInfo>,
    scope_clients: BTreeMap<String, ScopeInfoClient>,
}

#[derive(Debug, Default)]
struct Inner {
    state: State,
    snapshot: Option<State>,
    fail_after_writes: Option<u64>,
}

/// An in-memory tracked store.
///
/// Thread-safe; transactions are snapshot-based (`begin` captures the full
/// state, `rollback` restores it), giving the all-or-nothing apply semantics
/// the engine expects from the storage collaborator.
pub struct MemoryStore {
    schema: SyncSchema,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates a store holding the schema's tables, all empty.
    pub fn new(schema: SyncSchema) -> Self {
        let mut state = State::default();
        for table in &schema.tables {
            state.tables.insert(table.name.clone(), TableData::default());
        }
        Self {
            schema,
            inner: Mutex::new(Inner {
                state,
                snapshot: None,
                fail_after_writes: None,
            }),
        }
    }

    /// Returns the store's schema.
    pub fn schema(&self) -> &SyncSchema {
        &self.schema
    }

    /// Inserts a row as a local edit (no last-writer attribution).
    pub fn insert(
        &self,
        table: &str,
        key: Vec<ColumnValue>,
        values: Vec<ColumnValue>,
    ) -> StoreResult<()> {
        self.write_row(table, &key, &values, None, true)
    }

    /// Updates a row as a local edit.
    pub fn update(
        &self,
        table: &str,
        key: Vec<ColumnValue>,
        values: Vec<ColumnValue>,
    ) -> StoreResult<()> {
        {
            let inner = self.inner.lock();
            let data = table_data(&inner.state, table)?;
            let encoded = encode_key(&key)?;
            match data.rows.get(&encoded) {
                Some(row) if !row.tombstone => {}
                _ => return Err(StoreError::RowNotFound(table.to_string())),
            }
        }
        self.write_row(table, &key, &values, None, true)
    }

    /// Deletes a row as a local edit, leaving a tombstone.
    pub fn delete(&self, table: &str, key: Vec<ColumnValue>) -> StoreResult<()> {
        self.delete_row(table, &key, None)
    }

    /// Reads a live row's values.
    pub fn get(&self, table: &str, key: &[ColumnValue]) -> StoreResult<Option<Vec<ColumnValue>>> {
        let inner = self.inner.lock();
        let data = table_data(&inner.state, table)?;
        let encoded = encode_key(key)?;
        Ok(data
            .rows
            .get(&encoded)
            .filter(|r| !r.tombstone)
            .map(|r| r.values.clone()))
    }

    /// Arranges for the n-th subsequent write to fail with a connection
    /// loss, for transaction-abort tests.
    pub fn fail_after_writes(&self, writes: u64) {
        self.inner.lock().fail_after_writes = Some(writes);
    }

    fn write_row(
        &self,
        table: &str,
        key: &[ColumnValue],
        values: &[ColumnValue],
        writer: Option<Uuid>,
        check_constraints: bool,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.consume_write_budget()?;

        if check_constraints {
            self.check_foreign_keys(&inner.state, table, values)?;
        }

        let encoded = encode_key(key)?;
        inner.state.counter += 1;
        let ts = inner.state.counter;

        let data = table_data_mut(&mut inner.state, table)?;
        match data.rows.get_mut(&encoded) {
            Some(row) => {
                row.values = values.to_vec();
                row.tombstone = false;
                row.timestamp = ts;
                row.last_writer = writer;
            }
            None => {
                data.rows.insert(
                    encoded,
                    StoredRow {
                        key: key.to_vec(),
                        values: values.to_vec(),
                        tombstone: false,
                        timestamp: ts,
                        created: ts,
                        last_writer: writer,
                    },
                );
            }
        }
        Ok(())
    }

    fn check_foreign_keys(
        &self,
        state: &State,
        table: &str,
        values: &[ColumnValue],
    ) -> StoreResult<()> {
        let child = self
            .schema
            .table(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        'relations: for relation in self
            .schema
            .relations
            .iter()
            .filter(|r| r.child_table == table)
        {
            let mut parent_key = Vec::with_capacity(relation.child_columns.len());
            for column in &relation.child_columns {
                let index =
                    child
                        .column_index(column)
                        .ok_or_else(|| StoreError::ColumnNotFound {
                            table: table.to_string(),
                            column: column.clone(),
                        })?;
                match values.get(index) {
                    // A null foreign key is not checked.
                    Some(ColumnValue::Null) | None => continue 'relations,
                    Some(value) => parent_key.push(value.clone()),
                }
            }

            let parent = table_data(state, &relation.parent_table)?;
            let encoded = encode_key(&parent_key)?;
            let present = parent
                .rows
                .get(&encoded)
                .map(|r| !r.tombstone)
                .unwrap_or(false);
            if !present {
                return Err(StoreError::ConstraintViolation {
                    table: table.to_string(),
                    parent: relation.parent_table.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Inner {
    fn consume_write_budget(&mut self) -> StoreResult<()> {
        if let Some(remaining) = self.fail_after_writes {
            if remaining == 0 {
                return Err(StoreError::ConnectionLost("injected failure".into()));
            }
            self.fail_after_writes = Some(remaining - 1);
        }
        Ok(())
    }
}

fn table_data<'a>(state: &'a State, table: &str) -> StoreResult<&'a TableData> {
    state
        .tables
        .get(table)
        .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
}

fn table_data_mut<'a>(state: &'a mut State, table: &str) -> StoreResult<&'a mut TableData> {
    state
        .tables
        .get_mut(table)
        .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
}

fn encode_key(key: &[ColumnValue]) -> StoreResult<Vec<u8>> {
    to_cbor(&key.to_vec()).map_err(|e| StoreError::Encoding(e.to_string()))
}

impl SyncStore for MemoryStore {
    fn select_changes(
        &self,
        table: &str,
        since: u64,
        exclude_writer: Option<Uuid>,
        filter: Option<(&str, &ColumnValue)>,
    ) -> StoreResult<Vec<SelectedRow>> {
        let inner = self.inner.lock();
        let data = table_data(&inner.state, table)?;

        let filter_index = match filter {
            Some((column, _)) => {
                let schema_table = self
                    .schema
                    .table(table)
                    .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;
                Some(schema_table.column_index(column).ok_or_else(|| {
                    StoreError::ColumnNotFound {
                        table: table.to_string(),
                        column: column.to_string(),
                    }
                })?)
            }
            None => None,
        };

        let mut selected = Vec::new();
        for row in data.rows.values() {
            if row.timestamp <= since {
                continue;
            }
            if exclude_writer.is_some() && row.last_writer == exclude_writer {
                continue;
            }
            if !row.tombstone {
                if let (Some(index), Some((_, value))) = (filter_index, filter) {
                    if row.values.get(index) != Some(value) {
                        continue;
                    }
                }
            }

            let state = if row.tombstone {
                RowState::Delete
            } else if row.created > since {
                RowState::Insert
            } else {
                RowState::Update
            };

            let tracked = if row.tombstone {
                TrackedRow::tombstone(table, row.key.clone(), row.timestamp, row.last_writer)
            } else {
                TrackedRow::new(
                    table,
                    row.key.clone(),
                    row.values.clone(),
                    row.timestamp,
                    row.last_writer,
                )
            };

            selected.push(SelectedRow {
                row: tracked,
                state,
            });
        }
        Ok(selected)
    }

    fn fetch_row(&self, table: &str, key: &[ColumnValue]) -> StoreResult<Option<RowVersion>> {
        let inner = self.inner.lock();
        let data = table_data(&inner.state, table)?;
        let encoded = encode_key(key)?;
        Ok(data.rows.get(&encoded).map(|r| RowVersion {
            values: r.values.clone(),
            tombstone: r.tombstone,
            timestamp: r.timestamp,
            last_writer: r.last_writer,
        }))
    }

    fn upsert_row(
        &self,
        table: &str,
        key: &[ColumnValue],
        values: &[ColumnValue],
        writer: Option<Uuid>,
        check_constraints: bool,
    ) -> StoreResult<()> {
        self.write_row(table, key, values, writer, check_constraints)
    }

    fn delete_row(
        &self,
        table: &str,
        key: &[ColumnValue],
        writer: Option<Uuid>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.consume_write_budget()?;

        let encoded = encode_key(key)?;
        inner.state.counter += 1;
        let ts = inner.state.counter;

        let data = table_data_mut(&mut inner.state, table)?;
        match data.rows.get_mut(&encoded) {
            Some(row) => {
                row.values = Vec::new();
                row.tombstone = true;
                row.timestamp = ts;
                row.last_writer = writer;
            }
            None => {
                // Deleting an unknown row still leaves a tombstone so the
                // delete can propagate.
                data.rows.insert(
                    encoded,
                    StoredRow {
                        key: key.to_vec(),
                        values: Vec::new(),
                        tombstone: true,
                        timestamp: ts,
                        created: ts,
                        last_writer: writer,
                    },
                );
            }
        }
        Ok(())
    }

    fn reset_table(&self, table: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let data = table_data_mut(&mut inner.state, table)?;
        data.rows.clear();
        Ok(())
    }

    fn begin(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.snapshot.is_some() {
            return Err(StoreError::TransactionActive);
        }
        inner.snapshot = Some(inner.state.clone());
        Ok(())
    }

    fn commit(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.snapshot.take().is_none() {
            return Err(StoreError::NoTransaction);
        }
        Ok(())
    }

    fn rollback(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        match inner.snapshot.take() {
            Some(snapshot) => {
                inner.state = snapshot;
                Ok(())
            }
            None => Err(StoreError::NoTransaction),
        }
    }

    fn local_timestamp(&self) -> StoreResult<u64> {
        Ok(self.inner.lock().state.counter)
    }

    fn min_timestamp(&self) -> StoreResult<u64> {
        Ok(self.inner.lock().state.floor)
    }

    fn delete_metadata(&self, before: u64) -> StoreResult<u64> {
        let mut inner = self.inner.lock();
        let mut purged = 0u64;
        for data in inner.state.tables.values_mut() {
            let before_len = data.rows.len();
            data.rows
                .retain(|_, row| !(row.tombstone && row.timestamp <= before));
            purged += (before_len - data.rows.len()) as u64;
        }
        inner.state.floor = inner.state.floor.max(before);
        Ok(purged)
    }

    fn row_count(&self, table: &str) -> StoreResult<u64> {
        let inner = self.inner.lock();
        let data = table_data(&inner.state, table)?;
        Ok(data.rows.values().filter(|r| !r.tombstone).count() as u64)
    }
}

impl ScopeStore for MemoryStore {
    fn get_scope_info(&self, name: &str) -> StoreResult<Option<ScopeInfo>> {
        Ok(self.inner.lock().state.scopes.get(name).cloned())
    }

    fn save_scope_info(&self, info: &ScopeInfo) -> StoreResult<()> {
        self.inner
            .lock()
            .state
            .scopes
            .insert(info.name.clone(), info.clone());
        Ok(())
    }

    fn get_scope_info_client(&self, scope_name: &str) -> StoreResult<Option<ScopeInfoClient>> {
        Ok(self
            .inner
            .lock()
            .state
            .scope_clients
            .get(scope_name)
            .cloned())
    }

    fn save_scope_info_client(&self, client: &ScopeInfoClient) -> StoreResult<()> {
        self.inner
            .lock()
            .state
            .scope_clients
            .insert(client.scope_name.clone(), client.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowsync_protocol::{ColumnType, SyncColumn, SyncRelation, SyncTable};

    fn schema() -> SyncSchema {
        SyncSchema::new(
            vec![
                SyncTable::new(
                    "customer",
                    vec![
                        SyncColumn::new("id", ColumnType::Integer),
                        SyncColumn::new("name", ColumnType::Text),
                    ],
                    vec!["id".into()],
                ),
                SyncTable::new(
                    "order",
                    vec![
                        SyncColumn::new("id", ColumnType::Integer),
                        SyncColumn::new("customer_id", ColumnType::Integer),
                    ],
                    vec!["id".into()],
                ),
            ],
            vec![SyncRelation {
                child_table: "order".into(),
                child_columns: vec!["customer_id".into()],
                parent_table: "customer".into(),
            }],
        )
    }

    fn key(id: i64) -> Vec<ColumnValue> {
        vec![ColumnValue::Integer(id)]
    }

    #[test]
    fn timestamps_are_monotonic() {
        let store = MemoryStore::new(schema());
        store
            .insert("customer", key(1), vec![1i64.into(), "Ada".into()])
            .unwrap();
        let t1 = store.local_timestamp().unwrap();

        store
            .update("customer", key(1), vec![1i64.into(), "Grace".into()])
            .unwrap();
        let t2 = store.local_timestamp().unwrap();

        assert!(t2 > t1);
    }

    #[test]
    fn select_excludes_writer() {
        let store = MemoryStore::new(schema());
        let peer = Uuid::from_u128(7);

        store
            .insert("customer", key(1), vec![1i64.into(), "Ada".into()])
            .unwrap();
        store
            .upsert_row(
                "customer",
                &key(2),
                &[2i64.into(), "Grace".into()],
                Some(peer),
                true,
            )
            .unwrap();

        let all = store.select_changes("customer", 0, None, None).unwrap();
        assert_eq!(all.len(), 2);

        let without_peer = store
            .select_changes("customer", 0, Some(peer), None)
            .unwrap();
        assert_eq!(without_peer.len(), 1);
        assert_eq!(without_peer[0].row.key, key(1));
    }

    #[test]
    fn select_classifies_states() {
        let store = MemoryStore::new(schema());
        store
            .insert("customer", key(1), vec![1i64.into(), "Ada".into()])
            .unwrap();
        let watermark = store.local_timestamp().unwrap();

        store
            .update("customer", key(1), vec![1i64.into(), "Grace".into()])
            .unwrap();
        store
            .insert("customer", key(2), vec![2i64.into(), "Edsger".into()])
            .unwrap();
        store.delete("customer", key(2)).unwrap();

        let selected = store
            .select_changes("customer", watermark, None, None)
            .unwrap();

        assert_eq!(selected.len(), 2);
        assert!(selected.iter().any(|s| s.state == RowState::Update));
        assert!(selected.iter().any(|s| s.state == RowState::Delete));
    }

    #[test]
    fn filter_matches_live_rows_only() {
        let store = MemoryStore::new(schema());
        store
            .insert("customer", key(1), vec![1i64.into(), "Ada".into()])
            .unwrap();
        store
            .insert("customer", key(2), vec![2i64.into(), "Grace".into()])
            .unwrap();
        store.delete("customer", key(2)).unwrap();

        let value = ColumnValue::Integer(1);
        let selected = store
            .select_changes("customer", 0, None, Some(("id", &value)))
            .unwrap();

        // Row 1 matches the filter; row 2's tombstone passes it.
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn foreign_key_enforced() {
        let store = MemoryStore::new(schema());

        let result = store.insert("order", key(1), vec![1i64.into(), 99i64.into()]);
        assert!(matches!(
            result,
            Err(StoreError::ConstraintViolation { .. })
        ));

        store
            .insert("customer", key(99), vec![99i64.into(), "Ada".into()])
            .unwrap();
        store
            .insert("order", key(1), vec![1i64.into(), 99i64.into()])
            .unwrap();
    }

    #[test]
    fn rollback_restores_state() {
        let store = MemoryStore::new(schema());
        store
            .insert("customer", key(1), vec![1i64.into(), "Ada".into()])
            .unwrap();

        store.begin().unwrap();
        store
            .insert("customer", key(2), vec![2i64.into(), "Grace".into()])
            .unwrap();
        store.delete("customer", key(1)).unwrap();
        store.rollback().unwrap();

        assert_eq!(store.row_count("customer").unwrap(), 1);
        assert!(store.get("customer", &key(1)).unwrap().is_some());
        assert!(store.get("customer", &key(2)).unwrap().is_none());
    }

    #[test]
    fn delete_metadata_raises_floor() {
        let store = MemoryStore::new(schema());
        store
            .insert("customer", key(1), vec![1i64.into(), "Ada".into()])
            .unwrap();
        store.delete("customer", key(1)).unwrap();
        let ts = store.local_timestamp().unwrap();

        let purged = store.delete_metadata(ts).unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.min_timestamp().unwrap(), ts);

        let selected = store.select_changes("customer", 0, None, None).unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn injected_failure_surfaces_as_connection_loss() {
        let store = MemoryStore::new(schema());
        store.fail_after_writes(1);

        store
            .insert("customer", key(1), vec![1i64.into(), "Ada".into()])
            .unwrap();
        let result = store.insert("customer", key(2), vec![2i64.into(), "Grace".into()]);
        assert!(matches!(result, Err(StoreError::ConnectionLost(_))));
    }

    #[test]
    fn scope_records_roundtrip() {
        let store = MemoryStore::new(schema());

        let client = ScopeInfoClient::new("sales");
        store.save_scope_info_client(&client).unwrap();
        let loaded = store.get_scope_info_client("sales").unwrap().unwrap();
        assert_eq!(loaded, client);
        assert!(store.get_scope_info("sales").unwrap().is_none());
    }
}
