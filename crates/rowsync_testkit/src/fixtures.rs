//! Fixtures: demo schema, seeded stores and a loopback sync pair.

use rowsync_engine::{
    LocalOrchestrator, LoopbackTransport, MemoryStore, RemoteOrchestrator, RemoteProxy, SyncAgent,
    SyncOptions,
};
use rowsync_protocol::{
    ColumnType, ColumnValue, SetupTable, SyncColumn, SyncRelation, SyncSchema, SyncSetup,
    SyncTable,
};
use std::sync::Arc;

/// The two-table demo schema: `customer` and `order`, with
/// `order.customer_id` referencing `customer.id`.
pub fn demo_schema() -> SyncSchema {
    SyncSchema::new(
        vec![
            SyncTable::new(
                "customer",
                vec![
                    SyncColumn::new("id", ColumnType::Integer),
                    SyncColumn::new("name", ColumnType::Text),
                    SyncColumn::new("balance", ColumnType::Real),
                ],
                vec!["id".into()],
            ),
            SyncTable::new(
                "order",
                vec![
                    SyncColumn::new("id", ColumnType::Integer),
                    SyncColumn::new("customer_id", ColumnType::Integer),
                    SyncColumn::new("amount", ColumnType::Real),
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

/// Unfiltered setup over both demo tables.
pub fn demo_setup() -> SyncSetup {
    SyncSetup::from_tables(["customer", "order"])
}

/// Setup where both tables are filtered by the `customer_id` parameter.
pub fn filtered_setup() -> SyncSetup {
    SyncSetup {
        tables: vec![
            SetupTable::new("customer").with_filter("id", "customer_id"),
            SetupTable::new("order").with_filter("customer_id", "customer_id"),
        ],
    }
}

/// Primary key for a customer row.
pub fn customer_key(id: i64) -> Vec<ColumnValue> {
    vec![ColumnValue::Integer(id)]
}

/// Values for a customer row, in column order.
pub fn customer_values(id: i64, name: &str, balance: f64) -> Vec<ColumnValue> {
    vec![
        ColumnValue::Integer(id),
        ColumnValue::Text(name.into()),
        ColumnValue::Real(balance),
    ]
}

/// Primary key for an order row.
pub fn order_key(id: i64) -> Vec<ColumnValue> {
    vec![ColumnValue::Integer(id)]
}

/// Values for an order row, in column order.
pub fn order_values(id: i64, customer_id: i64, amount: f64) -> Vec<ColumnValue> {
    vec![
        ColumnValue::Integer(id),
        ColumnValue::Integer(customer_id),
        ColumnValue::Real(amount),
    ]
}

/// Inserts `count` customers with ids `start..start + count`.
pub fn seed_customers(store: &MemoryStore, start: i64, count: usize) {
    for id in start..start + count as i64 {
        store
            .insert(
                "customer",
                customer_key(id),
                customer_values(id, &format!("customer-{id}"), 100.0),
            )
            .expect("seed customer");
    }
}

/// A client/hub pair wired through the in-process loopback transport.
pub struct LoopbackPair {
    /// The hub's store.
    pub server_store: Arc<MemoryStore>,
    /// The client's store.
    pub client_store: Arc<MemoryStore>,
    /// The hub orchestrator (for interceptor registration and provisioning).
    pub remote: Arc<RemoteOrchestrator<MemoryStore>>,
    /// The agent driving cycles from the client side.
    pub agent: SyncAgent<MemoryStore, LoopbackTransport<MemoryStore>>,
}

/// Builds a provisioned loopback pair with default options on both sides.
pub fn loopback_pair(scope_name: &str) -> LoopbackPair {
    loopback_pair_with(scope_name, SyncOptions::default(), SyncOptions::default())
}

/// Builds a provisioned loopback pair with explicit options per side.
pub fn loopback_pair_with(
    scope_name: &str,
    server_options: SyncOptions,
    client_options: SyncOptions,
) -> LoopbackPair {
    let server_store = Arc::new(MemoryStore::new(demo_schema()));
    let client_store = Arc::new(MemoryStore::new(demo_schema()));

    let remote = Arc::new(RemoteOrchestrator::new(
        Arc::clone(&server_store),
        server_options,
    ));
    remote
        .provision(scope_name, demo_schema(), demo_setup())
        .expect("provision scope");

    let retry = client_options.retry.clone();
    let local = LocalOrchestrator::new(Arc::clone(&client_store), client_options);
    let proxy = RemoteProxy::new(LoopbackTransport::new(Arc::clone(&remote)), retry);

    LoopbackPair {
        server_store,
        client_store,
        remote,
        agent: SyncAgent::new(local, proxy),
    }
}
