//! Demo command implementation.

use rowsync_engine::{SyncCycleResult, SyncOptions, SyncStore};
use rowsync_protocol::ConflictPolicy;
use rowsync_testkit::{
    customer_key, customer_values, loopback_pair_with, order_key, order_values, seed_customers,
};
use serde::Serialize;

const SCOPE: &str = "demo";

/// Aggregated demo output.
#[derive(Debug, Serialize)]
struct DemoResult {
    /// First cycle: cold download of the seeded hub.
    initial: SyncCycleResult,
    /// Second cycle: incremental changes from both sides.
    incremental: SyncCycleResult,
    /// Live rows per side at the end.
    server_rows: u64,
    client_rows: u64,
}

/// Runs the demo: seed the hub, sync, mutate both sides, sync again.
pub fn run(
    customers: usize,
    orders: usize,
    conflict: bool,
    policy: ConflictPolicy,
    batch_size: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let pair = loopback_pair_with(
        SCOPE,
        SyncOptions::default()
            .with_conflict_policy(policy)
            .with_batch_size_bytes(batch_size),
        SyncOptions::default().with_batch_size_bytes(batch_size),
    );

    seed_customers(&pair.server_store, 1, customers);
    let initial = pair.agent.synchronize(SCOPE)?;

    // Incremental changes on both sides.
    pair.server_store.insert(
        "customer",
        customer_key(customers as i64 + 1),
        customer_values(customers as i64 + 1, "hub-only", 0.0),
    )?;
    for id in 0..orders as i64 {
        pair.client_store
            .insert("order", order_key(id), order_values(id, 1, 9.99))?;
    }
    if conflict {
        pair.server_store.update(
            "customer",
            customer_key(1),
            customer_values(1, "edited-on-hub", 1.0),
        )?;
        pair.client_store.update(
            "customer",
            customer_key(1),
            customer_values(1, "edited-on-client", 2.0),
        )?;
    }

    let incremental = pair.agent.synchronize(SCOPE)?;

    let result = DemoResult {
        server_rows: pair.server_store.row_count("customer")?
            + pair.server_store.row_count("order")?,
        client_rows: pair.client_store.row_count("customer")?
            + pair.client_store.row_count("order")?,
        initial,
        incremental,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => {
            println!("Initial cycle:");
            println!("{}", result.initial);
            println!();
            println!("Incremental cycle:");
            println!("{}", result.incremental);
            println!();
            println!(
                "Rows after sync: server={}, client={}",
                result.server_rows, result.client_rows
            );
        }
    }

    Ok(())
}
