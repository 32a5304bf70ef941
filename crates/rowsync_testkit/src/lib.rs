//! # RowSync Testkit
//!
//! Test fixtures and loopback harness for RowSync.
//!
//! Provides the two-table demo schema (`customer` ← `order`), seeded
//! in-memory stores, and a fully wired client/hub pair running over the
//! in-process loopback transport.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod fixtures;

pub use fixtures::{
    customer_key, customer_values, demo_schema, demo_setup, filtered_setup, loopback_pair,
    loopback_pair_with, order_key, order_values, seed_customers, LoopbackPair,
};
