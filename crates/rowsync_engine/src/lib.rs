//! # RowSync Engine
//!
//! Change tracking, batching, apply and orchestration for RowSync.
//!
//! This crate provides:
//! - Watermark-based change selection with loop-back suppression
//! - Size-bounded, resumable batch transport
//! - Ordered apply with conflict detection and resolution
//! - Local and remote cycle orchestrators plus the `SyncAgent` driver
//! - The storage and transport collaborator boundaries
//!
//! ## Architecture
//!
//! One sync cycle is an **upload-then-download** exchange between a client
//! and a hub:
//! 1. Agree on scope and schema (provision the client if needed)
//! 2. Upload client changes since the last acknowledged watermark
//! 3. The hub applies them, detecting and resolving conflicts
//! 4. Download hub changes since the client's last received watermark
//! 5. Persist both new watermarks in one commit
//!
//! ## Key Invariants
//!
//! - Watermarks advance only at the single commit point of a successful cycle
//! - Batch parts are immutable and individually addressable; any part may be
//!   re-sent without changing the outcome
//! - Rows applied from a peer are stamped with the sender's identity, which
//!   suppresses them from the reverse-direction selection

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod agent;
mod apply;
mod batch;
mod error;
mod interceptor;
mod memory;
mod options;
mod orchestrator;
mod store;
mod tracker;
mod transport;

pub use agent::{SyncAgent, SyncCycleResult, SyncType};
pub use apply::{ApplyEngine, ApplyOptions, ConflictResolution, SyncSide, TableApplyState};
pub use batch::{Batcher, ProducedBatch};
pub use error::{SyncError, SyncErrorKind, SyncResult};
pub use interceptor::{
    ConflictArgs, Interceptors, OutdatedAction, OutdatedArgs, ProgressArgs, SessionBeginArgs,
    SessionEndArgs, TableChangesAppliedArgs, TableChangesApplyingArgs, TableChangesSelectedArgs,
    TableChangesSelectingArgs,
};
pub use memory::MemoryStore;
pub use options::{RetryConfig, SyncOptions};
pub use orchestrator::{LocalOrchestrator, RemoteOrchestrator, RemoteProxy, SendOutcome};
pub use store::{RowVersion, ScopeStore, SelectedRow, StoreError, StoreResult, SyncStore};
pub use tracker::ChangeTracker;
pub use transport::{LoopbackTransport, SyncTransport};
