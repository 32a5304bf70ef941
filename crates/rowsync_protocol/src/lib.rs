//! # RowSync Protocol
//!
//! Sync protocol types and CBOR codecs for RowSync.
//!
//! This crate provides:
//! - `TrackedRow` and `ColumnValue` for row-state exchange
//! - `SyncSchema` / `SyncSetup` for schema agreement and table selection
//! - `ScopeInfo` / `ScopeInfoClient` for persisted sync progress
//! - `BatchInfo` / `BatchPartInfo` for multi-part change-set transport
//! - Protocol envelope messages for one request/response sync cycle
//! - Selection and apply accounting types
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod codec;
mod conflict;
mod context;
mod error;
mod messages;
mod row;
mod schema;
mod scope;
mod setup;
mod stats;
mod value;

pub use batch::{BatchInfo, BatchPartInfo, ChangeSet, TableRows};
pub use codec::{from_cbor, to_cbor};
pub use conflict::ConflictPolicy;
pub use context::{SyncContext, SyncStage};
pub use error::{ProtocolError, ProtocolResult, SchemaError};
pub use messages::{
    ChangesAckResponse, EndSessionRequest, EndSessionResponse, EnsureScopeRequest,
    EnsureScopeResponse, ErrorCode, ErrorResponse, MoreChangesRequest, MoreChangesResponse,
    SendChangesRequest, SummaryResponse, SyncEnvelope, TimestampRequest, TimestampResponse,
};
pub use row::{RowState, TrackedRow};
pub use schema::{SyncColumn, SyncRelation, SyncSchema, SyncTable};
pub use scope::{ScopeInfo, ScopeInfoClient};
pub use setup::{SetupTable, SyncFilter, SyncParameters, SyncSetup};
pub use stats::{
    DatabaseChangesApplied, DatabaseChangesSelected, TableChangesApplied, TableChangesSelected,
};
pub use value::{ColumnType, ColumnValue};
