//! Protocol envelope messages for one sync cycle.
//!
//! Every request/response carries the cycle's [`SyncContext`] for
//! correlation. One cycle exchanges, in order: `EnsureScope`, `GetTimestamp`,
//! `SendChanges` part 0..n (the response to the last part is the `Summary`
//! that opens the download direction), `GetMoreChanges` per remaining
//! download part, and `EndSession`.

use crate::batch::{BatchInfo, BatchPartInfo, TableRows};
use crate::conflict::ConflictPolicy;
use crate::context::SyncContext;
use crate::scope::{ScopeInfo, ScopeInfoClient};
use crate::setup::SyncParameters;
use crate::stats::{DatabaseChangesApplied, DatabaseChangesSelected};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A sync protocol envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncEnvelope {
    /// Scope agreement request.
    EnsureScope(EnsureScopeRequest),
    /// Scope agreement response.
    EnsureScopeReply(EnsureScopeResponse),
    /// Timestamp request.
    GetTimestamp(TimestampRequest),
    /// Timestamp response.
    Timestamp(TimestampResponse),
    /// Upload of one batch part.
    SendChanges(SendChangesRequest),
    /// Acknowledgement of a non-final upload part.
    ChangesAck(ChangesAckResponse),
    /// Apply summary plus download batch metadata, sent for the final
    /// upload part.
    Summary(SummaryResponse),
    /// Download part request (resumption token + index).
    GetMoreChanges(MoreChangesRequest),
    /// Download part response.
    MoreChanges(MoreChangesResponse),
    /// Session end request.
    EndSession(EndSessionRequest),
    /// Session end response.
    SessionEnded(EndSessionResponse),
    /// Error response.
    Error(ErrorResponse),
}

impl SyncEnvelope {
    /// Short name of the protocol step, for logging.
    pub fn step_name(&self) -> &'static str {
        match self {
            SyncEnvelope::EnsureScope(_) => "ensure_scope",
            SyncEnvelope::EnsureScopeReply(_) => "ensure_scope_reply",
            SyncEnvelope::GetTimestamp(_) => "get_timestamp",
            SyncEnvelope::Timestamp(_) => "timestamp",
            SyncEnvelope::SendChanges(_) => "send_changes",
            SyncEnvelope::ChangesAck(_) => "changes_ack",
            SyncEnvelope::Summary(_) => "summary",
            SyncEnvelope::GetMoreChanges(_) => "get_more_changes",
            SyncEnvelope::MoreChanges(_) => "more_changes",
            SyncEnvelope::EndSession(_) => "end_session",
            SyncEnvelope::SessionEnded(_) => "session_ended",
            SyncEnvelope::Error(_) => "error",
        }
    }
}

/// Requests the hub's scope record for schema agreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsureScopeRequest {
    /// Cycle context.
    pub context: SyncContext,
}

/// The hub's scope record and conflict policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsureScopeResponse {
    /// Cycle context.
    pub context: SyncContext,
    /// Scope record authored by the hub.
    pub scope_info: ScopeInfo,
    /// Conflict policy enforced by the hub.
    pub policy: ConflictPolicy,
}

/// Requests the hub's current and minimum retained timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampRequest {
    /// Cycle context.
    pub context: SyncContext,
}

/// The hub's timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampResponse {
    /// Cycle context.
    pub context: SyncContext,
    /// Current logical timestamp.
    pub timestamp: u64,
    /// Minimum retained timestamp (retention floor). A client watermark
    /// below this value is outdated.
    pub min_timestamp: u64,
}

/// One upload part, client to hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendChangesRequest {
    /// Cycle context.
    pub context: SyncContext,
    /// The client's bookkeeping record; `last_server_timestamp` is the
    /// conflict baseline for the hub-side apply.
    pub client_scope: ScopeInfoClient,
    /// Filter parameter values for the download selection.
    pub parameters: SyncParameters,
    /// Watermark for the download selection; 0 requests a cold snapshot.
    pub download_since: u64,
    /// Part metadata.
    pub part: BatchPartInfo,
    /// Part payload.
    pub rows: Vec<TableRows>,
}

/// Acknowledges a non-final upload part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesAckResponse {
    /// Cycle context.
    pub context: SyncContext,
    /// Index of the part acknowledged.
    pub batch_index: u32,
}

/// Response to the final upload part: the hub's apply accounting plus the
/// metadata of the download batch it selected for the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryResponse {
    /// Cycle context.
    pub context: SyncContext,
    /// Hub timestamp read before the download selection; becomes the
    /// client's `last_server_timestamp` at commit.
    pub remote_timestamp: u64,
    /// Download batch metadata; parts are fetched with `GetMoreChanges`.
    pub batch: BatchInfo,
    /// The hub's selection accounting for the download direction.
    pub server_changes_selected: DatabaseChangesSelected,
    /// The hub's apply accounting for the upload direction.
    pub changes_applied_on_server: DatabaseChangesApplied,
}

/// Requests one download part by resumption token and index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoreChangesRequest {
    /// Cycle context.
    pub context: SyncContext,
    /// Batch token from the summary.
    pub batch_token: Uuid,
    /// Requested part index.
    pub index: u32,
}

/// One download part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoreChangesResponse {
    /// Cycle context.
    pub context: SyncContext,
    /// Part metadata.
    pub part: BatchPartInfo,
    /// Part payload.
    pub rows: Vec<TableRows>,
}

/// Ends the cycle; the hub reclaims any spooled batch for the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndSessionRequest {
    /// Cycle context.
    pub context: SyncContext,
    /// Download batch to reclaim, if one was produced.
    pub batch_token: Option<Uuid>,
}

/// Confirms session end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndSessionResponse {
    /// Cycle context.
    pub context: SyncContext,
}

/// Structured error classification carried across the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The requested watermark predates the hub's retention floor.
    Outdated {
        /// Watermark the requester intended to use.
        since: u64,
        /// The hub's minimum retained timestamp.
        min_timestamp: u64,
    },
    /// The requested scope does not exist on the hub.
    ScopeNotFound,
    /// Schema fingerprints disagree.
    SchemaMismatch,
    /// Unclassified hub-side failure.
    Internal,
}

/// Error envelope from the remote side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Cycle context, when one was established.
    pub context: Option<SyncContext>,
    /// Error classification.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// True if repeating the exact request may succeed.
    pub retryable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_cbor, to_cbor};
    use crate::row::TrackedRow;
    use crate::value::ColumnValue;

    #[test]
    fn ensure_scope_roundtrip() {
        let req = EnsureScopeRequest {
            context: SyncContext::new("sales"),
        };
        let env = SyncEnvelope::EnsureScope(req.clone());

        let bytes = to_cbor(&env).unwrap();
        let decoded: SyncEnvelope = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, SyncEnvelope::EnsureScope(req));
    }

    #[test]
    fn send_changes_roundtrip() {
        let row = TrackedRow::new(
            "customer",
            vec![ColumnValue::Integer(1)],
            vec![ColumnValue::Text("Ada".into())],
            9,
            None,
        );
        let env = SyncEnvelope::SendChanges(SendChangesRequest {
            context: SyncContext::new("sales"),
            client_scope: ScopeInfoClient::new("sales"),
            parameters: SyncParameters::new(),
            download_since: 5,
            part: BatchPartInfo {
                index: 0,
                tables: vec!["customer".into()],
                row_count: 1,
                is_last: true,
            },
            rows: vec![TableRows::new("customer", vec![row])],
        });

        let bytes = to_cbor(&env).unwrap();
        let decoded: SyncEnvelope = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn error_code_roundtrip() {
        let env = SyncEnvelope::Error(ErrorResponse {
            context: None,
            code: ErrorCode::Outdated {
                since: 10,
                min_timestamp: 50,
            },
            message: "watermark below retention floor".into(),
            retryable: false,
        });

        let bytes = to_cbor(&env).unwrap();
        let decoded: SyncEnvelope = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn step_names() {
        let env = SyncEnvelope::GetTimestamp(TimestampRequest {
            context: SyncContext::new("sales"),
        });
        assert_eq!(env.step_name(), "get_timestamp");
    }
}
