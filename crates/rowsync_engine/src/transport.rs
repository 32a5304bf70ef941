//! Transport collaborator boundary.

use crate::error::SyncErrorKind;
use crate::orchestrator::RemoteOrchestrator;
use crate::store::{ScopeStore, SyncStore};
use rowsync_protocol::{ErrorCode, ErrorResponse, SyncEnvelope};
use std::sync::Arc;

/// Sends one envelope and returns the peer's reply.
///
/// This trait abstracts the network layer; implementations may frame
/// envelopes over HTTP, a message queue, or dispatch in-process. Requests
/// are fully idempotent, so an implementation may safely re-send an envelope
/// that failed in flight.
pub trait SyncTransport: Send + Sync {
    /// Performs one request/response exchange.
    fn send(&self, envelope: SyncEnvelope) -> Result<SyncEnvelope, SyncErrorKind>;
}

/// In-process transport: dispatches envelopes straight to a
/// [`RemoteOrchestrator`], turning its failures into protocol error
/// envelopes the way a wire transport would.
pub struct LoopbackTransport<S> {
    remote: Arc<RemoteOrchestrator<S>>,
}

impl<S> LoopbackTransport<S> {
    /// Creates a loopback transport over a remote orchestrator.
    pub fn new(remote: Arc<RemoteOrchestrator<S>>) -> Self {
        Self { remote }
    }
}

impl<S: SyncStore + ScopeStore> SyncTransport for LoopbackTransport<S> {
    fn send(&self, envelope: SyncEnvelope) -> Result<SyncEnvelope, SyncErrorKind> {
        match self.remote.handle(envelope) {
            Ok(reply) => Ok(reply),
            Err(kind) => Ok(SyncEnvelope::Error(error_response(&kind))),
        }
    }
}

fn error_response(kind: &SyncErrorKind) -> ErrorResponse {
    let code = match kind {
        SyncErrorKind::Outdated {
            since,
            min_timestamp,
        } => ErrorCode::Outdated {
            since: *since,
            min_timestamp: *min_timestamp,
        },
        SyncErrorKind::ScopeNotFound(_) => ErrorCode::ScopeNotFound,
        SyncErrorKind::SchemaMismatch { .. } => ErrorCode::SchemaMismatch,
        _ => ErrorCode::Internal,
    };
    ErrorResponse {
        context: None,
        code,
        message: kind.to_string(),
        retryable: kind.is_retryable(),
    }
}
