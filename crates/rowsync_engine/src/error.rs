//! Error types for the sync engine.

use crate::store::StoreError;
use rowsync_protocol::{ColumnValue, ProtocolError, SyncStage};
use thiserror::Error;
use uuid::Uuid;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// A fatal sync failure: the kind of error plus the stage the cycle had
/// reached when it occurred.
///
/// No partial progress is ever committed before the failure surfaces; the
/// cycle's single commit point is only reached on full success, so a retried
/// cycle re-requests exactly the same range of changes.
#[derive(Error, Debug)]
#[error("sync failed at stage {stage:?}: {kind}")]
pub struct SyncError {
    /// Protocol stage the cycle had reached.
    pub stage: SyncStage,
    /// Underlying cause.
    pub kind: SyncErrorKind,
}

impl SyncError {
    /// Creates a new error at the given stage.
    pub fn new(stage: SyncStage, kind: SyncErrorKind) -> Self {
        Self { stage, kind }
    }

    /// Returns true if the underlying cause can be retried.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncErrorKind {
    /// The requested watermark predates the peer's retention floor.
    /// Recoverable only by reinitialization.
    #[error("outdated: watermark {since} is below the retention floor {min_timestamp}")]
    Outdated {
        /// Watermark the requester intended to use.
        since: u64,
        /// The peer's minimum retained timestamp.
        min_timestamp: u64,
    },

    /// A conflict the resolution callback declined to decide.
    #[error("unresolved conflict on table {table}, key {key:?}")]
    UnresolvedConflict {
        /// Table name.
        table: String,
        /// Primary-key values of the conflicting row.
        key: Vec<ColumnValue>,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether repeating the exact request may succeed.
        retryable: bool,
    },

    /// The remote side reported a failure.
    #[error("remote error: {message}")]
    Remote {
        /// Error message from the remote side.
        message: String,
    },

    /// Schema fingerprints disagree between the two sides.
    #[error("schema mismatch: local fingerprint {local}, remote fingerprint {remote}")]
    SchemaMismatch {
        /// Local fingerprint, hex-encoded.
        local: String,
        /// Remote fingerprint, hex-encoded.
        remote: String,
    },

    /// The scope does not exist on the remote side.
    #[error("scope {0} not found")]
    ScopeNotFound(String),

    /// A filter parameter required by the scope setup was not supplied.
    #[error("missing filter parameter {0}")]
    MissingParameter(String),

    /// A batch part was requested that the sender no longer holds.
    #[error("batch part {index} missing for batch {batch_token}")]
    MissingBatchPart {
        /// Batch token.
        batch_token: Uuid,
        /// Requested part index.
        index: u32,
    },

    /// The peer answered a step with the wrong envelope.
    #[error("unexpected envelope: expected {expected}, got {got}")]
    UnexpectedEnvelope {
        /// Expected step name.
        expected: &'static str,
        /// Received step name.
        got: &'static str,
    },

    /// Protocol encode/decode or schema validation error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Storage collaborator error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Spool file I/O error.
    #[error("batch spool error: {0}")]
    Spool(#[from] std::io::Error),

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncErrorKind {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Attaches the stage at which the error occurred.
    pub fn at(self, stage: SyncStage) -> SyncError {
        SyncError::new(stage, self)
    }

    /// Returns true if repeating the failed step may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncErrorKind::Transport { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

/// Hex-encodes a fingerprint for error messages.
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
