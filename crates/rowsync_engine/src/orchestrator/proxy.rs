//! Client-side proxy to a remote orchestrator.

use crate::error::SyncErrorKind;
use crate::options::RetryConfig;
use crate::transport::SyncTransport;
use rowsync_protocol::{
    BatchPartInfo, ConflictPolicy, EndSessionRequest, EnsureScopeRequest, ErrorCode,
    ErrorResponse, MoreChangesRequest, ScopeInfo, ScopeInfoClient, SendChangesRequest,
    SummaryResponse, SyncContext, SyncEnvelope, SyncParameters, TableRows, TimestampRequest,
};
use tracing::warn;
use uuid::Uuid;

/// Outcome of sending one upload part.
#[derive(Debug)]
pub enum SendOutcome {
    /// A non-final part was acknowledged.
    Ack,
    /// The final part was applied; the summary opens the download direction.
    Summary(SummaryResponse),
}

/// Speaks the envelope protocol to a remote orchestrator over a transport.
///
/// Transient transport failures are retried with bounded backoff; a retry
/// repeats the exact envelope that failed, which is safe because every
/// request in the protocol is idempotent.
pub struct RemoteProxy<T> {
    transport: T,
    retry: RetryConfig,
}

impl<T: SyncTransport> RemoteProxy<T> {
    /// Creates a proxy over a transport.
    pub fn new(transport: T, retry: RetryConfig) -> Self {
        Self { transport, retry }
    }

    fn call(&self, envelope: SyncEnvelope) -> Result<SyncEnvelope, SyncErrorKind> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.retry.delay_for_attempt(attempt);
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                warn!(step = envelope.step_name(), attempt, "retrying transport step");
            }

            let kind = match self.transport.send(envelope.clone()) {
                Ok(SyncEnvelope::Error(response)) => map_error(response),
                Ok(reply) => return Ok(reply),
                Err(kind) => kind,
            };

            if kind.is_retryable() && attempt + 1 < attempts {
                last_error = Some(kind);
            } else {
                return Err(kind);
            }
        }

        Err(last_error
            .unwrap_or_else(|| SyncErrorKind::transport_fatal("no transport attempts made")))
    }

    /// Fetches the hub's scope record and conflict policy.
    pub fn ensure_scope(
        &self,
        ctx: &mut SyncContext,
    ) -> Result<(ScopeInfo, ConflictPolicy), SyncErrorKind> {
        let reply = self.call(SyncEnvelope::EnsureScope(EnsureScopeRequest {
            context: ctx.clone(),
        }))?;
        match reply {
            SyncEnvelope::EnsureScopeReply(response) => {
                *ctx = response.context;
                Ok((response.scope_info, response.policy))
            }
            other => Err(unexpected("ensure_scope_reply", &other)),
        }
    }

    /// Fetches the hub's current timestamp and retention floor.
    pub fn get_timestamp(&self, ctx: &mut SyncContext) -> Result<(u64, u64), SyncErrorKind> {
        let reply = self.call(SyncEnvelope::GetTimestamp(TimestampRequest {
            context: ctx.clone(),
        }))?;
        match reply {
            SyncEnvelope::Timestamp(response) => {
                *ctx = response.context;
                Ok((response.timestamp, response.min_timestamp))
            }
            other => Err(unexpected("timestamp", &other)),
        }
    }

    /// Sends one upload part.
    #[allow(clippy::too_many_arguments)]
    pub fn send_changes(
        &self,
        ctx: &mut SyncContext,
        client_scope: &ScopeInfoClient,
        parameters: &SyncParameters,
        download_since: u64,
        part: BatchPartInfo,
        rows: Vec<TableRows>,
    ) -> Result<SendOutcome, SyncErrorKind> {
        let is_last = part.is_last;
        let reply = self.call(SyncEnvelope::SendChanges(SendChangesRequest {
            context: ctx.clone(),
            client_scope: client_scope.clone(),
            parameters: parameters.clone(),
            download_since,
            part,
            rows,
        }))?;

        match reply {
            SyncEnvelope::ChangesAck(response) if !is_last => {
                *ctx = response.context;
                Ok(SendOutcome::Ack)
            }
            SyncEnvelope::Summary(response) if is_last => {
                *ctx = response.context.clone();
                Ok(SendOutcome::Summary(response))
            }
            other => Err(unexpected(
                if is_last { "summary" } else { "changes_ack" },
                &other,
            )),
        }
    }

    /// Fetches one download part by resumption token and index.
    pub fn get_more_changes(
        &self,
        ctx: &mut SyncContext,
        batch_token: Uuid,
        index: u32,
    ) -> Result<(BatchPartInfo, Vec<TableRows>), SyncErrorKind> {
        let reply = self.call(SyncEnvelope::GetMoreChanges(MoreChangesRequest {
            context: ctx.clone(),
            batch_token,
            index,
        }))?;
        match reply {
            SyncEnvelope::MoreChanges(response) => {
                *ctx = response.context;
                Ok((response.part, response.rows))
            }
            other => Err(unexpected("more_changes", &other)),
        }
    }

    /// Ends the cycle on the hub side, reclaiming any spooled batch.
    pub fn end_session(
        &self,
        ctx: &mut SyncContext,
        batch_token: Option<Uuid>,
    ) -> Result<(), SyncErrorKind> {
        let reply = self.call(SyncEnvelope::EndSession(EndSessionRequest {
            context: ctx.clone(),
            batch_token,
        }))?;
        match reply {
            SyncEnvelope::SessionEnded(response) => {
                *ctx = response.context;
                Ok(())
            }
            other => Err(unexpected("session_ended", &other)),
        }
    }
}

fn unexpected(expected: &'static str, got: &SyncEnvelope) -> SyncErrorKind {
    SyncErrorKind::UnexpectedEnvelope {
        expected,
        got: got.step_name(),
    }
}

fn map_error(response: ErrorResponse) -> SyncErrorKind {
    match response.code {
        ErrorCode::Outdated {
            since,
            min_timestamp,
        } => SyncErrorKind::Outdated {
            since,
            min_timestamp,
        },
        ErrorCode::ScopeNotFound => SyncErrorKind::ScopeNotFound(response.message),
        ErrorCode::SchemaMismatch | ErrorCode::Internal => {
            if response.retryable {
                SyncErrorKind::transport_retryable(response.message)
            } else {
                SyncErrorKind::Remote {
                    message: response.message,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Transport that fails a configured number of times before delegating
    /// to a canned response.
    struct FlakyTransport {
        failures: AtomicU32,
        response: Mutex<Option<SyncEnvelope>>,
        calls: AtomicU32,
    }

    impl FlakyTransport {
        fn new(failures: u32, response: SyncEnvelope) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                response: Mutex::new(Some(response)),
                calls: AtomicU32::new(0),
            }
        }
    }

    impl SyncTransport for FlakyTransport {
        fn send(&self, _envelope: SyncEnvelope) -> Result<SyncEnvelope, SyncErrorKind> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| f.checked_sub(1))
                .is_ok()
            {
                return Err(SyncErrorKind::transport_retryable("connection reset"));
            }
            self.response
                .lock()
                .clone()
                .ok_or_else(|| SyncErrorKind::transport_fatal("no response configured"))
        }
    }

    fn timestamp_reply() -> SyncEnvelope {
        SyncEnvelope::Timestamp(rowsync_protocol::TimestampResponse {
            context: SyncContext::new("sales"),
            timestamp: 7,
            min_timestamp: 0,
        })
    }

    #[test]
    fn transient_failures_are_retried() {
        let transport = FlakyTransport::new(2, timestamp_reply());
        let proxy = RemoteProxy::new(
            transport,
            RetryConfig::new(3).with_initial_delay(std::time::Duration::ZERO),
        );

        let mut ctx = SyncContext::new("sales");
        let (timestamp, floor) = proxy.get_timestamp(&mut ctx).unwrap();
        assert_eq!(timestamp, 7);
        assert_eq!(floor, 0);
        assert_eq!(proxy.transport.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exhausted_retries_are_fatal() {
        let transport = FlakyTransport::new(10, timestamp_reply());
        let proxy = RemoteProxy::new(
            transport,
            RetryConfig::new(2).with_initial_delay(std::time::Duration::ZERO),
        );

        let mut ctx = SyncContext::new("sales");
        let result = proxy.get_timestamp(&mut ctx);
        assert!(matches!(
            result,
            Err(SyncErrorKind::Transport { retryable: true, .. })
        ));
        assert_eq!(proxy.transport.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn error_envelope_is_mapped() {
        let error = SyncEnvelope::Error(ErrorResponse {
            context: None,
            code: ErrorCode::Outdated {
                since: 2,
                min_timestamp: 8,
            },
            message: "outdated".into(),
            retryable: false,
        });
        let proxy = RemoteProxy::new(FlakyTransport::new(0, error), RetryConfig::no_retry());

        let mut ctx = SyncContext::new("sales");
        let result = proxy.get_timestamp(&mut ctx);
        assert!(matches!(
            result,
            Err(SyncErrorKind::Outdated {
                since: 2,
                min_timestamp: 8
            })
        ));
    }

    #[test]
    fn wrong_envelope_is_a_protocol_error() {
        let wrong = SyncEnvelope::SessionEnded(rowsync_protocol::EndSessionResponse {
            context: SyncContext::new("sales"),
        });
        let proxy = RemoteProxy::new(FlakyTransport::new(0, wrong), RetryConfig::no_retry());

        let mut ctx = SyncContext::new("sales");
        let result = proxy.get_timestamp(&mut ctx);
        assert!(matches!(
            result,
            Err(SyncErrorKind::UnexpectedEnvelope { .. })
        ));
    }
}
