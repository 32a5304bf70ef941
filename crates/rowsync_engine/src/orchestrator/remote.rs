//! Hub-side orchestrator.

use crate::apply::{ApplyEngine, ApplyOptions, SyncSide};
use crate::batch::{Batcher, ProducedBatch};
use crate::error::SyncErrorKind;
use crate::interceptor::Interceptors;
use crate::options::SyncOptions;
use crate::store::{ScopeStore, SyncStore};
use crate::tracker::ChangeTracker;
use parking_lot::{Mutex, RwLock};
use rowsync_protocol::{
    ChangesAckResponse, EndSessionRequest, EndSessionResponse, EnsureScopeRequest,
    EnsureScopeResponse, MoreChangesRequest, MoreChangesResponse, ScopeInfo, SendChangesRequest,
    SummaryResponse, SyncEnvelope, SyncSchema, SyncSetup, SyncStage, TableRows, TimestampRequest,
    TimestampResponse,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Answers protocol envelopes against the hub's store.
///
/// One remote orchestrator serves many concurrent client cycles: per-session
/// upload accumulation and per-batch download state are keyed by session and
/// batch token, so clients never contend except on the store itself.
pub struct RemoteOrchestrator<S> {
    store: Arc<S>,
    options: SyncOptions,
    scope_id: Uuid,
    interceptors: RwLock<Interceptors>,
    uploads: Mutex<HashMap<Uuid, BTreeMap<u32, Vec<TableRows>>>>,
    downloads: Mutex<HashMap<Uuid, Arc<ProducedBatch>>>,
}

impl<S: SyncStore + ScopeStore> RemoteOrchestrator<S> {
    /// Creates a remote orchestrator over the hub's store.
    pub fn new(store: Arc<S>, options: SyncOptions) -> Self {
        Self {
            store,
            options,
            scope_id: Uuid::new_v4(),
            interceptors: RwLock::new(Interceptors::new()),
            uploads: Mutex::new(HashMap::new()),
            downloads: Mutex::new(HashMap::new()),
        }
    }

    /// The hub's stable identity; rows it authors are attributed to it on
    /// every client.
    pub fn scope_id(&self) -> Uuid {
        self.scope_id
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Registers notification handlers (e.g. a conflict resolver).
    pub fn configure_interceptors(&self, f: impl FnOnce(&mut Interceptors)) {
        f(&mut self.interceptors.write());
    }

    /// Creates (or refreshes) the scope record for a schema and setup.
    pub fn provision(
        &self,
        scope_name: &str,
        schema: SyncSchema,
        setup: SyncSetup,
    ) -> Result<ScopeInfo, SyncErrorKind> {
        let fingerprint = schema.fingerprint()?;
        if let Some(existing) = self.store.get_scope_info(scope_name)? {
            if existing.schema_fingerprint == fingerprint && existing.setup == setup {
                return Ok(existing);
            }
            let mut updated = ScopeInfo::new(scope_name, self.scope_id, schema, setup)?;
            updated.version = existing.version + 1;
            self.store.save_scope_info(&updated)?;
            info!(scope = scope_name, version = updated.version, "re-provisioned scope");
            return Ok(updated);
        }

        let info = ScopeInfo::new(scope_name, self.scope_id, schema, setup)?;
        self.store.save_scope_info(&info)?;
        info!(scope = scope_name, "provisioned scope");
        Ok(info)
    }

    /// Dispatches one protocol envelope.
    pub fn handle(&self, envelope: SyncEnvelope) -> Result<SyncEnvelope, SyncErrorKind> {
        debug!(step = envelope.step_name(), "handling envelope");
        match envelope {
            SyncEnvelope::EnsureScope(req) => self.handle_ensure_scope(req),
            SyncEnvelope::GetTimestamp(req) => self.handle_get_timestamp(req),
            SyncEnvelope::SendChanges(req) => self.handle_send_changes(req),
            SyncEnvelope::GetMoreChanges(req) => self.handle_get_more_changes(req),
            SyncEnvelope::EndSession(req) => self.handle_end_session(req),
            other => Err(SyncErrorKind::UnexpectedEnvelope {
                expected: "request",
                got: other.step_name(),
            }),
        }
    }

    fn scope_info(&self, name: &str) -> Result<ScopeInfo, SyncErrorKind> {
        self.store
            .get_scope_info(name)?
            .ok_or_else(|| SyncErrorKind::ScopeNotFound(name.to_string()))
    }

    fn handle_ensure_scope(
        &self,
        req: EnsureScopeRequest,
    ) -> Result<SyncEnvelope, SyncErrorKind> {
        let mut ctx = req.context;
        ctx.set_stage(SyncStage::ScopeLoading);
        let scope_info = self.scope_info(&ctx.scope_name)?;

        Ok(SyncEnvelope::EnsureScopeReply(EnsureScopeResponse {
            context: ctx,
            scope_info,
            policy: self.options.conflict_policy,
        }))
    }

    fn handle_get_timestamp(&self, req: TimestampRequest) -> Result<SyncEnvelope, SyncErrorKind> {
        Ok(SyncEnvelope::Timestamp(TimestampResponse {
            context: req.context,
            timestamp: self.store.local_timestamp()?,
            min_timestamp: self.store.min_timestamp()?,
        }))
    }

    fn handle_send_changes(&self, req: SendChangesRequest) -> Result<SyncEnvelope, SyncErrorKind> {
        let mut ctx = req.context;
        let scope = self.scope_info(&ctx.scope_name)?;
        let session = ctx.session_id;

        // Keyed by part index so a re-sent part overwrites itself instead of
        // duplicating rows.
        {
            let mut uploads = self.uploads.lock();
            uploads
                .entry(session)
                .or_default()
                .insert(req.part.index, req.rows);
        }

        if !req.part.is_last {
            return Ok(SyncEnvelope::ChangesAck(ChangesAckResponse {
                context: ctx,
                batch_index: req.part.index,
            }));
        }

        let parts: Vec<Vec<TableRows>> = {
            let mut uploads = self.uploads.lock();
            uploads
                .remove(&session)
                .map(|parts| parts.into_values().collect())
                .unwrap_or_default()
        };

        let upload_rows: u64 = parts
            .iter()
            .flat_map(|p| p.iter())
            .map(|t| t.rows.len() as u64)
            .sum();

        let interceptors = self.interceptors.read();

        let applied = if upload_rows > 0 {
            let apply_options = ApplyOptions {
                policy: self.options.conflict_policy,
                side: SyncSide::Server,
                baseline: req.client_scope.last_server_timestamp,
                sender: req.client_scope.client_id,
                force_write: false,
                disable_constraints: self.options.disable_constraints,
                reset: false,
            };
            ApplyEngine::apply(
                self.store.as_ref(),
                &scope,
                &parts,
                &apply_options,
                &interceptors,
                &mut ctx,
            )?
        } else {
            Default::default()
        };

        // Read before selecting: the client commits this value as its new
        // watermark, so anything selected after it will be seen again rather
        // than skipped.
        let remote_timestamp = self.store.local_timestamp()?;

        // A cold download (since == 0) must include rows this client
        // authored: the client is empty or about to reset, so nothing can
        // echo.
        let exclude_writer = if req.download_since > 0 {
            Some(req.client_scope.client_id)
        } else {
            None
        };

        let (change_set, selected) = ChangeTracker::select_changes(
            self.store.as_ref(),
            &scope,
            req.download_since,
            exclude_writer,
            &req.parameters,
            &interceptors,
            &mut ctx,
        )?;

        let batch = Batcher::partition(
            change_set,
            remote_timestamp,
            self.options.batch_size_bytes,
            self.options.spool_dir.as_deref(),
        )?;
        let info = batch.info.clone();

        self.downloads
            .lock()
            .insert(info.batch_token, Arc::new(batch));

        info!(
            scope = %scope.name,
            client = %req.client_scope.client_id,
            uploaded = upload_rows,
            selected = selected.total_changes(),
            parts = info.part_count(),
            "upload applied, download selected"
        );

        Ok(SyncEnvelope::Summary(SummaryResponse {
            context: ctx,
            remote_timestamp,
            batch: info,
            server_changes_selected: selected,
            changes_applied_on_server: applied,
        }))
    }

    fn handle_get_more_changes(
        &self,
        req: MoreChangesRequest,
    ) -> Result<SyncEnvelope, SyncErrorKind> {
        let batch = self
            .downloads
            .lock()
            .get(&req.batch_token)
            .cloned()
            .ok_or(SyncErrorKind::MissingBatchPart {
                batch_token: req.batch_token,
                index: req.index,
            })?;

        let part = batch
            .info
            .parts
            .get(req.index as usize)
            .cloned()
            .ok_or(SyncErrorKind::MissingBatchPart {
                batch_token: req.batch_token,
                index: req.index,
            })?;
        let rows = batch.read_part(req.index)?;

        Ok(SyncEnvelope::MoreChanges(MoreChangesResponse {
            context: req.context,
            part,
            rows,
        }))
    }

    fn handle_end_session(&self, req: EndSessionRequest) -> Result<SyncEnvelope, SyncErrorKind> {
        if let Some(token) = req.batch_token {
            if let Some(batch) = self.downloads.lock().remove(&token) {
                batch.cleanup();
            }
        }
        self.uploads.lock().remove(&req.context.session_id);
        debug!(session = %req.context.session_id, "session ended");

        Ok(SyncEnvelope::SessionEnded(EndSessionResponse {
            context: req.context,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use rowsync_protocol::{
        BatchPartInfo, ColumnType, ScopeInfoClient, SyncColumn, SyncContext, SyncParameters,
        SyncTable,
    };

    fn schema() -> SyncSchema {
        SyncSchema::new(
            vec![SyncTable::new(
                "customer",
                vec![
                    SyncColumn::new("id", ColumnType::Integer),
                    SyncColumn::new("name", ColumnType::Text),
                ],
                vec!["id".into()],
            )],
            vec![],
        )
    }

    fn remote() -> RemoteOrchestrator<MemoryStore> {
        let store = Arc::new(MemoryStore::new(schema()));
        let remote = RemoteOrchestrator::new(store, SyncOptions::default());
        remote
            .provision("sales", schema(), SyncSetup::from_tables(["customer"]))
            .unwrap();
        remote
    }

    fn empty_last_part(ctx: &SyncContext, download_since: u64) -> SendChangesRequest {
        SendChangesRequest {
            context: ctx.clone(),
            client_scope: ScopeInfoClient::new("sales"),
            parameters: SyncParameters::new(),
            download_since,
            part: BatchPartInfo {
                index: 0,
                tables: vec![],
                row_count: 0,
                is_last: true,
            },
            rows: vec![],
        }
    }

    #[test]
    fn provision_is_idempotent() {
        let remote = remote();
        let first = remote
            .provision("sales", schema(), SyncSetup::from_tables(["customer"]))
            .unwrap();
        assert_eq!(first.version, 1);
    }

    #[test]
    fn reprovision_bumps_version() {
        let remote = remote();
        let mut drifted = schema();
        drifted.tables[0]
            .columns
            .push(SyncColumn::new("email", ColumnType::Text));

        let updated = remote
            .provision("sales", drifted, SyncSetup::from_tables(["customer"]))
            .unwrap();
        assert_eq!(updated.version, 2);
    }

    #[test]
    fn ensure_scope_unknown_scope_fails() {
        let remote = remote();
        let req = EnsureScopeRequest {
            context: SyncContext::new("nope"),
        };
        let result = remote.handle(SyncEnvelope::EnsureScope(req));
        assert!(matches!(result, Err(SyncErrorKind::ScopeNotFound(_))));
    }

    #[test]
    fn empty_upload_produces_summary() {
        let remote = remote();
        remote
            .store()
            .insert("customer", vec![1i64.into()], vec![1i64.into(), "Ada".into()])
            .unwrap();

        let ctx = SyncContext::new("sales");
        let reply = remote
            .handle(SyncEnvelope::SendChanges(empty_last_part(&ctx, 0)))
            .unwrap();

        match reply {
            SyncEnvelope::Summary(summary) => {
                assert_eq!(summary.server_changes_selected.total_changes(), 1);
                assert_eq!(summary.batch.row_count, 1);
                assert!(summary.remote_timestamp > 0);
            }
            other => panic!("expected summary, got {}", other.step_name()),
        }
    }

    #[test]
    fn resent_part_does_not_duplicate() {
        let remote = remote();
        let ctx = SyncContext::new("sales");
        let client_scope = ScopeInfoClient::new("sales");

        let row = rowsync_protocol::TrackedRow::new(
            "customer",
            vec![1i64.into()],
            vec![1i64.into(), "Ada".into()],
            1,
            None,
        );
        let part0 = SendChangesRequest {
            context: ctx.clone(),
            client_scope: client_scope.clone(),
            parameters: SyncParameters::new(),
            download_since: 0,
            part: BatchPartInfo {
                index: 0,
                tables: vec!["customer".into()],
                row_count: 1,
                is_last: false,
            },
            rows: vec![TableRows::new("customer", vec![row.clone()])],
        };

        // Send part 0 twice (simulating a retry), then the final empty part.
        remote
            .handle(SyncEnvelope::SendChanges(part0.clone()))
            .unwrap();
        remote.handle(SyncEnvelope::SendChanges(part0)).unwrap();

        let last = SendChangesRequest {
            part: BatchPartInfo {
                index: 1,
                tables: vec![],
                row_count: 0,
                is_last: true,
            },
            rows: vec![],
            context: ctx.clone(),
            client_scope,
            parameters: SyncParameters::new(),
            download_since: 0,
        };
        let reply = remote.handle(SyncEnvelope::SendChanges(last)).unwrap();

        match reply {
            SyncEnvelope::Summary(summary) => {
                assert_eq!(summary.changes_applied_on_server.total_applied(), 1);
            }
            other => panic!("expected summary, got {}", other.step_name()),
        }
        assert_eq!(remote.store().row_count("customer").unwrap(), 1);
    }

    #[test]
    fn download_parts_are_rereadable_until_session_end() {
        let remote = remote();
        for id in 0..5i64 {
            remote
                .store()
                .insert(
                    "customer",
                    vec![id.into()],
                    vec![id.into(), format!("c{id}").into()],
                )
                .unwrap();
        }

        let ctx = SyncContext::new("sales");
        let reply = remote
            .handle(SyncEnvelope::SendChanges(empty_last_part(&ctx, 0)))
            .unwrap();
        let summary = match reply {
            SyncEnvelope::Summary(s) => s,
            other => panic!("expected summary, got {}", other.step_name()),
        };

        let fetch = |index| {
            remote.handle(SyncEnvelope::GetMoreChanges(MoreChangesRequest {
                context: ctx.clone(),
                batch_token: summary.batch.batch_token,
                index,
            }))
        };

        let first = fetch(0).unwrap();
        let again = fetch(0).unwrap();
        assert_eq!(first, again);

        remote
            .handle(SyncEnvelope::EndSession(EndSessionRequest {
                context: ctx.clone(),
                batch_token: Some(summary.batch.batch_token),
            }))
            .unwrap();

        assert!(matches!(
            fetch(0),
            Err(SyncErrorKind::MissingBatchPart { .. })
        ));
    }
}
