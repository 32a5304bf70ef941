//! Sync agent: drives one full cycle end-to-end.

use crate::apply::{ApplyOptions, SyncSide};
use crate::batch::{Batcher, ProducedBatch};
use crate::error::{SyncErrorKind, SyncResult};
use crate::interceptor::{
    OutdatedAction, OutdatedArgs, ProgressArgs, SessionBeginArgs, SessionEndArgs,
};
use crate::orchestrator::{LocalOrchestrator, RemoteProxy, SendOutcome};
use crate::store::{ScopeStore, SyncStore};
use crate::transport::SyncTransport;
use rowsync_protocol::{
    BatchPartInfo, DatabaseChangesApplied, DatabaseChangesSelected, ScopeInfoClient,
    SummaryResponse, SyncContext, SyncParameters, SyncStage, TableRows,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How a cycle treats existing data and watermarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncType {
    /// Incremental, watermark-based sync in both directions.
    Normal,
    /// Cold download: local scope tables are reset and refilled from the
    /// hub; pending local changes are discarded, not uploaded.
    Reinitialize,
    /// Upload pending local changes first, then cold download.
    ReinitializeWithUpload,
}

/// Aggregated outcome of one successful sync cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SyncCycleResult {
    /// Scope that was synchronized.
    pub scope_name: String,
    /// Sync type that actually ran (may differ from the requested type
    /// after an outdated recovery).
    pub sync_type: SyncType,
    /// Changes selected on the client for upload.
    pub client_changes_selected: DatabaseChangesSelected,
    /// Changes selected on the hub for download.
    pub server_changes_selected: DatabaseChangesSelected,
    /// Apply accounting on the hub (upload direction).
    pub server_changes_applied: DatabaseChangesApplied,
    /// Apply accounting on the client (download direction).
    pub client_changes_applied: DatabaseChangesApplied,
    /// Conflicts resolved during the cycle.
    pub resolved_conflicts: u64,
    /// Wall-clock duration of the cycle.
    pub elapsed: Duration,
}

impl SyncCycleResult {
    /// Total rows downloaded from the hub.
    pub fn total_changes_downloaded(&self) -> u64 {
        self.server_changes_selected.total_changes()
    }

    /// Total rows uploaded to the hub.
    pub fn total_changes_uploaded(&self) -> u64 {
        self.client_changes_selected.total_changes()
    }

    /// Total rows applied on the client.
    pub fn total_changes_applied_on_client(&self) -> u64 {
        self.client_changes_applied.total_applied()
    }

    /// Total rows applied on the hub.
    pub fn total_changes_applied_on_server(&self) -> u64 {
        self.server_changes_applied.total_applied()
    }
}

impl std::fmt::Display for SyncCycleResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Synchronization done.")?;
        writeln!(
            f,
            "\tTotal changes uploaded: {}",
            self.total_changes_uploaded()
        )?;
        writeln!(
            f,
            "\tTotal changes downloaded: {}",
            self.total_changes_downloaded()
        )?;
        writeln!(
            f,
            "\tTotal changes applied on client: {}",
            self.total_changes_applied_on_client()
        )?;
        writeln!(
            f,
            "\tTotal changes applied on server: {}",
            self.total_changes_applied_on_server()
        )?;
        writeln!(f, "\tTotal resolved conflicts: {}", self.resolved_conflicts)?;
        write!(f, "\tTotal duration: {:.3}s", self.elapsed.as_secs_f64())
    }
}

enum CycleOutcome {
    Done(Box<SyncCycleResult>),
    Restart {
        next: SyncType,
        since: u64,
        min_timestamp: u64,
    },
}

/// Pairs a local orchestrator with a remote proxy and runs cycles.
///
/// One agent serves one (client store, hub) pairing; a cycle for a scope is
/// a single logical sequence, and cancellation is observed cooperatively at
/// every suspension point.
pub struct SyncAgent<S, T> {
    local: LocalOrchestrator<S>,
    remote: RemoteProxy<T>,
    cancelled: AtomicBool,
}

impl<S: SyncStore + ScopeStore, T: SyncTransport> SyncAgent<S, T> {
    /// Creates an agent from the two personalities.
    pub fn new(local: LocalOrchestrator<S>, remote: RemoteProxy<T>) -> Self {
        Self {
            local,
            remote,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Returns the local orchestrator.
    pub fn local(&self) -> &LocalOrchestrator<S> {
        &self.local
    }

    /// Returns the local orchestrator for interceptor registration.
    pub fn local_mut(&mut self) -> &mut LocalOrchestrator<S> {
        &mut self.local
    }

    /// Requests cooperative cancellation; the running cycle aborts at its
    /// next suspension point without persisting any watermark.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clears a previous cancellation request.
    pub fn reset_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self, ctx: &SyncContext) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncErrorKind::Cancelled.at(ctx.stage))
        } else {
            Ok(())
        }
    }

    /// Runs a normal incremental cycle for a scope.
    pub fn synchronize(&self, scope_name: &str) -> SyncResult<SyncCycleResult> {
        self.synchronize_with(scope_name, SyncType::Normal, SyncParameters::new())
    }

    /// Runs a cycle of the given type.
    ///
    /// When the hub reports the client's watermark as outdated, a registered
    /// `on_outdated` handler may select a reinitialization, and the agent
    /// retries the whole cycle once with that type.
    pub fn synchronize_with(
        &self,
        scope_name: &str,
        sync_type: SyncType,
        parameters: SyncParameters,
    ) -> SyncResult<SyncCycleResult> {
        match self.run_cycle(scope_name, sync_type, &parameters)? {
            CycleOutcome::Done(result) => Ok(*result),
            CycleOutcome::Restart {
                next,
                since,
                min_timestamp,
            } => {
                info!(scope = scope_name, ?next, "watermark outdated, retrying cycle");
                match self.run_cycle(scope_name, next, &parameters)? {
                    CycleOutcome::Done(result) => Ok(*result),
                    CycleOutcome::Restart { .. } => Err(SyncErrorKind::Outdated {
                        since,
                        min_timestamp,
                    }
                    .at(SyncStage::ChangesSelecting)),
                }
            }
        }
    }

    fn run_cycle(
        &self,
        scope_name: &str,
        sync_type: SyncType,
        parameters: &SyncParameters,
    ) -> SyncResult<CycleOutcome> {
        let started = Instant::now();
        let mut ctx = SyncContext::new(scope_name);
        let interceptors = self.local.interceptors();

        let mut begin_args = SessionBeginArgs {
            scope_name: scope_name.to_string(),
        };
        interceptors.intercept_session_begin(&ctx, &mut begin_args);
        info!(scope = scope_name, session = %ctx.session_id, ?sync_type, "sync cycle starting");

        let outcome = self.cycle_steps(&mut ctx, scope_name, sync_type, parameters, started);

        let mut end_args = SessionEndArgs {
            success: matches!(&outcome, Ok(CycleOutcome::Done(_))),
        };
        interceptors.intercept_session_end(&ctx, &mut end_args);

        outcome
    }

    fn cycle_steps(
        &self,
        ctx: &mut SyncContext,
        scope_name: &str,
        sync_type: SyncType,
        parameters: &SyncParameters,
        started: Instant,
    ) -> SyncResult<CycleOutcome> {
        let interceptors = self.local.interceptors();

        // Scope and schema agreement.
        ctx.set_stage(SyncStage::ScopeLoading);
        self.check_cancelled(ctx)?;
        let (remote_scope, policy) = self
            .remote
            .ensure_scope(ctx)
            .map_err(|kind| kind.at(ctx.stage))?;
        let scope = self
            .local
            .ensure_scope(ctx, &remote_scope)
            .map_err(|kind| kind.at(ctx.stage))?;
        let mut scope_client = self
            .local
            .scope_client(scope_name)
            .map_err(|kind| kind.at(ctx.stage))?;
        self.report_progress(ctx, 0.2);

        // Start-of-cycle watermark: what this cycle claims to have sent.
        let t_local = self
            .local
            .local_timestamp()
            .map_err(|kind| kind.at(ctx.stage))?;

        // Outdated check against the hub's retention floor.
        let (_, remote_floor) = self
            .remote
            .get_timestamp(ctx)
            .map_err(|kind| kind.at(ctx.stage))?;
        if sync_type == SyncType::Normal
            && scope_client.last_server_timestamp > 0
            && scope_client.last_server_timestamp < remote_floor
        {
            let mut args = OutdatedArgs {
                since: scope_client.last_server_timestamp,
                min_timestamp: remote_floor,
                action: OutdatedAction::Abort,
            };
            interceptors.intercept_outdated(ctx, &mut args);
            return match args.action {
                OutdatedAction::Abort => Err(SyncErrorKind::Outdated {
                    since: args.since,
                    min_timestamp: args.min_timestamp,
                }
                .at(ctx.stage)),
                OutdatedAction::Reinitialize => Ok(CycleOutcome::Restart {
                    next: SyncType::Reinitialize,
                    since: args.since,
                    min_timestamp: args.min_timestamp,
                }),
                OutdatedAction::ReinitializeWithUpload => Ok(CycleOutcome::Restart {
                    next: SyncType::ReinitializeWithUpload,
                    since: args.since,
                    min_timestamp: args.min_timestamp,
                }),
            };
        }

        // Upload direction.
        self.check_cancelled(ctx)?;
        let (change_set, client_selected) = if sync_type == SyncType::Reinitialize {
            Default::default()
        } else {
            self.local
                .select_changes(
                    ctx,
                    &scope,
                    scope_client.last_sent_timestamp,
                    Some(scope.scope_id),
                    parameters,
                )
                .map_err(|kind| kind.at(ctx.stage))?
        };

        let options = self.local.options();
        let upload = Batcher::partition(
            change_set,
            t_local,
            options.batch_size_bytes,
            options.spool_dir.as_deref(),
        )
        .map_err(|kind| kind.at(ctx.stage))?;

        let download_since = match sync_type {
            SyncType::Normal => scope_client.last_server_timestamp,
            SyncType::Reinitialize | SyncType::ReinitializeWithUpload => 0,
        };

        ctx.set_stage(SyncStage::ChangesApplying);
        let summary = self
            .transmit_upload(ctx, &scope_client, parameters, download_since, &upload)
            .map_err(|kind| kind.at(ctx.stage))?;
        upload.cleanup();
        self.report_progress(ctx, 0.5);

        // Download direction: fetch parts in index order, then apply.
        let mut parts: Vec<Vec<TableRows>> = Vec::with_capacity(summary.batch.parts.len());
        for index in 0..summary.batch.part_count() {
            self.check_cancelled(ctx)?;
            let (_, rows) = self
                .remote
                .get_more_changes(ctx, summary.batch.batch_token, index)
                .map_err(|kind| kind.at(ctx.stage))?;
            parts.push(rows);
        }

        let reset = sync_type != SyncType::Normal;
        let client_applied = if parts.is_empty() && !reset {
            DatabaseChangesApplied::default()
        } else {
            self.check_cancelled(ctx)?;
            let apply_options = ApplyOptions {
                policy,
                side: SyncSide::Client,
                baseline: scope_client.last_sent_timestamp,
                sender: scope.scope_id,
                // The upload already reconciled conflicts on the hub; its
                // selection is authoritative here.
                force_write: true,
                disable_constraints: options.disable_constraints,
                reset,
            };
            self.local
                .apply_changes(ctx, &scope, &parts, &apply_options)
                .map_err(|kind| kind.at(ctx.stage))?
        };
        self.report_progress(ctx, 0.8);

        self.remote
            .end_session(ctx, Some(summary.batch.batch_token))
            .map_err(|kind| kind.at(ctx.stage))?;

        // Single commit point: both watermarks move together.
        scope_client.last_server_timestamp = summary.remote_timestamp;
        scope_client.last_sent_timestamp = t_local;
        scope_client.last_sync += 1;
        self.local
            .save_scope_client(&scope_client)
            .map_err(|kind| kind.at(ctx.stage))?;
        debug!(
            scope = scope_name,
            last_server_timestamp = scope_client.last_server_timestamp,
            last_sent_timestamp = scope_client.last_sent_timestamp,
            "watermarks committed"
        );

        if options.clean_metadata {
            self.local
                .delete_metadata(ctx, scope_name, t_local)
                .map_err(|kind| kind.at(ctx.stage))?;
        }

        self.report_progress(ctx, 1.0);

        let resolved_conflicts = summary.changes_applied_on_server.total_resolved_conflicts()
            + client_applied.total_resolved_conflicts();

        let result = SyncCycleResult {
            scope_name: scope_name.to_string(),
            sync_type,
            client_changes_selected: client_selected,
            server_changes_selected: summary.server_changes_selected,
            server_changes_applied: summary.changes_applied_on_server,
            client_changes_applied: client_applied,
            resolved_conflicts,
            elapsed: started.elapsed(),
        };

        info!(
            scope = scope_name,
            uploaded = result.total_changes_uploaded(),
            downloaded = result.total_changes_downloaded(),
            conflicts = result.resolved_conflicts,
            "sync cycle complete"
        );

        Ok(CycleOutcome::Done(Box::new(result)))
    }

    fn transmit_upload(
        &self,
        ctx: &mut SyncContext,
        scope_client: &ScopeInfoClient,
        parameters: &SyncParameters,
        download_since: u64,
        upload: &ProducedBatch,
    ) -> Result<SummaryResponse, SyncErrorKind> {
        if upload.info.parts.is_empty() {
            // Nothing to upload: a single empty final part still triggers
            // the hub's apply/select step.
            let part = BatchPartInfo {
                index: 0,
                tables: Vec::new(),
                row_count: 0,
                is_last: true,
            };
            return match self.remote.send_changes(
                ctx,
                scope_client,
                parameters,
                download_since,
                part,
                Vec::new(),
            )? {
                SendOutcome::Summary(summary) => Ok(summary),
                SendOutcome::Ack => Err(SyncErrorKind::UnexpectedEnvelope {
                    expected: "summary",
                    got: "changes_ack",
                }),
            };
        }

        let mut summary = None;
        for part_info in &upload.info.parts {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(SyncErrorKind::Cancelled);
            }
            let rows = upload.read_part(part_info.index)?;
            match self.remote.send_changes(
                ctx,
                scope_client,
                parameters,
                download_since,
                part_info.clone(),
                rows,
            )? {
                SendOutcome::Ack => {}
                SendOutcome::Summary(s) => summary = Some(s),
            }
        }

        summary.ok_or(SyncErrorKind::UnexpectedEnvelope {
            expected: "summary",
            got: "changes_ack",
        })
    }

    fn report_progress(&self, ctx: &mut SyncContext, progress: f64) {
        ctx.progress = progress;
        let mut args = ProgressArgs {
            stage: ctx.stage,
            progress,
        };
        self.local.interceptors().intercept_progress(ctx, &mut args);
    }
}
