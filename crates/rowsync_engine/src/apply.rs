//! Ordered apply with conflict detection and resolution.

use crate::error::SyncErrorKind;
use crate::interceptor::{
    ConflictArgs, Interceptors, TableChangesAppliedArgs, TableChangesApplyingArgs,
};
use crate::store::{RowVersion, SyncStore};
use rowsync_protocol::{
    ConflictPolicy, DatabaseChangesApplied, RowState, ScopeInfo, SyncContext, SyncStage,
    TableRows, TrackedRow,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Which personality the destination store plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSide {
    /// The hub.
    Server,
    /// A replica.
    Client,
}

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ConflictResolution {
    /// Write the incoming row, overwriting the destination.
    ApplyIncoming,
    /// Keep the destination row, discarding the incoming one.
    KeepExisting,
    /// Write a merged row supplied by the resolver.
    Merge(TrackedRow),
    /// Decline to decide; the row is recorded as a failure.
    Skip,
}

/// Per-table progress of one apply operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableApplyState {
    /// Not reached yet.
    Pending,
    /// Applying tombstones.
    ApplyingDeletes,
    /// Applying rows new to the destination.
    ApplyingInserts,
    /// Applying rows that exist at the destination.
    ApplyingUpdates,
    /// All rows handled.
    Done,
    /// Aborted by a fatal error.
    Failed,
}

/// Options for one apply operation.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Conflict policy in force.
    pub policy: ConflictPolicy,
    /// Personality of the destination.
    pub side: SyncSide,
    /// Conflict baseline: the sender's last known timestamp of the
    /// destination store. A destination row that changed after this value,
    /// by a writer other than the sender, is a conflict.
    pub baseline: u64,
    /// Identity of the sending participant; written rows are stamped with
    /// it so the reverse-direction selection suppresses them.
    pub sender: Uuid,
    /// Apply incoming rows unconditionally, without conflict detection.
    /// Used for the download direction of a bidirectional cycle (the upload
    /// already reconciled) and for reinitialization.
    pub force_write: bool,
    /// Skip per-row foreign-key checks.
    pub disable_constraints: bool,
    /// Reset all scope tables before applying (cold download).
    pub reset: bool,
}

/// Applies incoming batch parts to a destination store.
///
/// The whole operation runs inside one store transaction: per-row failures
/// (constraint violations, declined conflicts) are counted and skipped, but
/// a store-level failure aborts everything and nothing commits.
pub struct ApplyEngine;

struct TableWork {
    deletes: Vec<TrackedRow>,
    upserts: Vec<TrackedRow>,
}

#[derive(Default)]
struct RowCounters {
    applied: u64,
    failed: u64,
    resolved: u64,
}

impl ApplyEngine {
    /// Applies all parts to the destination, honoring referential order:
    /// deletes run child-before-parent first, then inserts and updates run
    /// parent-before-child.
    pub fn apply(
        store: &dyn SyncStore,
        scope: &ScopeInfo,
        parts: &[Vec<TableRows>],
        options: &ApplyOptions,
        interceptors: &Interceptors,
        ctx: &mut SyncContext,
    ) -> Result<DatabaseChangesApplied, SyncErrorKind> {
        ctx.set_stage(SyncStage::ChangesApplying);

        store.begin()?;
        match Self::apply_inner(store, scope, parts, options, interceptors, ctx) {
            Ok(stats) => {
                store.commit()?;
                Ok(stats)
            }
            Err(e) => {
                if let Err(rollback_err) = store.rollback() {
                    warn!(error = %rollback_err, "rollback failed after apply error");
                }
                Err(e)
            }
        }
    }

    fn apply_inner(
        store: &dyn SyncStore,
        scope: &ScopeInfo,
        parts: &[Vec<TableRows>],
        options: &ApplyOptions,
        interceptors: &Interceptors,
        ctx: &mut SyncContext,
    ) -> Result<DatabaseChangesApplied, SyncErrorKind> {
        let order = scope.ordered_setup_tables();

        if options.reset {
            for table in order.iter().rev() {
                store.reset_table(table)?;
            }
            debug!(scope = %scope.name, "reset scope tables for cold apply");
        }

        let mut work: BTreeMap<&str, TableWork> = BTreeMap::new();
        for part in parts {
            for table_rows in part {
                let entry = work
                    .entry(table_rows.table.as_str())
                    .or_insert_with(|| TableWork {
                        deletes: Vec::new(),
                        upserts: Vec::new(),
                    });
                for row in &table_rows.rows {
                    if row.tombstone {
                        entry.deletes.push(row.clone());
                    } else {
                        entry.upserts.push(row.clone());
                    }
                }
            }
        }

        let mut states: BTreeMap<&str, TableApplyState> = order
            .iter()
            .map(|t| (*t, TableApplyState::Pending))
            .collect();
        let mut stats = DatabaseChangesApplied::default();

        // Deletes first, child tables before parents.
        for table in order.iter().rev() {
            let Some(table_work) = work.get(*table) else {
                continue;
            };
            if table_work.deletes.is_empty() {
                continue;
            }
            states.insert(*table, TableApplyState::ApplyingDeletes);

            let mut args = TableChangesApplyingArgs {
                table: table.to_string(),
                state: RowState::Delete,
            };
            interceptors.intercept_table_changes_applying(ctx, &mut args);

            let counters =
                Self::apply_rows(store, table, &table_work.deletes, options, interceptors, ctx)?;
            Self::report(&mut stats, interceptors, ctx, table, RowState::Delete, counters);
        }

        // Inserts then updates, parent tables before children.
        for table in &order {
            let Some(table_work) = work.get(*table) else {
                states.insert(*table, TableApplyState::Done);
                continue;
            };

            // Classify against the destination: a row absent (or tombstoned)
            // there is an insert, anything else an update.
            let mut inserts = Vec::new();
            let mut updates = Vec::new();
            for row in &table_work.upserts {
                let existing = store.fetch_row(table, &row.key)?;
                match &existing {
                    Some(version) if !version.tombstone => updates.push((row.clone(), existing)),
                    _ => inserts.push((row.clone(), existing)),
                }
            }

            for (state, rows) in [
                (RowState::Insert, inserts),
                (RowState::Update, updates),
            ] {
                if rows.is_empty() {
                    continue;
                }
                states.insert(
                    *table,
                    match state {
                        RowState::Insert => TableApplyState::ApplyingInserts,
                        _ => TableApplyState::ApplyingUpdates,
                    },
                );

                let mut args = TableChangesApplyingArgs {
                    table: table.to_string(),
                    state,
                };
                interceptors.intercept_table_changes_applying(ctx, &mut args);

                let mut counters = RowCounters::default();
                for (row, existing) in rows {
                    Self::apply_one(
                        store,
                        table,
                        &row,
                        existing,
                        options,
                        interceptors,
                        ctx,
                        &mut counters,
                    )?;
                }
                Self::report(&mut stats, interceptors, ctx, table, state, counters);
            }

            states.insert(*table, TableApplyState::Done);
        }

        debug!(?states, "apply complete");

        Ok(stats)
    }

    fn apply_rows(
        store: &dyn SyncStore,
        table: &str,
        rows: &[TrackedRow],
        options: &ApplyOptions,
        interceptors: &Interceptors,
        ctx: &mut SyncContext,
    ) -> Result<RowCounters, SyncErrorKind> {
        let mut counters = RowCounters::default();
        for row in rows {
            let existing = store.fetch_row(table, &row.key)?;
            Self::apply_one(
                store,
                table,
                row,
                existing,
                options,
                interceptors,
                ctx,
                &mut counters,
            )?;
        }
        Ok(counters)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_one(
        store: &dyn SyncStore,
        table: &str,
        row: &TrackedRow,
        existing: Option<RowVersion>,
        options: &ApplyOptions,
        interceptors: &Interceptors,
        ctx: &mut SyncContext,
        counters: &mut RowCounters,
    ) -> Result<(), SyncErrorKind> {
        let conflict = !options.force_write
            && existing.as_ref().is_some_and(|current| {
                current.timestamp > options.baseline
                    && current.last_writer != Some(options.sender)
            });

        if !conflict {
            return Self::write_row(store, table, row, Some(options.sender), options, counters);
        }

        let mut args = ConflictArgs {
            table: table.to_string(),
            incoming: row.clone(),
            existing,
            policy: options.policy,
            resolution: None,
        };
        interceptors.intercept_conflict(ctx, &mut args);

        let resolution = args
            .resolution
            .unwrap_or_else(|| default_resolution(options.policy, options.side));

        debug!(table, key = ?row.key, ?resolution, "conflict resolved");

        match resolution {
            ConflictResolution::ApplyIncoming => {
                Self::write_row(store, table, row, Some(options.sender), options, counters)?;
                counters.resolved += 1;
            }
            ConflictResolution::KeepExisting => {
                counters.applied += 1;
                counters.resolved += 1;
            }
            ConflictResolution::Merge(merged) => {
                // A merged row is a fresh destination-local change so it
                // propagates to every peer, the sender included.
                Self::write_row(store, table, &merged, None, options, counters)?;
                counters.resolved += 1;
            }
            ConflictResolution::Skip => {
                warn!(table, key = ?row.key, "conflict left unresolved");
                counters.failed += 1;
            }
        }
        Ok(())
    }

    /// Writes one row, counting constraint violations as per-row failures
    /// and surfacing everything else as fatal.
    fn write_row(
        store: &dyn SyncStore,
        table: &str,
        row: &TrackedRow,
        writer: Option<Uuid>,
        options: &ApplyOptions,
        counters: &mut RowCounters,
    ) -> Result<(), SyncErrorKind> {
        let result = if row.tombstone {
            store.delete_row(table, &row.key, writer)
        } else {
            store.upsert_row(
                table,
                &row.key,
                &row.values,
                writer,
                !options.disable_constraints,
            )
        };

        match result {
            Ok(()) => {
                counters.applied += 1;
                Ok(())
            }
            Err(e) if e.is_row_error() => {
                debug!(table, key = ?row.key, error = %e, "row failed to apply");
                counters.failed += 1;
                Ok(())
            }
            Err(e) => Err(SyncErrorKind::Store(e)),
        }
    }

    fn report(
        stats: &mut DatabaseChangesApplied,
        interceptors: &Interceptors,
        ctx: &mut SyncContext,
        table: &str,
        state: RowState,
        counters: RowCounters,
    ) {
        stats.report(
            table,
            state,
            counters.applied,
            counters.failed,
            counters.resolved,
        );

        if let Some(entry) = stats
            .tables
            .iter()
            .find(|t| t.table_name == table && t.state == state)
        {
            let mut args = TableChangesAppliedArgs {
                changes: entry.clone(),
            };
            interceptors.intercept_table_changes_applied(ctx, &mut args);
        }
    }
}

fn default_resolution(policy: ConflictPolicy, side: SyncSide) -> ConflictResolution {
    match (policy, side) {
        (ConflictPolicy::ServerWins, SyncSide::Server) => ConflictResolution::KeepExisting,
        (ConflictPolicy::ServerWins, SyncSide::Client) => ConflictResolution::ApplyIncoming,
        (ConflictPolicy::ClientWins, SyncSide::Server) => ConflictResolution::ApplyIncoming,
        (ConflictPolicy::ClientWins, SyncSide::Client) => ConflictResolution::KeepExisting,
    }
}
