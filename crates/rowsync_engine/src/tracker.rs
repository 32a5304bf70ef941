//! Watermark-based change selection.

use crate::error::SyncErrorKind;
use crate::interceptor::{Interceptors, TableChangesSelectedArgs, TableChangesSelectingArgs};
use crate::store::SyncStore;
use rowsync_protocol::{
    ChangeSet, DatabaseChangesSelected, ScopeInfo, SyncContext, SyncParameters, SyncStage,
    TableChangesSelected, TableRows,
};
use tracing::debug;
use uuid::Uuid;

/// Selects changes from a tracked store since a watermark.
///
/// Tables are emitted in the scope's cached dependency order (parents before
/// children) so the receiver can apply without re-deriving topology. Rows
/// last written by `exclude_writer` are suppressed, which is what prevents a
/// participant's own changes from echoing back to it.
pub struct ChangeTracker;

impl ChangeTracker {
    /// Selects all changes of a scope with timestamp greater than `since`.
    ///
    /// Read-only against the store. Fails with
    /// [`SyncErrorKind::Outdated`] when `since` predates the store's
    /// retention floor, since changes in that gap may already be purged.
    pub fn select_changes(
        store: &dyn SyncStore,
        scope: &ScopeInfo,
        since: u64,
        exclude_writer: Option<Uuid>,
        parameters: &SyncParameters,
        interceptors: &Interceptors,
        ctx: &mut SyncContext,
    ) -> Result<(ChangeSet, DatabaseChangesSelected), SyncErrorKind> {
        ctx.set_stage(SyncStage::ChangesSelecting);

        let floor = store.min_timestamp()?;
        if since > 0 && since < floor {
            return Err(SyncErrorKind::Outdated {
                since,
                min_timestamp: floor,
            });
        }

        let mut change_set = ChangeSet::default();
        let mut stats = DatabaseChangesSelected::default();

        for table in scope.ordered_setup_tables() {
            let mut args = TableChangesSelectingArgs {
                table: table.to_string(),
            };
            interceptors.intercept_table_changes_selecting(ctx, &mut args);

            let filter_value;
            let filter = match scope.setup.table(table).and_then(|t| t.filter.as_ref()) {
                Some(filter) => {
                    filter_value = parameters
                        .get(&filter.parameter)
                        .ok_or_else(|| SyncErrorKind::MissingParameter(filter.parameter.clone()))?
                        .clone();
                    Some((filter.column.as_str(), &filter_value))
                }
                None => None,
            };

            let selected = store.select_changes(table, since, exclude_writer, filter)?;

            let mut table_stats = TableChangesSelected::new(table);
            let mut rows = Vec::with_capacity(selected.len());
            for entry in selected {
                table_stats.record(entry.state);
                rows.push(entry.row);
            }

            debug!(
                table,
                since,
                inserts = table_stats.inserts,
                updates = table_stats.updates,
                deletes = table_stats.deletes,
                "selected changes"
            );

            if table_stats.total() > 0 {
                let mut selected_args = TableChangesSelectedArgs {
                    changes: table_stats.clone(),
                };
                interceptors.intercept_table_changes_selected(ctx, &mut selected_args);

                change_set.tables.push(TableRows::new(table, rows));
                stats.push(table_stats);
            }
        }

        Ok((change_set, stats))
    }
}
