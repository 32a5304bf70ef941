//! Lifecycle notification registry.
//!
//! Handlers are registered per lifecycle tag and invoked synchronously, in
//! registration order, with a structured argument object. A small subset of
//! tags ([`ConflictArgs`], [`OutdatedArgs`]) can redirect control flow by
//! mutating a result field on the argument object; everything else is purely
//! observational.

use crate::apply::ConflictResolution;
use crate::store::RowVersion;
use rowsync_protocol::{
    ConflictPolicy, RowState, SyncContext, SyncStage, TableChangesApplied, TableChangesSelected,
    TrackedRow,
};

type Handler<A> = Box<dyn Fn(&SyncContext, &mut A) + Send + Sync>;

/// Arguments for the session-begin notification.
#[derive(Debug, Clone)]
pub struct SessionBeginArgs {
    /// Scope being synchronized.
    pub scope_name: String,
}

/// Arguments for the session-end notification.
#[derive(Debug, Clone)]
pub struct SessionEndArgs {
    /// Whether the cycle reached its commit point.
    pub success: bool,
}

/// Raised before changes are selected from one table.
#[derive(Debug, Clone)]
pub struct TableChangesSelectingArgs {
    /// Table about to be read.
    pub table: String,
}

/// Raised after changes were selected from one table.
#[derive(Debug, Clone)]
pub struct TableChangesSelectedArgs {
    /// Selection counters for the table.
    pub changes: TableChangesSelected,
}

/// Raised before rows are applied to one table.
#[derive(Debug, Clone)]
pub struct TableChangesApplyingArgs {
    /// Destination table.
    pub table: String,
    /// Row state about to be applied.
    pub state: RowState,
}

/// Raised after rows were applied to one table.
#[derive(Debug, Clone)]
pub struct TableChangesAppliedArgs {
    /// Apply counters for the table.
    pub changes: TableChangesApplied,
}

/// Raised when a conflict is detected; a handler may decide the resolution.
#[derive(Debug, Clone)]
pub struct ConflictArgs {
    /// Destination table.
    pub table: String,
    /// Incoming row.
    pub incoming: TrackedRow,
    /// Destination's current row version, if any.
    pub existing: Option<RowVersion>,
    /// Policy in force.
    pub policy: ConflictPolicy,
    /// Set by a handler to override the policy's outcome.
    pub resolution: Option<ConflictResolution>,
}

/// Action to take when a watermark predates the peer's retention floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutdatedAction {
    /// Fail the cycle.
    Abort,
    /// Retry once as a cold download, discarding pending local changes.
    Reinitialize,
    /// Retry once, uploading pending local changes first.
    ReinitializeWithUpload,
}

/// Raised when the outdated condition is detected; a handler may select a
/// recovery action.
#[derive(Debug, Clone)]
pub struct OutdatedArgs {
    /// Watermark the cycle intended to use.
    pub since: u64,
    /// The peer's minimum retained timestamp.
    pub min_timestamp: u64,
    /// Recovery action; defaults to [`OutdatedAction::Abort`].
    pub action: OutdatedAction,
}

/// Raised when cycle progress advances.
#[derive(Debug, Clone)]
pub struct ProgressArgs {
    /// Stage reached.
    pub stage: SyncStage,
    /// Percent complete, 0.0 to 1.0.
    pub progress: f64,
}

/// Registry of lifecycle handlers.
///
/// Handlers must return promptly; they run inline on the sync cycle.
#[derive(Default)]
pub struct Interceptors {
    session_begin: Vec<Handler<SessionBeginArgs>>,
    session_end: Vec<Handler<SessionEndArgs>>,
    table_changes_selecting: Vec<Handler<TableChangesSelectingArgs>>,
    table_changes_selected: Vec<Handler<TableChangesSelectedArgs>>,
    table_changes_applying: Vec<Handler<TableChangesApplyingArgs>>,
    table_changes_applied: Vec<Handler<TableChangesAppliedArgs>>,
    conflict: Vec<Handler<ConflictArgs>>,
    outdated: Vec<Handler<OutdatedArgs>>,
    progress: Vec<Handler<ProgressArgs>>,
}

macro_rules! notification {
    ($register:ident, $invoke:ident, $field:ident, $args:ty) => {
        /// Registers a handler for this lifecycle tag.
        pub fn $register(&mut self, f: impl Fn(&SyncContext, &mut $args) + Send + Sync + 'static) {
            self.$field.push(Box::new(f));
        }

        /// Invokes the registered handlers, in registration order.
        pub fn $invoke(&self, ctx: &SyncContext, args: &mut $args) {
            for handler in &self.$field {
                handler(ctx, args);
            }
        }
    };
}

impl Interceptors {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    notification!(on_session_begin, intercept_session_begin, session_begin, SessionBeginArgs);
    notification!(on_session_end, intercept_session_end, session_end, SessionEndArgs);
    notification!(
        on_table_changes_selecting,
        intercept_table_changes_selecting,
        table_changes_selecting,
        TableChangesSelectingArgs
    );
    notification!(
        on_table_changes_selected,
        intercept_table_changes_selected,
        table_changes_selected,
        TableChangesSelectedArgs
    );
    notification!(
        on_table_changes_applying,
        intercept_table_changes_applying,
        table_changes_applying,
        TableChangesApplyingArgs
    );
    notification!(
        on_table_changes_applied,
        intercept_table_changes_applied,
        table_changes_applied,
        TableChangesAppliedArgs
    );
    notification!(on_conflict, intercept_conflict, conflict, ConflictArgs);
    notification!(on_outdated, intercept_outdated, outdated, OutdatedArgs);
    notification!(on_progress, intercept_progress, progress, ProgressArgs);
}

impl std::fmt::Debug for Interceptors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interceptors")
            .field("conflict_handlers", &self.conflict.len())
            .field("outdated_handlers", &self.outdated.len())
            .finish_non_exhaustive()
    }
}
