//! Selection and apply accounting.
//!
//! Purely observational: counters never drive control flow except for the
//! totals reported to the caller.

use crate::row::RowState;
use serde::{Deserialize, Serialize};

/// Changes selected from one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChangesSelected {
    /// Table name.
    pub table_name: String,
    /// Rows created since the watermark.
    pub inserts: u64,
    /// Rows updated since the watermark.
    pub updates: u64,
    /// Tombstones since the watermark.
    pub deletes: u64,
}

impl TableChangesSelected {
    /// Creates an empty counter set for a table.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            ..Default::default()
        }
    }

    /// Records one selected row.
    pub fn record(&mut self, state: RowState) {
        match state {
            RowState::Insert => self.inserts += 1,
            RowState::Update => self.updates += 1,
            RowState::Delete => self.deletes += 1,
        }
    }

    /// Total rows selected for the table.
    pub fn total(&self) -> u64 {
        self.inserts + self.updates + self.deletes
    }
}

/// Changes selected across all tables of a scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseChangesSelected {
    /// Per-table breakdown.
    pub tables: Vec<TableChangesSelected>,
}

impl DatabaseChangesSelected {
    /// Adds a per-table counter set.
    pub fn push(&mut self, table: TableChangesSelected) {
        self.tables.push(table);
    }

    /// Total rows selected.
    pub fn total_changes(&self) -> u64 {
        self.tables.iter().map(TableChangesSelected::total).sum()
    }

    /// Total tombstones selected.
    pub fn total_deletes(&self) -> u64 {
        self.tables.iter().map(|t| t.deletes).sum()
    }

    /// Total inserts selected.
    pub fn total_inserts(&self) -> u64 {
        self.tables.iter().map(|t| t.inserts).sum()
    }

    /// Total updates selected.
    pub fn total_updates(&self) -> u64 {
        self.tables.iter().map(|t| t.updates).sum()
    }
}

/// Changes applied to one table for one row state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableChangesApplied {
    /// Table name.
    pub table_name: String,
    /// Row state this entry accounts for.
    pub state: RowState,
    /// Rows written (or resolved) successfully.
    pub applied: u64,
    /// Rows that failed (constraint violation, unresolved conflict).
    pub failed: u64,
    /// Conflicts resolved by policy or callback.
    pub resolved_conflicts: u64,
}

/// Changes applied across all tables of a scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseChangesApplied {
    /// Per-(table, state) breakdown.
    pub tables: Vec<TableChangesApplied>,
}

impl DatabaseChangesApplied {
    /// Accumulates counters for a (table, state) pair.
    pub fn report(
        &mut self,
        table_name: &str,
        state: RowState,
        applied: u64,
        failed: u64,
        resolved_conflicts: u64,
    ) {
        if let Some(entry) = self
            .tables
            .iter_mut()
            .find(|t| t.table_name == table_name && t.state == state)
        {
            entry.applied += applied;
            entry.failed += failed;
            entry.resolved_conflicts += resolved_conflicts;
        } else {
            self.tables.push(TableChangesApplied {
                table_name: table_name.to_string(),
                state,
                applied,
                failed,
                resolved_conflicts,
            });
        }
    }

    /// Total rows applied.
    pub fn total_applied(&self) -> u64 {
        self.tables.iter().map(|t| t.applied).sum()
    }

    /// Total row failures.
    pub fn total_failed(&self) -> u64 {
        self.tables.iter().map(|t| t.failed).sum()
    }

    /// Total conflicts resolved.
    pub fn total_resolved_conflicts(&self) -> u64 {
        self.tables.iter().map(|t| t.resolved_conflicts).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selected_totals() {
        let mut db = DatabaseChangesSelected::default();

        let mut customer = TableChangesSelected::new("customer");
        customer.record(RowState::Insert);
        customer.record(RowState::Update);
        db.push(customer);

        let mut order = TableChangesSelected::new("order");
        order.record(RowState::Delete);
        db.push(order);

        assert_eq!(db.total_changes(), 3);
        assert_eq!(db.total_inserts(), 1);
        assert_eq!(db.total_updates(), 1);
        assert_eq!(db.total_deletes(), 1);
    }

    #[test]
    fn applied_accumulates_per_table_and_state() {
        let mut db = DatabaseChangesApplied::default();
        db.report("customer", RowState::Insert, 2, 0, 0);
        db.report("customer", RowState::Insert, 1, 1, 0);
        db.report("customer", RowState::Update, 1, 0, 1);

        assert_eq!(db.tables.len(), 2);
        assert_eq!(db.total_applied(), 4);
        assert_eq!(db.total_failed(), 1);
        assert_eq!(db.total_resolved_conflicts(), 1);
    }
}
