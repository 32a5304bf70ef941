//! Scope setup: table selection and parameterized filters.

use crate::value::ColumnValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A parameterized row filter on one table.
///
/// Rows are selected when `column` equals the value bound to `parameter` in
/// the cycle's [`SyncParameters`]. Tombstones always pass filters so deletes
/// propagate to filtered clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFilter {
    /// Filtered column.
    pub column: String,
    /// Parameter name bound per cycle.
    pub parameter: String,
}

/// One table included in a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupTable {
    /// Table name; must exist in the scope schema.
    pub table_name: String,
    /// Optional row filter.
    pub filter: Option<SyncFilter>,
}

impl SetupTable {
    /// Creates an unfiltered setup entry.
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            filter: None,
        }
    }

    /// Attaches a filter.
    pub fn with_filter(mut self, column: impl Into<String>, parameter: impl Into<String>) -> Self {
        self.filter = Some(SyncFilter {
            column: column.into(),
            parameter: parameter.into(),
        });
        self
    }
}

/// Which tables participate in a scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSetup {
    /// Participating tables.
    pub tables: Vec<SetupTable>,
}

impl SyncSetup {
    /// Creates a setup over the given table names, unfiltered.
    pub fn from_tables<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: names.into_iter().map(SetupTable::new).collect(),
        }
    }

    /// Looks up the setup entry for a table.
    pub fn table(&self, name: &str) -> Option<&SetupTable> {
        self.tables.iter().find(|t| t.table_name == name)
    }

    /// Returns true if the table participates in the scope.
    pub fn contains(&self, name: &str) -> bool {
        self.table(name).is_some()
    }
}

/// Filter parameter values supplied by the client for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncParameters(BTreeMap<String, ColumnValue>);

impl SyncParameters {
    /// Creates an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a parameter value.
    pub fn add(mut self, name: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Looks up a parameter value.
    pub fn get(&self, name: &str) -> Option<&ColumnValue> {
        self.0.get(name)
    }

    /// Returns true if no parameters are bound.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_lookup() {
        let setup = SyncSetup {
            tables: vec![
                SetupTable::new("customer"),
                SetupTable::new("order").with_filter("customer_id", "customer_id"),
            ],
        };

        assert!(setup.contains("customer"));
        assert!(!setup.contains("invoice"));
        let filter = setup.table("order").unwrap().filter.as_ref().unwrap();
        assert_eq!(filter.column, "customer_id");
    }

    #[test]
    fn parameters_bind_and_lookup() {
        let params = SyncParameters::new().add("customer_id", 42i64);
        assert_eq!(
            params.get("customer_id"),
            Some(&ColumnValue::Integer(42))
        );
        assert!(params.get("region").is_none());
    }
}
