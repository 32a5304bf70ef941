//! Sync schema description and foreign-key ordering.

use crate::codec::to_cbor;
use crate::error::{ProtocolResult, SchemaError};
use crate::value::ColumnType;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// A column in a synced table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncColumn {
    /// Column name.
    pub name: String,
    /// Declared type.
    pub data_type: ColumnType,
}

impl SyncColumn {
    /// Creates a new column.
    pub fn new(name: impl Into<String>, data_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A synced table: columns plus primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTable {
    /// Table name.
    pub name: String,
    /// Columns, in storage order. Row values travel in this order.
    pub columns: Vec<SyncColumn>,
    /// Names of the primary-key columns.
    pub primary_key: Vec<String>,
}

impl SyncTable {
    /// Creates a new table description.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<SyncColumn>,
        primary_key: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            primary_key,
        }
    }

    /// Returns the position of a column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

/// A foreign-key relation between two synced tables.
///
/// `child_columns` reference the parent table's primary key, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRelation {
    /// Referencing table.
    pub child_table: String,
    /// Referencing columns, aligned with the parent's primary key.
    pub child_columns: Vec<String>,
    /// Referenced table.
    pub parent_table: String,
}

/// The schema of a scope: tables and their foreign-key relations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSchema {
    /// Tables, in declaration order.
    pub tables: Vec<SyncTable>,
    /// Foreign-key relations.
    pub relations: Vec<SyncRelation>,
}

impl SyncSchema {
    /// Creates a new schema.
    pub fn new(tables: Vec<SyncTable>, relations: Vec<SyncRelation>) -> Self {
        Self { tables, relations }
    }

    /// Looks up a table by name.
    pub fn table(&self, name: &str) -> Option<&SyncTable> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Returns the parent tables of a table, per declared relations.
    pub fn parents_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.relations
            .iter()
            .filter(move |r| r.child_table == table)
            .map(|r| r.parent_table.as_str())
    }

    /// Validates tables, keys and relations.
    pub fn validate(&self) -> Result<(), SchemaError> {
        for table in &self.tables {
            if table.primary_key.is_empty() {
                return Err(SchemaError::MissingPrimaryKey(table.name.clone()));
            }
            for pk in &table.primary_key {
                if table.column_index(pk).is_none() {
                    return Err(SchemaError::UnknownColumn {
                        table: table.name.clone(),
                        column: pk.clone(),
                    });
                }
            }
        }

        for relation in &self.relations {
            let child = self
                .table(&relation.child_table)
                .ok_or_else(|| SchemaError::UnknownTable(relation.child_table.clone()))?;
            if self.table(&relation.parent_table).is_none() {
                return Err(SchemaError::UnknownTable(relation.parent_table.clone()));
            }
            for column in &relation.child_columns {
                if child.column_index(column).is_none() {
                    return Err(SchemaError::UnknownColumn {
                        table: child.name.clone(),
                        column: column.clone(),
                    });
                }
            }
        }

        self.table_order().map(|_| ())
    }

    /// Computes the apply order: parents before children.
    ///
    /// The order is computed once at provisioning and cached in `ScopeInfo`;
    /// a true cycle in the foreign-key graph is a configuration error.
    pub fn table_order(&self) -> Result<Vec<String>, SchemaError> {
        let mut remaining: BTreeSet<&str> = self.tables.iter().map(|t| t.name.as_str()).collect();
        let mut pending_parents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

        for table in &self.tables {
            let parents: BTreeSet<&str> = self
                .parents_of(&table.name)
                .filter(|p| *p != table.name)
                .collect();
            pending_parents.insert(table.name.as_str(), parents);
        }

        let mut order = Vec::with_capacity(self.tables.len());
        while !remaining.is_empty() {
            // Declaration order keeps the result deterministic.
            let next = self.tables.iter().find(|t| {
                remaining.contains(t.name.as_str())
                    && pending_parents[t.name.as_str()]
                        .iter()
                        .all(|p| !remaining.contains(p))
            });

            match next {
                Some(table) => {
                    remaining.remove(table.name.as_str());
                    order.push(table.name.clone());
                }
                None => {
                    let stuck: Vec<String> = remaining.iter().map(|s| s.to_string()).collect();
                    return Err(SchemaError::CyclicForeignKeys(stuck));
                }
            }
        }

        Ok(order)
    }

    /// SHA-256 fingerprint over the canonical encoding, for schema agreement.
    pub fn fingerprint(&self) -> ProtocolResult<[u8; 32]> {
        let bytes = to_cbor(self)?;
        Ok(Sha256::digest(&bytes).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_table_schema() -> SyncSchema {
        SyncSchema::new(
            vec![
                SyncTable::new(
                    "order",
                    vec![
                        SyncColumn::new("id", ColumnType::Integer),
                        SyncColumn::new("customer_id", ColumnType::Integer),
                    ],
                    vec!["id".into()],
                ),
                SyncTable::new(
                    "customer",
                    vec![SyncColumn::new("id", ColumnType::Integer)],
                    vec!["id".into()],
                ),
            ],
            vec![SyncRelation {
                child_table: "order".into(),
                child_columns: vec!["customer_id".into()],
                parent_table: "customer".into(),
            }],
        )
    }

    #[test]
    fn parents_come_first() {
        let schema = two_table_schema();
        let order = schema.table_order().unwrap();
        assert_eq!(order, vec!["customer".to_string(), "order".to_string()]);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut schema = two_table_schema();
        schema.relations.push(SyncRelation {
            child_table: "customer".into(),
            child_columns: vec!["id".into()],
            parent_table: "order".into(),
        });

        let err = schema.table_order().unwrap_err();
        assert!(matches!(err, SchemaError::CyclicForeignKeys(_)));
    }

    #[test]
    fn self_reference_is_not_a_cycle() {
        let mut schema = two_table_schema();
        schema.relations.push(SyncRelation {
            child_table: "customer".into(),
            child_columns: vec!["id".into()],
            parent_table: "customer".into(),
        });

        assert!(schema.table_order().is_ok());
    }

    #[test]
    fn missing_primary_key_rejected() {
        let schema = SyncSchema::new(
            vec![SyncTable::new(
                "t",
                vec![SyncColumn::new("a", ColumnType::Text)],
                vec![],
            )],
            vec![],
        );

        assert!(matches!(
            schema.validate(),
            Err(SchemaError::MissingPrimaryKey(_))
        ));
    }

    #[test]
    fn fingerprint_changes_with_schema() {
        let a = two_table_schema();
        let mut b = two_table_schema();
        b.tables[0]
            .columns
            .push(SyncColumn::new("amount", ColumnType::Real));

        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap(), two_table_schema().fingerprint().unwrap());
    }
}
