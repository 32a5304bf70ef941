//! Persisted sync progress records.

use crate::error::ProtocolResult;
use crate::schema::SyncSchema;
use crate::setup::SyncSetup;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted per-scope record: schema, setup and agreement fingerprint.
///
/// The hub authors the `ScopeInfo` at provisioning; clients store a copy so
/// both sides can detect schema drift before exchanging changes. Mutated only
/// during provisioning and metadata cleanup, read-mostly thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeInfo {
    /// Scope name.
    pub name: String,
    /// Identity of the participant that authored this scope (the hub).
    pub scope_id: Uuid,
    /// Schema definition.
    pub schema: SyncSchema,
    /// Participating tables and filters.
    pub setup: SyncSetup,
    /// Apply order cached at provisioning (parents before children).
    pub table_order: Vec<String>,
    /// SHA-256 fingerprint of the schema, for agreement checks.
    pub schema_fingerprint: [u8; 32],
    /// Schema version, bumped on re-provisioning.
    pub version: u32,
    /// Timestamp below which tracking metadata has been cleaned up.
    pub last_cleanup_timestamp: u64,
}

impl ScopeInfo {
    /// Creates a scope record, validating the schema and caching the
    /// apply order and fingerprint.
    pub fn new(
        name: impl Into<String>,
        scope_id: Uuid,
        schema: SyncSchema,
        setup: SyncSetup,
    ) -> ProtocolResult<Self> {
        schema.validate()?;
        let table_order = schema.table_order()?;
        let schema_fingerprint = schema.fingerprint()?;
        Ok(Self {
            name: name.into(),
            scope_id,
            schema,
            setup,
            table_order,
            schema_fingerprint,
            version: 1,
            last_cleanup_timestamp: 0,
        })
    }

    /// Apply order restricted to tables present in the setup.
    pub fn ordered_setup_tables(&self) -> Vec<&str> {
        self.table_order
            .iter()
            .map(String::as_str)
            .filter(|t| self.setup.contains(t))
            .collect()
    }
}

/// Persisted client-side bookkeeping, one record per (client, scope).
///
/// The two watermarks are what make incremental sync converge: the client
/// knows which server changes it has absorbed and which of its own changes
/// the server has absorbed, independent of wall-clock time. Both are updated
/// together at the single commit point of a successful cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeInfoClient {
    /// Stable client identity, generated once.
    pub client_id: Uuid,
    /// Scope name.
    pub scope_name: String,
    /// Last server timestamp successfully received and applied.
    pub last_server_timestamp: u64,
    /// Local timestamp up to which the client's changes have been sent.
    pub last_sent_timestamp: u64,
    /// Count of successful cycles, for diagnostics.
    pub last_sync: u64,
}

impl ScopeInfoClient {
    /// Creates a fresh client record with a new identity.
    pub fn new(scope_name: impl Into<String>) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            scope_name: scope_name.into(),
            last_server_timestamp: 0,
            last_sent_timestamp: 0,
            last_sync: 0,
        }
    }

    /// True if the client has never completed a cycle for this scope.
    pub fn is_new(&self) -> bool {
        self.last_sync == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SyncColumn, SyncTable};
    use crate::value::ColumnType;

    fn schema() -> SyncSchema {
        SyncSchema::new(
            vec![SyncTable::new(
                "customer",
                vec![SyncColumn::new("id", ColumnType::Integer)],
                vec!["id".into()],
            )],
            vec![],
        )
    }

    #[test]
    fn scope_info_caches_order_and_fingerprint() {
        let schema = schema();
        let setup = SyncSetup::from_tables(["customer"]);
        let info = ScopeInfo::new("sales", Uuid::from_u128(9), schema.clone(), setup).unwrap();

        assert_eq!(info.table_order, vec!["customer".to_string()]);
        assert_eq!(info.schema_fingerprint, schema.fingerprint().unwrap());
        assert_eq!(info.version, 1);
    }

    #[test]
    fn new_client_record() {
        let client = ScopeInfoClient::new("sales");
        assert!(client.is_new());
        assert_eq!(client.last_server_timestamp, 0);
        assert_eq!(client.last_sent_timestamp, 0);
    }
}
