//! Client-side orchestrator.

use crate::apply::{ApplyEngine, ApplyOptions};
use crate::error::{hex, SyncErrorKind};
use crate::interceptor::Interceptors;
use crate::options::SyncOptions;
use crate::store::{ScopeStore, SyncStore};
use crate::tracker::ChangeTracker;
use rowsync_protocol::{
    ChangeSet, DatabaseChangesApplied, DatabaseChangesSelected, ScopeInfo, ScopeInfoClient,
    SyncContext, SyncParameters, SyncStage, TableRows,
};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Drives the client side of a sync cycle against the local store.
pub struct LocalOrchestrator<S> {
    store: Arc<S>,
    options: SyncOptions,
    interceptors: Interceptors,
}

impl<S: SyncStore + ScopeStore> LocalOrchestrator<S> {
    /// Creates a local orchestrator over a store.
    pub fn new(store: Arc<S>, options: SyncOptions) -> Self {
        Self {
            store,
            options,
            interceptors: Interceptors::new(),
        }
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Returns the orchestrator's options.
    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Returns the notification registry.
    pub fn interceptors(&self) -> &Interceptors {
        &self.interceptors
    }

    /// Returns the notification registry for handler registration.
    pub fn interceptors_mut(&mut self) -> &mut Interceptors {
        &mut self.interceptors
    }

    /// Ensures the local scope record agrees with the hub's.
    ///
    /// Provisions the local side from the hub's record when absent; a
    /// fingerprint mismatch against an existing record is fatal.
    pub fn ensure_scope(
        &self,
        ctx: &mut SyncContext,
        remote_scope: &ScopeInfo,
    ) -> Result<ScopeInfo, SyncErrorKind> {
        ctx.set_stage(SyncStage::ScopeLoading);

        match self.store.get_scope_info(&remote_scope.name)? {
            Some(local) => {
                if local.schema_fingerprint != remote_scope.schema_fingerprint {
                    return Err(SyncErrorKind::SchemaMismatch {
                        local: hex(&local.schema_fingerprint),
                        remote: hex(&remote_scope.schema_fingerprint),
                    });
                }
                Ok(local)
            }
            None => {
                ctx.set_stage(SyncStage::Provisioning);
                self.store.save_scope_info(remote_scope)?;
                info!(scope = %remote_scope.name, "provisioned local scope from hub");
                Ok(remote_scope.clone())
            }
        }
    }

    /// Loads the client bookkeeping record, creating it on first use.
    pub fn scope_client(&self, scope_name: &str) -> Result<ScopeInfoClient, SyncErrorKind> {
        match self.store.get_scope_info_client(scope_name)? {
            Some(client) => Ok(client),
            None => {
                let client = ScopeInfoClient::new(scope_name);
                self.store.save_scope_info_client(&client)?;
                debug!(scope = scope_name, client_id = %client.client_id, "created client scope record");
                Ok(client)
            }
        }
    }

    /// Persists the client bookkeeping record. This is the cycle's single
    /// commit point: both watermarks move together, only on full success.
    pub fn save_scope_client(&self, client: &ScopeInfoClient) -> Result<(), SyncErrorKind> {
        self.store.save_scope_info_client(client)?;
        Ok(())
    }

    /// Reads the local store's logical timestamp.
    pub fn local_timestamp(&self) -> Result<u64, SyncErrorKind> {
        Ok(self.store.local_timestamp()?)
    }

    /// Selects local changes since `since`, excluding rows last written by
    /// `exclude_writer`.
    pub fn select_changes(
        &self,
        ctx: &mut SyncContext,
        scope: &ScopeInfo,
        since: u64,
        exclude_writer: Option<Uuid>,
        parameters: &SyncParameters,
    ) -> Result<(ChangeSet, DatabaseChangesSelected), SyncErrorKind> {
        ChangeTracker::select_changes(
            self.store.as_ref(),
            scope,
            since,
            exclude_writer,
            parameters,
            &self.interceptors,
            ctx,
        )
    }

    /// Applies downloaded parts to the local store.
    pub fn apply_changes(
        &self,
        ctx: &mut SyncContext,
        scope: &ScopeInfo,
        parts: &[Vec<TableRows>],
        options: &ApplyOptions,
    ) -> Result<DatabaseChangesApplied, SyncErrorKind> {
        ApplyEngine::apply(
            self.store.as_ref(),
            scope,
            parts,
            options,
            &self.interceptors,
            ctx,
        )
    }

    /// Purges tracking metadata older than `before` and records the cleanup
    /// in the scope record. Cleanup is what raises the store's retention
    /// floor and can make lagging peers outdated.
    pub fn delete_metadata(
        &self,
        ctx: &mut SyncContext,
        scope_name: &str,
        before: u64,
    ) -> Result<u64, SyncErrorKind> {
        ctx.set_stage(SyncStage::MetadataCleaning);
        let purged = self.store.delete_metadata(before)?;

        if let Some(mut scope) = self.store.get_scope_info(scope_name)? {
            scope.last_cleanup_timestamp = before;
            self.store.save_scope_info(&scope)?;
        }

        info!(scope = scope_name, before, purged, "cleaned tracking metadata");
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use rowsync_protocol::{ColumnType, SyncColumn, SyncSchema, SyncSetup, SyncTable};

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

    fn scope() -> ScopeInfo {
        ScopeInfo::new(
            "sales",
            Uuid::from_u128(1),
            schema(),
            SyncSetup::from_tables(["customer"]),
        )
        .unwrap()
    }

    fn orchestrator() -> LocalOrchestrator<MemoryStore> {
        LocalOrchestrator::new(Arc::new(MemoryStore::new(schema())), SyncOptions::default())
    }

    #[test]
    fn ensure_scope_provisions_once() {
        let local = orchestrator();
        let remote_scope = scope();
        let mut ctx = SyncContext::new("sales");

        let first = local.ensure_scope(&mut ctx, &remote_scope).unwrap();
        assert_eq!(ctx.stage, SyncStage::Provisioning);
        assert_eq!(first.schema_fingerprint, remote_scope.schema_fingerprint);

        let mut ctx = SyncContext::new("sales");
        local.ensure_scope(&mut ctx, &remote_scope).unwrap();
        assert_eq!(ctx.stage, SyncStage::ScopeLoading);
    }

    #[test]
    fn ensure_scope_rejects_drift() {
        let local = orchestrator();
        let mut ctx = SyncContext::new("sales");
        local.ensure_scope(&mut ctx, &scope()).unwrap();

        let mut drifted_schema = schema();
        drifted_schema.tables[0]
            .columns
            .push(SyncColumn::new("email", ColumnType::Text));
        let drifted = ScopeInfo::new(
            "sales",
            Uuid::from_u128(1),
            drifted_schema,
            SyncSetup::from_tables(["customer"]),
        )
        .unwrap();

        let result = local.ensure_scope(&mut ctx, &drifted);
        assert!(matches!(result, Err(SyncErrorKind::SchemaMismatch { .. })));
    }

    #[test]
    fn scope_client_identity_is_stable() {
        let local = orchestrator();
        let first = local.scope_client("sales").unwrap();
        let second = local.scope_client("sales").unwrap();
        assert_eq!(first.client_id, second.client_id);
    }

    #[test]
    fn delete_metadata_records_cleanup() {
        let local = orchestrator();
        let mut ctx = SyncContext::new("sales");
        local.ensure_scope(&mut ctx, &scope()).unwrap();

        local
            .store()
            .insert("customer", vec![1i64.into()], vec![1i64.into(), "A".into()])
            .unwrap();
        local.store().delete("customer", vec![1i64.into()]).unwrap();
        let ts = local.local_timestamp().unwrap();

        let purged = local.delete_metadata(&mut ctx, "sales", ts).unwrap();
        assert_eq!(purged, 1);
        assert_eq!(ctx.stage, SyncStage::MetadataCleaning);

        let info = local.store().get_scope_info("sales").unwrap().unwrap();
        assert_eq!(info.last_cleanup_timestamp, ts);
    }
}
