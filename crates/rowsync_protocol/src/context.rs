//! Per-cycle sync context.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Protocol stage of a sync cycle.
///
/// Carried in every envelope and captured in errors so callers can tell how
/// far a failed cycle progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncStage {
    /// No stage entered yet.
    #[default]
    None,
    /// Loading or exchanging scope records.
    ScopeLoading,
    /// Creating scope records and tracking structures.
    Provisioning,
    /// Removing scope records and tracking structures.
    Deprovisioning,
    /// Selecting changes from a source.
    ChangesSelecting,
    /// Applying changes at a destination.
    ChangesApplying,
    /// Migrating a scope to a newer schema.
    Migrating,
    /// Purging old tracking metadata.
    MetadataCleaning,
}

/// Ephemeral per-cycle correlation object.
///
/// Created fresh for every cycle, carried unchanged across every
/// request/response pair, never persisted. Collaborators may stash
/// cross-cutting state in the property bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncContext {
    /// Unique session identifier.
    pub session_id: Uuid,
    /// Scope being synchronized.
    pub scope_name: String,
    /// Current protocol stage.
    pub stage: SyncStage,
    /// Percent complete, 0.0 to 1.0.
    pub progress: f64,
    /// Open-ended property bag.
    pub properties: BTreeMap<String, String>,
}

impl SyncContext {
    /// Creates a fresh context for one cycle.
    pub fn new(scope_name: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            scope_name: scope_name.into(),
            stage: SyncStage::None,
            progress: 0.0,
            properties: BTreeMap::new(),
        }
    }

    /// Sets the current stage.
    pub fn set_stage(&mut self, stage: SyncStage) {
        self.stage = stage;
    }

    /// Stores a property.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Reads a property.
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_cbor, to_cbor};

    #[test]
    fn context_roundtrip_keeps_properties() {
        let mut ctx = SyncContext::new("sales");
        ctx.set_stage(SyncStage::ChangesSelecting);
        ctx.set_property("tenant", "acme");

        let bytes = to_cbor(&ctx).unwrap();
        let decoded: SyncContext = from_cbor(&bytes).unwrap();

        assert_eq!(decoded.session_id, ctx.session_id);
        assert_eq!(decoded.stage, SyncStage::ChangesSelecting);
        assert_eq!(decoded.property("tenant"), Some("acme"));
    }

    #[test]
    fn fresh_context_defaults() {
        let ctx = SyncContext::new("sales");
        assert_eq!(ctx.stage, SyncStage::None);
        assert_eq!(ctx.progress, 0.0);
        assert!(ctx.properties.is_empty());
    }
}
