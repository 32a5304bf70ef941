//! Conflict resolution policy.

use serde::{Deserialize, Serialize};

/// Policy applied when both sides changed the same row since their last
/// common watermark.
///
/// The hub owns the policy; clients learn it during scope agreement. A
/// registered conflict interceptor can still override the outcome per row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictPolicy {
    /// The hub's row is authoritative; an incoming client row that conflicts
    /// is discarded.
    #[default]
    ServerWins,
    /// The incoming client row overwrites the hub's row.
    ClientWins,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{from_cbor, to_cbor};

    #[test]
    fn policy_roundtrip() {
        for policy in [ConflictPolicy::ServerWins, ConflictPolicy::ClientWins] {
            let bytes = to_cbor(&policy).unwrap();
            let decoded: ConflictPolicy = from_cbor(&bytes).unwrap();
            assert_eq!(decoded, policy);
        }
    }

    #[test]
    fn default_is_server_wins() {
        assert_eq!(ConflictPolicy::default(), ConflictPolicy::ServerWins);
    }
}
