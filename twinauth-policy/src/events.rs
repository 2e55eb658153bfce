//! Invalidation events consumed by policy enforcer providers

use std::collections::BTreeSet;
use tokio::sync::broadcast;
use twinauth_core::PolicyId;

/// Event published when cached policy data may be stale
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyCacheEvent {
    /// A policy was modified, created or deleted
    PolicyChanged { policy_id: PolicyId, revision: i64 },
    /// The set of blocked namespaces changed
    NamespaceBlockSetChanged {
        added: BTreeSet<String>,
        removed: BTreeSet<String>,
    },
}

/// Publishing side of the invalidation stream
pub type PolicyCacheEventSender = broadcast::Sender<PolicyCacheEvent>;

/// Channel for invalidation events
pub fn policy_cache_events(capacity: usize) -> PolicyCacheEventSender {
    let (tx, _rx) = broadcast::channel(capacity);
    tx
}
