//! Policy snapshot
//!
//! A [`Policy`] is what the policy store returns for a [`PolicyId`]. Its
//! `entries` are opaque to this crate (the permission grammar belongs to the
//! [`EnforcerFactory`](crate::EnforcerFactory) implementation); what matters
//! here is the id, the revision and the set of imported policies, which drives
//! import-aware cache invalidation.

use crate::ids::PolicyId;
use serde::{Deserialize, Serialize};

/// Import of another policy's entries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyImport {
    pub policy_id: PolicyId,
    /// Labels of the imported entries; empty imports all importable entries
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<String>,
}

impl PolicyImport {
    pub fn new(policy_id: PolicyId) -> Self {
        Self {
            policy_id,
            entries: Vec::new(),
        }
    }
}

/// Policy as stored, at one revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub id: PolicyId,
    pub revision: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<PolicyImport>,
    /// Raw policy entries (subjects, resources, grants and revokes)
    #[serde(default)]
    pub entries: serde_json::Value,
}

impl Policy {
    pub fn new(id: PolicyId, revision: i64) -> Self {
        Self {
            id,
            revision,
            imports: Vec::new(),
            entries: serde_json::Value::Null,
        }
    }

    pub fn with_import(mut self, policy_id: PolicyId) -> Self {
        self.imports.push(PolicyImport::new(policy_id));
        self
    }

    pub fn with_entries(mut self, entries: serde_json::Value) -> Self {
        self.entries = entries;
        self
    }

    pub fn namespace(&self) -> &str {
        self.id.namespace()
    }

    /// Ids of all directly imported policies, in declaration order
    pub fn imported_policy_ids(&self) -> impl Iterator<Item = &PolicyId> + '_ {
        self.imports.iter().map(|import| &import.policy_id)
    }
}
