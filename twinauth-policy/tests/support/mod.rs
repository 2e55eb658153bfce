//! Shared test doubles for twinauth-policy integration tests.

// Not every test crate uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use twinauth_core::{
    AuthorizationContext, Enforcer, EnforcerFactory, Entry, Permission, Policy, PolicyId,
    ResourceKey, Result,
};
use twinauth_policy::{CacheConfig, EntryLoader, PolicyEnforcerCache, PolicyEnforcerLoader};

pub fn pid(id: &str) -> PolicyId {
    PolicyId::parse(id).unwrap()
}

/// Policy granting READ to `readers`, importing `imports`
pub fn policy(id: &str, imports: &[&str], readers: &[&str]) -> Policy {
    imports
        .iter()
        .fold(Policy::new(pid(id), 1), |p, i| p.with_import(pid(i)))
        .with_entries(json!({ "readers": readers }))
}

// =============================================================================
// Policy store
// =============================================================================

/// In-memory policy store counting loads per policy id
#[derive(Default)]
pub struct MemoryPolicyStore {
    policies: Mutex<HashMap<PolicyId, Policy>>,
    loads: Mutex<HashMap<PolicyId, usize>>,
    delay: Option<Duration>,
}

impl MemoryPolicyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn put(&self, policy: Policy) {
        self.policies.lock().insert(policy.id.clone(), policy);
    }

    pub fn load_count(&self, id: &str) -> usize {
        self.loads.lock().get(&pid(id)).copied().unwrap_or(0)
    }

    pub fn total_loads(&self) -> usize {
        self.loads.lock().values().sum()
    }
}

#[async_trait]
impl EntryLoader<PolicyId, Policy> for MemoryPolicyStore {
    async fn load(&self, policy_id: &PolicyId) -> Result<Entry<Policy>> {
        *self.loads.lock().entry(policy_id.clone()).or_default() += 1;
        // the reply reflects the store at request time, then travels for `delay`
        let policy = self.policies.lock().get(policy_id).cloned();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(match policy {
            Some(policy) => Entry::of(policy.revision, policy),
            None => Entry::nonexistent(),
        })
    }
}

// =============================================================================
// Enforcer
// =============================================================================

/// Grants READ to the subjects listed under `readers`
#[derive(Debug)]
pub struct ReaderListEnforcer {
    readers: Vec<String>,
}

impl Enforcer for ReaderListEnforcer {
    fn has_unrestricted_permissions(
        &self,
        _resource: &ResourceKey,
        context: &AuthorizationContext,
        permissions: &[Permission],
    ) -> bool {
        permissions.iter().all(|p| *p == Permission::Read)
            && context
                .subject_ids()
                .any(|s| self.readers.iter().any(|r| r == s))
    }
}

#[derive(Debug, Default)]
pub struct ReaderListFactory {
    pub compiled: AtomicUsize,
}

impl EnforcerFactory for ReaderListFactory {
    fn compile(&self, policy: &Policy) -> Result<Arc<dyn Enforcer>> {
        self.compiled.fetch_add(1, Ordering::SeqCst);
        let readers = match &policy.entries["readers"] {
            JsonValue::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        Ok(Arc::new(ReaderListEnforcer { readers }))
    }
}

pub fn enforcer_loader(store: &Arc<MemoryPolicyStore>) -> PolicyEnforcerLoader {
    PolicyEnforcerLoader::new(store.clone(), Arc::new(ReaderListFactory::default()))
}

pub fn enforcer_cache(store: &Arc<MemoryPolicyStore>) -> PolicyEnforcerCache {
    PolicyEnforcerCache::new(&CacheConfig::default(), enforcer_loader(store))
}

/// Yield until `condition` holds, failing after a bounded number of rounds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..1_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
