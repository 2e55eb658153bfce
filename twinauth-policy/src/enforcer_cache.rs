//! Policy enforcer cache with import-aware invalidation
//!
//! Policies may import entries of other policies, so a change to policy `P`
//! also changes the compiled enforcer of every policy importing `P`. The
//! [`ImportIndex`] records `imported -> {importers}` as a side effect of each
//! successful load; [`PolicyEnforcerCache::invalidate`] walks it breadth-first
//! so chains of imports are invalidated as well. The walk tracks visited ids
//! and therefore terminates on import cycles.

use crate::cache::{CacheConfig, CacheStats, EntryCache, LoadingCache};
use crate::loader::PolicyEnforcerLoader;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};
use twinauth_core::{EntityId, Entry, Policy, PolicyEnforcer, PolicyId, Result};

/// Statistics of the policy enforcer cache
pub type PolicyCacheStats = CacheStats;

/// Reverse import index: imported policy id -> ids of the policies importing it
///
/// Entries are only ever added by loads; they are removed when the imported
/// policy is invalidated (its importers are invalidated with it and re-record
/// themselves when reloaded).
#[derive(Debug, Clone, Default)]
pub struct ImportIndex {
    imported_by: Arc<DashMap<PolicyId, HashSet<PolicyId>>>,
}

impl ImportIndex {
    /// Record every import of `policy`.
    pub fn record(&self, policy: &Policy) {
        for imported in policy.imported_policy_ids() {
            self.imported_by
                .entry(imported.clone())
                .or_default()
                .insert(policy.id.clone());
        }
    }

    /// Current importers of `policy_id`
    pub fn importers(&self, policy_id: &PolicyId) -> HashSet<PolicyId> {
        self.imported_by
            .get(policy_id)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    fn take_importers(&self, policy_id: &PolicyId) -> Option<HashSet<PolicyId>> {
        self.imported_by.remove(policy_id).map(|(_, set)| set)
    }

    pub fn len(&self) -> usize {
        self.imported_by.len()
    }

    pub fn is_empty(&self) -> bool {
        self.imported_by.is_empty()
    }
}

/// Cache of compiled policy enforcers
#[derive(Debug)]
pub struct PolicyEnforcerCache {
    cache: LoadingCache<PolicyId, PolicyEnforcer>,
    import_index: ImportIndex,
}

impl PolicyEnforcerCache {
    pub fn new(config: &CacheConfig, loader: PolicyEnforcerLoader) -> Self {
        let import_index = loader.import_index().clone();
        Self {
            cache: LoadingCache::new("policy-enforcer", config, Arc::new(loader)),
            import_index,
        }
    }

    pub async fn get(&self, policy_id: &PolicyId) -> Result<Entry<PolicyEnforcer>> {
        self.cache.get(policy_id).await
    }

    /// Invalidate `policy_id` and, transitively, every policy importing it.
    ///
    /// Returns true if any entry was actually cached.
    pub async fn invalidate(&self, policy_id: &PolicyId) -> bool {
        let mut visited: HashSet<PolicyId> = HashSet::new();
        let mut queue = VecDeque::from([policy_id.clone()]);
        let mut any_cached = false;

        while let Some(id) = queue.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if self.cache.invalidate(&id).await {
                any_cached = true;
                metrics::counter!("policy_enforcer_cache_invalidations").increment(1);
            }
            if let Some(importers) = self.import_index.take_importers(&id) {
                queue.extend(importers.into_iter().filter(|i| !visited.contains(i)));
            }
        }

        debug!(
            policy_id = %policy_id,
            visited = visited.len(),
            any_cached,
            "invalidated policy enforcer"
        );
        any_cached
    }

    /// Ids of all currently cached policies
    pub fn cached_policy_ids(&self) -> Vec<PolicyId> {
        self.cache.keys()
    }

    /// Invalidate every cached policy whose namespace is in `blocked`.
    ///
    /// Returns the ids found in a blocked namespace.
    pub async fn invalidate_namespaces(&self, blocked: &BTreeSet<String>) -> Vec<PolicyId> {
        let affected: Vec<PolicyId> = self
            .cached_policy_ids()
            .into_iter()
            .filter(|id| blocked.contains(id.namespace()))
            .collect();
        for id in &affected {
            self.invalidate(id).await;
        }
        if !affected.is_empty() {
            info!(count = affected.len(), "invalidated policies of blocked namespaces");
        }
        affected
    }

    /// Drop everything, including the import index.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
        self.import_index.imported_by.clear();
    }

    pub fn contains(&self, policy_id: &PolicyId) -> bool {
        self.cache.contains(policy_id)
    }

    pub fn import_index(&self) -> &ImportIndex {
        &self.import_index
    }

    pub fn stats(&self) -> PolicyCacheStats {
        self.cache.stats()
    }

    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

/// Keyed by the policy's [`EntityId`], for use as a retriever enforcer cache
#[async_trait]
impl EntryCache<EntityId, PolicyEnforcer> for PolicyEnforcerCache {
    async fn get(&self, key: &EntityId) -> Result<Entry<PolicyEnforcer>> {
        let policy_id = PolicyId::try_from(key)?;
        PolicyEnforcerCache::get(self, &policy_id).await
    }

    async fn invalidate(&self, key: &EntityId) -> bool {
        match PolicyId::try_from(key) {
            Ok(policy_id) => PolicyEnforcerCache::invalidate(self, &policy_id).await,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_index_records_importers() {
        let index = ImportIndex::default();
        let base = PolicyId::parse("ns:base").unwrap();
        let a = Policy::new(PolicyId::parse("ns:a").unwrap(), 1).with_import(base.clone());
        let b = Policy::new(PolicyId::parse("other:b").unwrap(), 1).with_import(base.clone());
        index.record(&a);
        index.record(&b);
        index.record(&a);

        let importers = index.importers(&base);
        assert_eq!(importers.len(), 2);
        assert!(importers.contains(&a.id));
        assert_eq!(index.len(), 1);

        assert_eq!(index.take_importers(&base).map(|s| s.len()), Some(2));
        assert!(index.is_empty());
    }
}
