//! Cache loaders
//!
//! - [`PolicyCacheLoader`]: asks the policy store for a policy
//! - [`PolicyEnforcerLoader`]: loads a policy, compiles its enforcer and
//!   records its imports in the [`ImportIndex`]
//! - [`EntityIdLoader`]: asks the thing store which policy governs a thing

use crate::cache::EntryLoader;
use crate::enforcer_cache::ImportIndex;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;
use twinauth_ask::{ask_with_retry, raise_timeout, AskTarget, AskWithRetryConfig};
use twinauth_core::{
    EnforcementError, EnforcerFactory, EntityId, Entry, Policy, PolicyEnforcer, PolicyId, Result,
};

/// Policy store request; answered with `Option<Policy>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievePolicy {
    pub policy_id: PolicyId,
}

/// Thing store request; answered with `Option<ThingPolicyReference>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrieveThingPolicyId {
    pub thing_id: EntityId,
}

/// Policy id a thing points at, as of the thing's revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThingPolicyReference {
    pub revision: i64,
    pub policy_id: PolicyId,
}

/// Map a store answer to an entry. A not-accessible error from the store is
/// a confirmed absence, not a failure.
fn into_entry<T, V>(
    reply: Result<Option<Option<T>>>,
    what: &str,
    to_entry: impl FnOnce(T) -> Entry<V>,
) -> Result<Entry<V>> {
    match reply {
        Ok(Some(Some(value))) => Ok(to_entry(value)),
        Ok(Some(None)) | Err(EnforcementError::NotAccessible { .. }) => Ok(Entry::nonexistent()),
        // raise_timeout never drops
        Ok(None) => Err(EnforcementError::timeout(format!("{what} request dropped"))),
        Err(e) => Err(e),
    }
}

/// Loads policies from the policy store through ask-with-retry
pub struct PolicyCacheLoader {
    store: Arc<dyn AskTarget<RetrievePolicy>>,
    config: AskWithRetryConfig,
}

impl PolicyCacheLoader {
    pub fn new(store: Arc<dyn AskTarget<RetrievePolicy>>, config: AskWithRetryConfig) -> Self {
        Self { store, config }
    }
}

#[async_trait]
impl EntryLoader<PolicyId, Policy> for PolicyCacheLoader {
    async fn load(&self, policy_id: &PolicyId) -> Result<Entry<Policy>> {
        let request = RetrievePolicy {
            policy_id: policy_id.clone(),
        };
        let reply =
            ask_with_retry::<_, Option<Policy>, _, _>(&*self.store, request, &self.config, raise_timeout)
                .await;
        into_entry(reply, "policy", |policy| Entry::of(policy.revision, policy))
    }
}

/// Loads policies and compiles them into [`PolicyEnforcer`]s
///
/// With an executor handle, every load runs as a task on that runtime so a
/// slow store never occupies the caller's worker threads.
pub struct PolicyEnforcerLoader {
    policies: Arc<dyn EntryLoader<PolicyId, Policy>>,
    factory: Arc<dyn EnforcerFactory>,
    import_index: ImportIndex,
    executor: Option<Handle>,
}

impl PolicyEnforcerLoader {
    pub fn new(
        policies: Arc<dyn EntryLoader<PolicyId, Policy>>,
        factory: Arc<dyn EnforcerFactory>,
    ) -> Self {
        Self {
            policies,
            factory,
            import_index: ImportIndex::default(),
            executor: None,
        }
    }

    /// Run loads on a dedicated runtime.
    pub fn with_executor(mut self, executor: Handle) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn import_index(&self) -> &ImportIndex {
        &self.import_index
    }

    async fn load_and_compile(
        policies: Arc<dyn EntryLoader<PolicyId, Policy>>,
        factory: Arc<dyn EnforcerFactory>,
        import_index: ImportIndex,
        policy_id: PolicyId,
    ) -> Result<Entry<PolicyEnforcer>> {
        let entry = policies.load(&policy_id).await?;
        let revision = entry.revision();
        let Some(policy) = entry.into_value() else {
            debug!(policy_id = %policy_id, "policy does not exist");
            return Ok(revision.map_or_else(Entry::nonexistent, Entry::nonexistent_at));
        };

        let revision = policy.revision;
        let policy_enforcer = PolicyEnforcer::of(policy, factory.as_ref())?;
        if let Some(policy) = policy_enforcer.policy() {
            import_index.record(policy);
        }
        Ok(Entry::of(revision, policy_enforcer))
    }
}

#[async_trait]
impl EntryLoader<PolicyId, PolicyEnforcer> for PolicyEnforcerLoader {
    async fn load(&self, policy_id: &PolicyId) -> Result<Entry<PolicyEnforcer>> {
        metrics::counter!("policy_enforcer_cache_loads").increment(1);
        let work = Self::load_and_compile(
            Arc::clone(&self.policies),
            Arc::clone(&self.factory),
            self.import_index.clone(),
            policy_id.clone(),
        );
        match &self.executor {
            Some(executor) => executor.spawn(work).await.map_err(|e| {
                EnforcementError::internal(format!("policy enforcer load for {policy_id} failed: {e}"))
            })?,
            None => work.await,
        }
    }
}

/// Resolves the policy governing a thing, as the policy's [`EntityId`]
pub struct EntityIdLoader {
    things: Arc<dyn AskTarget<RetrieveThingPolicyId>>,
    config: AskWithRetryConfig,
}

impl EntityIdLoader {
    pub fn new(
        things: Arc<dyn AskTarget<RetrieveThingPolicyId>>,
        config: AskWithRetryConfig,
    ) -> Self {
        Self { things, config }
    }
}

#[async_trait]
impl EntryLoader<EntityId, EntityId> for EntityIdLoader {
    async fn load(&self, thing_id: &EntityId) -> Result<Entry<EntityId>> {
        let request = RetrieveThingPolicyId {
            thing_id: thing_id.clone(),
        };
        let reply = ask_with_retry::<_, Option<ThingPolicyReference>, _, _>(
            &*self.things,
            request,
            &self.config,
            raise_timeout,
        )
        .await;
        into_entry(reply, "thing policy id", |reference| {
            Entry::of(reference.revision, reference.policy_id.to_entity_id())
        })
    }
}
