//! EnforcerRetriever over a thing -> policy id cache and the policy enforcer cache

mod support;

use std::collections::HashMap;
use std::sync::Arc;
use support::{enforcer_cache, pid, policy, MemoryPolicyStore};
use twinauth_ask::{AskWithRetryConfig, MailboxTarget, Reply, RetryStrategy};
use twinauth_core::{EntityId, EntityType, PolicyEnforcer};
use twinauth_policy::{
    CacheConfig, EnforcerRetriever, EntityIdLoader, LoadingCache, PolicyEnforcerCache,
    RetrieveThingPolicyId, ThingPolicyReference,
};

/// Thing store served through a mailbox: thing id -> policy id
fn thing_store(things: &[(&str, &str)]) -> Arc<MailboxTarget<RetrieveThingPolicyId>> {
    let things: HashMap<EntityId, ThingPolicyReference> = things
        .iter()
        .map(|(thing, policy)| {
            (
                EntityId::thing(thing).unwrap(),
                ThingPolicyReference {
                    revision: 3,
                    policy_id: pid(policy),
                },
            )
        })
        .collect();
    let (target, mut mailbox) = MailboxTarget::channel("things", 16);
    tokio::spawn(async move {
        while let Some((request, reply)) = mailbox.recv().await {
            let request: RetrieveThingPolicyId = request;
            let _ = reply.send(Reply::response(things.get(&request.thing_id).cloned()));
        }
    });
    Arc::new(target)
}

fn retriever(
    things: Arc<MailboxTarget<RetrieveThingPolicyId>>,
    policies: Arc<PolicyEnforcerCache>,
) -> (EnforcerRetriever<PolicyEnforcer>, Arc<LoadingCache<EntityId, EntityId>>) {
    let config = AskWithRetryConfig::default().with_strategy(RetryStrategy::Off, 0);
    let id_cache = Arc::new(LoadingCache::new(
        "thing-policy-id",
        &CacheConfig::default(),
        Arc::new(EntityIdLoader::new(things, config)),
    ));
    let retriever: EnforcerRetriever<PolicyEnforcer> = EnforcerRetriever::new(id_cache.clone())
        .with_enforcer_cache(EntityType::policy(), policies);
    (retriever, id_cache)
}

#[tokio::test]
async fn unknown_thing_never_queries_enforcer_cache() {
    let store = MemoryPolicyStore::new();
    store.put(policy("ns:policy", &[], &[]));
    let policies = Arc::new(enforcer_cache(&store));
    let (retriever, _) = retriever(thing_store(&[]), policies.clone());

    let seen = retriever
        .retrieve(&EntityId::thing("ns:ghost").unwrap(), |id, enforcer| {
            (id.exists(), enforcer.exists())
        })
        .await
        .unwrap();

    assert_eq!(seen, (false, false));
    assert_eq!(store.total_loads(), 0);
    assert_eq!(policies.stats().misses + policies.stats().hits, 0);
}

#[tokio::test]
async fn known_thing_resolves_policy_enforcer() {
    let store = MemoryPolicyStore::new();
    store.put(policy("ns:policy", &[], &["issuer:alice"]));
    let policies = Arc::new(enforcer_cache(&store));
    let (retriever, id_cache) = retriever(thing_store(&[("ns:lamp", "ns:policy")]), policies);
    let lamp = EntityId::thing("ns:lamp").unwrap();

    let revision = retriever
        .retrieve(&lamp, |id, enforcer| {
            assert_eq!(id.value(), Some(&pid("ns:policy").to_entity_id()));
            enforcer.into_value().and_then(|pe| pe.policy().map(|p| p.revision))
        })
        .await
        .unwrap();
    assert_eq!(revision, Some(1));
    assert_eq!(id_cache.get_if_present(&lamp).await.and_then(|e| e.revision()), Some(3));

    // the id resolution is cached; invalidating it forces another ask
    retriever.retrieve(&lamp, |_, _| ()).await.unwrap();
    assert_eq!(id_cache.stats().loads, 1);
    assert!(retriever.invalidate_id(&lamp).await);
    retriever.retrieve(&lamp, |_, _| ()).await.unwrap();
    assert_eq!(id_cache.stats().loads, 2);
}

#[tokio::test]
async fn thing_pointing_at_missing_policy() {
    let store = MemoryPolicyStore::new();
    let policies = Arc::new(enforcer_cache(&store));
    let (retriever, _) = retriever(thing_store(&[("ns:lamp", "ns:deleted")]), policies);

    let (id_exists, enforcer_exists) = retriever
        .retrieve(&EntityId::thing("ns:lamp").unwrap(), |id, enforcer| {
            (id.exists(), enforcer.exists())
        })
        .await
        .unwrap();
    assert!(id_exists);
    assert!(!enforcer_exists);
    assert_eq!(store.load_count("ns:deleted"), 1);
}
