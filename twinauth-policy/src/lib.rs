//! Policy enforcer caching
//!
//! Loading and caching of compiled policy enforcers, and the retrieval chain
//! enforcement providers use to find the enforcer governing an entity.
//!
//! ## Components
//!
//! - [`LoadingCache`]: moka-backed cache of [`Entry`](twinauth_core::Entry)
//!   values with single-flight loading
//! - [`PolicyCacheLoader`], [`PolicyEnforcerLoader`], [`EntityIdLoader`]:
//!   loaders that ask the policy and thing stores through ask-with-retry
//! - [`PolicyEnforcerCache`]: enforcer cache with the reverse import index and
//!   transitive invalidation
//! - [`PolicyEnforcerProvider`]: caching and uncached providers, selected by
//!   [`PolicyEnforcerProviderKind`]; both consume [`PolicyCacheEvent`]s
//! - [`EnforcerRetriever`]: id cache -> per-type enforcer cache chain

mod cache;
mod enforcer_cache;
mod events;
mod loader;
mod provider;
mod retriever;

pub use cache::{CacheConfig, CacheStats, EntryCache, EntryLoader, LoadingCache};
pub use enforcer_cache::{ImportIndex, PolicyCacheStats, PolicyEnforcerCache};
pub use events::{policy_cache_events, PolicyCacheEvent, PolicyCacheEventSender};
pub use loader::{
    EntityIdLoader, PolicyCacheLoader, PolicyEnforcerLoader, RetrievePolicy, RetrieveThingPolicyId,
    ThingPolicyReference,
};
pub use provider::{
    build_policy_enforcer_provider, CachingPolicyEnforcerProvider, PolicyEnforcerProvider,
    PolicyEnforcerProviderConfig, PolicyEnforcerProviderKind, ProviderEnforcerCache,
    UncachedPolicyEnforcerProvider,
};
pub use retriever::EnforcerRetriever;
