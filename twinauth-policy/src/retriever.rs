//! Two-level enforcer retrieval
//!
//! Resolving the enforcer for an entity takes two lookups: the id cache says
//! which entity's enforcer governs it (a thing points at a policy), and the
//! enforcer cache for that entity's type yields the compiled enforcer. Either
//! lookup may find a confirmed absence; the handler always decides what that
//! means, nothing here turns a miss into an error.

use crate::cache::EntryCache;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use twinauth_core::{EnforcementError, EntityId, EntityType, Entry, Result};

/// Id cache followed by a per-entity-type enforcer cache
pub struct EnforcerRetriever<E> {
    id_cache: Arc<dyn EntryCache<EntityId, EntityId>>,
    enforcer_caches: HashMap<EntityType, Arc<dyn EntryCache<EntityId, E>>>,
}

impl<E> fmt::Debug for EnforcerRetriever<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnforcerRetriever")
            .field("enforcer_types", &self.enforcer_caches.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<E: Send + 'static> EnforcerRetriever<E> {
    pub fn new(id_cache: Arc<dyn EntryCache<EntityId, EntityId>>) -> Self {
        Self {
            id_cache,
            enforcer_caches: HashMap::new(),
        }
    }

    /// Register the enforcer cache serving keys of `entity_type`.
    pub fn with_enforcer_cache(
        mut self,
        entity_type: EntityType,
        cache: Arc<dyn EntryCache<EntityId, E>>,
    ) -> Self {
        self.enforcer_caches.insert(entity_type, cache);
        self
    }

    /// Resolve the enforcer key for `entity_key`, then its enforcer.
    ///
    /// When the id cache holds a confirmed absence the handler gets
    /// `(nonexistent, nonexistent)` and no enforcer cache is consulted.
    pub async fn retrieve<T, F>(&self, entity_key: &EntityId, handler: F) -> Result<T>
    where
        F: FnOnce(Entry<EntityId>, Entry<E>) -> T + Send,
    {
        let id_entry = self.id_cache.get(entity_key).await?;
        let Some(enforcer_key) = id_entry.value().cloned() else {
            return Ok(handler(Entry::nonexistent(), Entry::nonexistent()));
        };
        self.retrieve_by_enforcer_key(&enforcer_key, move |enforcer_entry| {
            handler(id_entry, enforcer_entry)
        })
        .await
    }

    /// Look up the enforcer for an already resolved key.
    pub async fn retrieve_by_enforcer_key<T, F>(&self, enforcer_key: &EntityId, handler: F) -> Result<T>
    where
        F: FnOnce(Entry<E>) -> T + Send,
    {
        let cache = self
            .enforcer_caches
            .get(enforcer_key.entity_type())
            .ok_or_else(|| {
                EnforcementError::internal(format!(
                    "no enforcer cache registered for entity type '{}'",
                    enforcer_key.entity_type()
                ))
            })?;
        let entry = cache.get(enforcer_key).await?;
        Ok(handler(entry))
    }

    /// Drop the cached id resolution for `entity_key`.
    pub async fn invalidate_id(&self, entity_key: &EntityId) -> bool {
        self.id_cache.invalidate(entity_key).await
    }

    /// Drop the cached enforcer for an enforcer key.
    pub async fn invalidate_enforcer(&self, enforcer_key: &EntityId) -> bool {
        match self.enforcer_caches.get(enforcer_key.entity_type()) {
            Some(cache) => cache.invalidate(enforcer_key).await,
            None => false,
        }
    }
}
