//! Generic async loading cache over [`Entry`] values
//!
//! [`LoadingCache`] wraps a `moka::future::Cache` and an [`EntryLoader`]:
//! - concurrent misses for the same key share one load (`try_get_with`)
//! - load errors are returned to every waiter and are not cached
//! - `Entry::nonexistent` results are cached like any other value, so a
//!   confirmed absence is not re-fetched until invalidated or expired
//! - every entry is stamped with its key's invalidation generation at load
//!   start; a load overtaken by [`LoadingCache::invalidate`] is discarded and
//!   retried, so an invalidation also covers loads already in flight

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;
use twinauth_core::{EnforcementError, Entry, Result};

/// Loads the entry for a key from its source of truth
#[async_trait]
pub trait EntryLoader<K, V>: Send + Sync {
    async fn load(&self, key: &K) -> Result<Entry<V>>;
}

/// Read side of a cache of entries
#[async_trait]
pub trait EntryCache<K, V>: Send + Sync {
    /// Cached entry, loading it on a miss
    async fn get(&self, key: &K) -> Result<Entry<V>>;

    /// Drop the cached entry; true if one was cached.
    async fn invalidate(&self, key: &K) -> bool;
}

/// `[policy-cache]` configuration section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CacheConfig {
    pub maximum_size: u64,
    /// Entries expire this long after being loaded
    pub expire_after_write_ms: Option<u64>,
    /// Entries expire this long after their last read
    pub expire_after_access_ms: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            maximum_size: 20_000,
            expire_after_write_ms: None,
            expire_after_access_ms: None,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.maximum_size == 0 {
            return Err(EnforcementError::config(
                "policy-cache.maximum-size must be greater than 0",
            ));
        }
        if self.expire_after_write_ms == Some(0) || self.expire_after_access_ms == Some(0) {
            return Err(EnforcementError::config(
                "policy-cache expiry durations must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Point-in-time cache statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Loader invocations; lower than `misses` when concurrent misses coalesce
    pub loads: u64,
    pub load_failures: u64,
    pub invalidations: u64,
    /// Loads discarded because the key was invalidated while they ran
    pub stale_loads: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct AtomicCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    invalidations: AtomicU64,
    stale_loads: AtomicU64,
}

impl AtomicCacheStats {
    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Relaxed),
            misses: self.misses.load(Relaxed),
            loads: self.loads.load(Relaxed),
            load_failures: self.load_failures.load(Relaxed),
            invalidations: self.invalidations.load(Relaxed),
            stale_loads: self.stale_loads.load(Relaxed),
        }
    }

    fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Relaxed);
    }
}

/// Reloads attempted after a load was overtaken by an invalidation
const MAX_STALE_RELOADS: u32 = 3;

/// Invalidation generation of a key: (cache-wide epoch, per-key generation)
type Stamp = (u64, u64);

/// Async cache of `Entry<V>` that loads misses through an [`EntryLoader`]
pub struct LoadingCache<K, V> {
    name: &'static str,
    cache: moka::future::Cache<K, (Stamp, Entry<V>)>,
    loader: Arc<dyn EntryLoader<K, V>>,
    stats: Arc<AtomicCacheStats>,
    /// Bumped by `invalidate` before the entry is removed
    generations: DashMap<K, u64>,
    /// Bumped by `invalidate_all`
    epoch: AtomicU64,
}

impl<K, V> fmt::Debug for LoadingCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingCache")
            .field("name", &self.name)
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl<K, V> LoadingCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + fmt::Display + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        name: &'static str,
        config: &CacheConfig,
        loader: Arc<dyn EntryLoader<K, V>>,
    ) -> Self {
        let mut builder = moka::future::Cache::builder()
            .name(name)
            .max_capacity(config.maximum_size);
        if let Some(ms) = config.expire_after_write_ms {
            builder = builder.time_to_live(Duration::from_millis(ms));
        }
        if let Some(ms) = config.expire_after_access_ms {
            builder = builder.time_to_idle(Duration::from_millis(ms));
        }

        Self {
            name,
            cache: builder.build(),
            loader,
            stats: Arc::new(AtomicCacheStats::default()),
            generations: DashMap::new(),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn stamp(&self, key: &K) -> Stamp {
        let generation = self.generations.get(key).map_or(0, |g| *g);
        (self.epoch.load(Ordering::Acquire), generation)
    }

    /// Cached entry, loading it on a miss.
    ///
    /// An entry whose load started before the latest invalidation of its key
    /// is never returned from the cache; it is dropped and loaded again.
    pub async fn get(&self, key: &K) -> Result<Entry<V>> {
        let mut reloads = 0;
        loop {
            let stamp = self.stamp(key);
            match self.cache.get(key).await {
                Some((cached, entry)) if cached == stamp => {
                    self.stats.hits.fetch_add(1, Relaxed);
                    return Ok(entry);
                }
                Some((cached, _)) => self.discard(key, cached).await,
                None => {}
            }
            if reloads == 0 {
                self.stats.misses.fetch_add(1, Relaxed);
            }

            let (loaded, entry) = self
                .cache
                .try_get_with(key.clone(), self.load(key, stamp))
                .await
                .map_err(|e: Arc<EnforcementError>| (*e).clone())?;
            if loaded == self.stamp(key) {
                return Ok(entry);
            }

            self.stats.stale_loads.fetch_add(1, Relaxed);
            self.discard(key, loaded).await;
            reloads += 1;
            if reloads > MAX_STALE_RELOADS {
                // invalidated on every attempt; answer with the latest load uncached
                tracing::warn!(cache = self.name, key = %key, reloads, "cache key keeps being invalidated");
                return Ok(entry);
            }
            tracing::debug!(cache = self.name, key = %key, "invalidated during load, reloading");
        }
    }

    fn load<'a>(
        &self,
        key: &'a K,
        stamp: Stamp,
    ) -> impl std::future::Future<Output = Result<(Stamp, Entry<V>)>> + 'a {
        let loader = Arc::clone(&self.loader);
        let stats = Arc::clone(&self.stats);
        let name = self.name;
        async move {
            stats.loads.fetch_add(1, Relaxed);
            let result = loader.load(key).await;
            match &result {
                Ok(entry) => {
                    tracing::debug!(cache = name, key = %key, exists = entry.exists(), "loaded cache entry");
                }
                Err(e) => {
                    stats.load_failures.fetch_add(1, Relaxed);
                    tracing::warn!(cache = name, key = %key, error = %e, "cache load failed");
                }
            }
            result.map(|entry| (stamp, entry))
        }
    }

    /// Remove the cached entry for `key` if it still carries `stale`.
    async fn discard(&self, key: &K, stale: Stamp) {
        if let Some((cached, _)) = self.cache.get(key).await {
            if cached == stale {
                self.cache.remove(key).await;
            }
        }
    }

    /// Cached entry without loading
    pub async fn get_if_present(&self, key: &K) -> Option<Entry<V>> {
        let stamp = self.stamp(key);
        match self.cache.get(key).await {
            Some((cached, entry)) if cached == stamp => Some(entry),
            _ => None,
        }
    }

    /// Drop the cached entry; true if one was cached.
    ///
    /// Loads of `key` already in flight are superseded: their result is not
    /// served by later lookups.
    pub async fn invalidate(&self, key: &K) -> bool {
        *self.generations.entry(key.clone()).or_insert(0) += 1;
        let removed = self.cache.remove(key).await.is_some();
        if removed {
            self.stats.record_invalidation();
        }
        removed
    }

    pub fn invalidate_all(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        self.cache.invalidate_all();
    }

    pub fn contains(&self, key: &K) -> bool {
        self.cache.contains_key(key)
    }

    /// Keys currently cached
    pub fn keys(&self) -> Vec<K> {
        self.cache.iter().map(|(k, _)| K::clone(&k)).collect()
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Apply pending evictions and expirations now
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

#[async_trait]
impl<K, V> EntryCache<K, V> for LoadingCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + fmt::Display + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &K) -> Result<Entry<V>> {
        LoadingCache::get(self, key).await
    }

    async fn invalidate(&self, key: &K) -> bool {
        LoadingCache::invalidate(self, key).await
    }
}
