//! Policy enforcer providers
//!
//! A [`PolicyEnforcerProvider`] resolves a [`PolicyId`] to its compiled
//! [`PolicyEnforcer`]. Two implementations exist, selected once at startup by
//! [`PolicyEnforcerProviderKind`]:
//!
//! - [`CachingPolicyEnforcerProvider`]: a coordinator task owns the
//!   [`PolicyEnforcerCache`]. Lookups and invalidation events reach it over
//!   channels and are handled one at a time (pending events first), so an
//!   invalidation is never interleaved with another cache mutation. Lookups
//!   are served by spawned tasks so a slow load never stalls the coordinator.
//! - [`UncachedPolicyEnforcerProvider`]: loads on every call.
//!
//! Both keep the shared [`BlockedNamespaces`] current from the event stream.

use crate::cache::{CacheConfig, EntryCache, EntryLoader};
use crate::enforcer_cache::{PolicyCacheStats, PolicyEnforcerCache};
use crate::events::PolicyCacheEvent;
use crate::loader::PolicyEnforcerLoader;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use twinauth_core::{
    BlockedNamespaces, EnforcementError, EntityId, Entry, PolicyEnforcer, PolicyId, Result,
};

/// Resolves policy ids to compiled enforcers
#[async_trait]
pub trait PolicyEnforcerProvider: Send + Sync + fmt::Debug {
    /// `None` id resolves to `None` without touching any cache.
    async fn get_policy_enforcer(&self, policy_id: Option<&PolicyId>)
        -> Result<Option<PolicyEnforcer>>;

    /// Drop any cached enforcer for `policy_id`; true if one was cached.
    async fn invalidate_policy_enforcer(&self, _policy_id: &PolicyId) -> Result<bool> {
        Ok(false)
    }
}

/// Exposes a provider as the retriever's enforcer cache for policy keys
#[derive(Debug, Clone)]
pub struct ProviderEnforcerCache {
    provider: Arc<dyn PolicyEnforcerProvider>,
}

impl ProviderEnforcerCache {
    pub fn new(provider: Arc<dyn PolicyEnforcerProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl EntryCache<EntityId, PolicyEnforcer> for ProviderEnforcerCache {
    async fn get(&self, key: &EntityId) -> Result<Entry<PolicyEnforcer>> {
        let policy_id = PolicyId::try_from(key)?;
        let found = self.provider.get_policy_enforcer(Some(&policy_id)).await?;
        Ok(match found {
            Some(pe) => match pe.policy().map(|p| p.revision) {
                Some(revision) => Entry::of(revision, pe),
                None => Entry::permanent(pe),
            },
            None => Entry::nonexistent(),
        })
    }

    async fn invalidate(&self, key: &EntityId) -> bool {
        let Ok(policy_id) = PolicyId::try_from(key) else {
            return false;
        };
        match self.provider.invalidate_policy_enforcer(&policy_id).await {
            Ok(invalidated) => invalidated,
            Err(e) => {
                warn!(policy_id = %policy_id, error = %e, "policy enforcer invalidation failed");
                false
            }
        }
    }
}

/// Closed set of provider implementations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyEnforcerProviderKind {
    #[default]
    Caching,
    Uncached,
}

/// `[policy-enforcer-provider]` configuration section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PolicyEnforcerProviderConfig {
    pub kind: PolicyEnforcerProviderKind,
}

/// Build the configured provider.
///
/// Spawns the provider's background task, so this must run inside a tokio runtime.
pub fn build_policy_enforcer_provider(
    kind: PolicyEnforcerProviderKind,
    cache_config: &CacheConfig,
    loader: PolicyEnforcerLoader,
    blocked: BlockedNamespaces,
    events: broadcast::Receiver<PolicyCacheEvent>,
) -> Result<Arc<dyn PolicyEnforcerProvider>> {
    let provider: Arc<dyn PolicyEnforcerProvider> = match kind {
        PolicyEnforcerProviderKind::Caching => {
            cache_config.validate()?;
            let cache = PolicyEnforcerCache::new(cache_config, loader);
            Arc::new(CachingPolicyEnforcerProvider::spawn(cache, blocked, events))
        }
        PolicyEnforcerProviderKind::Uncached => {
            Arc::new(UncachedPolicyEnforcerProvider::spawn(Arc::new(loader), blocked, events))
        }
    };
    info!(?kind, "policy enforcer provider started");
    Ok(provider)
}

enum Command {
    Get {
        policy_id: PolicyId,
        reply: oneshot::Sender<Result<Option<PolicyEnforcer>>>,
    },
    Invalidate {
        policy_id: PolicyId,
        reply: oneshot::Sender<bool>,
    },
}

/// Provider backed by a [`PolicyEnforcerCache`] owned by a coordinator task
pub struct CachingPolicyEnforcerProvider {
    commands: mpsc::UnboundedSender<Command>,
    cache: Arc<PolicyEnforcerCache>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for CachingPolicyEnforcerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingPolicyEnforcerProvider")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl CachingPolicyEnforcerProvider {
    pub fn spawn(
        cache: PolicyEnforcerCache,
        blocked: BlockedNamespaces,
        events: broadcast::Receiver<PolicyCacheEvent>,
    ) -> Self {
        let cache = Arc::new(cache);
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(coordinate(Arc::clone(&cache), blocked, rx, events));
        Self {
            commands,
            cache,
            task: Mutex::new(Some(task)),
        }
    }

    /// Invalidate through the coordinator, ordered with pending commands.
    pub async fn invalidate(&self, policy_id: &PolicyId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Invalidate {
            policy_id: policy_id.clone(),
            reply,
        })?;
        rx.await.map_err(|_| coordinator_gone())
    }

    pub fn cache(&self) -> &Arc<PolicyEnforcerCache> {
        &self.cache
    }

    pub fn stats(&self) -> PolicyCacheStats {
        self.cache.stats()
    }

    /// Stop the coordinator. Lookups fail afterwards.
    pub fn shutdown(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| coordinator_gone())
    }
}

impl Drop for CachingPolicyEnforcerProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn coordinator_gone() -> EnforcementError {
    EnforcementError::Unavailable("policy enforcer provider is shut down".to_string())
}

#[async_trait]
impl PolicyEnforcerProvider for CachingPolicyEnforcerProvider {
    async fn get_policy_enforcer(
        &self,
        policy_id: Option<&PolicyId>,
    ) -> Result<Option<PolicyEnforcer>> {
        let Some(policy_id) = policy_id else {
            return Ok(None);
        };
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get {
            policy_id: policy_id.clone(),
            reply,
        })?;
        rx.await.map_err(|_| coordinator_gone())?
    }

    async fn invalidate_policy_enforcer(&self, policy_id: &PolicyId) -> Result<bool> {
        self.invalidate(policy_id).await
    }
}

async fn coordinate(
    cache: Arc<PolicyEnforcerCache>,
    blocked: BlockedNamespaces,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut events: broadcast::Receiver<PolicyCacheEvent>,
) {
    let mut events_open = true;
    loop {
        // Invalidations take precedence over queued lookups.
        tokio::select! {
            biased;
            event = events.recv(), if events_open => match event {
                Ok(event) => apply_event(&event, &blocked, Some(&cache)).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "policy cache events lagged, invalidating all");
                    cache.invalidate_all();
                }
                Err(RecvError::Closed) => {
                    debug!("policy cache event stream closed");
                    events_open = false;
                }
            },
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Get { policy_id, reply } => {
                        let cache = Arc::clone(&cache);
                        tokio::spawn(async move {
                            let result = cache.get(&policy_id).await.map(|entry| entry.into_value());
                            let _ = reply.send(result);
                        });
                    }
                    Command::Invalidate { policy_id, reply } => {
                        let _ = reply.send(cache.invalidate(&policy_id).await);
                    }
                }
            }
        }
    }
    debug!("policy enforcer coordinator stopped");
}

async fn apply_event(
    event: &PolicyCacheEvent,
    blocked: &BlockedNamespaces,
    cache: Option<&PolicyEnforcerCache>,
) {
    match event {
        PolicyCacheEvent::PolicyChanged {
            policy_id,
            revision,
        } => {
            if let Some(cache) = cache {
                let was_cached = cache.invalidate(policy_id).await;
                debug!(policy_id = %policy_id, revision, was_cached, "policy changed");
            }
        }
        PolicyCacheEvent::NamespaceBlockSetChanged { added, removed } => {
            let now_blocked = blocked.apply_change(added, removed);
            info!(
                added = added.len(),
                removed = removed.len(),
                blocked = now_blocked.len(),
                "blocked namespaces changed"
            );
            if let Some(cache) = cache {
                cache.invalidate_namespaces(&now_blocked).await;
            }
        }
    }
}

/// Provider that loads and compiles on every lookup
pub struct UncachedPolicyEnforcerProvider {
    loader: Arc<dyn EntryLoader<PolicyId, PolicyEnforcer>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for UncachedPolicyEnforcerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UncachedPolicyEnforcerProvider")
            .finish_non_exhaustive()
    }
}

impl UncachedPolicyEnforcerProvider {
    pub fn spawn(
        loader: Arc<dyn EntryLoader<PolicyId, PolicyEnforcer>>,
        blocked: BlockedNamespaces,
        mut events: broadcast::Receiver<PolicyCacheEvent>,
    ) -> Self {
        let listener = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => apply_event(&event, &blocked, None).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "policy cache events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        Self {
            loader,
            listener: Mutex::new(Some(listener)),
        }
    }
}

impl Drop for UncachedPolicyEnforcerProvider {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
    }
}

#[async_trait]
impl PolicyEnforcerProvider for UncachedPolicyEnforcerProvider {
    async fn get_policy_enforcer(
        &self,
        policy_id: Option<&PolicyId>,
    ) -> Result<Option<PolicyEnforcer>> {
        match policy_id {
            Some(policy_id) => Ok(self.loader.load(policy_id).await?.into_value()),
            None => Ok(None),
        }
    }
}
