//! Enforcement service
//!
//! Composition root of the enforcement core. Builds the caches, providers and
//! scheduler from an [`EnforcementConfig`] and the external collaborators in
//! [`EnforcementDeps`], and owns them until [`EnforcementService::shutdown`].

use crate::config::EnforcementConfig;
use crate::contextual::{OutboundMessage, ResponseReceiver};
use crate::creation::CreationRestrictionEnforcer;
use crate::pre_enforcement::{PreEnforcer, PreEnforcerChain};
use crate::provider::{EnforcementProvider, PolicyEnforcementProvider};
use crate::scheduler::{EnforcementScheduler, SchedulerStats};
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info};
use twinauth_ask::AskTarget;
use twinauth_core::{
    BlockedNamespaces, EnforcementError, EnforcerFactory, EntityId, EntityType, Result, Signal,
};
use twinauth_policy::{
    build_policy_enforcer_provider, policy_cache_events, EnforcerRetriever, EntityIdLoader,
    LoadingCache, PolicyCacheEventSender, PolicyCacheLoader, PolicyEnforcerLoader,
    PolicyEnforcerProvider, ProviderEnforcerCache, RetrievePolicy, RetrieveThingPolicyId,
};

/// External collaborators of the enforcement core
#[derive(Clone)]
pub struct EnforcementDeps {
    /// Answers [`RetrievePolicy`] with `Option<Policy>`
    pub policy_store: Arc<dyn AskTarget<RetrievePolicy>>,
    /// Answers [`RetrieveThingPolicyId`] with `Option<ThingPolicyReference>`
    ///
    /// [`ThingPolicyReference`]: twinauth_policy::ThingPolicyReference
    pub thing_store: Arc<dyn AskTarget<RetrieveThingPolicyId>>,
    /// Receives permitted signals and answers with a `serde_json::Value` response
    pub forward: Arc<dyn AskTarget<Signal>>,
    pub enforcer_factory: Arc<dyn EnforcerFactory>,
    /// Invalidation stream to subscribe to; a private one is created if absent
    pub events: Option<PolicyCacheEventSender>,
    /// Dedicated runtime for policy loads
    pub loader_executor: Option<Handle>,
}

impl EnforcementDeps {
    pub fn new(
        policy_store: Arc<dyn AskTarget<RetrievePolicy>>,
        thing_store: Arc<dyn AskTarget<RetrieveThingPolicyId>>,
        forward: Arc<dyn AskTarget<Signal>>,
        enforcer_factory: Arc<dyn EnforcerFactory>,
    ) -> Self {
        Self {
            policy_store,
            thing_store,
            forward,
            enforcer_factory,
            events: None,
            loader_executor: None,
        }
    }

    pub fn with_events(mut self, events: PolicyCacheEventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_loader_executor(mut self, executor: Handle) -> Self {
        self.loader_executor = Some(executor);
        self
    }
}

/// Pre-enforcement, task construction and ordered scheduling of signals
pub struct EnforcementService {
    scheduler: EnforcementScheduler,
    providers: Vec<Arc<dyn EnforcementProvider>>,
    pre_enforcers: PreEnforcerChain,
    blocked: BlockedNamespaces,
    events: PolicyCacheEventSender,
    policy_enforcer_provider: Arc<dyn PolicyEnforcerProvider>,
    thing_policy_ids: Arc<LoadingCache<EntityId, EntityId>>,
}

impl fmt::Debug for EnforcementService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnforcementService")
            .field("scheduler", &self.scheduler)
            .field("providers", &self.providers)
            .field("pre_enforcers", &self.pre_enforcers)
            .field("blocked_namespaces", &self.blocked.len())
            .finish_non_exhaustive()
    }
}

impl EnforcementService {
    /// Build every component and start the background tasks.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: &EnforcementConfig, deps: EnforcementDeps) -> Result<Self> {
        config.validate()?;

        let blocked = BlockedNamespaces::new(config.blocked_namespaces.iter().cloned());
        let events = deps
            .events
            .unwrap_or_else(|| policy_cache_events(config.event_buffer_size()));

        let policies = PolicyCacheLoader::new(deps.policy_store, config.ask_with_retry.clone());
        let mut loader = PolicyEnforcerLoader::new(Arc::new(policies), deps.enforcer_factory);
        if let Some(executor) = deps.loader_executor {
            loader = loader.with_executor(executor);
        }
        let policy_enforcer_provider = build_policy_enforcer_provider(
            config.policy_enforcer_provider.kind,
            &config.policy_cache,
            loader,
            blocked.clone(),
            events.subscribe(),
        )?;

        let thing_policy_ids = Arc::new(LoadingCache::new(
            "thing-policy-id",
            &config.policy_cache,
            Arc::new(EntityIdLoader::new(
                deps.thing_store,
                config.ask_with_retry.clone(),
            )),
        ));
        let retriever = EnforcerRetriever::new(thing_policy_ids.clone()).with_enforcer_cache(
            EntityType::policy(),
            Arc::new(ProviderEnforcerCache::new(Arc::clone(&policy_enforcer_provider))),
        );

        let policy_enforcement = PolicyEnforcementProvider::new(
            retriever,
            CreationRestrictionEnforcer::new(&config.creation_restriction)?,
            deps.forward,
            config.ask_with_retry.clone(),
        );

        info!(
            provider = ?config.policy_enforcer_provider.kind,
            blocked_namespaces = blocked.len(),
            "enforcement service started"
        );
        Ok(Self {
            scheduler: EnforcementScheduler::spawn(),
            providers: vec![Arc::new(policy_enforcement)],
            pre_enforcers: PreEnforcerChain::standard(blocked.clone()),
            blocked,
            events,
            policy_enforcer_provider,
            thing_policy_ids,
        })
    }

    /// Register a provider consulted before the built-in ones.
    pub fn with_provider(mut self, provider: Arc<dyn EnforcementProvider>) -> Self {
        self.providers.insert(0, provider);
        self
    }

    /// Append a pre-enforcement stage.
    pub fn with_pre_enforcer(mut self, stage: Arc<dyn PreEnforcer>) -> Self {
        self.pre_enforcers = self.pre_enforcers.with_stage(stage);
        self
    }

    /// Enforce `signal` and deliver the outcome to `receiver`.
    ///
    /// Exactly one message reaches `receiver` unless the forward is dropped
    /// on timeout. An `Err` means the signal was rejected before scheduling;
    /// the same error has already been delivered to `receiver`.
    pub async fn handle(&self, signal: Signal, receiver: Arc<dyn ResponseReceiver>) -> Result<()> {
        let entity_id = signal.entity_id.clone();
        let headers = signal.headers.clone();
        let reject = |error: EnforcementError| -> Result<()> {
            let error = error.with_correlation_id(&headers.correlation_id);
            receiver.tell(&entity_id, &headers, OutboundMessage::Error(error.clone()));
            Err(error)
        };

        let signal = match self.pre_enforcers.apply(signal).await {
            Ok(signal) => signal,
            Err(error) => return reject(error),
        };
        let Some(provider) = self.providers.iter().find(|p| p.is_applicable(&signal)) else {
            return reject(EnforcementError::internal(format!(
                "no enforcement provider for entity type '{}'",
                entity_id.entity_type()
            )));
        };

        debug!(
            entity_id = %entity_id,
            correlation_id = %headers.correlation_id,
            provider = provider.name(),
            category = %signal.category,
            "scheduling enforcement"
        );
        let task = provider.create_task(signal, Arc::clone(&receiver));
        // only fails once shut down, and the task is dropped with it
        if let Err(error) = self.scheduler.schedule(task) {
            return reject(error);
        }
        Ok(())
    }

    /// Publishing side of the invalidation stream the providers listen to
    pub fn events(&self) -> &PolicyCacheEventSender {
        &self.events
    }

    pub fn blocked_namespaces(&self) -> &BlockedNamespaces {
        &self.blocked
    }

    pub fn policy_enforcer_provider(&self) -> &Arc<dyn PolicyEnforcerProvider> {
        &self.policy_enforcer_provider
    }

    pub fn thing_policy_ids(&self) -> &Arc<LoadingCache<EntityId, EntityId>> {
        &self.thing_policy_ids
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Stop accepting signals and wait for in-flight tasks to finish.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        info!(stats = ?self.scheduler.stats(), "enforcement service stopped");
    }
}
