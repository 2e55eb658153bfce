//! Enforcement providers
//!
//! An [`EnforcementProvider`] turns an inbound signal into an
//! [`EnforcementTask`]. [`PolicyEnforcementProvider`] covers things and
//! policies: it resolves the governing policy enforcer through an
//! [`EnforcerRetriever`], checks the permission the signal needs and forwards
//! permitted signals to their store as a deferred ask.

use crate::contextual::{AskFuture, ContextualResult, OutboundMessage, ResponseReceiver};
use crate::creation::{CreationContext, CreationRestrictionEnforcer};
use crate::task::EnforcementTask;
use futures::FutureExt;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};
use twinauth_ask::{ask_with_retry, raise_timeout, AskTarget, AskWithRetryConfig, TimeoutOutcome};
use twinauth_core::{
    EnforcementError, Entry, PolicyEnforcer, ResourceKey, Result, Signal, SignalCategory,
};
use twinauth_policy::EnforcerRetriever;

/// Header that, when `false`, lets a forwarded signal be dropped on timeout
pub const RESPONSE_REQUIRED_HEADER: &str = "response-required";

/// Builds enforcement tasks for the signals it is applicable to
pub trait EnforcementProvider: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn is_applicable(&self, signal: &Signal) -> bool;

    /// Whether completing `signal` may change who is authorized for the entity
    fn changes_authorization(&self, signal: &Signal) -> bool;

    fn create_task(&self, signal: Signal, receiver: Arc<dyn ResponseReceiver>) -> EnforcementTask;
}

struct Inner {
    retriever: EnforcerRetriever<PolicyEnforcer>,
    creation: CreationRestrictionEnforcer,
    forward: Arc<dyn AskTarget<Signal>>,
    ask_config: AskWithRetryConfig,
}

/// Policy-based enforcement for things and policies
#[derive(Clone)]
pub struct PolicyEnforcementProvider {
    inner: Arc<Inner>,
}

impl fmt::Debug for PolicyEnforcementProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEnforcementProvider")
            .field("retriever", &self.inner.retriever)
            .field("forward", &self.inner.forward.name())
            .finish()
    }
}

impl PolicyEnforcementProvider {
    /// `forward` receives every permitted signal and answers with the domain response.
    pub fn new(
        retriever: EnforcerRetriever<PolicyEnforcer>,
        creation: CreationRestrictionEnforcer,
        forward: Arc<dyn AskTarget<Signal>>,
        ask_config: AskWithRetryConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                retriever,
                creation,
                forward,
                ask_config,
            }),
        }
    }
}

impl EnforcementProvider for PolicyEnforcementProvider {
    fn name(&self) -> &'static str {
        "policy"
    }

    fn is_applicable(&self, signal: &Signal) -> bool {
        let entity_type = signal.entity_id.entity_type();
        entity_type.is_policy() || entity_type.as_str() == "thing"
    }

    fn changes_authorization(&self, signal: &Signal) -> bool {
        changes_authorization(signal)
    }

    fn create_task(&self, signal: Signal, receiver: Arc<dyn ResponseReceiver>) -> EnforcementTask {
        let inner = Arc::clone(&self.inner);
        let changes = changes_authorization(&signal);
        let entity_id = signal.entity_id.clone();
        let headers = signal.headers.clone();
        let result = ContextualResult::new(entity_id.clone(), headers.clone())
            .with_receiver(Arc::clone(&receiver));
        EnforcementTask::from_fallible(entity_id, changes, headers, receiver, move || async move {
            let started = Instant::now();
            let labels = Labels::of(&signal);
            match enforce(&inner, &signal).await {
                Ok(()) => {
                    let ask = forward(inner, signal, changes, labels, started);
                    Ok(result.with_ask_future(ask))
                }
                Err(error) => {
                    labels.record(false, started);
                    Err(error)
                }
            }
        })
    }
}

/// Policy changes, thing creation and deletion, and writes that replace a
/// thing or its policy reference change authorization.
fn changes_authorization(signal: &Signal) -> bool {
    if signal.entity_id.entity_type().is_policy() {
        return signal.category != SignalCategory::Query;
    }
    match signal.category {
        SignalCategory::Create | SignalCategory::Delete => true,
        SignalCategory::Modify | SignalCategory::Merge => {
            matches!(signal.resource_path.trim_end_matches('/'), "" | "/policyId")
        }
        SignalCategory::Query => false,
    }
}

/// Check the signal against the governing enforcer.
async fn enforce(inner: &Inner, signal: &Signal) -> Result<()> {
    let entity_id = &signal.entity_id;

    if signal.category == SignalCategory::Create {
        let allowed = inner.creation.can_create(&CreationContext {
            resource_type: entity_id.entity_type().as_str(),
            namespace: entity_id.namespace(),
            auth_context: signal.auth_context(),
        });
        if !allowed {
            return Err(EnforcementError::CreationRestricted {
                resource_type: entity_id.entity_type().to_string(),
                namespace: entity_id.namespace().to_string(),
            });
        }
        // the entity does not exist yet; its store validates the initial policy
        return Ok(());
    }

    let resource = ResourceKey::new(entity_id.entity_type().as_str(), signal.resource_path.as_str());
    let permission = signal.category.required_permission();
    let evaluate = |enforcer: Entry<PolicyEnforcer>| match enforcer.into_value() {
        Some(pe) => pe
            .enforcer()
            .has_unrestricted_permissions(&resource, signal.auth_context(), &[permission]),
        None => false,
    };

    let (exists, permitted) = if entity_id.entity_type().is_policy() {
        inner
            .retriever
            .retrieve_by_enforcer_key(entity_id, |enforcer| {
                (enforcer.exists(), evaluate(enforcer))
            })
            .await?
    } else {
        inner
            .retriever
            .retrieve(entity_id, |id, enforcer| (id.exists(), evaluate(enforcer)))
            .await?
    };

    if permitted {
        return Ok(());
    }
    debug!(
        entity_id = %entity_id,
        resource = %resource,
        permission = permission.as_str(),
        exists,
        "signal not permitted"
    );
    if !exists || signal.category == SignalCategory::Query {
        return Err(EnforcementError::not_accessible(entity_id));
    }
    Err(EnforcementError::denied(
        entity_id,
        format!(
            "The requester has insufficient permissions to {} '{}'",
            permission.as_str().to_lowercase(),
            resource
        ),
    ))
}

/// Deferred ask forwarding a permitted signal to its store.
fn forward(
    inner: Arc<Inner>,
    signal: Signal,
    changes_authorization: bool,
    labels: Labels,
    started: Instant,
) -> AskFuture {
    let response_required = signal.headers.get(RESPONSE_REQUIRED_HEADER) != Some("false");
    let ask_entity = signal.entity_id.clone();
    async move {
        let on_timeout = |error| {
            if response_required {
                raise_timeout(error)
            } else {
                TimeoutOutcome::Drop
            }
        };
        let reply = ask_with_retry::<Signal, serde_json::Value, _, _>(
            inner.forward.as_ref(),
            signal,
            &inner.ask_config,
            on_timeout,
        )
        .await;
        labels.record(reply.is_ok(), started);

        if changes_authorization && reply.is_ok() {
            let invalidated = if ask_entity.entity_type().is_policy() {
                inner.retriever.invalidate_enforcer(&ask_entity).await
            } else {
                inner.retriever.invalidate_id(&ask_entity).await
            };
            debug!(entity_id = %ask_entity, invalidated, "authorization changed");
        }
        if let Err(e) = &reply {
            warn!(entity_id = %ask_entity, error = %e, "forwarding enforced signal failed");
        }
        reply.map(|reply| reply.map(OutboundMessage::Response))
    }
    .boxed()
}

/// Metric labels of one enforcement
struct Labels {
    channel: &'static str,
    resource_type: String,
    category: &'static str,
}

impl Labels {
    fn of(signal: &Signal) -> Self {
        Self {
            channel: signal.headers.channel.as_str(),
            resource_type: signal.entity_id.entity_type().to_string(),
            category: signal.category.as_str(),
        }
    }

    fn record(&self, success: bool, started: Instant) {
        let outcome = if success { "success" } else { "fail" };
        metrics::histogram!(
            "enforcement_duration_seconds",
            "outcome" => outcome,
            "channel" => self.channel,
            "resource_type" => self.resource_type.clone(),
            "category" => self.category,
        )
        .record(started.elapsed().as_secs_f64());
    }
}
