//! Shared test doubles for twinauth-enforcement integration tests.

// Not every test crate uses every helper.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use twinauth_ask::{AskError, AskTarget, Reply};
use twinauth_core::{
    AuthorizationContext, Enforcer, EnforcerFactory, EntityId, Permission, Policy, PolicyId,
    ResourceKey, Result, Signal, SignalCategory, SignalHeaders,
};
use twinauth_enforcement::{
    ContextualResult, EnforcementTask, OutboundMessage, ResponseReceiver,
};
use twinauth_policy::{RetrievePolicy, RetrieveThingPolicyId, ThingPolicyReference};

pub fn pid(id: &str) -> PolicyId {
    PolicyId::parse(id).unwrap()
}

pub fn thing(id: &str) -> EntityId {
    EntityId::thing(id).unwrap()
}

// =============================================================================
// Event log and receiver
// =============================================================================

/// Ordered record of what tasks did, shared between bodies and the receiver
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn position(&self, event: &str) -> usize {
        self.events
            .lock()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event '{event}' not logged"))
    }

    /// Dispatch events in the order they happened
    pub fn dispatches(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| e.strip_prefix("dispatch:").map(str::to_string))
            .collect()
    }
}

/// Logs `dispatch:<correlation-id>` and forwards every message to a channel
pub struct LogReceiver {
    log: EventLog,
    tx: mpsc::UnboundedSender<(String, OutboundMessage)>,
}

impl LogReceiver {
    pub fn new(log: EventLog) -> (Arc<Self>, mpsc::UnboundedReceiver<(String, OutboundMessage)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { log, tx }), rx)
    }
}

impl ResponseReceiver for LogReceiver {
    fn tell(&self, _entity_id: &EntityId, headers: &SignalHeaders, message: OutboundMessage) {
        self.log.push(format!("dispatch:{}", headers.correlation_id));
        let _ = self.tx.send((headers.correlation_id.clone(), message));
    }
}

/// Task logging `start:<name>`, sleeping `delay`, then answering with `name`
pub fn logged_task(
    log: &EventLog,
    receiver: &Arc<LogReceiver>,
    entity: &EntityId,
    name: &str,
    changes_authorization: bool,
    delay: Duration,
) -> EnforcementTask {
    let log = log.clone();
    let receiver: Arc<dyn ResponseReceiver> = receiver.clone();
    let entity_id = entity.clone();
    let name = name.to_string();
    EnforcementTask::new(entity.clone(), changes_authorization, move || async move {
        log.push(format!("start:{name}"));
        tokio::time::sleep(delay).await;
        let headers = SignalHeaders::default().with_correlation_id(name.clone());
        ContextualResult::new(entity_id, headers)
            .with_message(OutboundMessage::Response(json!(name)))
            .with_receiver(receiver)
    })
}

/// Receive `n` messages, returning their correlation ids in arrival order.
pub async fn receive(
    rx: &mut mpsc::UnboundedReceiver<(String, OutboundMessage)>,
    n: usize,
) -> Vec<(String, OutboundMessage)> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let next = tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("timed out waiting for a dispatched message")
            .expect("receiver channel closed");
        out.push(next);
    }
    out
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

// =============================================================================
// Stores
// =============================================================================

/// Policy entries: `{"read": [subjects], "write": [subjects]}`
pub fn policy(id: &str, readers: &[&str], writers: &[&str]) -> Policy {
    Policy::new(pid(id), 1).with_entries(json!({ "read": readers, "write": writers }))
}

#[derive(Default)]
pub struct PolicyStore {
    policies: Mutex<HashMap<PolicyId, Policy>>,
    pub asks: AtomicUsize,
}

impl PolicyStore {
    pub fn with(policies: impl IntoIterator<Item = Policy>) -> Arc<Self> {
        let store = Self::default();
        for policy in policies {
            store.put(policy);
        }
        Arc::new(store)
    }

    pub fn put(&self, policy: Policy) {
        self.policies.lock().insert(policy.id.clone(), policy);
    }
}

#[async_trait]
impl AskTarget<RetrievePolicy> for PolicyStore {
    async fn ask(&self, request: RetrievePolicy) -> std::result::Result<Reply, AskError> {
        self.asks.fetch_add(1, Ordering::SeqCst);
        let policy = self.policies.lock().get(&request.policy_id).cloned();
        Ok(Reply::response(policy))
    }

    fn name(&self) -> &str {
        "policy-store"
    }
}

/// Thing id -> governing policy id
#[derive(Default)]
pub struct ThingStore {
    things: Mutex<HashMap<EntityId, ThingPolicyReference>>,
    pub asks: AtomicUsize,
}

impl ThingStore {
    pub fn with(things: &[(&str, &str)]) -> Arc<Self> {
        let store = Self::default();
        for (thing_id, policy_id) in things {
            store.set(thing(thing_id), pid(policy_id));
        }
        Arc::new(store)
    }

    pub fn set(&self, thing_id: EntityId, policy_id: PolicyId) {
        let mut things = self.things.lock();
        let revision = things.get(&thing_id).map_or(1, |r| r.revision + 1);
        things.insert(thing_id, ThingPolicyReference { revision, policy_id });
    }

    pub fn remove(&self, thing_id: &EntityId) {
        self.things.lock().remove(thing_id);
    }
}

#[async_trait]
impl AskTarget<RetrieveThingPolicyId> for ThingStore {
    async fn ask(&self, request: RetrieveThingPolicyId) -> std::result::Result<Reply, AskError> {
        self.asks.fetch_add(1, Ordering::SeqCst);
        let reference = self.things.lock().get(&request.thing_id).cloned();
        Ok(Reply::response(reference))
    }

    fn name(&self) -> &str {
        "thing-store"
    }
}

/// Store receiving permitted signals
///
/// Applies thing creation, deletion and `/policyId` changes to the thing
/// store so authorization-changing signals have an effect.
pub struct ForwardTarget {
    things: Arc<ThingStore>,
    pub received: Mutex<Vec<Signal>>,
    pub hang: AtomicBool,
}

impl ForwardTarget {
    pub fn new(things: Arc<ThingStore>) -> Arc<Self> {
        Arc::new(Self {
            things,
            received: Mutex::new(Vec::new()),
            hang: AtomicBool::new(false),
        })
    }

    pub fn received_count(&self) -> usize {
        self.received.lock().len()
    }
}

#[async_trait]
impl AskTarget<Signal> for ForwardTarget {
    async fn ask(&self, signal: Signal) -> std::result::Result<Reply, AskError> {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.received.lock().push(signal.clone());

        let entity_id = signal.entity_id.clone();
        let policy_ref = signal.payload.get("policyId").and_then(JsonValue::as_str);
        match (signal.category, signal.resource_path.as_str(), policy_ref) {
            (SignalCategory::Create, _, Some(policy_id))
            | (SignalCategory::Modify, "/policyId", Some(policy_id)) => {
                self.things.set(entity_id.clone(), pid(policy_id));
            }
            (SignalCategory::Delete, _, _) => self.things.remove(&entity_id),
            _ => {}
        }
        Ok(Reply::response(json!({ "status": 200, "entity": entity_id.to_string() })))
    }

    fn name(&self) -> &str {
        "forward"
    }
}

// =============================================================================
// Enforcer
// =============================================================================

/// Grants READ to `read` subjects and WRITE to `write` subjects, everywhere
#[derive(Debug)]
pub struct SubjectListEnforcer {
    read: Vec<String>,
    write: Vec<String>,
}

impl Enforcer for SubjectListEnforcer {
    fn has_unrestricted_permissions(
        &self,
        _resource: &ResourceKey,
        context: &AuthorizationContext,
        permissions: &[Permission],
    ) -> bool {
        permissions.iter().all(|permission| {
            let granted = match permission {
                Permission::Read => &self.read,
                Permission::Write => &self.write,
            };
            context.subject_ids().any(|s| granted.iter().any(|g| g == s))
        })
    }
}

#[derive(Debug, Default)]
pub struct SubjectListFactory;

fn subjects(entries: &JsonValue, key: &str) -> Vec<String> {
    match &entries[key] {
        JsonValue::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

impl EnforcerFactory for SubjectListFactory {
    fn compile(&self, policy: &Policy) -> Result<Arc<dyn Enforcer>> {
        Ok(Arc::new(SubjectListEnforcer {
            read: subjects(&policy.entries, "read"),
            write: subjects(&policy.entries, "write"),
        }))
    }
}
