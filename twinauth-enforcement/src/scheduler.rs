//! Per-entity ordered task scheduling
//!
//! Every entity with tasks in flight has two barriers:
//!
//! - `before_start`: later tasks may not start until it resolves
//! - `before_complete`: later tasks may not dispatch until it resolves
//!
//! A task that changes authorization replaces both barriers with its own
//! completion, so everything after it waits for its dispatch before even
//! starting. Any other task only replaces `before_complete`: later tasks may
//! start right away but dispatch in submission order.
//!
//! The barrier map is owned by a single coordinator task. Submissions and
//! completions arrive over channels and are applied one at a time, so each
//! read-modify-write of an entity's barriers is indivisible. Task bodies run
//! on spawned tasks and never block the coordinator.

use crate::task::{EnforcementTask, Fallback};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace};
use twinauth_core::{EnforcementError, EntityId, Result};

type Barrier = Shared<BoxFuture<'static, ()>>;

fn resolved() -> Barrier {
    futures::future::ready(()).boxed().shared()
}

/// Scheduling state of one entity
struct Futures {
    before_start: Barrier,
    before_complete: Barrier,
    reference_count: usize,
}

impl Futures {
    fn initial() -> Self {
        Self {
            before_start: resolved(),
            before_complete: resolved(),
            reference_count: 0,
        }
    }
}

/// Snapshot of scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub completed: u64,
    pub panicked: u64,
    /// Entities with at least one task in flight
    pub active_entities: usize,
}

impl SchedulerStats {
    /// Tasks submitted but not yet completed
    pub fn in_flight(&self) -> u64 {
        self.scheduled.saturating_sub(self.completed)
    }
}

#[derive(Default)]
struct AtomicSchedulerStats {
    scheduled: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    active_entities: AtomicUsize,
}

impl AtomicSchedulerStats {
    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            active_entities: self.active_entities.load(Ordering::Relaxed),
        }
    }
}

/// Ordering-guarantee engine for enforcement tasks
pub struct EnforcementScheduler {
    tasks: Mutex<Option<mpsc::UnboundedSender<EnforcementTask>>>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<AtomicSchedulerStats>,
}

impl std::fmt::Debug for EnforcementScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnforcementScheduler")
            .field("stats", &self.stats())
            .finish()
    }
}

impl EnforcementScheduler {
    /// Start the coordinator on the current runtime.
    pub fn spawn() -> Self {
        let (tasks, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(AtomicSchedulerStats::default());
        let coordinator = tokio::spawn(coordinate(rx, Arc::clone(&stats)));
        Self {
            tasks: Mutex::new(Some(tasks)),
            coordinator: Mutex::new(Some(coordinator)),
            stats,
        }
    }

    /// Submit a task. Fails only once the scheduler is shut down.
    pub fn schedule(&self, task: EnforcementTask) -> Result<()> {
        let guard = self.tasks.lock();
        let Some(tasks) = guard.as_ref() else {
            return Err(shut_down());
        };
        tasks.send(task).map_err(|_| shut_down())?;
        self.stats.scheduled.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("scheduled_enforcement_tasks").increment(1);
        Ok(())
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats.snapshot()
    }

    pub fn is_shut_down(&self) -> bool {
        self.tasks.lock().is_none()
    }

    /// Stop accepting tasks and wait until every scheduled task has completed.
    pub async fn shutdown(&self) {
        drop(self.tasks.lock().take());
        let coordinator = self.coordinator.lock().take();
        if let Some(coordinator) = coordinator {
            if let Err(e) = coordinator.await {
                error!(error = %e, "enforcement scheduler coordinator failed");
            }
        }
    }
}

impl Drop for EnforcementScheduler {
    fn drop(&mut self) {
        if let Some(coordinator) = self.coordinator.lock().take() {
            coordinator.abort();
        }
    }
}

fn shut_down() -> EnforcementError {
    EnforcementError::Unavailable("enforcement scheduler is shut down".to_string())
}

async fn coordinate(
    mut tasks: mpsc::UnboundedReceiver<EnforcementTask>,
    stats: Arc<AtomicSchedulerStats>,
) {
    let (completions_tx, mut completions) = mpsc::unbounded_channel::<EntityId>();
    let mut entities: HashMap<EntityId, Futures> = HashMap::new();
    let mut accepting = true;

    loop {
        if !accepting && entities.is_empty() {
            break;
        }
        tokio::select! {
            biased;
            Some(entity_id) = completions.recv() => {
                complete(&mut entities, &entity_id, &stats);
            }
            task = tasks.recv(), if accepting => match task {
                Some(task) => {
                    let entity_id = task.entity_id().clone();
                    let state = entities.entry(entity_id).or_insert_with(Futures::initial);
                    enqueue(state, task, completions_tx.clone(), Arc::clone(&stats));
                }
                None => {
                    debug!(in_flight = entities.len(), "scheduler closed, draining");
                    accepting = false;
                }
            },
        }
        stats.active_entities.store(entities.len(), Ordering::Relaxed);
    }
    info!("enforcement scheduler stopped");
}

fn enqueue(
    state: &mut Futures,
    task: EnforcementTask,
    completions: mpsc::UnboundedSender<EntityId>,
    stats: Arc<AtomicSchedulerStats>,
) {
    let (entity_id, changes_authorization, start, fallback) = task.into_parts();
    let before_start = state.before_start.clone();
    let before_complete = state.before_complete.clone();

    let run_entity = entity_id.clone();
    let task_future: Barrier = async move {
        before_start.await;
        if changes_authorization {
            before_complete.clone().await;
        }
        trace!(entity_id = %run_entity, changes_authorization, "enforcement task starting");

        let started = AssertUnwindSafe(async move { start().await }).catch_unwind();
        let (_, started) = futures::join!(before_complete, started);
        let outcome = match started {
            Ok(result) => AssertUnwindSafe(result.dispatch())
                .catch_unwind()
                .await
                .map_err(|panic| ("dispatch", panic)),
            Err(panic) => Err(("start", panic)),
        };
        if let Err((stage, panic)) = outcome {
            let message = panic_message(panic.as_ref());
            error!(entity_id = %run_entity, stage, panic = %message, "enforcement task panicked");
            stats.panicked.fetch_add(1, Ordering::Relaxed);
            if stage == "start" {
                report(fallback.as_ref(), &run_entity, message);
            }
        }
    }
    .boxed()
    .shared();

    if changes_authorization {
        state.before_start = task_future.clone();
    }
    state.before_complete = task_future.clone();
    state.reference_count += 1;

    tokio::spawn(async move {
        task_future.await;
        let _ = completions.send(entity_id);
    });
}

fn complete(
    entities: &mut HashMap<EntityId, Futures>,
    entity_id: &EntityId,
    stats: &AtomicSchedulerStats,
) {
    stats.completed.fetch_add(1, Ordering::Relaxed);
    metrics::counter!("completed_enforcement_tasks").increment(1);

    let remove = match entities.get_mut(entity_id) {
        Some(state) => {
            state.reference_count = state.reference_count.saturating_sub(1);
            state.reference_count == 0
        }
        None => false,
    };
    if remove {
        entities.remove(entity_id);
        trace!(entity_id = %entity_id, "entity idle, scheduling state removed");
    }
}

fn report(fallback: Option<&Fallback>, entity_id: &EntityId, message: String) {
    match fallback {
        Some(fallback) => fallback.report(entity_id, message),
        None => debug!(entity_id = %entity_id, "no fallback receiver for panicked task"),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
