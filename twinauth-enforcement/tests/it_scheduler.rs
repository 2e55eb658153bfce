//! Per-entity ordering, cross-entity independence, cleanup and failure isolation

mod support;

use std::sync::Arc;
use std::time::Duration;
use support::{eventually, logged_task, receive, thing, EventLog, LogReceiver};
use twinauth_core::{EnforcementError, SignalHeaders};
use twinauth_enforcement::{
    ContextualResult, EnforcementScheduler, EnforcementTask, OutboundMessage, ResponseReceiver,
};

const SLOW: Duration = Duration::from_millis(200);
const FAST: Duration = Duration::from_millis(10);

#[tokio::test(start_paused = true)]
async fn authorization_barrier_orders_start_and_dispatch() {
    let scheduler = EnforcementScheduler::spawn();
    let log = EventLog::default();
    let (receiver, mut rx) = LogReceiver::new(log.clone());
    let lamp = thing("ns:lamp");

    for (name, changes, delay) in [
        ("t1", false, SLOW),
        ("t2", true, SLOW),
        ("t3", false, FAST),
        ("t4", true, FAST),
    ] {
        scheduler
            .schedule(logged_task(&log, &receiver, &lamp, name, changes, delay))
            .unwrap();
    }
    receive(&mut rx, 4).await;

    assert_eq!(log.dispatches(), ["t1", "t2", "t3", "t4"]);
    assert!(log.position("dispatch:t1") < log.position("start:t2"));
    assert!(log.position("dispatch:t2") < log.position("start:t3"));
    assert!(log.position("dispatch:t3") < log.position("start:t4"));
}

#[tokio::test(start_paused = true)]
async fn non_changing_tasks_start_together_and_dispatch_in_order() {
    let scheduler = EnforcementScheduler::spawn();
    let log = EventLog::default();
    let (receiver, mut rx) = LogReceiver::new(log.clone());
    let lamp = thing("ns:lamp");

    scheduler
        .schedule(logged_task(&log, &receiver, &lamp, "slow", false, SLOW))
        .unwrap();
    scheduler
        .schedule(logged_task(&log, &receiver, &lamp, "fast", false, FAST))
        .unwrap();
    receive(&mut rx, 2).await;

    // the fast task ran while the slow one was still busy, but waited to dispatch
    assert!(log.position("start:fast") < log.position("dispatch:slow"));
    assert_eq!(log.dispatches(), ["slow", "fast"]);
}

#[tokio::test(start_paused = true)]
async fn task_after_authorization_change_waits_to_start() {
    let scheduler = EnforcementScheduler::spawn();
    let log = EventLog::default();
    let (receiver, mut rx) = LogReceiver::new(log.clone());
    let lamp = thing("ns:lamp");

    scheduler
        .schedule(logged_task(&log, &receiver, &lamp, "policy-change", true, SLOW))
        .unwrap();
    scheduler
        .schedule(logged_task(&log, &receiver, &lamp, "read", false, FAST))
        .unwrap();
    receive(&mut rx, 2).await;

    assert!(log.position("dispatch:policy-change") < log.position("start:read"));
}

#[tokio::test(start_paused = true)]
async fn entities_never_block_each_other() {
    let scheduler = EnforcementScheduler::spawn();
    let log = EventLog::default();
    let (receiver, mut rx) = LogReceiver::new(log.clone());
    let (a, b) = (thing("ns:a"), thing("ns:b"));

    scheduler
        .schedule(logged_task(&log, &receiver, &a, "a1", true, Duration::from_secs(5)))
        .unwrap();
    scheduler
        .schedule(logged_task(&log, &receiver, &b, "b1", true, FAST))
        .unwrap();
    scheduler
        .schedule(logged_task(&log, &receiver, &a, "a2", false, FAST))
        .unwrap();
    scheduler
        .schedule(logged_task(&log, &receiver, &b, "b2", false, FAST))
        .unwrap();
    receive(&mut rx, 4).await;

    assert_eq!(log.dispatches(), ["b1", "b2", "a1", "a2"]);
    assert!(log.position("start:b1") < log.position("dispatch:a1"));
}

#[tokio::test(start_paused = true)]
async fn idle_entity_state_is_removed() {
    let scheduler = EnforcementScheduler::spawn();
    let log = EventLog::default();
    let (receiver, mut rx) = LogReceiver::new(log.clone());
    let lamp = thing("ns:lamp");

    // successes, structured failures and a panic, mixed
    for i in 0..6 {
        let task = match i % 3 {
            0 => logged_task(&log, &receiver, &lamp, &format!("ok-{i}"), i % 2 == 0, FAST),
            1 => failing_task(&receiver, &format!("err-{i}")),
            _ => panicking_task(&receiver, &format!("panic-{i}")),
        };
        scheduler.schedule(task).unwrap();
    }
    receive(&mut rx, 6).await;
    eventually(|| scheduler.stats().active_entities == 0).await;

    let stats = scheduler.stats();
    assert_eq!(stats.scheduled, 6);
    assert_eq!(stats.completed, 6);
    assert_eq!(stats.panicked, 2);
    assert_eq!(stats.in_flight(), 0);

    // the entity starts over with resolved barriers
    scheduler
        .schedule(logged_task(&log, &receiver, &lamp, "fresh", true, FAST))
        .unwrap();
    let fresh = receive(&mut rx, 1).await;
    assert_eq!(fresh[0].0, "fresh");
    eventually(|| scheduler.stats().active_entities == 0).await;
}

#[tokio::test(start_paused = true)]
async fn failing_task_does_not_block_the_next() {
    let scheduler = EnforcementScheduler::spawn();
    let log = EventLog::default();
    let (receiver, mut rx) = LogReceiver::new(log.clone());
    let lamp = thing("ns:lamp");

    scheduler.schedule(panicking_task(&receiver, "boom")).unwrap();
    scheduler.schedule(failing_task(&receiver, "fail")).unwrap();
    scheduler
        .schedule(logged_task(&log, &receiver, &lamp, "after", true, FAST))
        .unwrap();

    let messages = receive(&mut rx, 3).await;
    let ids: Vec<&str> = messages.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, ["boom", "fail", "after"]);

    match &messages[0].1 {
        OutboundMessage::Error(EnforcementError::Internal {
            correlation_id,
            cause,
            ..
        }) => {
            assert_eq!(correlation_id.as_deref(), Some("boom"));
            assert_eq!(cause.as_deref(), Some("enforcer exploded"));
        }
        other => panic!("unexpected message: {other:?}"),
    }
    assert!(matches!(
        messages[1].1,
        OutboundMessage::Error(EnforcementError::AuthorizationDenied { .. })
    ));
    assert_eq!(messages[2].1, OutboundMessage::Response(serde_json::json!("after")));
    assert_eq!(scheduler.stats().panicked, 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_in_flight_tasks() {
    let scheduler = EnforcementScheduler::spawn();
    let log = EventLog::default();
    let (receiver, _rx) = LogReceiver::new(log.clone());

    scheduler
        .schedule(logged_task(&log, &receiver, &thing("ns:a"), "a", true, SLOW))
        .unwrap();
    scheduler
        .schedule(logged_task(&log, &receiver, &thing("ns:b"), "b", false, SLOW))
        .unwrap();
    scheduler.shutdown().await;

    assert_eq!(log.dispatches().len(), 2);
    assert_eq!(scheduler.stats().completed, 2);
    assert!(scheduler
        .schedule(logged_task(&log, &receiver, &thing("ns:a"), "late", false, FAST))
        .is_err());
}

fn failing_task(receiver: &Arc<LogReceiver>, name: &str) -> EnforcementTask {
    let lamp = thing("ns:lamp");
    let headers = SignalHeaders::default().with_correlation_id(name);
    let receiver: Arc<dyn ResponseReceiver> = receiver.clone();
    EnforcementTask::from_fallible(lamp.clone(), true, headers, receiver, move || async move {
        Err::<ContextualResult, _>(EnforcementError::denied(&lamp, "no write permission"))
    })
}

fn panicking_task(receiver: &Arc<LogReceiver>, name: &str) -> EnforcementTask {
    let headers = SignalHeaders::default().with_correlation_id(name);
    let receiver: Arc<dyn ResponseReceiver> = receiver.clone();
    EnforcementTask::from_fallible(thing("ns:lamp"), false, headers, receiver, || async {
        if true {
            panic!("enforcer exploded");
        }
        Ok::<ContextualResult, EnforcementError>(unreachable_result())
    })
}

fn unreachable_result() -> ContextualResult {
    ContextualResult::new(thing("ns:lamp"), SignalHeaders::default())
}
