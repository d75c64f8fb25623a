//! Failure handling
//!
//! These tests verify that:
//! - Transient store write failures are retried
//! - A store that keeps failing never blocks evaluation
//! - Results of targets removed mid-flight are discarded
//! - A reload keeps the schedule of surviving targets

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use net_monitoring::{
    ProbeOutcome, ProbeResult,
    clock::ManualClock,
    config::EngineConfig,
    engine::Engine,
    evaluator::Status,
    storage::{MemoryStore, ResultStore},
    target::{CheckClass, Target},
};

use crate::helpers::{FlakyStore, SlowProber, scheduler_with};

#[tokio::test(start_paused = true)]
async fn test_transient_write_failures_are_retried() {
    let store = Arc::new(FlakyStore::new(2));
    let engine = Engine::open(
        EngineConfig::default(),
        vec![Target::icmp("web", "10.0.0.10")],
        store.clone(),
    )
    .await
    .unwrap();

    engine
        .record(ProbeResult::with_outcome("web", Utc::now(), ProbeOutcome::Success))
        .await;

    assert_eq!(store.append_attempts.load(Ordering::SeqCst), 3);
    assert_eq!(store.result_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_write_failure_keeps_evaluating() {
    let store = Arc::new(FlakyStore::new(u32::MAX));
    let engine = Engine::open(
        EngineConfig::default(),
        vec![Target::icmp("web", "10.0.0.10")],
        store.clone(),
    )
    .await
    .unwrap();
    let now = Utc::now();

    let transition = engine
        .record(ProbeResult::with_outcome("web", now, ProbeOutcome::Unreachable))
        .await
        .unwrap();
    assert_eq!(transition.new_status, Status::Down);

    // the result was dropped, status and transition were still stored
    assert_eq!(store.append_attempts.load(Ordering::SeqCst), 3);
    assert_eq!(store.result_count().await, 0);
    assert_eq!(engine.get_transitions("web", now).await.unwrap().len(), 1);
    assert_eq!(
        store.latest_state("web").await.unwrap().unwrap().status,
        Status::Down
    );
}

#[tokio::test(start_paused = true)]
async fn test_result_of_removed_target_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(
        Engine::open(
            EngineConfig::default(),
            vec![Target::icmp("keep", "10.0.0.1"), Target::icmp("drop", "10.0.0.2")],
            store.clone(),
        )
        .await
        .unwrap(),
    );
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let prober = Arc::new(SlowProber::new(Duration::from_millis(100)));
    let scheduler = scheduler_with(engine.clone(), prober, clock);

    let tick = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run_tick(CheckClass::Fast).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(engine.remove_target("drop").is_some());
    let report = tick.await.unwrap().unwrap();
    assert_eq!(report.dispatched, 2);

    assert_eq!(store.result_count().await, 1);
    assert!(engine.get_latest_status("drop").await.is_none());
    assert_eq!(
        engine.get_latest_status("keep").await.unwrap().status,
        Status::Up
    );
}

#[tokio::test]
async fn test_reload_keeps_schedule_of_surviving_targets() {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(
        Engine::open(
            EngineConfig::default(),
            vec![Target::icmp("a", "10.0.0.1")],
            store,
        )
        .await
        .unwrap(),
    );
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let prober = Arc::new(SlowProber::new(Duration::from_millis(1)));
    let scheduler = scheduler_with(engine.clone(), prober, clock);

    scheduler.run_tick(CheckClass::Fast).await.unwrap();
    let scheduled = engine.registry().next_due("a");
    assert!(scheduled.is_some());

    engine.reload_targets(vec![
        Target::icmp("a", "10.0.0.100"),
        Target::icmp("b", "10.0.0.2"),
    ]);

    assert_eq!(engine.registry().next_due("a"), scheduled);
    assert_eq!(engine.registry().get("a").unwrap().address, "10.0.0.100");

    // only the new target is due right away
    let report = scheduler.run_tick(CheckClass::Fast).await.unwrap();
    assert_eq!(report.dispatched, 1);
}
