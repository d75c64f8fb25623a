//! Scheduler behaviour under slow and hanging targets
//!
//! These tests verify that:
//! - A hanging target does not delay the results of the others
//! - A class whose batch is still running skips its next tick
//! - The concurrency limit bounds the probes in flight
//! - Disabled targets are no longer scheduled but keep their history

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::Utc;
use net_monitoring::{
    ProbeOutcome,
    clock::{Clock, ManualClock},
    config::EngineConfig,
    error::MonitorError,
    evaluator::Status,
    target::{CheckClass, Target},
};
use tokio::time::Instant;

use crate::helpers::{
    HangingProber, ScriptedProber, SlowProber, Step, memory_engine, scheduler_with,
};

#[tokio::test(start_paused = true)]
async fn test_hanging_target_does_not_delay_others() {
    let engine = memory_engine(
        EngineConfig::default(),
        vec![
            Target::icmp("stuck", "10.0.0.1"),
            Target::icmp("ok-1", "10.0.0.2"),
            Target::icmp("ok-2", "10.0.0.3"),
        ],
    )
    .await;
    let mut events = engine.subscribe();
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let prober = Arc::new(HangingProber::new(&["stuck"], Duration::from_secs(5)));
    let scheduler = scheduler_with(engine.clone(), prober, clock);

    let started = Instant::now();
    let tick = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.run_tick(CheckClass::Fast).await }
    });

    // both healthy targets are evaluated before the stuck probe times out
    let mut up = Vec::new();
    for _ in 0..2 {
        let event = events.recv().await.unwrap();
        assert_eq!(event.new_status, Status::Up);
        up.push(event.target.id);
    }
    up.sort();
    assert_eq!(up, vec!["ok-1", "ok-2"]);
    assert!(started.elapsed() < Duration::from_secs(5));

    let report = tick.await.unwrap().unwrap();
    assert_eq!(report.dispatched, 3);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert!(started.elapsed() >= Duration::from_secs(5));

    let stuck = engine
        .get_history(
            "stuck",
            Utc::now() - chrono::Duration::days(1),
            Utc::now() + chrono::Duration::days(1),
        )
        .await
        .unwrap();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].outcome, ProbeOutcome::Timeout);
}

#[tokio::test(start_paused = true)]
async fn test_overrun_skips_tick_of_same_class_only() {
    let engine = memory_engine(
        EngineConfig::default(),
        vec![
            Target::icmp("stuck", "10.0.0.1"),
            Target::icmp("metrics", "10.0.0.2").with_class(CheckClass::Slow),
        ],
    )
    .await;
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let prober = Arc::new(HangingProber::new(&["stuck"], Duration::from_secs(5)));
    let scheduler = scheduler_with(engine, prober, clock);

    let first = scheduler.run_tick(CheckClass::Fast);
    tokio::pin!(first);
    assert!(futures::poll!(&mut first).is_pending());

    assert_matches!(
        scheduler.run_tick(CheckClass::Fast).await,
        Err(MonitorError::SchedulerOverrun(CheckClass::Fast))
    );

    // the slow class is independent
    let slow = scheduler.run_tick(CheckClass::Slow).await.unwrap();
    assert_eq!(slow.succeeded, 1);

    let report = first.await.unwrap();
    assert_eq!(report.failed, 1);

    // the class runs again once the batch is over
    assert!(scheduler.run_tick(CheckClass::Fast).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_bounds_in_flight_probes() {
    let config = EngineConfig {
        concurrency_limit: 2,
        ..Default::default()
    };
    let targets = (0..6)
        .map(|i| Target::icmp(format!("host-{i}"), format!("10.0.0.{i}")))
        .collect();
    let engine = memory_engine(config, targets).await;
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let prober = Arc::new(SlowProber::new(Duration::from_millis(100)));
    let scheduler = scheduler_with(engine, prober.clone(), clock);

    let started = Instant::now();
    let report = scheduler.run_tick(CheckClass::Fast).await.unwrap();

    assert_eq!(report.succeeded, 6);
    assert_eq!(prober.max_in_flight(), 2);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[tokio::test]
async fn test_targets_are_probed_once_per_interval() {
    let engine = memory_engine(
        EngineConfig::default(),
        vec![
            Target::icmp("web", "10.0.0.10"),
            Target::icmp("db", "10.0.0.11").with_class(CheckClass::Slow),
        ],
    )
    .await;
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let prober = Arc::new(ScriptedProber::new());
    let scheduler = scheduler_with(engine, prober.clone(), clock.clone());

    assert_eq!(scheduler.run_tick(CheckClass::Fast).await.unwrap().dispatched, 1);
    assert_eq!(scheduler.run_tick(CheckClass::Slow).await.unwrap().dispatched, 1);

    clock.advance(chrono::Duration::seconds(30));
    assert_eq!(scheduler.run_tick(CheckClass::Fast).await.unwrap().dispatched, 0);

    clock.advance(chrono::Duration::seconds(30));
    assert_eq!(scheduler.run_tick(CheckClass::Fast).await.unwrap().dispatched, 1);
    assert_eq!(scheduler.run_tick(CheckClass::Slow).await.unwrap().dispatched, 0);

    clock.advance(chrono::Duration::seconds(240));
    assert_eq!(scheduler.run_tick(CheckClass::Slow).await.unwrap().dispatched, 1);

    assert_eq!(prober.calls(), 4);
}

#[tokio::test]
async fn test_disabled_target_keeps_history() {
    let engine = memory_engine(
        EngineConfig::default(),
        vec![Target::icmp("a", "10.0.0.1"), Target::icmp("b", "10.0.0.2")],
    )
    .await;
    let start = Utc::now();
    let clock = Arc::new(ManualClock::new(start));
    let prober = Arc::new(ScriptedProber::new());
    prober.script("b", [Step::Unreachable]);
    let scheduler = scheduler_with(engine.clone(), prober, clock.clone());

    scheduler.run_tick(CheckClass::Fast).await.unwrap();
    assert!(engine.set_enabled("b", false));

    clock.advance(chrono::Duration::seconds(60));
    let due = engine.registry().list_due(CheckClass::Fast, clock.now());
    let ids: Vec<_> = due.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["a"]);

    let report = scheduler.run_tick(CheckClass::Fast).await.unwrap();
    assert_eq!(report.dispatched, 1);

    let history = engine
        .get_history(
            "b",
            start - chrono::Duration::minutes(1),
            start + chrono::Duration::minutes(5),
        )
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, ProbeOutcome::Unreachable);
    assert_eq!(
        engine.get_latest_status("b").await.unwrap().status,
        Status::Down
    );
}
