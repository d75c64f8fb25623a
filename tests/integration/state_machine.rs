//! Status evaluation through the engine
//!
//! These tests verify that:
//! - A target leaves `unknown` on its first result
//! - `down` needs `fail_threshold` consecutive failures
//! - A threshold breach on a successful sample is a warning
//! - The transition log and the subscriber events agree
//! - Scheduled probes drive the same status sequence

use std::sync::Arc;

use chrono::{Duration, Utc};
use net_monitoring::{
    ProbeOutcome, ProbeResult,
    clock::ManualClock,
    config::EngineConfig,
    evaluator::Status,
    target::{CheckClass, SnmpParams, Target, TargetKind},
};
use pretty_assertions::assert_eq;

use crate::helpers::{ScriptedProber, Step, memory_engine, scheduler_with, snmp_values};

#[tokio::test]
async fn test_up_down_up_sequence() {
    let engine = memory_engine(
        EngineConfig::default(),
        vec![Target::icmp("router", "192.168.1.1")],
    )
    .await;
    let mut events = engine.subscribe();
    let start = Utc::now();
    let at = |minutes: i64| start + Duration::minutes(minutes);

    // unknown -> up on the first success
    engine
        .record(ProbeResult::with_outcome("router", at(0), ProbeOutcome::Success))
        .await;
    assert_eq!(
        engine.get_latest_status("router").await.unwrap().status,
        Status::Up
    );

    // two timeouts are absorbed by the debounce
    for minute in 1..=2 {
        let transition = engine
            .record(ProbeResult::with_outcome("router", at(minute), ProbeOutcome::Timeout))
            .await;
        assert!(transition.is_none());
    }
    let state = engine.get_latest_status("router").await.unwrap();
    assert_eq!(state.status, Status::Up);
    assert_eq!(state.consecutive_failures, 2);

    // the third one flips the target
    let down = engine
        .record(ProbeResult::with_outcome("router", at(3), ProbeOutcome::Timeout))
        .await
        .unwrap();
    assert_eq!(down.old_status, Status::Up);
    assert_eq!(down.new_status, Status::Down);
    assert_eq!(down.timestamp, at(3));

    // a single success recovers (success_threshold = 1)
    engine
        .record(ProbeResult::with_outcome("router", at(4), ProbeOutcome::Success))
        .await
        .unwrap();

    let transitions = engine.get_transitions("router", start).await.unwrap();
    let statuses: Vec<_> = transitions
        .iter()
        .map(|t| (t.old_status, t.new_status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (Status::Unknown, Status::Up),
            (Status::Up, Status::Down),
            (Status::Down, Status::Up),
        ]
    );

    let mut published = Vec::new();
    while let Ok(event) = events.try_recv() {
        published.push((event.old_status, event.new_status));
    }
    assert_eq!(published, statuses);

    let history = engine.get_history("router", at(0), at(4)).await.unwrap();
    assert_eq!(history.len(), 5);
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn test_cpu_threshold_breach_is_warning() {
    let device = Target::snmp(
        "switch",
        "192.168.1.2",
        SnmpParams::new("public", TargetKind::Device),
    )
    .with_threshold("cpu_load", 90.0);
    let engine = memory_engine(EngineConfig::default(), vec![device]).await;
    let start = Utc::now();

    engine
        .record(ProbeResult::success(
            "switch",
            start,
            snmp_values(&[("cpu_load", 40.0)]),
        ))
        .await;

    let warning = engine
        .record(ProbeResult::success(
            "switch",
            start + Duration::minutes(5),
            snmp_values(&[("cpu_load", 95.0)]),
        ))
        .await
        .unwrap();
    assert_eq!(warning.old_status, Status::Up);
    assert_eq!(warning.new_status, Status::Warning);

    // still breaching: no new transition
    assert!(
        engine
            .record(ProbeResult::success(
                "switch",
                start + Duration::minutes(10),
                snmp_values(&[("cpu_load", 97.0)]),
            ))
            .await
            .is_none()
    );

    let recovered = engine
        .record(ProbeResult::success(
            "switch",
            start + Duration::minutes(15),
            snmp_values(&[("cpu_load", 50.0)]),
        ))
        .await
        .unwrap();
    assert_eq!(recovered.new_status, Status::Up);
}

#[tokio::test]
async fn test_class_policy_applies_to_slow_targets() {
    let mut config = EngineConfig::default();
    config.classes.slow.success_threshold = Some(2);

    let engine = memory_engine(
        config,
        vec![
            Target::icmp("fast", "10.0.0.1"),
            Target::icmp("slow", "10.0.0.2").with_class(CheckClass::Slow),
        ],
    )
    .await;
    let start = Utc::now();

    for id in ["fast", "slow"] {
        engine
            .record(ProbeResult::with_outcome(id, start, ProbeOutcome::Unreachable))
            .await;
        engine
            .record(ProbeResult::with_outcome(
                id,
                start + Duration::minutes(1),
                ProbeOutcome::Success,
            ))
            .await;
    }

    assert_eq!(
        engine.get_latest_status("fast").await.unwrap().status,
        Status::Up
    );
    assert_eq!(
        engine.get_latest_status("slow").await.unwrap().status,
        Status::Down
    );

    engine
        .record(ProbeResult::with_outcome(
            "slow",
            start + Duration::minutes(2),
            ProbeOutcome::Success,
        ))
        .await;
    assert_eq!(
        engine.get_latest_status("slow").await.unwrap().status,
        Status::Up
    );
}

#[tokio::test]
async fn test_debounce_initial_keeps_unknown() {
    let config = EngineConfig {
        debounce_initial: true,
        ..Default::default()
    };
    let engine = memory_engine(config, vec![Target::icmp("web", "10.0.0.10")]).await;
    let start = Utc::now();

    for minute in 0..2 {
        engine
            .record(ProbeResult::with_outcome(
                "web",
                start + Duration::minutes(minute),
                ProbeOutcome::Timeout,
            ))
            .await;
        assert_eq!(
            engine.get_latest_status("web").await.unwrap().status,
            Status::Unknown
        );
    }

    engine
        .record(ProbeResult::with_outcome(
            "web",
            start + Duration::minutes(2),
            ProbeOutcome::Timeout,
        ))
        .await;
    assert_eq!(
        engine.get_latest_status("web").await.unwrap().status,
        Status::Down
    );
}

#[tokio::test]
async fn test_scheduled_up_down_up_sequence() {
    let engine = memory_engine(
        EngineConfig::default(),
        vec![Target::icmp("router", "192.168.1.1")],
    )
    .await;
    let start = Utc::now();
    let clock = Arc::new(ManualClock::new(start));
    let prober = Arc::new(ScriptedProber::new());
    prober.script(
        "router",
        [
            Step::Up,
            Step::Up,
            Step::Up,
            Step::Timeout,
            Step::Timeout,
            Step::Timeout,
            Step::Up,
        ],
    );
    let scheduler = scheduler_with(engine.clone(), prober.clone(), clock.clone());

    let mut statuses = Vec::new();
    for _ in 0..7 {
        let report = scheduler.run_tick(CheckClass::Fast).await.unwrap();
        assert_eq!(report.dispatched, 1);
        statuses.push(engine.get_latest_status("router").await.unwrap().status);

        // not due again before the 60 s interval is over
        clock.advance(Duration::seconds(30));
        let report = scheduler.run_tick(CheckClass::Fast).await.unwrap();
        assert_eq!(report.dispatched, 0);
        clock.advance(Duration::seconds(30));
    }

    assert_eq!(
        statuses,
        vec![
            Status::Up,
            Status::Up,
            Status::Up,
            Status::Up,
            Status::Up,
            Status::Down,
            Status::Up,
        ]
    );
    assert_eq!(prober.calls(), 7);

    let transitions = engine.get_transitions("router", start).await.unwrap();
    let timeline: Vec<_> = transitions
        .iter()
        .map(|t| (t.new_status, t.timestamp - start))
        .collect();
    assert_eq!(
        timeline,
        vec![
            (Status::Up, Duration::zero()),
            (Status::Down, Duration::minutes(5)),
            (Status::Up, Duration::minutes(6)),
        ]
    );
}
