//! Integration tests for storage persistence
//!
//! These tests verify that:
//! - Target states and history survive an engine restart
//! - Concurrent writers keep each target's history ordered
//! - Uptime and retention cleanup work on the SQLite backend

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use net_monitoring::{
    ProbeOutcome, ProbeResult,
    config::EngineConfig,
    engine::Engine,
    evaluator::Status,
    storage::{HistoryQuery, ResultStore, sqlite::SqliteStore},
    target::Target,
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::snmp_values;

/// SQLite keeps millisecond precision
fn base_time() -> DateTime<Utc> {
    DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
}

fn targets() -> Vec<Target> {
    vec![
        Target::icmp("router", "192.168.1.1"),
        Target::icmp("nas", "192.168.1.20"),
    ]
}

#[tokio::test]
async fn test_state_survives_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("monitoring.db");
    let at = |minutes: i64| base_time() + Duration::minutes(minutes);

    {
        let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
        let engine = Engine::open(EngineConfig::default(), targets(), store)
            .await
            .unwrap();

        engine
            .record(ProbeResult::with_outcome("router", at(0), ProbeOutcome::Success))
            .await;
        for minute in 1..=3 {
            engine
                .record(ProbeResult::with_outcome(
                    "router",
                    at(minute),
                    ProbeOutcome::Timeout,
                ))
                .await;
        }
        engine
            .record(ProbeResult::with_outcome("nas", at(0), ProbeOutcome::Success))
            .await;
        engine
            .record(ProbeResult::with_outcome("nas", at(1), ProbeOutcome::Timeout))
            .await;

        engine.close().await.unwrap();
    }

    let store = Arc::new(SqliteStore::new(&db_path).await.unwrap());
    let engine = Engine::open(EngineConfig::default(), targets(), store)
        .await
        .unwrap();

    let router = engine.get_latest_status("router").await.unwrap();
    assert_eq!(router.status, Status::Down);
    assert_eq!(router.consecutive_failures, 3);
    assert_eq!(router.last_transition, Some(at(3)));

    // the nas continues its failure streak across the restart
    let nas = engine.get_latest_status("nas").await.unwrap();
    assert_eq!(nas.status, Status::Up);
    assert_eq!(nas.consecutive_failures, 1);
    for minute in 2..=3 {
        engine
            .record(ProbeResult::with_outcome("nas", at(minute), ProbeOutcome::Timeout))
            .await;
    }
    assert_eq!(
        engine.get_latest_status("nas").await.unwrap().status,
        Status::Down
    );

    let history = engine.get_history("router", at(0), at(10)).await.unwrap();
    let outcomes: Vec<_> = history.iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            ProbeOutcome::Success,
            ProbeOutcome::Timeout,
            ProbeOutcome::Timeout,
            ProbeOutcome::Timeout,
        ]
    );

    let transitions = engine.get_transitions("router", at(0)).await.unwrap();
    assert_eq!(transitions.len(), 2);
    assert_eq!(transitions[1].new_status, Status::Down);
}

#[tokio::test]
async fn test_concurrent_writers_keep_order() {
    let temp_dir = tempdir().unwrap();
    let store = Arc::new(
        SqliteStore::new(temp_dir.path().join("concurrent.db"))
            .await
            .unwrap(),
    );

    let mut writers = Vec::new();
    for writer in 0..4 {
        let store = store.clone();
        writers.push(tokio::spawn(async move {
            let target_id = format!("host-{writer}");
            for i in 0..25 {
                let result = ProbeResult::success(
                    target_id.clone(),
                    base_time() + Duration::seconds(i),
                    snmp_values(&[("cpu_load", i as f64)]),
                );
                store.append_result(&result).await.unwrap();
                tokio::task::yield_now().await;
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    for writer in 0..4 {
        let history = store
            .query_history(HistoryQuery::new(
                format!("host-{writer}"),
                base_time(),
                base_time() + Duration::minutes(1),
            ))
            .await
            .unwrap();
        assert_eq!(history.len(), 25);

        let loads: Vec<_> = history
            .iter()
            .map(|r| r.metrics.value("cpu_load").unwrap())
            .collect();
        let expected: Vec<_> = (0..25).map(|i| i as f64).collect();
        assert_eq!(loads, expected);
    }
}

#[tokio::test]
async fn test_uptime_and_cleanup() {
    let temp_dir = tempdir().unwrap();
    let store = Arc::new(
        SqliteStore::new(temp_dir.path().join("uptime.db"))
            .await
            .unwrap(),
    );
    let engine = Engine::open(EngineConfig::default(), targets(), store.clone())
        .await
        .unwrap();

    let outcomes = [
        ProbeOutcome::Success,
        ProbeOutcome::Success,
        ProbeOutcome::Timeout,
        ProbeOutcome::Success,
    ];
    for (i, outcome) in outcomes.into_iter().enumerate() {
        engine
            .record(ProbeResult::with_outcome(
                "router",
                base_time() + Duration::days(i as i64),
                outcome,
            ))
            .await;
    }

    let uptime = engine.uptime("router", base_time()).await.unwrap();
    assert_eq!(uptime.total_checks, 4);
    assert_eq!(uptime.successful_checks, 3);
    assert_eq!(uptime.uptime_percentage, 75.0);

    // everything before day 2 expires
    let deleted = engine
        .cleanup(base_time() + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    let uptime = engine.uptime("router", base_time()).await.unwrap();
    assert_eq!(uptime.total_checks, 2);
    assert_eq!(uptime.uptime_percentage, 50.0);

    // the state itself is never expired
    let state = store.latest_state("router").await.unwrap().unwrap();
    assert_eq!(state.status, Status::Up);

    let health = store.health_check().await.unwrap();
    assert!(health.healthy);
}
