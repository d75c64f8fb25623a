//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use net_monitoring::{
    ProbeMetrics, ProbeResult,
    clock::ManualClock,
    config::EngineConfig,
    engine::Engine,
    error::MonitorError,
    evaluator::{TargetState, Transition},
    probe::{Prober, ProberSet},
    storage::{
        HealthStatus, HistoryQuery, MemoryStore, ResultStore, StorageError, StorageResult,
        UptimeStats,
    },
    target::Target,
    actors::Scheduler,
};

/// One scripted probe answer
#[derive(Debug, Clone)]
pub enum Step {
    Up,
    Metrics(ProbeMetrics),
    Timeout,
    Unreachable,
}

impl Step {
    fn into_result(self) -> Result<ProbeMetrics, MonitorError> {
        match self {
            Step::Up => Ok(ProbeMetrics::None),
            Step::Metrics(metrics) => Ok(metrics),
            Step::Timeout => Err(MonitorError::ProbeTimeout(Duration::from_secs(5))),
            Step::Unreachable => Err(MonitorError::unreachable("no route to host")),
        }
    }
}

/// Answers from a per-target script; an exhausted script answers `Up`
#[derive(Default)]
pub struct ScriptedProber {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, target_id: &str, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(target_id.to_string())
            .or_default()
            .extend(steps);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn check(&self, target: &Target) -> Result<ProbeMetrics, MonitorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&target.id)
            .and_then(|steps| steps.pop_front())
            .unwrap_or(Step::Up);
        step.into_result()
    }
}

/// Never answers for the listed targets; answers `Up` for everything else
pub struct HangingProber {
    hanging: HashSet<String>,
    timeout: Duration,
}

impl HangingProber {
    pub fn new(hanging: &[&str], timeout: Duration) -> Self {
        Self {
            hanging: hanging.iter().map(|id| id.to_string()).collect(),
            timeout,
        }
    }
}

#[async_trait]
impl Prober for HangingProber {
    fn name(&self) -> &'static str {
        "hanging"
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self, target: &Target) -> Result<ProbeMetrics, MonitorError> {
        if self.hanging.contains(&target.id) {
            std::future::pending::<()>().await;
        }
        Ok(ProbeMetrics::None)
    }
}

/// Sleeps for `delay` and tracks how many checks ran at the same time
pub struct SlowProber {
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl SlowProber {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for SlowProber {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn timeout(&self) -> Duration {
        self.delay * 10
    }

    async fn check(&self, _target: &Target) -> Result<ProbeMetrics, MonitorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ProbeMetrics::None)
    }
}

/// Memory store whose result writes fail a configurable number of times
pub struct FlakyStore {
    inner: MemoryStore,
    failures_left: AtomicU32,
    pub append_attempts: AtomicU32,
}

impl FlakyStore {
    pub fn new(failures: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(failures),
            append_attempts: AtomicU32::new(0),
        }
    }

    pub async fn result_count(&self) -> usize {
        self.inner.result_count().await
    }
}

#[async_trait]
impl ResultStore for FlakyStore {
    async fn append_result(&self, result: &ProbeResult) -> StorageResult<()> {
        self.append_attempts.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if fail {
            return Err(StorageError::Query("database is locked".to_string()));
        }
        self.inner.append_result(result).await
    }

    async fn upsert_state(&self, state: &TargetState) -> StorageResult<()> {
        self.inner.upsert_state(state).await
    }

    async fn append_transition(&self, transition: &Transition) -> StorageResult<()> {
        self.inner.append_transition(transition).await
    }

    async fn latest_state(&self, target_id: &str) -> StorageResult<Option<TargetState>> {
        self.inner.latest_state(target_id).await
    }

    async fn load_states(&self) -> StorageResult<Vec<TargetState>> {
        self.inner.load_states().await
    }

    async fn query_history(&self, query: HistoryQuery) -> StorageResult<Vec<ProbeResult>> {
        self.inner.query_history(query).await
    }

    async fn query_transitions(
        &self,
        target_id: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<Transition>> {
        self.inner.query_transitions(target_id, since).await
    }

    async fn calculate_uptime(
        &self,
        target_id: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<UptimeStats> {
        self.inner.calculate_uptime(target_id, since).await
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        self.inner.cleanup_before(before).await
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        self.inner.health_check().await
    }

    async fn close(&self) -> StorageResult<()> {
        self.inner.close().await
    }
}

pub fn snmp_values(values: &[(&str, f64)]) -> ProbeMetrics {
    ProbeMetrics::Snmp {
        values: values
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect::<BTreeMap<_, _>>(),
    }
}

pub async fn memory_engine(config: EngineConfig, targets: Vec<Target>) -> Arc<Engine> {
    let store = Arc::new(MemoryStore::new());
    Arc::new(Engine::open(config, targets, store).await.unwrap())
}

pub fn scheduler_with(
    engine: Arc<Engine>,
    prober: Arc<dyn Prober>,
    clock: Arc<ManualClock>,
) -> Arc<Scheduler> {
    Arc::new(Scheduler::new(engine, ProberSet::uniform(prober), clock))
}
