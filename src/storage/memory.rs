//! In-memory result store (no persistence)
//!
//! Useful for tests and for deployments that configure the `"none"` storage
//! backend. All data is lost on restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, HistoryQuery, ResultStore};
use super::error::{StorageError, StorageResult};
use super::schema::UptimeStats;
use crate::ProbeResult;
use crate::evaluator::{TargetState, Transition};

#[derive(Debug, Default)]
struct Tables {
    /// Per target, kept sorted by timestamp; equal timestamps stay in arrival order
    results: HashMap<String, Vec<ProbeResult>>,
    states: BTreeMap<String, TargetState>,
    transitions: HashMap<String, Vec<Transition>>,
}

/// In-memory result store
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    closed: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    /// Number of stored results over all targets
    pub async fn result_count(&self) -> usize {
        self.tables.read().await.results.values().map(Vec::len).sum()
    }
}

fn insert_ordered<T>(rows: &mut Vec<T>, row: T, timestamp: impl Fn(&T) -> DateTime<Utc>) {
    let at = timestamp(&row);
    let index = rows.partition_point(|existing| timestamp(existing) <= at);
    rows.insert(index, row);
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn append_result(&self, result: &ProbeResult) -> StorageResult<()> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let rows = tables.results.entry(result.target_id.clone()).or_default();
        insert_ordered(rows, result.clone(), |r| r.timestamp);
        Ok(())
    }

    async fn upsert_state(&self, state: &TargetState) -> StorageResult<()> {
        self.ensure_open()?;
        self.tables
            .write()
            .await
            .states
            .insert(state.target_id.clone(), state.clone());
        Ok(())
    }

    async fn append_transition(&self, transition: &Transition) -> StorageResult<()> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;
        let rows = tables
            .transitions
            .entry(transition.target_id.clone())
            .or_default();
        insert_ordered(rows, transition.clone(), |t| t.timestamp);
        Ok(())
    }

    async fn latest_state(&self, target_id: &str) -> StorageResult<Option<TargetState>> {
        self.ensure_open()?;
        Ok(self.tables.read().await.states.get(target_id).cloned())
    }

    async fn load_states(&self) -> StorageResult<Vec<TargetState>> {
        self.ensure_open()?;
        Ok(self.tables.read().await.states.values().cloned().collect())
    }

    async fn query_history(&self, query: HistoryQuery) -> StorageResult<Vec<ProbeResult>> {
        self.ensure_open()?;
        debug!("querying in-memory history for {}", query.target_id);

        let tables = self.tables.read().await;
        let results = tables
            .results
            .get(&query.target_id)
            .map(|rows| {
                rows.iter()
                    .filter(|r| query.contains(r.timestamp))
                    .take(query.limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        Ok(results)
    }

    async fn query_transitions(
        &self,
        target_id: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<Transition>> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        Ok(tables
            .transitions
            .get(target_id)
            .map(|rows| rows.iter().filter(|t| t.timestamp >= since).cloned().collect())
            .unwrap_or_default())
    }

    async fn calculate_uptime(
        &self,
        target_id: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<UptimeStats> {
        self.ensure_open()?;
        let tables = self.tables.read().await;
        let rows: Vec<&ProbeResult> = tables
            .results
            .get(target_id)
            .map(|rows| rows.iter().filter(|r| r.timestamp >= since).collect())
            .unwrap_or_default();

        let successful = rows.iter().filter(|r| r.outcome.is_success()).count() as u64;
        let latencies: Vec<f64> = rows.iter().filter_map(|r| r.metrics.latency_ms()).collect();
        let avg_latency = (!latencies.is_empty())
            .then(|| latencies.iter().sum::<f64>() / latencies.len() as f64);

        Ok(UptimeStats::from_counts(
            target_id,
            since,
            rows.len() as u64,
            successful,
            avg_latency,
        ))
    }

    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        self.ensure_open()?;
        let mut tables = self.tables.write().await;

        let mut deleted = 0;
        for rows in tables.results.values_mut() {
            let len = rows.len();
            rows.retain(|r| r.timestamp >= before);
            deleted += len - rows.len();
        }
        for rows in tables.transitions.values_mut() {
            rows.retain(|t| t.timestamp >= before);
        }

        debug!("in-memory cleanup removed {deleted} results");
        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let healthy = !self.closed.load(Ordering::Acquire);
        let results = self.result_count().await;

        Ok(HealthStatus {
            healthy,
            message: if healthy {
                "in-memory store operational".to_string()
            } else {
                "in-memory store closed".to_string()
            },
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("results".to_string(), results.to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory store");
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
