//! Result store trait definition
//!
//! This module defines the `ResultStore` trait that all storage
//! implementations must implement.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::UptimeStats;
use crate::ProbeResult;
use crate::evaluator::{TargetState, Transition};

/// Query parameters for fetching the results of one target within a time range
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub target_id: String,

    /// Start of time range (inclusive)
    pub start: DateTime<Utc>,

    /// End of time range (inclusive)
    pub end: DateTime<Utc>,

    /// Maximum number of results to return, oldest first
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn new(target_id: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            target_id: target_id.into(),
            start,
            end,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

/// Health status of the result store
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Durable record of probe results, target states and transitions.
///
/// Implementations must be `Send + Sync` as they are shared between the
/// scheduler's probe tasks. Methods return `StorageResult<T>`; backend
/// specific errors are converted to `StorageError` variants.
///
/// Results of one target are always returned ordered by timestamp, ties
/// broken by insertion order.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Append one probe result. Results are never updated afterwards.
    async fn append_result(&self, result: &ProbeResult) -> StorageResult<()>;

    /// Insert or replace the state of a target
    async fn upsert_state(&self, state: &TargetState) -> StorageResult<()>;

    /// Append a status transition to the transition log
    async fn append_transition(&self, transition: &Transition) -> StorageResult<()>;

    async fn latest_state(&self, target_id: &str) -> StorageResult<Option<TargetState>>;

    /// All persisted target states, used to restore the engine after a restart
    async fn load_states(&self) -> StorageResult<Vec<TargetState>>;

    /// Results of one target within a time range, oldest first
    async fn query_history(&self, query: HistoryQuery) -> StorageResult<Vec<ProbeResult>>;

    /// Transitions of one target at or after `since`, oldest first
    async fn query_transitions(
        &self,
        target_id: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<Transition>>;

    /// Uptime % = successful results / all results since `since`
    async fn calculate_uptime(
        &self,
        target_id: &str,
        since: DateTime<Utc>,
    ) -> StorageResult<UptimeStats>;

    /// Delete results and transitions older than `before`; target states are kept.
    ///
    /// Returns the number of probe results deleted.
    async fn cleanup_before(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Lightweight check that the backend is operational
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
