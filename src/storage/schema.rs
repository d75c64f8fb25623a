//! Row definitions shared by the result store backends
//!
//! Probe results are stored with the frequently queried values as typed
//! columns (`outcome`, `latency_ms`, `packet_loss_pct`) and the complete
//! metric set as JSON, so new SNMP metrics need no migration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{StorageError, StorageResult};
use crate::evaluator::{Status, TargetState, Transition};
use crate::{ProbeMetrics, ProbeOutcome, ProbeResult};

/// One stored probe result
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub target_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: String,
    pub latency_ms: Option<f64>,
    pub packet_loss_pct: Option<f64>,
    pub metrics: String,
    pub error: Option<String>,
}

impl ResultRow {
    pub fn from_result(result: &ProbeResult) -> StorageResult<Self> {
        Ok(Self {
            target_id: result.target_id.clone(),
            timestamp: result.timestamp,
            outcome: result.outcome.as_str().to_string(),
            latency_ms: result.metrics.latency_ms(),
            packet_loss_pct: result.metrics.packet_loss_pct(),
            metrics: serde_json::to_string(&result.metrics)?,
            error: result.error.clone(),
        })
    }

    pub fn into_result(self) -> StorageResult<ProbeResult> {
        let outcome = ProbeOutcome::parse(&self.outcome)
            .ok_or_else(|| StorageError::decode("outcome", &self.outcome))?;
        let metrics: ProbeMetrics = serde_json::from_str(&self.metrics)?;

        Ok(ProbeResult {
            target_id: self.target_id,
            timestamp: self.timestamp,
            outcome,
            metrics,
            error: self.error,
        })
    }
}

pub(crate) fn parse_status(value: &str) -> StorageResult<Status> {
    Status::parse(value)
        .ok_or_else(|| StorageError::decode("status", value))
}

/// Uptime figures for one target over a time window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeStats {
    pub target_id: String,
    pub since: DateTime<Utc>,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,

    /// `successful / total * 100`; 100 when nothing was checked
    pub uptime_percentage: f64,

    /// Mean latency over results that reported one
    pub avg_latency_ms: Option<f64>,
}

impl UptimeStats {
    pub fn from_counts(
        target_id: impl Into<String>,
        since: DateTime<Utc>,
        total_checks: u64,
        successful_checks: u64,
        avg_latency_ms: Option<f64>,
    ) -> Self {
        let uptime_percentage = if total_checks == 0 {
            100.0
        } else {
            successful_checks as f64 / total_checks as f64 * 100.0
        };

        Self {
            target_id: target_id.into(),
            since,
            total_checks,
            successful_checks,
            failed_checks: total_checks.saturating_sub(successful_checks),
            uptime_percentage,
            avg_latency_ms,
        }
    }
}

/// Timestamp helpers; SQLite stores Unix milliseconds
pub(crate) fn to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StorageError::decode("timestamp", millis))
}

/// Build a state row read back from a backend
pub(crate) fn state_from_parts(
    target_id: String,
    status: &str,
    consecutive_failures: i64,
    consecutive_successes: i64,
    last_transition: Option<i64>,
    last_evaluated: Option<i64>,
) -> StorageResult<TargetState> {
    Ok(TargetState {
        target_id,
        status: parse_status(status)?,
        consecutive_failures: u32::try_from(consecutive_failures).unwrap_or(u32::MAX),
        consecutive_successes: u32::try_from(consecutive_successes).unwrap_or(u32::MAX),
        last_transition: last_transition.map(from_millis).transpose()?,
        last_evaluated: last_evaluated.map(from_millis).transpose()?,
    })
}

pub(crate) fn transition_from_parts(
    target_id: String,
    old_status: &str,
    new_status: &str,
    timestamp: i64,
) -> StorageResult<Transition> {
    Ok(Transition {
        target_id,
        old_status: parse_status(old_status)?,
        new_status: parse_status(new_status)?,
        timestamp: from_millis(timestamp)?,
    })
}
