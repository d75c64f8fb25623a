//! State evaluator
//!
//! Turns raw probe results into the externally visible target status.
//!
//! ## Debounce rules
//!
//! ```text
//! success (no threshold breach):
//!   consecutive_successes >= success_threshold → Up
//! success (threshold breach):
//!   → Warning immediately (per-sample, not debounced),
//!     consecutive_successes restarts at 0
//! timeout / unreachable / protocol-error:
//!   consecutive_failures >= fail_threshold     → Down
//! ```
//!
//! The first result of a target resolves `Unknown` immediately unless
//! `debounce_initial` is set, in which case `Unknown` is debounced like any
//! other status.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::ProbeResult;
use crate::config::EngineConfig;
use crate::target::Target;

/// Externally visible status of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Unknown,
    Up,
    Down,
    Warning,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Unknown => "unknown",
            Status::Up => "up",
            Status::Down => "down",
            Status::Warning => "warning",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unknown" => Some(Status::Unknown),
            "up" => Some(Status::Up),
            "down" => Some(Status::Down),
            "warning" => Some(Status::Warning),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live state of one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
    pub target_id: String,
    pub status: Status,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_transition: Option<DateTime<Utc>>,
    pub last_evaluated: Option<DateTime<Utc>>,
}

impl TargetState {
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            status: Status::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_transition: None,
            last_evaluated: None,
        }
    }
}

/// A change of a target's status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub target_id: String,
    pub old_status: Status,
    pub new_status: Status,
    pub timestamp: DateTime<Utc>,
}

/// Resolved debounce thresholds for one target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebouncePolicy {
    pub fail_threshold: u32,
    pub success_threshold: u32,
    pub debounce_initial: bool,
}

impl Default for DebouncePolicy {
    fn default() -> Self {
        Self {
            fail_threshold: 3,
            success_threshold: 1,
            debounce_initial: false,
        }
    }
}

impl DebouncePolicy {
    /// Target override, then class policy, then engine default
    pub fn resolve(config: &EngineConfig, target: &Target) -> Self {
        let class = config.classes.get(target.check_class);

        Self {
            fail_threshold: target
                .debounce
                .fail_threshold
                .or(class.fail_threshold)
                .unwrap_or(config.fail_threshold)
                .max(1),
            success_threshold: target
                .debounce
                .success_threshold
                .or(class.success_threshold)
                .unwrap_or(config.success_threshold)
                .max(1),
            debounce_initial: config.debounce_initial,
        }
    }
}

/// First metric of `result` above its configured maximum
pub fn threshold_breach<'a>(
    result: &ProbeResult,
    thresholds: &'a BTreeMap<String, f64>,
) -> Option<(&'a str, f64, f64)> {
    thresholds.iter().find_map(|(name, max)| {
        result
            .metrics
            .value(name)
            .filter(|value| value > max)
            .map(|value| (name.as_str(), value, *max))
    })
}

/// Applies the debounce rules to target states
#[derive(Debug, Clone)]
pub struct StateEvaluator {
    config: EngineConfig,
}

impl StateEvaluator {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn policy(&self, target: &Target) -> DebouncePolicy {
        DebouncePolicy::resolve(&self.config, target)
    }

    /// Feed one result into `state`, returning the transition it caused
    pub fn evaluate(
        &self,
        state: &mut TargetState,
        target: &Target,
        result: &ProbeResult,
    ) -> Option<Transition> {
        apply(state, result, &self.policy(target), &target.thresholds)
    }
}

/// Core state machine step, independent of any engine configuration
pub fn apply(
    state: &mut TargetState,
    result: &ProbeResult,
    policy: &DebouncePolicy,
    thresholds: &BTreeMap<String, f64>,
) -> Option<Transition> {
    let old_status = state.status;
    let resolve_now = old_status == Status::Unknown && !policy.debounce_initial;

    state.last_evaluated = Some(match state.last_evaluated {
        Some(previous) if previous > result.timestamp => previous,
        _ => result.timestamp,
    });

    let new_status = if result.outcome.is_success() {
        state.consecutive_failures = 0;

        match threshold_breach(result, thresholds) {
            Some((metric, value, max)) => {
                trace!(
                    "{}: {metric} = {value} exceeds threshold {max}",
                    state.target_id
                );
                // only clean samples count towards leaving warning
                state.consecutive_successes = 0;
                Status::Warning
            }
            None => {
                state.consecutive_successes = state.consecutive_successes.saturating_add(1);

                if old_status == Status::Up
                    || resolve_now
                    || state.consecutive_successes >= policy.success_threshold
                {
                    Status::Up
                } else {
                    old_status
                }
            }
        }
    } else {
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.consecutive_successes = 0;

        if resolve_now || state.consecutive_failures >= policy.fail_threshold {
            Status::Down
        } else {
            old_status
        }
    };

    trace!(
        "{}: {} -> {new_status} (successes {}/{}, failures {}/{})",
        state.target_id,
        result.outcome,
        state.consecutive_successes,
        policy.success_threshold,
        state.consecutive_failures,
        policy.fail_threshold
    );

    if new_status == old_status {
        return None;
    }

    state.status = new_status;
    state.last_transition = Some(result.timestamp);

    if new_status == Status::Down {
        warn!(
            failures = state.consecutive_failures,
            threshold = policy.fail_threshold,
            "{}: {old_status} -> down",
            state.target_id
        );
    } else {
        debug!("{}: {old_status} -> {new_status}", state.target_id);
    }

    Some(Transition {
        target_id: state.target_id.clone(),
        old_status,
        new_status,
        timestamp: result.timestamp,
    })
}
