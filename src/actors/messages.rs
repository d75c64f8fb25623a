//! Message types for actor communication
//!
//! 1. **Commands**: Request/response messages sent to one actor via mpsc
//! 2. **Events**: Broadcast notifications published to every subscriber

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::MonitorError;
use crate::evaluator::{Status, Transition};
use crate::target::{CheckClass, Target};

/// Published on every status change of a target.
///
/// The broadcast channel may lag for slow subscribers; the transition log in
/// the result store stays authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub target: Target,
    pub old_status: Status,
    pub new_status: Status,
    pub timestamp: DateTime<Utc>,
}

impl TransitionEvent {
    pub fn new(target: Target, transition: &Transition) -> Self {
        Self {
            target,
            old_status: transition.old_status,
            new_status: transition.new_status,
            timestamp: transition.timestamp,
        }
    }
}

/// Summary of one scheduler batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub transitions: usize,

    /// Probe tasks that panicked; each was recorded as a protocol error
    pub panicked: usize,
}

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run a batch of `class` immediately, bypassing the interval timer
    RunNow {
        class: CheckClass,
        respond_to: oneshot::Sender<Result<TickReport, MonitorError>>,
    },

    /// Stop the timers and wait for in-flight batches
    Shutdown,
}

/// Commands that can be sent to the NotifierActor
#[derive(Debug)]
pub enum NotifierCommand {
    /// Deliver the events already queued, then stop
    Shutdown,
}
