//! Error taxonomy of the monitoring engine
//!
//! Probe errors never leave the prober boundary as errors: they are turned
//! into a [`ProbeOutcome`] on the recorded [`crate::ProbeResult`]. Store and
//! scheduler errors are logged by the engine and never abort a batch.

use std::time::Duration;

use thiserror::Error;

use crate::ProbeOutcome;
use crate::storage::StorageError;
use crate::target::CheckClass;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    #[error("target unreachable: {0}")]
    ProbeUnreachable(String),

    #[error("protocol error: {0}")]
    ProbeProtocolError(String),

    #[error("store write '{operation}' failed after {attempts} attempts: {source}")]
    StoreWriteFailure {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("{0} check batch still running, tick skipped")]
    SchedulerOverrun(CheckClass),
}

impl MonitorError {
    /// Outcome recorded for a probe that failed with this error
    pub fn outcome(&self) -> ProbeOutcome {
        match self {
            MonitorError::ProbeTimeout(_) => ProbeOutcome::Timeout,
            MonitorError::ProbeUnreachable(_) => ProbeOutcome::Unreachable,
            _ => ProbeOutcome::ProtocolError,
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        MonitorError::ProbeProtocolError(msg.into())
    }

    pub fn unreachable(msg: impl Into<String>) -> Self {
        MonitorError::ProbeUnreachable(msg.into())
    }
}
