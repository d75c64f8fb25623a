pub mod actors;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod probe;
pub mod registry;
pub mod storage;
pub mod target;
pub mod util;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

/// Outcome of a single probe execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeOutcome {
    Success,
    Timeout,
    Unreachable,
    ProtocolError,
}

impl ProbeOutcome {
    pub fn is_success(self) -> bool {
        self == ProbeOutcome::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProbeOutcome::Success => "success",
            ProbeOutcome::Timeout => "timeout",
            ProbeOutcome::Unreachable => "unreachable",
            ProbeOutcome::ProtocolError => "protocol-error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(ProbeOutcome::Success),
            "timeout" => Some(ProbeOutcome::Timeout),
            "unreachable" => Some(ProbeOutcome::Unreachable),
            "protocol-error" => Some(ProbeOutcome::ProtocolError),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measurements gathered by a probe
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeMetrics {
    /// No measurements (failed probes)
    #[default]
    None,

    /// ICMP echo statistics
    Icmp(IcmpMetrics),

    /// SNMP values keyed by metric name
    Snmp { values: BTreeMap<String, f64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IcmpMetrics {
    pub sent: u32,
    pub received: u32,

    /// Average round-trip time over received replies
    pub latency_ms: Option<f64>,

    pub packet_loss_pct: f64,
}

impl IcmpMetrics {
    pub fn from_samples(sent: u32, rtts_ms: &[f64]) -> Self {
        let received = rtts_ms.len() as u32;
        let latency_ms = if rtts_ms.is_empty() {
            None
        } else {
            Some(rtts_ms.iter().sum::<f64>() / rtts_ms.len() as f64)
        };
        let packet_loss_pct = if sent == 0 {
            100.0
        } else {
            (sent.saturating_sub(received)) as f64 * 100.0 / sent as f64
        };

        Self {
            sent,
            received,
            latency_ms,
            packet_loss_pct,
        }
    }
}

impl ProbeMetrics {
    /// Look up a metric by name, used for threshold evaluation
    pub fn value(&self, name: &str) -> Option<f64> {
        match self {
            ProbeMetrics::None => None,
            ProbeMetrics::Icmp(icmp) => match name {
                "latency_ms" => icmp.latency_ms,
                "packet_loss_pct" => Some(icmp.packet_loss_pct),
                _ => None,
            },
            ProbeMetrics::Snmp { values } => values.get(name).copied(),
        }
    }

    pub fn latency_ms(&self) -> Option<f64> {
        self.value("latency_ms")
    }

    pub fn packet_loss_pct(&self) -> Option<f64> {
        self.value("packet_loss_pct")
    }
}

/// Result of one probe against one target. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub target_id: String,
    pub timestamp: DateTime<Utc>,
    pub outcome: ProbeOutcome,
    pub metrics: ProbeMetrics,

    /// Raw error detail for failed probes
    pub error: Option<String>,
}

impl ProbeResult {
    pub fn success(
        target_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        metrics: ProbeMetrics,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            timestamp,
            outcome: ProbeOutcome::Success,
            metrics,
            error: None,
        }
    }

    pub fn failure(
        target_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        error: &MonitorError,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            timestamp,
            outcome: error.outcome(),
            metrics: ProbeMetrics::None,
            error: Some(error.to_string()),
        }
    }

    /// Build a failed result with an explicit outcome (used by tests and fakes)
    pub fn with_outcome(
        target_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        outcome: ProbeOutcome,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            timestamp,
            outcome,
            metrics: ProbeMetrics::None,
            error: (!outcome.is_success()).then(|| outcome.to_string()),
        }
    }
}
