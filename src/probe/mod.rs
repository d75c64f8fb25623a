//! Probers execute one check against one target.
//!
//! Supports ICMP reachability and SNMP metric probes. Failures never escape
//! [`Prober::probe`]: every error becomes a typed outcome on the returned
//! [`ProbeResult`].

mod ber;
pub mod icmp;
pub mod snmp;

pub use icmp::IcmpProber;
pub use snmp::SnmpProber;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::error::MonitorError;
use crate::target::{Protocol, Target};
use crate::{ProbeMetrics, ProbeResult};

#[async_trait]
pub trait Prober: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Upper bound for one probe, including retries
    fn timeout(&self) -> Duration;

    /// Perform the check. May take arbitrarily long; [`Prober::probe`] bounds it.
    async fn check(&self, target: &Target) -> Result<ProbeMetrics, MonitorError>;

    /// Run the check under the probe timeout and capture the outcome.
    ///
    /// A check that exceeds the timeout is dropped; a late answer is never seen.
    async fn probe(&self, target: &Target, at: DateTime<Utc>) -> ProbeResult {
        let timeout = self.timeout();
        trace!("{} probe of {} ({})", self.name(), target.id, target.address);

        match tokio::time::timeout(timeout, self.check(target)).await {
            Ok(Ok(metrics)) => ProbeResult::success(target.id.clone(), at, metrics),
            Ok(Err(e)) => {
                debug!("{} probe of {} failed: {e}", self.name(), target.id);
                ProbeResult::failure(target.id.clone(), at, &e)
            }
            Err(_) => {
                debug!("{} probe of {} timed out", self.name(), target.id);
                ProbeResult::failure(target.id.clone(), at, &MonitorError::ProbeTimeout(timeout))
            }
        }
    }
}

/// The prober responsible for each protocol
#[derive(Clone)]
pub struct ProberSet {
    icmp: Arc<dyn Prober>,
    snmp: Arc<dyn Prober>,
}

impl ProberSet {
    pub fn new(icmp: Arc<dyn Prober>, snmp: Arc<dyn Prober>) -> Self {
        Self { icmp, snmp }
    }

    /// Use the same prober for every protocol
    pub fn uniform(prober: Arc<dyn Prober>) -> Self {
        Self {
            icmp: prober.clone(),
            snmp: prober,
        }
    }

    /// Real ICMP and SNMP probers configured from the engine settings
    pub fn from_config(config: &crate::config::EngineConfig) -> Self {
        Self {
            icmp: Arc::new(IcmpProber::new(config.icmp_count, config.probe_timeout())),
            snmp: Arc::new(SnmpProber::new(config.snmp_retries, config.probe_timeout())),
        }
    }

    pub fn for_target(&self, target: &Target) -> Arc<dyn Prober> {
        match target.protocol {
            Protocol::Icmp => self.icmp.clone(),
            Protocol::Snmp(_) => self.snmp.clone(),
        }
    }
}

/// Resolve a target address to an IP, preferring a literal address
pub(crate) async fn resolve_address(address: &str) -> Result<std::net::IpAddr, MonitorError> {
    if let Ok(ip) = address.parse::<std::net::IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host(format!("{address}:0"))
        .await
        .map_err(|e| {
            MonitorError::unreachable(format!("DNS resolution failed for {address}: {e}"))
        })?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| MonitorError::unreachable(format!("no addresses found for {address}")))
}
