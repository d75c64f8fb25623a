//! Monitored targets and their check parameters

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// What kind of thing a target is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    #[default]
    Host,
    Device,
}

/// Polling frequency group of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckClass {
    /// Reachability checks (ICMP)
    Fast,
    /// Metric polling (SNMP)
    Slow,
}

impl CheckClass {
    pub const ALL: [CheckClass; 2] = [CheckClass::Fast, CheckClass::Slow];
}

impl fmt::Display for CheckClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckClass::Fast => write!(f, "fast"),
            CheckClass::Slow => write!(f, "slow"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnmpVersion {
    V1,
    #[default]
    V2c,
}

impl SnmpVersion {
    /// Value of the version field on the wire
    pub fn wire_value(self) -> i64 {
        match self {
            SnmpVersion::V1 => 0,
            SnmpVersion::V2c => 1,
        }
    }
}

/// SNMP parameters of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnmpParams {
    pub community: String,
    pub version: SnmpVersion,
    pub port: u16,

    /// Metric name to OID, queried with a single GET
    pub oids: BTreeMap<String, String>,
}

impl SnmpParams {
    pub fn new(community: impl Into<String>, kind: TargetKind) -> Self {
        Self {
            community: community.into(),
            version: SnmpVersion::default(),
            port: 161,
            oids: default_oids(kind),
        }
    }
}

/// Default OID set per target kind
///
/// Hosts are expected to run a net-snmp agent (UCD-SNMP-MIB), devices are
/// queried through HOST-RESOURCES-MIB and IF-MIB only.
pub fn default_oids(kind: TargetKind) -> BTreeMap<String, String> {
    let mut oids = BTreeMap::from([
        ("sys_uptime".to_string(), "1.3.6.1.2.1.1.3.0".to_string()),
        ("if_in_octets".to_string(), "1.3.6.1.2.1.2.2.1.10.1".to_string()),
        ("if_out_octets".to_string(), "1.3.6.1.2.1.2.2.1.16.1".to_string()),
    ]);

    match kind {
        TargetKind::Host => {
            oids.insert("cpu_idle".to_string(), "1.3.6.1.4.1.2021.11.11.0".to_string());
            oids.insert("mem_total_kb".to_string(), "1.3.6.1.4.1.2021.4.5.0".to_string());
            oids.insert("mem_avail_kb".to_string(), "1.3.6.1.4.1.2021.4.6.0".to_string());
        }
        TargetKind::Device => {
            oids.insert("cpu_load".to_string(), "1.3.6.1.2.1.25.3.3.1.2.1".to_string());
        }
    }

    oids
}

/// How a target is checked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "snake_case")]
pub enum Protocol {
    Icmp,
    Snmp(SnmpParams),
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::Icmp => "icmp",
            Protocol::Snmp(_) => "snmp",
        }
    }

    /// Check class used when the configuration does not name one
    pub fn default_class(&self) -> CheckClass {
        match self {
            Protocol::Icmp => CheckClass::Fast,
            Protocol::Snmp(_) => CheckClass::Slow,
        }
    }
}

/// Per-target debounce overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DebounceOverrides {
    pub fail_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
}

/// A monitored host or device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub display: Option<String>,
    pub kind: TargetKind,
    pub address: String,
    pub protocol: Protocol,
    pub check_class: CheckClass,
    pub enabled: bool,

    /// Metric name to maximum value; a successful sample above it is a warning
    pub thresholds: BTreeMap<String, f64>,

    pub debounce: DebounceOverrides,
}

impl Target {
    pub fn icmp(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display: None,
            kind: TargetKind::Host,
            address: address.into(),
            protocol: Protocol::Icmp,
            check_class: CheckClass::Fast,
            enabled: true,
            thresholds: BTreeMap::new(),
            debounce: DebounceOverrides::default(),
        }
    }

    pub fn snmp(id: impl Into<String>, address: impl Into<String>, params: SnmpParams) -> Self {
        Self {
            id: id.into(),
            display: None,
            kind: TargetKind::Device,
            address: address.into(),
            protocol: Protocol::Snmp(params),
            check_class: CheckClass::Slow,
            enabled: true,
            thresholds: BTreeMap::new(),
            debounce: DebounceOverrides::default(),
        }
    }

    pub fn with_threshold(mut self, metric: impl Into<String>, max: f64) -> Self {
        self.thresholds.insert(metric.into(), max);
        self
    }

    pub fn with_class(mut self, class: CheckClass) -> Self {
        self.check_class = class;
        self
    }

    pub fn display_name(&self) -> &str {
        self.display.as_deref().unwrap_or(&self.id)
    }
}

/// Filter for listing targets; `None` fields match everything
#[derive(Debug, Clone, Default)]
pub struct TargetFilter {
    pub kind: Option<TargetKind>,
    pub check_class: Option<CheckClass>,
    pub enabled: Option<bool>,
}

impl TargetFilter {
    pub fn matches(&self, target: &Target) -> bool {
        self.kind.is_none_or(|kind| kind == target.kind)
            && self.check_class.is_none_or(|class| class == target.check_class)
            && self.enabled.is_none_or(|enabled| enabled == target.enabled)
    }
}
