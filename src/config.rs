use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use tracing::trace;

use crate::target::{
    CheckClass, DebounceOverrides, Protocol, SnmpParams, SnmpVersion, Target, TargetKind,
    default_oids,
};

/// Storage backend configuration
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Retention period in days (results older than this are deleted)
        #[serde(default)]
        retention_days: Option<u32>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: None,
        }
    }
}

impl StorageConfig {
    pub fn retention_days(&self) -> Option<u32> {
        match self {
            StorageConfig::None => None,
            StorageConfig::Sqlite { retention_days, .. } => *retention_days,
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./monitoring.db")
}

/// Debounce thresholds of one check class; unset values fall back to the engine defaults
#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
pub struct ClassPolicy {
    pub fail_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
pub struct ClassPolicies {
    #[serde(default)]
    pub fast: ClassPolicy,
    #[serde(default)]
    pub slow: ClassPolicy,
}

impl ClassPolicies {
    pub fn get(&self, class: CheckClass) -> ClassPolicy {
        match class {
            CheckClass::Fast => self.fast,
            CheckClass::Slow => self.slow,
        }
    }
}

/// Engine tuning. Durations are given in seconds.
#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub interval_fast: u64,
    pub interval_slow: u64,
    pub probe_timeout: u64,
    pub fail_threshold: u32,
    pub success_threshold: u32,
    pub concurrency_limit: usize,

    /// Echo requests per ICMP probe
    pub icmp_count: u32,

    /// Extra SNMP attempts after the first one
    pub snmp_retries: u32,

    /// Require the regular debounce before leaving `unknown`
    pub debounce_initial: bool,

    pub store_retries: u32,
    pub store_backoff_ms: u64,

    pub classes: ClassPolicies,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval_fast: 60,
            interval_slow: 300,
            probe_timeout: 5,
            fail_threshold: 3,
            success_threshold: 1,
            concurrency_limit: 32,
            icmp_count: 3,
            snmp_retries: 1,
            debounce_initial: false,
            store_retries: 3,
            store_backoff_ms: 50,
            classes: ClassPolicies::default(),
        }
    }
}

impl EngineConfig {
    pub fn interval(&self, class: CheckClass) -> Duration {
        let secs = match class {
            CheckClass::Fast => self.interval_fast,
            CheckClass::Slow => self.interval_slow,
        };
        Duration::from_secs(secs.max(1))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout.max(1))
    }

    pub fn store_backoff(&self) -> Duration {
        Duration::from_millis(self.store_backoff_ms)
    }

    /// Bounded concurrency never drops below one worker
    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit.max(1)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    #[default]
    Icmp,
    Snmp,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct SnmpConfig {
    #[serde(default = "default_community")]
    pub community: String,
    #[serde(default)]
    pub version: SnmpVersion,
    #[serde(default = "default_snmp_port")]
    pub port: u16,

    /// Replaces the default OID set of the target kind
    pub oids: Option<BTreeMap<String, String>>,
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            community: default_community(),
            version: SnmpVersion::default(),
            port: default_snmp_port(),
            oids: None,
        }
    }
}

fn default_community() -> String {
    String::from("public")
}

fn default_snmp_port() -> u16 {
    161
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct TargetConfig {
    pub id: String,
    pub display: Option<String>,
    #[serde(default)]
    pub kind: TargetKind,
    pub address: String,
    #[serde(default)]
    pub protocol: ProtocolKind,
    pub snmp: Option<SnmpConfig>,
    pub check_class: Option<CheckClass>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub thresholds: BTreeMap<String, f64>,
    pub fail_threshold: Option<u32>,
    pub success_threshold: Option<u32>,
}

impl TargetConfig {
    pub fn resolve(self) -> anyhow::Result<Target> {
        if self.id.trim().is_empty() {
            anyhow::bail!("target with address '{}' has an empty id", self.address);
        }
        if self.address.trim().is_empty() {
            anyhow::bail!("target '{}' has an empty address", self.id);
        }

        let protocol = match self.protocol {
            ProtocolKind::Icmp => Protocol::Icmp,
            ProtocolKind::Snmp => {
                let snmp = self.snmp.unwrap_or_default();
                Protocol::Snmp(SnmpParams {
                    community: snmp.community,
                    version: snmp.version,
                    port: snmp.port,
                    oids: snmp.oids.unwrap_or_else(|| default_oids(self.kind)),
                })
            }
        };

        let check_class = self
            .check_class
            .unwrap_or_else(|| protocol.default_class());

        Ok(Target {
            id: self.id,
            display: self.display,
            kind: self.kind,
            address: self.address,
            protocol,
            check_class,
            enabled: self.enabled,
            thresholds: self.thresholds,
            debounce: DebounceOverrides {
                fail_threshold: self.fail_threshold,
                success_threshold: self.success_threshold,
            },
        })
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl Config {
    /// Resolve all target definitions, rejecting duplicate ids
    pub fn resolve_targets(&self) -> anyhow::Result<Vec<Target>> {
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(self.targets.len());

        for target in &self.targets {
            if !seen.insert(target.id.clone()) {
                anyhow::bail!("duplicate target id '{}'", target.id);
            }
            targets.push(target.clone().resolve()?);
        }

        Ok(targets)
    }
}

pub fn parse_config(content: &str) -> anyhow::Result<Config> {
    serde_json::from_str(content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    parse_config(&file_content).inspect(|config| trace!("loaded config: {config:?}"))
}
