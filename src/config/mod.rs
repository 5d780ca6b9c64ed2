//! Coordinator configuration
//!
//! A single JSON document describes:
//! - the monitored cluster (name and node roster)
//! - the HTTP control surface
//! - failover / switchover tunables
//!
//! Loading is strict: unknown topologies, empty rosters or contradictory
//! tunables fail fast with a `ConfigError` instead of being patched up.

mod errors;
mod failover;

pub use errors::{ConfigError, ConfigResult};
pub use failover::{ArbitrationConfig, FailoverConfig, FalsePositiveConfig, TopologyKind};

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::http_server::HttpServerConfig;

/// One database node in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    /// Favoured during elections.
    #[serde(default)]
    pub preferred: bool,

    /// Never promoted (unless `last_resort_ignored` is set).
    #[serde(default)]
    pub ignored: bool,

    /// Relay-tier node, never promoted.
    #[serde(default)]
    pub relay: bool,

    /// Name passed to hooks to identify the router in front of this node.
    #[serde(default)]
    pub router_name: String,
}

impl NodeConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            preferred: false,
            ignored: false,
            relay: false,
            router_name: String::new(),
        }
    }

    pub fn url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Top-level coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplmgrConfig {
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Root of the on-disk state (crash records live under `<working_dir>/<cluster_name>`).
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    pub nodes: Vec<NodeConfig>,

    /// Interval between two monitoring ticks.
    #[serde(default = "default_tick_ms")]
    pub monitoring_tick_ms: u64,

    #[serde(default)]
    pub http: HttpServerConfig,

    #[serde(default)]
    pub failover: FailoverConfig,
}

fn default_db_port() -> u16 {
    3306
}

fn default_cluster_name() -> String {
    "default".to_string()
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("/var/lib/replmgr")
}

fn default_tick_ms() -> u64 {
    2000
}

impl ReplmgrConfig {
    /// Build a configuration for the given roster with every other field defaulted.
    pub fn with_nodes(cluster_name: impl Into<String>, nodes: Vec<NodeConfig>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            working_dir: default_working_dir(),
            nodes,
            monitoring_tick_ms: default_tick_ms(),
            http: HttpServerConfig::default(),
            failover: FailoverConfig::default(),
        }
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        let config: ReplmgrConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(ConfigError::invalid("cluster_name", "must not be empty"));
        }
        if self.nodes.is_empty() {
            return Err(ConfigError::invalid("nodes", "at least one node is required"));
        }
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.host.trim().is_empty() {
                return Err(ConfigError::invalid("nodes.host", "must not be empty"));
            }
            if !seen.insert(node.url()) {
                return Err(ConfigError::invalid(
                    "nodes",
                    format!("duplicate node {}", node.url()),
                ));
            }
        }
        if self.monitoring_tick_ms == 0 {
            return Err(ConfigError::invalid("monitoring_tick_ms", "must be positive"));
        }
        self.failover.validate()
    }

    /// Directory holding this cluster's crash records.
    pub fn crash_dir(&self) -> PathBuf {
        self.working_dir.join(&self.cluster_name)
    }
}
