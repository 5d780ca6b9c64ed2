//! Sandbox topology file
//!
//! Seeds the in-memory node driver for the CLI:
//!
//! ```json
//! {"nodes": [
//!   {"host": "db1", "server_id": 1, "gtid": "0-1-100"},
//!   {"host": "db2", "server_id": 2, "gtid": "0-1-100", "source": "db1:3306"}
//! ]}
//! ```
//!
//! A node without `source` is a leader; `unreachable` nodes refuse every call.

use std::collections::HashSet;

use serde::Deserialize;

use super::errors::{CliError, CliResult};
use crate::config::ReplmgrConfig;
use crate::topology::sandbox::{leader_state, replica_state};
use crate::topology::{NodeAddr, SandboxDriver};

#[derive(Debug, Clone, Deserialize)]
pub struct TopologyFile {
    pub nodes: Vec<TopologyNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TopologyNode {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub server_id: u64,
    #[serde(default)]
    pub gtid: String,
    /// `host:port` of the node this one replicates from.
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub unreachable: bool,
}

fn default_port() -> u16 {
    3306
}

fn parse_source(raw: &str) -> CliResult<NodeAddr> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| CliError::topology_error(format!("source '{}' is not host:port", raw)))?;
    let port = port
        .parse()
        .map_err(|_| CliError::topology_error(format!("source '{}' has an invalid port", raw)))?;
    Ok(NodeAddr::new(host, port))
}

impl TopologyFile {
    /// Build a driver holding every node of the file. Each configured node
    /// must be present.
    pub fn into_driver(self, config: &ReplmgrConfig) -> CliResult<SandboxDriver> {
        let driver = SandboxDriver::new();
        let mut seen = HashSet::new();
        for node in &self.nodes {
            let addr = NodeAddr::new(node.host.clone(), node.port);
            let state = match &node.source {
                None => leader_state(node.server_id, &node.gtid),
                Some(source) => replica_state(&parse_source(source)?, node.server_id, &node.gtid),
            };
            driver.add_node(&addr, state);
            if node.unreachable {
                driver.set_unreachable(&addr.url(), true);
            }
            seen.insert(addr.url());
        }
        for node in &config.nodes {
            if !seen.contains(&node.url()) {
                return Err(CliError::topology_error(format!(
                    "configured node {} is missing from the topology file",
                    node.url()
                )));
            }
        }
        Ok(driver)
    }
}
