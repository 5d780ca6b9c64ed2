//! Database node model
//!
//! A `Node` is the coordinator's view of one database process: its address,
//! the role the coordinator assigned to it, operator flags, and the last
//! `NodeState` observed by a refresh. Only the cluster aggregate mutates it.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::gtid::GtidList;
use crate::config::NodeConfig;

/// Synthetic coordinates given to a replica whose status could not be read.
pub const SYNTHETIC_LOG_FILE: &str = "master.000001";
pub const SYNTHETIC_LOG_POS: u64 = 1;

const POSITION_DIGITS: u64 = 10_000_000_000;

/// Network identity of a node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeAddr {
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn url(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Role assigned by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Leader,
    Replica,
    Relay,
    /// Former leader, read-locked and rejecting connections during a switchover.
    Frozen,
    Failed,
    /// Not observed yet.
    Unreachable,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Leader => "leader",
            NodeRole::Replica => "replica",
            NodeRole::Relay => "relay",
            NodeRole::Frozen => "frozen",
            NodeRole::Failed => "failed",
            NodeRole::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbFlavor {
    MariaDb,
    MySql,
}

impl Default for DbFlavor {
    fn default() -> Self {
        DbFlavor::MariaDb
    }
}

/// GTID mode a replica currently uses to follow its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GtidUsage {
    No,
    SlavePos,
    CurrentPos,
    AutoPosition,
}

impl Default for GtidUsage {
    fn default() -> Self {
        GtidUsage::No
    }
}

/// A (file, offset) pair in a binary log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinlogPosition {
    pub file: String,
    pub pos: u64,
}

impl BinlogPosition {
    pub fn new(file: impl Into<String>, pos: u64) -> Self {
        Self {
            file: file.into(),
            pos,
        }
    }

    pub fn synthetic() -> Self {
        Self::new(SYNTHETIC_LOG_FILE, SYNTHETIC_LOG_POS)
    }

    /// Numeric suffix of the file name (`mysql-bin.000042` → 42).
    pub fn file_number(&self) -> Option<u64> {
        let (_, suffix) = self.file.rsplit_once('.')?;
        suffix.parse().ok()
    }

    /// File number followed by the offset zero-padded to ten digits, as one integer.
    ///
    /// `None` when the file name carries no numeric suffix.
    pub fn ordinal(&self) -> Option<u64> {
        let file_no = self.file_number()?;
        file_no
            .checked_mul(POSITION_DIGITS)
            .and_then(|v| v.checked_add(self.pos.min(POSITION_DIGITS - 1)))
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.pos)
    }
}

/// Replica-side status of a node's replication link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub io_thread_running: bool,
    pub sql_thread_running: bool,
    /// `None` when the replica is stopped and reports no lag.
    pub seconds_behind: Option<u64>,
    pub source_host: String,
    pub source_port: u16,
    pub source_server_id: u64,
    /// Source binlog coordinates read by the I/O thread.
    pub source_log_file: String,
    pub read_source_log_pos: u64,
    /// GTIDs received by the I/O thread.
    pub gtid_io_pos: GtidList,
    pub using_gtid: GtidUsage,
    pub last_io_error: String,
    pub last_sql_error: String,
}

impl ReplicationStatus {
    pub fn read_position(&self) -> BinlogPosition {
        BinlogPosition::new(self.source_log_file.clone(), self.read_source_log_pos)
    }

    pub fn source_url(&self) -> String {
        format!("{}:{}", self.source_host, self.source_port)
    }
}

/// What a refresh observed on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    pub server_id: u64,
    pub flavor: DbFlavor,
    pub read_only: bool,
    pub binlog_enabled: bool,
    /// GTID replication available (MariaDB GTID or MySQL `gtid_mode=ON`).
    pub gtid_enabled: bool,
    pub binlog: Option<BinlogPosition>,
    /// Own binlog GTID position (`gtid_binlog_pos` / `gtid_executed`).
    pub gtid_binlog_pos: GtidList,
    /// Applied replica GTID position (`gtid_slave_pos`).
    pub gtid_slave_pos: GtidList,
    pub replication: Option<ReplicationStatus>,
    pub semi_sync_enabled: bool,
    pub semi_sync_in_sync: bool,
    pub event_scheduler: bool,
    pub binlog_filters: String,
    pub replication_filters: String,
    /// Galera / group replication state identifier.
    pub cluster_state_id: Option<String>,
}

/// Operator and coordinator flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlags {
    pub ignored: bool,
    pub maintenance: bool,
    pub preferred: bool,
    pub relay_only: bool,
}

/// Replication health statistics used as election tie-breakers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationStats {
    pub replication_errors: u64,
    pub delay_events: u64,
    pub avg_delay_ms: u64,
    pub samples: u64,
}

impl ReplicationStats {
    /// Fold one lag observation into the running statistics.
    pub fn observe(&mut self, status: Option<&ReplicationStatus>, max_delay_secs: Option<u64>) {
        let Some(status) = status else {
            return;
        };
        if !status.last_io_error.is_empty() || !status.last_sql_error.is_empty() {
            self.replication_errors += 1;
        }
        if let Some(lag) = status.seconds_behind {
            let lag_ms = lag.saturating_mul(1000);
            let total = self
                .avg_delay_ms
                .saturating_mul(self.samples)
                .saturating_add(lag_ms);
            self.samples += 1;
            self.avg_delay_ms = total / self.samples;
            if max_delay_secs.is_some_and(|max| lag > max) {
                self.delay_events += 1;
            }
        }
    }
}

/// The coordinator's view of one database process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub addr: NodeAddr,
    pub router_name: String,
    pub role: NodeRole,
    pub flags: NodeFlags,
    /// Consecutive failed refreshes.
    pub fail_count: u32,
    pub stats: ReplicationStats,
    pub state: NodeState,
}

impl Node {
    pub fn new(addr: NodeAddr) -> Self {
        Self {
            addr,
            router_name: String::new(),
            role: NodeRole::Unreachable,
            flags: NodeFlags::default(),
            fail_count: 0,
            stats: ReplicationStats::default(),
            state: NodeState::default(),
        }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        let mut node = Self::new(NodeAddr::new(config.host.clone(), config.port));
        node.router_name = config.router_name.clone();
        node.flags.preferred = config.preferred;
        node.flags.ignored = config.ignored;
        node.flags.relay_only = config.relay;
        if config.relay {
            node.role = NodeRole::Relay;
        }
        node
    }

    pub fn url(&self) -> String {
        self.addr.url()
    }

    pub fn is_leader(&self) -> bool {
        self.role == NodeRole::Leader
    }

    pub fn is_failed(&self) -> bool {
        self.role == NodeRole::Failed
    }

    pub fn status(&self) -> Option<&ReplicationStatus> {
        self.state.replication.as_ref()
    }

    pub fn uses_mysql_gtid(&self) -> bool {
        self.state.flavor == DbFlavor::MySql && self.state.gtid_enabled
    }

    pub fn uses_mariadb_gtid(&self) -> bool {
        self.state.flavor == DbFlavor::MariaDb && self.state.gtid_enabled
    }

    pub fn has_gtid(&self) -> bool {
        self.state.gtid_enabled
    }

    /// Whether this node currently replicates from `source`.
    pub fn replicates_from(&self, source: &NodeAddr) -> bool {
        self.status()
            .is_some_and(|s| s.source_host == source.host && s.source_port == source.port)
    }

    /// Apply a successful refresh.
    ///
    /// Leader and frozen roles belong to the promotion protocol and are kept.
    pub fn apply_state(&mut self, state: NodeState, max_delay_secs: Option<u64>) {
        self.fail_count = 0;
        self.stats.observe(state.replication.as_ref(), max_delay_secs);
        self.state = state;
        self.role = match self.role {
            NodeRole::Leader | NodeRole::Frozen => self.role,
            _ if self.flags.relay_only => NodeRole::Relay,
            _ => NodeRole::Replica,
        };
    }

    /// Record a failed refresh.
    pub fn mark_unreachable(&mut self) {
        self.fail_count = self.fail_count.saturating_add(1);
        self.role = NodeRole::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binlog_ordinal_orders_files_first() {
        let a = BinlogPosition::new("mysql-bin.000002", 4);
        let b = BinlogPosition::new("mysql-bin.000001", 999_999);
        assert!(a.ordinal().unwrap() > b.ordinal().unwrap());
        assert_eq!(a.ordinal(), Some(2 * 10_000_000_000 + 4));
    }

    #[test]
    fn test_binlog_ordinal_requires_numeric_suffix() {
        assert_eq!(BinlogPosition::new("relay", 10).ordinal(), None);
        assert_eq!(BinlogPosition::new("bin.abc", 10).ordinal(), None);
        assert_eq!(BinlogPosition::synthetic().ordinal(), Some(10_000_000_001));
    }

    #[test]
    fn test_apply_state_keeps_leader_role() {
        let mut node = Node::new(NodeAddr::new("db1", 3306));
        node.role = NodeRole::Leader;
        node.fail_count = 2;
        node.apply_state(NodeState::default(), Some(30));
        assert!(node.is_leader());
        assert_eq!(node.fail_count, 0);
    }

    #[test]
    fn test_apply_state_recovers_failed_replica() {
        let mut node = Node::new(NodeAddr::new("db2", 3306));
        node.mark_unreachable();
        node.mark_unreachable();
        assert!(node.is_failed());
        assert_eq!(node.fail_count, 2);

        node.apply_state(NodeState::default(), None);
        assert_eq!(node.role, NodeRole::Replica);
    }

    #[test]
    fn test_relay_node_from_config() {
        let mut config = NodeConfig::new("relay1", 3306);
        config.relay = true;
        let mut node = Node::from_config(&config);
        assert_eq!(node.role, NodeRole::Relay);
        node.apply_state(NodeState::default(), None);
        assert_eq!(node.role, NodeRole::Relay);
    }

    #[test]
    fn test_stats_observe_lag() {
        let mut stats = ReplicationStats::default();
        let status = ReplicationStatus {
            seconds_behind: Some(40),
            ..ReplicationStatus::default()
        };
        stats.observe(Some(&status), Some(30));
        let status = ReplicationStatus {
            seconds_behind: Some(0),
            last_sql_error: "Duplicate entry".to_string(),
            ..ReplicationStatus::default()
        };
        stats.observe(Some(&status), Some(30));

        assert_eq!(stats.samples, 2);
        assert_eq!(stats.delay_events, 1);
        assert_eq!(stats.replication_errors, 1);
        assert_eq!(stats.avg_delay_ms, 20_000);
    }
}
