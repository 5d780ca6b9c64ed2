//! In-memory node driver
//!
//! `SandboxDriver` keeps a small model of every database node and records
//! each remote call in order. Tests use it to drive the monitor and the
//! promotion protocol, and the CLI uses it for dry runs from a topology file.
//!
//! Failures are injected per node (unreachable) or per operation.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::driver::{ChangeSourceRequest, NodeDriver, PseudoGtidMark};
use super::errors::{DriverError, DriverResult};
use super::gtid::GtidList;
use super::node::{BinlogPosition, GtidUsage, NodeAddr, NodeState, ReplicationStatus};
use crate::promotion::ReplicationAddressingMode;

/// One recorded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverCall {
    pub node: String,
    pub op: &'static str,
    pub detail: String,
}

#[derive(Debug, Clone, Default)]
struct SandboxNode {
    state: NodeState,
    frozen: bool,
    locked: bool,
    heartbeats: u64,
    heartbeat_step: u64,
    long_writes: u64,
    pseudo_gtid: Option<PseudoGtidMark>,
}

#[derive(Debug, Default)]
struct SandboxInner {
    nodes: HashMap<String, SandboxNode>,
    calls: Vec<DriverCall>,
    unreachable: HashSet<String>,
    failing: HashSet<(String, &'static str)>,
    flush_delay: Option<Duration>,
}

/// Build the state of a MariaDB leader at the given GTID position.
pub fn leader_state(server_id: u64, gtid: &str) -> NodeState {
    let gtids = GtidList::parse_mariadb(gtid).unwrap_or_default();
    NodeState {
        server_id,
        read_only: false,
        binlog_enabled: true,
        gtid_enabled: true,
        binlog: Some(BinlogPosition::new("mariadb-bin.000001", 4 + gtids.seq_sum())),
        gtid_binlog_pos: gtids.clone(),
        gtid_slave_pos: GtidList::empty(),
        replication: None,
        ..NodeState::default()
    }
}

/// Build the state of a healthy MariaDB replica following `source` at the given GTID position.
pub fn replica_state(source: &NodeAddr, server_id: u64, gtid: &str) -> NodeState {
    let gtids = GtidList::parse_mariadb(gtid).unwrap_or_default();
    NodeState {
        server_id,
        read_only: true,
        binlog_enabled: true,
        gtid_enabled: true,
        binlog: Some(BinlogPosition::new("mariadb-bin.000001", 4)),
        gtid_binlog_pos: GtidList::empty(),
        gtid_slave_pos: gtids.clone(),
        replication: Some(ReplicationStatus {
            io_thread_running: true,
            sql_thread_running: true,
            seconds_behind: Some(0),
            source_host: source.host.clone(),
            source_port: source.port,
            source_server_id: 0,
            source_log_file: "mariadb-bin.000001".to_string(),
            read_source_log_pos: 4 + gtids.seq_sum(),
            gtid_io_pos: gtids,
            using_gtid: GtidUsage::SlavePos,
            last_io_error: String::new(),
            last_sql_error: String::new(),
        }),
        ..NodeState::default()
    }
}

/// In-memory `NodeDriver`.
#[derive(Debug, Default)]
pub struct SandboxDriver {
    inner: Mutex<SandboxInner>,
}

impl SandboxDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SandboxInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_node(&self, addr: &NodeAddr, state: NodeState) {
        self.lock().nodes.insert(
            addr.url(),
            SandboxNode {
                state,
                heartbeat_step: 1,
                ..SandboxNode::default()
            },
        );
    }

    /// Mutate a node's modelled state.
    pub fn update(&self, url: &str, f: impl FnOnce(&mut NodeState)) {
        if let Some(node) = self.lock().nodes.get_mut(url) {
            f(&mut node.state);
        }
    }

    pub fn state(&self, url: &str) -> Option<NodeState> {
        self.lock().nodes.get(url).map(|n| n.state.clone())
    }

    pub fn is_frozen(&self, url: &str) -> bool {
        self.lock().nodes.get(url).is_some_and(|n| n.frozen)
    }

    pub fn is_locked(&self, url: &str) -> bool {
        self.lock().nodes.get(url).is_some_and(|n| n.locked)
    }

    pub fn set_unreachable(&self, url: &str, unreachable: bool) {
        let mut inner = self.lock();
        if unreachable {
            inner.unreachable.insert(url.to_string());
        } else {
            inner.unreachable.remove(url);
        }
    }

    /// Make every future `op` on `url` fail.
    pub fn fail_op(&self, url: &str, op: &'static str) {
        self.lock().failing.insert((url.to_string(), op));
    }

    pub fn set_flush_delay(&self, delay: Duration) {
        self.lock().flush_delay = Some(delay);
    }

    pub fn set_long_running_writes(&self, url: &str, count: u64) {
        if let Some(node) = self.lock().nodes.get_mut(url) {
            node.long_writes = count;
        }
    }

    /// How much the heartbeat counter advances per read; 0 means the link is dead.
    pub fn set_heartbeat_step(&self, url: &str, step: u64) {
        if let Some(node) = self.lock().nodes.get_mut(url) {
            node.heartbeat_step = step;
        }
    }

    pub fn set_pseudo_gtid(&self, url: &str, mark: PseudoGtidMark) {
        if let Some(node) = self.lock().nodes.get_mut(url) {
            node.pseudo_gtid = Some(mark);
        }
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock().calls.clone()
    }

    /// Operations recorded on one node, in order.
    pub fn ops_for(&self, url: &str) -> Vec<&'static str> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.node == url)
            .map(|c| c.op)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Record the call, apply injected failures, then run `f` on the node model.
    fn call<T>(
        &self,
        node: &NodeAddr,
        op: &'static str,
        detail: String,
        f: impl FnOnce(&mut SandboxNode) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let url = node.url();
        let mut inner = self.lock();
        inner.calls.push(DriverCall {
            node: url.clone(),
            op,
            detail,
        });
        if inner.unreachable.contains(&url) {
            return Err(DriverError::unreachable(url, "connection refused"));
        }
        if inner.failing.contains(&(url.clone(), op)) {
            return Err(DriverError::command(url, op, "injected failure"));
        }
        match inner.nodes.get_mut(&url) {
            Some(model) => f(model),
            None => Err(DriverError::unreachable(url, "unknown host")),
        }
    }
}

#[async_trait]
impl NodeDriver for SandboxDriver {
    async fn refresh(&self, node: &NodeAddr) -> DriverResult<NodeState> {
        self.call(node, "refresh", String::new(), |n| Ok(n.state.clone()))
    }

    async fn long_running_writes(&self, node: &NodeAddr, threshold: Duration) -> DriverResult<u64> {
        self.call(
            node,
            "long_running_writes",
            format!("{}s", threshold.as_secs()),
            |n| Ok(n.long_writes),
        )
    }

    async fn flush_tables(&self, node: &NodeAddr) -> DriverResult<()> {
        self.call(node, "flush_tables", String::new(), |_| Ok(()))?;
        let delay = self.lock().flush_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn flush_tables_with_read_lock(&self, node: &NodeAddr) -> DriverResult<()> {
        self.call(node, "flush_tables_with_read_lock", String::new(), |n| {
            n.locked = true;
            Ok(())
        })
    }

    async fn unlock_tables(&self, node: &NodeAddr) -> DriverResult<()> {
        self.call(node, "unlock_tables", String::new(), |n| {
            n.locked = false;
            Ok(())
        })
    }

    async fn freeze(&self, node: &NodeAddr) -> DriverResult<()> {
        self.call(node, "freeze", String::new(), |n| {
            n.frozen = true;
            Ok(())
        })
    }

    async fn unfreeze(&self, node: &NodeAddr) -> DriverResult<()> {
        self.call(node, "unfreeze", String::new(), |n| {
            n.frozen = false;
            Ok(())
        })
    }

    async fn kill_client_connections(&self, node: &NodeAddr) -> DriverResult<()> {
        self.call(node, "kill_client_connections", String::new(), |_| Ok(()))
    }

    async fn set_event_scheduler(&self, node: &NodeAddr, enabled: bool) -> DriverResult<()> {
        self.call(node, "set_event_scheduler", enabled.to_string(), |n| {
            n.state.event_scheduler = enabled;
            Ok(())
        })
    }

    async fn read_all_relay_logs(&self, node: &NodeAddr, _timeout: Duration) -> DriverResult<()> {
        self.call(node, "read_all_relay_logs", String::new(), |_| Ok(()))
    }

    async fn binary_log_position(&self, node: &NodeAddr) -> DriverResult<BinlogPosition> {
        let url = node.url();
        self.call(node, "binary_log_position", String::new(), |n| {
            n.state
                .binlog
                .clone()
                .ok_or_else(|| DriverError::command(url, "binary_log_position", "binary log disabled"))
        })
    }

    async fn gtid_binlog_pos(&self, node: &NodeAddr) -> DriverResult<GtidList> {
        self.call(node, "gtid_binlog_pos", String::new(), |n| {
            Ok(n.state.gtid_binlog_pos.clone())
        })
    }

    async fn reset_binary_log_to(
        &self,
        node: &NodeAddr,
        position: &BinlogPosition,
    ) -> DriverResult<()> {
        self.call(node, "reset_binary_log_to", position.to_string(), |n| {
            n.state.binlog = Some(position.clone());
            Ok(())
        })
    }

    async fn stop_replica(&self, node: &NodeAddr) -> DriverResult<()> {
        self.call(node, "stop_replica", String::new(), |n| {
            if let Some(status) = n.state.replication.as_mut() {
                status.io_thread_running = false;
                status.sql_thread_running = false;
                status.seconds_behind = None;
            }
            Ok(())
        })
    }

    async fn start_replica(&self, node: &NodeAddr) -> DriverResult<()> {
        self.call(node, "start_replica", String::new(), |n| {
            if let Some(status) = n.state.replication.as_mut() {
                status.io_thread_running = true;
                status.sql_thread_running = true;
                status.seconds_behind = Some(0);
            }
            Ok(())
        })
    }

    async fn reset_replica(&self, node: &NodeAddr, all: bool) -> DriverResult<()> {
        self.call(node, "reset_replica", if all { "all" } else { "" }.to_string(), |n| {
            if all {
                n.state.replication = None;
            } else if let Some(status) = n.state.replication.as_mut() {
                status.gtid_io_pos = GtidList::empty();
            }
            Ok(())
        })
    }

    async fn set_read_only(&self, node: &NodeAddr, read_only: bool) -> DriverResult<()> {
        self.call(node, "set_read_only", read_only.to_string(), |n| {
            n.state.read_only = read_only;
            Ok(())
        })
    }

    async fn change_source(
        &self,
        node: &NodeAddr,
        request: &ChangeSourceRequest,
    ) -> DriverResult<()> {
        let detail = format!("{} {}", request.source, request.mode);
        self.call(node, "change_source", detail, |n| {
            let (using_gtid, position) = match &request.mode {
                ReplicationAddressingMode::GtidAutoPosition => (GtidUsage::AutoPosition, None),
                ReplicationAddressingMode::MariaDbSlavePos => (GtidUsage::SlavePos, None),
                ReplicationAddressingMode::MariaDbCurrentPos => (GtidUsage::CurrentPos, None),
                ReplicationAddressingMode::Positional(pos) => (GtidUsage::No, Some(pos.clone())),
            };
            let mut status = n.state.replication.take().unwrap_or_default();
            status.source_host = request.source.host.clone();
            status.source_port = request.source.port;
            status.using_gtid = using_gtid;
            status.io_thread_running = false;
            status.sql_thread_running = false;
            status.seconds_behind = None;
            if let Some(pos) = position {
                status.source_log_file = pos.file;
                status.read_source_log_pos = pos.pos;
            }
            n.state.replication = Some(status);
            Ok(())
        })
    }

    async fn set_gtid_slave_pos(&self, node: &NodeAddr, gtids: &GtidList) -> DriverResult<()> {
        self.call(node, "set_gtid_slave_pos", gtids.to_string(), |n| {
            n.state.gtid_slave_pos = gtids.clone();
            Ok(())
        })
    }

    async fn wait_for_gtid(
        &self,
        node: &NodeAddr,
        gtids: &GtidList,
        _timeout: Duration,
    ) -> DriverResult<()> {
        self.call(node, "wait_for_gtid", gtids.to_string(), |_| Ok(()))
    }

    async fn wait_for_position(
        &self,
        node: &NodeAddr,
        position: &BinlogPosition,
        _timeout: Duration,
    ) -> DriverResult<()> {
        self.call(node, "wait_for_position", position.to_string(), |_| Ok(()))
    }

    async fn inject_marker(&self, node: &NodeAddr) -> DriverResult<()> {
        self.call(node, "inject_marker", String::new(), |n| {
            if let Some(binlog) = n.state.binlog.as_mut() {
                binlog.pos += 1;
            }
            Ok(())
        })
    }

    async fn heartbeat_counter(&self, node: &NodeAddr) -> DriverResult<u64> {
        self.call(node, "heartbeat_counter", String::new(), |n| {
            n.heartbeats += n.heartbeat_step;
            Ok(n.heartbeats)
        })
    }

    async fn last_pseudo_gtid(&self, node: &NodeAddr) -> DriverResult<Option<PseudoGtidMark>> {
        self.call(node, "last_pseudo_gtid", String::new(), |n| Ok(n.pseudo_gtid.clone()))
    }

    async fn position_after_pseudo_gtid(
        &self,
        node: &NodeAddr,
        marker: &str,
        skip_events: u64,
    ) -> DriverResult<Option<BinlogPosition>> {
        self.call(
            node,
            "position_after_pseudo_gtid",
            format!("{} +{}", marker, skip_events),
            |n| {
                Ok(n.state
                    .binlog
                    .as_ref()
                    .map(|b| BinlogPosition::new(b.file.clone(), b.pos + skip_events)))
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(host: &str) -> NodeAddr {
        NodeAddr::new(host, 3306)
    }

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let driver = SandboxDriver::new();
        driver.add_node(&addr("db1"), leader_state(1, "0-1-10"));
        driver.refresh(&addr("db1")).await.unwrap();
        driver.set_read_only(&addr("db1"), true).await.unwrap();

        assert_eq!(driver.ops_for("db1:3306"), vec!["refresh", "set_read_only"]);
        assert!(driver.state("db1:3306").unwrap().read_only);
    }

    #[tokio::test]
    async fn test_unreachable_node_fails_every_call() {
        let driver = SandboxDriver::new();
        driver.add_node(&addr("db1"), leader_state(1, "0-1-10"));
        driver.set_unreachable("db1:3306", true);
        let err = driver.refresh(&addr("db1")).await.unwrap_err();
        assert!(err.is_unreachable());
        assert_eq!(driver.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_op_failure() {
        let driver = SandboxDriver::new();
        driver.add_node(&addr("db2"), replica_state(&addr("db1"), 2, "0-1-10"));
        driver.fail_op("db2:3306", "stop_replica");
        assert!(driver.stop_replica(&addr("db2")).await.is_err());
        assert!(driver.start_replica(&addr("db2")).await.is_ok());
    }

    #[tokio::test]
    async fn test_change_source_repoints_model() {
        let driver = SandboxDriver::new();
        driver.add_node(&addr("db2"), replica_state(&addr("db1"), 2, "0-1-10"));
        let request = ChangeSourceRequest {
            source: addr("db3"),
            mode: ReplicationAddressingMode::MariaDbSlavePos,
            heartbeat_secs: 1,
            connect_retry_secs: 10,
            ssl: false,
            channel: String::new(),
        };
        driver.change_source(&addr("db2"), &request).await.unwrap();
        driver.start_replica(&addr("db2")).await.unwrap();

        let status = driver.state("db2:3306").unwrap().replication.unwrap();
        assert_eq!(status.source_url(), "db3:3306");
        assert_eq!(status.using_gtid, GtidUsage::SlavePos);
        assert!(status.io_thread_running);
    }

    #[tokio::test]
    async fn test_heartbeat_counter_advances() {
        let driver = SandboxDriver::new();
        driver.add_node(&addr("db2"), replica_state(&addr("db1"), 2, "0-1-10"));
        let a = driver.heartbeat_counter(&addr("db2")).await.unwrap();
        let b = driver.heartbeat_counter(&addr("db2")).await.unwrap();
        assert!(b > a);

        driver.set_heartbeat_step("db2:3306", 0);
        let c = driver.heartbeat_counter(&addr("db2")).await.unwrap();
        assert_eq!(b, c);
    }
}
