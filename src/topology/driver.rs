//! Remote node operations
//!
//! `NodeDriver` is the narrow seam between the coordinator and the database
//! servers. Each call is one network round trip and may block; callers bound
//! the ones that matter with `tokio::time::timeout`.

use std::time::Duration;

use async_trait::async_trait;

use super::errors::DriverResult;
use super::gtid::GtidList;
use super::node::{BinlogPosition, NodeAddr, NodeState};
use crate::promotion::ReplicationAddressingMode;

/// Parameters of a replication source change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSourceRequest {
    pub source: NodeAddr,
    pub mode: ReplicationAddressingMode,
    pub heartbeat_secs: u64,
    pub connect_retry_secs: u64,
    pub ssl: bool,
    /// Named channel / connection, empty for the default one.
    pub channel: String,
}

/// Last pseudo-GTID marker a replica applied and how many events followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PseudoGtidMark {
    pub marker: String,
    pub events_after: u64,
}

/// Operations the coordinator performs on database nodes.
#[async_trait]
pub trait NodeDriver: Send + Sync {
    /// Read the node's variables and replication status.
    async fn refresh(&self, node: &NodeAddr) -> DriverResult<NodeState>;

    /// Number of write transactions open for longer than `threshold`.
    async fn long_running_writes(&self, node: &NodeAddr, threshold: Duration) -> DriverResult<u64>;

    async fn flush_tables(&self, node: &NodeAddr) -> DriverResult<()>;

    async fn flush_tables_with_read_lock(&self, node: &NodeAddr) -> DriverResult<()>;

    async fn unlock_tables(&self, node: &NodeAddr) -> DriverResult<()>;

    /// Reject new client connections.
    async fn freeze(&self, node: &NodeAddr) -> DriverResult<()>;

    /// Accept client connections again.
    async fn unfreeze(&self, node: &NodeAddr) -> DriverResult<()>;

    async fn kill_client_connections(&self, node: &NodeAddr) -> DriverResult<()>;

    async fn set_event_scheduler(&self, node: &NodeAddr, enabled: bool) -> DriverResult<()>;

    /// Wait until the SQL thread has applied everything the I/O thread received.
    async fn read_all_relay_logs(&self, node: &NodeAddr, timeout: Duration) -> DriverResult<()>;

    async fn binary_log_position(&self, node: &NodeAddr) -> DriverResult<BinlogPosition>;

    async fn gtid_binlog_pos(&self, node: &NodeAddr) -> DriverResult<GtidList>;

    /// Reset the binary log and fast-forward it to `position`.
    async fn reset_binary_log_to(&self, node: &NodeAddr, position: &BinlogPosition)
        -> DriverResult<()>;

    async fn stop_replica(&self, node: &NodeAddr) -> DriverResult<()>;

    async fn start_replica(&self, node: &NodeAddr) -> DriverResult<()>;

    /// Drop replica state; `all` also forgets the source connection settings.
    async fn reset_replica(&self, node: &NodeAddr, all: bool) -> DriverResult<()>;

    async fn set_read_only(&self, node: &NodeAddr, read_only: bool) -> DriverResult<()>;

    async fn change_source(&self, node: &NodeAddr, request: &ChangeSourceRequest)
        -> DriverResult<()>;

    async fn set_gtid_slave_pos(&self, node: &NodeAddr, gtids: &GtidList) -> DriverResult<()>;

    async fn wait_for_gtid(&self, node: &NodeAddr, gtids: &GtidList, timeout: Duration)
        -> DriverResult<()>;

    async fn wait_for_position(
        &self,
        node: &NodeAddr,
        position: &BinlogPosition,
        timeout: Duration,
    ) -> DriverResult<()>;

    /// Write a no-op marker transaction so a fresh binlog position exists.
    async fn inject_marker(&self, node: &NodeAddr) -> DriverResult<()>;

    /// Replication heartbeats received so far.
    async fn heartbeat_counter(&self, node: &NodeAddr) -> DriverResult<u64>;

    async fn last_pseudo_gtid(&self, node: &NodeAddr) -> DriverResult<Option<PseudoGtidMark>>;

    /// Position reached after `marker` plus `skip_events` events in the node's binlog.
    async fn position_after_pseudo_gtid(
        &self,
        node: &NodeAddr,
        marker: &str,
        skip_events: u64,
    ) -> DriverResult<Option<BinlogPosition>>;
}
