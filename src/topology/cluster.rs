//! Cluster aggregate
//!
//! The cluster owns the node roster and the single leader reference. Roles
//! change in exactly two places:
//! - `record_refresh`, which reflects what the observer saw
//! - `commit_leader`, which moves the leader role in one step
//!
//! Indices into the roster are stable for the lifetime of the process.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::errors::DriverError;
use super::node::{Node, NodeRole, NodeState};
use crate::config::{FailoverConfig, ReplmgrConfig};
use crate::observability::{Diagnostic, Diagnostics, Severity};
use crate::promotion::CrashRecord;

/// Upper bound on the cooldown window (about 34 years).
const MAX_COOLDOWN_SECS: u64 = 1 << 30;

/// Whether this coordinator is the one allowed to act on the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorStatus {
    Active,
    Standby,
}

impl MonitorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorStatus::Active => "active",
            MonitorStatus::Standby => "standby",
        }
    }
}

/// The aggregate root.
#[derive(Debug, Clone)]
pub struct Cluster {
    pub name: String,
    pub config: FailoverConfig,
    nodes: Vec<Node>,
    leader: Option<usize>,
    vleader: Option<usize>,
    old_leader: Option<usize>,
    failover_ctr: u32,
    last_failover: Option<DateTime<Utc>>,
    crashes: Vec<CrashRecord>,
    status: MonitorStatus,
    arbitrator_failed: bool,
    split_brain: bool,
    leader_seen_alive: bool,
    diagnostics: Diagnostics,
}

impl Cluster {
    pub fn new(name: impl Into<String>, config: FailoverConfig, nodes: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            config,
            nodes,
            leader: None,
            vleader: None,
            old_leader: None,
            failover_ctr: 0,
            last_failover: None,
            crashes: Vec::new(),
            status: MonitorStatus::Active,
            arbitrator_failed: false,
            split_brain: false,
            leader_seen_alive: false,
            diagnostics: Diagnostics::new(),
        }
    }

    pub fn from_config(config: &ReplmgrConfig) -> Self {
        let nodes = config.nodes.iter().map(Node::from_config).collect();
        Self::new(config.cluster_name.clone(), config.failover.clone(), nodes)
    }

    // ==================
    // Roster
    // ==================

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, idx: usize) -> Option<&Node> {
        self.nodes.get(idx)
    }

    pub fn node_mut(&mut self, idx: usize) -> Option<&mut Node> {
        self.nodes.get_mut(idx)
    }

    pub fn index_of(&self, url: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.url() == url)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Indices of every node other than the leader that has not failed.
    pub fn replica_indices(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|i| Some(*i) != self.leader && !self.nodes[*i].is_failed())
            .collect()
    }

    // ==================
    // Leader reference
    // ==================

    pub fn leader_index(&self) -> Option<usize> {
        self.leader
    }

    pub fn leader(&self) -> Option<&Node> {
        self.leader.and_then(|i| self.nodes.get(i))
    }

    pub fn vleader_index(&self) -> Option<usize> {
        self.vleader
    }

    pub fn old_leader_index(&self) -> Option<usize> {
        self.old_leader
    }

    pub fn leader_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leader()).count()
    }

    /// Adopt a leader without a promotion (initial discovery or operator pinning).
    pub fn set_initial_leader(&mut self, idx: usize) -> bool {
        if self.leader.is_some() || idx >= self.nodes.len() {
            return false;
        }
        let node = &mut self.nodes[idx];
        // a node that already answered a refresh counts as seen alive
        if !node.is_failed() && node.role != NodeRole::Unreachable {
            self.leader_seen_alive = true;
        }
        node.role = NodeRole::Leader;
        self.leader = Some(idx);
        if self.config.topology.is_virtual() {
            self.vleader = Some(idx);
        }
        true
    }

    /// Pick the leader from observed state when none is known yet: the first
    /// reachable, non-relay node that does not replicate from anyone.
    pub fn discover_leader(&mut self) -> Option<usize> {
        if self.leader.is_some() {
            return self.leader;
        }
        let found = self.nodes.iter().position(|n| {
            !n.is_failed()
                && n.role != NodeRole::Unreachable
                && !n.flags.relay_only
                && n.state.replication.is_none()
        })?;
        self.set_initial_leader(found);
        Some(found)
    }

    /// Move the leader role to `new` in a single step.
    ///
    /// The previous leader becomes `Frozen` when `freeze_old` is set (switchover),
    /// stays `Failed` if it failed, and is otherwise demoted to `Replica`.
    pub fn commit_leader(&mut self, new: usize, freeze_old: bool) -> bool {
        if new >= self.nodes.len() {
            return false;
        }
        let previous = self.leader;
        for (i, node) in self.nodes.iter_mut().enumerate() {
            if i == new || !node.is_leader() {
                continue;
            }
            node.role = if freeze_old && Some(i) == previous {
                NodeRole::Frozen
            } else {
                NodeRole::Replica
            };
        }
        self.nodes[new].role = NodeRole::Leader;
        self.old_leader = previous.filter(|old| *old != new);
        self.leader = Some(new);
        if self.config.topology.is_virtual() {
            self.vleader = Some(new);
        }
        true
    }

    /// Re-admit the frozen old leader as a replica once it follows the new leader.
    pub fn readmit_old_leader(&mut self) {
        if let Some(old) = self.old_leader {
            let node = &mut self.nodes[old];
            if node.role == NodeRole::Frozen {
                node.role = NodeRole::Replica;
            }
        }
    }

    // ==================
    // Observation
    // ==================

    /// Fold one refresh result into the roster.
    pub fn record_refresh(&mut self, idx: usize, result: Result<NodeState, DriverError>) {
        let max_delay = self.config.fail_max_delay_secs;
        let is_leader = self.leader == Some(idx);
        let Some(node) = self.nodes.get_mut(idx) else {
            return;
        };
        match result {
            Ok(state) => {
                if is_leader && node.is_failed() {
                    node.role = NodeRole::Leader;
                }
                node.apply_state(state, max_delay);
                if is_leader {
                    self.leader_seen_alive = true;
                }
            }
            Err(_) => node.mark_unreachable(),
        }
    }

    pub fn leader_failed(&self) -> bool {
        self.leader.is_some_and(|i| self.nodes[i].is_failed())
    }

    pub fn leader_seen_alive(&self) -> bool {
        self.leader_seen_alive
    }

    /// Possible partition: no reachable majority, or a failed leader that a
    /// replica still receives events from.
    pub fn evaluate_split_brain(&self) -> bool {
        let reachable = self.nodes.iter().filter(|n| !n.is_failed()).count();
        if reachable * 2 <= self.nodes.len() {
            return true;
        }
        let Some(leader) = self.leader() else {
            return false;
        };
        leader.is_failed()
            && self.nodes.iter().any(|n| {
                !n.is_failed() && n.replicates_from(&leader.addr)
                    && n.status().is_some_and(|s| s.io_thread_running)
            })
    }

    pub fn split_brain(&self) -> bool {
        self.split_brain
    }

    /// Store the new suspicion; returns true when it changed.
    pub fn set_split_brain(&mut self, suspected: bool) -> bool {
        let changed = self.split_brain != suspected;
        self.split_brain = suspected;
        changed
    }

    // ==================
    // Bookkeeping
    // ==================

    pub fn failover_ctr(&self) -> u32 {
        self.failover_ctr
    }

    pub fn last_failover(&self) -> Option<DateTime<Utc>> {
        self.last_failover
    }

    /// Count an unattended failover and start the cooldown window.
    pub fn record_failover(&mut self, at: DateTime<Utc>) {
        self.failover_ctr = self.failover_ctr.saturating_add(1);
        self.last_failover = Some(at);
    }

    /// Time left before another unattended failover is allowed.
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.config.fail_time_secs == 0 {
            return None;
        }
        let last = self.last_failover?;
        let secs = i64::try_from(self.config.fail_time_secs.min(MAX_COOLDOWN_SECS)).unwrap_or(0);
        let window = Duration::seconds(secs);
        let elapsed = now.signed_duration_since(last);
        (elapsed < window).then(|| window - elapsed)
    }

    pub fn reset_leader_fail_count(&mut self) {
        if let Some(i) = self.leader {
            self.nodes[i].fail_count = 0;
        }
    }

    pub fn crashes(&self) -> &[CrashRecord] {
        &self.crashes
    }

    /// Append a crash record and keep only the newest `retention` in memory.
    pub fn push_crash(&mut self, record: CrashRecord, retention: usize) {
        self.crashes.push(record);
        let excess = self.crashes.len().saturating_sub(retention.max(1));
        self.crashes.drain(..excess);
    }

    pub fn set_crashes(&mut self, crashes: Vec<CrashRecord>) {
        self.crashes = crashes;
    }

    // ==================
    // Arbitration state
    // ==================

    pub fn status(&self) -> MonitorStatus {
        self.status
    }

    pub fn set_status(&mut self, status: MonitorStatus) {
        self.status = status;
    }

    pub fn arbitrator_failed(&self) -> bool {
        self.arbitrator_failed
    }

    pub fn set_arbitrator_failed(&mut self, failed: bool) {
        self.arbitrator_failed = failed;
    }

    // ==================
    // Diagnostics
    // ==================

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnose(&mut self, severity: Severity, code: &str, message: impl Into<String>) {
        self.diagnostics.push(severity, code, message);
    }

    pub fn absorb_diagnostics(&mut self, entries: Vec<Diagnostic>) {
        self.diagnostics.extend(entries);
    }

    /// Serializable view for the operator API.
    pub fn snapshot(&self) -> ClusterSnapshot {
        ClusterSnapshot {
            name: self.name.clone(),
            topology: self.config.topology.as_str(),
            interactive: self.config.interactive,
            status: self.status,
            leader: self.leader().map(|n| n.url()),
            vleader: self.vleader.map(|i| self.nodes[i].url()),
            old_leader: self.old_leader.map(|i| self.nodes[i].url()),
            failover_ctr: self.failover_ctr,
            last_failover: self.last_failover,
            split_brain: self.split_brain,
            arbitrator_failed: self.arbitrator_failed,
            nodes: self
                .nodes
                .iter()
                .map(|n| NodeSnapshot {
                    url: n.url(),
                    role: n.role,
                    fail_count: n.fail_count,
                    ignored: n.flags.ignored,
                    preferred: n.flags.preferred,
                    maintenance: n.flags.maintenance,
                    relay: n.flags.relay_only,
                    read_only: n.state.read_only,
                    seconds_behind: n.status().and_then(|s| s.seconds_behind),
                    source: n.status().map(|s| s.source_url()),
                    gtid_binlog_pos: n.state.gtid_binlog_pos.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    pub url: String,
    pub role: NodeRole,
    pub fail_count: u32,
    pub ignored: bool,
    pub preferred: bool,
    pub maintenance: bool,
    pub relay: bool,
    pub read_only: bool,
    pub seconds_behind: Option<u64>,
    pub source: Option<String>,
    pub gtid_binlog_pos: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterSnapshot {
    pub name: String,
    pub topology: &'static str,
    pub interactive: bool,
    pub status: MonitorStatus,
    pub leader: Option<String>,
    pub vleader: Option<String>,
    pub old_leader: Option<String>,
    pub failover_ctr: u32,
    pub last_failover: Option<DateTime<Utc>>,
    pub split_brain: bool,
    pub arbitrator_failed: bool,
    pub nodes: Vec<NodeSnapshot>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::node::{NodeAddr, ReplicationStatus};

    fn cluster(n: usize) -> Cluster {
        let nodes = (0..n)
            .map(|i| Node::new(NodeAddr::new(format!("db{}", i + 1), 3306)))
            .collect();
        Cluster::new("test", FailoverConfig::default(), nodes)
    }

    #[test]
    fn test_commit_leader_is_single_step() {
        let mut c = cluster(3);
        assert!(c.set_initial_leader(0));
        assert!(c.commit_leader(1, false));
        assert_eq!(c.leader_index(), Some(1));
        assert_eq!(c.old_leader_index(), Some(0));
        assert_eq!(c.leader_count(), 1);
        assert_eq!(c.node(0).unwrap().role, NodeRole::Replica);
    }

    #[test]
    fn test_discovered_leader_counts_as_seen_alive() {
        let mut c = cluster(2);
        c.record_refresh(0, Ok(NodeState::default()));
        assert_eq!(c.discover_leader(), Some(0));
        assert!(c.leader_seen_alive());

        c.record_refresh(0, Err(DriverError::unreachable("db1:3306", "refused")));
        assert!(c.leader_failed());
        assert!(c.leader_seen_alive());
    }

    #[test]
    fn test_pinned_unobserved_leader_is_not_seen_alive() {
        let mut c = cluster(2);
        assert!(c.set_initial_leader(0));
        assert!(!c.leader_seen_alive());
    }

    #[test]
    fn test_commit_leader_freezes_on_switchover() {
        let mut c = cluster(2);
        c.set_initial_leader(0);
        c.commit_leader(1, true);
        assert_eq!(c.node(0).unwrap().role, NodeRole::Frozen);
        c.readmit_old_leader();
        assert_eq!(c.node(0).unwrap().role, NodeRole::Replica);
    }

    #[test]
    fn test_commit_leader_keeps_failed_old_leader() {
        let mut c = cluster(2);
        c.set_initial_leader(0);
        c.record_refresh(0, Err(DriverError::unreachable("db1:3306", "refused")));
        assert!(c.leader_failed());
        c.commit_leader(1, false);
        assert_eq!(c.node(0).unwrap().role, NodeRole::Failed);
        assert_eq!(c.leader_count(), 1);
    }

    #[test]
    fn test_discover_leader_skips_replicas() {
        let mut c = cluster(2);
        let replica = NodeState {
            replication: Some(ReplicationStatus::default()),
            ..NodeState::default()
        };
        c.record_refresh(0, Ok(replica));
        c.record_refresh(1, Ok(NodeState::default()));
        assert_eq!(c.discover_leader(), Some(1));
        assert!(c.node(1).unwrap().is_leader());
    }

    #[test]
    fn test_cooldown_window() {
        let mut c = cluster(2);
        let now = Utc::now();
        assert!(c.cooldown_remaining(now).is_none());
        c.record_failover(now);
        assert_eq!(c.failover_ctr(), 1);
        assert!(c.cooldown_remaining(now + Duration::seconds(10)).is_some());
        assert!(c.cooldown_remaining(now + Duration::seconds(301)).is_none());

        c.config.fail_time_secs = 0;
        assert!(c.cooldown_remaining(now).is_none());
    }

    #[test]
    fn test_split_brain_without_majority() {
        let mut c = cluster(3);
        c.set_initial_leader(0);
        assert!(!c.evaluate_split_brain());
        c.record_refresh(0, Err(DriverError::unreachable("db1:3306", "x")));
        c.record_refresh(1, Err(DriverError::unreachable("db2:3306", "x")));
        assert!(c.evaluate_split_brain());
        assert!(c.set_split_brain(true));
        assert!(!c.set_split_brain(true));
    }

    #[test]
    fn test_split_brain_when_replica_still_streams() {
        let mut c = cluster(3);
        c.set_initial_leader(0);
        c.record_refresh(0, Err(DriverError::unreachable("db1:3306", "x")));
        let streaming = NodeState {
            replication: Some(ReplicationStatus {
                io_thread_running: true,
                source_host: "db1".to_string(),
                source_port: 3306,
                ..ReplicationStatus::default()
            }),
            ..NodeState::default()
        };
        c.record_refresh(1, Ok(streaming));
        c.record_refresh(2, Ok(NodeState::default()));
        assert!(c.evaluate_split_brain());
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut c = cluster(2);
        c.set_initial_leader(0);
        let value = serde_json::to_value(c.snapshot()).unwrap();
        assert_eq!(value["leader"], "db1:3306");
        assert_eq!(value["nodes"][0]["role"], "leader");
        assert_eq!(value["status"], "active");
    }
}
