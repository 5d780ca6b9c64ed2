//! Failover Configuration
//!
//! Every tunable consumed by the precondition gate, the candidate elector
//! and the promotion orchestrator. All fields have conservative defaults:
//! a configuration that only names the nodes runs in interactive mode and
//! never promotes on its own.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::errors::{ConfigError, ConfigResult};

/// Shape of the replication topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyKind {
    /// One writable leader, any number of replicas.
    LeaderReplica,
    /// Two leaders replicating from each other, one of them active.
    MultiLeader,
    /// Leaders chained in a replication ring.
    Ring,
    /// Synchronous multi-leader (Galera / group replication).
    Galera,
    /// Replicas stream from a relay tier (binlog server or intermediate node).
    RelayTier,
}

impl TopologyKind {
    /// Topologies promoted through the virtual leader path.
    pub fn is_virtual(&self) -> bool {
        matches!(self, TopologyKind::Ring | TopologyKind::Galera)
    }

    /// Topologies in which several nodes may legitimately accept writes.
    pub fn is_multi_leader(&self) -> bool {
        matches!(
            self,
            TopologyKind::MultiLeader | TopologyKind::Ring | TopologyKind::Galera
        )
    }

    /// Topologies that route replication through a relay tier.
    pub fn is_relay_tier(&self) -> bool {
        matches!(self, TopologyKind::RelayTier)
    }

    /// Stable name for logs and the status API.
    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyKind::LeaderReplica => "leader_replica",
            TopologyKind::MultiLeader => "multi_leader",
            TopologyKind::Ring => "ring",
            TopologyKind::Galera => "galera",
            TopologyKind::RelayTier => "relay_tier",
        }
    }
}

impl Default for TopologyKind {
    fn default() -> Self {
        TopologyKind::LeaderReplica
    }
}

/// False-positive suppressors run after every gate check has passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FalsePositiveConfig {
    /// Probe an HTTP endpoint on the dead leader's host.
    #[serde(default)]
    pub external_check: bool,

    #[serde(default = "default_external_port")]
    pub external_port: u16,

    #[serde(default = "default_probe_timeout_ms")]
    pub external_timeout_ms: u64,

    /// Check whether replicas still receive heartbeats from the leader.
    #[serde(default)]
    pub heartbeat_check: bool,

    #[serde(default = "default_probe_window_ms")]
    pub heartbeat_window_ms: u64,

    /// Restart the load balancer monitor and ask it again.
    #[serde(default)]
    pub load_balancer_check: bool,

    #[serde(default = "default_probe_window_ms")]
    pub load_balancer_window_ms: u64,
}

impl Default for FalsePositiveConfig {
    fn default() -> Self {
        Self {
            external_check: false,
            external_port: default_external_port(),
            external_timeout_ms: default_probe_timeout_ms(),
            heartbeat_check: false,
            heartbeat_window_ms: default_probe_window_ms(),
            load_balancer_check: false,
            load_balancer_window_ms: default_probe_window_ms(),
        }
    }
}

/// External split-brain arbitrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitrationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of the arbitrator, e.g. `http://arbitrator:10001`.
    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub secret: String,

    /// Identity of this coordinator among its peers.
    #[serde(default)]
    pub unique_id: u32,

    #[serde(default = "default_probe_timeout_ms")]
    pub read_timeout_ms: u64,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            secret: String::new(),
            unique_id: 0,
            read_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl ArbitrationConfig {
    /// Endpoint receiving arbitration requests.
    pub fn endpoint(&self) -> String {
        format!("{}/arbitrator", self.url.trim_end_matches('/'))
    }
}

/// Failover and switchover tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Interactive mode requires an operator to confirm every promotion.
    #[serde(default = "default_true")]
    pub interactive: bool,

    /// Allow a failover when the coordinator never saw the leader alive.
    #[serde(default)]
    pub fail_restart_unsafe: bool,

    /// Consecutive failed checks before the leader is considered dead.
    #[serde(default = "default_max_fail")]
    pub max_fail: u32,

    /// Lifetime number of unattended failovers, 0 for unlimited.
    #[serde(default = "default_fail_limit")]
    pub fail_limit: u32,

    /// Minimum seconds between two unattended failovers, 0 to disable.
    #[serde(default = "default_fail_time_secs")]
    pub fail_time_secs: u64,

    /// Replicas lagging more than this are not electable. `None` disables the check.
    #[serde(default = "default_fail_max_delay_secs")]
    pub fail_max_delay_secs: Option<u64>,

    /// Master switch for lag / thread / semi-sync electability checks.
    #[serde(default = "default_true")]
    pub replication_checks: bool,

    /// Refuse out-of-sync semi-sync replicas on failover.
    #[serde(default)]
    pub fail_sync: bool,

    /// Refuse out-of-sync semi-sync replicas on switchover.
    #[serde(default)]
    pub switch_sync: bool,

    #[serde(default = "default_true")]
    pub check_binlog_filters: bool,

    #[serde(default = "default_true")]
    pub check_replication_filters: bool,

    /// On switchover, require the candidate GTID position to equal the leader's.
    #[serde(default)]
    pub switchover_gtid_check: bool,

    /// Longest write transaction tolerated on the leader before a switchover.
    #[serde(default = "default_switch_wait_secs")]
    pub switch_wait_write_secs: u64,

    /// Bound on the table flush racing before a switchover.
    #[serde(default = "default_switch_wait_secs")]
    pub switch_wait_trx_secs: u64,

    /// Wait for each replica to reach the old leader position before repointing.
    #[serde(default = "default_true")]
    pub switch_replica_wait_catch: bool,

    #[serde(default = "default_wait_catch_secs")]
    pub switch_wait_catch_secs: u64,

    /// Move the event scheduler from the old leader to the new one.
    #[serde(default)]
    pub fail_event_scheduler: bool,

    /// Replicas are kept read-only.
    #[serde(default = "default_true")]
    pub read_only: bool,

    /// Time given to unmanaged routers to observe a new leader.
    #[serde(default)]
    pub route_settle_ms: u64,

    #[serde(default)]
    pub pre_hook: Option<PathBuf>,

    #[serde(default)]
    pub post_hook: Option<PathBuf>,

    /// Crash records kept on disk.
    #[serde(default = "default_crash_retention")]
    pub crash_retention: usize,

    /// Break sequence ties with replication error and delay statistics.
    #[serde(default)]
    pub tie_break_on_replication_stats: bool,

    /// Elect an ignored node when it alone holds the most advanced position.
    #[serde(default)]
    pub last_resort_ignored: bool,

    /// Continue a promotion after remote failures past the commit point.
    #[serde(default = "default_true")]
    pub best_effort: bool,

    /// Repoint non-GTID replicas through pseudo-GTID markers instead of holding them.
    #[serde(default)]
    pub autorejoin_positional_pseudo_gtid: bool,

    #[serde(default)]
    pub topology: TopologyKind,

    #[serde(default = "default_heartbeat_secs")]
    pub replication_heartbeat_secs: u64,

    #[serde(default = "default_connect_retry_secs")]
    pub replication_connect_retry_secs: u64,

    #[serde(default)]
    pub replication_ssl: bool,

    /// Named replication channel / connection, empty for the default one.
    #[serde(default)]
    pub replication_channel: String,

    #[serde(default)]
    pub false_positive: FalsePositiveConfig,

    #[serde(default)]
    pub arbitration: ArbitrationConfig,

    /// After a failover onto a non-preferred node, switch back to a healthy preferred one.
    #[serde(default)]
    pub switchback_to_preferred: bool,
}

fn default_true() -> bool {
    true
}
fn default_max_fail() -> u32 {
    5
}
fn default_fail_limit() -> u32 {
    5
}
fn default_fail_time_secs() -> u64 {
    300
}
fn default_fail_max_delay_secs() -> Option<u64> {
    Some(30)
}
fn default_switch_wait_secs() -> u64 {
    10
}
fn default_wait_catch_secs() -> u64 {
    30
}
fn default_crash_retention() -> usize {
    10
}
fn default_heartbeat_secs() -> u64 {
    1
}
fn default_connect_retry_secs() -> u64 {
    10
}
fn default_external_port() -> u16 {
    80
}
fn default_probe_timeout_ms() -> u64 {
    1000
}
fn default_probe_window_ms() -> u64 {
    3000
}

impl Default for FailoverConfig {
    fn default() -> Self {
        // Route through serde so field defaults live in one place.
        serde_json::from_str("{}").unwrap_or_else(|_| Self::fallback())
    }
}

impl FailoverConfig {
    fn fallback() -> Self {
        Self {
            interactive: true,
            fail_restart_unsafe: false,
            max_fail: default_max_fail(),
            fail_limit: default_fail_limit(),
            fail_time_secs: default_fail_time_secs(),
            fail_max_delay_secs: default_fail_max_delay_secs(),
            replication_checks: true,
            fail_sync: false,
            switch_sync: false,
            check_binlog_filters: true,
            check_replication_filters: true,
            switchover_gtid_check: false,
            switch_wait_write_secs: default_switch_wait_secs(),
            switch_wait_trx_secs: default_switch_wait_secs(),
            switch_replica_wait_catch: true,
            switch_wait_catch_secs: default_wait_catch_secs(),
            fail_event_scheduler: false,
            read_only: true,
            route_settle_ms: 0,
            pre_hook: None,
            post_hook: None,
            crash_retention: default_crash_retention(),
            tie_break_on_replication_stats: false,
            last_resort_ignored: false,
            best_effort: true,
            autorejoin_positional_pseudo_gtid: false,
            topology: TopologyKind::LeaderReplica,
            replication_heartbeat_secs: default_heartbeat_secs(),
            replication_connect_retry_secs: default_connect_retry_secs(),
            replication_ssl: false,
            replication_channel: String::new(),
            false_positive: FalsePositiveConfig::default(),
            arbitration: ArbitrationConfig::default(),
            switchback_to_preferred: false,
        }
    }

    /// Validate tunables that would make the gate or orchestrator misbehave.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_fail == 0 {
            return Err(ConfigError::invalid("max_fail", "must be at least 1"));
        }
        if self.crash_retention == 0 {
            return Err(ConfigError::invalid("crash_retention", "must keep at least 1 record"));
        }
        if self.switch_wait_trx_secs == 0 {
            return Err(ConfigError::invalid(
                "switch_wait_trx_secs",
                "a zero flush window would abort every switchover",
            ));
        }
        if self.arbitration.enabled && self.arbitration.url.is_empty() {
            return Err(ConfigError::invalid(
                "arbitration.url",
                "required when arbitration is enabled",
            ));
        }
        if self.arbitration.enabled
            && !(self.arbitration.url.starts_with("http://")
                || self.arbitration.url.starts_with("https://"))
        {
            return Err(ConfigError::invalid(
                "arbitration.url",
                format!("'{}' is not an http(s) URL", self.arbitration.url),
            ));
        }
        Ok(())
    }

    /// Whether the failover is unattended (no operator confirmation).
    pub fn is_automatic(&self) -> bool {
        !self.interactive
    }
}
