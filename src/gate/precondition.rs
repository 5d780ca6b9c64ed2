//! Precondition Gate
//!
//! Decides, on every monitoring tick, whether an unattended failover may
//! start. The checks form a short-circuiting conjunction: the first one that
//! fails produces the verdict, and only its diagnostic is surfaced.
//!
//! The gate is:
//! - Read-only: it never changes roles or counters
//! - Deterministic for a given cluster snapshot and clock
//! - Explainable: every denial names its reason

use chrono::{DateTime, Utc};

use crate::election::{CandidateElector, ElectionKind};
use crate::observability::{DiagnosticBuffer, Severity};
use crate::promotion::FailoverGuard;
use crate::topology::{Cluster, MonitorStatus};

/// Why an unattended failover is not allowed this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    /// A failover or switchover is already running.
    PromotionInProgress,
    /// No leader has been discovered yet.
    NoLeader,
    /// A dry-run election found nobody to promote.
    NoCandidate,
    /// The previous failover is too recent.
    Cooldown { remaining_secs: i64 },
    /// A replica executed transactions the leader never saw.
    ErrantTransactions { node: String, gtids: String },
    /// Multi-leader nodes disagree on the cluster state identifier.
    ClusterStateMismatch { node: String },
    /// The leader has not failed enough consecutive refreshes.
    FailCountNotReached { count: u32, max_fail: u32 },
    /// The lifetime failover budget is spent.
    FailLimitReached { limit: u32 },
    /// The arbitrator made this coordinator standby.
    NotArbitrationWinner,
    /// Interactive mode: an operator must trigger the promotion.
    Interactive,
    /// The leader is alive.
    LeaderNotFailed,
    /// The leader was never seen alive since start and unsafe restart is off.
    FirstSnapshot,
    /// The arbitrator could not be reached on its last round.
    ArbitratorUnreachable,
}

impl DenialReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::PromotionInProgress => "GATE_PROMOTION_IN_PROGRESS",
            DenialReason::NoLeader => "GATE_NO_LEADER",
            DenialReason::NoCandidate => "GATE_NO_CANDIDATE",
            DenialReason::Cooldown { .. } => "GATE_COOLDOWN",
            DenialReason::ErrantTransactions { .. } => "GATE_ERRANT_TRANSACTIONS",
            DenialReason::ClusterStateMismatch { .. } => "GATE_CLUSTER_STATE_MISMATCH",
            DenialReason::FailCountNotReached { .. } => "GATE_FAIL_COUNT_NOT_REACHED",
            DenialReason::FailLimitReached { .. } => "GATE_FAIL_LIMIT_REACHED",
            DenialReason::NotArbitrationWinner => "GATE_NOT_ARBITRATION_WINNER",
            DenialReason::Interactive => "GATE_INTERACTIVE",
            DenialReason::LeaderNotFailed => "GATE_LEADER_ALIVE",
            DenialReason::FirstSnapshot => "GATE_FIRST_SNAPSHOT",
            DenialReason::ArbitratorUnreachable => "GATE_ARBITRATOR_UNREACHABLE",
        }
    }

    pub fn description(&self) -> String {
        match self {
            DenialReason::PromotionInProgress => {
                "a failover or switchover is already in progress".to_string()
            }
            DenialReason::NoLeader => "no leader discovered, skipping failover check".to_string(),
            DenialReason::NoCandidate => "no candidate found among the replicas".to_string(),
            DenialReason::Cooldown { remaining_secs } => format!(
                "previous failover too recent, {}s left before the next one",
                remaining_secs
            ),
            DenialReason::ErrantTransactions { node, gtids } => {
                format!("replica {} has errant transactions: {}", node, gtids)
            }
            DenialReason::ClusterStateMismatch { node } => {
                format!("node {} reports a different cluster state identifier", node)
            }
            DenialReason::FailCountNotReached { count, max_fail } => format!(
                "leader failed {} of {} consecutive checks",
                count, max_fail
            ),
            DenialReason::FailLimitReached { limit } => {
                format!("failover limit of {} reached, operator action required", limit)
            }
            DenialReason::NotArbitrationWinner => {
                "arbitrator placed this coordinator in standby".to_string()
            }
            DenialReason::Interactive => {
                "interactive mode, failover must be triggered by an operator".to_string()
            }
            DenialReason::LeaderNotFailed => "leader is alive".to_string(),
            DenialReason::FirstSnapshot => {
                "leader never seen alive since start and unsafe restart is disabled".to_string()
            }
            DenialReason::ArbitratorUnreachable => {
                "arbitrator unreachable, majority cannot be confirmed".to_string()
            }
        }
    }

    /// Severity of the diagnostic; `Trace` denials are the healthy steady state.
    pub fn severity(&self) -> Severity {
        match self {
            DenialReason::LeaderNotFailed
            | DenialReason::FailCountNotReached { .. }
            | DenialReason::NoLeader => Severity::Trace,
            DenialReason::PromotionInProgress | DenialReason::Interactive => Severity::Warn,
            _ => Severity::Error,
        }
    }
}

/// Outcome of one gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateVerdict {
    /// Every check passed: the suppressors run next.
    Proceed,
    Denied(DenialReason),
}

impl GateVerdict {
    pub fn is_proceed(&self) -> bool {
        matches!(self, GateVerdict::Proceed)
    }

    pub fn denial_reason(&self) -> Option<&DenialReason> {
        match self {
            GateVerdict::Denied(reason) => Some(reason),
            GateVerdict::Proceed => None,
        }
    }

    pub fn explain(&self) -> String {
        match self {
            GateVerdict::Proceed => "failover allowed: every precondition holds".to_string(),
            GateVerdict::Denied(reason) => {
                format!("failover denied: {} ({})", reason.description(), reason.code())
            }
        }
    }
}

/// Verdict plus the diagnostic the caller merges into the cluster journal.
#[derive(Debug, Clone)]
pub struct GateEvaluation {
    pub verdict: GateVerdict,
    /// Severity the denial is reported at; `Trace` when the gate proceeds.
    pub severity: Severity,
    pub diagnostics: DiagnosticBuffer,
}

pub struct PreconditionGate<'a> {
    cluster: &'a Cluster,
    guard: &'a FailoverGuard,
}

impl<'a> PreconditionGate<'a> {
    pub fn new(cluster: &'a Cluster, guard: &'a FailoverGuard) -> Self {
        Self { cluster, guard }
    }

    pub fn evaluate(&self, now: DateTime<Utc>) -> GateEvaluation {
        self.evaluate_with(now, true)
    }

    /// Evaluation for a caller already holding the promotion permit; the
    /// mutual-exclusion check is skipped, every other check runs.
    pub fn reevaluate(&self, now: DateTime<Utc>) -> GateEvaluation {
        self.evaluate_with(now, false)
    }

    fn evaluate_with(&self, now: DateTime<Utc>, check_guard: bool) -> GateEvaluation {
        let verdict = match self.first_denial(now, check_guard) {
            Some(reason) => GateVerdict::Denied(reason),
            None => GateVerdict::Proceed,
        };
        let severity = match &verdict {
            GateVerdict::Proceed => Severity::Trace,
            // nothing to promote is only an error once a promotion is needed
            GateVerdict::Denied(DenialReason::NoCandidate) if !self.cluster.leader_failed() => {
                Severity::Warn
            }
            GateVerdict::Denied(reason) => reason.severity(),
        };
        let mut diagnostics = DiagnosticBuffer::new();
        if let GateVerdict::Denied(reason) = &verdict {
            if severity >= Severity::Warn {
                diagnostics.push(severity, reason.code(), reason.description());
            }
        }
        GateEvaluation {
            verdict,
            severity,
            diagnostics,
        }
    }

    fn first_denial(&self, now: DateTime<Utc>, check_guard: bool) -> Option<DenialReason> {
        let cluster = self.cluster;
        let config = &cluster.config;

        // =====================================================================
        // Check 1: mutual exclusion
        // =====================================================================
        if check_guard && self.guard.is_in_progress() {
            return Some(DenialReason::PromotionInProgress);
        }

        let Some(leader) = cluster.leader() else {
            return Some(DenialReason::NoLeader);
        };

        // =====================================================================
        // Check 2: somebody can be elected (dry run, no logging)
        // =====================================================================
        if CandidateElector::new(cluster)
            .silent()
            .elect(ElectionKind::Failover)
            .is_none()
        {
            return Some(DenialReason::NoCandidate);
        }

        // =====================================================================
        // Check 3: cooldown since the last failover
        // =====================================================================
        if let Some(remaining) = cluster.cooldown_remaining(now) {
            return Some(DenialReason::Cooldown {
                remaining_secs: remaining.num_seconds(),
            });
        }

        // =====================================================================
        // Check 4: errant transactions on replicas
        // =====================================================================
        if let Some(reason) = self.errant_transactions() {
            return Some(reason);
        }

        // =====================================================================
        // Check 5: multi-leader nodes agree on the cluster state
        // =====================================================================
        if config.topology.is_multi_leader() {
            let mut ids = cluster
                .nodes()
                .iter()
                .filter(|n| !n.is_failed())
                .filter_map(|n| n.state.cluster_state_id.as_ref().map(|id| (n, id)));
            if let Some((_, first)) = ids.next() {
                if let Some((node, _)) = ids.find(|(_, id)| *id != first) {
                    return Some(DenialReason::ClusterStateMismatch { node: node.url() });
                }
            }
        }

        // =====================================================================
        // Check 6: the leader failed enough consecutive refreshes
        // =====================================================================
        if leader.fail_count < config.max_fail {
            return Some(DenialReason::FailCountNotReached {
                count: leader.fail_count,
                max_fail: config.max_fail,
            });
        }

        // =====================================================================
        // Check 7: lifetime failover budget
        // =====================================================================
        if config.fail_limit > 0 && cluster.failover_ctr() >= config.fail_limit {
            return Some(DenialReason::FailLimitReached {
                limit: config.fail_limit,
            });
        }

        // =====================================================================
        // Check 8: arbitration verdict
        // =====================================================================
        if config.arbitration.enabled && cluster.status() != MonitorStatus::Active {
            return Some(DenialReason::NotArbitrationWinner);
        }

        // =====================================================================
        // Check 9: automatic mode
        // =====================================================================
        if !config.is_automatic() {
            return Some(DenialReason::Interactive);
        }

        // =====================================================================
        // Check 10: the leader is observed failed
        // =====================================================================
        if !leader.is_failed() {
            return Some(DenialReason::LeaderNotFailed);
        }

        // =====================================================================
        // Check 11: not the first snapshot, unless unsafe restart is allowed
        // =====================================================================
        if !config.fail_restart_unsafe && !cluster.leader_seen_alive() {
            return Some(DenialReason::FirstSnapshot);
        }

        // =====================================================================
        // Check 12: arbitrator reachable
        // =====================================================================
        if config.arbitration.enabled && cluster.arbitrator_failed() {
            return Some(DenialReason::ArbitratorUnreachable);
        }

        None
    }

    /// First replica holding transactions unknown to, or ahead of, the leader.
    ///
    /// Sequences ahead under the leader's own origin are not errant: the
    /// leader's position is its last snapshot before it failed, and replicas
    /// may have applied more of its binlog since. MySQL origins are source
    /// uuids the leader's numeric server id cannot be matched against, so
    /// there only unknown origins count.
    fn errant_transactions(&self) -> Option<DenialReason> {
        let cluster = self.cluster;
        let leader = cluster.leader()?;
        let leader_gtids = &leader.state.gtid_binlog_pos;
        if leader_gtids.is_empty() {
            return None;
        }
        let own_origin = leader.state.server_id;
        let unknown_origin_only = leader.uses_mysql_gtid();
        for idx in cluster.replica_indices() {
            let node = &cluster.nodes()[idx];
            if !node.has_gtid() || node.flags.relay_only {
                continue;
            }
            let errant: Vec<String> = node
                .state
                .gtid_binlog_pos
                .errant_against(leader_gtids)
                .into_iter()
                .filter(|g| {
                    let known = leader_gtids
                        .iter()
                        .any(|l| l.domain_id == g.domain_id && l.server_id == g.server_id);
                    if unknown_origin_only {
                        !known
                    } else {
                        !known || g.server_id != own_origin
                    }
                })
                .map(|g| g.to_string())
                .collect();
            if !errant.is_empty() {
                return Some(DenialReason::ErrantTransactions {
                    node: node.url(),
                    gtids: errant.join(","),
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{NodeConfig, ReplmgrConfig};
    use crate::topology::sandbox::{leader_state, replica_state};
    use crate::topology::{DriverError, GtidList, NodeAddr};

    /// Automatic cluster whose leader db1 failed `max_fail` times after being seen alive.
    fn failed_cluster() -> Cluster {
        let nodes = vec![
            NodeConfig::new("db1", 3306),
            NodeConfig::new("db2", 3306),
            NodeConfig::new("db3", 3306),
        ];
        let mut config = ReplmgrConfig::with_nodes("shard1", nodes);
        config.failover.interactive = false;
        config.failover.max_fail = 2;
        let mut cluster = Cluster::from_config(&config);

        let leader = NodeAddr::new("db1", 3306);
        cluster.set_initial_leader(0);
        cluster.record_refresh(0, Ok(leader_state(1, "0-1-100")));
        cluster.record_refresh(1, Ok(replica_state(&leader, 2, "0-1-100")));
        cluster.record_refresh(2, Ok(replica_state(&leader, 3, "0-1-90")));
        for _ in 0..2 {
            cluster.record_refresh(0, Err(DriverError::unreachable("db1:3306", "down")));
        }
        cluster
    }

    fn evaluate(cluster: &Cluster) -> GateVerdict {
        PreconditionGate::new(cluster, &FailoverGuard::new())
            .evaluate(Utc::now())
            .verdict
    }

    #[test]
    fn test_all_checks_pass() {
        let cluster = failed_cluster();
        assert_eq!(evaluate(&cluster), GateVerdict::Proceed);
    }

    #[test]
    fn test_in_progress_blocks_first() {
        let mut cluster = failed_cluster();
        cluster.config.interactive = true;
        let guard = Arc::new(FailoverGuard::new());
        let _permit = guard.try_acquire().unwrap();

        let evaluation = PreconditionGate::new(&cluster, &guard).evaluate(Utc::now());
        assert_eq!(
            evaluation.verdict,
            GateVerdict::Denied(DenialReason::PromotionInProgress)
        );
        assert!(evaluation
            .diagnostics
            .contains_code("GATE_PROMOTION_IN_PROGRESS"));
    }

    #[test]
    fn test_cooldown_blocks_second_failover() {
        let mut cluster = failed_cluster();
        cluster.config.fail_time_secs = 60;
        cluster.record_failover(Utc::now());

        match evaluate(&cluster) {
            GateVerdict::Denied(DenialReason::Cooldown { remaining_secs }) => {
                assert!(remaining_secs > 0 && remaining_secs <= 60)
            }
            other => panic!("expected cooldown, got {:?}", other),
        }
    }

    #[test]
    fn test_fail_count_below_threshold() {
        let mut cluster = failed_cluster();
        cluster.config.max_fail = 3;
        let verdict = evaluate(&cluster);
        assert_eq!(
            verdict,
            GateVerdict::Denied(DenialReason::FailCountNotReached {
                count: 2,
                max_fail: 3
            })
        );
    }

    #[test]
    fn test_fail_limit_reached() {
        let mut cluster = failed_cluster();
        cluster.config.fail_limit = 1;
        cluster.config.fail_time_secs = 0;
        cluster.record_failover(Utc::now());
        assert_eq!(
            evaluate(&cluster),
            GateVerdict::Denied(DenialReason::FailLimitReached { limit: 1 })
        );
    }

    #[test]
    fn test_interactive_mode_blocks() {
        let mut cluster = failed_cluster();
        cluster.config.interactive = true;
        let verdict = evaluate(&cluster);
        assert_eq!(verdict, GateVerdict::Denied(DenialReason::Interactive));
        assert!(verdict.explain().contains("GATE_INTERACTIVE"));
    }

    #[test]
    fn test_healthy_leader_denial_is_quiet() {
        let mut cluster = failed_cluster();
        cluster.record_refresh(0, Ok(leader_state(1, "0-1-100")));
        cluster.config.max_fail = 0;

        let evaluation = PreconditionGate::new(&cluster, &FailoverGuard::new()).evaluate(Utc::now());
        assert_eq!(
            evaluation.verdict,
            GateVerdict::Denied(DenialReason::LeaderNotFailed)
        );
        assert!(evaluation.diagnostics.entries().is_empty());
    }

    #[test]
    fn test_no_candidate_when_all_ignored() {
        let mut cluster = failed_cluster();
        for idx in 1..3 {
            cluster.node_mut(idx).unwrap().flags.ignored = true;
        }
        assert_eq!(evaluate(&cluster), GateVerdict::Denied(DenialReason::NoCandidate));
    }

    #[test]
    fn test_errant_transaction_from_unknown_origin() {
        let mut cluster = failed_cluster();
        cluster.node_mut(2).unwrap().state.gtid_binlog_pos =
            GtidList::parse_mariadb("0-1-90,0-3-7").unwrap();

        match evaluate(&cluster) {
            GateVerdict::Denied(DenialReason::ErrantTransactions { node, gtids }) => {
                assert_eq!(node, "db3:3306");
                assert_eq!(gtids, "0-3-7");
            }
            other => panic!("expected errant transactions, got {:?}", other),
        }
    }

    #[test]
    fn test_replica_ahead_of_stale_leader_is_not_errant() {
        let mut cluster = failed_cluster();
        cluster.node_mut(1).unwrap().state.gtid_binlog_pos =
            GtidList::parse_mariadb("0-1-105").unwrap();
        assert_eq!(evaluate(&cluster), GateVerdict::Proceed);
    }

    #[test]
    fn test_replica_ahead_under_foreign_known_origin_is_errant() {
        let mut cluster = failed_cluster();
        cluster.node_mut(0).unwrap().state.gtid_binlog_pos =
            GtidList::parse_mariadb("0-1-100,0-3-5").unwrap();
        cluster.node_mut(2).unwrap().state.gtid_binlog_pos =
            GtidList::parse_mariadb("0-1-90,0-3-9").unwrap();

        match evaluate(&cluster) {
            GateVerdict::Denied(DenialReason::ErrantTransactions { node, gtids }) => {
                assert_eq!(node, "db3:3306");
                assert_eq!(gtids, "0-3-9");
            }
            other => panic!("expected errant transactions, got {:?}", other),
        }
    }

    #[test]
    fn test_no_candidate_is_warning_while_leader_healthy() {
        let mut cluster = failed_cluster();
        cluster.record_refresh(0, Ok(leader_state(1, "0-1-100")));
        for idx in 1..3 {
            cluster.node_mut(idx).unwrap().flags.ignored = true;
        }

        let evaluation = PreconditionGate::new(&cluster, &FailoverGuard::new()).evaluate(Utc::now());
        assert_eq!(
            evaluation.verdict,
            GateVerdict::Denied(DenialReason::NoCandidate)
        );
        assert_eq!(evaluation.severity, Severity::Warn);
        assert_eq!(
            evaluation.diagnostics.entries()[0].severity,
            Severity::Warn.as_str()
        );
    }

    #[test]
    fn test_no_candidate_is_error_once_leader_failed() {
        let mut cluster = failed_cluster();
        for idx in 1..3 {
            cluster.node_mut(idx).unwrap().flags.ignored = true;
        }

        let evaluation = PreconditionGate::new(&cluster, &FailoverGuard::new()).evaluate(Utc::now());
        assert_eq!(evaluation.severity, Severity::Error);
        assert!(evaluation.diagnostics.contains_code("GATE_NO_CANDIDATE"));
    }

    #[test]
    fn test_reevaluate_skips_only_mutual_exclusion() {
        let mut cluster = failed_cluster();
        let guard = Arc::new(FailoverGuard::new());
        let _permit = guard.try_acquire().unwrap();

        let gate = PreconditionGate::new(&cluster, &guard);
        assert_eq!(gate.reevaluate(Utc::now()).verdict, GateVerdict::Proceed);

        cluster.config.arbitration.enabled = true;
        cluster.set_status(MonitorStatus::Standby);
        let evaluation = PreconditionGate::new(&cluster, &guard).reevaluate(Utc::now());
        assert_eq!(
            evaluation.verdict,
            GateVerdict::Denied(DenialReason::NotArbitrationWinner)
        );
    }

    #[test]
    fn test_first_snapshot_requires_unsafe_restart() {
        let nodes = vec![NodeConfig::new("db1", 3306), NodeConfig::new("db2", 3306)];
        let mut config = ReplmgrConfig::with_nodes("shard1", nodes);
        config.failover.interactive = false;
        config.failover.max_fail = 1;
        let mut cluster = Cluster::from_config(&config);
        cluster.set_initial_leader(0);
        cluster.record_refresh(0, Err(DriverError::unreachable("db1:3306", "down")));
        cluster.record_refresh(
            1,
            Ok(replica_state(&NodeAddr::new("db1", 3306), 2, "0-1-10")),
        );

        assert_eq!(evaluate(&cluster), GateVerdict::Denied(DenialReason::FirstSnapshot));

        cluster.config.fail_restart_unsafe = true;
        assert_eq!(evaluate(&cluster), GateVerdict::Proceed);
    }

    #[test]
    fn test_arbitration_checks() {
        let mut cluster = failed_cluster();
        cluster.config.arbitration.enabled = true;
        cluster.config.arbitration.url = "http://arbitrator:10001".to_string();

        cluster.set_status(MonitorStatus::Standby);
        assert_eq!(
            evaluate(&cluster),
            GateVerdict::Denied(DenialReason::NotArbitrationWinner)
        );

        cluster.set_status(MonitorStatus::Active);
        cluster.set_arbitrator_failed(true);
        assert_eq!(
            evaluate(&cluster),
            GateVerdict::Denied(DenialReason::ArbitratorUnreachable)
        );
    }

    #[test]
    fn test_cluster_state_mismatch_in_multi_leader() {
        let mut cluster = failed_cluster();
        cluster.config.topology = crate::config::TopologyKind::MultiLeader;
        for idx in 1..3 {
            let node = cluster.node_mut(idx).unwrap();
            node.state.read_only = true;
            node.state.cluster_state_id = Some(format!("uuid-{}", idx));
        }
        match evaluate(&cluster) {
            GateVerdict::Denied(DenialReason::ClusterStateMismatch { node }) => {
                assert_eq!(node, "db3:3306")
            }
            other => panic!("expected cluster state mismatch, got {:?}", other),
        }
    }
}
