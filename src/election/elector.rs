//! Candidate elector
//!
//! Pure function of the cluster snapshot: it reads the roster and returns an
//! `Election` describing the winner (if any), every candidate record and the
//! diagnostics produced on the way. Running it twice on the same snapshot
//! yields the same result.

use std::fmt;

use serde::Serialize;

use super::candidate::{CandidateRecord, ExclusionReason};
use super::ranking::{Ranking, Score};
use crate::config::TopologyKind;
use crate::observability::{DiagnosticBuffer, Event, Logger, Severity};
use crate::topology::{BinlogPosition, Cluster, Node};

/// Sequence sum given to a replica without replication status (`1-1-1`).
const SYNTHETIC_SEQ: u64 = 1;

/// Which promotion the election is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionKind {
    Failover,
    Switchover,
}

impl fmt::Display for ElectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionKind::Failover => write!(f, "failover"),
            ElectionKind::Switchover => write!(f, "switchover"),
        }
    }
}

/// How the winner was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionBasis {
    Sequence,
    Position,
    /// Switchover onto an electable preferred node.
    Preferred,
    /// First healthy peer in a ring or synchronous cluster.
    Virtual,
}

/// Outcome of one election.
#[derive(Debug, Clone, Serialize)]
pub struct Election {
    pub kind: ElectionKind,
    pub elected: Option<usize>,
    pub elected_url: Option<String>,
    pub basis: Option<ElectionBasis>,
    /// An ignored node won because it alone held the maximum score.
    pub last_resort: bool,
    /// Candidates in ranked order.
    pub candidates: Vec<CandidateRecord>,
    #[serde(skip)]
    pub diagnostics: DiagnosticBuffer,
}

impl Election {
    fn empty(kind: ElectionKind) -> Self {
        Self {
            kind,
            elected: None,
            elected_url: None,
            basis: None,
            last_resort: false,
            candidates: Vec::new(),
            diagnostics: DiagnosticBuffer::new(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.elected.is_none()
    }
}

/// Ranks replicas and picks the promotion candidate.
pub struct CandidateElector<'a> {
    cluster: &'a Cluster,
    silent: bool,
}

impl<'a> CandidateElector<'a> {
    pub fn new(cluster: &'a Cluster) -> Self {
        Self {
            cluster,
            silent: false,
        }
    }

    /// Dry-run mode: no log lines. Diagnostics are still collected.
    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn elect(&self, kind: ElectionKind) -> Election {
        let topology = self.cluster.config.topology;
        let mut election = match topology {
            TopologyKind::Ring | TopologyKind::Galera | TopologyKind::RelayTier => {
                self.elect_virtual(kind)
            }
            TopologyKind::LeaderReplica | TopologyKind::MultiLeader => self.elect_ranked(kind),
        };
        election.elected_url = election
            .elected
            .and_then(|i| self.cluster.node(i))
            .map(|n| n.url());
        self.log_outcome(&election);
        election
    }

    // ==================
    // Ranked election
    // ==================

    fn elect_ranked(&self, kind: ElectionKind) -> Election {
        let mut election = Election::empty(kind);
        let mut records: Vec<CandidateRecord> = self
            .cluster
            .replica_indices()
            .into_iter()
            .filter_map(|idx| self.cluster.node(idx).map(|n| self.build_record(idx, n, kind)))
            .collect();

        for record in &records {
            for reason in record.exclusions.iter() {
                election.diagnostics.push(
                    Severity::Warn,
                    "CANDIDATE_EXCLUDED",
                    format!("{} excluded from {}: {}", record.url, kind, reason.code()),
                );
                if !self.silent {
                    Logger::trace(
                        Event::CandidateExcluded.as_str(),
                        &[("node", record.url.as_str()), ("reason", reason.code())],
                    );
                }
            }
        }

        if kind == ElectionKind::Switchover {
            let rigged = records
                .iter()
                .filter(|r| r.preferred && r.is_eligible())
                .min_by(|a, b| Ranking::new(Score::Sequence, false).compare(a, b))
                .map(|r| r.index);
            if let Some(idx) = rigged {
                Ranking::new(Score::Sequence, false).sort(&mut records);
                election.elected = Some(idx);
                election.basis = Some(ElectionBasis::Preferred);
                election.candidates = records;
                return election;
            }
        }

        let use_stats = self.cluster.config.tie_break_on_replication_stats;
        let allow_last_resort =
            kind == ElectionKind::Failover && self.cluster.config.last_resort_ignored;

        for (score, basis) in [
            (Score::Sequence, ElectionBasis::Sequence),
            (Score::Position, ElectionBasis::Position),
        ] {
            let value = |r: &CandidateRecord| match score {
                Score::Sequence => r.seq,
                Score::Position => r.pos,
            };
            let max = records
                .iter()
                .filter(|r| r.scored)
                .map(value)
                .max()
                .unwrap_or(0);
            if max == 0 {
                continue;
            }
            Ranking::new(score, use_stats).sort(&mut records);
            let at_max = |r: &&CandidateRecord| r.scored && value(*r) == max;

            if let Some(winner) = records.iter().filter(at_max).find(|r| r.is_eligible()) {
                election.elected = Some(winner.index);
                election.basis = Some(basis);
            } else if allow_last_resort {
                if let Some(winner) = records.iter().filter(at_max).find(|r| r.is_last_resort()) {
                    election.elected = Some(winner.index);
                    election.basis = Some(basis);
                    election.last_resort = true;
                    election.diagnostics.push(
                        Severity::Warn,
                        "CANDIDATE_LAST_RESORT",
                        format!("{} is ignored but alone holds the most advanced position", winner.url),
                    );
                }
            }
            break;
        }

        election.candidates = records;
        election
    }

    fn build_record(&self, idx: usize, node: &Node, kind: ElectionKind) -> CandidateRecord {
        let config = &self.cluster.config;
        let mut record = CandidateRecord::new(idx, node.url());
        record.preferred = node.flags.preferred;
        record.stats = node.stats.clone();

        if node.flags.relay_only {
            record.exclude(ExclusionReason::RelayOnly);
            return record;
        }
        if config.topology.is_multi_leader() && !node.state.read_only {
            record.exclude(ExclusionReason::MultiLeaderConflict);
            return record;
        }
        let status = node.status();
        if status.is_none() {
            record.exclude(ExclusionReason::ReplicationBroken);
            if !config.fail_restart_unsafe {
                return record;
            }
        }

        self.check_electable(node, kind, &mut record);
        if kind == ElectionKind::Switchover {
            self.check_switchover(node, &mut record);
            // the leader is alive: only fully electable replicas compete
            if !record.exclusions.is_empty() {
                return record;
            }
        }

        let position = status
            .map(|s| s.read_position())
            .unwrap_or_else(BinlogPosition::synthetic);
        let Some(pos) = position.ordinal() else {
            return record;
        };
        record.pos = pos;
        record.seq = match status {
            None => SYNTHETIC_SEQ,
            Some(status) if self.cluster.leader_failed() => status.gtid_io_pos.seq_sum(),
            Some(_) if node.uses_mysql_gtid() => node.state.gtid_binlog_pos.seq_sum(),
            Some(_) => node.state.gtid_slave_pos.seq_sum(),
        };
        record.scored = true;
        record
    }

    /// Checks shared by failover and switchover.
    fn check_electable(&self, node: &Node, kind: ElectionKind, record: &mut CandidateRecord) {
        let config = &self.cluster.config;
        let checks = config.replication_checks;

        if !node.state.binlog_enabled {
            record.exclude(ExclusionReason::NoBinaryLog);
        }
        if node.flags.maintenance {
            record.exclude(ExclusionReason::Maintenance);
        }
        if let Some(status) = node.status() {
            let lag = status.seconds_behind.unwrap_or(0);
            if checks && config.fail_max_delay_secs.is_some_and(|max| lag > max) {
                record.exclude(ExclusionReason::DelayExceeded);
            }
            if checks && !status.sql_thread_running {
                record.exclude(ExclusionReason::SqlThreadStopped);
            }
        }
        let sync_required = match kind {
            ElectionKind::Failover => config.fail_sync,
            ElectionKind::Switchover => config.fail_sync || config.switch_sync,
        };
        if checks && sync_required && node.state.semi_sync_enabled && !node.state.semi_sync_in_sync {
            record.exclude(ExclusionReason::SemiSyncOutOfSync);
        }
        if node.flags.ignored {
            record.exclude(ExclusionReason::Ignored);
        }
    }

    /// Checks that need a reachable leader.
    fn check_switchover(&self, node: &Node, record: &mut CandidateRecord) {
        let config = &self.cluster.config;
        let Some(leader) = self.cluster.leader() else {
            return;
        };
        if config.check_binlog_filters && node.state.binlog_filters != leader.state.binlog_filters {
            record.exclude(ExclusionReason::BinlogFilterMismatch);
        }
        if config.check_replication_filters
            && node.state.replication_filters != leader.state.replication_filters
        {
            record.exclude(ExclusionReason::ReplicationFilterMismatch);
        }
        if config.switchover_gtid_check && config.replication_checks {
            let replica_pos = if node.uses_mysql_gtid() {
                &node.state.gtid_binlog_pos
            } else {
                &node.state.gtid_slave_pos
            };
            if !replica_pos.equivalent(&leader.state.gtid_binlog_pos) {
                record.exclude(ExclusionReason::GtidNotInSync);
            }
        }
        if config.replication_checks && node.status().is_some_and(|s| s.seconds_behind.is_none()) {
            record.exclude(ExclusionReason::ReplicaStopped);
        }
    }

    // ==================
    // Virtual election
    // ==================

    /// First non-ignored, non-failed node that is not the current leader.
    fn elect_virtual(&self, kind: ElectionKind) -> Election {
        let mut election = Election::empty(kind);
        let old = self
            .cluster
            .vleader_index()
            .or_else(|| self.cluster.leader_index());
        let old_server_id = old
            .and_then(|i| self.cluster.node(i))
            .map(|n| n.state.server_id);

        for (idx, node) in self.cluster.nodes().iter().enumerate() {
            let mut record = CandidateRecord::new(idx, node.url());
            record.preferred = node.flags.preferred;
            if node.flags.ignored {
                record.exclude(ExclusionReason::Ignored);
            }
            if node.flags.relay_only {
                record.exclude(ExclusionReason::RelayOnly);
            }
            let is_old = Some(idx) == old
                || old_server_id.is_some_and(|id| id != 0 && id == node.state.server_id);
            record.scored = !node.is_failed() && !is_old;
            if election.elected.is_none() && record.is_eligible() {
                election.elected = Some(idx);
                election.basis = Some(ElectionBasis::Virtual);
            }
            for reason in record.exclusions.iter() {
                election.diagnostics.push(
                    Severity::Warn,
                    "CANDIDATE_EXCLUDED",
                    format!("{} excluded from {}: {}", record.url, kind, reason.code()),
                );
            }
            election.candidates.push(record);
        }
        election
    }

    fn log_outcome(&self, election: &Election) {
        if self.silent {
            return;
        }
        let matrix = serde_json::to_string(&election.candidates).unwrap_or_default();
        let kind = election.kind.to_string();
        Logger::info(
            Event::ElectionStart.as_str(),
            &[("kind", kind.as_str()), ("matrix", matrix.as_str())],
        );
        match (&election.elected_url, election.basis) {
            (Some(url), Some(basis)) => {
                let basis = serde_json::to_string(&basis).unwrap_or_default();
                let event = if election.last_resort {
                    Event::CandidateLastResort
                } else {
                    Event::CandidateElected
                };
                Logger::log(
                    event.severity(),
                    event.as_str(),
                    &[
                        ("basis", basis.trim_matches('"')),
                        ("kind", kind.as_str()),
                        ("node", url.as_str()),
                    ],
                );
            }
            _ => Logger::error(Event::NoCandidate.as_str(), &[("kind", kind.as_str())]),
        }
    }
}
