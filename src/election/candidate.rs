//! Election candidate records
//!
//! A `CandidateRecord` is built fresh for every election and dropped with
//! it. Exclusions are a set of named reasons rather than a chain of flags so
//! that every reason a node lost is visible in the audit matrix.

use serde::ser::{Serialize, SerializeSeq, Serializer};

use crate::topology::ReplicationStats;

/// Why a node cannot win an election.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExclusionReason {
    /// Operator marked the node as never-promote.
    Ignored,
    RelayOnly,
    /// Another writable leader in a multi-leader topology.
    MultiLeaderConflict,
    /// No replication status and unsafe restart not allowed.
    ReplicationBroken,
    NoBinaryLog,
    Maintenance,
    DelayExceeded,
    SqlThreadStopped,
    SemiSyncOutOfSync,
    BinlogFilterMismatch,
    ReplicationFilterMismatch,
    GtidNotInSync,
    /// Replica reports no lag value, its threads are stopped.
    ReplicaStopped,
}

impl ExclusionReason {
    pub const ALL: [ExclusionReason; 13] = [
        ExclusionReason::Ignored,
        ExclusionReason::RelayOnly,
        ExclusionReason::MultiLeaderConflict,
        ExclusionReason::ReplicationBroken,
        ExclusionReason::NoBinaryLog,
        ExclusionReason::Maintenance,
        ExclusionReason::DelayExceeded,
        ExclusionReason::SqlThreadStopped,
        ExclusionReason::SemiSyncOutOfSync,
        ExclusionReason::BinlogFilterMismatch,
        ExclusionReason::ReplicationFilterMismatch,
        ExclusionReason::GtidNotInSync,
        ExclusionReason::ReplicaStopped,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }

    pub fn code(&self) -> &'static str {
        match self {
            ExclusionReason::Ignored => "ignored",
            ExclusionReason::RelayOnly => "relay_only",
            ExclusionReason::MultiLeaderConflict => "multi_leader_conflict",
            ExclusionReason::ReplicationBroken => "replication_broken",
            ExclusionReason::NoBinaryLog => "no_binary_log",
            ExclusionReason::Maintenance => "maintenance",
            ExclusionReason::DelayExceeded => "delay_exceeded",
            ExclusionReason::SqlThreadStopped => "sql_thread_stopped",
            ExclusionReason::SemiSyncOutOfSync => "semi_sync_out_of_sync",
            ExclusionReason::BinlogFilterMismatch => "binlog_filter_mismatch",
            ExclusionReason::ReplicationFilterMismatch => "replication_filter_mismatch",
            ExclusionReason::GtidNotInSync => "gtid_not_in_sync",
            ExclusionReason::ReplicaStopped => "replica_stopped",
        }
    }
}

/// A set of exclusion reasons.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExclusionSet(u16);

impl ExclusionSet {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, reason: ExclusionReason) {
        self.0 |= reason.bit();
    }

    pub fn contains(&self, reason: ExclusionReason) -> bool {
        self.0 & reason.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Only the operator's ignore flag stands in the way.
    pub fn is_only_ignored(&self) -> bool {
        self.0 == ExclusionReason::Ignored.bit()
    }

    pub fn iter(&self) -> impl Iterator<Item = ExclusionReason> + '_ {
        ExclusionReason::ALL.into_iter().filter(|r| self.contains(*r))
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.iter().map(|r| r.code()).collect()
    }
}

impl Serialize for ExclusionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(None)?;
        for reason in self.iter() {
            seq.serialize_element(reason.code())?;
        }
        seq.end()
    }
}

/// One node under consideration in one election.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CandidateRecord {
    /// Roster index.
    pub index: usize,
    pub url: String,
    /// Sum of GTID sequence numbers across domains.
    pub seq: u64,
    /// Binlog file number and zero-padded offset as one integer.
    pub pos: u64,
    /// Takes part in the maximum computation.
    pub scored: bool,
    pub preferred: bool,
    pub exclusions: ExclusionSet,
    pub stats: ReplicationStats,
}

impl CandidateRecord {
    pub fn new(index: usize, url: impl Into<String>) -> Self {
        Self {
            index,
            url: url.into(),
            seq: 0,
            pos: 0,
            scored: false,
            preferred: false,
            exclusions: ExclusionSet::new(),
            stats: ReplicationStats::default(),
        }
    }

    pub fn exclude(&mut self, reason: ExclusionReason) {
        self.exclusions.insert(reason);
    }

    pub fn is_eligible(&self) -> bool {
        self.scored && self.exclusions.is_empty()
    }

    pub fn is_last_resort(&self) -> bool {
        self.scored && self.exclusions.is_only_ignored()
    }
}
