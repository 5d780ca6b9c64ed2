//! Promotion Error Types
//!
//! A `PromotionError` is only ever returned before the commit point: once
//! the new leader is committed, remote failures are recorded in the
//! `PromotionReport` instead of unwinding the run.

use std::fmt;

/// Promotion error type
#[derive(Debug, Clone)]
pub struct PromotionError {
    /// Error kind
    pub kind: PromotionErrorKind,
    /// Error message
    pub message: String,
}

/// Promotion error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionErrorKind {
    /// Forbidden phase transition attempted
    ForbiddenTransition,

    /// Another failover or switchover holds the guard
    AlreadyInProgress,

    /// No leader is known for the cluster
    NoLeader,

    /// Switchover requested but the leader does not answer
    LeaderUnreachable,

    /// The elector found no eligible replica
    NoCandidate,

    /// Write transactions older than the switchover budget are running
    LongRunningWrites,

    /// The table flush did not finish inside the switchover budget
    QuiesceTimeout,
}

impl PromotionErrorKind {
    /// Diagnostic code surfaced to operators.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ForbiddenTransition => "PROMOTION_FORBIDDEN_TRANSITION",
            Self::AlreadyInProgress => "PROMOTION_IN_PROGRESS",
            Self::NoLeader => "PROMOTION_NO_LEADER",
            Self::LeaderUnreachable => "PROMOTION_LEADER_UNREACHABLE",
            Self::NoCandidate => "PROMOTION_NO_CANDIDATE",
            Self::LongRunningWrites => "PROMOTION_LONG_RUNNING_WRITES",
            Self::QuiesceTimeout => "PROMOTION_QUIESCE_TIMEOUT",
        }
    }
}

impl PromotionError {
    /// Create a new promotion error.
    pub fn new(kind: PromotionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create a forbidden transition error.
    pub fn forbidden_transition(from: &str, to: &str) -> Self {
        Self::new(
            PromotionErrorKind::ForbiddenTransition,
            format!("forbidden transition: {} → {}", from, to),
        )
    }

    pub fn already_in_progress() -> Self {
        Self::new(
            PromotionErrorKind::AlreadyInProgress,
            "a failover or switchover is already in progress",
        )
    }

    pub fn no_leader() -> Self {
        Self::new(PromotionErrorKind::NoLeader, "cluster has no known leader")
    }

    pub fn leader_unreachable(url: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            PromotionErrorKind::LeaderUnreachable,
            format!("leader {} cannot be quiesced: {}", url, reason),
        )
    }

    pub fn no_candidate() -> Self {
        Self::new(PromotionErrorKind::NoCandidate, "no eligible candidate found")
    }

    pub fn long_running_writes(count: u64, threshold_secs: u64) -> Self {
        Self::new(
            PromotionErrorKind::LongRunningWrites,
            format!(
                "{} write transaction(s) running longer than {}s on the leader",
                count, threshold_secs
            ),
        )
    }

    pub fn quiesce_timeout(secs: u64) -> Self {
        Self::new(
            PromotionErrorKind::QuiesceTimeout,
            format!("table flush did not complete within {}s", secs),
        )
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

impl fmt::Display for PromotionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PromotionError({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for PromotionError {}

/// Result type for promotion operations
pub type PromotionResult<T> = Result<T, PromotionError>;
