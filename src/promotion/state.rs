//! Promotion State Machine
//!
//! - Phases are explicit and enumerable
//! - Each transition consumes the previous state
//! - The only exits before `Committed` are `Aborted`
//! - Once committed, the run always reaches `Completed`
//!
//! The orchestrator drives this machine; a transition it did not expect is a
//! programming error and surfaces as `ForbiddenTransition`.

use super::errors::{PromotionError, PromotionErrorKind, PromotionResult};
use crate::election::ElectionKind;

/// Promotion phases, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionState {
    /// No promotion running.
    Idle,

    /// Guard held; quiescing (switchover) and electing.
    Electing { kind: ElectionKind },

    /// The leader reference moved to `leader`.
    Committed { kind: ElectionKind, leader: usize },

    /// Candidate drained its relay log; crash record written.
    CatchingUp { kind: ElectionKind, leader: usize },

    /// New leader opened for writes.
    Activating { kind: ElectionKind, leader: usize },

    /// Old leader repointed (switchover only).
    DemotingOldLeader { kind: ElectionKind, leader: usize },

    /// Remaining replicas repointed, or the ring closed.
    Rewiring { kind: ElectionKind, leader: usize },

    /// Counters and timestamps updated.
    Bookkeeping { kind: ElectionKind, leader: usize },

    /// Terminal: the run finished after the commit point.
    Completed { kind: ElectionKind, leader: usize },

    /// Terminal: the run stopped before the commit point; nothing changed.
    Aborted {
        kind: ElectionKind,
        reason: PromotionErrorKind,
    },
}

impl Default for PromotionState {
    fn default() -> Self {
        Self::new()
    }
}

impl PromotionState {
    pub fn new() -> Self {
        Self::Idle
    }

    /// Get the state name for observability.
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Electing { .. } => "Electing",
            Self::Committed { .. } => "Committed",
            Self::CatchingUp { .. } => "CatchingUp",
            Self::Activating { .. } => "Activating",
            Self::DemotingOldLeader { .. } => "DemotingOldLeader",
            Self::Rewiring { .. } => "Rewiring",
            Self::Bookkeeping { .. } => "Bookkeeping",
            Self::Completed { .. } => "Completed",
            Self::Aborted { .. } => "Aborted",
        }
    }

    /// Whether the leader reference has already moved.
    pub fn is_committed(&self) -> bool {
        !matches!(
            self,
            Self::Idle | Self::Electing { .. } | Self::Aborted { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Aborted { .. })
    }

    /// Node the run committed to, once known.
    pub fn leader(&self) -> Option<usize> {
        match self {
            Self::Committed { leader, .. }
            | Self::CatchingUp { leader, .. }
            | Self::Activating { leader, .. }
            | Self::DemotingOldLeader { leader, .. }
            | Self::Rewiring { leader, .. }
            | Self::Bookkeeping { leader, .. }
            | Self::Completed { leader, .. } => Some(*leader),
            _ => None,
        }
    }

    // ==================
    // Transitions
    // ==================

    /// Idle → Electing
    pub fn begin(self, kind: ElectionKind) -> PromotionResult<Self> {
        match self {
            Self::Idle => Ok(Self::Electing { kind }),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Electing")),
        }
    }

    /// Electing → Aborted
    pub fn abort(self, reason: PromotionErrorKind) -> PromotionResult<Self> {
        match self {
            Self::Electing { kind } => Ok(Self::Aborted { kind, reason }),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Aborted")),
        }
    }

    /// Electing → Committed
    pub fn commit(self, leader: usize) -> PromotionResult<Self> {
        match self {
            Self::Electing { kind } => Ok(Self::Committed { kind, leader }),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Committed")),
        }
    }

    /// Committed → CatchingUp
    pub fn catch_up(self) -> PromotionResult<Self> {
        match self {
            Self::Committed { kind, leader } => Ok(Self::CatchingUp { kind, leader }),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "CatchingUp")),
        }
    }

    /// CatchingUp → Activating
    pub fn activate(self) -> PromotionResult<Self> {
        match self {
            Self::CatchingUp { kind, leader } => Ok(Self::Activating { kind, leader }),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Activating")),
        }
    }

    /// Activating → DemotingOldLeader
    pub fn demote_old_leader(self) -> PromotionResult<Self> {
        match self {
            Self::Activating { kind, leader } => Ok(Self::DemotingOldLeader { kind, leader }),
            _ => Err(PromotionError::forbidden_transition(
                self.state_name(),
                "DemotingOldLeader",
            )),
        }
    }

    /// DemotingOldLeader → Rewiring
    pub fn rewire(self) -> PromotionResult<Self> {
        match self {
            Self::DemotingOldLeader { kind, leader } => Ok(Self::Rewiring { kind, leader }),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Rewiring")),
        }
    }

    /// Rewiring → Bookkeeping
    pub fn bookkeep(self) -> PromotionResult<Self> {
        match self {
            Self::Rewiring { kind, leader } => Ok(Self::Bookkeeping { kind, leader }),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Bookkeeping")),
        }
    }

    /// Bookkeeping → Completed
    pub fn complete(self) -> PromotionResult<Self> {
        match self {
            Self::Bookkeeping { kind, leader } => Ok(Self::Completed { kind, leader }),
            _ => Err(PromotionError::forbidden_transition(self.state_name(), "Completed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================
    // Allowed transitions
    // ==================

    #[test]
    fn test_full_run_reaches_completed() {
        let state = PromotionState::new()
            .begin(ElectionKind::Failover)
            .and_then(|s| s.commit(2))
            .and_then(|s| s.catch_up())
            .and_then(|s| s.activate())
            .and_then(|s| s.demote_old_leader())
            .and_then(|s| s.rewire())
            .and_then(|s| s.bookkeep())
            .and_then(|s| s.complete())
            .unwrap();

        assert_eq!(
            state,
            PromotionState::Completed {
                kind: ElectionKind::Failover,
                leader: 2
            }
        );
        assert!(state.is_terminal());
        assert_eq!(state.leader(), Some(2));
    }

    #[test]
    fn test_electing_to_aborted() {
        let state = PromotionState::Idle
            .begin(ElectionKind::Switchover)
            .unwrap()
            .abort(PromotionErrorKind::QuiesceTimeout)
            .unwrap();

        assert!(state.is_terminal());
        assert!(!state.is_committed());
        assert_eq!(state.leader(), None);
    }

    #[test]
    fn test_committed_flag() {
        let electing = PromotionState::Idle.begin(ElectionKind::Failover).unwrap();
        assert!(!electing.is_committed());
        let committed = electing.commit(0).unwrap();
        assert!(committed.is_committed());
        assert_eq!(committed.state_name(), "Committed");
    }

    // ==================
    // Forbidden transitions
    // ==================

    #[test]
    fn test_cannot_abort_after_commit() {
        let committed = PromotionState::Committed {
            kind: ElectionKind::Failover,
            leader: 1,
        };
        let err = committed.abort(PromotionErrorKind::NoCandidate).unwrap_err();
        assert_eq!(err.kind, PromotionErrorKind::ForbiddenTransition);
        assert!(err.message.contains("Committed → Aborted"));
    }

    #[test]
    fn test_cannot_commit_from_idle() {
        let err = PromotionState::Idle.commit(1).unwrap_err();
        assert_eq!(err.kind, PromotionErrorKind::ForbiddenTransition);
    }

    #[test]
    fn test_cannot_skip_phases() {
        let committed = PromotionState::Committed {
            kind: ElectionKind::Switchover,
            leader: 1,
        };
        assert!(committed.clone().rewire().is_err());
        assert!(committed.clone().complete().is_err());
        assert!(committed.activate().is_err());
    }

    #[test]
    fn test_cannot_begin_twice() {
        let electing = PromotionState::Idle.begin(ElectionKind::Failover).unwrap();
        assert!(electing.begin(ElectionKind::Failover).is_err());
    }
}
