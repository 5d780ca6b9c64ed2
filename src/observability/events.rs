//! Observable coordinator events
//!
//! Every log line emitted by the coordinator carries one of these codes so
//! that operators can grep a failover from gate verdict to finalize.

use std::fmt;

use super::logger::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    CoordinatorStart,
    ConfigLoaded,
    ConfigInvalid,
    HttpServing,
    FailoverModeChanged,
    Shutdown,

    // Monitoring
    NodeRefreshFailed,
    NodeRecovered,
    LeaderFailed,
    SplitBrainSuspected,
    SplitBrainCleared,
    MonitorTickFailed,

    // Precondition gate
    GateProceed,
    GateBlocked,
    FalsePositiveSuppressed,
    ProbeFailed,

    // Election
    ElectionStart,
    CandidateExcluded,
    CandidateScored,
    CandidateElected,
    CandidateLastResort,
    NoCandidate,

    // Promotion
    PromotionStart,
    PromotionPhase,
    PromotionAborted,
    LeaderCommitted,
    StepFailed,
    ReplicaRepointed,
    ReplicaSkipped,
    ReplicaMaintenance,
    RingClosed,
    PromotionComplete,
    PromotionDegraded,
    SwitchbackToPreferred,
    SwitchbackFailed,

    // Crash history
    CrashRecorded,
    CrashPurged,
    CrashStoreFailed,

    // Hooks and notifications
    HookExecuted,
    HookFailed,
    NotifyFailed,

    // Arbitration
    ArbitrationRequest,
    ArbitrationWon,
    ArbitrationLost,
    ArbitratorUnreachable,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::CoordinatorStart => "REPLMGR_STARTUP",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::ConfigInvalid => "CONFIG_INVALID",
            Event::HttpServing => "HTTP_SERVING",
            Event::FailoverModeChanged => "FAILOVER_MODE_CHANGED",
            Event::Shutdown => "REPLMGR_SHUTDOWN",

            Event::NodeRefreshFailed => "NODE_REFRESH_FAILED",
            Event::NodeRecovered => "NODE_RECOVERED",
            Event::LeaderFailed => "LEADER_FAILED",
            Event::SplitBrainSuspected => "SPLIT_BRAIN_SUSPECTED",
            Event::SplitBrainCleared => "SPLIT_BRAIN_CLEARED",
            Event::MonitorTickFailed => "MONITOR_TICK_FAILED",

            Event::GateProceed => "GATE_PROCEED",
            Event::GateBlocked => "GATE_BLOCKED",
            Event::FalsePositiveSuppressed => "FALSE_POSITIVE_SUPPRESSED",
            Event::ProbeFailed => "PROBE_FAILED",

            Event::ElectionStart => "ELECTION_BEGIN",
            Event::CandidateExcluded => "CANDIDATE_EXCLUDED",
            Event::CandidateScored => "CANDIDATE_SCORED",
            Event::CandidateElected => "CANDIDATE_ELECTED",
            Event::CandidateLastResort => "CANDIDATE_LAST_RESORT",
            Event::NoCandidate => "NO_CANDIDATE",

            Event::PromotionStart => "PROMOTION_BEGIN",
            Event::PromotionPhase => "PROMOTION_PHASE",
            Event::PromotionAborted => "PROMOTION_ABORTED",
            Event::LeaderCommitted => "LEADER_COMMITTED",
            Event::StepFailed => "PROMOTION_STEP_FAILED",
            Event::ReplicaRepointed => "REPLICA_REPOINTED",
            Event::ReplicaSkipped => "REPLICA_SKIPPED",
            Event::ReplicaMaintenance => "REPLICA_MAINTENANCE",
            Event::RingClosed => "RING_CLOSED",
            Event::PromotionComplete => "PROMOTION_COMPLETE",
            Event::PromotionDegraded => "PROMOTION_DEGRADED",
            Event::SwitchbackToPreferred => "SWITCHBACK_TO_PREFERRED",
            Event::SwitchbackFailed => "SWITCHBACK_FAILED",

            Event::CrashRecorded => "CRASH_RECORDED",
            Event::CrashPurged => "CRASH_PURGED",
            Event::CrashStoreFailed => "CRASH_STORE_FAILED",

            Event::HookExecuted => "HOOK_EXECUTED",
            Event::HookFailed => "HOOK_FAILED",
            Event::NotifyFailed => "NOTIFY_FAILED",

            Event::ArbitrationRequest => "ARBITRATION_REQUEST",
            Event::ArbitrationWon => "ARBITRATION_WON",
            Event::ArbitrationLost => "ARBITRATION_LOST",
            Event::ArbitratorUnreachable => "ARBITRATOR_UNREACHABLE",
        }
    }

    /// Default severity when the event is logged without an explicit one.
    pub fn severity(&self) -> Severity {
        match self {
            Event::ConfigInvalid => Severity::Fatal,
            Event::PromotionAborted
            | Event::CrashStoreFailed
            | Event::LeaderFailed
            | Event::NoCandidate => Severity::Error,
            Event::NodeRefreshFailed
            | Event::SplitBrainSuspected
            | Event::MonitorTickFailed
            | Event::GateBlocked
            | Event::FalsePositiveSuppressed
            | Event::ProbeFailed
            | Event::CandidateLastResort
            | Event::StepFailed
            | Event::ReplicaMaintenance
            | Event::PromotionDegraded
            | Event::SwitchbackFailed
            | Event::HookFailed
            | Event::NotifyFailed
            | Event::ArbitrationLost
            | Event::ArbitratorUnreachable => Severity::Warn,
            Event::CandidateExcluded | Event::CandidateScored => Severity::Trace,
            _ => Severity::Info,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
