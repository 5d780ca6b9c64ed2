//! Promotion Subsystem
//!
//! Moves the leader role to an elected replica and rewires everything else
//! around it.
//!
//! - One promotion at a time, enforced by `FailoverGuard`
//! - States are explicit and transitions consume the previous state
//! - Nothing commits before the election succeeded; after the commit the
//!   run always reaches bookkeeping
//! - Remote failures after the commit are reported, never inferred away
//! - Every promotion leaves a crash record

mod addressing;
mod crash;
mod errors;
mod guard;
mod hooks;
mod notifier;
mod orchestrator;
mod report;
mod ring;
mod state;

pub use addressing::{
    needs_gtid_seed, old_leader_mode, relay_mode, replica_plan, ring_mode, RepointPlan,
    ReplicationAddressingMode,
};
pub use crash::{CrashRecord, CrashStore, CrashStoreError, CrashStoreResult};
pub use errors::{PromotionError, PromotionErrorKind, PromotionResult};
pub use guard::{FailoverGuard, FailoverPermit};
pub use hooks::{run_hook, HookArgs, HookError, HookOutput, HookStage};
pub use notifier::{
    NoopNotifier, Notification, NotifyError, RecordingNotifier, TopologyNotifier,
};
pub use orchestrator::PromotionOrchestrator;
pub use report::{PromotionOutcome, PromotionReport, StepFailure};
pub use state::PromotionState;
