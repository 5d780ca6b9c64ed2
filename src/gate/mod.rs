//! Failover gate
//!
//! - `PreconditionGate`: the ordered checks an unattended failover must pass
//! - `FalsePositiveSuppressors`: last-chance probes that the leader is really down
//!
//! The gate never changes the cluster; callers merge its diagnostics.

mod precondition;
mod suppressors;

pub use precondition::{DenialReason, GateEvaluation, GateVerdict, PreconditionGate};
pub use suppressors::{
    FalsePositiveSuppressors, LoadBalancerError, LoadBalancerMonitor, Suppression,
};
