//! Cluster monitor
//!
//! - `ClusterHandle`: shared cluster state plus the collaborators that act on it
//! - `tick`: one observation and, when the gate allows it, one failover
//! - `spawn_monitor` / `spawn_arbitrator`: the two periodic tasks
//!
//! The monitoring loop is the only caller of the gate. Operator commands go
//! through the same handle and the same promotion permit.

mod handle;
mod runner;
mod tick;

pub use handle::ClusterHandle;
pub use runner::{spawn_arbitrator, spawn_monitor};
pub use tick::TickOutcome;
