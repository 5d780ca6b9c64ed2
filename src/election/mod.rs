//! Candidate election
//!
//! Given the cluster snapshot, rank the replicas and pick the node to
//! promote, or report that none is eligible.
//!
//! - `CandidateRecord` / `ExclusionSet`: per-node ephemeral election state
//! - `Ranking`: comparator built from an ordered list of tie-break rules
//! - `CandidateElector`: failover, switchover and virtual (ring) variants

mod candidate;
mod elector;
mod ranking;

pub use candidate::{CandidateRecord, ExclusionReason, ExclusionSet};
pub use elector::{CandidateElector, Election, ElectionBasis, ElectionKind};
pub use ranking::{Ranking, Score, TieBreak};
