//! Promotion report
//!
//! Returned by every run that got past the commit point. A report lists the
//! remote steps that failed and the replicas that ended up repointed,
//! held in maintenance or left alone, so a half-wired topology is visible.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::election::{ElectionBasis, ElectionKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionOutcome {
    /// Every phase ran.
    Completed,
    /// Phases were cut short or replicas were held in maintenance.
    Degraded,
}

/// One remote operation that failed after the commit point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub phase: &'static str,
    pub node: String,
    pub op: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromotionReport {
    pub id: Uuid,
    pub kind: ElectionKind,
    pub elected: String,
    pub basis: Option<ElectionBasis>,
    pub last_resort: bool,
    pub old_leader: Option<String>,
    pub outcome: PromotionOutcome,
    pub failures: Vec<StepFailure>,
    pub repointed: Vec<String>,
    pub held: Vec<String>,
    pub skipped: Vec<String>,
    /// Ring child repointed at the old leader's upstream.
    pub ring_closed: Option<String>,
    pub crash_record: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PromotionReport {
    pub fn new(kind: ElectionKind, elected: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            elected: elected.into(),
            basis: None,
            last_resort: false,
            old_leader: None,
            outcome: PromotionOutcome::Completed,
            failures: Vec::new(),
            repointed: Vec::new(),
            held: Vec::new(),
            skipped: Vec::new(),
            ring_closed: None,
            crash_record: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.outcome == PromotionOutcome::Degraded
    }

    pub fn failures_for(&self, node: &str) -> Vec<&StepFailure> {
        self.failures.iter().filter(|f| f.node == node).collect()
    }
}
