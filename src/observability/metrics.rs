//! Coordinator counters
//!
//! - Counters only, monotonic
//! - Reset only on process start
//! - Relaxed atomics, readers tolerate slightly stale values

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters exposed on `/cluster/status`.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    monitor_ticks: AtomicU64,
    refresh_failures: AtomicU64,
    gate_blocks: AtomicU64,
    false_positives: AtomicU64,
    elections: AtomicU64,
    no_candidate: AtomicU64,
    failovers: AtomicU64,
    switchovers: AtomicU64,
    promotions_aborted: AtomicU64,
    promotions_degraded: AtomicU64,
    step_failures: AtomicU64,
    crashes_recorded: AtomicU64,
    arbitration_requests: AtomicU64,
    arbitration_lost: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_monitor_ticks(&self) {
        self.monitor_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_refresh_failures(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_gate_blocks(&self) {
        self.gate_blocks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_false_positives(&self) {
        self.false_positives.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_elections(&self) {
        self.elections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_no_candidate(&self) {
        self.no_candidate.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a completed promotion.
    pub fn record_promotion(&self, failover: bool) {
        if failover {
            self.failovers.fetch_add(1, Ordering::Relaxed);
        } else {
            self.switchovers.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_promotions_aborted(&self) {
        self.promotions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_promotions_degraded(&self) {
        self.promotions_degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_step_failures(&self, count: u64) {
        self.step_failures.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_crashes_recorded(&self) {
        self.crashes_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_arbitration_requests(&self) {
        self.arbitration_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_arbitration_lost(&self) {
        self.arbitration_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            monitor_ticks: self.monitor_ticks.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            gate_blocks: self.gate_blocks.load(Ordering::Relaxed),
            false_positives: self.false_positives.load(Ordering::Relaxed),
            elections: self.elections.load(Ordering::Relaxed),
            no_candidate: self.no_candidate.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            switchovers: self.switchovers.load(Ordering::Relaxed),
            promotions_aborted: self.promotions_aborted.load(Ordering::Relaxed),
            promotions_degraded: self.promotions_degraded.load(Ordering::Relaxed),
            step_failures: self.step_failures.load(Ordering::Relaxed),
            crashes_recorded: self.crashes_recorded.load(Ordering::Relaxed),
            arbitration_requests: self.arbitration_requests.load(Ordering::Relaxed),
            arbitration_lost: self.arbitration_lost.load(Ordering::Relaxed),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self.snapshot()).unwrap_or(serde_json::Value::Null)
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub monitor_ticks: u64,
    pub refresh_failures: u64,
    pub gate_blocks: u64,
    pub false_positives: u64,
    pub elections: u64,
    pub no_candidate: u64,
    pub failovers: u64,
    pub switchovers: u64,
    pub promotions_aborted: u64,
    pub promotions_degraded: u64,
    pub step_failures: u64,
    pub crashes_recorded: u64,
    pub arbitration_requests: u64,
    pub arbitration_lost: u64,
}
