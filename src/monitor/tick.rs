//! One monitoring tick
//!
//! refresh → split-brain suspicion → precondition gate → false-positive
//! suppressors → failover → optional switch back to the preferred node.
//!
//! Remote calls that may block (refresh, suppressor sleeps, the arbitrator
//! exchange) run without the cluster lock. The promotion itself runs under
//! the write lock and the promotion permit.

use chrono::Utc;

use super::handle::ClusterHandle;
use crate::arbitration::ArbitrationOutcome;
use crate::election::ElectionKind;
use crate::gate::{DenialReason, GateEvaluation, GateVerdict, PreconditionGate, Suppression};
use crate::observability::{Event, Logger, Severity};
use crate::promotion::{FailoverPermit, PromotionError, PromotionReport};
use crate::topology::{Cluster, DriverResult, NodeAddr, NodeRole, NodeState};

/// What a tick decided.
#[derive(Debug)]
pub enum TickOutcome {
    Blocked(DenialReason),
    Suppressed(Suppression),
    Promoted {
        report: PromotionReport,
        /// Switchover back onto a preferred node right after the failover.
        switchback: Option<PromotionReport>,
    },
    PromotionFailed(PromotionError),
}

impl TickOutcome {
    pub fn is_promoted(&self) -> bool {
        matches!(self, TickOutcome::Promoted { .. })
    }
}

impl ClusterHandle {
    pub async fn tick(&self) -> TickOutcome {
        self.metrics.increment_monitor_ticks();

        let addrs: Vec<NodeAddr> = {
            let cluster = self.cluster.read().await;
            cluster.nodes().iter().map(|n| n.addr.clone()).collect()
        };
        let mut results = Vec::with_capacity(addrs.len());
        for addr in &addrs {
            results.push(self.driver.refresh(addr).await);
        }

        let (config, leader, replicas) = {
            let mut cluster = self.cluster.write().await;
            self.observe(&mut cluster, results);

            let evaluation = PreconditionGate::new(&cluster, &self.guard).evaluate(Utc::now());
            if let Some(reason) = self.denied(&mut cluster, evaluation) {
                return TickOutcome::Blocked(reason);
            }

            let Some(leader) = cluster.leader().map(|n| n.addr.clone()) else {
                return TickOutcome::Blocked(DenialReason::NoLeader);
            };
            Logger::info(
                Event::GateProceed.as_str(),
                &[("cluster", cluster.name.as_str())],
            );
            let replicas: Vec<NodeAddr> = cluster
                .nodes()
                .iter()
                .filter(|n| !n.is_failed() && n.replicates_from(&leader))
                .map(|n| n.addr.clone())
                .collect();
            (cluster.config.false_positive.clone(), leader, replicas)
        };

        if let Some(suppression) = self.suppressors.check(&config, &leader, &replicas).await {
            self.metrics.increment_false_positives();
            let description = suppression.description();
            Logger::warn(
                Event::FalsePositiveSuppressed.as_str(),
                &[("code", suppression.code()), ("reason", description.as_str())],
            );
            let mut cluster = self.cluster.write().await;
            cluster.diagnose(Severity::Warn, suppression.code(), description);
            return TickOutcome::Suppressed(suppression);
        }

        let permit = match self.guard.try_acquire() {
            Ok(permit) => permit,
            Err(_) => return TickOutcome::Blocked(DenialReason::PromotionInProgress),
        };
        let mut cluster = self.cluster.write().await;
        // the cluster moved on while the lock was released
        let evaluation = PreconditionGate::new(&cluster, &self.guard).reevaluate(Utc::now());
        if let Some(reason) = self.denied(&mut cluster, evaluation) {
            return TickOutcome::Blocked(reason);
        }

        match self
            .promote_locked(&mut cluster, ElectionKind::Failover, &permit)
            .await
        {
            Ok(report) => {
                let switchback = self.switch_back(&mut cluster, &permit).await;
                TickOutcome::Promoted { report, switchback }
            }
            Err(e) => TickOutcome::PromotionFailed(e),
        }
    }

    /// Journal and log a gate denial; `None` when the gate proceeds.
    fn denied(&self, cluster: &mut Cluster, evaluation: GateEvaluation) -> Option<DenialReason> {
        cluster.absorb_diagnostics(evaluation.diagnostics.into_entries());
        let GateVerdict::Denied(reason) = evaluation.verdict else {
            return None;
        };
        if evaluation.severity >= Severity::Warn {
            self.metrics.increment_gate_blocks();
            let description = reason.description();
            Logger::log(
                evaluation.severity,
                Event::GateBlocked.as_str(),
                &[
                    ("cluster", cluster.name.as_str()),
                    ("code", reason.code()),
                    ("reason", description.as_str()),
                ],
            );
        }
        Some(reason)
    }

    /// Fold refresh results into the roster and update the split-brain suspicion.
    fn observe(
        &self,
        cluster: &mut Cluster,
        results: Vec<DriverResult<NodeState>>,
    ) {
        let leader_was_failed = cluster.leader_failed();
        for (idx, result) in results.into_iter().enumerate() {
            let was_failed = cluster.node(idx).is_some_and(|n| n.is_failed());
            let url = cluster.node(idx).map(|n| n.url()).unwrap_or_default();
            match &result {
                Ok(_) if was_failed => {
                    Logger::info(Event::NodeRecovered.as_str(), &[("node", url.as_str())]);
                }
                Ok(_) => {}
                Err(e) => {
                    self.metrics.increment_refresh_failures();
                    let error = e.to_string();
                    Logger::warn(
                        Event::NodeRefreshFailed.as_str(),
                        &[("node", url.as_str()), ("error", error.as_str())],
                    );
                }
            }
            cluster.record_refresh(idx, result);
        }

        if cluster.discover_leader().is_none() {
            cluster.diagnose(Severity::Warn, "NO_LEADER", "no node qualifies as leader");
        }

        if cluster.leader_failed() && !leader_was_failed {
            let url = cluster.leader().map(|n| n.url()).unwrap_or_default();
            Logger::error(
                Event::LeaderFailed.as_str(),
                &[("cluster", cluster.name.as_str()), ("leader", url.as_str())],
            );
            cluster.diagnose(
                Severity::Error,
                "LEADER_FAILED",
                format!("leader {} failed to answer", url),
            );
        }

        let suspected = cluster.evaluate_split_brain();
        if cluster.set_split_brain(suspected) {
            let event = if suspected {
                Event::SplitBrainSuspected
            } else {
                Event::SplitBrainCleared
            };
            Logger::log(
                event.severity(),
                event.as_str(),
                &[("cluster", cluster.name.as_str())],
            );
        }
    }

    /// Switch over to a healthy preferred replica after a failover elected
    /// some other node.
    async fn switch_back(
        &self,
        cluster: &mut Cluster,
        permit: &FailoverPermit,
    ) -> Option<PromotionReport> {
        if !cluster.config.switchback_to_preferred {
            return None;
        }
        if cluster.leader().is_some_and(|n| n.flags.preferred) {
            return None;
        }
        let preferred = cluster.nodes().iter().find(|n| {
            n.flags.preferred
                && !n.flags.maintenance
                && !n.flags.ignored
                && n.role == NodeRole::Replica
        })?;
        let url = preferred.url();
        Logger::info(
            Event::SwitchbackToPreferred.as_str(),
            &[("cluster", cluster.name.as_str()), ("node", url.as_str())],
        );

        match self
            .promote_locked(cluster, ElectionKind::Switchover, permit)
            .await
        {
            Ok(report) => Some(report),
            Err(e) => {
                let error = e.to_string();
                Logger::warn(
                    Event::SwitchbackFailed.as_str(),
                    &[("node", url.as_str()), ("error", error.as_str())],
                );
                cluster.diagnose(
                    Severity::Warn,
                    Event::SwitchbackFailed.as_str(),
                    format!("switch back to {} failed: {}", url, error),
                );
                None
            }
        }
    }

    /// One arbitrator round; the lock is released during the exchange.
    pub async fn arbitrate(&self) -> ArbitrationOutcome {
        let Some(arbitrator) = &self.arbitrator else {
            return ArbitrationOutcome::Skipped;
        };
        let request = {
            let cluster = self.cluster.read().await;
            arbitrator.prepare(&cluster)
        };
        let Some(request) = request else {
            return ArbitrationOutcome::Skipped;
        };
        let result = arbitrator.exchange(&request).await;
        let mut cluster = self.cluster.write().await;
        arbitrator.apply(&mut cluster, result).await
    }
}
