//! Shared cluster handle
//!
//! The monitoring loop, the arbitrator loop, the HTTP API and the CLI all
//! reach the cluster through one `ClusterHandle`. Writers take the promotion
//! permit before the write lock so a second promotion fails fast instead of
//! queueing behind the first.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::arbitration::{ArbitratorClient, ArbitratorTransport, HttpArbitratorTransport};
use crate::config::{ConfigError, ConfigResult, ReplmgrConfig};
use crate::election::{CandidateElector, Election, ElectionKind};
use crate::gate::{FalsePositiveSuppressors, LoadBalancerMonitor};
use crate::observability::{Diagnostic, Event, Logger, MetricsRegistry, Severity};
use crate::promotion::{
    CrashRecord, CrashStore, FailoverGuard, FailoverPermit, NoopNotifier, PromotionOrchestrator,
    PromotionReport, PromotionResult, TopologyNotifier,
};
use crate::topology::{Cluster, ClusterSnapshot, NodeDriver};

#[derive(Clone)]
pub struct ClusterHandle {
    pub(super) cluster: Arc<RwLock<Cluster>>,
    pub(super) guard: Arc<FailoverGuard>,
    pub(super) driver: Arc<dyn NodeDriver>,
    pub(super) metrics: Arc<MetricsRegistry>,
    pub(super) notifier: Arc<dyn TopologyNotifier>,
    pub(super) crash_store: Option<Arc<CrashStore>>,
    pub(super) suppressors: Arc<FalsePositiveSuppressors>,
    pub(super) load_balancer: Option<Arc<dyn LoadBalancerMonitor>>,
    pub(super) arbitrator: Option<Arc<ArbitratorClient>>,
}

impl ClusterHandle {
    pub fn new(cluster: Cluster, driver: Arc<dyn NodeDriver>) -> Self {
        Self {
            cluster: Arc::new(RwLock::new(cluster)),
            guard: Arc::new(FailoverGuard::new()),
            suppressors: Arc::new(FalsePositiveSuppressors::new(driver.clone())),
            driver,
            metrics: Arc::new(MetricsRegistry::new()),
            notifier: Arc::new(NoopNotifier),
            crash_store: None,
            load_balancer: None,
            arbitrator: None,
        }
    }

    /// Handle for a configured cluster: crash history reloaded from
    /// `crash_dir`, HTTP arbitrator when arbitration is enabled.
    pub fn from_config(config: &ReplmgrConfig, driver: Arc<dyn NodeDriver>) -> ConfigResult<Self> {
        let mut cluster = Cluster::from_config(config);
        let store = Arc::new(CrashStore::new(config.crash_dir()));
        match store.load_all() {
            Ok(mut records) => {
                let excess = records.len().saturating_sub(config.failover.crash_retention);
                records.drain(..excess);
                cluster.set_crashes(records);
            }
            Err(e) => {
                let error = e.to_string();
                Logger::warn(Event::CrashStoreFailed.as_str(), &[("error", error.as_str())]);
            }
        }

        let mut handle = Self::new(cluster, driver).with_crash_store(store);
        if config.failover.arbitration.enabled {
            let transport = HttpArbitratorTransport::new(&config.failover.arbitration)
                .map_err(|e| ConfigError::invalid("failover.arbitration.url", e.to_string()))?;
            handle = handle.with_arbitrator(Arc::new(transport));
        }
        Ok(handle)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn TopologyNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_crash_store(mut self, store: Arc<CrashStore>) -> Self {
        self.crash_store = Some(store);
        self
    }

    pub fn with_load_balancer(mut self, load_balancer: Arc<dyn LoadBalancerMonitor>) -> Self {
        self.suppressors = Arc::new(
            FalsePositiveSuppressors::new(self.driver.clone())
                .with_load_balancer(load_balancer.clone()),
        );
        self.load_balancer = Some(load_balancer);
        self
    }

    pub fn with_arbitrator(mut self, transport: Arc<dyn ArbitratorTransport>) -> Self {
        let client =
            ArbitratorClient::new(transport, self.driver.clone()).with_metrics(self.metrics.clone());
        self.arbitrator = Some(Arc::new(client));
        self
    }

    pub fn cluster(&self) -> &Arc<RwLock<Cluster>> {
        &self.cluster
    }

    pub fn guard(&self) -> &Arc<FailoverGuard> {
        &self.guard
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn driver(&self) -> &Arc<dyn NodeDriver> {
        &self.driver
    }

    pub(super) fn orchestrator(&self) -> PromotionOrchestrator {
        let mut orchestrator = PromotionOrchestrator::new(self.driver.clone(), self.guard.clone())
            .with_notifier(self.notifier.clone())
            .with_metrics(self.metrics.clone());
        if let Some(store) = &self.crash_store {
            orchestrator = orchestrator.with_crash_store(store.clone());
        }
        orchestrator
    }

    // ==================
    // Operator commands
    // ==================

    /// Planned leader change; the current leader must be reachable.
    pub async fn switchover(&self) -> PromotionResult<PromotionReport> {
        self.promote(ElectionKind::Switchover).await
    }

    /// Forced failover, bypassing the precondition gate.
    pub async fn failover(&self) -> PromotionResult<PromotionReport> {
        self.promote(ElectionKind::Failover).await
    }

    async fn promote(&self, kind: ElectionKind) -> PromotionResult<PromotionReport> {
        let permit = self.guard.try_acquire()?;
        let mut cluster = self.cluster.write().await;
        self.promote_locked(&mut cluster, kind, &permit).await
    }

    pub(super) async fn promote_locked(
        &self,
        cluster: &mut Cluster,
        kind: ElectionKind,
        permit: &FailoverPermit,
    ) -> PromotionResult<PromotionReport> {
        self.orchestrator().run_with_permit(cluster, kind, permit).await
    }

    /// Toggle between interactive (operator-confirmed) and automatic failover.
    pub async fn set_interactive(&self, interactive: bool) {
        let mut cluster = self.cluster.write().await;
        if cluster.config.interactive == interactive {
            return;
        }
        cluster.config.interactive = interactive;
        let mode = if interactive { "interactive" } else { "automatic" };
        Logger::info(
            Event::FailoverModeChanged.as_str(),
            &[("cluster", cluster.name.as_str()), ("mode", mode)],
        );
        cluster.diagnose(
            Severity::Info,
            Event::FailoverModeChanged.as_str(),
            format!("failover mode set to {}", mode),
        );
    }

    // ==================
    // Read-only views
    // ==================

    /// Dry-run election; nothing is changed or journaled.
    pub async fn elect(&self, kind: ElectionKind) -> Election {
        let cluster = self.cluster.read().await;
        CandidateElector::new(&cluster).silent().elect(kind)
    }

    pub async fn snapshot(&self) -> ClusterSnapshot {
        self.cluster.read().await.snapshot()
    }

    /// Newest diagnostics first.
    pub async fn diagnostics(&self, limit: usize) -> Vec<Diagnostic> {
        self.cluster.read().await.diagnostics().recent(limit)
    }

    pub async fn crashes(&self) -> Vec<CrashRecord> {
        self.cluster.read().await.crashes().to_vec()
    }
}
