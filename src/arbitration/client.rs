//! Split-brain arbitrator client
//!
//! A round is split in three so the cluster lock is never held across the
//! network exchange:
//! - `prepare` reads the cluster and decides whether a round is due
//! - `exchange` talks to the arbitrator, up to `MAX_ATTEMPTS` times
//! - `apply` writes the verdict back
//!
//! A round is due when the split-brain suspicion just appeared, or when the
//! previous round failed while the suspicion persists.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use super::errors::{ArbitrationError, ArbitrationResult};
use super::transport::ArbitratorTransport;
use super::wire::{ArbitrationRequest, ArbitrationResponse};
use crate::observability::{Event, Logger, MetricsRegistry, Severity};
use crate::topology::{Cluster, MonitorStatus, NodeDriver};

pub const MAX_ATTEMPTS: usize = 3;

/// What one round did to the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArbitrationOutcome {
    /// No round was due.
    Skipped,
    Won,
    Lost {
        /// Leader the arbitrator considers legitimate, empty when unnamed.
        winner_leader: String,
        /// Whether the local leader was set read-only.
        fenced: bool,
    },
    Failed,
}

pub struct ArbitratorClient {
    transport: Arc<dyn ArbitratorTransport>,
    driver: Arc<dyn NodeDriver>,
    metrics: Arc<MetricsRegistry>,
    run_id: Uuid,
    last_split_brain: AtomicBool,
}

impl ArbitratorClient {
    pub fn new(transport: Arc<dyn ArbitratorTransport>, driver: Arc<dyn NodeDriver>) -> Self {
        Self {
            transport,
            driver,
            metrics: Arc::new(MetricsRegistry::new()),
            run_id: Uuid::new_v4(),
            last_split_brain: AtomicBool::new(false),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Identity sent to the arbitrator; stable for the life of the process.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Build the claim for this round, or `None` when no round is due.
    pub fn prepare(&self, cluster: &Cluster) -> Option<ArbitrationRequest> {
        let config = &cluster.config.arbitration;
        if !config.enabled {
            return None;
        }
        let suspected = cluster.split_brain();
        let previous = self.last_split_brain.swap(suspected, Ordering::SeqCst);
        if !suspected {
            return None;
        }
        if previous && !cluster.arbitrator_failed() {
            return None;
        }

        Some(ArbitrationRequest {
            uuid: self.run_id.to_string(),
            secret: config.secret.clone(),
            cluster: cluster.name.clone(),
            master: cluster.leader().map(|n| n.url()).unwrap_or_default(),
            id: config.unique_id,
            status: cluster.status().as_str().to_string(),
            hosts: cluster.len(),
            failed: cluster.nodes().iter().filter(|n| n.is_failed()).count(),
        })
    }

    /// Send the claim, retrying up to `MAX_ATTEMPTS` times.
    pub async fn exchange(
        &self,
        request: &ArbitrationRequest,
    ) -> ArbitrationResult<ArbitrationResponse> {
        let mut last = ArbitrationError::Unreachable("no attempt made".to_string());
        for attempt in 1..=MAX_ATTEMPTS {
            self.metrics.increment_arbitration_requests();
            let attempt_str = attempt.to_string();
            Logger::info(
                Event::ArbitrationRequest.as_str(),
                &[
                    ("cluster", request.cluster.as_str()),
                    ("master", request.master.as_str()),
                    ("attempt", attempt_str.as_str()),
                ],
            );
            match self.transport.send(request).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    let error = e.to_string();
                    Logger::warn(
                        Event::ArbitratorUnreachable.as_str(),
                        &[("attempt", attempt_str.as_str()), ("error", error.as_str())],
                    );
                    last = e;
                }
            }
        }
        Err(last)
    }

    /// Record the verdict on the cluster.
    ///
    /// A loser whose arbitrator names another leader sets the local leader
    /// read-only at once instead of waiting for the next tick.
    pub async fn apply(
        &self,
        cluster: &mut Cluster,
        result: ArbitrationResult<ArbitrationResponse>,
    ) -> ArbitrationOutcome {
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                cluster.set_arbitrator_failed(true);
                cluster.diagnose(Severity::Error, e.code(), e.to_string());
                return ArbitrationOutcome::Failed;
            }
        };
        cluster.set_arbitrator_failed(false);

        if response.is_winner() {
            cluster.set_status(MonitorStatus::Active);
            Logger::info(
                Event::ArbitrationWon.as_str(),
                &[("cluster", cluster.name.as_str())],
            );
            return ArbitrationOutcome::Won;
        }

        cluster.set_status(MonitorStatus::Standby);
        self.metrics.increment_arbitration_lost();
        let local = cluster.leader().map(|n| (n.url(), n.addr.clone()));
        Logger::warn(
            Event::ArbitrationLost.as_str(),
            &[
                ("cluster", cluster.name.as_str()),
                ("winner_leader", response.master.as_str()),
            ],
        );

        let mut fenced = false;
        if let Some((url, addr)) = local {
            if !response.master.is_empty() && response.master != url {
                cluster.diagnose(
                    Severity::Error,
                    "LOST_ARBITRATION",
                    format!(
                        "arbitrator elected {}, leaving {} read-only",
                        response.master, url
                    ),
                );
                match self.driver.set_read_only(&addr, true).await {
                    Ok(()) => fenced = true,
                    Err(e) => {
                        let error = e.to_string();
                        Logger::error(
                            Event::StepFailed.as_str(),
                            &[
                                ("node", url.as_str()),
                                ("op", "set_read_only"),
                                ("error", error.as_str()),
                            ],
                        );
                    }
                }
            }
        }
        if !fenced {
            cluster.diagnose(
                Severity::Warn,
                "ARBITRATION_LOST",
                "arbitrator chose the other side, monitor is standby",
            );
        }

        ArbitrationOutcome::Lost {
            winner_leader: response.master,
            fenced,
        }
    }

    /// `prepare`, `exchange` and `apply` on a cluster owned by the caller.
    pub async fn round(&self, cluster: &mut Cluster) -> ArbitrationOutcome {
        let Some(request) = self.prepare(cluster) else {
            return ArbitrationOutcome::Skipped;
        };
        let result = self.exchange(&request).await;
        self.apply(cluster, result).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::config::{NodeConfig, ReplmgrConfig};
    use crate::topology::sandbox::{leader_state, replica_state};
    use crate::topology::{NodeAddr, SandboxDriver};

    struct FakeTransport {
        answers: Mutex<Vec<ArbitrationResult<ArbitrationResponse>>>,
        sent: AtomicUsize,
        seen: Mutex<Option<ArbitrationRequest>>,
    }

    impl FakeTransport {
        fn new(answers: Vec<ArbitrationResult<ArbitrationResponse>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers),
                sent: AtomicUsize::new(0),
                seen: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl ArbitratorTransport for FakeTransport {
        async fn send(
            &self,
            request: &ArbitrationRequest,
        ) -> ArbitrationResult<ArbitrationResponse> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            *self.seen.lock().unwrap() = Some(request.clone());
            let mut answers = self.answers.lock().unwrap();
            if answers.is_empty() {
                return Err(ArbitrationError::Unreachable("exhausted".to_string()));
            }
            answers.remove(0)
        }
    }

    fn setup() -> (Arc<SandboxDriver>, Cluster) {
        let mut config = ReplmgrConfig::with_nodes(
            "shard1",
            vec![NodeConfig::new("db1", 3306), NodeConfig::new("db2", 3306)],
        );
        config.failover.arbitration.enabled = true;
        config.failover.arbitration.secret = "s3cr3t".to_string();
        config.failover.arbitration.unique_id = 7;

        let driver = Arc::new(SandboxDriver::new());
        let db1 = NodeAddr::new("db1", 3306);
        driver.add_node(&db1, leader_state(1, "0-1-10"));
        driver.add_node(&NodeAddr::new("db2", 3306), replica_state(&db1, 2, "0-1-10"));

        let mut cluster = Cluster::from_config(&config);
        cluster.set_initial_leader(0);
        cluster.set_split_brain(true);
        (driver, cluster)
    }

    fn client(transport: Arc<FakeTransport>, driver: Arc<SandboxDriver>) -> ArbitratorClient {
        ArbitratorClient::new(transport, driver)
    }

    #[test]
    fn test_no_round_without_suspicion() {
        let (driver, mut cluster) = setup();
        cluster.set_split_brain(false);
        let client = client(FakeTransport::new(vec![]), driver);
        assert!(client.prepare(&cluster).is_none());
    }

    #[test]
    fn test_no_round_when_disabled() {
        let (driver, mut cluster) = setup();
        cluster.config.arbitration.enabled = false;
        let client = client(FakeTransport::new(vec![]), driver);
        assert!(client.prepare(&cluster).is_none());
    }

    #[test]
    fn test_claim_carries_identity_and_counters() {
        let (driver, cluster) = setup();
        let client = client(FakeTransport::new(vec![]), driver);
        let request = client.prepare(&cluster).unwrap();

        assert_eq!(request.uuid, client.run_id().to_string());
        assert_eq!(request.secret, "s3cr3t");
        assert_eq!(request.cluster, "shard1");
        assert_eq!(request.master, "db1:3306");
        assert_eq!(request.id, 7);
        assert_eq!(request.status, "active");
        assert_eq!(request.hosts, 2);
        assert_eq!(request.failed, 0);
    }

    #[test]
    fn test_only_a_changed_suspicion_is_arbitrated() {
        let (driver, cluster) = setup();
        let client = client(FakeTransport::new(vec![]), driver);
        assert!(client.prepare(&cluster).is_some());
        assert!(client.prepare(&cluster).is_none());
    }

    #[test]
    fn test_failed_round_is_retried_next_cycle() {
        let (driver, mut cluster) = setup();
        let client = client(FakeTransport::new(vec![]), driver);
        assert!(client.prepare(&cluster).is_some());
        cluster.set_arbitrator_failed(true);
        assert!(client.prepare(&cluster).is_some());
    }

    #[tokio::test]
    async fn test_winner_stays_active() {
        let (driver, mut cluster) = setup();
        cluster.set_status(MonitorStatus::Standby);
        cluster.set_arbitrator_failed(true);
        let transport = FakeTransport::new(vec![Ok(ArbitrationResponse::winner("db1:3306"))]);
        let client = client(transport, driver);

        let outcome = client.round(&mut cluster).await;
        assert_eq!(outcome, ArbitrationOutcome::Won);
        assert_eq!(cluster.status(), MonitorStatus::Active);
        assert!(!cluster.arbitrator_failed());
    }

    #[tokio::test]
    async fn test_loser_naming_other_leader_is_fenced() {
        let (driver, mut cluster) = setup();
        let transport = FakeTransport::new(vec![Ok(ArbitrationResponse::loser("db9:3306"))]);
        let client = client(transport, driver.clone());

        let outcome = client.round(&mut cluster).await;
        assert_eq!(
            outcome,
            ArbitrationOutcome::Lost {
                winner_leader: "db9:3306".to_string(),
                fenced: true,
            }
        );
        assert_eq!(cluster.status(), MonitorStatus::Standby);
        assert!(driver.state("db1:3306").unwrap().read_only);
        assert!(cluster.diagnostics().contains_code("LOST_ARBITRATION"));
        assert_eq!(cluster.leader_index(), Some(0));
    }

    #[tokio::test]
    async fn test_loser_agreeing_on_leader_is_not_fenced() {
        let (driver, mut cluster) = setup();
        let transport = FakeTransport::new(vec![Ok(ArbitrationResponse::loser("db1:3306"))]);
        let client = client(transport, driver.clone());

        let outcome = client.round(&mut cluster).await;
        assert!(matches!(outcome, ArbitrationOutcome::Lost { fenced: false, .. }));
        assert_eq!(cluster.status(), MonitorStatus::Standby);
        assert!(!driver.state("db1:3306").unwrap().read_only);
    }

    #[tokio::test]
    async fn test_fencing_failure_is_logged_not_fatal() {
        let (driver, mut cluster) = setup();
        driver.fail_op("db1:3306", "set_read_only");
        let transport = FakeTransport::new(vec![Ok(ArbitrationResponse::loser("db9:3306"))]);
        let client = client(transport, driver);

        let outcome = client.round(&mut cluster).await;
        assert!(matches!(outcome, ArbitrationOutcome::Lost { fenced: false, .. }));
        assert_eq!(cluster.status(), MonitorStatus::Standby);
    }

    #[tokio::test]
    async fn test_three_attempts_then_failed() {
        let (driver, mut cluster) = setup();
        let transport = FakeTransport::new(vec![]);
        let client = client(transport.clone(), driver);

        let outcome = client.round(&mut cluster).await;
        assert_eq!(outcome, ArbitrationOutcome::Failed);
        assert_eq!(transport.sent.load(Ordering::SeqCst), MAX_ATTEMPTS);
        assert!(cluster.arbitrator_failed());
        assert!(cluster.diagnostics().contains_code("ARBITRATOR_UNREACHABLE"));
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_second_attempt() {
        let (driver, mut cluster) = setup();
        let transport = FakeTransport::new(vec![
            Err(ArbitrationError::Status(502)),
            Ok(ArbitrationResponse::winner("")),
        ]);
        let client = client(transport.clone(), driver);

        let outcome = client.round(&mut cluster).await;
        assert_eq!(outcome, ArbitrationOutcome::Won);
        assert_eq!(transport.sent.load(Ordering::SeqCst), 2);
        let seen = transport.seen.lock().unwrap().clone().unwrap();
        assert_eq!(seen.master, "db1:3306");
    }
}
