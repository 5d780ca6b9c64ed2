//! Failover Invariant Tests
//!
//! Drives a sandboxed three or four node cluster through the public
//! `ClusterHandle` and checks:
//! - one promotion at a time
//! - exactly one leader after every promotion
//! - elections are deterministic and prefer preferred nodes on ties
//! - crash records survive a restart and respect retention
//! - a recent failover blocks the next one
//! - a verdict that changes while suppressors wait is honored

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use replmgr::config::{NodeConfig, ReplmgrConfig};
use replmgr::election::{ElectionKind, ExclusionReason};
use replmgr::gate::{DenialReason, LoadBalancerError, LoadBalancerMonitor};
use replmgr::monitor::{ClusterHandle, TickOutcome};
use replmgr::promotion::{CrashRecord, CrashStore, PromotionErrorKind, PromotionOutcome};
use replmgr::topology::sandbox::{leader_state, replica_state};
use replmgr::topology::{Cluster, MonitorStatus, NodeAddr, NodeRole, SandboxDriver};
use tokio::sync::RwLock;

/// db1 leads at `0-1-100`; each replica is listed as `(host, gtid)`.
fn cluster(
    replicas: &[(&str, &str)],
    configure: impl FnOnce(&mut ReplmgrConfig),
) -> (ReplmgrConfig, Arc<SandboxDriver>) {
    let mut nodes = vec![NodeConfig::new("db1", 3306)];
    nodes.extend(replicas.iter().map(|(host, _)| NodeConfig::new(*host, 3306)));
    let mut config = ReplmgrConfig::with_nodes("shard1", nodes);
    config.failover.interactive = false;
    config.failover.max_fail = 1;
    config.failover.switch_wait_trx_secs = 1;
    configure(&mut config);

    let driver = Arc::new(SandboxDriver::new());
    let leader = NodeAddr::new("db1", 3306);
    driver.add_node(&leader, leader_state(1, "0-1-100"));
    for (i, (host, gtid)) in replicas.iter().enumerate() {
        let addr = NodeAddr::new(*host, 3306);
        driver.add_node(&addr, replica_state(&leader, (i + 2) as u64, gtid));
    }
    (config, driver)
}

fn handle(config: &ReplmgrConfig, driver: &Arc<SandboxDriver>) -> ClusterHandle {
    ClusterHandle::from_config(config, driver.clone()).unwrap()
}

fn standard(
    dir: &tempfile::TempDir,
    configure: impl FnOnce(&mut ReplmgrConfig),
) -> (ClusterHandle, Arc<SandboxDriver>) {
    let working_dir = dir.path().to_path_buf();
    let (config, driver) = cluster(&[("db2", "0-1-100"), ("db3", "0-1-80")], |c| {
        c.working_dir = working_dir;
        configure(c);
    });
    (handle(&config, &driver), driver)
}

// =============================================================================
// Mutual Exclusion
// =============================================================================

#[tokio::test]
async fn test_held_permit_refuses_operator_promotion() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, driver) = standard(&dir, |_| {});
    handle.tick().await;

    let permit = handle.guard().try_acquire().unwrap();
    driver.clear_calls();

    let err = handle.switchover().await.unwrap_err();
    assert_eq!(err.kind, PromotionErrorKind::AlreadyInProgress);
    let err = handle.failover().await.unwrap_err();
    assert_eq!(err.kind, PromotionErrorKind::AlreadyInProgress);
    assert!(driver.calls().is_empty());

    drop(permit);
    let report = handle.switchover().await.unwrap();
    assert_eq!(report.elected, "db2:3306");
}

#[tokio::test]
async fn test_held_permit_blocks_automatic_failover() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, driver) = standard(&dir, |_| {});
    handle.tick().await;
    driver.set_unreachable("db1:3306", true);

    let _permit = handle.guard().try_acquire().unwrap();
    let outcome = handle.tick().await;
    assert!(matches!(
        outcome,
        TickOutcome::Blocked(DenialReason::PromotionInProgress)
    ));
    assert_eq!(handle.snapshot().await.leader.as_deref(), Some("db1:3306"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_switchovers_admit_exactly_one() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, driver) = standard(&dir, |_| {});
    handle.tick().await;
    // keeps the winner inside its promotion while the other call arrives
    driver.set_flush_delay(Duration::from_millis(300));

    let (a, b) = (handle.clone(), handle.clone());
    let first = tokio::spawn(async move { a.switchover().await });
    let second = tokio::spawn(async move { b.switchover().await });
    let (first, second) = tokio::join!(first, second);
    let results = [first.unwrap(), second.unwrap()];

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].elected, "db2:3306");
    let losers: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(losers.len(), 1);
    assert_eq!(losers[0].kind, PromotionErrorKind::AlreadyInProgress);

    {
        let cluster = handle.cluster().read().await;
        assert_eq!(cluster.leader_count(), 1);
        assert_eq!(cluster.leader_index(), Some(1));
    }
    assert_eq!(handle.crashes().await.len(), 1);
    let store = CrashStore::new(dir.path().join("shard1"));
    assert_eq!(store.load_all().unwrap().len(), 1);
    assert!(!handle.guard().is_in_progress());
}

#[tokio::test]
async fn test_guard_released_after_promotion() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, _driver) = standard(&dir, |_| {});
    handle.tick().await;

    handle.switchover().await.unwrap();
    assert!(!handle.guard().is_in_progress());
    assert!(handle.guard().try_acquire().is_ok());
}

// =============================================================================
// Leader Singularity
// =============================================================================

#[tokio::test]
async fn test_single_leader_after_failover_and_switchover() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, driver) = standard(&dir, |_| {});
    handle.tick().await;
    assert_eq!(handle.cluster().read().await.leader_count(), 1);

    driver.set_unreachable("db1:3306", true);
    assert!(handle.tick().await.is_promoted());
    {
        let cluster = handle.cluster().read().await;
        assert_eq!(cluster.leader_count(), 1);
        assert_eq!(cluster.leader().unwrap().url(), "db2:3306");
        assert_eq!(cluster.nodes()[0].role, NodeRole::Failed);
    }

    handle.tick().await;
    let report = handle.switchover().await.unwrap();
    assert_eq!(report.elected, "db3:3306");
    let cluster = handle.cluster().read().await;
    assert_eq!(cluster.leader_count(), 1);
    assert_eq!(cluster.leader().unwrap().url(), "db3:3306");
}

// =============================================================================
// Election
// =============================================================================

#[tokio::test]
async fn test_dry_run_election_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let working_dir = dir.path().to_path_buf();
    let (config, driver) = cluster(
        &[("db2", "0-1-100"), ("db3", "0-1-100"), ("db4", "0-1-100")],
        |c| {
            c.working_dir = working_dir;
            c.failover.tie_break_on_replication_stats = true;
        },
    );
    let handle = handle(&config, &driver);
    handle.tick().await;

    let first = handle.elect(ElectionKind::Failover).await;
    assert!(!first.is_none());
    for _ in 0..5 {
        let again = handle.elect(ElectionKind::Failover).await;
        assert_eq!(again.elected, first.elected);
        assert_eq!(again.candidates, first.candidates);
    }
    assert!(driver.ops_for(first.elected_url.as_deref().unwrap()).iter().all(|op| *op == "refresh"));
}

#[tokio::test]
async fn test_tie_goes_to_preferred_node() {
    let dir = tempfile::tempdir().unwrap();
    let working_dir = dir.path().to_path_buf();
    let (config, driver) = cluster(&[("db2", "0-1-100"), ("db3", "0-1-100")], |c| {
        c.working_dir = working_dir;
        c.nodes[2].preferred = true;
    });
    let handle = handle(&config, &driver);
    handle.tick().await;

    let election = handle.elect(ElectionKind::Failover).await;
    assert_eq!(election.elected_url.as_deref(), Some("db3:3306"));

    driver.set_unreachable("db1:3306", true);
    let TickOutcome::Promoted { report, .. } = handle.tick().await else {
        panic!("expected a promotion");
    };
    assert_eq!(report.elected, "db3:3306");
}

#[tokio::test]
async fn test_no_candidate_leaves_cluster_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let working_dir = dir.path().to_path_buf();
    let (config, driver) = cluster(&[("db2", "0-1-100"), ("db3", "0-1-80")], |c| {
        c.working_dir = working_dir;
        c.nodes[1].ignored = true;
        c.nodes[2].ignored = true;
    });
    let handle = handle(&config, &driver);
    handle.tick().await;
    driver.set_unreachable("db1:3306", true);

    let outcome = handle.tick().await;
    assert!(matches!(outcome, TickOutcome::Blocked(DenialReason::NoCandidate)));

    let err = handle.failover().await.unwrap_err();
    assert_eq!(err.kind, PromotionErrorKind::NoCandidate);
    assert!(!driver.ops_for("db2:3306").contains(&"change_source"));
    assert!(!driver.ops_for("db3:3306").contains(&"change_source"));
    assert!(handle.crashes().await.is_empty());
    assert!(!handle.guard().is_in_progress());
}

// =============================================================================
// Crash Records
// =============================================================================

#[tokio::test]
async fn test_crash_record_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let working_dir = dir.path().to_path_buf();
    let (config, driver) = cluster(&[("db2", "0-1-100"), ("db3", "0-1-80")], |c| {
        c.working_dir = working_dir;
    });

    let first = handle(&config, &driver);
    first.tick().await;
    driver.set_unreachable("db1:3306", true);
    let TickOutcome::Promoted { report, .. } = first.tick().await else {
        panic!("expected a promotion");
    };
    assert!(report.crash_record.is_some());

    let restarted = handle(&config, &driver);
    let crashes = restarted.crashes().await;
    assert_eq!(crashes.len(), 1);
    assert_eq!(crashes[0].old_leader_url, "db1:3306");
    assert_eq!(crashes[0].elected_leader_url, "db2:3306");
    assert_eq!(crashes[0].cluster, "shard1");
}

#[tokio::test]
async fn test_restart_keeps_newest_records_only() {
    let dir = tempfile::tempdir().unwrap();
    let working_dir = dir.path().to_path_buf();
    let (config, driver) = cluster(&[("db2", "0-1-100")], |c| {
        c.working_dir = working_dir;
        c.failover.crash_retention = 2;
    });

    let store = CrashStore::new(config.crash_dir());
    for elected in ["db2:3306", "db3:3306", "db4:3306"] {
        store
            .append(&CrashRecord::new("shard1", "db1:3306", elected))
            .unwrap();
    }

    let crashes = handle(&config, &driver).crashes().await;
    let elected: Vec<_> = crashes.iter().map(|c| c.elected_leader_url.as_str()).collect();
    assert_eq!(elected, vec!["db3:3306", "db4:3306"]);
}

// =============================================================================
// Cooldown
// =============================================================================

#[tokio::test]
async fn test_recent_failover_blocks_the_next() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, driver) = standard(&dir, |c| c.failover.fail_time_secs = 600);
    handle.tick().await;
    handle.cluster().write().await.record_failover(Utc::now());
    driver.set_unreachable("db1:3306", true);

    let outcome = handle.tick().await;
    let TickOutcome::Blocked(DenialReason::Cooldown { remaining_secs }) = outcome else {
        panic!("expected a cooldown denial, got {:?}", outcome);
    };
    assert!(remaining_secs > 0 && remaining_secs <= 600);
    assert_eq!(handle.snapshot().await.leader.as_deref(), Some("db1:3306"));
}

// =============================================================================
// Gate Re-Evaluation
// =============================================================================

/// Load balancer whose monitor restart coincides with this monitor losing
/// arbitration; the leader stays down.
struct StandbyOnRestart {
    cluster: Arc<RwLock<Cluster>>,
}

#[async_trait]
impl LoadBalancerMonitor for StandbyOnRestart {
    async fn restart_monitor(&self) -> Result<(), LoadBalancerError> {
        self.cluster.write().await.set_status(MonitorStatus::Standby);
        Ok(())
    }

    async fn server_status(&self, _node: &NodeAddr) -> Result<String, LoadBalancerError> {
        Ok("Down".to_string())
    }
}

#[tokio::test]
async fn test_lost_arbitration_during_suppressor_window_blocks_failover() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, driver) = standard(&dir, |c| {
        c.failover.arbitration.enabled = true;
        c.failover.arbitration.url = "http://127.0.0.1:9".to_string();
        c.failover.false_positive.load_balancer_check = true;
        c.failover.false_positive.load_balancer_window_ms = 10;
    });
    let balancer = StandbyOnRestart {
        cluster: handle.cluster().clone(),
    };
    let handle = handle.with_load_balancer(Arc::new(balancer));
    handle.tick().await;
    driver.set_unreachable("db1:3306", true);

    let outcome = handle.tick().await;
    assert!(
        matches!(outcome, TickOutcome::Blocked(DenialReason::NotArbitrationWinner)),
        "expected an arbitration denial, got {:?}",
        outcome
    );
    assert_eq!(handle.snapshot().await.leader.as_deref(), Some("db1:3306"));
    assert!(!driver.ops_for("db2:3306").contains(&"change_source"));
    assert!(!driver.ops_for("db3:3306").contains(&"change_source"));
    assert!(handle.crashes().await.is_empty());
    assert!(!handle.guard().is_in_progress());
}

// =============================================================================
// First Snapshot
// =============================================================================

#[tokio::test]
async fn test_leader_discovered_healthy_can_fail_over_later() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, driver) = standard(&dir, |_| {});
    handle.tick().await;
    assert!(handle.cluster().read().await.leader_seen_alive());

    driver.set_unreachable("db1:3306", true);
    let outcome = handle.tick().await;
    let TickOutcome::Promoted { report, .. } = outcome else {
        panic!("expected a promotion, got {:?}", outcome);
    };
    assert_eq!(report.elected, "db2:3306");
}

#[tokio::test]
async fn test_leader_never_seen_alive_is_not_failed_over() {
    let dir = tempfile::tempdir().unwrap();
    let (handle, driver) = standard(&dir, |_| {});
    handle.cluster().write().await.set_initial_leader(0);
    driver.set_unreachable("db1:3306", true);

    let outcome = handle.tick().await;
    assert!(matches!(outcome, TickOutcome::Blocked(DenialReason::FirstSnapshot)));
    assert_eq!(handle.snapshot().await.leader.as_deref(), Some("db1:3306"));
}

// =============================================================================
// End To End
// =============================================================================

/// A at 100 and B at 80 replicate from a dead leader; C is ignored.
#[tokio::test]
async fn test_failover_promotes_most_advanced_and_spares_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let working_dir = dir.path().to_path_buf();
    let (config, driver) = cluster(
        &[("db2", "0-1-100"), ("db3", "0-1-80"), ("db4", "0-1-90")],
        |c| {
            c.working_dir = working_dir;
            c.nodes[3].ignored = true;
        },
    );
    let handle = handle(&config, &driver);
    handle.tick().await;
    driver.set_unreachable("db1:3306", true);

    let election = handle.elect(ElectionKind::Failover).await;
    let db4 = election
        .candidates
        .iter()
        .find(|c| c.url == "db4:3306")
        .unwrap();
    assert!(db4.exclusions.contains(ExclusionReason::Ignored));

    let TickOutcome::Promoted { report, .. } = handle.tick().await else {
        panic!("expected a promotion");
    };
    assert_eq!(report.elected, "db2:3306");
    assert_eq!(report.outcome, PromotionOutcome::Completed);
    assert_eq!(report.repointed, vec!["db3:3306"]);
    assert!(report.skipped.contains(&"db4:3306".to_string()));

    assert_eq!(
        driver.state("db3:3306").unwrap().replication.unwrap().source_host,
        "db2"
    );
    assert!(!driver.ops_for("db4:3306").contains(&"change_source"));
    assert_eq!(
        driver.state("db4:3306").unwrap().replication.unwrap().source_host,
        "db1"
    );
    assert!(driver.ops_for("db1:3306").iter().all(|op| *op == "refresh"));
}
