//! Background loops
//!
//! The monitoring loop and the arbitrator loop run as separate tokio tasks on
//! their own interval and stop when the shutdown channel flips to `true`.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::handle::ClusterHandle;
use super::tick::TickOutcome;
use crate::observability::{Event, Logger};

/// Spawn the monitoring loop.
pub fn spawn_monitor(
    handle: ClusterHandle,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let TickOutcome::PromotionFailed(e) = handle.tick().await {
                        let error = e.to_string();
                        Logger::warn(
                            Event::MonitorTickFailed.as_str(),
                            &[("error", error.as_str())],
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        Logger::info(Event::Shutdown.as_str(), &[("loop", "monitor")]);
    })
}

/// Spawn the arbitrator loop; a no-op task when arbitration is not configured.
pub fn spawn_arbitrator(
    handle: ClusterHandle,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    handle.arbitrate().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        Logger::info(Event::Shutdown.as_str(), &[("loop", "arbitrator")]);
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::{NodeConfig, ReplmgrConfig};
    use crate::topology::sandbox::leader_state;
    use crate::topology::{Cluster, NodeAddr, SandboxDriver};

    #[tokio::test]
    async fn test_monitor_loop_ticks_until_shutdown() {
        let config = ReplmgrConfig::with_nodes("shard1", vec![NodeConfig::new("db1", 3306)]);
        let driver = Arc::new(SandboxDriver::new());
        driver.add_node(&NodeAddr::new("db1", 3306), leader_state(1, "0-1-1"));
        let handle = ClusterHandle::new(Cluster::from_config(&config), driver);

        let (tx, rx) = watch::channel(false);
        let task = spawn_monitor(handle.clone(), Duration::from_millis(10), rx);
        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert!(handle.metrics().snapshot().monitor_ticks >= 2);
        assert_eq!(handle.snapshot().await.leader.as_deref(), Some("db1:3306"));
    }

    #[tokio::test]
    async fn test_arbitrator_loop_stops_on_dropped_sender() {
        let config = ReplmgrConfig::with_nodes("shard1", vec![NodeConfig::new("db1", 3306)]);
        let driver = Arc::new(SandboxDriver::new());
        let handle = ClusterHandle::new(Cluster::from_config(&config), driver);

        let (tx, rx) = watch::channel(false);
        let task = spawn_arbitrator(handle, Duration::from_millis(10), rx);
        drop(tx);
        task.await.unwrap();
    }
}
