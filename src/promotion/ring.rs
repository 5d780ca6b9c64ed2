//! Ring closing
//!
//! In a replication ring every node follows its predecessor. When the leader
//! dies, its successor (the child) loses its source; the ring is closed by
//! pointing the child at the dead leader's own source (the parent).
//!
//! A switchover leaves the ring as it is: the old leader is alive and still
//! carries events around.

use super::addressing;
use super::orchestrator::{PromotionOrchestrator, RunContext};
use crate::config::TopologyKind;
use crate::observability::{Event, Logger};
use crate::topology::Cluster;

impl PromotionOrchestrator {
    pub(super) async fn close_ring(&self, cluster: &mut Cluster, ctx: &mut RunContext) {
        if ctx.config.topology != TopologyKind::Ring || ctx.halted {
            return;
        }
        let (Some(old), Some(old_addr)) = (ctx.old, ctx.old_addr.clone()) else {
            return;
        };
        if !cluster.nodes()[old].is_failed() {
            return;
        }

        let child = cluster
            .nodes()
            .iter()
            .position(|n| !n.is_failed() && n.replicates_from(&old_addr));
        let parent = cluster.nodes()[old]
            .status()
            .and_then(|s| cluster.index_of(&s.source_url()));

        let (Some(child), Some(parent)) = (child, parent) else {
            let url = old_addr.url();
            Logger::warn(
                Event::StepFailed.as_str(),
                &[
                    ("phase", "Rewiring"),
                    ("node", url.as_str()),
                    ("op", "close_ring"),
                    ("error", "ring neighbours of the failed leader are unknown"),
                ],
            );
            return;
        };
        if child == parent {
            // two-node ring: the survivor has nobody left to follow
            return;
        }

        let child_addr = cluster.nodes()[child].addr.clone();
        let parent_node = &cluster.nodes()[parent];
        let parent_addr = parent_node.addr.clone();
        let mode = addressing::ring_mode(parent_node);

        let result = self.driver.stop_replica(&child_addr).await;
        self.note(ctx, "Rewiring", &child_addr, "stop_replica", result);
        if ctx.halted {
            return;
        }
        if !self
            .change_source(ctx, "Rewiring", &child_addr, parent_addr.clone(), mode)
            .await
        {
            return;
        }
        let result = self.driver.start_replica(&child_addr).await;
        if self
            .note(ctx, "Rewiring", &child_addr, "start_replica", result)
            .is_none()
        {
            return;
        }

        let child_url = child_addr.url();
        let parent_url = parent_addr.url();
        Logger::info(
            Event::RingClosed.as_str(),
            &[("child", child_url.as_str()), ("parent", parent_url.as_str())],
        );
        ctx.report.ring_closed = Some(child_url);
    }
}
