//! Promotion orchestrator
//!
//! Runs one failover or switchover end to end:
//!
//! 1. Quiesce (switchover) and elect
//! 2. Commit the leader reference; freeze the old leader on switchover
//! 3. Drain the candidate and write the crash record
//! 4. Activate the new leader
//! 5. Demote the old leader (switchover)
//! 6. Rewire the remaining replicas, or close the ring
//! 7. Bookkeeping
//!
//! Only guard acquisition, quiescing and the election can abort a run, and
//! all of them happen before the commit. After the commit every remote
//! failure is recorded in the report: with `best_effort` the run carries on,
//! without it the remaining remote steps are skipped and every replica not
//! yet rewired is held in maintenance.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use super::addressing::{self, RepointPlan, ReplicationAddressingMode};
use super::crash::{CrashRecord, CrashStore};
use super::errors::{PromotionError, PromotionResult};
use super::guard::{FailoverGuard, FailoverPermit};
use super::hooks::{self, HookArgs, HookStage};
use super::notifier::{NoopNotifier, TopologyNotifier};
use super::report::{PromotionOutcome, PromotionReport, StepFailure};
use super::state::PromotionState;
use crate::config::{FailoverConfig, TopologyKind};
use crate::election::{CandidateElector, Election, ElectionKind};
use crate::observability::{Event, Logger, MetricsRegistry, Severity};
use crate::topology::{
    BinlogPosition, ChangeSourceRequest, Cluster, DbFlavor, DriverResult, GtidList, Node,
    NodeAddr, NodeDriver, NodeRole,
};

/// Offset of the first event in a fresh binary log file.
const FIRST_EVENT_POS: u64 = 4;

/// Mutable state of one run after the commit point.
pub(super) struct RunContext {
    pub(super) kind: ElectionKind,
    pub(super) config: FailoverConfig,
    pub(super) new: usize,
    pub(super) new_addr: NodeAddr,
    pub(super) old: Option<usize>,
    pub(super) old_addr: Option<NodeAddr>,
    pub(super) report: PromotionReport,
    pub(super) halted: bool,
    /// Old leader's final positions, the catch-up target on switchover.
    old_gtid: GtidList,
    old_binlog: Option<BinlogPosition>,
    /// New leader's positions after the marker write.
    new_gtid: GtidList,
    new_binlog: Option<BinlogPosition>,
    /// Relay node and the position the candidate was fast-forwarded to.
    relay: Option<(usize, BinlogPosition)>,
}

impl RunContext {
    fn is_switchover(&self) -> bool {
        self.kind == ElectionKind::Switchover
    }
}

pub struct PromotionOrchestrator {
    pub(super) driver: Arc<dyn NodeDriver>,
    notifier: Arc<dyn TopologyNotifier>,
    crash_store: Option<Arc<CrashStore>>,
    metrics: Arc<MetricsRegistry>,
    guard: Arc<FailoverGuard>,
}

impl PromotionOrchestrator {
    pub fn new(driver: Arc<dyn NodeDriver>, guard: Arc<FailoverGuard>) -> Self {
        Self {
            driver,
            notifier: Arc::new(NoopNotifier),
            crash_store: None,
            metrics: Arc::new(MetricsRegistry::new()),
            guard,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn TopologyNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_crash_store(mut self, store: Arc<CrashStore>) -> Self {
        self.crash_store = Some(store);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn guard(&self) -> &Arc<FailoverGuard> {
        &self.guard
    }

    /// Acquire the guard and run a promotion.
    pub async fn run(
        &self,
        cluster: &mut Cluster,
        kind: ElectionKind,
    ) -> PromotionResult<PromotionReport> {
        let permit = self.guard.try_acquire()?;
        self.run_with_permit(cluster, kind, &permit).await
    }

    /// Run a promotion under a permit the caller already holds.
    pub async fn run_with_permit(
        &self,
        cluster: &mut Cluster,
        kind: ElectionKind,
        _permit: &FailoverPermit,
    ) -> PromotionResult<PromotionReport> {
        let kind_str = kind.to_string();
        Logger::info(
            Event::PromotionStart.as_str(),
            &[("cluster", cluster.name.as_str()), ("kind", kind_str.as_str())],
        );
        let state = PromotionState::new().begin(kind)?;

        let election = match self.prepare(cluster, kind).await {
            Ok(election) => election,
            Err(e) => {
                self.abort(cluster, state, &e)?;
                return Err(e);
            }
        };
        let new = election.elected.ok_or_else(PromotionError::no_candidate)?;

        if let Some(path) = cluster.config.pre_hook.clone() {
            if let (Some(old), Some(elected)) = (cluster.leader(), cluster.node(new)) {
                let args = HookArgs::new(old, elected);
                hooks::run_logged(HookStage::PrePromotion, &path, &args).await;
            }
        }

        // Phase 2
        let mut ctx = self.commit(cluster, kind, new, &election);
        let mut state = state.commit(new)?;
        self.freeze_old_leader(&mut ctx).await;

        // Phase 3
        state = state.catch_up()?;
        self.enter(&state, &ctx);
        self.catch_up(cluster, &mut ctx).await;

        // Phase 4
        state = state.activate()?;
        self.enter(&state, &ctx);
        self.activate(cluster, &mut ctx).await;

        // Phase 5
        state = state.demote_old_leader()?;
        self.enter(&state, &ctx);
        self.demote_old_leader(cluster, &mut ctx).await;

        // Phase 6
        state = state.rewire()?;
        self.enter(&state, &ctx);
        if cluster.config.topology.is_virtual() {
            self.close_ring(cluster, &mut ctx).await;
        } else {
            self.rewire(cluster, &mut ctx).await;
        }

        // Phase 7
        state = state.bookkeep()?;
        self.enter(&state, &ctx);
        self.bookkeep(cluster, &mut ctx);
        state.complete()?;

        Ok(ctx.report)
    }

    // ==================
    // Phase 1: quiesce & elect
    // ==================

    async fn prepare(
        &self,
        cluster: &mut Cluster,
        kind: ElectionKind,
    ) -> PromotionResult<Election> {
        let leader = cluster.leader_index().ok_or_else(PromotionError::no_leader)?;
        let leader_node = cluster.node(leader).ok_or_else(PromotionError::no_leader)?;
        let leader_addr = leader_node.addr.clone();

        if kind == ElectionKind::Switchover {
            if leader_node.is_failed() {
                return Err(PromotionError::leader_unreachable(
                    &leader_addr.url(),
                    "leader is marked failed",
                ));
            }
            self.quiesce(&cluster.config, &leader_addr).await?;
        }

        self.refresh_replicas(cluster, leader).await;

        let mut election = CandidateElector::new(cluster).elect(kind);
        self.metrics.increment_elections();
        let diagnostics = std::mem::take(&mut election.diagnostics);
        cluster.absorb_diagnostics(diagnostics.into_entries());

        if election.is_none() {
            self.metrics.increment_no_candidate();
            return Err(PromotionError::no_candidate());
        }
        Ok(election)
    }

    /// Refuse long writes, then race a table flush against the switchover budget.
    async fn quiesce(&self, config: &FailoverConfig, leader: &NodeAddr) -> PromotionResult<()> {
        let threshold = Duration::from_secs(config.switch_wait_write_secs);
        match self.driver.long_running_writes(leader, threshold).await {
            Ok(0) => {}
            Ok(count) => {
                return Err(PromotionError::long_running_writes(
                    count,
                    config.switch_wait_write_secs,
                ))
            }
            Err(e) => return Err(PromotionError::leader_unreachable(&leader.url(), e)),
        }

        let driver = Arc::clone(&self.driver);
        let target = leader.clone();
        let mut flush = tokio::spawn(async move { driver.flush_tables(&target).await });
        let budget = Duration::from_secs(config.switch_wait_trx_secs);

        let url = leader.url();
        match tokio::time::timeout(budget, &mut flush).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => {
                let error = e.to_string();
                Logger::warn(
                    Event::StepFailed.as_str(),
                    &[("node", url.as_str()), ("op", "flush_tables"), ("error", error.as_str())],
                );
                Ok(())
            }
            Ok(Err(join)) => {
                let error = join.to_string();
                Logger::warn(
                    Event::StepFailed.as_str(),
                    &[("node", url.as_str()), ("op", "flush_tables"), ("error", error.as_str())],
                );
                Ok(())
            }
            Err(_) => {
                flush.abort();
                Err(PromotionError::quiesce_timeout(config.switch_wait_trx_secs))
            }
        }
    }

    async fn refresh_replicas(&self, cluster: &mut Cluster, leader: usize) {
        let targets: Vec<(usize, NodeAddr)> = cluster
            .nodes()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != leader)
            .map(|(i, n)| (i, n.addr.clone()))
            .collect();
        for (idx, addr) in targets {
            let result = self.driver.refresh(&addr).await;
            cluster.record_refresh(idx, result);
        }
    }

    /// Electing → Aborted; a promotion past its commit cannot be aborted.
    fn abort(
        &self,
        cluster: &mut Cluster,
        state: PromotionState,
        error: &PromotionError,
    ) -> PromotionResult<PromotionState> {
        let kind = match &state {
            PromotionState::Electing { kind } => kind.to_string(),
            _ => String::new(),
        };
        let aborted = state.abort(error.kind)?;
        Logger::error(
            Event::PromotionAborted.as_str(),
            &[
                ("cluster", cluster.name.as_str()),
                ("kind", kind.as_str()),
                ("code", error.code()),
                ("reason", error.message.as_str()),
            ],
        );
        cluster.diagnose(Severity::Error, error.code(), error.message.clone());
        self.metrics.increment_promotions_aborted();
        Ok(aborted)
    }

    // ==================
    // Phase 2: commit
    // ==================

    fn commit(
        &self,
        cluster: &mut Cluster,
        kind: ElectionKind,
        new: usize,
        election: &Election,
    ) -> RunContext {
        let old = cluster.leader_index().filter(|old| *old != new);
        cluster.commit_leader(new, kind == ElectionKind::Switchover);

        let new_addr = cluster.nodes()[new].addr.clone();
        let old_addr = old.map(|i| cluster.nodes()[i].addr.clone());

        let mut report = PromotionReport::new(kind, new_addr.url());
        report.basis = election.basis;
        report.last_resort = election.last_resort;
        report.old_leader = old_addr.as_ref().map(|a| a.url());

        let leader_url = new_addr.url();
        let old_url = report.old_leader.clone().unwrap_or_default();
        let kind_str = kind.to_string();
        Logger::info(
            Event::LeaderCommitted.as_str(),
            &[
                ("kind", kind_str.as_str()),
                ("leader", leader_url.as_str()),
                ("old_leader", old_url.as_str()),
            ],
        );

        RunContext {
            kind,
            config: cluster.config.clone(),
            new,
            new_addr,
            old,
            old_addr,
            report,
            halted: false,
            old_gtid: GtidList::empty(),
            old_binlog: None,
            new_gtid: GtidList::empty(),
            new_binlog: None,
            relay: None,
        }
    }

    /// Stop writes on a cooperating old leader.
    async fn freeze_old_leader(&self, ctx: &mut RunContext) {
        let Some(old) = ctx.old_addr.clone() else {
            return;
        };
        if !ctx.is_switchover() {
            return;
        }
        if ctx.config.fail_event_scheduler {
            let result = self.driver.set_event_scheduler(&old, false).await;
            self.note(ctx, "Committed", &old, "set_event_scheduler", result);
            if ctx.halted {
                return;
            }
        }
        let result = self.driver.freeze(&old).await;
        self.note(ctx, "Committed", &old, "freeze", result);
        if ctx.halted {
            return;
        }
        let result = self.driver.flush_tables_with_read_lock(&old).await;
        self.note(ctx, "Committed", &old, "flush_tables_with_read_lock", result);
    }

    // ==================
    // Phase 3: catch-up & crash record
    // ==================

    async fn catch_up(&self, cluster: &mut Cluster, ctx: &mut RunContext) {
        let new_addr = ctx.new_addr.clone();
        let old_url = ctx.report.old_leader.clone().unwrap_or_default();
        let mut record = CrashRecord::new(cluster.name.clone(), old_url, new_addr.url());

        if ctx.config.topology == TopologyKind::Galera {
            return;
        }

        if !ctx.halted {
            let budget = Duration::from_secs(ctx.config.switch_wait_catch_secs);
            let result = self.driver.read_all_relay_logs(&new_addr, budget).await;
            self.note(ctx, "CatchingUp", &new_addr, "read_all_relay_logs", result);
        }

        if !ctx.halted {
            let result = self.driver.refresh(&new_addr).await;
            if let Some(state) = self.note(ctx, "CatchingUp", &new_addr, "refresh", result) {
                if let Some(status) = &state.replication {
                    record.failover_source_log_file = status.source_log_file.clone();
                    record.failover_source_log_pos = status.read_source_log_pos;
                    record.failover_io_gtid = status.gtid_io_pos.to_string();
                }
                if state.flavor == DbFlavor::MySql && state.gtid_enabled {
                    record.failover_io_gtid = state.gtid_binlog_pos.to_string();
                }
                if let Some(binlog) = &state.binlog {
                    record.new_leader_log_file = binlog.file.clone();
                    record.new_leader_log_pos = binlog.pos;
                }
                record.semi_sync_in_sync = state.semi_sync_in_sync;
                cluster.record_refresh(ctx.new, Ok(state));
            }
        }

        if ctx.config.topology.is_relay_tier() && !ctx.halted {
            self.fast_forward_to_relay(cluster, ctx, &mut record).await;
        }

        self.persist_crash(cluster, ctx, record);
    }

    /// Align the candidate's binlog file number with what the relay has read.
    async fn fast_forward_to_relay(
        &self,
        cluster: &Cluster,
        ctx: &mut RunContext,
        record: &mut CrashRecord,
    ) {
        let relay = cluster
            .nodes()
            .iter()
            .position(|n| n.flags.relay_only && !n.is_failed());
        let Some(relay) = relay else {
            Logger::warn(
                Event::StepFailed.as_str(),
                &[("op", "fast_forward_to_relay"), ("error", "no relay node available")],
            );
            return;
        };
        let relay_node = &cluster.nodes()[relay];
        let Some(file_no) = relay_node
            .status()
            .and_then(|s| s.read_position().file_number())
        else {
            let url = relay_node.url();
            Logger::warn(
                Event::StepFailed.as_str(),
                &[
                    ("node", url.as_str()),
                    ("op", "fast_forward_to_relay"),
                    ("error", "relay reports no source position"),
                ],
            );
            return;
        };

        let base = cluster.nodes()[ctx.new]
            .state
            .binlog
            .as_ref()
            .and_then(|b| b.file.rsplit_once('.').map(|(base, _)| base.to_string()))
            .unwrap_or_else(|| "mariadb-bin".to_string());
        let target = BinlogPosition::new(format!("{}.{:06}", base, file_no), FIRST_EVENT_POS);

        let new_addr = ctx.new_addr.clone();
        let result = self.driver.reset_binary_log_to(&new_addr, &target).await;
        if self
            .note(ctx, "CatchingUp", &new_addr, "reset_binary_log_to", result)
            .is_some()
        {
            record.failover_source_log_file = target.file.clone();
            record.failover_source_log_pos = target.pos;
            ctx.relay = Some((relay, target));
        }
    }

    fn persist_crash(&self, cluster: &mut Cluster, ctx: &mut RunContext, record: CrashRecord) {
        let retention = ctx.config.crash_retention;
        if let Some(store) = &self.crash_store {
            match store.append(&record) {
                Ok(path) => {
                    let shown = path.display().to_string();
                    Logger::info(
                        Event::CrashRecorded.as_str(),
                        &[
                            ("path", shown.as_str()),
                            ("old_leader", record.old_leader_url.as_str()),
                            ("leader", record.elected_leader_url.as_str()),
                        ],
                    );
                    ctx.report.crash_record = Some(shown);
                    if let Err(e) = store.purge(retention) {
                        let error = e.to_string();
                        Logger::error(
                            Event::CrashStoreFailed.as_str(),
                            &[("op", "purge"), ("error", error.as_str())],
                        );
                    }
                }
                Err(e) => {
                    let error = e.to_string();
                    Logger::error(
                        Event::CrashStoreFailed.as_str(),
                        &[("op", "append"), ("error", error.as_str())],
                    );
                    cluster.diagnose(Severity::Error, "CRASH_STORE_FAILED", error);
                }
            }
        }
        cluster.push_crash(record, retention);
        self.metrics.increment_crashes_recorded();
    }

    // ==================
    // Phase 4: activate new leader
    // ==================

    async fn activate(&self, cluster: &mut Cluster, ctx: &mut RunContext) {
        let new_addr = ctx.new_addr.clone();
        if ctx.halted {
            return;
        }

        if !ctx.config.topology.is_multi_leader() {
            let result = self.driver.stop_replica(&new_addr).await;
            self.note(ctx, "Activating", &new_addr, "stop_replica", result);
            if ctx.halted {
                return;
            }
            let result = self.driver.reset_replica(&new_addr, true).await;
            self.note(ctx, "Activating", &new_addr, "reset_replica", result);
            if ctx.halted {
                return;
            }
        }

        let result = self.driver.set_read_only(&new_addr, false).await;
        self.note(ctx, "Activating", &new_addr, "set_read_only", result);
        if ctx.halted {
            return;
        }

        if let Err(e) = self
            .notifier
            .on_topology_changed(&new_addr, ctx.old_addr.as_ref())
            .await
        {
            self.notify_failed(&new_addr, "on_topology_changed", &e.to_string());
        }

        if ctx.config.route_settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(ctx.config.route_settle_ms)).await;
        }

        if let Some(path) = ctx.config.post_hook.clone() {
            let old = ctx.old.and_then(|i| cluster.node(i));
            if let (Some(old), Some(new)) = (old, cluster.node(ctx.new)) {
                let args = HookArgs::new(old, new);
                hooks::run_logged(HookStage::PostPromotion, &path, &args).await;
            }
        }

        if ctx.config.fail_event_scheduler {
            let result = self.driver.set_event_scheduler(&new_addr, true).await;
            self.note(ctx, "Activating", &new_addr, "set_event_scheduler", result);
            if ctx.halted {
                return;
            }
        }

        let result = self.driver.inject_marker(&new_addr).await;
        self.note(ctx, "Activating", &new_addr, "inject_marker", result);
        if ctx.halted {
            return;
        }

        let result = self.driver.binary_log_position(&new_addr).await;
        let binlog = self.note(ctx, "Activating", &new_addr, "binary_log_position", result);
        ctx.new_binlog = binlog;
        if ctx.halted {
            return;
        }
        let result = self.driver.gtid_binlog_pos(&new_addr).await;
        let gtids = self.note(ctx, "Activating", &new_addr, "gtid_binlog_pos", result);
        ctx.new_gtid = gtids.unwrap_or_default();
    }

    // ==================
    // Phase 5: demote old leader
    // ==================

    async fn demote_old_leader(&self, cluster: &mut Cluster, ctx: &mut RunContext) {
        if !ctx.is_switchover() {
            return;
        }
        let (Some(old), Some(old_addr)) = (ctx.old, ctx.old_addr.clone()) else {
            return;
        };
        if ctx.halted {
            self.hold(cluster, ctx, old).await;
            return;
        }

        let result = self.driver.refresh(&old_addr).await;
        if let Some(state) = self.note(ctx, "DemotingOldLeader", &old_addr, "refresh", result) {
            ctx.old_gtid = state.gtid_binlog_pos.clone();
            ctx.old_binlog = state.binlog.clone();
            cluster.record_refresh(old, Ok(state));
        }

        let result = self.driver.kill_client_connections(&old_addr).await;
        self.note(ctx, "DemotingOldLeader", &old_addr, "kill_client_connections", result);
        let result = self.driver.unlock_tables(&old_addr).await;
        self.note(ctx, "DemotingOldLeader", &old_addr, "unlock_tables", result);
        let result = self.driver.unfreeze(&old_addr).await;
        self.note(ctx, "DemotingOldLeader", &old_addr, "unfreeze", result);

        let repointed = if ctx.halted {
            false
        } else if ctx.config.topology.is_virtual() {
            true
        } else {
            self.repoint_old_leader(cluster, ctx, old, &old_addr).await
        };
        if !repointed {
            self.hold(cluster, ctx, old).await;
            return;
        }

        let result = self.driver.set_read_only(&old_addr, ctx.config.read_only).await;
        self.note(ctx, "DemotingOldLeader", &old_addr, "set_read_only", result);

        cluster.readmit_old_leader();
        if !ctx.config.topology.is_virtual() {
            ctx.report.repointed.push(old_addr.url());
        }
    }

    /// Point the old leader at the new one (or at the relay); false when it must be held.
    async fn repoint_old_leader(
        &self,
        cluster: &Cluster,
        ctx: &mut RunContext,
        old: usize,
        old_addr: &NodeAddr,
    ) -> bool {
        let result = self.driver.stop_replica(old_addr).await;
        self.note(ctx, "DemotingOldLeader", old_addr, "stop_replica", result);
        if ctx.halted {
            return false;
        }

        let old_node = &cluster.nodes()[old];
        let mut seeded = false;
        if addressing::needs_gtid_seed(old_node) && !ctx.new_gtid.is_empty() {
            let gtids = ctx.new_gtid.clone();
            let result = self.driver.set_gtid_slave_pos(old_addr, &gtids).await;
            seeded = self
                .note(ctx, "DemotingOldLeader", old_addr, "set_gtid_slave_pos", result)
                .is_some();
            if ctx.halted {
                return false;
            }
        }

        let target = match &ctx.relay {
            Some((relay, position)) => {
                let relay_node = &cluster.nodes()[*relay];
                Some((relay_node.addr.clone(), addressing::relay_mode(relay_node, position)))
            }
            None => {
                let position = ctx
                    .new_binlog
                    .clone()
                    .or_else(|| cluster.nodes()[ctx.new].state.binlog.clone());
                // positional mode needs real coordinates; GTID modes ignore them
                let position = match position {
                    Some(position) => Some(position),
                    None if old_node.has_gtid() || old_node.state.flavor == DbFlavor::MariaDb => {
                        Some(BinlogPosition::synthetic())
                    }
                    None => None,
                };
                position.map(|position| {
                    (
                        ctx.new_addr.clone(),
                        addressing::old_leader_mode(old_node, &position, seeded),
                    )
                })
            }
        };
        let Some((source, mode)) = target else {
            return false;
        };

        if !self.change_source(ctx, "DemotingOldLeader", old_addr, source, mode).await {
            return false;
        }
        let result = self.driver.start_replica(old_addr).await;
        self.note(ctx, "DemotingOldLeader", old_addr, "start_replica", result);
        !ctx.halted
    }

    // ==================
    // Phase 6: rewire replicas
    // ==================

    async fn rewire(&self, cluster: &mut Cluster, ctx: &mut RunContext) {
        let relay_tier = ctx.config.topology.is_relay_tier();
        let targets: Vec<usize> = (0..cluster.len())
            .filter(|i| *i != ctx.new && Some(*i) != ctx.old)
            .collect();

        for idx in targets {
            let node = cluster.nodes()[idx].clone();
            let skip = if node.is_leader() {
                Some("leader")
            } else if node.is_failed() || node.role == NodeRole::Unreachable {
                Some("unreachable")
            } else if node.flags.ignored {
                Some("ignored")
            } else if relay_tier && !node.flags.relay_only {
                Some("behind_relay")
            } else {
                None
            };
            if let Some(reason) = skip {
                let url = node.url();
                Logger::info(
                    Event::ReplicaSkipped.as_str(),
                    &[("node", url.as_str()), ("reason", reason)],
                );
                ctx.report.skipped.push(url);
                continue;
            }

            if ctx.halted {
                self.hold(cluster, ctx, idx).await;
                continue;
            }
            self.repoint_replica(cluster, ctx, idx, &node).await;
        }
    }

    async fn repoint_replica(
        &self,
        cluster: &mut Cluster,
        ctx: &mut RunContext,
        idx: usize,
        node: &Node,
    ) {
        let addr = node.addr.clone();
        let failures_before = ctx.report.failures.len();

        let plan = if node.flags.relay_only && ctx.config.topology.is_relay_tier() {
            let position = ctx
                .relay
                .as_ref()
                .map(|(_, p)| p.clone())
                .or_else(|| ctx.new_binlog.clone())
                .unwrap_or_else(BinlogPosition::synthetic);
            RepointPlan::Direct(addressing::relay_mode(node, &position))
        } else {
            addressing::replica_plan(
                node,
                &cluster.nodes()[ctx.new],
                ctx.config.autorejoin_positional_pseudo_gtid,
            )
        };

        let mode = match plan {
            RepointPlan::Direct(mode) => mode,
            RepointPlan::PseudoGtid => match self.pseudo_gtid_position(ctx, &addr).await {
                Some(position) => ReplicationAddressingMode::Positional(position),
                None => {
                    self.hold(cluster, ctx, idx).await;
                    return;
                }
            },
            RepointPlan::Hold => {
                self.hold(cluster, ctx, idx).await;
                return;
            }
        };

        if ctx.is_switchover() && ctx.config.switch_replica_wait_catch && !node.flags.relay_only {
            let budget = Duration::from_secs(ctx.config.switch_wait_catch_secs);
            if node.state.flavor == DbFlavor::MariaDb && !ctx.old_gtid.is_empty() {
                let gtids = ctx.old_gtid.clone();
                let result = self.driver.wait_for_gtid(&addr, &gtids, budget).await;
                self.note(ctx, "Rewiring", &addr, "wait_for_gtid", result);
            } else if let Some(position) = ctx.old_binlog.clone() {
                let result = self.driver.wait_for_position(&addr, &position, budget).await;
                self.note(ctx, "Rewiring", &addr, "wait_for_position", result);
            }
            if ctx.halted {
                self.hold(cluster, ctx, idx).await;
                return;
            }
        }

        let result = self.driver.stop_replica(&addr).await;
        self.note(ctx, "Rewiring", &addr, "stop_replica", result);
        if ctx.halted {
            self.hold(cluster, ctx, idx).await;
            return;
        }

        let mode_str = mode.to_string();
        let source = ctx.new_addr.clone();
        if !self.change_source(ctx, "Rewiring", &addr, source, mode).await {
            self.hold(cluster, ctx, idx).await;
            return;
        }

        let result = self.driver.start_replica(&addr).await;
        self.note(ctx, "Rewiring", &addr, "start_replica", result);
        if ctx.halted {
            self.hold(cluster, ctx, idx).await;
            return;
        }

        if !node.flags.relay_only {
            let result = self.driver.set_read_only(&addr, ctx.config.read_only).await;
            self.note(ctx, "Rewiring", &addr, "set_read_only", result);
            if ctx.halted {
                self.hold(cluster, ctx, idx).await;
                return;
            }
        }

        if ctx.report.failures.len() == failures_before {
            let url = addr.url();
            let source = ctx.new_addr.url();
            Logger::info(
                Event::ReplicaRepointed.as_str(),
                &[
                    ("node", url.as_str()),
                    ("source", source.as_str()),
                    ("mode", mode_str.as_str()),
                ],
            );
            ctx.report.repointed.push(url);
        }
    }

    /// New leader coordinates matching the replica's last pseudo-GTID marker.
    async fn pseudo_gtid_position(
        &self,
        ctx: &mut RunContext,
        replica: &NodeAddr,
    ) -> Option<BinlogPosition> {
        let result = self.driver.last_pseudo_gtid(replica).await;
        let mark = self
            .note(ctx, "Rewiring", replica, "last_pseudo_gtid", result)
            .flatten()?;
        let new_addr = ctx.new_addr.clone();
        let result = self
            .driver
            .position_after_pseudo_gtid(&new_addr, &mark.marker, mark.events_after)
            .await;
        self.note(ctx, "Rewiring", &new_addr, "position_after_pseudo_gtid", result)
            .flatten()
    }

    // ==================
    // Phase 7: bookkeeping
    // ==================

    fn bookkeep(&self, cluster: &mut Cluster, ctx: &mut RunContext) {
        cluster.reset_leader_fail_count();
        let failover = ctx.kind == ElectionKind::Failover;
        if failover {
            cluster.record_failover(Utc::now());
        }

        self.metrics.record_promotion(failover);
        self.metrics
            .add_step_failures(u64::try_from(ctx.report.failures.len()).unwrap_or(u64::MAX));

        let report = &mut ctx.report;
        report.finished_at = Some(Utc::now());
        let failures = report.failures.len().to_string();
        let held = report.held.len().to_string();
        let kind = report.kind.to_string();

        if ctx.halted || !report.held.is_empty() {
            report.outcome = PromotionOutcome::Degraded;
            self.metrics.increment_promotions_degraded();
            Logger::warn(
                Event::PromotionDegraded.as_str(),
                &[
                    ("kind", kind.as_str()),
                    ("leader", report.elected.as_str()),
                    ("failures", failures.as_str()),
                    ("held", held.as_str()),
                ],
            );
            cluster.diagnose(
                Severity::Warn,
                Event::PromotionDegraded.as_str(),
                format!(
                    "{} onto {} finished with {} failed step(s) and {} replica(s) in maintenance",
                    kind, report.elected, failures, held
                ),
            );
        } else {
            Logger::info(
                Event::PromotionComplete.as_str(),
                &[
                    ("kind", kind.as_str()),
                    ("leader", report.elected.as_str()),
                    ("failures", failures.as_str()),
                ],
            );
        }
    }

    // ==================
    // Helpers
    // ==================

    fn enter(&self, state: &PromotionState, ctx: &RunContext) {
        let leader = ctx.new_addr.url();
        Logger::info(
            Event::PromotionPhase.as_str(),
            &[("phase", state.state_name()), ("leader", leader.as_str())],
        );
    }

    /// Record the outcome of one remote step; failures never propagate.
    pub(super) fn note<T>(
        &self,
        ctx: &mut RunContext,
        phase: &'static str,
        node: &NodeAddr,
        op: &'static str,
        result: DriverResult<T>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                let url = node.url();
                let message = e.to_string();
                Logger::error(
                    Event::StepFailed.as_str(),
                    &[
                        ("phase", phase),
                        ("node", url.as_str()),
                        ("op", op),
                        ("error", message.as_str()),
                    ],
                );
                ctx.report.failures.push(StepFailure {
                    phase,
                    node: url,
                    op,
                    message,
                });
                if !ctx.config.best_effort {
                    ctx.halted = true;
                }
                None
            }
        }
    }

    pub(super) async fn change_source(
        &self,
        ctx: &mut RunContext,
        phase: &'static str,
        node: &NodeAddr,
        source: NodeAddr,
        mode: ReplicationAddressingMode,
    ) -> bool {
        let request = ChangeSourceRequest {
            source,
            mode,
            heartbeat_secs: ctx.config.replication_heartbeat_secs,
            connect_retry_secs: ctx.config.replication_connect_retry_secs,
            ssl: ctx.config.replication_ssl,
            channel: ctx.config.replication_channel.clone(),
        };
        let result = self.driver.change_source(node, &request).await;
        self.note(ctx, phase, node, "change_source", result).is_some() || !ctx.halted
    }

    /// Put a node in maintenance instead of guessing how to repoint it.
    async fn hold(&self, cluster: &mut Cluster, ctx: &mut RunContext, idx: usize) {
        let Some(node) = cluster.node_mut(idx) else {
            return;
        };
        node.flags.maintenance = true;
        let addr = node.addr.clone();
        let url = addr.url();
        Logger::warn(Event::ReplicaMaintenance.as_str(), &[("node", url.as_str())]);
        cluster.diagnose(
            Severity::Warn,
            Event::ReplicaMaintenance.as_str(),
            format!("{} held in maintenance after promotion", url),
        );
        ctx.report.held.push(url);

        if let Err(e) = self.notifier.on_maintenance(&addr).await {
            self.notify_failed(&addr, "on_maintenance", &e.to_string());
        }
    }

    fn notify_failed(&self, node: &NodeAddr, op: &'static str, error: &str) {
        let url = node.url();
        Logger::error(
            Event::NotifyFailed.as_str(),
            &[("node", url.as_str()), ("op", op), ("error", error)],
        );
    }
}
