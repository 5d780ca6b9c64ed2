//! False-positive suppressors
//!
//! Run only after every gate check passed. Each one looks for evidence that
//! the leader is in fact alive and only unreachable from the coordinator:
//! - an HTTP endpoint on the leader's host still answers 200
//! - replicas still receive heartbeats from it
//! - the load balancer, after a monitor restart, still sees it running
//!
//! A probe that cannot be performed counts as "really down".

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::FalsePositiveConfig;
use crate::observability::{Event, Logger};
use crate::topology::{NodeAddr, NodeDriver};

/// Evidence that the leader is still alive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suppression {
    ExternalProbe { url: String },
    HeartbeatIncreasing { node: String },
    LoadBalancerRunning { status: String },
}

impl Suppression {
    pub fn code(&self) -> &'static str {
        match self {
            Suppression::ExternalProbe { .. } => "FALSE_POSITIVE_EXTERNAL",
            Suppression::HeartbeatIncreasing { .. } => "FALSE_POSITIVE_HEARTBEAT",
            Suppression::LoadBalancerRunning { .. } => "FALSE_POSITIVE_LOAD_BALANCER",
        }
    }

    pub fn description(&self) -> String {
        match self {
            Suppression::ExternalProbe { url } => {
                format!("external check {} answered, leader presumed alive", url)
            }
            Suppression::HeartbeatIncreasing { node } => {
                format!("replica {} still receives leader heartbeats", node)
            }
            Suppression::LoadBalancerRunning { status } => {
                format!("load balancer reports the leader as '{}'", status)
            }
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadBalancerError {
    #[error("load balancer unreachable: {0}")]
    Unreachable(String),

    #[error("load balancer has no monitor to restart")]
    NoMonitor,
}

/// Load balancer keeping its own view of backend health.
#[async_trait]
pub trait LoadBalancerMonitor: Send + Sync {
    /// Restart the (possibly stopped) backend monitor.
    async fn restart_monitor(&self) -> Result<(), LoadBalancerError>;

    /// Status string the load balancer reports for `node`.
    async fn server_status(&self, node: &NodeAddr) -> Result<String, LoadBalancerError>;
}

pub struct FalsePositiveSuppressors {
    driver: Arc<dyn NodeDriver>,
    http: reqwest::Client,
    load_balancer: Option<Arc<dyn LoadBalancerMonitor>>,
}

impl FalsePositiveSuppressors {
    pub fn new(driver: Arc<dyn NodeDriver>) -> Self {
        Self {
            driver,
            http: reqwest::Client::new(),
            load_balancer: None,
        }
    }

    pub fn with_load_balancer(mut self, load_balancer: Arc<dyn LoadBalancerMonitor>) -> Self {
        self.load_balancer = Some(load_balancer);
        self
    }

    /// First suppressor that finds the leader alive, if any.
    ///
    /// `replicas` are the nodes that follow the leader directly.
    pub async fn check(
        &self,
        config: &FalsePositiveConfig,
        leader: &NodeAddr,
        replicas: &[NodeAddr],
    ) -> Option<Suppression> {
        if config.external_check {
            if let Some(found) = self.external_ok(config, leader).await {
                return Some(found);
            }
        }
        if config.heartbeat_check {
            let window = Duration::from_millis(config.heartbeat_window_ms);
            if let Some(found) = self.heartbeat_increasing(replicas, window).await {
                return Some(found);
            }
        }
        if config.load_balancer_check {
            let window = Duration::from_millis(config.load_balancer_window_ms);
            if let Some(found) = self.load_balancer_running(leader, window).await {
                return Some(found);
            }
        }
        None
    }

    async fn external_ok(
        &self,
        config: &FalsePositiveConfig,
        leader: &NodeAddr,
    ) -> Option<Suppression> {
        let url = format!("http://{}:{}", leader.host, config.external_port);
        let response = self
            .http
            .get(&url)
            .timeout(Duration::from_millis(config.external_timeout_ms))
            .send()
            .await;
        match response {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                Some(Suppression::ExternalProbe { url })
            }
            Ok(resp) => {
                let status = resp.status().to_string();
                Logger::trace(
                    Event::ProbeFailed.as_str(),
                    &[("probe", "external"), ("url", url.as_str()), ("status", status.as_str())],
                );
                None
            }
            Err(e) => {
                let error = e.to_string();
                Logger::trace(
                    Event::ProbeFailed.as_str(),
                    &[("probe", "external"), ("url", url.as_str()), ("error", error.as_str())],
                );
                None
            }
        }
    }

    async fn heartbeat_increasing(
        &self,
        replicas: &[NodeAddr],
        window: Duration,
    ) -> Option<Suppression> {
        let mut before = Vec::with_capacity(replicas.len());
        for replica in replicas {
            match self.driver.heartbeat_counter(replica).await {
                Ok(count) => before.push((replica, count)),
                Err(e) => {
                    let url = replica.url();
                    let error = e.to_string();
                    Logger::trace(
                        Event::ProbeFailed.as_str(),
                        &[("probe", "heartbeat"), ("node", url.as_str()), ("error", error.as_str())],
                    );
                }
            }
        }
        if before.is_empty() {
            return None;
        }

        tokio::time::sleep(window).await;

        for (replica, count) in before {
            if let Ok(after) = self.driver.heartbeat_counter(replica).await {
                if after > count {
                    return Some(Suppression::HeartbeatIncreasing {
                        node: replica.url(),
                    });
                }
            }
        }
        None
    }

    async fn load_balancer_running(&self, leader: &NodeAddr, window: Duration) -> Option<Suppression> {
        let load_balancer = self.load_balancer.as_ref()?;
        if let Err(e) = load_balancer.restart_monitor().await {
            let error = e.to_string();
            Logger::trace(
                Event::ProbeFailed.as_str(),
                &[("probe", "load_balancer"), ("error", error.as_str())],
            );
            return None;
        }

        tokio::time::sleep(window).await;

        match load_balancer.server_status(leader).await {
            Ok(status) if status.contains("Running") => {
                Some(Suppression::LoadBalancerRunning { status })
            }
            Ok(_) => None,
            Err(e) => {
                let error = e.to_string();
                Logger::trace(
                    Event::ProbeFailed.as_str(),
                    &[("probe", "load_balancer"), ("error", error.as_str())],
                );
                None
            }
        }
    }
}
