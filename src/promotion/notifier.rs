//! Router notification
//!
//! Proxies and query routers in front of the cluster are told about topology
//! changes through `TopologyNotifier`. Calls are fire-and-forget: the
//! orchestrator logs a failure and moves on.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::topology::NodeAddr;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("router {router} rejected the change: {message}")]
    Rejected { router: String, message: String },

    #[error("router {router} unreachable: {message}")]
    Unreachable { router: String, message: String },
}

#[async_trait]
pub trait TopologyNotifier: Send + Sync {
    /// The leader moved from `old_leader` to `new_leader`.
    async fn on_topology_changed(
        &self,
        new_leader: &NodeAddr,
        old_leader: Option<&NodeAddr>,
    ) -> Result<(), NotifyError>;

    /// `node` was placed in maintenance and must not receive traffic.
    async fn on_maintenance(&self, node: &NodeAddr) -> Result<(), NotifyError>;
}

/// For deployments without managed routers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl TopologyNotifier for NoopNotifier {
    async fn on_topology_changed(
        &self,
        _new_leader: &NodeAddr,
        _old_leader: Option<&NodeAddr>,
    ) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn on_maintenance(&self, _node: &NodeAddr) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// One notification seen by `RecordingNotifier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    TopologyChanged {
        new_leader: String,
        old_leader: Option<String>,
    },
    Maintenance {
        node: String,
    },
}

/// Keeps every notification in order; optionally rejects them all.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
    reject: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose router refuses every change.
    pub fn rejecting() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, notification: Notification) -> Result<(), NotifyError> {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification);
        if self.reject {
            return Err(NotifyError::Rejected {
                router: "recording".to_string(),
                message: "rejected".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TopologyNotifier for RecordingNotifier {
    async fn on_topology_changed(
        &self,
        new_leader: &NodeAddr,
        old_leader: Option<&NodeAddr>,
    ) -> Result<(), NotifyError> {
        self.record(Notification::TopologyChanged {
            new_leader: new_leader.url(),
            old_leader: old_leader.map(|a| a.url()),
        })
    }

    async fn on_maintenance(&self, node: &NodeAddr) -> Result<(), NotifyError> {
        self.record(Notification::Maintenance { node: node.url() })
    }
}
