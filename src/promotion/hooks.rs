//! Lifecycle hooks
//!
//! Operator scripts run before the commit and after the new leader is
//! writable. They receive six positional arguments:
//! old host, new host, old port, new port, old router name, new router name.
//!
//! A hook never changes the outcome of a promotion: its exit status and
//! combined output are logged and the run continues.

use std::path::Path;

use thiserror::Error;
use tokio::process::Command;

use crate::observability::{Event, Logger};
use crate::topology::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStage {
    PrePromotion,
    PostPromotion,
}

impl HookStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookStage::PrePromotion => "pre_promotion",
            HookStage::PostPromotion => "post_promotion",
        }
    }
}

/// Positional arguments passed to a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookArgs {
    pub old_host: String,
    pub new_host: String,
    pub old_port: u16,
    pub new_port: u16,
    pub old_router: String,
    pub new_router: String,
}

impl HookArgs {
    pub fn new(old_leader: &Node, new_leader: &Node) -> Self {
        Self {
            old_host: old_leader.addr.host.clone(),
            new_host: new_leader.addr.host.clone(),
            old_port: old_leader.addr.port,
            new_port: new_leader.addr.port,
            old_router: old_leader.router_name.clone(),
            new_router: new_leader.router_name.clone(),
        }
    }

    pub fn to_argv(&self) -> Vec<String> {
        vec![
            self.old_host.clone(),
            self.new_host.clone(),
            self.old_port.to_string(),
            self.new_port.to_string(),
            self.old_router.clone(),
            self.new_router.clone(),
        ]
    }
}

/// What a finished hook reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookOutput {
    pub success: bool,
    pub status: String,
    pub output: String,
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("cannot run hook {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run a hook to completion.
pub async fn run_hook(path: &Path, args: &HookArgs) -> Result<HookOutput, HookError> {
    let output = Command::new(path)
        .args(args.to_argv())
        .output()
        .await
        .map_err(|source| HookError::Spawn {
            path: path.display().to_string(),
            source,
        })?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok(HookOutput {
        success: output.status.success(),
        status: output.status.to_string(),
        output: combined,
    })
}

/// Run a hook and log its outcome; returns true when it exited successfully.
pub async fn run_logged(stage: HookStage, path: &Path, args: &HookArgs) -> bool {
    let shown = path.display().to_string();
    match run_hook(path, args).await {
        Ok(out) if out.success => {
            Logger::info(
                Event::HookExecuted.as_str(),
                &[
                    ("stage", stage.as_str()),
                    ("hook", shown.as_str()),
                    ("status", out.status.as_str()),
                    ("output", out.output.as_str()),
                ],
            );
            true
        }
        Ok(out) => {
            Logger::error(
                Event::HookFailed.as_str(),
                &[
                    ("stage", stage.as_str()),
                    ("hook", shown.as_str()),
                    ("status", out.status.as_str()),
                    ("output", out.output.as_str()),
                ],
            );
            false
        }
        Err(e) => {
            let error = e.to_string();
            Logger::error(
                Event::HookFailed.as_str(),
                &[
                    ("stage", stage.as_str()),
                    ("hook", shown.as_str()),
                    ("error", error.as_str()),
                ],
            );
            false
        }
    }
}
