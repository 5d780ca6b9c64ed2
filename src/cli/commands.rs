//! CLI command implementations
//!
//! Every command loads and validates the configuration first. Commands that
//! touch nodes build a `ClusterHandle` over the sandbox driver and observe
//! the cluster once before acting.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;

use crate::config::ReplmgrConfig;
use crate::election::ElectionKind;
use crate::http_server::HttpServer;
use crate::monitor::{spawn_arbitrator, spawn_monitor, ClusterHandle};
use crate::observability::{Event, Logger};
use crate::promotion::CrashStore;

use super::args::{Cli, Command};
use super::errors::{CliError, CliResult};
use super::io::{read_json_file, write_response};
use super::topology_file::TopologyFile;

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        match cmd {
            Command::Monitor { config, topology } => monitor(&config, &topology).await,
            Command::Switchover { config, topology } => {
                promote(&config, &topology, ElectionKind::Switchover).await
            }
            Command::Failover { config, topology } => {
                promote(&config, &topology, ElectionKind::Failover).await
            }
            Command::Elect {
                config,
                topology,
                kind,
            } => elect(&config, &topology, kind.into()).await,
            Command::Crashes { config } => crashes(&config),
        }
    })
}

fn load_config(path: &Path) -> CliResult<ReplmgrConfig> {
    let config = ReplmgrConfig::load(path)?;
    let nodes = config.nodes.len().to_string();
    Logger::info(
        Event::ConfigLoaded.as_str(),
        &[("cluster", config.cluster_name.as_str()), ("nodes", nodes.as_str())],
    );
    Ok(config)
}

/// Configuration plus a handle over the sandbox driver, observed once.
async fn open(config_path: &Path, topology_path: &Path) -> CliResult<(ReplmgrConfig, ClusterHandle)> {
    let config = load_config(config_path)?;
    let topology: TopologyFile = read_json_file(topology_path)
        .map_err(|e| CliError::topology_error(e.message().to_string()))?;
    let driver = Arc::new(topology.into_driver(&config)?);
    let handle = ClusterHandle::from_config(&config, driver)?;
    handle.tick().await;
    Ok((config, handle))
}

/// Run the monitoring loop, the arbitrator loop and the operator API until
/// Ctrl-C.
pub async fn monitor(config_path: &Path, topology_path: &Path) -> CliResult<()> {
    let (config, handle) = open(config_path, topology_path).await?;
    Logger::info(
        Event::CoordinatorStart.as_str(),
        &[("cluster", config.cluster_name.as_str())],
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let every = Duration::from_millis(config.monitoring_tick_ms);
    let monitor_task = spawn_monitor(handle.clone(), every, shutdown_rx.clone());
    let arbitrator_task = spawn_arbitrator(handle.clone(), every, shutdown_rx.clone());

    let server_task = if config.http.enabled {
        let server = HttpServer::new(config.http.clone(), handle.clone());
        let mut rx = shutdown_rx.clone();
        Some(tokio::spawn(server.start(async move {
            let _ = rx.wait_for(|stop| *stop).await;
        })))
    } else {
        None
    };

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CliError::io_error(format!("failed to listen for Ctrl-C: {}", e)))?;
    let _ = shutdown_tx.send(true);

    let _ = monitor_task.await;
    let _ = arbitrator_task.await;
    if let Some(task) = server_task {
        match task.await {
            Ok(Err(e)) => return Err(CliError::boot_failed(format!("HTTP server failed: {}", e))),
            Ok(Ok(())) | Err(_) => {}
        }
    }

    write_response(&json!({
        "cluster": handle.snapshot().await,
        "metrics": handle.metrics().to_json(),
    }))
}

/// Operator switchover or forced failover.
pub async fn promote(config_path: &Path, topology_path: &Path, kind: ElectionKind) -> CliResult<()> {
    let (_, handle) = open(config_path, topology_path).await?;
    let report = match kind {
        ElectionKind::Switchover => handle.switchover().await?,
        ElectionKind::Failover => handle.failover().await?,
    };
    write_response(&report)
}

/// Dry-run election.
pub async fn elect(config_path: &Path, topology_path: &Path, kind: ElectionKind) -> CliResult<()> {
    let (_, handle) = open(config_path, topology_path).await?;
    let election = handle.elect(kind).await;
    write_response(&election)
}

/// Persisted crash history, oldest first.
pub fn crashes(config_path: &Path) -> CliResult<()> {
    let config = load_config(config_path)?;
    let store = CrashStore::new(config.crash_dir());
    let records = store
        .load_all()
        .map_err(|e| CliError::io_error(e.to_string()))?;
    write_response(&records)
}
