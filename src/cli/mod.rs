//! CLI module for replmgr
//!
//! Provides command-line interface for:
//! - monitor: Watch the cluster, fail over unattended, serve the operator API
//! - switchover / failover: One-shot operator promotion
//! - elect: Dry-run election
//! - crashes: Persisted crash history

mod args;
mod commands;
mod errors;
mod io;
mod topology_file;

pub use args::{Cli, Command, ElectArg};
pub use commands::{crashes, elect, monitor, promote, run, run_command};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_json_file, write_error, write_response};
pub use topology_file::{TopologyFile, TopologyNode};
