//! CLI argument definitions using clap
//!
//! Commands:
//! - replmgr monitor --config <path> --topology <path>
//! - replmgr switchover --config <path> --topology <path>
//! - replmgr failover --config <path> --topology <path>
//! - replmgr elect --config <path> --topology <path> [--kind failover|switchover]
//! - replmgr crashes --config <path>

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::election::ElectionKind;

/// replmgr - failover and switchover orchestration for replicated MariaDB/MySQL
#[derive(Parser, Debug)]
#[command(name = "replmgr")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Monitor the cluster, fail over unattended and serve the operator API
    Monitor {
        /// Path to configuration file
        #[arg(long, default_value = "./replmgr.json")]
        config: PathBuf,

        /// Sandbox topology the node driver is seeded from
        #[arg(long)]
        topology: PathBuf,
    },

    /// Move the leader role to the best replica while the leader is alive
    Switchover {
        #[arg(long, default_value = "./replmgr.json")]
        config: PathBuf,

        #[arg(long)]
        topology: PathBuf,
    },

    /// Force a failover without consulting the precondition gate
    Failover {
        #[arg(long, default_value = "./replmgr.json")]
        config: PathBuf,

        #[arg(long)]
        topology: PathBuf,
    },

    /// Show who would be elected, without changing anything
    Elect {
        #[arg(long, default_value = "./replmgr.json")]
        config: PathBuf,

        #[arg(long)]
        topology: PathBuf,

        #[arg(long, value_enum, default_value_t = ElectArg::Failover)]
        kind: ElectArg,
    },

    /// List the persisted crash history
    Crashes {
        #[arg(long, default_value = "./replmgr.json")]
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ElectArg {
    Failover,
    Switchover,
}

impl From<ElectArg> for ElectionKind {
    fn from(arg: ElectArg) -> Self {
        match arg {
            ElectArg::Failover => ElectionKind::Failover,
            ElectArg::Switchover => ElectionKind::Switchover,
        }
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
