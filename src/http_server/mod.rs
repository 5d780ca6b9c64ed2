//! # Operator HTTP API
//!
//! Axum server exposing the monitored cluster to operators.
//!
//! # Endpoints
//!
//! - `/health`, `/metrics` - coordinator liveness and counters
//! - `/cluster/status`, `/cluster/topology` - cluster view
//! - `/cluster/diagnostics`, `/cluster/crashes`, `/cluster/election` - journal, crash history, dry-run election
//! - `/cluster/switchover`, `/cluster/failover`, `/cluster/mode` - operator commands

pub mod cluster_routes;
pub mod config;
pub mod observability_routes;
pub mod server;

pub use config::HttpServerConfig;
pub use server::HttpServer;
