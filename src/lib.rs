//! replmgr - failover and switchover orchestration for replicated
//! MariaDB/MySQL clusters
//!
//! - `topology`: nodes, the cluster aggregate and the node driver seam
//! - `election`: deterministic candidate ranking
//! - `gate`: failover preconditions and false-positive suppressors
//! - `promotion`: the seven-phase leader change and crash records
//! - `arbitration`: split-brain arbitrator client
//! - `monitor`: shared handle, monitoring tick and background loops
//! - `http_server`, `cli`: operator surfaces

pub mod arbitration;
pub mod cli;
pub mod config;
pub mod election;
pub mod gate;
pub mod http_server;
pub mod monitor;
pub mod observability;
pub mod promotion;
pub mod topology;
