//! Replication topology
//!
//! - `Node` / `NodeState`: one database process as last observed
//! - `Cluster`: the aggregate root owning the roster and the leader reference
//! - `GtidList`: MariaDB and MySQL GTID sets
//! - `NodeDriver`: remote operations on a node, with `SandboxDriver` as the
//!   in-memory implementation

mod cluster;
mod driver;
mod errors;
mod gtid;
mod node;
pub mod sandbox;

pub use cluster::{Cluster, ClusterSnapshot, MonitorStatus, NodeSnapshot};
pub use driver::{ChangeSourceRequest, NodeDriver, PseudoGtidMark};
pub use errors::{DriverError, DriverResult, GtidParseError};
pub use gtid::{Gtid, GtidList};
pub use node::{
    BinlogPosition, DbFlavor, GtidUsage, Node, NodeAddr, NodeFlags, NodeRole, NodeState,
    ReplicationStats, ReplicationStatus, SYNTHETIC_LOG_FILE, SYNTHETIC_LOG_POS,
};
pub use sandbox::{DriverCall, SandboxDriver};
