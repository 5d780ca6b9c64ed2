//! Replication addressing modes
//!
//! How a node is told where to resume replicating from its new source. The
//! selection is a fixed precedence: GTID modes first, raw coordinates last.
//! Call sites match on the variant; no other code inspects flavors.

use std::fmt;

use crate::topology::{BinlogPosition, DbFlavor, GtidUsage, Node};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationAddressingMode {
    /// MySQL `MASTER_AUTO_POSITION=1`.
    GtidAutoPosition,
    /// MariaDB `MASTER_USE_GTID=slave_pos`.
    MariaDbSlavePos,
    /// MariaDB `MASTER_USE_GTID=current_pos`.
    MariaDbCurrentPos,
    /// File and offset in the source's binary log.
    Positional(BinlogPosition),
}

impl fmt::Display for ReplicationAddressingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GtidAutoPosition => write!(f, "gtid_auto_position"),
            Self::MariaDbSlavePos => write!(f, "slave_pos"),
            Self::MariaDbCurrentPos => write!(f, "current_pos"),
            Self::Positional(pos) => write!(f, "positional({})", pos),
        }
    }
}

/// What to do with a replica during the rewire phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepointPlan {
    Direct(ReplicationAddressingMode),
    /// Locate the last pseudo-GTID marker on both sides and repoint positionally.
    PseudoGtid,
    /// No safe way to repoint: hold in maintenance.
    Hold,
}

/// Whether the old leader's GTID replica position must be seeded before it
/// can follow the new leader by GTID.
pub fn needs_gtid_seed(old_leader: &Node) -> bool {
    old_leader.state.flavor == DbFlavor::MariaDb
        && old_leader
            .status()
            .map_or(true, |s| s.using_gtid == GtidUsage::No)
}

/// Mode for the demoted old leader.
///
/// A seeded MariaDB node uses its forced replica position; otherwise its own
/// binlog position has diverged from any replica position and `current_pos`
/// applies. Nodes without any GTID scheme fall back to the new leader's
/// coordinates.
pub fn old_leader_mode(
    old_leader: &Node,
    new_leader_binlog: &BinlogPosition,
    seeded: bool,
) -> ReplicationAddressingMode {
    if old_leader.uses_mysql_gtid() {
        ReplicationAddressingMode::GtidAutoPosition
    } else if old_leader.state.flavor == DbFlavor::MariaDb {
        if seeded {
            ReplicationAddressingMode::MariaDbSlavePos
        } else {
            ReplicationAddressingMode::MariaDbCurrentPos
        }
    } else {
        ReplicationAddressingMode::Positional(new_leader_binlog.clone())
    }
}

/// Plan for a replica following the new leader.
pub fn replica_plan(replica: &Node, new_leader: &Node, pseudo_gtid: bool) -> RepointPlan {
    if replica.uses_mysql_gtid() && new_leader.uses_mysql_gtid() {
        RepointPlan::Direct(ReplicationAddressingMode::GtidAutoPosition)
    } else if replica.state.flavor == DbFlavor::MariaDb {
        RepointPlan::Direct(ReplicationAddressingMode::MariaDbSlavePos)
    } else if pseudo_gtid {
        RepointPlan::PseudoGtid
    } else {
        RepointPlan::Hold
    }
}

/// Mode for a relay node, or for a node that follows one.
pub fn relay_mode(relay: &Node, position: &BinlogPosition) -> ReplicationAddressingMode {
    if relay.has_gtid() {
        ReplicationAddressingMode::MariaDbSlavePos
    } else {
        ReplicationAddressingMode::Positional(position.clone())
    }
}

/// Mode for the ring child that now follows `parent`.
pub fn ring_mode(parent: &Node) -> ReplicationAddressingMode {
    if parent.uses_mysql_gtid() {
        ReplicationAddressingMode::GtidAutoPosition
    } else {
        ReplicationAddressingMode::MariaDbSlavePos
    }
}
