//! GTID sets
//!
//! Two wire formats are understood:
//! - MariaDB: comma separated `domain-server-sequence` triples (`0-1-100,1-2-5`)
//! - MySQL: comma separated `uuid:interval[:interval]` entries
//!   (`3E11FA47-71CA-11E1-9E33-C80AA9429562:1-100`)
//!
//! MySQL entries are mapped onto the MariaDB shape: domain 0, server id
//! derived from the CRC32 of the upper-cased UUID, sequence = highest
//! transaction number of the entry.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::GtidParseError;

/// One GTID: the last transaction seen from a (domain, server) origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Gtid {
    pub domain_id: u32,
    pub server_id: u64,
    pub seq_no: u64,
}

impl Gtid {
    pub fn new(domain_id: u32, server_id: u64, seq_no: u64) -> Self {
        Self {
            domain_id,
            server_id,
            seq_no,
        }
    }

    fn parse_mariadb(raw: &str) -> Result<Self, GtidParseError> {
        let mut parts = raw.trim().splitn(3, '-');
        let (Some(d), Some(s), Some(n)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(GtidParseError::new(raw, "expected domain-server-sequence"));
        };
        let domain_id = d
            .parse()
            .map_err(|_| GtidParseError::new(raw, "invalid domain id"))?;
        let server_id = s
            .parse()
            .map_err(|_| GtidParseError::new(raw, "invalid server id"))?;
        let seq_no = n
            .parse()
            .map_err(|_| GtidParseError::new(raw, "invalid sequence"))?;
        Ok(Self::new(domain_id, server_id, seq_no))
    }

    fn parse_mysql(raw: &str) -> Result<Self, GtidParseError> {
        let mut parts = raw.split(':');
        let uuid = parts
            .next()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| GtidParseError::new(raw, "missing source uuid"))?;
        let mut seq_no = None;
        for interval in parts {
            let upper = interval.rsplit('-').next().unwrap_or(interval);
            let value: u64 = upper
                .parse()
                .map_err(|_| GtidParseError::new(raw, "invalid interval"))?;
            seq_no = Some(seq_no.map_or(value, |s: u64| s.max(value)));
        }
        let seq_no = seq_no.ok_or_else(|| GtidParseError::new(raw, "missing interval"))?;
        let server_id = u64::from(crc32fast::hash(uuid.to_ascii_uppercase().as_bytes()));
        Ok(Self::new(0, server_id, seq_no))
    }
}

impl fmt::Display for Gtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.domain_id, self.server_id, self.seq_no)
    }
}

/// An ordered list of GTIDs as reported by one server variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GtidList(Vec<Gtid>);

impl GtidList {
    pub fn new(gtids: Vec<Gtid>) -> Self {
        Self(gtids)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Parse a MariaDB `gtid_*_pos` value.
    pub fn parse_mariadb(raw: &str) -> Result<Self, GtidParseError> {
        Self::parse_with(raw, Gtid::parse_mariadb)
    }

    /// Parse a MySQL `gtid_executed` / `Retrieved_Gtid_Set` value.
    pub fn parse_mysql(raw: &str) -> Result<Self, GtidParseError> {
        // MySQL wraps long sets over several lines.
        let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        Self::parse_with(&cleaned, Gtid::parse_mysql)
    }

    fn parse_with(
        raw: &str,
        parse: fn(&str) -> Result<Gtid, GtidParseError>,
    ) -> Result<Self, GtidParseError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::empty());
        }
        raw.split(',')
            .filter(|g| !g.trim().is_empty())
            .map(parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Gtid> {
        self.0.iter()
    }

    pub fn domain_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.0.iter().map(|g| g.domain_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Sum of all sequence numbers, the election sequence score.
    pub fn seq_sum(&self) -> u64 {
        self.0.iter().fold(0u64, |acc, g| acc.saturating_add(g.seq_no))
    }

    /// Highest sequence recorded for a domain.
    pub fn seq_for_domain(&self, domain_id: u32) -> Option<u64> {
        self.0
            .iter()
            .filter(|g| g.domain_id == domain_id)
            .map(|g| g.seq_no)
            .max()
    }

    /// Sequence recorded for an origin server.
    pub fn seq_for_server(&self, server_id: u64) -> Option<u64> {
        self.0
            .iter()
            .find(|g| g.server_id == server_id)
            .map(|g| g.seq_no)
    }

    fn sorted(&self) -> Vec<Gtid> {
        let mut gtids = self.0.clone();
        gtids.sort_by_key(|g| (g.domain_id, g.server_id));
        gtids
    }

    /// Same GTIDs regardless of the order they were reported in.
    pub fn equivalent(&self, other: &GtidList) -> bool {
        self.sorted() == other.sorted()
    }

    /// Transactions present here that `leader` has not executed.
    ///
    /// An entry is errant when its (domain, server) origin is unknown to the
    /// leader, or when its sequence is ahead of the leader's for that origin.
    pub fn errant_against(&self, leader: &GtidList) -> Vec<Gtid> {
        let known: BTreeMap<(u32, u64), u64> = leader
            .0
            .iter()
            .map(|g| ((g.domain_id, g.server_id), g.seq_no))
            .collect();
        self.0
            .iter()
            .filter(|g| match known.get(&(g.domain_id, g.server_id)) {
                Some(seq) => g.seq_no > *seq,
                None => true,
            })
            .copied()
            .collect()
    }
}

impl fmt::Display for GtidList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(|g| g.to_string()).collect();
        write!(f, "{}", rendered.join(","))
    }
}
