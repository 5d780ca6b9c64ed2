//! Arbitrator wire format
//!
//! `POST <arbitrator>/arbitrator` with a JSON claim; the referee answers with
//! a verdict and the leader it considers legitimate. Any verdict other than
//! `"winner"` is a loss.

use serde::{Deserialize, Serialize};

pub const WINNER: &str = "winner";

/// Claim sent to the arbitrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitrationRequest {
    /// Identity of this coordinator process.
    pub uuid: String,
    pub secret: String,
    pub cluster: String,
    /// Leader URL as seen by this coordinator, empty when none.
    pub master: String,
    pub id: u32,
    /// Current monitor status (`active` / `standby`).
    pub status: String,
    /// Roster size.
    pub hosts: usize,
    /// Nodes observed failed.
    pub failed: usize,
}

/// Verdict returned by the arbitrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbitrationResponse {
    pub arbitration: String,
    #[serde(default)]
    pub master: String,
}

impl ArbitrationResponse {
    pub fn winner(master: impl Into<String>) -> Self {
        Self {
            arbitration: WINNER.to_string(),
            master: master.into(),
        }
    }

    pub fn loser(master: impl Into<String>) -> Self {
        Self {
            arbitration: "loser".to_string(),
            master: master.into(),
        }
    }

    pub fn is_winner(&self) -> bool {
        self.arbitration == WINNER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_field_names() {
        let request = ArbitrationRequest {
            uuid: "run-1".to_string(),
            secret: "s3cr3t".to_string(),
            cluster: "shard1".to_string(),
            master: "db1:3306".to_string(),
            id: 2,
            status: "active".to_string(),
            hosts: 3,
            failed: 1,
        };
        let json = serde_json::to_value(&request).unwrap();
        for key in ["uuid", "secret", "cluster", "master", "id", "status", "hosts", "failed"] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["id"], 2);
    }

    #[test]
    fn test_any_other_verdict_loses() {
        let parsed: ArbitrationResponse =
            serde_json::from_str(r#"{"arbitration": "Winner"}"#).unwrap();
        assert!(!parsed.is_winner());
        assert_eq!(parsed.master, "");

        let parsed: ArbitrationResponse =
            serde_json::from_str(r#"{"arbitration": "winner", "master": "db1:3306"}"#).unwrap();
        assert!(parsed.is_winner());
    }
}
