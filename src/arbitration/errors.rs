//! Arbitration errors
//!
//! Every variant counts as a failed round: the cluster is flagged and
//! unattended failover stays blocked until an exchange succeeds.

use thiserror::Error;

pub type ArbitrationResult<T> = Result<T, ArbitrationError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArbitrationError {
    #[error("arbitrator unreachable: {0}")]
    Unreachable(String),

    #[error("arbitrator answered with HTTP status {0}")]
    Status(u16),

    #[error("invalid arbitrator response: {0}")]
    InvalidResponse(String),

    #[error("arbitration is not configured")]
    NotConfigured,
}

impl ArbitrationError {
    pub fn code(&self) -> &'static str {
        match self {
            ArbitrationError::Unreachable(_) => "ARBITRATOR_UNREACHABLE",
            ArbitrationError::Status(_) => "ARBITRATOR_BAD_STATUS",
            ArbitrationError::InvalidResponse(_) => "ARBITRATOR_INVALID_RESPONSE",
            ArbitrationError::NotConfigured => "ARBITRATOR_NOT_CONFIGURED",
        }
    }
}
