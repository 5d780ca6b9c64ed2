//! Topology errors
//!
//! `DriverError` is what a remote node operation returns. The orchestrator
//! logs it with the node URL and operation name and, past the commit point,
//! carries on.

use thiserror::Error;

/// Result type for remote node operations
pub type DriverResult<T> = Result<T, DriverError>;

/// Remote node operation failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("node {node} unreachable: {message}")]
    Unreachable { node: String, message: String },

    #[error("{op} failed on {node}: {message}")]
    Command {
        node: String,
        op: &'static str,
        message: String,
    },

    #[error("{op} timed out on {node}")]
    Timeout { node: String, op: &'static str },

    #[error("{op} not supported on {node}")]
    Unsupported { node: String, op: &'static str },
}

impl DriverError {
    pub fn unreachable(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            node: node.into(),
            message: message.into(),
        }
    }

    pub fn command(node: impl Into<String>, op: &'static str, message: impl Into<String>) -> Self {
        Self::Command {
            node: node.into(),
            op,
            message: message.into(),
        }
    }

    pub fn timeout(node: impl Into<String>, op: &'static str) -> Self {
        Self::Timeout {
            node: node.into(),
            op,
        }
    }

    /// URL of the node the failure happened on.
    pub fn node(&self) -> &str {
        match self {
            DriverError::Unreachable { node, .. }
            | DriverError::Command { node, .. }
            | DriverError::Timeout { node, .. }
            | DriverError::Unsupported { node, .. } => node,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, DriverError::Unreachable { .. })
    }
}

/// A GTID value that could not be parsed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid GTID '{raw}': {reason}")]
pub struct GtidParseError {
    pub raw: String,
    pub reason: &'static str,
}

impl GtidParseError {
    pub fn new(raw: &str, reason: &'static str) -> Self {
        Self {
            raw: raw.to_string(),
            reason,
        }
    }
}
