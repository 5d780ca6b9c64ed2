//! CLI-specific error types
//!
//! Every CLI error is fatal: it is printed with its code and the process
//! exits non-zero.

use std::fmt;
use std::io;

use crate::config::ConfigError;
use crate::promotion::PromotionError;

/// CLI error codes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliErrorCode {
    /// Configuration file error
    ConfigError,
    /// Sandbox topology file error
    TopologyError,
    /// I/O error (files, stdout)
    IoError,
    /// Runtime or server failed to start
    BootFailed,
    /// Switchover or failover refused before the commit point
    PromotionFailed,
}

impl CliErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigError => "REPL_CLI_CONFIG_ERROR",
            Self::TopologyError => "REPL_CLI_TOPOLOGY_ERROR",
            Self::IoError => "REPL_CLI_IO_ERROR",
            Self::BootFailed => "REPL_CLI_BOOT_FAILED",
            Self::PromotionFailed => "REPL_CLI_PROMOTION_FAILED",
        }
    }
}

/// CLI error
#[derive(Debug)]
pub struct CliError {
    code: CliErrorCode,
    message: String,
}

impl CliError {
    /// Create a new CLI error
    pub fn new(code: CliErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::ConfigError, msg)
    }

    pub fn topology_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::TopologyError, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::IoError, msg)
    }

    pub fn boot_failed(msg: impl Into<String>) -> Self {
        Self::new(CliErrorCode::BootFailed, msg)
    }

    /// Get the error code
    pub fn code(&self) -> &CliErrorCode {
        &self.code
    }

    /// Get the error code string
    pub fn code_str(&self) -> &'static str {
        self.code.code()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.code(), self.message)
    }
}

impl std::error::Error for CliError {}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        Self::io_error(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        Self::io_error(format!("JSON error: {}", e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        Self::config_error(format!("{} ({})", e, e.code()))
    }
}

impl From<PromotionError> for CliError {
    fn from(e: PromotionError) -> Self {
        Self::new(
            CliErrorCode::PromotionFailed,
            format!("{} ({})", e.message, e.kind.code()),
        )
    }
}

/// CLI result type
pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_code() {
        let err = CliError::topology_error("missing node db9:3306");
        assert_eq!(err.code_str(), "REPL_CLI_TOPOLOGY_ERROR");
        assert_eq!(err.to_string(), "REPL_CLI_TOPOLOGY_ERROR: missing node db9:3306");
    }

    #[test]
    fn test_promotion_error_maps_to_promotion_failed() {
        let err = CliError::from(PromotionError::no_candidate());
        assert_eq!(err.code(), &CliErrorCode::PromotionFailed);
        assert!(err.message().contains("PROMOTION_NO_CANDIDATE"));
    }
}
