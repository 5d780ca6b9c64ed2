//! Configuration errors
//!
//! Configuration problems are detected at load time and are fatal for the
//! CLI. They never surface from inside the monitoring loop.

use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    /// Create an invalid value error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// Error code string for operator output.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "REPL_CONFIG_READ",
            ConfigError::Parse(_) => "REPL_CONFIG_PARSE",
            ConfigError::Invalid { .. } => "REPL_CONFIG_INVALID",
        }
    }
}
