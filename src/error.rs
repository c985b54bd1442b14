//! Top-level error type for the bridge
//!
//! Each layer keeps its own error enum; this one gathers them and decides the
//! process exit status.

use crate::config::ConfigError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Exit status for a fatal invalid input line (`EX_DATAERR`)
pub const EXIT_INVALID_INPUT: i32 = 65;
/// Exit status for configuration problems (`EX_CONFIG`)
pub const EXIT_CONFIG: i32 = 78;
/// Exit status for everything else
pub const EXIT_FAILURE: i32 = 1;

/// Main error type for bridge operations
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Invalid input: '{}'", .line.trim_end())]
    InvalidInput { line: String },

    #[error("Failed to read input: {0}")]
    Input(#[source] std::io::Error),

    #[error("Failed to write diagnostic output: {0}")]
    Diagnostic(#[source] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),
}

impl BridgeError {
    /// Create invalid input error carrying the offending line
    pub fn invalid_input<S: Into<String>>(line: S) -> Self {
        Self::InvalidInput { line: line.into() }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            BridgeError::InvalidInput { .. } => EXIT_INVALID_INPUT,
            BridgeError::Config(_) => EXIT_CONFIG,
            BridgeError::Input(_)
            | BridgeError::Diagnostic(_)
            | BridgeError::Transport(_) => EXIT_FAILURE,
        }
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
