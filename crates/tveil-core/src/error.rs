//! Error types for tveil-core
//!
//! Centralized error handling using `thiserror` for ergonomic error definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure taxonomy used by the error classifier.
///
/// Every classified failure lands in exactly one of these buckets; the
/// category decides how the failure is presented and whether automatic
/// remediation is even considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Interface, proxy or DNS unreachable
    Network,
    /// Invalid or missing required settings
    Configuration,
    /// Missing privilege, missing external tool, timeout
    System,
    /// Malformed endpoint or credential supplied by the caller
    UserInput,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Configuration => "configuration",
            Self::System => "system",
            Self::UserInput => "user input",
        };
        f.write_str(s)
    }
}

/// Main error type for tveil-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// An external command could not be started at all
    #[error("Operation '{operation}' could not be started: {message}")]
    OperationSpawn {
        /// Name of the operation
        operation: String,
        /// Underlying spawn failure
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        /// Path to the missing config file
        path: String,
    },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    ConfigValue {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    /// Layer or error catalog is malformed
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Invalid port number
    #[error("Invalid port number: {port} (must be 1-65535)")]
    InvalidPort {
        /// The invalid port
        port: u32,
    },

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an operation spawn error
    pub fn spawn(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OperationSpawn {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a config value error
    pub fn config_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a catalog error
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog(message.into())
    }
}
