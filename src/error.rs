//! Error types for a3s-sentinel

use thiserror::Error;

/// Errors that can occur in the sentinel engine
#[derive(Debug, Error)]
pub enum SentinelError {
    /// Bus connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish failure
    #[error("Failed to publish to topic '{topic}': {reason}")]
    Publish {
        topic: String,
        reason: String,
    },

    /// Subscribe failure
    #[error("Failed to subscribe to pattern '{pattern}': {reason}")]
    Subscribe {
        pattern: String,
        reason: String,
    },

    /// Malformed input (log line, IP token, topic pattern)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Firewall invocation failed
    #[error("Failed to enforce rule for '{ip}': {reason}")]
    Enforcement {
        ip: String,
        reason: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML config parse failure
    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

impl SentinelError {
    /// Whether the error must stop the process instead of the current unit of work
    pub fn is_fatal(&self) -> bool {
        matches!(self, SentinelError::Config(_) | SentinelError::TomlDe(_))
    }
}

/// Result type alias for sentinel operations
pub type Result<T> = std::result::Result<T, SentinelError>;
