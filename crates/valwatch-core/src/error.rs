//! Error types for the validator watch pipeline.

use thiserror::Error;

/// Errors that can occur while tracking validators.
#[derive(Debug, Error)]
pub enum WatchError {
    /// A chain query failed (non-2xx, `error` envelope, connection failure).
    #[error("Chain query error: {0}")]
    Chain(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A payload could not be decoded into the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Notification to '{target}' failed: {reason}")]
    Notify { target: String, reason: String },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A user-facing operation was refused (e.g. subscribing to a jailed validator).
    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl WatchError {
    /// Returns `true` if the failure is transient and the next trigger may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Chain(_) | Self::Storage(_) | Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for WatchError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
