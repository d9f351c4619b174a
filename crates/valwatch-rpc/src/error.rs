//! Transport-level error types.

use thiserror::Error;

use valwatch_core::WatchError;

/// Errors that can occur while talking to a node.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed (connection refused, non-2xx status, etc.).
    #[error("HTTP error: {0}")]
    Http(String),

    /// WebSocket connection/send/receive error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// `error` object or field returned by the node.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Request timed out after the configured duration.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// Response could not be deserialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// Valid JSON in an unexpected shape.
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns `true` if this error is retryable (transient).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Http(_) | Self::WebSocket(_) | Self::Timeout { .. })
    }

    pub(crate) fn malformed(what: impl Into<String>) -> Self {
        Self::Malformed(what.into())
    }
}

impl From<TransportError> for WatchError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Timeout { ms } => WatchError::Timeout { ms },
            TransportError::Deserialization(_) | TransportError::Malformed(_) => {
                WatchError::Decode(e.to_string())
            }
            TransportError::Other(msg) => WatchError::Other(msg),
            other => WatchError::Chain(other.to_string()),
        }
    }
}
