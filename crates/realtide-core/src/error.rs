//! Client-level error types.

use serde_json::Value;
use thiserror::Error;

/// Convenience alias used across the Realtide crates.
pub type Result<T, E = ClientError> = std::result::Result<T, E>;

/// Errors surfaced by caller-initiated operations.
///
/// The background connection loop never returns these to callers; it logs
/// them and reconnects.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}: {response}")]
    Http {
        url: String,
        status: u16,
        response: Value,
    },

    /// The request never got a response (connection refused, reset, TLS, ...).
    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    /// The request was cancelled by a deliberate disconnect.
    #[error("request to {url} aborted")]
    Aborted { url: String },

    /// `ensure_connected` gave up waiting for the handshake.
    #[error("realtime connection not established within {ms}ms ({url})")]
    ConnectTimeout { url: String, ms: u64 },

    /// A caller passed an unusable argument (e.g. an empty topic).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A payload could not be (de)serialized.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ClientError {
    /// Returns `true` if the failure was caused by a deliberate teardown.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Returns `true` for the `ensure_connected` deadline error.
    pub fn is_connection_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout { .. })
    }

    /// HTTP status of the failure; `0` when no response was received.
    pub fn status(&self) -> u16 {
        match self {
            Self::Http { status, .. } => *status,
            _ => 0,
        }
    }

    /// Endpoint the failure relates to, when known.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Http { url, .. }
            | Self::Network { url, .. }
            | Self::Aborted { url }
            | Self::ConnectTimeout { url, .. } => Some(url),
            _ => None,
        }
    }

    /// Returns `true` if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
