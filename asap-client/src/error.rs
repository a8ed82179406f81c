//! Client error types.

use std::time::Duration;

use asap_core::{AsapError, JsonRpcError};
use thiserror::Error;

/// Failure of a client call.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Refusing plain HTTP to non-loopback host: {url}")]
    InsecureUrl { url: String },

    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Failed to encode request: {0}")]
    Encode(AsapError),

    #[error("Connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Circuit breaker open for {url}")]
    CircuitOpen { url: String },

    /// Non-2xx HTTP response. `error` holds the JSON-RPC error frame when
    /// the body carried one.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        url: String,
        status: u16,
        retry_after: Option<Duration>,
        error: Option<JsonRpcError>,
    },

    /// The remote agent answered with a JSON-RPC error.
    #[error("Remote error {}: {}", .0.code, .0.message)]
    Remote(JsonRpcError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Transport failures, 5xx and 429 are worth another attempt.
    pub fn is_retriable(&self) -> bool {
        match self {
            ClientError::Connection { .. } | ClientError::Timeout { .. } => true,
            ClientError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Server-requested delay before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ClientError::HttpStatus { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Namespaced error code; remote errors report the server's code.
    pub fn code(&self) -> &str {
        match self {
            ClientError::Connection { .. } => "transport/connection_failed",
            ClientError::Timeout { .. } => "transport/timeout",
            ClientError::CircuitOpen { .. } => "transport/circuit_open",
            ClientError::HttpStatus { error, .. } => error
                .as_ref()
                .and_then(JsonRpcError::asap_code)
                .unwrap_or("transport/http_error"),
            ClientError::Remote(error) => error.asap_code().unwrap_or("remote/error"),
            ClientError::Encode(err) => err.code(),
            ClientError::InvalidUrl { .. }
            | ClientError::InsecureUrl { .. }
            | ClientError::InvalidConfig(_)
            | ClientError::Http(_) => "client/config",
            ClientError::InvalidResponse(_) => "client/invalid_response",
        }
    }

    /// Protocol error equivalent for transport failures.
    pub fn to_asap_error(&self) -> Option<AsapError> {
        match self {
            ClientError::Connection { url, reason } => Some(AsapError::ConnectionFailed {
                url: url.clone(),
                reason: reason.clone(),
            }),
            ClientError::Timeout { url, timeout_ms } => Some(AsapError::Timeout {
                url: url.clone(),
                timeout_ms: *timeout_ms,
            }),
            ClientError::CircuitOpen { url } => Some(AsapError::CircuitOpen { url: url.clone() }),
            _ => None,
        }
    }
}
