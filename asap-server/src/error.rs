//! Server error types.
//!
//! [`ServerError`] is a JSON-RPC error frame plus the HTTP status it travels
//! with. Protocol errors ride on HTTP 200; framework-level failures (auth,
//! size, rate, capacity) use their own status but still carry a JSON-RPC
//! error body.

use crate::config::ConfigError;
use asap_core::{AsapError, DecodeError, JsonRpcError, JsonRpcResponse, RequestId};
use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// A failed `POST /asap` request.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct ServerError {
    pub id: Option<RequestId>,
    pub status: StatusCode,
    pub error: JsonRpcError,
    /// Label for `asap_requests_error_total{error_type}`.
    pub error_type: String,
    pub retry_after_secs: Option<u64>,
}

impl ServerError {
    /// Wrap a protocol error.
    pub fn from_asap(id: Option<RequestId>, err: &AsapError) -> Self {
        let status = err
            .http_status()
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::OK);
        let retry_after_secs = match err {
            AsapError::RateLimited { retry_after_secs } => Some((*retry_after_secs).max(1)),
            _ => None,
        };
        Self {
            id,
            status,
            error: JsonRpcError::from(err),
            error_type: err.code().to_string(),
            retry_after_secs,
        }
    }

    /// Wrap a frame decoding failure (always HTTP 200).
    pub fn from_decode(err: DecodeError) -> Self {
        let error_type = err.error_type().to_string();
        let id = err.id.clone();
        Self {
            id,
            status: StatusCode::OK,
            error: err.to_rpc_error(),
            error_type,
            retry_after_secs: None,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = JsonRpcResponse::error(self.id, self.error);
        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            response.headers_mut().insert(
                RETRY_AFTER,
                HeaderValue::from_str(&secs.to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("1")),
            );
        }
        response
    }
}

/// Failures while building or starting a server.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid manifest: {0}")]
    Manifest(AsapError),

    #[error("Manifest declares authentication but no credential validator was provided")]
    MissingCredentialValidator,

    #[error("Failed to initialise metrics: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Failed to initialise tracing: {0}")]
    Telemetry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_sets_status_and_retry_after() {
        let err = ServerError::from_asap(None, &AsapError::RateLimited { retry_after_secs: 0 });
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "1");
    }

    #[test]
    fn test_protocol_errors_use_http_200() {
        let err = ServerError::from_asap(
            Some(RequestId::Number(1)),
            &AsapError::TaskNotFound { task_id: "t".into() },
        );
        assert_eq!(err.status, StatusCode::OK);
        assert_eq!(err.error.code, -32602);
        assert_eq!(err.error_type, "protocol/task_not_found");
    }

    #[test]
    fn test_auth_statuses() {
        let missing = ServerError::from_asap(None, &AsapError::AuthRequired { reason: "x".into() });
        assert_eq!(missing.status, StatusCode::UNAUTHORIZED);
        let mismatch = ServerError::from_asap(
            None,
            &AsapError::SenderMismatch { identity: "a".into(), sender: "b".into() },
        );
        assert_eq!(mismatch.status, StatusCode::FORBIDDEN);
    }
}
