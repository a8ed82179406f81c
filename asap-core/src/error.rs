//! Error taxonomy for ASAP
//!
//! Every failure the protocol can report is an [`AsapError`] variant with a
//! stable namespaced code (`<category>/<name>`), a JSON-RPC error code and,
//! for framework-level failures, an HTTP status.

use crate::jsonrpc::codes;
use crate::task::TaskStatus;
use serde_json::{json, Value};
use thiserror::Error;

/// Top-level error category, the part of the code before the slash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Protocol,
    Routing,
    Security,
    Resource,
    Transport,
    Internal,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Protocol => "protocol",
            ErrorCategory::Routing => "routing",
            ErrorCategory::Security => "security",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Transport => "transport",
            ErrorCategory::Internal => "internal",
        }
    }
}

/// Closed set of protocol errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AsapError {
    #[error("Malformed envelope: {reason}")]
    MalformedEnvelope { reason: String },

    #[error("Invalid state transition for task {task_id}: {from} -> {to}")]
    InvalidStateTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Unsupported protocol version '{version}' (supported: {supported})")]
    VersionMismatch { version: String, supported: String },

    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("No handler registered for payload type '{payload_type}'")]
    HandlerNotFound { payload_type: String },

    #[error("Agent not found: {agent}")]
    AgentNotFound { agent: String },

    #[error("Authentication required: {reason}")]
    AuthRequired { reason: String },

    #[error("Invalid credentials: {reason}")]
    AuthInvalid { reason: String },

    #[error("Invalid envelope timestamp: {reason} (offset {offset_secs}s)")]
    InvalidTimestamp { offset_secs: i64, reason: String },

    #[error("Invalid nonce: {reason}")]
    InvalidNonce { reason: String },

    #[error("Authenticated identity '{identity}' does not match sender '{sender}'")]
    SenderMismatch { identity: String, sender: String },

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Executor exhausted: {reason}")]
    ExecutorExhausted { reason: String },

    #[error("Payload too large: limit is {limit} bytes")]
    PayloadTooLarge { size: Option<u64>, limit: u64 },

    #[error("Connection to {url} failed: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Circuit breaker open for {url}")]
    CircuitOpen { url: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl AsapError {
    /// Stable namespaced code, e.g. `security/invalid_nonce`.
    pub fn code(&self) -> &'static str {
        match self {
            AsapError::MalformedEnvelope { .. } => "protocol/malformed_envelope",
            AsapError::InvalidStateTransition { .. } => "protocol/invalid_state_transition",
            AsapError::VersionMismatch { .. } => "protocol/version_mismatch",
            AsapError::TaskNotFound { .. } => "protocol/task_not_found",
            AsapError::HandlerNotFound { .. } => "routing/handler_not_found",
            AsapError::AgentNotFound { .. } => "routing/agent_not_found",
            AsapError::AuthRequired { .. } => "security/auth_required",
            AsapError::AuthInvalid { .. } => "security/auth_invalid",
            AsapError::InvalidTimestamp { .. } => "security/invalid_timestamp",
            AsapError::InvalidNonce { .. } => "security/invalid_nonce",
            AsapError::SenderMismatch { .. } => "security/sender_mismatch",
            AsapError::RateLimited { .. } => "resource/rate_limited",
            AsapError::ExecutorExhausted { .. } => "resource/executor_exhausted",
            AsapError::PayloadTooLarge { .. } => "resource/payload_too_large",
            AsapError::ConnectionFailed { .. } => "transport/connection_failed",
            AsapError::Timeout { .. } => "transport/timeout",
            AsapError::CircuitOpen { .. } => "transport/circuit_open",
            AsapError::Internal { .. } => "internal/error",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            AsapError::MalformedEnvelope { .. }
            | AsapError::InvalidStateTransition { .. }
            | AsapError::VersionMismatch { .. }
            | AsapError::TaskNotFound { .. } => ErrorCategory::Protocol,
            AsapError::HandlerNotFound { .. } | AsapError::AgentNotFound { .. } => {
                ErrorCategory::Routing
            }
            AsapError::AuthRequired { .. }
            | AsapError::AuthInvalid { .. }
            | AsapError::InvalidTimestamp { .. }
            | AsapError::InvalidNonce { .. }
            | AsapError::SenderMismatch { .. } => ErrorCategory::Security,
            AsapError::RateLimited { .. }
            | AsapError::ExecutorExhausted { .. }
            | AsapError::PayloadTooLarge { .. } => ErrorCategory::Resource,
            AsapError::ConnectionFailed { .. }
            | AsapError::Timeout { .. }
            | AsapError::CircuitOpen { .. } => ErrorCategory::Transport,
            AsapError::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// JSON-RPC error code carried in the error frame.
    pub fn rpc_code(&self) -> i64 {
        match self {
            AsapError::MalformedEnvelope { .. }
            | AsapError::InvalidStateTransition { .. }
            | AsapError::VersionMismatch { .. }
            | AsapError::TaskNotFound { .. }
            | AsapError::AgentNotFound { .. }
            | AsapError::InvalidTimestamp { .. }
            | AsapError::InvalidNonce { .. } => codes::INVALID_PARAMS,
            AsapError::HandlerNotFound { .. } => codes::METHOD_NOT_FOUND,
            AsapError::AuthRequired { .. } | AsapError::AuthInvalid { .. } => {
                codes::UNAUTHORIZED
            }
            AsapError::SenderMismatch { .. } => codes::FORBIDDEN,
            AsapError::RateLimited { .. }
            | AsapError::ExecutorExhausted { .. }
            | AsapError::PayloadTooLarge { .. } => codes::SERVER_ERROR,
            AsapError::ConnectionFailed { .. }
            | AsapError::Timeout { .. }
            | AsapError::CircuitOpen { .. }
            | AsapError::Internal { .. } => codes::INTERNAL_ERROR,
        }
    }

    /// HTTP status for framework-level failures; `None` means the error
    /// travels inside an HTTP 200 JSON-RPC error frame.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            AsapError::AuthRequired { .. } | AsapError::AuthInvalid { .. } => Some(401),
            AsapError::SenderMismatch { .. } => Some(403),
            AsapError::PayloadTooLarge { .. } => Some(413),
            AsapError::RateLimited { .. } => Some(429),
            AsapError::ExecutorExhausted { .. } => Some(503),
            _ => None,
        }
    }

    /// Structured context for the JSON-RPC `error.data` object.
    pub fn details(&self) -> Value {
        let mut data = match self {
            AsapError::InvalidStateTransition { task_id, from, to } => json!({
                "task_id": task_id,
                "from": from,
                "to": to,
            }),
            AsapError::VersionMismatch { version, supported } => json!({
                "version": version,
                "supported": supported,
            }),
            AsapError::TaskNotFound { task_id } => json!({ "task_id": task_id }),
            AsapError::HandlerNotFound { payload_type } => {
                json!({ "payload_type": payload_type })
            }
            AsapError::InvalidTimestamp { offset_secs, .. } => {
                json!({ "offset_seconds": offset_secs })
            }
            AsapError::RateLimited { retry_after_secs } => {
                json!({ "retry_after": retry_after_secs })
            }
            AsapError::PayloadTooLarge { size, limit } => json!({
                "size": size,
                "limit": limit,
            }),
            _ => json!({}),
        };
        if let Value::Object(map) = &mut data {
            map.insert("code".to_string(), Value::String(self.code().to_string()));
        }
        data
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        AsapError::MalformedEnvelope {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        AsapError::Internal {
            reason: reason.into(),
        }
    }

    pub fn invalid_nonce(reason: impl Into<String>) -> Self {
        AsapError::InvalidNonce {
            reason: reason.into(),
        }
    }
}

/// Result alias for core operations.
pub type AsapResult<T> = Result<T, AsapError>;
