//! `POST /asap` request pipeline.
//!
//! size → decode → rate limit → envelope validation → auth → recipient →
//! timestamp → executor slot → nonce → dispatch → metrics → encode.
//!
//! Every rejection is a JSON-RPC error frame; only framework-level
//! failures (401, 403, 413, 429, 503) leave HTTP 200.

use std::net::{IpAddr, SocketAddr};
use std::time::Instant;

use asap_core::constants::{PAYLOAD_TASK_CANCEL, PAYLOAD_TASK_REQUEST};
use asap_core::{
    decode_request, AsapError, Envelope, JsonRpcResponse, Payload, TaskCancel, TaskRequest,
    TaskResponse, TaskStatus,
};
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header::CONTENT_LENGTH, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::{field, Instrument};

use crate::auth::extract_bearer_token;
use crate::constants::{OTHER_PAYLOAD_LABEL, TASK_ID_EXTENSION_KEY};
use crate::error::ServerError;
use crate::executor::ExecutorSlot;
use crate::handlers::DispatchError;
use crate::rate_limit::RateLimitKey;
use crate::security::validate_nonce;
use crate::state::AppState;

/// Axum handler for `POST /asap`.
pub async fn handle_asap(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let started = Instant::now();
    let peer = connect_info.map(|ConnectInfo(addr)| addr.ip());
    let span = tracing::info_span!(
        "asap_request",
        envelope_id = field::Empty,
        payload_type = field::Empty,
        sender = field::Empty,
        trace_id = field::Empty,
    );

    let mut label = OTHER_PAYLOAD_LABEL.to_string();
    let outcome = process(&state, &headers, peer, body, &mut label)
        .instrument(span.clone())
        .await;
    let elapsed = started.elapsed().as_secs_f64();

    match outcome {
        Ok(response) => {
            state.metrics.record_success(&label, elapsed);
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(error) => {
            span.in_scope(|| {
                tracing::debug!(
                    status = error.status.as_u16(),
                    error_type = %error.error_type,
                    "Request rejected"
                )
            });
            state.metrics.record_error(&label, &error.error_type, elapsed);
            error.into_response()
        }
    }
}

async fn process(
    state: &AppState,
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    body: Body,
    label: &mut String,
) -> Result<JsonRpcResponse, ServerError> {
    let bytes = read_body(headers, body, state.config.max_request_size)
        .await
        .map_err(|e| ServerError::from_asap(None, &e))?;

    let decoded = decode_request(&bytes);

    if let Some(limiter) = &state.rate_limiter {
        let key = match &decoded {
            Ok(request) => RateLimitKey::Sender(request.envelope().sender.to_string()),
            Err(_) => client_key(headers, peer),
        };
        if let Err(exceeded) = limiter.check(&key) {
            tracing::warn!(
                %key,
                retry_after_secs = exceeded.retry_after_secs,
                "Rate limit exceeded"
            );
            let id = match &decoded {
                Ok(request) => Some(request.id.clone()),
                Err(err) => err.id.clone(),
            };
            return Err(ServerError::from_asap(
                id,
                &AsapError::RateLimited {
                    retry_after_secs: exceeded.retry_after_secs,
                },
            ));
        }
    }

    let request = decoded.map_err(ServerError::from_decode)?;
    let id = request.id.clone();
    let envelope = request.into_envelope();

    *label = payload_label(state, &envelope.payload_type);
    let span = tracing::Span::current();
    span.record("envelope_id", field::display(&envelope.id));
    span.record("payload_type", envelope.payload_type.as_str());
    span.record("sender", envelope.sender.as_str());
    if let Some(trace_id) = &envelope.trace_id {
        span.record("trace_id", trace_id.as_str());
    }

    let reply = handle_envelope(state, headers, envelope)
        .await
        .map_err(|e| ServerError::from_asap(Some(id.clone()), &e))?;
    Ok(JsonRpcResponse::success(id, reply))
}

async fn handle_envelope(
    state: &AppState,
    headers: &HeaderMap,
    envelope: Envelope,
) -> Result<Envelope, AsapError> {
    envelope.validate(&state.schemas)?;
    authenticate(state, headers, &envelope).await?;

    if envelope.recipient != state.manifest.id {
        return Err(AsapError::AgentNotFound {
            agent: envelope.recipient.to_string(),
        });
    }

    state.timestamps.validate(envelope.timestamp)?;

    // Claim executor room before the nonce is recorded or a task created,
    // so a saturated server leaves no trace and the sender can retry as is
    let slot = state
        .handlers
        .reserve(&envelope.payload_type, &state.executor)
        .map_err(|err| {
            tracing::warn!(error = %err, envelope_id = %envelope.id, "Handler executor rejected job");
            err.to_asap_error()
        })?;

    if let Some(store) = &state.nonces {
        validate_nonce(
            &envelope,
            store.as_ref(),
            state.nonce_ttl,
            state.config.require_nonce,
        )?;
    }

    dispatch(state, envelope, slot).await
}

/// Read the body, refusing anything above `limit` bytes.
async fn read_body(headers: &HeaderMap, body: Body, limit: usize) -> Result<Bytes, AsapError> {
    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    if let Some(size) = declared {
        if size > limit as u64 {
            return Err(AsapError::PayloadTooLarge {
                size: Some(size),
                limit: limit as u64,
            });
        }
    }

    // The declared length can lie; cap the actual read too
    axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| AsapError::PayloadTooLarge {
            size: None,
            limit: limit as u64,
        })
}

/// Rate limit key for frames without a usable sender.
fn client_key(headers: &HeaderMap, peer: Option<IpAddr>) -> RateLimitKey {
    forwarded_ip(headers)
        .or(peer)
        .map(RateLimitKey::Ip)
        .unwrap_or(RateLimitKey::Unknown)
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    // X-Forwarded-For can contain multiple IPs, take the first one
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());
    forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .and_then(|ip| ip.trim().parse().ok())
    })
}

/// Metrics label: registered types and `task.cancel` keep their name.
fn payload_label(state: &AppState, payload_type: &str) -> String {
    if payload_type == PAYLOAD_TASK_CANCEL || state.handlers.contains(payload_type) {
        payload_type.to_string()
    } else {
        OTHER_PAYLOAD_LABEL.to_string()
    }
}

async fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
    envelope: &Envelope,
) -> Result<(), AsapError> {
    if !state.manifest.requires_auth() {
        return Ok(());
    }
    let validator = state
        .credentials
        .as_ref()
        .ok_or_else(|| AsapError::internal("no credential validator configured"))?;

    let token = extract_bearer_token(headers)?;
    let identity = validator
        .validate(token)
        .await
        .map_err(|rejection| AsapError::AuthInvalid {
            reason: rejection.to_string(),
        })?;

    if identity != envelope.sender.as_str() {
        tracing::warn!(
            identity = %identity,
            sender = %envelope.sender,
            "Authenticated identity does not match envelope sender"
        );
        return Err(AsapError::SenderMismatch {
            identity,
            sender: envelope.sender.to_string(),
        });
    }
    Ok(())
}

async fn dispatch(
    state: &AppState,
    envelope: Envelope,
    slot: Option<ExecutorSlot>,
) -> Result<Envelope, AsapError> {
    let payload_type = envelope.payload_type.as_str();
    if payload_type == PAYLOAD_TASK_CANCEL && !state.handlers.contains(PAYLOAD_TASK_CANCEL) {
        return cancel_task(state, &envelope);
    }
    if payload_type == PAYLOAD_TASK_REQUEST && state.handlers.contains(PAYLOAD_TASK_REQUEST) {
        return run_task(state, envelope, slot).await;
    }
    run_handler(state, envelope, slot).await
}

async fn run_handler(
    state: &AppState,
    envelope: Envelope,
    slot: Option<ExecutorSlot>,
) -> Result<Envelope, AsapError> {
    let envelope_id = envelope.id;
    let trace_id = envelope.trace_id.clone();
    let correlation_id = envelope.correlation_id.clone();

    state
        .handlers
        .dispatch_reserved(envelope, state.manifest.clone(), slot, &state.executor)
        .await
        .map_err(|err| {
            match &err {
                DispatchError::HandlerNotFound { payload_type } => {
                    tracing::debug!(%payload_type, "No handler registered");
                }
                DispatchError::Executor(e) => {
                    tracing::warn!(error = %e, %envelope_id, "Handler executor rejected job");
                }
                DispatchError::Handler(crate::handlers::HandlerError::Protocol(e)) => {
                    tracing::debug!(error = %e, %envelope_id, "Handler returned protocol error");
                }
                _ => {
                    tracing::error!(
                        error = %err,
                        %envelope_id,
                        trace_id = ?trace_id,
                        correlation_id = ?correlation_id,
                        "Handler failed"
                    );
                }
            }
            err.to_asap_error()
        })
}

/// `task.request`: track the task around the handler call.
async fn run_task(
    state: &AppState,
    envelope: Envelope,
    slot: Option<ExecutorSlot>,
) -> Result<Envelope, AsapError> {
    let request: TaskRequest = envelope.parse_payload()?;
    let task = state.tasks.create(&request.conversation_id);
    state.tasks.transition(&task.id, TaskStatus::Running)?;

    let envelope =
        envelope.with_extension(TASK_ID_EXTENSION_KEY, Value::String(task.id.to_string()));
    let outcome = run_handler(state, envelope, slot).await;

    let target = match &outcome {
        Ok(reply) => match reply.parse_payload::<TaskResponse>() {
            Ok(response) if response.status.is_terminal() => Some(response.status),
            // Handler reported progress only; the task stays running
            Ok(_) => None,
            Err(_) => Some(TaskStatus::Completed),
        },
        Err(_) => Some(TaskStatus::Failed),
    };

    if let Some(target) = target {
        if let Err(err) = state.tasks.transition(&task.id, target) {
            // A concurrent task.cancel may have won the race
            tracing::debug!(task_id = %task.id, error = %err, "Task outcome not recorded");
        }
    }
    outcome
}

/// Engine-served `task.cancel`.
fn cancel_task(state: &AppState, envelope: &Envelope) -> Result<Envelope, AsapError> {
    let cancel: TaskCancel = envelope.parse_payload()?;
    let task = state.tasks.cancel(&cancel.task_id)?;
    tracing::info!(task_id = %task.id, reason = ?cancel.reason, "Task cancelled");

    let response = TaskResponse {
        task_id: task.id.to_string(),
        status: task.status,
        result: None,
        error: None,
    };
    Ok(envelope.reply(TaskResponse::PAYLOAD_TYPE, response.to_value()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_takes_first_address() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.1"));
        assert_eq!(
            client_key(&headers, None),
            RateLimitKey::Ip("203.0.113.7".parse().unwrap())
        );
    }

    #[test]
    fn test_real_ip_then_peer_then_unknown() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.1"));
        assert_eq!(
            client_key(&headers, None),
            RateLimitKey::Ip("198.51.100.1".parse().unwrap())
        );

        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(client_key(&HeaderMap::new(), Some(peer)), RateLimitKey::Ip(peer));
        assert_eq!(client_key(&HeaderMap::new(), None), RateLimitKey::Unknown);
    }

    #[tokio::test]
    async fn test_declared_length_over_limit_rejected_before_read() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("2048"));
        let err = read_body(&headers, Body::from("{}"), 1024).await.unwrap_err();
        assert_eq!(
            err,
            AsapError::PayloadTooLarge {
                size: Some(2048),
                limit: 1024
            }
        );
    }

    #[tokio::test]
    async fn test_actual_length_over_limit_rejected() {
        let body = Body::from(vec![b'x'; 2048]);
        let err = read_body(&HeaderMap::new(), body, 1024).await.unwrap_err();
        assert!(matches!(err, AsapError::PayloadTooLarge { size: None, .. }));
    }
}
