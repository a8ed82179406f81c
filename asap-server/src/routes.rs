//! HTTP routes.
//!
//! - `POST /asap` - JSON-RPC endpoint
//! - `GET /.well-known/asap/manifest.json` - agent manifest
//! - `GET /asap/metrics` - Prometheus metrics
//! - `GET /health` - liveness

use asap_core::constants::{
    ASAP_PATH, ASAP_PROTOCOL_VERSION, DEFAULT_MANIFEST_CACHE_TTL_SECS, HEALTH_PATH, MANIFEST_PATH,
    METRICS_PATH,
};
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header::CACHE_CONTROL, header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::metrics::PROMETHEUS_CONTENT_TYPE;
use crate::pipeline::handle_asap;
use crate::state::AppState;

// ============================================================================
// TYPES
// ============================================================================

/// Health check response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub agent: String,
    pub version: String,
    pub asap_version: String,
    pub uptime_seconds: u64,
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn manifest_handler(State(state): State<AppState>) -> impl IntoResponse {
    let cache_control = format!("public, max-age={DEFAULT_MANIFEST_CACHE_TTL_SECS}");
    (
        [(CACHE_CONTROL, cache_control)],
        Json(state.manifest.as_ref().clone()),
    )
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (StatusCode::OK, [(CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {e}"),
            )
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        agent: state.manifest.id.to_string(),
        version: state.manifest.version.clone(),
        asap_version: ASAP_PROTOCOL_VERSION.to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

// ============================================================================
// ROUTER
// ============================================================================

/// Build the ASAP router.
///
/// Axum's default body limit is disabled on `/asap`; the pipeline enforces
/// `max_request_size` itself so oversized requests get a JSON-RPC frame.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            ASAP_PATH,
            post(handle_asap).layer(DefaultBodyLimit::disable()),
        )
        .route(MANIFEST_PATH, get(manifest_handler))
        .route(METRICS_PATH, get(metrics_handler))
        .route(HEALTH_PATH, get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
