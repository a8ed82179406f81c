//! ASAP Server - axum engine for the ASAP agent protocol
//!
//! Serves `POST /asap` (JSON-RPC 2.0) through a pipeline of size, rate,
//! authentication, timestamp and nonce checks before dispatching the
//! envelope to a registered handler. Blocking handlers run on tokio's
//! blocking pool behind a bounded admission limit; saturation is reported
//! as HTTP 503 instead of queueing without limit.

pub mod auth;
pub mod config;
pub mod constants;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;
pub mod routes;
pub mod security;
pub mod state;
pub mod tasks;
pub mod telemetry;

// Re-export commonly used types
pub use auth::{
    extract_bearer_token, AuthRejection, Claims, CredentialValidator, JwtSecret, JwtValidator,
    StaticTokenValidator,
};
pub use config::{ConfigError, LogFormat, ServerConfig};
pub use error::{ServerError, StartupError};
pub use executor::{BoundedExecutor, ExecutorError, ExecutorSlot};
pub use handlers::{
    echo_handler, AsyncHandler, DispatchError, Handler, HandlerError, HandlerRegistry,
};
pub use metrics::AsapMetrics;
pub use rate_limit::{parse_rate_limit, AsapRateLimiter, RateLimitKey, RateQuota};
pub use routes::{create_router, HealthResponse};
pub use security::{InMemoryNonceStore, NonceStore, TimestampValidator};
pub use state::{AppState, AsapServer, AsapServerBuilder, SweepReport};
pub use tasks::TaskTracker;
pub use telemetry::init_tracing;
