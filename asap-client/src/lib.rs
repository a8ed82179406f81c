//! ASAP Client - outbound envelope delivery
//!
//! HTTP client for the ASAP protocol: JSON-RPC framing over reqwest,
//! exponential backoff with jitter, per-target circuit breakers shared
//! through a registry, and a TTL cache for discovered manifests.

pub mod backoff;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod manifest_cache;

pub use backoff::{parse_retry_after, RetryPolicy};
pub use circuit_breaker::{
    BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitRejected,
    CircuitState,
};
pub use client::{AsapClient, AsapClientBuilder};
pub use config::ClientConfig;
pub use error::ClientError;
pub use manifest_cache::ManifestCache;
