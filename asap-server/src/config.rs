//! Server Configuration Module
//!
//! Configuration is loaded from `ASAP_*` environment variables with
//! defaults suitable for local development, then checked by
//! [`ServerConfig::validate`] before the server is built.

use crate::constants::{
    DEFAULT_AGENT_NAME, DEFAULT_HOST, DEFAULT_MAX_ENVELOPE_AGE, DEFAULT_MAX_FUTURE_TOLERANCE,
    DEFAULT_MAX_REQUEST_SIZE, DEFAULT_PORT, DEFAULT_RATE_LIMIT, DEFAULT_TASK_RETENTION,
    EXTRA_DEFAULT_WORKERS, MAX_DEFAULT_WORKERS, NONCE_TTL_AGE_MULTIPLIER,
};
use crate::rate_limit::parse_rate_limit;
use asap_core::AgentUrn;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("Invalid rate limit '{spec}': {reason}")]
    InvalidRateLimit { spec: String, reason: String },

    #[error(
        "Nonce TTL ({ttl_secs}s) must be at least the maximum envelope age ({max_age_secs}s)"
    )]
    NonceTtlTooShort { ttl_secs: u64, max_age_secs: u64 },

    #[error("Invalid bind address {addr}: {reason}")]
    InvalidBindAddress { addr: String, reason: String },
}

/// Log output format for the server binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        })
    }
}

/// Default worker count: `min(available_parallelism + 4, 32)`.
pub fn default_max_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus + EXTRA_DEFAULT_WORKERS).min(MAX_DEFAULT_WORKERS)
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Rate limit spec, e.g. `"10/second;100/minute"`.
    pub rate_limit: String,
    pub rate_limit_enabled: bool,

    /// Maximum accepted request body in bytes.
    pub max_request_size: usize,

    /// Worker threads for blocking handlers.
    pub max_workers: usize,
    /// Jobs that may wait for a worker before submissions are refused.
    pub executor_queue: usize,

    pub max_envelope_age: Duration,
    pub max_future_tolerance: Duration,

    /// Reject envelopes without a fresh nonce.
    pub require_nonce: bool,
    /// Explicit nonce TTL; `None` means `2 × max_envelope_age`.
    pub nonce_ttl: Option<Duration>,

    /// How long terminal tasks are kept before being purged.
    pub task_retention: Duration,

    /// Agent name used for the manifest URN of the server binary.
    pub agent_name: String,

    pub log_format: LogFormat,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let max_workers = default_max_workers();
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            rate_limit: DEFAULT_RATE_LIMIT.to_string(),
            rate_limit_enabled: true,
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            max_workers,
            executor_queue: max_workers,
            max_envelope_age: DEFAULT_MAX_ENVELOPE_AGE,
            max_future_tolerance: DEFAULT_MAX_FUTURE_TOLERANCE,
            require_nonce: false,
            nonce_ttl: None,
            task_retention: DEFAULT_TASK_RETENTION,
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            log_format: LogFormat::Text,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ServerConfig {
    /// Create ServerConfig from environment variables.
    ///
    /// Environment variables:
    /// - `ASAP_HOST`, `ASAP_PORT`: bind address (default: 127.0.0.1:8000)
    /// - `ASAP_RATE_LIMIT`: quota spec (default: "10/second;100/minute")
    /// - `ASAP_RATE_LIMIT_ENABLED`: "true" or "false" (default: true)
    /// - `ASAP_MAX_REQUEST_SIZE`: bytes (default: 10 MiB)
    /// - `ASAP_MAX_THREADS`: blocking handler workers (default: min(cpus + 4, 32))
    /// - `ASAP_EXECUTOR_QUEUE`: queued jobs before 503 (default: worker count)
    /// - `ASAP_MAX_ENVELOPE_AGE_SECS` (default: 300)
    /// - `ASAP_MAX_FUTURE_TOLERANCE_SECS` (default: 30)
    /// - `ASAP_REQUIRE_NONCE`: "true" or "false" (default: false)
    /// - `ASAP_NONCE_TTL_SECS` (default: 2 × max envelope age)
    /// - `ASAP_TASK_RETENTION_SECS`: keep terminal tasks this long (default: 3600)
    /// - `ASAP_AGENT_NAME` (default: asap-agent)
    /// - `ASAP_LOG_FORMAT`: "json" or "text" (default: text)
    ///
    /// Unparseable values fall back to defaults with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (used by `from_env` and tests).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let parsed = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "Ignoring unparseable numeric setting");
                    None
                }
            }
        };
        let flag = |key: &str| -> Option<bool> {
            let raw = lookup(key)?;
            let value = parse_bool(&raw);
            if value.is_none() {
                tracing::warn!(key, value = %raw, "Ignoring unparseable boolean setting");
            }
            value
        };

        let max_workers = parsed("ASAP_MAX_THREADS")
            .map(|v| v as usize)
            .unwrap_or(defaults.max_workers);

        Self {
            host: lookup("ASAP_HOST").unwrap_or(defaults.host),
            port: parsed("ASAP_PORT")
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(defaults.port),
            rate_limit: lookup("ASAP_RATE_LIMIT").unwrap_or(defaults.rate_limit),
            rate_limit_enabled: flag("ASAP_RATE_LIMIT_ENABLED")
                .unwrap_or(defaults.rate_limit_enabled),
            max_request_size: parsed("ASAP_MAX_REQUEST_SIZE")
                .map(|v| v as usize)
                .unwrap_or(defaults.max_request_size),
            max_workers,
            executor_queue: parsed("ASAP_EXECUTOR_QUEUE")
                .map(|v| v as usize)
                .unwrap_or(max_workers),
            max_envelope_age: parsed("ASAP_MAX_ENVELOPE_AGE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_envelope_age),
            max_future_tolerance: parsed("ASAP_MAX_FUTURE_TOLERANCE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_future_tolerance),
            require_nonce: flag("ASAP_REQUIRE_NONCE").unwrap_or(defaults.require_nonce),
            nonce_ttl: parsed("ASAP_NONCE_TTL_SECS").map(Duration::from_secs),
            task_retention: parsed("ASAP_TASK_RETENTION_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.task_retention),
            agent_name: lookup("ASAP_AGENT_NAME").unwrap_or(defaults.agent_name),
            log_format: lookup("ASAP_LOG_FORMAT")
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
        }
    }

    /// `2 × max_envelope_age`, or `None` if that does not fit a `Duration`.
    fn doubled_envelope_age(&self) -> Option<Duration> {
        self.max_envelope_age.checked_mul(NONCE_TTL_AGE_MULTIPLIER)
    }

    /// TTL applied to nonces: the explicit setting or `2 × max_envelope_age`.
    ///
    /// Saturates at `Duration::MAX`; [`validate`](Self::validate) rejects
    /// ages too large to double.
    pub fn effective_nonce_ttl(&self) -> Duration {
        self.nonce_ttl
            .or_else(|| self.doubled_envelope_age())
            .unwrap_or(Duration::MAX)
    }

    /// Validate the configuration.
    ///
    /// A nonce TTL shorter than the maximum envelope age would let a replay
    /// slip through after its nonce expired, so it is rejected; a TTL between
    /// one and two times the age is accepted with a warning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_request_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ASAP_MAX_REQUEST_SIZE",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ASAP_MAX_THREADS",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.executor_queue == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ASAP_EXECUTOR_QUEUE",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_envelope_age.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "ASAP_MAX_ENVELOPE_AGE_SECS",
                reason: "must be greater than zero".to_string(),
            });
        }
        let doubled_age = self
            .doubled_envelope_age()
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "ASAP_MAX_ENVELOPE_AGE_SECS",
                reason: format!(
                    "{}s is too large to derive a nonce TTL from",
                    self.max_envelope_age.as_secs()
                ),
            })?;
        if self.rate_limit_enabled {
            parse_rate_limit(&self.rate_limit)?;
        }
        AgentUrn::for_agent(&self.agent_name).map_err(|e| ConfigError::InvalidValue {
            key: "ASAP_AGENT_NAME",
            reason: e.to_string(),
        })?;

        let ttl = self.effective_nonce_ttl();
        if ttl < self.max_envelope_age {
            return Err(ConfigError::NonceTtlTooShort {
                ttl_secs: ttl.as_secs(),
                max_age_secs: self.max_envelope_age.as_secs(),
            });
        }
        if ttl < doubled_age {
            tracing::warn!(
                nonce_ttl_secs = ttl.as_secs(),
                max_envelope_age_secs = self.max_envelope_age.as_secs(),
                "Nonce TTL is shorter than twice the maximum envelope age"
            );
        }
        Ok(())
    }

    /// Resolve the socket address to bind.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidBindAddress {
                addr: addr.clone(),
                reason: e.to_string(),
            })
    }
}
