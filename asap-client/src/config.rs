//! Client configuration.

use std::time::Duration;

use asap_core::constants::DEFAULT_MANIFEST_CACHE_TTL_SECS;

use crate::backoff::RetryPolicy;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::constants::DEFAULT_TIMEOUT;
use crate::error::ClientError;

/// Client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Per-attempt timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Used when the client builds its own breaker registry.
    pub circuit: CircuitBreakerConfig,
    pub manifest_cache_ttl: Duration,
    /// Refuse plain HTTP to non-loopback hosts.
    pub require_https: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            circuit: CircuitBreakerConfig::default(),
            manifest_cache_ttl: Duration::from_secs(DEFAULT_MANIFEST_CACHE_TTL_SECS),
            require_https: true,
        }
    }
}

fn parse_secs(value: Option<String>) -> Option<Duration> {
    value
        .and_then(|s| s.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

fn parse_bool(value: Option<String>) -> Option<bool> {
    match value?.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl ClientConfig {
    /// Create ClientConfig from environment variables.
    ///
    /// Environment variables:
    /// - `ASAP_CLIENT_TIMEOUT_SECS` (default: 30)
    /// - `ASAP_CLIENT_MAX_RETRIES` (default: 3)
    /// - `ASAP_CLIENT_BASE_DELAY_SECS` (default: 1.0)
    /// - `ASAP_CLIENT_MAX_DELAY_SECS` (default: 60.0)
    /// - `ASAP_CLIENT_JITTER`: "true" or "false" (default: true)
    /// - `ASAP_CLIENT_REQUIRE_HTTPS`: "true" or "false" (default: true)
    /// - `ASAP_CIRCUIT_FAILURE_THRESHOLD` (default: 5)
    /// - `ASAP_CIRCUIT_TIMEOUT_SECS` (default: 60)
    /// - `ASAP_MANIFEST_CACHE_TTL_SECS` (default: 300)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let retry = RetryPolicy {
            max_retries: lookup("ASAP_CLIENT_MAX_RETRIES")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.retry.max_retries),
            base_delay: parse_secs(lookup("ASAP_CLIENT_BASE_DELAY_SECS"))
                .unwrap_or(defaults.retry.base_delay),
            max_delay: parse_secs(lookup("ASAP_CLIENT_MAX_DELAY_SECS"))
                .unwrap_or(defaults.retry.max_delay),
            jitter: parse_bool(lookup("ASAP_CLIENT_JITTER")).unwrap_or(defaults.retry.jitter),
        };

        Self {
            timeout: parse_secs(lookup("ASAP_CLIENT_TIMEOUT_SECS")).unwrap_or(defaults.timeout),
            retry,
            circuit: CircuitBreakerConfig::from_lookup(&lookup),
            manifest_cache_ttl: parse_secs(lookup("ASAP_MANIFEST_CACHE_TTL_SECS"))
                .unwrap_or(defaults.manifest_cache_ttl),
            require_https: parse_bool(lookup("ASAP_CLIENT_REQUIRE_HTTPS"))
                .unwrap_or(defaults.require_https),
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.timeout.is_zero() {
            return Err(ClientError::InvalidConfig("timeout must be positive".into()));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ClientError::InvalidConfig(format!(
                "base delay {:?} exceeds max delay {:?}",
                self.retry.base_delay, self.retry.max_delay
            )));
        }
        if self.circuit.failure_threshold == 0 {
            return Err(ClientError::InvalidConfig(
                "circuit failure threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[]));
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay, Duration::from_secs(1));
        assert_eq!(config.retry.max_delay, Duration::from_secs(60));
        assert!(config.retry.jitter);
        assert_eq!(config.manifest_cache_ttl, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("ASAP_CLIENT_TIMEOUT_SECS", "2.5"),
            ("ASAP_CLIENT_MAX_RETRIES", "7"),
            ("ASAP_CLIENT_BASE_DELAY_SECS", "0.1"),
            ("ASAP_CLIENT_MAX_DELAY_SECS", "5"),
            ("ASAP_CLIENT_JITTER", "false"),
            ("ASAP_CLIENT_REQUIRE_HTTPS", "no"),
            ("ASAP_CIRCUIT_FAILURE_THRESHOLD", "9"),
            ("ASAP_MANIFEST_CACHE_TTL_SECS", "10"),
        ]));
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.retry.base_delay, Duration::from_millis(100));
        assert_eq!(config.retry.max_delay, Duration::from_secs(5));
        assert!(!config.retry.jitter);
        assert!(!config.require_https);
        assert_eq!(config.circuit.failure_threshold, 9);
        assert_eq!(config.manifest_cache_ttl, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("ASAP_CLIENT_MAX_RETRIES", "many"),
            ("ASAP_CLIENT_TIMEOUT_SECS", "-1"),
        ]));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_validate_rejects_inverted_delays() {
        let mut config = ClientConfig::default();
        config.retry.base_delay = Duration::from_secs(120);
        assert!(matches!(config.validate(), Err(ClientError::InvalidConfig(_))));
    }
}
