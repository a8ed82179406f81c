//! Circuit breakers keyed by target base URL.
//!
//! CLOSED opens after `failure_threshold` consecutive failures. OPEN admits
//! a single trial once `timeout` has elapsed (HALF_OPEN); the trial's
//! outcome closes the circuit or re-opens it with a fresh timer.
//!
//! Every attempt holds a [`BreakerPermit`]. A permit dropped without a
//! verdict (the send future was cancelled) frees the half-open trial slot
//! and leaves the counters untouched.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use asap_core::{system_clock, SharedClock};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use thiserror::Error;

use crate::constants::{DEFAULT_CIRCUIT_FAILURE_THRESHOLD, DEFAULT_CIRCUIT_TIMEOUT};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Requests flow normally
    Closed,
    /// Requests are rejected without touching the network
    Open,
    /// One trial request is allowed through
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            timeout: DEFAULT_CIRCUIT_TIMEOUT,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create CircuitBreakerConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `ASAP_CIRCUIT_FAILURE_THRESHOLD`: failures before opening (default: 5)
    /// - `ASAP_CIRCUIT_TIMEOUT_SECS`: how long the circuit stays open (default: 60)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let failure_threshold = lookup("ASAP_CIRCUIT_FAILURE_THRESHOLD")
            .and_then(|s| s.trim().parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.failure_threshold);
        let timeout = lookup("ASAP_CIRCUIT_TIMEOUT_SECS")
            .and_then(|s| s.trim().parse::<f64>().ok())
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(defaults.timeout);
        Self {
            failure_threshold,
            timeout,
        }
    }
}

/// Returned by [`CircuitBreaker::try_acquire`] while the circuit rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Circuit is {state}")]
pub struct CircuitRejected {
    pub state: CircuitState,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
}

/// Breaker for a single target.
#[derive(Debug)]
pub struct CircuitBreaker {
    key: String,
    inner: Mutex<BreakerInner>,
    config: CircuitBreakerConfig,
    clock: SharedClock,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            key: key.into(),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
            config,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // State stays consistent even if a holder panicked; every update is a
        // plain field assignment
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Ask to send a request.
    pub fn try_acquire(self: &Arc<Self>) -> Result<BreakerPermit, CircuitRejected> {
        let mut inner = self.lock();
        let trial = match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| self.clock.now().signed_duration_since(at))
                    .and_then(|d| d.to_std().ok())
                    .unwrap_or(Duration::ZERO);
                if elapsed < self.config.timeout {
                    return Err(CircuitRejected {
                        state: CircuitState::Open,
                    });
                }
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                tracing::info!(target_url = %self.key, "Circuit half-open, admitting trial request");
                true
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(CircuitRejected {
                        state: CircuitState::HalfOpen,
                    });
                }
                inner.trial_in_flight = true;
                true
            }
        };
        drop(inner);

        Ok(BreakerPermit {
            breaker: Arc::clone(self),
            trial,
            settled: false,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        if trial {
            inner.trial_in_flight = false;
            if inner.state == CircuitState::HalfOpen {
                inner.state = CircuitState::Closed;
                inner.opened_at = None;
                tracing::info!(target_url = %self.key, "Circuit closed");
            }
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        if trial {
            inner.trial_in_flight = false;
            inner.state = CircuitState::Open;
            inner.opened_at = Some(self.clock.now());
            tracing::warn!(target_url = %self.key, "Trial request failed, circuit re-opened");
        } else if inner.state == CircuitState::Closed
            && inner.consecutive_failures >= self.config.failure_threshold
        {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(self.clock.now());
            tracing::warn!(
                target_url = %self.key,
                failures = inner.consecutive_failures,
                "Circuit opened"
            );
        }
    }

    fn on_abandon(&self, trial: bool) {
        if trial {
            self.lock().trial_in_flight = false;
        }
    }
}

/// Permission to make one attempt. Report the outcome with
/// [`success`](Self::success) or [`failure`](Self::failure).
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl BreakerPermit {
    /// Whether this is the single half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandon(self.trial);
        }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

static GLOBAL_REGISTRY: Lazy<Arc<CircuitBreakerRegistry>> = Lazy::new(|| {
    Arc::new(CircuitBreakerRegistry::new(
        CircuitBreakerConfig::from_env(),
        system_clock(),
    ))
});

/// Breakers by base URL. Created lazily, never removed.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
    clock: SharedClock,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            clock,
        }
    }

    /// The process-wide registry shared by clients that were not given one.
    pub fn global() -> Arc<CircuitBreakerRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.config
    }

    /// Breaker for `key`, created on first use.
    pub fn get(&self, key: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(key) {
            return Arc::clone(existing.value());
        }
        self.breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.config, self.clock.clone())))
            .clone()
    }

    /// Current state for `key`, if a breaker exists.
    pub fn state(&self, key: &str) -> Option<CircuitState> {
        self.breakers.get(key).map(|b| b.state())
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
