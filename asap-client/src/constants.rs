//! Client defaults.

use std::time::Duration;

// ============================================================================
// TRANSPORT
// ============================================================================

/// Per-attempt request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// User-Agent sent with every request.
pub const USER_AGENT: &str = concat!("asap-client/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// RETRY
// ============================================================================

/// Retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Upper bound of the random jitter, as a fraction of the delay.
pub const MAX_JITTER_FRACTION: f64 = 0.10;

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

/// Consecutive failures that open the circuit.
pub const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// Time an open circuit waits before admitting a trial request.
pub const DEFAULT_CIRCUIT_TIMEOUT: Duration = Duration::from_secs(60);
