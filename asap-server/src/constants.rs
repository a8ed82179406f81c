//! Constants for the ASAP server
//!
//! Defaults for every `ASAP_*` environment variable plus metric buckets.

use std::time::Duration;

// ============================================================================
// BINDING
// ============================================================================

/// Default bind host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default agent name used to build the manifest URN.
pub const DEFAULT_AGENT_NAME: &str = "asap-agent";

// ============================================================================
// REQUEST LIMITS
// ============================================================================

/// Default maximum request body size (10 MiB).
pub const DEFAULT_MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

/// Default rate limit: quotas separated by `;`, each enforced independently.
pub const DEFAULT_RATE_LIMIT: &str = "10/second;100/minute";

// ============================================================================
// REPLAY PROTECTION
// ============================================================================

/// Envelopes older than this are rejected (5 minutes).
pub const DEFAULT_MAX_ENVELOPE_AGE: Duration = Duration::from_secs(300);

/// Envelopes further in the future than this are rejected.
pub const DEFAULT_MAX_FUTURE_TOLERANCE: Duration = Duration::from_secs(30);

/// Nonce TTL as a multiple of the maximum envelope age.
pub const NONCE_TTL_AGE_MULTIPLIER: u32 = 2;

/// How often a serving server sweeps expired nonces, idle rate limit keys
/// and old terminal tasks.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Every this many nonce insertions the store purges expired entries.
pub const NONCE_SWEEP_EVERY_INSERTS: u64 = 1024;

// ============================================================================
// TASKS
// ============================================================================

/// How long completed, failed or cancelled tasks stay queryable (1 hour).
pub const DEFAULT_TASK_RETENTION: Duration = Duration::from_secs(3600);

// ============================================================================
// EXECUTOR
// ============================================================================

/// Upper bound on default worker threads.
pub const MAX_DEFAULT_WORKERS: usize = 32;

/// Workers added on top of available parallelism for the default pool size.
pub const EXTRA_DEFAULT_WORKERS: usize = 4;

// ============================================================================
// METRICS
// ============================================================================

/// Request latency buckets (seconds): 1ms .. 10s.
pub const REQUEST_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Label used for payload types that are not registered.
pub const OTHER_PAYLOAD_LABEL: &str = "other";

// ============================================================================
// EXTENSION KEYS
// ============================================================================

/// Extension carrying the server-assigned task id into `task.request` handlers.
pub const TASK_ID_EXTENSION_KEY: &str = "task_id";
