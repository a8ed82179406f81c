//! Protocol constants for ASAP
//!
//! Wire-level names and defaults shared by the server and client crates.

// ============================================================================
// PROTOCOL
// ============================================================================

/// Protocol version stamped on every envelope this crate builds.
pub const ASAP_PROTOCOL_VERSION: &str = "0.1";

/// Protocol versions accepted on inbound envelopes.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["0.1"];

/// Prefix every agent URN must carry.
pub const AGENT_URN_PREFIX: &str = "urn:asap:agent:";

/// Extension key carrying the replay-protection nonce.
pub const NONCE_EXTENSION_KEY: &str = "nonce";

// ============================================================================
// JSON-RPC
// ============================================================================

/// JSON-RPC version string.
pub const JSONRPC_VERSION: &str = "2.0";

/// The single JSON-RPC method carrying envelopes.
pub const ASAP_METHOD: &str = "asap.send";

// ============================================================================
// PAYLOAD TYPES
// ============================================================================

pub const PAYLOAD_TASK_REQUEST: &str = "task.request";
pub const PAYLOAD_TASK_RESPONSE: &str = "task.response";
pub const PAYLOAD_TASK_UPDATE: &str = "task.update";
pub const PAYLOAD_TASK_CANCEL: &str = "task.cancel";
pub const PAYLOAD_MESSAGE_SEND: &str = "message.send";

// ============================================================================
// HTTP SURFACE
// ============================================================================

/// JSON-RPC endpoint path.
pub const ASAP_PATH: &str = "/asap";

/// Well-known manifest path.
pub const MANIFEST_PATH: &str = "/.well-known/asap/manifest.json";

/// Prometheus exposition path.
pub const METRICS_PATH: &str = "/asap/metrics";

/// Liveness path.
pub const HEALTH_PATH: &str = "/health";

/// Default manifest cache TTL in seconds, used for both the server's
/// `Cache-Control` header and the client's discovery cache.
pub const DEFAULT_MANIFEST_CACHE_TTL_SECS: u64 = 300;
