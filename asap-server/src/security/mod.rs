//! Replay protection: envelope timestamp window and nonce tracking.

pub mod nonce;
pub mod timestamp;

pub use nonce::{validate_nonce, InMemoryNonceStore, NonceStore};
pub use timestamp::TimestampValidator;
