//! Nonce store for replay prevention.
//!
//! A nonce seen again before its record expires is a replay. Expired
//! records are purged lazily on access, periodically during inserts, and by
//! an explicit [`NonceStore::sweep`].

use crate::constants::NONCE_SWEEP_EVERY_INSERTS;
use asap_core::{AsapError, Envelope, SharedClock};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Storage for seen nonces.
pub trait NonceStore: Send + Sync + std::fmt::Debug {
    /// Whether `nonce` has an unexpired record.
    fn is_used(&self, nonce: &str) -> bool;

    /// Record `nonce` for `ttl`, overwriting any previous record.
    fn mark_used(&self, nonce: &str, ttl: Duration);

    /// Atomically record `nonce` if it is not in use.
    ///
    /// Returns `true` when the nonce was fresh and is now recorded, `false`
    /// on replay.
    fn check_and_mark(&self, nonce: &str, ttl: Duration) -> bool;

    /// Drop expired records, returning how many were removed.
    fn sweep(&self) -> usize;
}

/// In-process nonce store backed by a sharded concurrent map.
#[derive(Debug)]
pub struct InMemoryNonceStore {
    entries: DashMap<String, DateTime<Utc>>,
    inserts: AtomicU64,
    clock: SharedClock,
}

impl InMemoryNonceStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            inserts: AtomicU64::new(0),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        self.clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn note_insert(&self) {
        let n = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if n % NONCE_SWEEP_EVERY_INSERTS == 0 {
            let removed = self.sweep();
            tracing::debug!(removed, "Periodic nonce sweep");
        }
    }
}

impl NonceStore for InMemoryNonceStore {
    fn is_used(&self, nonce: &str) -> bool {
        let now = self.clock.now();
        // remove_if keeps the check-and-purge under one shard lock
        if self
            .entries
            .remove_if(nonce, |_, expires_at| *expires_at <= now)
            .is_some()
        {
            return false;
        }
        self.entries.contains_key(nonce)
    }

    fn mark_used(&self, nonce: &str, ttl: Duration) {
        let expires_at = self.expiry(ttl);
        self.entries.insert(nonce.to_string(), expires_at);
        self.note_insert();
    }

    fn check_and_mark(&self, nonce: &str, ttl: Duration) -> bool {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let fresh = match self.entries.entry(nonce.to_string()) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() > now {
                    false
                } else {
                    occupied.insert(expires_at);
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(expires_at);
                true
            }
        };
        if fresh {
            self.note_insert();
        }
        fresh
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

/// Check the envelope nonce against `store`.
///
/// With `required` set, an envelope without a nonce is rejected. Present
/// nonces must be non-empty strings that have not been seen within `ttl`.
pub fn validate_nonce(
    envelope: &Envelope,
    store: &dyn NonceStore,
    ttl: Duration,
    required: bool,
) -> Result<(), AsapError> {
    match envelope.nonce()? {
        None if required => Err(AsapError::invalid_nonce("nonce is required")),
        None => Ok(()),
        Some(nonce) => {
            if store.check_and_mark(nonce, ttl) {
                Ok(())
            } else {
                Err(AsapError::invalid_nonce("nonce has already been used"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asap_core::{AgentUrn, ManualClock};
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> (InMemoryNonceStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        (InMemoryNonceStore::new(clock.clone()), clock)
    }

    fn envelope() -> Envelope {
        Envelope::new(
            AgentUrn::for_agent("a").unwrap(),
            AgentUrn::for_agent("b").unwrap(),
            "message.send",
            json!({"conversation_id": "c", "content": "x"}),
        )
    }

    #[test]
    fn test_check_and_mark_detects_replay() {
        let (store, _) = store();
        let ttl = Duration::from_secs(600);
        assert!(store.check_and_mark("n1", ttl));
        assert!(!store.check_and_mark("n1", ttl));
        assert!(store.is_used("n1"));
        assert!(!store.is_used("n2"));
    }

    #[test]
    fn test_expired_nonce_is_reusable() {
        let (store, clock) = store();
        store.mark_used("n1", Duration::from_secs(10));
        clock.advance(Duration::from_secs(11));
        assert!(!store.is_used("n1"));
        assert!(store.check_and_mark("n1", Duration::from_secs(10)));
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (store, clock) = store();
        store.mark_used("short", Duration::from_secs(5));
        store.mark_used("long", Duration::from_secs(500));
        clock.advance(Duration::from_secs(6));
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.is_used("long"));
    }

    #[test]
    fn test_validate_nonce_rules() {
        let (store, _) = store();
        let ttl = Duration::from_secs(600);

        assert!(validate_nonce(&envelope(), &store, ttl, false).is_ok());
        let err = validate_nonce(&envelope(), &store, ttl, true).unwrap_err();
        assert_eq!(err.code(), "security/invalid_nonce");

        let with_nonce = envelope().with_nonce("abc");
        assert!(validate_nonce(&with_nonce, &store, ttl, true).is_ok());
        assert!(validate_nonce(&with_nonce, &store, ttl, true).is_err());

        let empty = envelope().with_nonce("");
        assert!(validate_nonce(&empty, &store, ttl, false).is_err());
        let numeric = envelope().with_extension("nonce", json!(7));
        assert!(validate_nonce(&numeric, &store, ttl, false).is_err());
    }

    #[test]
    fn test_concurrent_check_and_mark_admits_exactly_one() {
        let (store, _) = store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.check_and_mark("race", Duration::from_secs(60)))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|fresh| *fresh)
            .count();
        assert_eq!(winners, 1);
    }
}
