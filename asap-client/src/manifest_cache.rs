//! TTL cache of remote agent manifests, keyed by base URL.

use std::sync::Arc;
use std::time::Duration;

use asap_core::{system_clock, Manifest, SharedClock};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone)]
struct CachedManifest {
    manifest: Arc<Manifest>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ManifestCache {
    entries: DashMap<String, CachedManifest>,
    ttl: Duration,
    clock: SharedClock,
}

impl ManifestCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, system_clock())
    }

    pub fn with_clock(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh manifest for `key`; expired entries are dropped on access.
    pub fn get(&self, key: &str) -> Option<Arc<Manifest>> {
        let now = self.clock.now();
        let hit = self.entries.get(key).map(|e| e.clone())?;
        if hit.expires_at > now {
            return Some(hit.manifest);
        }
        self.entries.remove_if(key, |_, e| e.expires_at <= now);
        None
    }

    pub fn insert(&self, key: impl Into<String>, manifest: Manifest) -> Arc<Manifest> {
        let manifest = Arc::new(manifest);
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries.insert(
            key.into(),
            CachedManifest {
                manifest: Arc::clone(&manifest),
                expires_at,
            },
        );
        manifest
    }

    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asap_core::{AgentUrn, ManualClock};

    fn manifest() -> Manifest {
        Manifest::new(
            AgentUrn::for_agent("remote").unwrap(),
            "remote",
            "1.0.0",
            "http://127.0.0.1:9000/asap",
        )
    }

    #[test]
    fn test_entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::starting_now());
        let cache = ManifestCache::with_clock(Duration::from_secs(300), clock.clone());
        cache.insert("http://127.0.0.1:9000", manifest());

        clock.advance(Duration::from_secs(299));
        assert!(cache.get("http://127.0.0.1:9000").is_some());

        clock.advance(Duration::from_secs(1));
        assert!(cache.get("http://127.0.0.1:9000").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate() {
        let cache = ManifestCache::new(Duration::from_secs(300));
        cache.insert("a", manifest());
        cache.insert("b", manifest());
        cache.invalidate("a");
        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
