//! Per-sender rate limiting.
//!
//! A rate limit spec is a `;`-separated list of quotas such as
//! `"10/second;100/minute"`. Every key gets one GCRA limiter per quota,
//! created lazily; a request must pass all of them. Keys idle for longer
//! than the slowest quota's period are fully replenished and can be swept.

use crate::config::ConfigError;
use dashmap::DashMap;
use governor::{clock::DefaultClock, Quota, RateLimiter};
use std::fmt;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Type alias for the rate limiter we use.
type DirectRateLimiter =
    RateLimiter<governor::state::NotKeyed, governor::state::InMemoryState, DefaultClock>;

/// Quota period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePeriod {
    Second,
    Minute,
    Hour,
    Day,
}

impl RatePeriod {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "second" | "seconds" | "s" | "sec" => Some(RatePeriod::Second),
            "minute" | "minutes" | "m" | "min" => Some(RatePeriod::Minute),
            "hour" | "hours" | "h" => Some(RatePeriod::Hour),
            "day" | "days" | "d" => Some(RatePeriod::Day),
            _ => None,
        }
    }

    pub fn as_duration(&self) -> Duration {
        match self {
            RatePeriod::Second => Duration::from_secs(1),
            RatePeriod::Minute => Duration::from_secs(60),
            RatePeriod::Hour => Duration::from_secs(3600),
            RatePeriod::Day => Duration::from_secs(86_400),
        }
    }
}

/// One `<n>/<period>` quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateQuota {
    pub count: NonZeroU32,
    pub period: RatePeriod,
}

impl RateQuota {
    /// Time to replenish one cell.
    pub fn cell_interval(&self) -> Duration {
        self.period.as_duration() / self.count.get()
    }

    /// GCRA quota: bursts of `count`, replenished evenly over the period.
    fn to_governor(self) -> Quota {
        match self.period {
            RatePeriod::Second => Quota::per_second(self.count),
            RatePeriod::Minute => Quota::per_minute(self.count),
            RatePeriod::Hour => Quota::per_hour(self.count),
            RatePeriod::Day => {
                let interval = self.period.as_duration() / self.count.get();
                Quota::with_period(interval)
                    .unwrap_or_else(|| Quota::per_hour(self.count))
                    .allow_burst(self.count)
            }
        }
    }
}

impl fmt::Display for RateQuota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let period = match self.period {
            RatePeriod::Second => "second",
            RatePeriod::Minute => "minute",
            RatePeriod::Hour => "hour",
            RatePeriod::Day => "day",
        };
        write!(f, "{}/{}", self.count, period)
    }
}

/// Parse `"<n>/<second|minute|hour|day>[;...]"`.
pub fn parse_rate_limit(spec: &str) -> Result<Vec<RateQuota>, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidRateLimit {
        spec: spec.to_string(),
        reason,
    };

    let mut quotas = Vec::new();
    for part in spec.split(';').map(str::trim).filter(|p| !p.is_empty()) {
        let (count, period) = part
            .split_once('/')
            .ok_or_else(|| invalid(format!("'{part}' is not of the form <n>/<period>")))?;
        let count: u32 = count
            .trim()
            .parse()
            .map_err(|_| invalid(format!("'{count}' is not a positive integer")))?;
        let count = NonZeroU32::new(count).ok_or_else(|| invalid("count must be > 0".into()))?;
        let period =
            RatePeriod::parse(period).ok_or_else(|| invalid(format!("unknown period '{period}'")))?;
        quotas.push(RateQuota { count, period });
    }
    if quotas.is_empty() {
        return Err(invalid("no quotas given".into()));
    }
    Ok(quotas)
}

/// Key for rate limiting.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum RateLimitKey {
    /// Envelope sender URN, when the frame parsed.
    Sender(String),
    /// Client IP for frames that did not parse.
    Ip(IpAddr),
    /// Neither sender nor client address is known.
    Unknown,
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitKey::Sender(s) => write!(f, "sender:{s}"),
            RateLimitKey::Ip(ip) => write!(f, "ip:{ip}"),
            RateLimitKey::Unknown => f.write_str("unknown"),
        }
    }
}

/// Rejection with the number of seconds to wait (at least 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitExceeded {
    pub retry_after_secs: u64,
}

/// Limiters for one key plus when it was last checked.
struct KeyLimiters {
    limiters: Vec<DirectRateLimiter>,
    /// Milliseconds since the owning limiter's epoch.
    last_seen_ms: AtomicU64,
}

/// Per-key limiters - uses DashMap for lock-free concurrent access.
#[derive(Clone)]
pub struct AsapRateLimiter {
    /// Ordered by ascending cell interval, the order `check` consults them.
    quotas: Arc<[RateQuota]>,
    limiters: Arc<DashMap<RateLimitKey, Arc<KeyLimiters>>>,
    epoch: Instant,
}

impl fmt::Debug for AsapRateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsapRateLimiter")
            .field("quotas", &self.quotas)
            .field("keys", &self.limiters.len())
            .finish()
    }
}

impl AsapRateLimiter {
    pub fn new(mut quotas: Vec<RateQuota>) -> Self {
        quotas.sort_by_key(RateQuota::cell_interval);
        Self {
            quotas: quotas.into(),
            limiters: Arc::new(DashMap::new()),
            epoch: Instant::now(),
        }
    }

    /// Build from a spec string.
    pub fn from_spec(spec: &str) -> Result<Self, ConfigError> {
        parse_rate_limit(spec).map(Self::new)
    }

    /// Quotas in the order they are checked.
    pub fn quotas(&self) -> &[RateQuota] {
        &self.quotas
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.limiters.len()
    }

    /// How long a key must sit idle before all its quotas are full again.
    pub fn idle_after(&self) -> Duration {
        self.quotas
            .iter()
            .map(|q| q.period.as_duration())
            .max()
            .unwrap_or_default()
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn get_or_create(&self, key: &RateLimitKey) -> Arc<KeyLimiters> {
        // DashMap's entry API handles the get-or-insert atomically
        let entry = self
            .limiters
            .entry(key.clone())
            .or_insert_with(|| {
                Arc::new(KeyLimiters {
                    limiters: self
                        .quotas
                        .iter()
                        .map(|q| RateLimiter::direct(q.to_governor()))
                        .collect(),
                    last_seen_ms: AtomicU64::new(0),
                })
            })
            .clone();
        entry.last_seen_ms.store(self.elapsed_ms(), Ordering::Relaxed);
        entry
    }

    /// Consume one cell for `key` from each quota, cheapest cell first.
    ///
    /// GCRA cannot refund, so quotas checked before a rejecting one keep the
    /// cell they gave up. Checking in ascending cell interval and stopping
    /// at the first rejection means a request turned away by a short window
    /// never spends a cell of a longer one. `retry_after_secs` reflects the
    /// first quota that rejected.
    pub fn check(&self, key: &RateLimitKey) -> Result<(), RateLimitExceeded> {
        let entry = self.get_or_create(key);
        let now = governor::clock::Clock::now(&DefaultClock::default());

        for limiter in entry.limiters.iter() {
            if let Err(not_until) = limiter.check() {
                let wait = not_until.wait_time_from(now);
                // Round up so clients never retry early; minimum 1 second
                let mut secs = wait.as_secs();
                if wait.subsec_nanos() > 0 {
                    secs += 1;
                }
                return Err(RateLimitExceeded {
                    retry_after_secs: secs.max(1),
                });
            }
        }
        Ok(())
    }

    /// Forget keys not checked for at least `idle`, returning how many.
    pub fn sweep_idle(&self, idle: Duration) -> usize {
        let idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX);
        let now_ms = self.elapsed_ms();
        let before = self.limiters.len();
        self.limiters.retain(|_, entry| {
            now_ms.saturating_sub(entry.last_seen_ms.load(Ordering::Relaxed)) < idle_ms
        });
        before.saturating_sub(self.limiters.len())
    }

    /// Forget keys whose quotas have fully replenished.
    pub fn sweep(&self) -> usize {
        self.sweep_idle(self.idle_after())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multi_quota_spec() {
        let quotas = parse_rate_limit("10/second; 100/minute;1000/hour;5000/day").unwrap();
        assert_eq!(quotas.len(), 4);
        assert_eq!(quotas[0].count.get(), 10);
        assert_eq!(quotas[0].period, RatePeriod::Second);
        assert_eq!(quotas[3].period, RatePeriod::Day);
        assert_eq!(quotas[1].to_string(), "100/minute");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for spec in ["", "10", "0/second", "-1/minute", "10/fortnight", "ten/second"] {
            assert!(parse_rate_limit(spec).is_err(), "{spec:?} should be rejected");
        }
    }

    #[test]
    fn test_limit_enforced_per_key() {
        let limiter = AsapRateLimiter::from_spec("3/minute").unwrap();
        let a = RateLimitKey::Sender("urn:asap:agent:a".into());
        let b = RateLimitKey::Sender("urn:asap:agent:b".into());

        for _ in 0..3 {
            assert!(limiter.check(&a).is_ok());
        }
        let rejected = limiter.check(&a).unwrap_err();
        assert!(rejected.retry_after_secs >= 1);

        assert!(limiter.check(&b).is_ok());
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_tightest_quota_wins() {
        let limiter = AsapRateLimiter::from_spec("100/second;2/hour").unwrap();
        let key = RateLimitKey::Ip("10.0.0.1".parse().unwrap());
        assert!(limiter.check(&key).is_ok());
        assert!(limiter.check(&key).is_ok());
        let rejected = limiter.check(&key).unwrap_err();
        // Next cell of a 2/hour quota is ~30 minutes away
        assert!(rejected.retry_after_secs > 60);
    }

    #[test]
    fn test_quotas_checked_cheapest_cell_first() {
        let limiter = AsapRateLimiter::from_spec("3/hour;2/second").unwrap();
        assert_eq!(limiter.quotas()[0].period, RatePeriod::Second);
        assert_eq!(limiter.idle_after(), Duration::from_secs(3600));
        let key = RateLimitKey::Sender("urn:asap:agent:bursty".into());

        assert!(limiter.check(&key).is_ok());
        assert!(limiter.check(&key).is_ok());
        // Turned away by the per-second window; the hourly cell is kept
        let rejected = limiter.check(&key).unwrap_err();
        assert_eq!(rejected.retry_after_secs, 1);

        std::thread::sleep(Duration::from_millis(600));
        assert!(limiter.check(&key).is_ok());

        std::thread::sleep(Duration::from_millis(600));
        let rejected = limiter.check(&key).unwrap_err();
        assert!(rejected.retry_after_secs > 60);
    }

    #[test]
    fn test_sweep_forgets_idle_keys() {
        let limiter = AsapRateLimiter::from_spec("1/minute").unwrap();
        let a = RateLimitKey::Sender("urn:asap:agent:a".into());
        let b = RateLimitKey::Ip("10.0.0.2".parse().unwrap());
        assert!(limiter.check(&a).is_ok());
        assert!(limiter.check(&b).is_ok());
        assert!(limiter.check(&a).is_err());

        // Nothing has been idle for a full period yet
        assert_eq!(limiter.sweep(), 0);
        assert_eq!(limiter.tracked_keys(), 2);

        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.check(&b).is_err());
        assert_eq!(limiter.sweep_idle(Duration::from_millis(10)), 1);
        assert_eq!(limiter.tracked_keys(), 1);

        // A swept key starts over with full quotas
        assert!(limiter.check(&a).is_ok());
        assert_eq!(limiter.sweep_idle(Duration::ZERO), 2);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_quota() -> impl Strategy<Value = RateQuota> {
            (
                1u32..10_000,
                prop::sample::select(vec![
                    RatePeriod::Second,
                    RatePeriod::Minute,
                    RatePeriod::Hour,
                    RatePeriod::Day,
                ]),
            )
                .prop_map(|(count, period)| RateQuota {
                    count: NonZeroU32::new(count).unwrap(),
                    period,
                })
        }

        proptest! {
            #[test]
            fn prop_rendered_spec_parses_back(quotas in prop::collection::vec(arb_quota(), 1..5)) {
                let spec = quotas.iter().map(ToString::to_string).collect::<Vec<_>>().join(";");
                prop_assert_eq!(parse_rate_limit(&spec).unwrap(), quotas);
            }

            #[test]
            fn prop_exhausting_one_key_leaves_others_alone(burst in 1u32..20) {
                let limiter = AsapRateLimiter::from_spec(&format!("{burst}/hour")).unwrap();
                let noisy = RateLimitKey::Sender("urn:asap:agent:noisy".into());
                let quiet = RateLimitKey::Sender("urn:asap:agent:quiet".into());

                for _ in 0..burst {
                    prop_assert!(limiter.check(&noisy).is_ok());
                }
                prop_assert!(limiter.check(&noisy).is_err());
                prop_assert!(limiter.check(&quiet).is_ok());
            }
        }
    }
}
