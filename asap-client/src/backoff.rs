//! Exponential backoff with jitter and `Retry-After` parsing.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::constants::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, MAX_JITTER_FRACTION,
};

/// Retry schedule for [`crate::AsapClient::send`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Add a uniform 0-10% of the delay on top.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// `min(base_delay * 2^attempt, max_delay)` plus optional jitter.
    ///
    /// `attempt` is zero-based: the delay before the first retry is
    /// `delay_for_attempt(0)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_delay.as_secs_f64() * 2f64.powi(exponent);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let delay = Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay);

        if self.jitter && !delay.is_zero() {
            let fraction = rand::rng().random_range(0.0..=MAX_JITTER_FRACTION);
            delay + delay.mul_f64(fraction)
        } else {
            delay
        }
    }

    /// Honour a server-supplied delay, capped at `max_delay`.
    pub fn clamp_retry_after(&self, retry_after: Duration) -> Duration {
        retry_after.min(self.max_delay)
    }
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP-date.
///
/// Dates in the past yield a zero delay.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some(at.signed_duration_since(now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_schedule_is_capped() {
        let policy = no_jitter();
        let delays: Vec<u64> = (0..9).map(|a| policy.delay_for_attempt(a).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        assert_eq!(no_jitter().delay_for_attempt(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = RetryPolicy {
            jitter: true,
            ..no_jitter()
        };
        for attempt in 0..8 {
            let base = no_jitter().delay_for_attempt(attempt);
            for _ in 0..50 {
                let delay = policy.delay_for_attempt(attempt);
                assert!(delay >= base);
                assert!(delay <= base.mul_f64(1.0 + MAX_JITTER_FRACTION) + Duration::from_micros(1));
            }
        }
    }

    #[test]
    fn test_retry_after_is_clamped() {
        let policy = no_jitter();
        assert_eq!(
            policy.clamp_retry_after(Duration::from_secs(3600)),
            Duration::from_secs(60)
        );
        assert_eq!(
            policy.clamp_retry_after(Duration::from_secs(5)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let now = Utc::now();
        assert_eq!(parse_retry_after("7", now), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(" 0 ", now), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let now = DateTime::parse_from_rfc3339("2015-10-21T07:27:30Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
    }
}
