//! Envelope timestamp window.

use asap_core::{AsapError, SharedClock};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Rejects envelopes that are too old or too far in the future.
#[derive(Debug, Clone)]
pub struct TimestampValidator {
    max_age: Duration,
    max_future_tolerance: Duration,
    clock: SharedClock,
}

impl TimestampValidator {
    pub fn new(max_age: Duration, max_future_tolerance: Duration, clock: SharedClock) -> Self {
        Self {
            max_age,
            max_future_tolerance,
            clock,
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Accept iff `now - max_age <= timestamp <= now + max_future_tolerance`.
    ///
    /// The error carries the envelope age in seconds (negative for future
    /// timestamps).
    pub fn validate(&self, timestamp: DateTime<Utc>) -> Result<(), AsapError> {
        let now = self.clock.now();
        let age = now.signed_duration_since(timestamp);
        let max_age = chrono::Duration::from_std(self.max_age).unwrap_or(chrono::Duration::MAX);
        let max_future = chrono::Duration::from_std(self.max_future_tolerance)
            .unwrap_or(chrono::Duration::MAX);

        if age > max_age {
            return Err(AsapError::InvalidTimestamp {
                offset_secs: age.num_seconds(),
                reason: format!(
                    "envelope is older than the maximum age of {}s",
                    self.max_age.as_secs()
                ),
            });
        }
        if -age > max_future {
            return Err(AsapError::InvalidTimestamp {
                offset_secs: age.num_seconds(),
                reason: format!(
                    "envelope is more than {}s in the future",
                    self.max_future_tolerance.as_secs()
                ),
            });
        }
        Ok(())
    }
}
