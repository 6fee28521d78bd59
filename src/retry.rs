//! Bounded retry scheduling with exponential backoff and jitter.
//!
//! The reporter does not sleep between attempts; it stamps each failed
//! batch with the earliest instant at which the next attempt may run and
//! reconsiders it on the following flush cycle.

use std::time::{Duration, SystemTime};

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub(crate) struct RetryPolicy {
    /// Maximum number of retry attempts after the initial failure.
    pub(crate) max_retries: usize,
    /// Delay in milliseconds before the first retry.
    pub(crate) initial_delay_ms: u64,
    /// Upper bound in milliseconds on the delay between retries.
    pub(crate) max_delay_ms: u64,
    /// Maximum jitter in milliseconds added to each delay.
    pub(crate) jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
            jitter_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt (1-based): exponential doubling of
    /// the initial delay, capped at the maximum, plus jitter.
    pub(crate) fn backoff_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        let delay = self
            .initial_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        let jittered = delay
            .saturating_add(generate_jitter(self.jitter_ms))
            .min(self.max_delay_ms);
        Duration::from_millis(jittered)
    }
}

// Generates a random jitter value up to max_jitter
fn generate_jitter(max_jitter: u64) -> u64 {
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    nanos as u64 % (max_jitter + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bound() {
        let max_jitter = 100;
        let jitter = generate_jitter(max_jitter);
        assert!(jitter <= max_jitter);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 400,
            jitter_ms: 0,
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
        // capped at max_delay_ms from here on
        assert_eq!(policy.backoff_delay(4), Duration::from_millis(400));
        assert_eq!(policy.backoff_delay(60), Duration::from_millis(400));
    }

    #[test]
    fn jitter_never_exceeds_max_delay() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay_ms: 400,
            max_delay_ms: 400,
            jitter_ms: 1_000,
        };
        assert!(policy.backoff_delay(1) <= Duration::from_millis(400));
    }
}
