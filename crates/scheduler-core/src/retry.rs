//! Exponential backoff for dispatch retries.
//!
//! When a dispatcher publish fails, the occurrence stays `Queued` with
//! `dispatchRetryCount` incremented and `nextDispatchRetryAt` pushed out by
//! `2^retry · 10s`, capped at a maximum delay. This is the dispatcher's own
//! narrow use of the backoff idea; `ExponentialBackoff` is kept general
//! enough for the worker's transient-retry policy to reuse.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Exponential backoff with jitter, same shape as the base delay/cap/
/// multiplier/jitter knobs used for job-level retry policies, reused here
/// for dispatch-retry scheduling.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
}

impl ExponentialBackoff {
    pub fn new(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self { initial_delay, max_delay, multiplier, jitter: 0.1 }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt as f64;
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powf(exponent);
        let delay_secs = delay_secs.min(self.max_delay.as_secs_f64());

        let jitter_range = delay_secs * self.jitter;
        let jitter = if self.jitter > 0.0 {
            use rand::Rng;
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };

        Duration::from_secs_f64((delay_secs + jitter).max(0.0))
    }
}

impl Default for ExponentialBackoff {
    /// `2^retry · 10s`, uncapped side capped at 10 minutes — the
    /// dispatcher's own retry schedule.
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(600), 2.0)
    }
}

/// `nextDispatchRetryAt` for a dispatch that has failed `retry_count`
/// times so far (0 on the first failure).
pub fn next_dispatch_retry_at(retry_count: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    let backoff = ExponentialBackoff::default();
    now + chrono::Duration::from_std(backoff.delay_for_attempt(retry_count)).unwrap_or(chrono::Duration::seconds(600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let backoff = ExponentialBackoff::new(Duration::from_secs(10), Duration::from_secs(60), 2.0).with_jitter(0.0);
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(10));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_secs(20));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_secs(40));
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_secs(60));
    }

    #[test]
    fn next_dispatch_retry_at_moves_strictly_forward() {
        let now = Utc::now();
        let first = next_dispatch_retry_at(0, now);
        let second = next_dispatch_retry_at(1, now);
        assert!(first > now);
        assert!(second > first);
    }
}
