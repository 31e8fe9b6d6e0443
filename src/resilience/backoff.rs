//! Exponential backoff bounded by retry count and total elapsed time.

use num_traits::ToPrimitive;
use std::time::Duration;
use tokio::time::Instant;

const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Retries after the first attempt. Zero means a single attempt.
    pub max_retries: u32,
    pub multiplier: f64,
    /// Overrides the derived `max_retries * max_interval` budget.
    pub max_elapsed: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            multiplier: DEFAULT_MULTIPLIER,
            max_elapsed: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(initial_interval: Duration, max_interval: Duration, max_retries: u32) -> Self {
        Self {
            initial_interval,
            max_interval,
            max_retries,
            ..Self::default()
        }
    }

    pub fn no_retries() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }

    /// Widens a derived elapsed budget so every retry still fits after attempts
    /// that each ran for the full `attempt_timeout`. An explicit budget is kept.
    #[must_use]
    pub fn covering_attempts(mut self, attempt_timeout: Duration) -> Self {
        if self.max_elapsed.is_none() {
            self.max_elapsed = Some(
                attempt_timeout
                    .saturating_add(self.max_interval)
                    .saturating_mul(self.max_retries),
            );
        }
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.initial_interval > self.max_interval {
            return Err(format!(
                "initial interval {:?} exceeds maximum interval {:?}",
                self.initial_interval, self.max_interval
            ));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!(
                "multiplier must be a finite value >= 1.0, got {}",
                self.multiplier
            ));
        }
        Ok(())
    }

    /// Total time the retry loop may spend before giving up.
    pub fn max_elapsed_time(&self) -> Duration {
        self.max_elapsed
            .unwrap_or_else(|| self.max_interval.saturating_mul(self.max_retries))
    }

    /// Wait before retry number `retry` (0-indexed), capped at the maximum interval.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let base = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());
        (capped * 1e9)
            .round()
            .to_u64()
            .map_or(self.max_interval, Duration::from_nanos)
    }
}

/// Per-call retry schedule. Create one for every logical call.
#[derive(Debug)]
pub struct Backoff {
    policy: RetryPolicy,
    retries: u32,
    started: Instant,
}

impl Backoff {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            retries: 0,
            started: Instant::now(),
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Wait before the next attempt, or `None` once either budget is spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.policy.max_retries {
            return None;
        }

        let delay = self.policy.delay_for_retry(self.retries);
        if self.elapsed().saturating_add(delay) > self.policy.max_elapsed_time() {
            return None;
        }

        self.retries += 1;
        Some(delay)
    }
}
