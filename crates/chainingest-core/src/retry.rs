//! Exponential backoff with bounded jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplier applied to the delay on each attempt.
    pub multiplier: f64,
    /// Adds up to `jitter_fraction * delay` of random extra wait. Must be in `[0, 1)`.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base: Duration::from_millis(100),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.base > self.max {
            return Err(IngestError::Config(format!(
                "backoff base {:?} exceeds backoff max {:?}",
                self.base, self.max
            )));
        }
        if !(0.0..1.0).contains(&self.jitter_fraction) {
            return Err(IngestError::Config(format!(
                "jitter_fraction must be in [0, 1), got {}",
                self.jitter_fraction
            )));
        }
        if self.multiplier < 1.0 {
            return Err(IngestError::Config(format!(
                "backoff multiplier must be >= 1, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }
}

/// Stateless retry policy. Computes the delay for a given attempt number.
///
/// Jitter is applied before the cap and is smaller than the growth factor,
/// so consecutive delays strictly increase until they reach `max` and then
/// stay at exactly `max`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay for the `attempt`-th retry (1-based), ignoring `max_retries`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_ms = self.config.base.as_millis() as f64 * self.config.multiplier.powi(exp);
        let jitter = if self.config.jitter_fraction > 0.0 {
            rand::thread_rng().gen_range(0.0..self.config.jitter_fraction)
        } else {
            0.0
        };
        let cap_ms = self.config.max.as_millis() as f64;
        let total_ms = (base_ms * (1.0 + jitter)).min(cap_ms);
        Duration::from_millis(total_ms as u64)
    }

    /// Delay before the `attempt`-th retry, or `None` once retries are used up.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        Some(self.delay_for(attempt))
    }
}
