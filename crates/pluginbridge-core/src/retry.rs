//! Bounded exponential backoff.
//!
//! Shared by the dependency resolver (re-resolution after a failed attempt)
//! and the log forwarder (collector unreachable). Pure: it only answers
//! whether and when to try again; callers own the waiting.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy with capped exponential backoff.
///
/// `max_attempts` counts every attempt including the first. The delay that
/// follows attempt *n* (1-based) is:
///
/// ```text
/// delay = min(base_delay_ms * backoff_factor ^ (n - 1), max_delay_ms)
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, first one included.
    pub max_attempts: u32,
    /// Delay after the first failed attempt (milliseconds).
    pub base_delay_ms: u64,
    /// Upper bound for any single delay (milliseconds).
    pub max_delay_ms: u64,
    /// Multiplier applied per attempt.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after `attempt` failed, or `None` when the budget is spent.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.max_attempts {
            return None;
        }

        let exponent = (attempt - 1).min(i32::MAX as u32) as i32;
        let delay = self.base_delay_ms as f64 * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_delay_ms as f64).max(0.0);

        Some(Duration::from_millis(capped as u64))
    }

    /// Sum of every delay the policy can produce.
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_attempts)
            .filter_map(|attempt| self.delay_after(attempt))
            .sum()
    }

    /// Check the policy is usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        if self.backoff_factor < 1.0 || !self.backoff_factor.is_finite() {
            return Err(format!(
                "backoff_factor must be a finite number >= 1.0, got {}",
                self.backoff_factor
            ));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            ));
        }
        Ok(())
    }
}
