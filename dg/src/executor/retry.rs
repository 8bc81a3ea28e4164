//! Backoff schedule for transient stage failures

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Bounded exponential backoff with jitter
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub backoff_factor: f64,
    pub max_backoff: Duration,
    /// Randomize each delay within [delay/2, delay]
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            backoff_factor: config.backoff_factor.max(1.0),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            jitter: true,
        }
    }

    /// Retry immediately; for tests and offline use
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            backoff_factor: 1.0,
            max_backoff: Duration::ZERO,
            jitter: false,
        }
    }

    /// Delay before retry number `retry` (1-based)
    ///
    /// A service-provided `retry_after` is honored as a lower bound even when
    /// it exceeds `max_backoff`.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = retry.saturating_sub(1).min(30) as i32;
        let base_ms = self.initial_backoff.as_millis() as f64 * self.backoff_factor.powi(exponent);
        let capped_ms = base_ms.min(self.max_backoff.as_millis() as f64).max(0.0);

        let delay_ms = if self.jitter && capped_ms >= 2.0 {
            let half = capped_ms / 2.0;
            half + rand::rng().random_range(0.0..=half)
        } else {
            capped_ms
        };

        let delay = Duration::from_millis(delay_ms as u64);
        match retry_after {
            Some(hint) if hint > delay => hint,
            _ => delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
