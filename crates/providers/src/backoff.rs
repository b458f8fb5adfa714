//! Exponential backoff — the default retry strategy for completion requests.

use std::time::Duration;

use hizen_core::error::ProviderError;
use hizen_core::provider::BackoffStrategy;

/// Doubling (by `multiplier`) delay between retries, capped at `max_delay`.
///
/// Rate-limit responses use the provider's `retry_after` hint when it is
/// longer than the computed delay. Non-transient errors are never retried.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl ExponentialBackoff {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            multiplier,
        }
    }

    /// A strategy that surfaces the first failure.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO, 1.0)
    }

    /// Build from the `[backoff]` config section.
    pub fn from_config(config: &hizen_config::BackoffConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.multiplier,
        )
    }

    fn computed_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(500), Duration::from_secs(8), 2.0)
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn name(&self) -> &str {
        "exponential"
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn delay_for(&self, attempt: u32, error: &ProviderError) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries || !error.is_transient() {
            return None;
        }

        let delay = self.computed_delay(attempt);
        match error {
            ProviderError::RateLimited { retry_after_secs } => {
                Some(delay.max(Duration::from_secs(*retry_after_secs)).min(self.max_delay))
            }
            _ => Some(delay),
        }
    }
}
