//! Retry delay calculation for transient stage failures

use std::time::Duration;

use crate::config::BackoffConfig;

/// Jitter factor applied on top of the exponential delay when enabled
const JITTER_FACTOR: f64 = 0.1;

/// Exponential backoff with optional jitter, capped at a maximum delay
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_enabled: bool,
}

impl BackoffPolicy {
    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
            jitter_enabled: config.jitter_enabled,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay
            .mul_f64(self.multiplier.powi(attempt.saturating_sub(1).min(30) as i32));

        let jittered_delay = if self.jitter_enabled {
            let jitter = fastrand::f64() * JITTER_FACTOR;
            delay.mul_f64(1.0 + jitter)
        } else {
            delay
        };

        jittered_delay.min(self.max_delay)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}
