//! Exponential reconnect delays.

use std::time::Duration;

use crate::config::ReconnectConfig;

/// Delay schedule: `base * multiplier^attempt`, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    multiplier: f64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            base_ms: config.base_delay_ms,
            multiplier: config.multiplier,
            max_ms: config.max_delay_ms,
            attempt: 0,
        }
    }

    /// Delay before the next attempt; advances the schedule.
    pub fn next_delay(&mut self) -> Duration {
        let factor = self.multiplier.powi(self.attempt.min(i32::MAX as u32) as i32);
        let ms = (self.base_ms as f64 * factor).min(self.max_ms as f64);
        self.attempt = self.attempt.saturating_add(1);
        // NaN and negatives cast to 0.
        Duration::from_millis(ms as u64)
    }

    /// Attempts scheduled since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(&ReconnectConfig::default())
    }
}
