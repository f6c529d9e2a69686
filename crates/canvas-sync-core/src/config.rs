//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;
use crate::throttle::DEFAULT_THROTTLE_WINDOW_MS;

/// Reconnect policy after an unexpected close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: 250,
            multiplier: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

impl ReconnectConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Tunables for a `SyncEngine`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Cursor throttle window.
    pub throttle_window_ms: u64,
    pub reconnect: ReconnectConfig,
    /// Drop snapshots whose sequence number is not newer than the last one.
    pub reject_stale_sequences: bool,
    /// Upper bound on how long the background driver sleeps between pumps.
    pub driver_tick_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            throttle_window_ms: DEFAULT_THROTTLE_WINDOW_MS,
            reconnect: ReconnectConfig::default(),
            reject_stale_sequences: true,
            driver_tick_ms: 10,
        }
    }
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON document; missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let reconnect = &self.reconnect;
        if !reconnect.multiplier.is_finite() || reconnect.multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "reconnect.multiplier must be >= 1, got {}",
                reconnect.multiplier
            )));
        }
        if reconnect.max_delay_ms < reconnect.base_delay_ms {
            return Err(ConfigError::Invalid(
                "reconnect.max_delay_ms is below reconnect.base_delay_ms".to_string(),
            ));
        }
        if self.driver_tick_ms == 0 {
            return Err(ConfigError::Invalid("driver_tick_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }

    pub fn driver_tick(&self) -> Duration {
        Duration::from_millis(self.driver_tick_ms)
    }
}
