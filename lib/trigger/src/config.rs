//! Trigger engine configuration.

use serde::Deserialize;
use std::time::Duration;

/// Configuration for the trigger engine.
#[derive(Debug, Clone, Deserialize)]
pub struct TriggerConfig {
    /// Whether triggers are enabled at all.
    /// Management operations fail while this is false.
    #[serde(default)]
    pub enabled: bool,

    /// How often to poll the metadata store for changes, in milliseconds.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Maximum number of `afterAsync` units running at once.
    #[serde(default = "default_async_workers")]
    pub async_workers: usize,
}

fn default_refresh_interval_ms() -> u64 {
    60_000
}

fn default_async_workers() -> usize {
    4
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            refresh_interval_ms: default_refresh_interval_ms(),
            async_workers: default_async_workers(),
        }
    }
}

impl TriggerConfig {
    /// Returns an enabled configuration with default settings.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Returns the refresh interval as a duration.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }

    /// Returns the async pool size, never less than one.
    #[must_use]
    pub fn async_workers(&self) -> usize {
        self.async_workers.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = TriggerConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.refresh_interval(), Duration::from_secs(60));
        assert_eq!(config.async_workers(), 4);
    }

    #[test]
    fn deserializes_with_missing_fields() {
        let config: TriggerConfig =
            serde_json::from_str(r#"{"enabled": true}"#).expect("deserialize");
        assert!(config.enabled);
        assert_eq!(config.refresh_interval_ms, 60_000);
    }

    #[test]
    fn zero_workers_clamps_to_one() {
        let config = TriggerConfig {
            async_workers: 0,
            ..TriggerConfig::enabled()
        };
        assert_eq!(config.async_workers(), 1);
    }
}
