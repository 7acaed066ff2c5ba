//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so partial
//! JSON files fill missing fields with their defaults.

use std::collections::BTreeMap;

use eventline_core::ReconnectPolicy;
use eventline_core::logging::DEFAULT_LOG_LEVEL;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "connector": { "reconnect": { "maxRetries": 10 }, "maxBufferSize": 500 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventlineSettings {
    /// Stream connector behaviour.
    pub connector: ConnectorSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl EventlineSettings {
    /// Reject values the connector cannot work with.
    pub fn validate(&self) -> Result<()> {
        self.connector.validate()
    }
}

/// Stream connector settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectorSettings {
    /// Backoff parameters.
    pub reconnect: ReconnectPolicy,
    /// Reconnect automatically after transport failures.
    pub auto_reconnect: bool,
    /// Extra request headers sent on every connection.
    pub headers: BTreeMap<String, String>,
    /// How long seen ids and buffered events are retained, in ms.
    pub dedup_window_ms: u64,
    /// Maximum number of buffered events.
    pub max_buffer_size: usize,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            auto_reconnect: true,
            headers: BTreeMap::new(),
            dedup_window_ms: 60_000,
            max_buffer_size: 100,
        }
    }
}

impl ConnectorSettings {
    /// Reject values the connector cannot work with.
    pub fn validate(&self) -> Result<()> {
        let reconnect = &self.reconnect;
        if reconnect.multiplier < 1.0 || !reconnect.multiplier.is_finite() {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect.multiplier must be >= 1, got {}",
                reconnect.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&reconnect.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect.jitterFactor must be within 0..=1, got {}",
                reconnect.jitter_factor
            )));
        }
        if reconnect.max_delay_ms < reconnect.initial_delay_ms {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect.maxDelayMs ({}) is below initialDelayMs ({})",
                reconnect.max_delay_ms, reconnect.initial_delay_ms
            )));
        }
        if self.dedup_window_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "dedupWindowMs must be positive".to_string(),
            ));
        }
        if self.max_buffer_size == 0 {
            return Err(SettingsError::InvalidValue(
                "maxBufferSize must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `tracing` filter directive, e.g. `"info"` or `"eventline_client=debug"`.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}
