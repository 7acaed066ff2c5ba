//! Connector configuration.

use std::time::Duration;

use eventline_core::ReconnectPolicy;
use eventline_settings::ConnectorSettings;

/// Smallest usable dedup window; zero would disable deduplication.
pub const MIN_DEDUP_WINDOW: Duration = Duration::from_millis(1);

/// Everything a [`StreamConnector`](crate::StreamConnector) needs to know
/// about its endpoint and behaviour.
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectorConfig {
    /// Event stream URL.
    pub url: String,
    /// Backoff parameters.
    pub reconnect: ReconnectPolicy,
    /// Reconnect automatically after transport failures.
    pub auto_reconnect: bool,
    /// Extra request headers.
    pub headers: Vec<(String, String)>,
    /// Retention for seen ids and buffered events; also the sweep interval.
    pub dedup_window: Duration,
    /// Maximum buffered events.
    pub max_buffer_size: usize,
}

impl ConnectorConfig {
    /// Configuration for `url` with default settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self::from_settings(url, &ConnectorSettings::default())
    }

    /// Configuration for `url` from loaded settings.
    pub fn from_settings(url: impl Into<String>, settings: &ConnectorSettings) -> Self {
        Self {
            url: url.into(),
            reconnect: settings.reconnect.clone(),
            auto_reconnect: settings.auto_reconnect,
            headers: settings
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            dedup_window: Duration::from_millis(settings.dedup_window_ms).max(MIN_DEDUP_WINDOW),
            max_buffer_size: settings.max_buffer_size,
        }
    }

    /// Add a request header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the backoff parameters.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Enable or disable automatic reconnection.
    #[must_use]
    pub fn with_auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    /// Set the dedup window (at least 1 ms).
    #[must_use]
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window.max(MIN_DEDUP_WINDOW);
        self
    }

    /// Set the buffer capacity.
    #[must_use]
    pub fn with_max_buffer_size(mut self, max_buffer_size: usize) -> Self {
        self.max_buffer_size = max_buffer_size;
        self
    }
}
