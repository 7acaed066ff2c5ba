//! Stream event and connection state types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event type assumed when a frame carries no `event:` field.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Reserved listener type that receives every event.
pub const WILDCARD_EVENT_TYPE: &str = "*";

/// Lifecycle state of a stream connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// A transport is being opened, or is open but nothing has arrived yet.
    Connecting,
    /// At least one message has arrived on the current transport.
    Open,
    /// Closed explicitly or after retries ran out.
    Closed,
    /// The last transport failed.
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A decoded server-sent event, as handed to listeners.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    /// Declared event type (`"message"` when absent on the wire).
    #[serde(rename = "type")]
    pub event_type: String,
    /// JSON payload of the `data:` lines.
    pub data: Value,
    /// When the event was received.
    pub timestamp: DateTime<Utc>,
    /// Correlation id, from the payload's `correlationId` or generated.
    pub correlation_id: String,
    /// Server-assigned event id, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl StreamEvent {
    /// Build an event received now.
    ///
    /// The correlation id is lifted from a top-level string `correlationId`
    /// field of `data`; otherwise a fresh UUID v7 is assigned.
    #[must_use]
    pub fn new(event_type: Option<&str>, data: Value, id: Option<String>) -> Self {
        let correlation_id = data
            .get("correlationId")
            .and_then(Value::as_str)
            .map_or_else(|| uuid::Uuid::now_v7().to_string(), ToOwned::to_owned);
        Self {
            event_type: event_type
                .filter(|t| !t.is_empty())
                .unwrap_or(DEFAULT_EVENT_TYPE)
                .to_owned(),
            data,
            timestamp: Utc::now(),
            correlation_id,
            id,
        }
    }

    /// Key under which this event is buffered: the event id, or the
    /// correlation id for events without one.
    #[must_use]
    pub fn buffer_key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.correlation_id)
    }
}
