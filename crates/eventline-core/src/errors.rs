//! Error taxonomy for the stream connector.
//!
//! - [`StreamError::Client`]: 4xx responses other than 429, never retried
//! - [`StreamError::InvalidRequest`]: the request could not be built, never retried
//! - [`StreamError::Transport`]: network failures, 5xx, abrupt close
//! - [`StreamError::RateLimited`]: 429, retried after `Retry-After` if given
//! - [`StreamError::Parse`]: one malformed message, dropped and logged
//! - [`StreamError::RetryExhausted`]: terminal, surfaced before closing

use thiserror::Error;

/// Errors produced while streaming events.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StreamError {
    /// The server rejected the request with a non-retryable 4xx status.
    #[error("client error ({status}): {message}")]
    Client {
        /// HTTP status code.
        status: u16,
        /// Error description.
        message: String,
    },

    /// The request could not be built, e.g. a malformed header.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Error description.
        message: String,
    },

    /// The transport failed or ended unexpectedly.
    #[error("transport error: {message}")]
    Transport {
        /// HTTP status code, when the failure was a response.
        status: Option<u16>,
        /// Error description.
        message: String,
    },

    /// The server asked us to slow down.
    #[error("rate limited ({message})")]
    RateLimited {
        /// Delay requested via `Retry-After`, in milliseconds.
        retry_after_ms: Option<u64>,
        /// Error description.
        message: String,
    },

    /// A single message could not be decoded.
    #[error("parse error: {message}")]
    Parse {
        /// Error description.
        message: String,
    },

    /// Reconnection gave up after the configured number of attempts.
    #[error("retries exhausted after {attempts} attempts")]
    RetryExhausted {
        /// Failed attempts made.
        attempts: u32,
    },
}

impl StreamError {
    /// Shorthand for a transport failure with no status.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            status: None,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status into the taxonomy.
    ///
    /// 4xx other than 429 is terminal, 429 is rate limiting, everything else
    /// is a retryable transport failure.
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited {
                retry_after_ms,
                message,
            },
            400..=499 => Self::Client { status, message },
            _ => Self::Transport {
                status: Some(status),
                message,
            },
        }
    }

    /// Whether reconnecting may help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::RateLimited { .. })
    }

    /// Server-requested delay in milliseconds, if any.
    #[must_use]
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    /// Category string for structured logging.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Client { .. } => "client",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Transport { .. } => "transport",
            Self::RateLimited { .. } => "rate_limit",
            Self::Parse { .. } => "parse",
            Self::RetryExhausted { .. } => "retry_exhausted",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
