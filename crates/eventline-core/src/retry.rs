//! Reconnection policy and backoff calculation.
//!
//! Portable, sync-only building blocks; the async driver that sleeps on
//! these delays lives in `eventline-client`.
//!
//! - [`ReconnectPolicy`]: backoff parameters and the attempt cap
//! - [`RetryState`]: per-connection attempt counter and last delay
//! - [`parse_retry_after_header`]: parse a `Retry-After` HTTP header

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default delay before the first retry, in milliseconds.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
/// Default upper bound for the backoff delay, in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default growth factor between attempts.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.3;
/// Default attempt cap; zero means unlimited.
pub const DEFAULT_MAX_RETRIES: u32 = 0;

/// Backoff parameters for reconnecting a stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
    /// Delay for attempt zero, in ms.
    pub initial_delay_ms: u64,
    /// Cap applied before jitter, in ms.
    pub max_delay_ms: u64,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter range as a fraction of the delay.
    pub jitter_factor: f64,
    /// Maximum retries before giving up (0 = unlimited).
    pub max_retries: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
            jitter_factor: DEFAULT_JITTER_FACTOR,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl ReconnectPolicy {
    /// Capped exponential delay before jitter:
    /// `min(initial * multiplier^attempt, max)`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let exponential = (self.initial_delay_ms as f64) * self.multiplier.powi(exponent);
        if !exponential.is_finite() || exponential >= self.max_delay_ms as f64 {
            return self.max_delay_ms;
        }
        exponential.max(0.0) as u64
    }

    /// Delay with jitter applied for a given `random` in `[0.0, 1.0)`.
    ///
    /// `delay + delay * jitter * (random - 0.5)`, floored and clamped to be
    /// non-negative, so the result stays within
    /// `[0, max_delay * (1 + jitter / 2)]`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_with_random_ms(&self, attempt: u32, random: f64) -> u64 {
        let base = self.base_delay_ms(attempt) as f64;
        let jittered = base + base * self.jitter_factor * (random - 0.5);
        jittered.floor().max(0.0) as u64
    }

    /// Jittered delay for `attempt` using the thread-local RNG.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_with_random_ms(attempt, rand::random::<f64>()))
    }

    /// Whether `attempt` retries have already been spent.
    #[must_use]
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_retries != 0 && attempt >= self.max_retries
    }

    /// Copy of this policy with a different initial delay (a server `retry:` hint).
    #[must_use]
    pub fn with_initial_delay_ms(&self, initial_delay_ms: u64) -> Self {
        Self {
            initial_delay_ms,
            ..self.clone()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry state
// ─────────────────────────────────────────────────────────────────────────────

/// Reconnection progress for one connector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    /// Retries scheduled since the last successful open.
    pub attempt: u32,
    /// Delay chosen for the most recent retry, in ms.
    pub current_delay_ms: u64,
}

impl RetryState {
    /// Forget all progress (on open or on a connectivity-restored signal).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry-After header parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Parse a `Retry-After` HTTP header value.
///
/// The value can be either:
/// - A number of seconds (e.g. `"120"`)
/// - An HTTP-date (e.g. `"Thu, 01 Dec 2025 16:00:00 GMT"`)
///
/// Returns the delay in milliseconds, or `None` if parsing fails.
#[must_use]
pub fn parse_retry_after_header(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
        let delay_ms = date.signed_duration_since(chrono::Utc::now()).num_milliseconds();
        return Some(u64::try_from(delay_ms).unwrap_or(0));
    }

    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
