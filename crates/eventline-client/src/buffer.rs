//! Deduplication and recent-event buffering.
//!
//! Seen ids and buffered events are retained independently: an id stays in
//! the seen set for the full dedup window even after its event has been
//! pushed out of a full buffer.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use eventline_core::StreamEvent;
use tokio::time::Instant;

/// An accepted event with its receive time.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferedEvent {
    /// Event id, or correlation id when the event had none.
    pub id: String,
    /// The dispatched event.
    pub event: StreamEvent,
    /// Monotonic receive time.
    pub received_at: Instant,
}

/// Bounded, time-windowed store of recent events and seen ids.
#[derive(Debug)]
pub struct EventBuffer {
    window: Duration,
    max_size: usize,
    events: VecDeque<BufferedEvent>,
    seen: HashMap<String, Instant>,
}

impl EventBuffer {
    /// Create a buffer retaining up to `max_size` events for `window`.
    pub fn new(window: Duration, max_size: usize) -> Self {
        Self {
            window,
            max_size: max_size.max(1),
            events: VecDeque::with_capacity(max_size.clamp(1, 1024)),
            seen: HashMap::new(),
        }
    }

    /// Whether `id` was accepted within the window ending at `now`.
    pub fn is_duplicate(&self, id: &str, now: Instant) -> bool {
        self.seen
            .get(id)
            .is_some_and(|seen_at| now.saturating_duration_since(*seen_at) < self.window)
    }

    /// Record an accepted event, evicting the oldest on overflow.
    pub fn record(&mut self, event: StreamEvent, now: Instant) {
        if let Some(ref id) = event.id {
            let _ = self.seen.insert(id.clone(), now);
        }
        self.events.push_back(BufferedEvent {
            id: event.buffer_key().to_owned(),
            event,
            received_at: now,
        });
        while self.events.len() > self.max_size {
            let _ = self.events.pop_front();
        }
    }

    /// Drop seen ids and events older than the window. Returns how many
    /// entries were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let window = self.window;
        let before = self.seen.len() + self.events.len();
        self.seen
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) < window);
        while self
            .events
            .front()
            .is_some_and(|e| now.saturating_duration_since(e.received_at) >= window)
        {
            let _ = self.events.pop_front();
        }
        before - (self.seen.len() + self.events.len())
    }

    /// Copy of the buffered events, oldest first.
    pub fn snapshot(&self) -> Vec<BufferedEvent> {
        self.events.iter().cloned().collect()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn seen_len(&self) -> usize {
        self.seen.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
