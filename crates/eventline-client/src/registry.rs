//! Listener registry.
//!
//! Handlers are stored per event type, plus a wildcard list under
//! [`WILDCARD_EVENT_TYPE`]. Dispatch snapshots the matching handlers and
//! releases the lock before calling them, so a handler may subscribe or
//! unsubscribe from inside its own callback.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use eventline_core::{StreamError, StreamEvent, WILDCARD_EVENT_TYPE};
use parking_lot::RwLock;
use tracing::error;

/// Callback invoked for each dispatched event.
pub type EventHandler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

/// Callback invoked for each surfaced error.
pub type ErrorHandler = Arc<dyn Fn(&StreamError) + Send + Sync>;

/// Per-type and wildcard event handlers plus error handlers.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<String, Vec<(u64, EventHandler)>>>,
    error_handlers: RwLock<Vec<(u64, ErrorHandler)>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register `handler` for `event_type` (or `"*"` for every event).
    pub fn on(self: &Arc<Self>, event_type: impl Into<String>, handler: EventHandler) -> Subscription {
        let event_type = event_type.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .entry(event_type.clone())
            .or_default()
            .push((id, handler));
        Subscription {
            registry: Arc::downgrade(self),
            key: SubscriptionKey::Event { event_type, id },
        }
    }

    /// Register an error handler.
    pub fn on_error(self: &Arc<Self>, handler: ErrorHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.error_handlers.write().push((id, handler));
        Subscription {
            registry: Arc::downgrade(self),
            key: SubscriptionKey::Error { id },
        }
    }

    /// Invoke every handler for the event's type and every wildcard handler.
    ///
    /// A panicking handler is logged and skipped; the rest still run.
    /// Returns the number of handlers that completed normally.
    pub fn dispatch(&self, event: &StreamEvent) -> usize {
        let handlers: Vec<EventHandler> = {
            let listeners = self.listeners.read();
            let typed = if event.event_type == WILDCARD_EVENT_TYPE {
                None
            } else {
                listeners.get(&event.event_type)
            };
            typed
                .into_iter()
                .chain(listeners.get(WILDCARD_EVENT_TYPE))
                .flatten()
                .map(|(_, h)| Arc::clone(h))
                .collect()
        };

        handlers
            .iter()
            .filter(|handler| {
                let outcome = catch_unwind(AssertUnwindSafe(|| handler(event)));
                if outcome.is_err() {
                    error!(
                        event_type = %event.event_type,
                        correlation_id = %event.correlation_id,
                        "event handler panicked"
                    );
                }
                outcome.is_ok()
            })
            .count()
    }

    /// Invoke every error handler with `err`.
    pub fn dispatch_error(&self, err: &StreamError) -> usize {
        let handlers: Vec<ErrorHandler> = self
            .error_handlers
            .read()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        handlers
            .iter()
            .filter(|handler| {
                let outcome = catch_unwind(AssertUnwindSafe(|| handler(err)));
                if outcome.is_err() {
                    error!(category = err.category(), "error handler panicked");
                }
                outcome.is_ok()
            })
            .count()
    }

    #[cfg(test)]
    pub(crate) fn listener_count(&self, event_type: &str) -> usize {
        self.listeners.read().get(event_type).map_or(0, Vec::len)
    }

    fn remove(&self, key: &SubscriptionKey) -> bool {
        match key {
            SubscriptionKey::Event { event_type, id } => {
                let mut listeners = self.listeners.write();
                let Some(list) = listeners.get_mut(event_type) else {
                    return false;
                };
                let before = list.len();
                list.retain(|(existing, _)| existing != id);
                let removed = list.len() != before;
                if list.is_empty() {
                    let _ = listeners.remove(event_type);
                }
                removed
            }
            SubscriptionKey::Error { id } => {
                let mut handlers = self.error_handlers.write();
                let before = handlers.len();
                handlers.retain(|(existing, _)| existing != id);
                handlers.len() != before
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum SubscriptionKey {
    Event { event_type: String, id: u64 },
    Error { id: u64 },
}

/// Handle returned by registration. Dropping it keeps the handler
/// registered; call [`Subscription::unsubscribe`] to remove it.
#[derive(Clone, Debug)]
pub struct Subscription {
    registry: Weak<ListenerRegistry>,
    key: SubscriptionKey,
}

impl Subscription {
    /// Remove the handler. Returns `false` if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.remove(&self.key))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
