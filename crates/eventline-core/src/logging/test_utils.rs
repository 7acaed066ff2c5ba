//! In-memory log capture for tests.
//!
//! [`capture_logs`] routes every event emitted on the current thread into a
//! [`CapturedLogs`] handle so tests can assert on what the connector logged.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// One recorded event.
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    /// Severity.
    pub level: Level,
    /// Emitting module path.
    pub target: String,
    /// Rendered message.
    pub message: String,
    /// Structured fields, rendered as strings.
    pub fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    /// Rendered value of field `name`.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

impl Visit for CapturedEvent {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.store(field, value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        self.store(field, format!("{value:?}"));
    }
}

impl CapturedEvent {
    fn store(&mut self, field: &Field, rendered: String) {
        if field.name() == "message" {
            self.message = rendered;
        } else {
            let _ = self.fields.insert(field.name().to_owned(), rendered);
        }
    }
}

/// Handle onto the events captured so far.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    records: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturedLogs {
    /// Snapshot of every captured event, in emission order.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.records.lock().clone()
    }

    /// Whether an event at `level` has a message containing `needle`.
    pub fn has_event(&self, level: Level, needle: &str) -> bool {
        self.find(level, needle).is_some()
    }

    /// First event at `level` whose message contains `needle`.
    pub fn find(&self, level: Level, needle: &str) -> Option<CapturedEvent> {
        self.records
            .lock()
            .iter()
            .find(|record| record.level == level && record.message.contains(needle))
            .cloned()
    }

    /// How many events were emitted at `level`.
    pub fn count_at_level(&self, level: Level) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|record| record.level == level)
            .count()
    }
}

struct Recorder(CapturedLogs);

impl<S> Layer<S> for Recorder
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut record = CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_owned(),
            message: String::new(),
            fields: BTreeMap::new(),
        };
        event.record(&mut record);
        self.0.records.lock().push(record);
    }
}

/// Capture every event emitted on this thread until the guard drops.
///
/// Spawned tasks are only seen on a current-thread runtime.
pub fn capture_logs() -> (CapturedLogs, DefaultGuard) {
    let logs = CapturedLogs::default();
    let guard = tracing_subscriber::registry()
        .with(Recorder(logs.clone()))
        .with(LevelFilter::TRACE)
        .set_default();
    (logs, guard)
}
