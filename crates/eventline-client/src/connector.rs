//! # Stream Connector
//!
//! Keeps a server-sent-events subscription alive.
//!
//! Each [`StreamConnector`] owns at most one background driver task. The
//! driver:
//! 1. Opens the transport, sending `Last-Event-ID` when an id has been seen
//! 2. Decodes frames, drops duplicate ids, buffers and dispatches events
//! 3. On failure, waits with exponential backoff and reconnects
//! 4. When connectivity is restored or [`reconnect`] is called, skips the
//!    backoff wait or abandons an open that has not produced a frame yet
//! 5. Sweeps expired ids and buffered events every dedup window
//!
//! [`close`] bumps the connector generation before cancelling the driver, so
//! a driver that is still unwinding can no longer change state or dispatch.
//!
//! [`reconnect`]: StreamConnector::reconnect
//! [`close`]: StreamConnector::close

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use eventline_core::events::DEFAULT_EVENT_TYPE;
use eventline_core::retry::RetryState;
use eventline_core::{ConnectionState, ReconnectPolicy, StreamError, StreamEvent};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::buffer::{BufferedEvent, EventBuffer};
use crate::config::{ConnectorConfig, MIN_DEDUP_WINDOW};
use crate::connectivity::{self, ConnectivityNotifier, ConnectivitySignal};
use crate::registry::{ListenerRegistry, Subscription};
use crate::sse::{SseDecoder, SseFrame};
use crate::transport::{ReqwestTransport, Transport, TransportRequest};

/// Longest payload excerpt included in parse warnings.
const DATA_PREVIEW_CHARS: usize = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Shared state
// ─────────────────────────────────────────────────────────────────────────────

struct Control {
    generation: u64,
    running: bool,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl Control {
    /// Invalidate the current driver and hand back what is needed to stop it.
    fn retire(&mut self) -> (Option<CancellationToken>, Option<JoinHandle<()>>) {
        self.generation += 1;
        self.running = false;
        (self.cancel.take(), self.task.take())
    }
}

struct Shared {
    control: Mutex<Control>,
    state_tx: watch::Sender<ConnectionState>,
    last_event_id: RwLock<Option<String>>,
    buffer: Mutex<EventBuffer>,
    retry: Mutex<RetryState>,
    auto_reconnect: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let mut previous = state;
        let changed = self.state_tx.send_if_modified(|current| {
            previous = *current;
            *current = state;
            previous != state
        });
        if changed {
            info!(from = %previous, to = %state, "connection state changed");
        }
    }

    /// Move to `state` if `generation` is still the live driver.
    fn transition(&self, generation: u64, state: ConnectionState) -> bool {
        let control = self.control.lock();
        if control.generation != generation || !control.running {
            return false;
        }
        self.set_state(state);
        true
    }

    /// Final transition of a driver; marks the connector idle.
    fn finish(&self, generation: u64, state: ConnectionState) {
        let mut control = self.control.lock();
        if control.generation != generation || !control.running {
            return;
        }
        control.running = false;
        self.set_state(state);
    }

    fn is_current(&self, generation: u64) -> bool {
        let control = self.control.lock();
        control.generation == generation && control.running
    }
}

fn stop(cancel: Option<CancellationToken>, task: Option<JoinHandle<()>>) {
    if let Some(cancel) = cancel {
        cancel.cancel();
    }
    if let Some(task) = task {
        task.abort();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// StreamConnector
// ─────────────────────────────────────────────────────────────────────────────

/// Resilient server-sent-events client.
pub struct StreamConnector {
    config: ConnectorConfig,
    transport: Arc<dyn Transport>,
    connectivity: Option<Arc<dyn ConnectivitySignal>>,
    kick: ConnectivityNotifier,
    registry: Arc<ListenerRegistry>,
    shared: Arc<Shared>,
}

impl StreamConnector {
    /// Create a connector using the `reqwest` transport.
    pub fn new(config: ConnectorConfig) -> Self {
        Self::with_transport(config, Arc::new(ReqwestTransport::new()))
    }

    /// Create a connector over a custom transport.
    pub fn with_transport(config: ConnectorConfig, transport: Arc<dyn Transport>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                generation: 0,
                running: false,
                cancel: None,
                task: None,
            }),
            state_tx,
            last_event_id: RwLock::new(None),
            buffer: Mutex::new(EventBuffer::new(config.dedup_window.max(MIN_DEDUP_WINDOW), config.max_buffer_size)),
            retry: Mutex::new(RetryState::default()),
            auto_reconnect: AtomicBool::new(config.auto_reconnect),
        });
        Self {
            config,
            transport,
            connectivity: None,
            kick: ConnectivityNotifier::new(),
            registry: ListenerRegistry::new(),
            shared,
        }
    }

    /// Listen to `signal` for connectivity-restored notifications.
    #[must_use]
    pub fn with_connectivity(mut self, signal: Arc<dyn ConnectivitySignal>) -> Self {
        self.connectivity = Some(signal);
        self
    }

    /// The configuration this connector was built with.
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Start streaming. No-op while a driver is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut control = self.shared.control.lock();
        if control.running {
            debug!(url = %self.config.url, "connect ignored, already running");
            return;
        }

        control.generation += 1;
        control.running = true;
        self.shared
            .auto_reconnect
            .store(self.config.auto_reconnect, Ordering::SeqCst);
        *self.shared.retry.lock() = RetryState::default();
        self.shared.set_state(ConnectionState::Connecting);

        let cancel = CancellationToken::new();
        let window = self.config.dedup_window.max(MIN_DEDUP_WINDOW);
        let mut sweep = tokio::time::interval_at(Instant::now() + window, window);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let driver = Driver {
            generation: control.generation,
            url: self.config.url.clone(),
            headers: self.config.headers.clone(),
            policy: self.config.reconnect.clone(),
            retry: RetryState::default(),
            transport: Arc::clone(&self.transport),
            registry: Arc::clone(&self.registry),
            shared: Arc::clone(&self.shared),
            kick_rx: self.kick.subscribe(),
            connectivity_rx: self.connectivity.as_ref().map(|signal| signal.subscribe()),
            sweep,
        };

        control.task = Some(tokio::spawn(driver.run(cancel.clone())));
        control.cancel = Some(cancel);
        info!(url = %self.config.url, "connector started");
    }

    /// Stop streaming: disable auto-reconnect, abort the transport, cancel
    /// pending timers and move to [`ConnectionState::Closed`].
    pub fn close(&self) {
        self.shared.auto_reconnect.store(false, Ordering::SeqCst);
        let (cancel, task) = {
            let mut control = self.shared.control.lock();
            let handles = control.retire();
            self.shared.set_state(ConnectionState::Closed);
            handles
        };
        stop(cancel, task);
        info!(url = %self.config.url, "connector closed");
    }

    /// Reconnect now with a fresh attempt counter.
    ///
    /// While waiting to retry the remaining backoff is skipped, and while
    /// connecting the pending open is abandoned and retried. When idle this
    /// is [`connect`](Self::connect). Has no effect once frames arrive.
    pub fn reconnect(&self) {
        if self.is_running() {
            let _ = self.kick.notify_restored();
        } else {
            self.connect();
        }
    }

    /// Register `handler` for `event_type`; `"*"` receives every event.
    pub fn on<F>(&self, event_type: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.registry.on(event_type, Arc::new(handler))
    }

    /// Register a handler for surfaced errors.
    pub fn on_error<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StreamError) + Send + Sync + 'static,
    {
        self.registry.on_error(Arc::new(handler))
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Receiver that observes every state change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Whether a driver task is live (streaming or waiting to retry).
    pub fn is_running(&self) -> bool {
        self.shared.control.lock().running
    }

    /// Resolve once no driver is running: after [`close`](Self::close), a
    /// terminal error, or exhausted retries.
    pub async fn terminated(&self) {
        let mut rx = self.shared.state_tx.subscribe();
        loop {
            if !self.is_running() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Most recent event id, sent as `Last-Event-ID` on the next connection.
    pub fn last_event_id(&self) -> Option<String> {
        self.shared.last_event_id.read().clone()
    }

    /// Recently accepted events, oldest first.
    pub fn buffered_events(&self) -> Vec<BufferedEvent> {
        self.shared.buffer.lock().snapshot()
    }

    /// Current reconnection progress.
    pub fn retry_state(&self) -> RetryState {
        *self.shared.retry.lock()
    }
}

impl Drop for StreamConnector {
    fn drop(&mut self) {
        let (cancel, task) = self.shared.control.lock().retire();
        stop(cancel, task);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver task
// ─────────────────────────────────────────────────────────────────────────────

enum StreamEnd {
    /// The server finished the response.
    Eof,
    /// Opening or reading the stream failed.
    Failed(StreamError),
    /// A reconnect was requested before the stream opened.
    Restored,
}

struct Driver {
    generation: u64,
    url: String,
    headers: Vec<(String, String)>,
    policy: ReconnectPolicy,
    retry: RetryState,
    transport: Arc<dyn Transport>,
    registry: Arc<ListenerRegistry>,
    shared: Arc<Shared>,
    kick_rx: broadcast::Receiver<()>,
    connectivity_rx: Option<broadcast::Receiver<()>>,
    sweep: Interval,
}

impl Driver {
    #[tracing::instrument(skip_all, name = "stream_connector", fields(url = %self.url))]
    async fn run(mut self, cancel: CancellationToken) {
        tokio::select! {
            () = cancel.cancelled() => debug!("driver cancelled"),
            () = self.drive() => debug!("driver finished"),
        }
    }

    async fn drive(&mut self) {
        loop {
            if !self.shared.transition(self.generation, ConnectionState::Connecting) {
                return;
            }

            let err = match self.stream_once().await {
                StreamEnd::Eof if !self.auto_reconnect() => {
                    info!("event stream ended");
                    self.shared.finish(self.generation, ConnectionState::Closed);
                    return;
                }
                StreamEnd::Eof => StreamError::transport("event stream ended"),
                StreamEnd::Failed(err) => err,
                StreamEnd::Restored => {
                    info!("reconnect requested while connecting, reopening now");
                    self.reset_retry();
                    continue;
                }
            };

            warn!(error = %err, category = err.category(), "event stream failed");
            if !err.is_retryable() || !self.auto_reconnect() {
                self.surface(&err);
                self.shared.finish(self.generation, ConnectionState::Error);
                return;
            }
            if !self.shared.transition(self.generation, ConnectionState::Error) {
                return;
            }
            self.surface(&err);

            if !self.wait_before_retry(err.retry_after_ms()).await {
                return;
            }
        }
    }

    fn auto_reconnect(&self) -> bool {
        self.shared.auto_reconnect.load(Ordering::SeqCst)
    }

    fn surface(&self, err: &StreamError) {
        if self.shared.is_current(self.generation) {
            let _ = self.registry.dispatch_error(err);
        }
    }

    async fn stream_once(&mut self) -> StreamEnd {
        let request = TransportRequest {
            url: self.url.clone(),
            headers: self.headers.clone(),
            last_event_id: self.shared.last_event_id.read().clone(),
        };
        debug!(last_event_id = ?request.last_event_id, "opening event stream");

        let transport = Arc::clone(&self.transport);
        let mut body = tokio::select! {
            result = transport.open(request) => match result {
                Ok(body) => body,
                Err(err) => return StreamEnd::Failed(err),
            },
            () = reconnect_requested(&mut self.kick_rx, self.connectivity_rx.as_mut()) => {
                return StreamEnd::Restored;
            }
        };

        let mut decoder = SseDecoder::new();
        let mut opened = false;
        loop {
            tokio::select! {
                chunk = body.next() => match chunk {
                    Some(Ok(bytes)) => {
                        for frame in decoder.push(&bytes) {
                            self.handle_frame(frame, &mut opened);
                        }
                    }
                    Some(Err(err)) => return StreamEnd::Failed(err),
                    None => {
                        if decoder.has_partial_frame() {
                            debug!("discarding partial frame at end of stream");
                        }
                        return StreamEnd::Eof;
                    }
                },
                () = reconnect_requested(&mut self.kick_rx, self.connectivity_rx.as_mut()) => {
                    if !opened {
                        return StreamEnd::Restored;
                    }
                    debug!("stream is live, ignoring reconnect request");
                }
                _ = self.sweep.tick() => self.sweep_buffer(),
            }
        }
    }

    fn handle_frame(&mut self, frame: SseFrame, opened: &mut bool) {
        if let Some(ms) = frame.retry_ms {
            debug!(retry_ms = ms, "server set reconnection delay");
            self.policy = self.policy.with_initial_delay_ms(ms);
        }
        if let Some(ref id) = frame.id {
            *self.shared.last_event_id.write() = (!id.is_empty()).then(|| id.clone());
        }
        if !*opened {
            *opened = true;
            self.retry.reset();
            *self.shared.retry.lock() = self.retry;
            if !self.shared.transition(self.generation, ConnectionState::Open) {
                return;
            }
        }

        let Some(data) = frame.data else {
            return;
        };
        let event_id = frame.id.filter(|id| !id.is_empty());
        let now = Instant::now();

        if let Some(ref id) = event_id {
            if self.shared.buffer.lock().is_duplicate(id, now) {
                debug!(event_id = %id, "dropping duplicate event");
                return;
            }
        }

        let payload: Value = match serde_json::from_str(&data) {
            Ok(payload) => payload,
            Err(e) => {
                let err = StreamError::Parse {
                    message: e.to_string(),
                };
                warn!(
                    error = %err,
                    event_type = frame.event.as_deref().unwrap_or(DEFAULT_EVENT_TYPE),
                    data_preview = %preview(&data),
                    "dropping malformed event"
                );
                return;
            }
        };

        let event = StreamEvent::new(frame.event.as_deref(), payload, event_id);
        self.shared.buffer.lock().record(event.clone(), now);

        if !self.shared.is_current(self.generation) {
            return;
        }
        let delivered = self.registry.dispatch(&event);
        debug!(
            event_type = %event.event_type,
            event_id = ?event.id,
            delivered,
            "dispatched event"
        );
    }

    /// Sleep out the backoff delay. Returns `false` when the driver must stop.
    async fn wait_before_retry(&mut self, retry_after_ms: Option<u64>) -> bool {
        if self.policy.is_exhausted(self.retry.attempt) {
            let err = StreamError::RetryExhausted {
                attempts: self.retry.attempt,
            };
            warn!(attempts = self.retry.attempt, "giving up on event stream");
            self.surface(&err);
            self.shared.finish(self.generation, ConnectionState::Closed);
            return false;
        }

        let mut delay = self.policy.next_delay(self.retry.attempt);
        if let Some(ms) = retry_after_ms {
            delay = delay.max(Duration::from_millis(ms));
        }
        self.retry.attempt += 1;
        self.retry.current_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        *self.shared.retry.lock() = self.retry;
        info!(
            attempt = self.retry.attempt,
            delay_ms = self.retry.current_delay_ms,
            "scheduling reconnect"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                () = reconnect_requested(&mut self.kick_rx, self.connectivity_rx.as_mut()) => {
                    info!("reconnect requested, skipping backoff");
                    self.reset_retry();
                    return true;
                }
                _ = self.sweep.tick() => self.sweep_buffer(),
            }
        }
    }

    fn reset_retry(&mut self) {
        self.retry.reset();
        *self.shared.retry.lock() = self.retry;
    }

    fn sweep_buffer(&self) {
        let removed = self.shared.buffer.lock().sweep(Instant::now());
        if removed > 0 {
            debug!(removed, "swept expired events");
        }
    }
}

/// Resolve on a `reconnect()` kick or a connectivity-restored signal.
async fn reconnect_requested(
    kick: &mut broadcast::Receiver<()>,
    connectivity: Option<&mut broadcast::Receiver<()>>,
) {
    tokio::select! {
        () = connectivity::restored(kick) => {}
        () = connectivity::restored_or_pending(connectivity) => {}
    }
}

fn preview(data: &str) -> String {
    data.chars().take(DATA_PREVIEW_CHARS).collect()
}
