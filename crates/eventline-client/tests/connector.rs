//! Connector behaviour against a scripted in-memory transport.
//!
//! Every test runs on a paused clock, so backoff delays are observed exactly.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;
use tracing::Level;

use eventline_client::{
    ByteStream, ConnectivityNotifier, ConnectivitySignal, ConnectorConfig, StreamConnector,
    Transport, TransportRequest,
};
use eventline_core::logging::capture_logs;
use eventline_core::{ConnectionState, ReconnectPolicy, StreamError, StreamEvent};

const URL: &str = "http://stream.test/events";

// ─────────────────────────────────────────────────────────────────────────────
// Scripted transport
// ─────────────────────────────────────────────────────────────────────────────

enum Step {
    /// `open` fails with this error.
    Reject(StreamError),
    /// `open` succeeds and yields these chunks, then `then`.
    Body(Vec<&'static str>, Then),
    /// `open` never resolves, like a connect to an unreachable host.
    Stall,
}

enum Then {
    Eof,
    Hang,
    Fail(StreamError),
}

/// Plays back one [`Step`] per `open`; once the script runs out every
/// connection hangs without data.
struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    opens: Mutex<Vec<(Instant, TransportRequest)>>,
}

impl ScriptedTransport {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            opens: Mutex::new(Vec::new()),
        })
    }

    fn open_count(&self) -> usize {
        self.opens.lock().len()
    }

    fn open_times(&self) -> Vec<Instant> {
        self.opens.lock().iter().map(|(at, _)| *at).collect()
    }

    fn request(&self, index: usize) -> TransportRequest {
        self.opens.lock()[index].1.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, request: TransportRequest) -> Result<ByteStream, StreamError> {
        self.opens.lock().push((Instant::now(), request));
        let step = self.steps.lock().pop_front();
        match step {
            None => Ok(Box::pin(stream::pending::<Result<Bytes, StreamError>>())),
            Some(Step::Reject(err)) => Err(err),
            Some(Step::Stall) => std::future::pending().await,
            Some(Step::Body(chunks, then)) => {
                let head = stream::iter(
                    chunks
                        .into_iter()
                        .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes()))),
                );
                let body: ByteStream = match then {
                    Then::Eof => Box::pin(head),
                    Then::Hang => Box::pin(futures::StreamExt::chain(head, stream::pending())),
                    Then::Fail(err) => Box::pin(futures::StreamExt::chain(
                        head,
                        stream::once(async move { Err(err) }),
                    )),
                };
                Ok(body)
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn no_jitter() -> ReconnectPolicy {
    ReconnectPolicy {
        jitter_factor: 0.0,
        ..ReconnectPolicy::default()
    }
}

fn config() -> ConnectorConfig {
    ConnectorConfig::new(URL).with_reconnect(no_jitter())
}

fn unavailable() -> StreamError {
    StreamError::from_status(503, "service unavailable", None)
}

fn connector(config: ConnectorConfig, transport: &Arc<ScriptedTransport>) -> StreamConnector {
    StreamConnector::with_transport(config, Arc::clone(transport) as Arc<dyn Transport>)
}

/// Poll in small steps of virtual time until `done` holds.
async fn until(mut done: impl FnMut() -> bool) {
    for _ in 0..100_000 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&StreamEvent) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&count);
    (count, move |_: &StreamEvent| {
        let _ = handle.fetch_add(1, Ordering::SeqCst);
    })
}

fn collect_errors(connector: &StreamConnector) -> Arc<Mutex<Vec<StreamError>>> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let _ = connector.on_error(move |err| sink.lock().push(err.clone()));
    errors
}

fn panicking_handler(_: &StreamEvent) {
    panic!("handler failure");
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn dispatches_to_typed_and_wildcard_listeners() {
    let transport = ScriptedTransport::new(vec![Step::Body(
        vec![
            "event: update\nid: 1\ndata: {\"n\":1}\n\n",
            "data: {\"n\":2}\n\n",
        ],
        Then::Hang,
    )]);
    let connector = connector(config(), &transport);
    let (updates, on_update) = counter();
    let (messages, on_message) = counter();
    let (all, on_all) = counter();
    let _ = connector.on("update", on_update);
    let _ = connector.on("message", on_message);
    let _ = connector.on("*", on_all);

    connector.connect();
    until(|| all.load(Ordering::SeqCst) == 2).await;

    assert_eq!(updates.load(Ordering::SeqCst), 1);
    assert_eq!(messages.load(Ordering::SeqCst), 1);
    assert_eq!(connector.state(), ConnectionState::Open);
    assert_eq!(connector.last_event_id().as_deref(), Some("1"));
}

#[tokio::test(start_paused = true)]
async fn event_carries_payload_and_correlation_id() {
    let transport = ScriptedTransport::new(vec![Step::Body(
        vec!["event: job\nid: j1\ndata: {\"correlationId\":\"abc\",\"ok\":true}\n\n"],
        Then::Hang,
    )]);
    let connector = connector(config(), &transport);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _ = connector.on("job", move |event: &StreamEvent| sink.lock().push(event.clone()));

    connector.connect();
    until(|| !seen.lock().is_empty()).await;

    let event = seen.lock()[0].clone();
    assert_eq!(event.event_type, "job");
    assert_eq!(event.correlation_id, "abc");
    assert_eq!(event.id.as_deref(), Some("j1"));
    assert_eq!(event.data, json!({"correlationId": "abc", "ok": true}));
}

#[tokio::test(start_paused = true)]
async fn duplicate_ids_are_delivered_once_across_reconnects() {
    let transport = ScriptedTransport::new(vec![
        Step::Body(
            vec!["id: e1\ndata: {}\n\n", "id: e1\ndata: {}\n\n"],
            Then::Fail(StreamError::transport("connection reset")),
        ),
        Step::Body(
            vec!["id: e1\ndata: {}\n\n", "id: e2\ndata: {}\n\n"],
            Then::Hang,
        ),
    ]);
    let connector = connector(config(), &transport);
    let (count, on_any) = counter();
    let _ = connector.on("*", on_any);
    let errors = collect_errors(&connector);

    connector.connect();
    until(|| transport.open_count() == 2 && connector.buffered_events().len() == 2).await;

    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(transport.request(0).last_event_id, None);
    assert_eq!(transport.request(1).last_event_id.as_deref(), Some("e1"));
    let ids: Vec<String> = connector
        .buffered_events()
        .into_iter()
        .map(|buffered| buffered.id)
        .collect();
    assert_eq!(ids, vec!["e1", "e2"]);
    assert_eq!(errors.lock().len(), 1);
    assert_matches!(errors.lock()[0], StreamError::Transport { .. });
}

#[tokio::test(start_paused = true)]
async fn malformed_payload_is_dropped_and_logged() {
    let (logs, _guard) = capture_logs();
    let transport = ScriptedTransport::new(vec![Step::Body(
        vec!["data: not json\n\n", "data: {\"ok\":true}\n\n"],
        Then::Hang,
    )]);
    let connector = connector(config(), &transport);
    let (count, on_any) = counter();
    let _ = connector.on("*", on_any);
    let errors = collect_errors(&connector);

    connector.connect();
    until(|| count.load(Ordering::SeqCst) == 1).await;

    assert!(logs.has_event(Level::WARN, "dropping malformed event"));
    assert!(errors.lock().is_empty());
    assert_eq!(connector.state(), ConnectionState::Open);
    assert_eq!(connector.buffered_events().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn panicking_handler_does_not_stop_dispatch() {
    let transport = ScriptedTransport::new(vec![Step::Body(
        vec!["data: {}\n\n", "data: {}\n\n"],
        Then::Hang,
    )]);
    let connector = connector(config(), &transport);
    let _ = connector.on("*", panicking_handler);
    let (count, on_any) = counter();
    let _ = connector.on("*", on_any);

    connector.connect();
    until(|| count.load(Ordering::SeqCst) == 2).await;
    assert!(connector.is_running());
}

#[tokio::test(start_paused = true)]
async fn unsubscribed_handler_is_not_called() {
    let transport = ScriptedTransport::new(vec![Step::Body(vec!["data: {}\n\n"], Then::Hang)]);
    let connector = connector(config(), &transport);
    let (removed, on_removed) = counter();
    let (kept, on_kept) = counter();
    let subscription = connector.on("message", on_removed);
    let _ = connector.on("message", on_kept);
    assert!(subscription.unsubscribe());

    connector.connect();
    until(|| kept.load(Ordering::SeqCst) == 1).await;
    assert_eq!(removed.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn buffer_keeps_most_recent_events() {
    let transport = ScriptedTransport::new(vec![Step::Body(
        vec![
            "id: a\ndata: {}\n\n",
            "id: b\ndata: {}\n\n",
            "id: c\ndata: {}\n\n",
        ],
        Then::Hang,
    )]);
    let connector = connector(config().with_max_buffer_size(2), &transport);
    connector.connect();
    until(|| connector.last_event_id().as_deref() == Some("c")).await;

    let ids: Vec<String> = connector
        .buffered_events()
        .into_iter()
        .map(|buffered| buffered.id)
        .collect();
    assert_eq!(ids, vec!["b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn sweep_expires_buffer_and_allows_redelivery() {
    let transport = ScriptedTransport::new(vec![
        Step::Body(vec!["id: e1\ndata: {}\n\n"], Then::Eof),
        Step::Body(vec!["id: e1\ndata: {}\n\n"], Then::Hang),
    ]);
    let policy = ReconnectPolicy {
        initial_delay_ms: 5_000,
        ..no_jitter()
    };
    let config = config()
        .with_reconnect(policy)
        .with_dedup_window(Duration::from_secs(2));
    let connector = connector(config, &transport);
    let (count, on_any) = counter();
    let _ = connector.on("*", on_any);

    connector.connect();
    until(|| count.load(Ordering::SeqCst) == 1).await;
    until(|| connector.buffered_events().is_empty()).await;
    until(|| count.load(Ordering::SeqCst) == 2).await;
    assert_eq!(transport.open_count(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn starts_closed_and_moves_to_connecting() {
    let transport = ScriptedTransport::new(vec![]);
    let connector = connector(config(), &transport);
    assert_eq!(connector.state(), ConnectionState::Closed);
    assert!(!connector.is_running());

    connector.connect();
    assert_eq!(connector.state(), ConnectionState::Connecting);
    assert!(connector.is_running());
}

#[tokio::test(start_paused = true)]
async fn connect_while_running_is_a_noop() {
    let transport = ScriptedTransport::new(vec![]);
    let connector = connector(config(), &transport);

    connector.connect();
    connector.connect();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(transport.open_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn state_changes_follow_the_lifecycle() {
    let transport = ScriptedTransport::new(vec![Step::Body(vec!["data: {}\n\n"], Then::Hang)]);
    let connector = connector(config(), &transport);
    let mut changes = connector.state_changes();
    assert_eq!(*changes.borrow_and_update(), ConnectionState::Closed);

    connector.connect();
    assert_eq!(*changes.borrow_and_update(), ConnectionState::Connecting);

    changes.changed().await.unwrap();
    assert_eq!(*changes.borrow_and_update(), ConnectionState::Open);

    connector.close();
    changes.changed().await.unwrap();
    assert_eq!(*changes.borrow_and_update(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn close_stops_streaming() {
    let transport = ScriptedTransport::new(vec![Step::Body(vec!["data: {}\n\n"], Then::Hang)]);
    let connector = connector(config(), &transport);
    let (count, on_any) = counter();
    let _ = connector.on("*", on_any);

    connector.connect();
    until(|| count.load(Ordering::SeqCst) == 1).await;
    connector.close();

    assert_eq!(connector.state(), ConnectionState::Closed);
    assert!(!connector.is_running());
    connector.terminated().await;
}

#[tokio::test(start_paused = true)]
async fn close_during_backoff_cancels_the_retry() {
    let transport = ScriptedTransport::new(vec![Step::Reject(unavailable())]);
    let connector = connector(config(), &transport);

    connector.connect();
    until(|| connector.retry_state().attempt == 1).await;
    assert_eq!(connector.state(), ConnectionState::Error);

    connector.close();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(transport.open_count(), 1);
    assert_eq!(connector.state(), ConnectionState::Closed);
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_close_starts_again() {
    let transport = ScriptedTransport::new(vec![]);
    let connector = connector(config(), &transport);

    connector.connect();
    until(|| transport.open_count() == 1).await;
    connector.close();
    connector.reconnect();

    until(|| transport.open_count() == 2).await;
    assert_eq!(connector.state(), ConnectionState::Connecting);
}

#[tokio::test(start_paused = true)]
async fn clean_end_without_auto_reconnect_closes() {
    let transport = ScriptedTransport::new(vec![Step::Body(vec!["data: {}\n\n"], Then::Eof)]);
    let connector = connector(config().with_auto_reconnect(false), &transport);
    let errors = collect_errors(&connector);

    connector.connect();
    connector.terminated().await;

    assert_eq!(connector.state(), ConnectionState::Closed);
    assert_eq!(transport.open_count(), 1);
    assert!(errors.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failure_without_auto_reconnect_settles_in_error() {
    let transport = ScriptedTransport::new(vec![Step::Reject(unavailable())]);
    let connector = connector(config().with_auto_reconnect(false), &transport);
    let errors = collect_errors(&connector);

    connector.connect();
    connector.terminated().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(connector.state(), ConnectionState::Error);
    assert_eq!(transport.open_count(), 1);
    assert_matches!(errors.lock().as_slice(), [StreamError::Transport { status: Some(503), .. }]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Failures and backoff
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn client_error_is_terminal() {
    let transport = ScriptedTransport::new(vec![Step::Reject(StreamError::from_status(
        404,
        "not found",
        None,
    ))]);
    let connector = connector(config(), &transport);
    let errors = collect_errors(&connector);

    connector.connect();
    connector.terminated().await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(connector.state(), ConnectionState::Error);
    assert_eq!(transport.open_count(), 1);
    assert_matches!(errors.lock().as_slice(), [StreamError::Client { status: 404, .. }]);
}

#[tokio::test(start_paused = true)]
async fn retries_with_exponential_backoff() {
    let transport = ScriptedTransport::new(vec![
        Step::Reject(unavailable()),
        Step::Reject(unavailable()),
        Step::Reject(unavailable()),
    ]);
    let connector = connector(config(), &transport);

    connector.connect();
    until(|| transport.open_count() == 4).await;

    let times = transport.open_times();
    let gaps: Vec<u128> = times
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).as_millis())
        .collect();
    assert_eq!(gaps.len(), 3);
    for (gap, expected) in gaps.iter().zip([1000_u128, 2000, 4000]) {
        assert!(
            *gap >= expected && *gap < expected + 50,
            "gap {gap} vs {expected}"
        );
    }
    assert_eq!(connector.retry_state().attempt, 3);
    assert_eq!(connector.retry_state().current_delay_ms, 4000);
}

#[tokio::test(start_paused = true)]
async fn successful_open_resets_attempts() {
    let transport = ScriptedTransport::new(vec![
        Step::Reject(unavailable()),
        Step::Reject(unavailable()),
        Step::Body(vec!["data: {}\n\n"], Then::Fail(unavailable())),
    ]);
    let connector = connector(config(), &transport);

    connector.connect();
    until(|| transport.open_count() == 4).await;

    let times = transport.open_times();
    let last_gap = (times[3] - times[2]).as_millis();
    assert!((1000..1050).contains(&last_gap), "gap {last_gap}");
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_retries() {
    let steps = (0..5).map(|_| Step::Reject(unavailable())).collect();
    let transport = ScriptedTransport::new(steps);
    let policy = ReconnectPolicy {
        max_retries: 2,
        ..no_jitter()
    };
    let connector = connector(config().with_reconnect(policy), &transport);
    let errors = collect_errors(&connector);

    connector.connect();
    connector.terminated().await;
    tokio::time::sleep(Duration::from_secs(300)).await;

    assert_eq!(connector.state(), ConnectionState::Closed);
    assert_eq!(transport.open_count(), 3);
    let errors = errors.lock();
    assert_eq!(errors.len(), 4);
    assert_matches!(errors[3], StreamError::RetryExhausted { attempts: 2 });
}

#[tokio::test(start_paused = true)]
async fn rate_limit_waits_for_retry_after() {
    let transport = ScriptedTransport::new(vec![Step::Reject(StreamError::from_status(
        429,
        "slow down",
        Some(7_000),
    ))]);
    let connector = connector(config(), &transport);

    connector.connect();
    until(|| transport.open_count() == 2).await;

    let times = transport.open_times();
    let gap = (times[1] - times[0]).as_millis();
    assert!((7000..7050).contains(&gap), "gap {gap}");
    assert_eq!(connector.retry_state().current_delay_ms, 7000);
}

#[tokio::test(start_paused = true)]
async fn server_retry_field_sets_initial_delay() {
    let transport = ScriptedTransport::new(vec![Step::Body(
        vec!["retry: 5000\n\n"],
        Then::Fail(StreamError::transport("connection reset")),
    )]);
    let connector = connector(config(), &transport);

    connector.connect();
    until(|| transport.open_count() == 2).await;

    let times = transport.open_times();
    let gap = (times[1] - times[0]).as_millis();
    assert!((5000..5050).contains(&gap), "gap {gap}");
}

#[tokio::test(start_paused = true)]
async fn connectivity_restored_skips_backoff() {
    let transport = ScriptedTransport::new(vec![Step::Reject(unavailable())]);
    let notifier = Arc::new(ConnectivityNotifier::new());
    let policy = ReconnectPolicy {
        initial_delay_ms: 20_000,
        ..no_jitter()
    };
    let connector = connector(config().with_reconnect(policy), &transport)
        .with_connectivity(Arc::clone(&notifier) as Arc<dyn ConnectivitySignal>);

    connector.connect();
    until(|| connector.retry_state().attempt == 1).await;
    let waiting_since = Instant::now();
    assert_eq!(notifier.notify_restored(), 1);
    until(|| transport.open_count() == 2).await;

    assert!(Instant::now() - waiting_since < Duration::from_secs(1));
    assert_eq!(connector.retry_state().attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn connectivity_restored_abandons_stalled_open() {
    let transport = ScriptedTransport::new(vec![Step::Stall]);
    let notifier = Arc::new(ConnectivityNotifier::new());
    let connector = connector(config(), &transport)
        .with_connectivity(Arc::clone(&notifier) as Arc<dyn ConnectivitySignal>);

    connector.connect();
    until(|| transport.open_count() == 1).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(transport.open_count(), 1);

    let signalled_at = Instant::now();
    assert_eq!(notifier.notify_restored(), 1);
    until(|| transport.open_count() == 2).await;

    assert!(Instant::now() - signalled_at < Duration::from_secs(1));
    assert_eq!(connector.state(), ConnectionState::Connecting);
    assert_eq!(connector.retry_state().attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn reconnect_abandons_stalled_open() {
    let transport = ScriptedTransport::new(vec![Step::Stall]);
    let connector = connector(config(), &transport);

    connector.connect();
    until(|| transport.open_count() == 1).await;
    connector.reconnect();
    until(|| transport.open_count() == 2).await;
    assert!(connector.is_running());
}

#[tokio::test(start_paused = true)]
async fn connectivity_signal_ignored_on_live_stream() {
    let transport = ScriptedTransport::new(vec![Step::Body(vec!["data: {}\n\n"], Then::Hang)]);
    let notifier = Arc::new(ConnectivityNotifier::new());
    let connector = connector(config(), &transport)
        .with_connectivity(Arc::clone(&notifier) as Arc<dyn ConnectivitySignal>);

    connector.connect();
    until(|| connector.state() == ConnectionState::Open).await;
    let _ = notifier.notify_restored();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(transport.open_count(), 1);
    assert_eq!(connector.state(), ConnectionState::Open);
}

#[tokio::test(start_paused = true)]
async fn reconnect_skips_backoff_while_waiting() {
    let transport = ScriptedTransport::new(vec![Step::Reject(unavailable())]);
    let policy = ReconnectPolicy {
        initial_delay_ms: 20_000,
        ..no_jitter()
    };
    let connector = connector(config().with_reconnect(policy), &transport);

    connector.connect();
    until(|| connector.retry_state().attempt == 1).await;
    let waiting_since = Instant::now();
    connector.reconnect();
    until(|| transport.open_count() == 2).await;

    assert!(Instant::now() - waiting_since < Duration::from_secs(1));
    assert_eq!(connector.retry_state().attempt, 0);
}

#[tokio::test(start_paused = true)]
async fn configured_headers_reach_the_transport() {
    let transport = ScriptedTransport::new(vec![]);
    let connector = connector(
        config().with_header("Authorization", "Bearer t0k"),
        &transport,
    );

    connector.connect();
    until(|| transport.open_count() == 1).await;

    let request = transport.request(0);
    assert_eq!(request.url, URL);
    assert_eq!(
        request.headers,
        vec![("Authorization".to_owned(), "Bearer t0k".to_owned())]
    );
}
