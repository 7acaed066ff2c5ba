//! Connectivity-restored signalling.
//!
//! The connector listens on a [`ConnectivitySignal`] while it is waiting to
//! retry; a notification skips the remaining backoff and resets the attempt
//! counter. Platform integrations (network-change hooks, OS reachability
//! APIs) bridge into a [`ConnectivityNotifier`].

use tokio::sync::broadcast;

/// Source of "connectivity restored" notifications.
pub trait ConnectivitySignal: Send + Sync {
    /// Subscribe to future notifications.
    fn subscribe(&self) -> broadcast::Receiver<()>;
}

/// In-process [`ConnectivitySignal`].
#[derive(Clone, Debug)]
pub struct ConnectivityNotifier {
    tx: broadcast::Sender<()>,
}

impl Default for ConnectivityNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityNotifier {
    /// Create a notifier with no subscribers.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Announce that connectivity is back. Returns the number of listeners
    /// that were notified.
    pub fn notify_restored(&self) -> usize {
        self.tx.send(()).unwrap_or(0)
    }
}

impl ConnectivitySignal for ConnectivityNotifier {
    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }
}

/// Wait for the next notification on `rx`.
///
/// Lagging counts as a notification; a closed channel never resolves.
pub(crate) async fn restored(rx: &mut broadcast::Receiver<()>) {
    loop {
        match rx.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Like [`restored`], but never resolves when there is no receiver.
pub(crate) async fn restored_or_pending(rx: Option<&mut broadcast::Receiver<()>>) {
    match rx {
        Some(rx) => restored(rx).await,
        None => std::future::pending().await,
    }
}
