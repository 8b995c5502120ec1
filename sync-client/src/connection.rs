//! Connection manager.
//!
//! Drives the pure [`ConnectionMachine`] from sync-core and performs the I/O
//! its actions ask for. Status is published on a `watch` channel; lifecycle
//! events go out on a `broadcast` channel.
//!
//! Staleness rules:
//! - `connect()` and `refresh_status()` capture a concurrent-safe token; if a
//!   `disconnect()` lands while they are in flight, their result is dropped.
//! - `disconnect()` resets the guard.
//! - Status events pushed by the backend are applied directly.

use std::sync::Arc;
use std::time::Duration;

use inkwell_sync_core::{Action, ConnectionMachine, Event, StaleGuard, SyncEvent};
use inkwell_sync_types::{ConnectionStatus, DeviceId};
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::backend::{BackendError, SyncBackend, EVENT_CHANNEL_CAPACITY};

/// Default timeout for a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the connection lifecycle for one device.
pub struct ConnectionManager<B: SyncBackend> {
    backend: Arc<B>,
    guard: StaleGuard,
    machine: Mutex<ConnectionMachine>,
    status_tx: watch::Sender<ConnectionStatus>,
    flush: Arc<Notify>,
    events: broadcast::Sender<SyncEvent>,
    connect_timeout: Duration,
}

impl<B: SyncBackend> ConnectionManager<B> {
    /// Create a manager in the `Disconnected` state.
    pub fn new(backend: Arc<B>, connect_timeout: Duration) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            backend,
            guard: StaleGuard::new(),
            machine: Mutex::new(ConnectionMachine::new()),
            status_tx,
            flush: Arc::new(Notify::new()),
            events,
            connect_timeout,
        }
    }

    /// Feed one event through the state machine and run its actions.
    ///
    /// Returns true if the machine asked for the backend to be disconnected.
    async fn apply(&self, event: Event) -> bool {
        let mut machine = self.machine.lock().await;
        let actions = machine.on_event(event);
        let status = machine.status().clone();
        drop(machine);

        self.status_tx.send_replace(status);

        let mut disconnect = false;
        for action in actions {
            match action {
                // The machine already moved to Connecting; the caller performs the I/O.
                Action::Connect => {}
                Action::Disconnect => disconnect = true,
                Action::FlushPending => self.flush.notify_one(),
                Action::Emit(event) => {
                    let _ = self.events.send(event);
                }
            }
        }
        disconnect
    }

    /// Connect to `server_url`.
    ///
    /// A failure leaves the status at `error(message)` and is returned. If the
    /// attempt is superseded by `disconnect()`, the late connection is torn
    /// down and `Ok(())` is returned without touching the status.
    pub async fn connect(
        &self,
        server_url: &str,
        token: &str,
        device_id: &DeviceId,
    ) -> Result<(), BackendError> {
        let stale = self.guard.snapshot();
        self.apply(Event::ConnectRequested).await;
        info!(server_url, device = %device_id, "connecting");

        let result = match tokio::time::timeout(
            self.connect_timeout,
            self.backend.connect(server_url, token, device_id),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout),
        };

        if self.guard.is_stale(stale) {
            debug!(server_url, "discarding superseded connect result");
            if result.is_ok() {
                if let Err(e) = self.backend.disconnect().await {
                    warn!(error = %e, "failed to tear down superseded connection");
                }
            }
            return Ok(());
        }

        match result {
            Ok(()) => {
                self.apply(Event::ConnectSucceeded).await;
                info!(server_url, "connected");
                Ok(())
            }
            Err(e) => {
                self.apply(Event::ConnectFailed {
                    error: e.to_string(),
                })
                .await;
                warn!(server_url, error = %e, "connect failed");
                Err(e)
            }
        }
    }

    /// Disconnect. Always ends `Disconnected` with no error.
    pub async fn disconnect(&self) {
        self.guard.reset();
        if self.apply(Event::DisconnectRequested).await {
            if let Err(e) = self.backend.disconnect().await {
                warn!(error = %e, "backend disconnect failed");
            }
            info!("disconnected");
        }
    }

    /// Ask the backend for its view of the connection and adopt it.
    pub async fn refresh_status(&self) -> Result<ConnectionStatus, BackendError> {
        let stale = self.guard.snapshot();
        let result = self.backend.status().await;

        if self.guard.is_stale(stale) {
            debug!(?result, "discarding superseded status poll");
            return Ok(self.status());
        }
        let reported = result?;
        self.apply(Event::StatusReported { status: reported }).await;
        Ok(self.status())
    }

    /// Apply a status pushed by the backend.
    pub async fn apply_status_event(&self, status: ConnectionStatus) {
        debug!(%status, "backend reported status");
        self.apply(Event::StatusReported { status }).await;
    }

    /// A send or receive failed on an established connection.
    pub async fn report_transport_failure(&self, error: &BackendError) {
        warn!(error = %error, "transport failure");
        self.apply(Event::TransportFailed {
            error: error.to_string(),
        })
        .await;
    }

    /// The transport noticed the connection dropped.
    pub async fn report_connection_lost(&self, reason: &str) {
        self.apply(Event::ConnectionLost {
            reason: reason.to_string(),
        })
        .await;
    }

    /// The transport is retrying after an error.
    pub async fn report_reconnecting(&self) {
        self.apply(Event::ReconnectStarted).await;
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        self.status_tx.borrow().clone()
    }

    /// Watch status changes.
    pub fn watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    /// Message of the current error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.status_tx.borrow().last_error().map(str::to_string)
    }

    /// True if currently connected.
    pub fn is_connected(&self) -> bool {
        self.status_tx.borrow().is_connected()
    }

    /// Notified whenever the connection (re)enters `Connected`.
    pub fn flush_signal(&self) -> Arc<Notify> {
        self.flush.clone()
    }

    /// Lifecycle events (connected, failed, disconnected).
    pub fn sync_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// The backend this manager drives.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;

    fn manager(backend: &MockBackend) -> ConnectionManager<MockBackend> {
        ConnectionManager::new(Arc::new(backend.clone()), DEFAULT_CONNECT_TIMEOUT)
    }

    #[tokio::test]
    async fn connect_success() {
        let backend = MockBackend::new();
        let conn = manager(&backend);
        let mut events = conn.sync_events();

        conn.connect("mem://relay", "token", &DeviceId::random())
            .await
            .unwrap();

        assert_eq!(conn.status(), ConnectionStatus::Connected);
        assert!(backend.is_connected());
        assert_eq!(events.recv().await.unwrap(), SyncEvent::Connected);
    }

    #[tokio::test]
    async fn connect_failure_then_retry_clears_error() {
        let backend = MockBackend::new();
        let conn = manager(&backend);
        backend.fail_next_connect(BackendError::Timeout);

        let result = conn.connect("mem://relay", "token", &DeviceId::random()).await;
        assert_eq!(result, Err(BackendError::Timeout));
        assert_eq!(conn.last_error().as_deref(), Some("connection timeout"));

        conn.connect("mem://relay", "token", &DeviceId::random())
            .await
            .unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Connected);
        assert_eq!(conn.last_error(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_connect_times_out() {
        let backend = MockBackend::new();
        let conn = ConnectionManager::new(Arc::new(backend.clone()), Duration::from_secs(1));
        let _held = backend.hold_next_connect();

        let result = conn.connect("mem://relay", "token", &DeviceId::random()).await;

        assert_eq!(result, Err(BackendError::Timeout));
        assert_eq!(
            conn.status(),
            ConnectionStatus::Error("connection timeout".into())
        );
    }

    #[tokio::test]
    async fn disconnect_mid_connect_wins() {
        let backend = MockBackend::new();
        let conn = Arc::new(manager(&backend));
        let release = backend.hold_next_connect();

        let task = {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.connect("mem://relay", "token", &DeviceId::random())
                    .await
            })
        };
        tokio::task::yield_now().await;
        assert_eq!(conn.status(), ConnectionStatus::Connecting);

        conn.disconnect().await;
        release.send(Ok(())).unwrap();
        task.await.unwrap().unwrap();

        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert!(!backend.is_connected());
    }

    #[tokio::test]
    async fn disconnect_clears_error() {
        let backend = MockBackend::new();
        let conn = manager(&backend);
        backend.fail_next_connect(BackendError::ConnectionFailed("refused".into()));
        let _ = conn.connect("mem://relay", "token", &DeviceId::random()).await;

        conn.disconnect().await;

        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
        assert_eq!(conn.last_error(), None);
    }

    #[tokio::test]
    async fn disconnect_when_idle_skips_backend() {
        let backend = MockBackend::new();
        let conn = manager(&backend);

        conn.disconnect().await;

        assert_eq!(backend.disconnect_calls(), 0);
    }

    #[tokio::test]
    async fn status_events_bypass_guard() {
        let backend = MockBackend::new();
        let conn = manager(&backend);
        conn.connect("mem://relay", "token", &DeviceId::random())
            .await
            .unwrap();

        conn.apply_status_event(ConnectionStatus::Reconnecting).await;
        assert_eq!(conn.status(), ConnectionStatus::Reconnecting);

        conn.apply_status_event(ConnectionStatus::Connected).await;
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn refresh_adopts_backend_status() {
        let backend = MockBackend::new();
        let conn = manager(&backend);
        backend.set_reported_status(ConnectionStatus::Connected);

        let status = conn.refresh_status().await.unwrap();

        assert_eq!(status, ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn stale_refresh_is_discarded() {
        let backend = MockBackend::new();
        let conn = Arc::new(manager(&backend));
        let release = backend.hold_next_status();

        let task = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.refresh_status().await })
        };
        tokio::task::yield_now().await;

        conn.disconnect().await;
        release.send(Ok(ConnectionStatus::Connected)).unwrap();

        assert_eq!(task.await.unwrap().unwrap(), ConnectionStatus::Disconnected);
        assert_eq!(conn.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn superseded_refresh_failure_is_not_an_error() {
        let backend = MockBackend::new();
        let conn = Arc::new(manager(&backend));
        let release = backend.hold_next_status();

        let task = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.refresh_status().await })
        };
        tokio::task::yield_now().await;

        conn.disconnect().await;
        release
            .send(Err(BackendError::ConnectionFailed("reset".into())))
            .unwrap();

        assert_eq!(task.await.unwrap().unwrap(), ConnectionStatus::Disconnected);
        assert_eq!(conn.last_error(), None);
    }

    #[tokio::test]
    async fn current_refresh_failure_is_returned() {
        let backend = MockBackend::new();
        let conn = manager(&backend);
        let release = backend.hold_next_status();
        release.send(Err(BackendError::Timeout)).unwrap();

        assert_eq!(conn.refresh_status().await, Err(BackendError::Timeout));
    }

    #[tokio::test]
    async fn transport_failure_sets_error() {
        let backend = MockBackend::new();
        let conn = manager(&backend);
        conn.connect("mem://relay", "token", &DeviceId::random())
            .await
            .unwrap();

        conn.report_transport_failure(&BackendError::SendFailed("broken pipe".into()))
            .await;

        assert_eq!(
            conn.last_error().as_deref(),
            Some("send failed: broken pipe")
        );
    }

    #[tokio::test]
    async fn reentering_connected_signals_flush() {
        let backend = MockBackend::new();
        let conn = manager(&backend);
        let flush = conn.flush_signal();

        conn.connect("mem://relay", "token", &DeviceId::random())
            .await
            .unwrap();

        // notify_one stores a permit, so this completes immediately.
        flush.notified().await;
    }

    #[tokio::test]
    async fn lost_connection_recovers_through_reconnecting() {
        let backend = MockBackend::new();
        let conn = manager(&backend);
        conn.connect("mem://relay", "token", &DeviceId::random())
            .await
            .unwrap();
        let mut events = conn.sync_events();

        conn.report_connection_lost("network unreachable").await;
        assert_eq!(conn.status(), ConnectionStatus::Reconnecting);
        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::Disconnected {
                reason: "network unreachable".into()
            }
        );

        conn.report_transport_failure(&BackendError::Timeout).await;
        conn.report_reconnecting().await;
        assert_eq!(conn.status(), ConnectionStatus::Reconnecting);

        conn.apply_status_event(ConnectionStatus::Connected).await;
        assert!(conn.is_connected());
        conn.flush_signal().notified().await;
    }
}
