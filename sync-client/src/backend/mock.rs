//! Mock backend for testing.
//!
//! Records calls, allows scripting failures, and can hold a response until
//! the test releases it (to resolve async operations out of order).

use super::{BackendError, BackendEvent, SyncBackend, EVENT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use inkwell_sync_core::{PairingCode, PairingError, PairingTicket, ProjectKey};
use inkwell_sync_types::{ConnectionStatus, DeviceId, DeviceInfo, ProjectId};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, oneshot};

/// Mock backend for testing.
#[derive(Debug, Clone)]
pub struct MockBackend {
    inner: Arc<Mutex<MockBackendInner>>,
    events: broadcast::Sender<BackendEvent>,
}

#[derive(Debug, Default)]
struct MockBackendInner {
    connected: bool,
    connected_url: Option<String>,
    connect_calls: usize,
    disconnect_calls: usize,
    reported_status: Option<ConnectionStatus>,
    enabled: Vec<(ProjectId, String)>,
    sent_updates: Vec<(ProjectId, Vec<u8>)>,
    devices: Vec<DeviceInfo>,
    identity: Option<DeviceInfo>,
    redeemed_codes: Vec<String>,
    fail_next_connect: Option<BackendError>,
    fail_next_send: Option<BackendError>,
    fail_next_pairing: Option<BackendError>,
    held_connect: Option<oneshot::Receiver<Result<(), BackendError>>>,
    held_status: Option<oneshot::Receiver<Result<ConnectionStatus, BackendError>>>,
    held_pairing: Option<oneshot::Receiver<Result<PairingCode, BackendError>>>,
    held_complete: Option<oneshot::Receiver<Result<DeviceInfo, BackendError>>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a new mock backend.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(MockBackendInner::default())),
            events,
        }
    }

    /// Push an event to subscribers.
    pub fn emit(&self, event: BackendEvent) {
        let _ = self.events.send(event);
    }

    /// Whether `connect()` last succeeded without a later `disconnect()`.
    pub fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    /// The URL passed to the last successful `connect()`.
    pub fn connected_url(&self) -> Option<String> {
        self.inner.lock().unwrap().connected_url.clone()
    }

    /// Number of `connect()` calls.
    pub fn connect_calls(&self) -> usize {
        self.inner.lock().unwrap().connect_calls
    }

    /// Number of `disconnect()` calls.
    pub fn disconnect_calls(&self) -> usize {
        self.inner.lock().unwrap().disconnect_calls
    }

    /// Make `status()` return `status` instead of the connected flag.
    pub fn set_reported_status(&self, status: ConnectionStatus) {
        self.inner.lock().unwrap().reported_status = Some(status);
    }

    /// Projects enabled so far with the fingerprint of their latest key.
    pub fn enabled_projects(&self) -> Vec<(ProjectId, String)> {
        self.inner.lock().unwrap().enabled.clone()
    }

    /// All deltas sent, in order.
    pub fn sent_updates(&self) -> Vec<(ProjectId, Vec<u8>)> {
        self.inner.lock().unwrap().sent_updates.clone()
    }

    /// Replace the paired-device list.
    pub fn set_devices(&self, devices: Vec<DeviceInfo>) {
        self.inner.lock().unwrap().devices = devices;
    }

    /// The device this backend speaks for. `complete_pairing()` returns it,
    /// as the service reports the redeeming device.
    pub fn set_identity(&self, identity: DeviceInfo) {
        self.inner.lock().unwrap().identity = Some(identity);
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: BackendError) {
        self.inner.lock().unwrap().fail_next_connect = Some(error);
    }

    /// Cause the next send_update() to fail with the given error.
    pub fn fail_next_send(&self, error: BackendError) {
        self.inner.lock().unwrap().fail_next_send = Some(error);
    }

    /// Cause the next pairing call (generate or complete) to fail.
    pub fn fail_next_pairing(&self, error: BackendError) {
        self.inner.lock().unwrap().fail_next_pairing = Some(error);
    }

    /// Hold the next connect() until the returned sender resolves it.
    pub fn hold_next_connect(&self) -> oneshot::Sender<Result<(), BackendError>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().held_connect = Some(rx);
        tx
    }

    /// Hold the next status() until the returned sender resolves it.
    pub fn hold_next_status(&self) -> oneshot::Sender<Result<ConnectionStatus, BackendError>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().held_status = Some(rx);
        tx
    }

    /// Hold the next generate_pairing_code() until released.
    pub fn hold_next_pairing_code(&self) -> oneshot::Sender<Result<PairingCode, BackendError>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().held_pairing = Some(rx);
        tx
    }

    /// Hold the next complete_pairing() until released.
    pub fn hold_next_complete(&self) -> oneshot::Sender<Result<DeviceInfo, BackendError>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().unwrap().held_complete = Some(rx);
        tx
    }

    /// Clear all state (calls, scripts, connection).
    pub fn reset(&self) {
        *self.inner.lock().unwrap() = MockBackendInner::default();
    }
}

fn dropped() -> BackendError {
    BackendError::ConnectionFailed("held response dropped".into())
}

#[async_trait]
impl SyncBackend for MockBackend {
    async fn connect(
        &self,
        server_url: &str,
        _token: &str,
        _device_id: &DeviceId,
    ) -> Result<(), BackendError> {
        let held = {
            let mut inner = self.inner.lock().unwrap();
            inner.connect_calls += 1;

            if let Some(error) = inner.fail_next_connect.take() {
                return Err(error);
            }
            inner.held_connect.take()
        };

        let result = match held {
            Some(rx) => rx.await.unwrap_or_else(|_| Err(dropped())),
            None => Ok(()),
        };

        if result.is_ok() {
            let mut inner = self.inner.lock().unwrap();
            inner.connected = true;
            inner.connected_url = Some(server_url.to_string());
        }
        result
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnect_calls += 1;
        inner.connected = false;
        Ok(())
    }

    async fn status(&self) -> Result<ConnectionStatus, BackendError> {
        let (held, current) = {
            let mut inner = self.inner.lock().unwrap();
            let current = inner.reported_status.clone().unwrap_or(if inner.connected {
                ConnectionStatus::Connected
            } else {
                ConnectionStatus::Disconnected
            });
            (inner.held_status.take(), current)
        };

        match held {
            Some(rx) => rx.await.unwrap_or_else(|_| Err(dropped())),
            None => Ok(current),
        }
    }

    async fn enable_project_sync(
        &self,
        project_id: &ProjectId,
        key: &ProjectKey,
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.enabled.retain(|(id, _)| id != project_id);
        inner.enabled.push((project_id.clone(), key.fingerprint()));
        Ok(())
    }

    async fn disable_project_sync(&self, project_id: &ProjectId) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.enabled.retain(|(id, _)| id != project_id);
        Ok(())
    }

    async fn send_update(
        &self,
        project_id: &ProjectId,
        payload: &[u8],
    ) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.connected {
            return Err(BackendError::NotConnected);
        }
        if let Some(error) = inner.fail_next_send.take() {
            return Err(error);
        }

        inner
            .sent_updates
            .push((project_id.clone(), payload.to_vec()));
        Ok(())
    }

    async fn generate_pairing_code(&self, server_url: &str) -> Result<PairingCode, BackendError> {
        let held = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(error) = inner.fail_next_pairing.take() {
                return Err(error);
            }
            inner.held_pairing.take()
        };

        match held {
            Some(rx) => rx.await.unwrap_or_else(|_| Err(dropped())),
            None => Ok(PairingTicket::mint(server_url).to_code()),
        }
    }

    async fn complete_pairing(&self, code: &str) -> Result<DeviceInfo, BackendError> {
        let held = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(error) = inner.fail_next_pairing.take() {
                return Err(error);
            }
            inner.held_complete.take()
        };

        if let Some(rx) = held {
            return rx.await.unwrap_or_else(|_| Err(dropped()));
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.redeemed_codes.iter().any(|c| c == code) {
            return Err(PairingError::AlreadyUsed.into());
        }
        let identity = inner
            .identity
            .clone()
            .ok_or_else(|| BackendError::Protocol("mock has no device identity".into()))?;
        inner.redeemed_codes.push(code.to_string());
        if !inner.devices.iter().any(|d| d.device_id == identity.device_id) {
            inner.devices.push(identity.clone());
        }
        Ok(identity)
    }

    async fn list_paired_devices(&self) -> Result<Vec<DeviceInfo>, BackendError> {
        Ok(self.inner.lock().unwrap().devices.clone())
    }

    async fn remove_device(&self, device_id: &DeviceId) -> Result<(), BackendError> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.devices.len();
        inner.devices.retain(|d| &d.device_id != device_id);
        if inner.devices.len() == before {
            return Err(BackendError::UnknownDevice(device_id.to_string()));
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }
}
