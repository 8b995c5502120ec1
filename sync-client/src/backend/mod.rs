//! Sync service abstraction.
//!
//! This module provides a pluggable backend layer that abstracts the service
//! devices connect to (the bundled in-process relay, a mock for testing, or a
//! networked service implemented by the host application).
//!
//! # Design
//!
//! The backend trait is async and request/response oriented:
//! - `connect()` / `disconnect()` / `status()` manage the connection
//! - `enable_project_sync()` / `disable_project_sync()` register projects
//! - `send_update()` forwards an opaque CRDT delta to the project's peers
//! - pairing and device-list calls manage trusted devices
//!
//! Pushed events (status changes, inbound deltas) arrive through
//! [`SyncBackend::subscribe`].
//!
//! # Example
//!
//! ```ignore
//! let backend = MockBackend::new();
//! backend.connect("wss://sync.example", "token", &device_id).await?;
//! backend.send_update(&project_id, &delta).await?;
//! ```

mod memory;
mod mock;

pub use memory::{MemoryRelay, RelayBackend};
pub use mock::MockBackend;

use async_trait::async_trait;
use inkwell_sync_core::{PairingCode, PairingError, ProjectKey};
use inkwell_sync_types::{ConnectionStatus, DeviceId, DeviceInfo, ProjectId};
use thiserror::Error;
use tokio::sync::broadcast;

/// Capacity of backend event channels.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Backend errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Connection timeout.
    #[error("connection timeout")]
    Timeout,

    /// Pairing was rejected.
    #[error("pairing failed: {0}")]
    Pairing(#[from] PairingError),

    /// Device is not part of this account.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// Project sync was never enabled on this device.
    #[error("project sync not enabled: {0}")]
    ProjectNotEnabled(String),

    /// Malformed payload.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Events pushed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// Authoritative connection status.
    StatusChanged(ConnectionStatus),
    /// A peer's delta for a project.
    UpdateReceived {
        /// Source project.
        project_id: ProjectId,
        /// Opaque CRDT delta.
        payload: Vec<u8>,
    },
    /// The set of paired devices changed.
    DevicesChanged,
}

/// Backend trait for the sync service.
///
/// Implementations handle the underlying connection mechanism
/// (in-process relay, WebSocket, mock, etc).
#[async_trait]
pub trait SyncBackend: Send + Sync + 'static {
    /// Connect to the service at `server_url` as `device_id`.
    async fn connect(
        &self,
        server_url: &str,
        token: &str,
        device_id: &DeviceId,
    ) -> Result<(), BackendError>;

    /// Close the connection.
    async fn disconnect(&self) -> Result<(), BackendError>;

    /// The service's view of the connection.
    async fn status(&self) -> Result<ConnectionStatus, BackendError>;

    /// Start exchanging updates for a project, keyed with `key`.
    async fn enable_project_sync(
        &self,
        project_id: &ProjectId,
        key: &ProjectKey,
    ) -> Result<(), BackendError>;

    /// Stop exchanging updates for a project.
    async fn disable_project_sync(&self, project_id: &ProjectId) -> Result<(), BackendError>;

    /// Deliver a local delta to the project's peers.
    async fn send_update(&self, project_id: &ProjectId, payload: &[u8])
        -> Result<(), BackendError>;

    /// Mint a single-use pairing code.
    async fn generate_pairing_code(&self, server_url: &str) -> Result<PairingCode, BackendError>;

    /// Redeem a pairing code; returns the newly trusted device.
    async fn complete_pairing(&self, code: &str) -> Result<DeviceInfo, BackendError>;

    /// Devices trusted by this account.
    async fn list_paired_devices(&self) -> Result<Vec<DeviceInfo>, BackendError>;

    /// Revoke a trusted device.
    async fn remove_device(&self, device_id: &DeviceId) -> Result<(), BackendError>;

    /// Receive pushed events.
    fn subscribe(&self) -> broadcast::Receiver<BackendEvent>;
}
