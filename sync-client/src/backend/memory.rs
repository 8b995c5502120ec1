//! In-process relay.
//!
//! [`MemoryRelay`] plays the sync service for several devices living in one
//! process (the CLI demo and integration tests). Each device talks to it
//! through its own [`RelayBackend`].
//!
//! Every delta crosses the relay as an encoded [`Message`], so the wire
//! payload shape is exercised end to end. Devices that are offline when a
//! delta is fanned out get it from their mailbox on the next connect.

use super::{BackendError, BackendEvent, SyncBackend, EVENT_CHANNEL_CAPACITY};
use async_trait::async_trait;
use inkwell_sync_core::{PairingCode, PairingError, PairingTicket, ProjectKey};
use inkwell_sync_types::{ConnectionStatus, DeviceId, DeviceInfo, Message, ProjectId, UpdateId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Account grouping trusted devices. New devices start in their own account.
type AccountId = DeviceId;

#[derive(Debug)]
struct DeviceEntry {
    name: String,
    account: AccountId,
    online: bool,
    events: broadcast::Sender<BackendEvent>,
    /// Projects enabled by this device, with the latest key fingerprint.
    projects: HashMap<ProjectId, String>,
    /// Encoded messages waiting for the device to come online.
    mailbox: Vec<Vec<u8>>,
}

#[derive(Debug)]
struct IssuedCode {
    ticket: PairingTicket,
    issuer: DeviceId,
    superseded: bool,
    consumed: bool,
}

#[derive(Debug, Default)]
struct RelayState {
    devices: HashMap<DeviceId, DeviceEntry>,
    codes: HashMap<String, IssuedCode>,
    fail_next_connect: Option<BackendError>,
}

impl RelayState {
    fn device(&self, id: &DeviceId) -> Result<&DeviceEntry, BackendError> {
        self.devices
            .get(id)
            .ok_or_else(|| BackendError::UnknownDevice(id.to_string()))
    }

    fn device_mut(&mut self, id: &DeviceId) -> Result<&mut DeviceEntry, BackendError> {
        self.devices
            .get_mut(id)
            .ok_or_else(|| BackendError::UnknownDevice(id.to_string()))
    }

    fn online(&self, id: &DeviceId) -> Result<&DeviceEntry, BackendError> {
        let entry = self.device(id)?;
        if !entry.online {
            return Err(BackendError::NotConnected);
        }
        Ok(entry)
    }

    fn account_members(&self, account: &AccountId) -> Vec<DeviceId> {
        self.devices
            .iter()
            .filter(|(_, d)| &d.account == account)
            .map(|(id, _)| *id)
            .collect()
    }

    fn notify_account(&self, account: &AccountId, event: BackendEvent) {
        for entry in self.devices.values() {
            if &entry.account == account && entry.online {
                let _ = entry.events.send(event.clone());
            }
        }
    }
}

/// Shared in-process relay. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new device and return its backend handle.
    pub fn register(&self, name: &str) -> RelayBackend {
        let device_id = DeviceId::random();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        self.lock().devices.insert(
            device_id,
            DeviceEntry {
                name: name.to_string(),
                account: device_id,
                online: false,
                events: events.clone(),
                projects: HashMap::new(),
                mailbox: Vec::new(),
            },
        );
        info!(device = %device_id, name, "relay registered device");

        RelayBackend {
            relay: self.clone(),
            device_id,
            events,
        }
    }

    /// Cause the next connect() from any device to fail with `error`.
    pub fn fail_next_connect(&self, error: BackendError) {
        self.lock().fail_next_connect = Some(error);
    }

    /// Simulate a network drop for `device_id`: it goes offline and is told
    /// the connection is being re-established.
    pub fn drop_connection(&self, device_id: &DeviceId) {
        let mut state = self.lock();
        if let Ok(entry) = state.device_mut(device_id) {
            entry.online = false;
            let _ = entry
                .events
                .send(BackendEvent::StatusChanged(ConnectionStatus::Reconnecting));
        }
    }

    /// Bring a dropped device back online and deliver its mailbox.
    pub fn restore_connection(&self, device_id: &DeviceId) {
        let mut state = self.lock();
        if let Ok(entry) = state.device_mut(device_id) {
            entry.online = true;
            let _ = entry
                .events
                .send(BackendEvent::StatusChanged(ConnectionStatus::Connected));
            deliver_mailbox(entry);
        }
    }

    /// Number of messages waiting for `device_id`.
    pub fn mailbox_len(&self, device_id: &DeviceId) -> usize {
        self.lock()
            .devices
            .get(device_id)
            .map_or(0, |d| d.mailbox.len())
    }

    /// Key fingerprint `device_id` registered for `project_id`.
    pub fn project_key_fingerprint(
        &self,
        device_id: &DeviceId,
        project_id: &ProjectId,
    ) -> Option<String> {
        self.lock()
            .devices
            .get(device_id)
            .and_then(|d| d.projects.get(project_id).cloned())
    }
}

fn deliver_mailbox(entry: &mut DeviceEntry) {
    for bytes in entry.mailbox.drain(..) {
        match Message::from_bytes(&bytes) {
            Ok(Message::UpdateReceived {
                project_id,
                payload,
            }) => {
                let _ = entry.events.send(BackendEvent::UpdateReceived {
                    project_id,
                    payload,
                });
            }
            Ok(other) => debug!(?other, "ignoring non-update mailbox message"),
            Err(e) => warn!(error = %e, "dropping undecodable mailbox message"),
        }
    }
}

/// One device's connection to a [`MemoryRelay`].
#[derive(Debug, Clone)]
pub struct RelayBackend {
    relay: MemoryRelay,
    device_id: DeviceId,
    events: broadcast::Sender<BackendEvent>,
}

impl RelayBackend {
    /// The device this backend acts for.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// The relay this backend talks to.
    pub fn relay(&self) -> &MemoryRelay {
        &self.relay
    }
}

#[async_trait]
impl SyncBackend for RelayBackend {
    async fn connect(
        &self,
        server_url: &str,
        token: &str,
        device_id: &DeviceId,
    ) -> Result<(), BackendError> {
        let mut state = self.relay.lock();

        if let Some(error) = state.fail_next_connect.take() {
            return Err(error);
        }
        if token.trim().is_empty() {
            return Err(BackendError::ConnectionFailed("missing credentials".into()));
        }
        if device_id != &self.device_id {
            return Err(BackendError::ConnectionFailed(format!(
                "device {} is not registered on this connection",
                device_id
            )));
        }

        let entry = state.device_mut(device_id)?;
        entry.online = true;
        deliver_mailbox(entry);
        info!(device = %device_id, server_url, "relay accepted connection");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        let mut state = self.relay.lock();
        state.device_mut(&self.device_id)?.online = false;
        Ok(())
    }

    async fn status(&self) -> Result<ConnectionStatus, BackendError> {
        let state = self.relay.lock();
        Ok(if state.device(&self.device_id)?.online {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        })
    }

    async fn enable_project_sync(
        &self,
        project_id: &ProjectId,
        key: &ProjectKey,
    ) -> Result<(), BackendError> {
        let mut state = self.relay.lock();
        let entry = state.device_mut(&self.device_id)?;
        entry.projects.insert(project_id.clone(), key.fingerprint());
        debug!(project = %project_id.as_str(), key = %key.fingerprint(), "project sync enabled");
        Ok(())
    }

    async fn disable_project_sync(&self, project_id: &ProjectId) -> Result<(), BackendError> {
        let mut state = self.relay.lock();
        state.device_mut(&self.device_id)?.projects.remove(project_id);
        Ok(())
    }

    async fn send_update(
        &self,
        project_id: &ProjectId,
        payload: &[u8],
    ) -> Result<(), BackendError> {
        let mut state = self.relay.lock();
        let sender = state.online(&self.device_id)?;
        if !sender.projects.contains_key(project_id) {
            return Err(BackendError::ProjectNotEnabled(project_id.as_str().to_string()));
        }
        let account = sender.account;

        let wire = Message::SendUpdate {
            project_id: project_id.clone(),
            update_id: UpdateId::new(),
            payload: payload.to_vec(),
        }
        .to_bytes()
        .map_err(|e| BackendError::Protocol(e.to_string()))?;

        let (project_id, payload) = match Message::from_bytes(&wire) {
            Ok(Message::SendUpdate {
                project_id,
                payload,
                ..
            }) => (project_id, payload),
            Ok(_) => return Err(BackendError::Protocol("expected SendUpdate".into())),
            Err(e) => return Err(BackendError::Protocol(e.to_string())),
        };
        let outbound = Message::UpdateReceived {
            project_id: project_id.clone(),
            payload,
        }
        .to_bytes()
        .map_err(|e| BackendError::Protocol(e.to_string()))?;

        let recipients: Vec<DeviceId> = state
            .account_members(&account)
            .into_iter()
            .filter(|id| id != &self.device_id)
            .collect();

        for id in recipients {
            let Ok(entry) = state.device_mut(&id) else {
                continue;
            };
            if !entry.projects.contains_key(&project_id) {
                continue;
            }
            entry.mailbox.push(outbound.clone());
            if entry.online {
                deliver_mailbox(entry);
            }
        }
        Ok(())
    }

    async fn generate_pairing_code(&self, server_url: &str) -> Result<PairingCode, BackendError> {
        let mut state = self.relay.lock();
        state.online(&self.device_id)?;

        // A new request expires this device's previous code.
        for issued in state.codes.values_mut() {
            if issued.issuer == self.device_id && !issued.consumed {
                issued.superseded = true;
            }
        }

        let ticket = PairingTicket::mint(server_url);
        let code = ticket.to_code();
        state.codes.insert(
            ticket.canonical.clone(),
            IssuedCode {
                ticket,
                issuer: self.device_id,
                superseded: false,
                consumed: false,
            },
        );
        Ok(code)
    }

    async fn complete_pairing(&self, code: &str) -> Result<DeviceInfo, BackendError> {
        PairingTicket::validate_canonical(code)?;

        let mut state = self.relay.lock();
        state.online(&self.device_id)?;

        let issued = state
            .codes
            .get_mut(code)
            .ok_or(PairingError::UnknownCode)?;
        if issued.consumed {
            return Err(PairingError::AlreadyUsed.into());
        }
        if issued.superseded || issued.ticket.is_expired() {
            return Err(PairingError::Expired.into());
        }
        if issued.issuer == self.device_id {
            return Err(BackendError::Protocol(
                "cannot redeem a code issued by this device".into(),
            ));
        }
        issued.consumed = true;
        let issuer = issued.issuer;

        let account = state.device(&issuer)?.account;
        let entry = state.device_mut(&self.device_id)?;
        entry.account = account;
        let info = DeviceInfo {
            device_id: self.device_id,
            name: entry.name.clone(),
        };

        state.notify_account(&account, BackendEvent::DevicesChanged);
        info!(device = %self.device_id, issuer = %issuer, "relay paired device");
        Ok(info)
    }

    async fn list_paired_devices(&self) -> Result<Vec<DeviceInfo>, BackendError> {
        let state = self.relay.lock();
        let account = state.device(&self.device_id)?.account;

        let mut devices: Vec<DeviceInfo> = state
            .devices
            .iter()
            .filter(|(_, d)| d.account == account)
            .map(|(id, d)| DeviceInfo {
                device_id: *id,
                name: d.name.clone(),
            })
            .collect();
        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    async fn remove_device(&self, device_id: &DeviceId) -> Result<(), BackendError> {
        let mut state = self.relay.lock();
        let account = state.device(&self.device_id)?.account;

        let target = state.device_mut(device_id)?;
        if target.account != account {
            return Err(BackendError::UnknownDevice(device_id.to_string()));
        }
        // The removed device is left alone in a fresh account.
        target.account = *device_id;

        // Remaining members refresh their device lists.
        state.notify_account(&account, BackendEvent::DevicesChanged);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }
}
