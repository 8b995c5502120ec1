//! SyncEngine - the per-device entry point.
//!
//! The engine wires the pieces together:
//!
//! ```text
//! editor ─► DocumentAdapter ─► LoroDoc ─► TransportBridge ─► UpdateQueue ─► SyncBackend
//!                 ▲                ▲                                              │
//!                 └── container ◄──┴──────── import ◄──────── event pump ◄────────┘
//! ```
//!
//! Two background tasks run per engine:
//! - the **event pump** consumes backend push events (status, inbound deltas,
//!   device-list changes)
//! - the **outbound pump** drains the update queue whenever a delta is
//!   queued or the connection (re)enters `connected`
//!
//! # Example
//!
//! ```ignore
//! let relay = MemoryRelay::new();
//! let backend = relay.register("Laptop");
//! let engine = SyncEngine::start(EngineConfig::default(), backend.device_id(), backend);
//!
//! engine.connect("mem://relay", "token").await?;
//! engine.open_project(&project_id).await?;
//! engine.mount_document(&project_id, slug, Arc::new(editor)).await?;
//! engine.enable_project_sync(&project_id).await?;
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use inkwell_sync_core::{
    EditorSurface, PairingRole, ProjectKey, ProjectSyncRegistry, ProjectSyncState, QueuedUpdate,
    StaleGuard, SyncEvent, UpdateQueue,
};
use inkwell_sync_types::{ConnectionStatus, DeviceId, DeviceRecord, DocumentSlug, ProjectId};
use loro::LoroDoc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, BackendEvent, SyncBackend};
use crate::config::EngineConfig;
use crate::connection::ConnectionManager;
use crate::document::DocumentEvent;
use crate::error::ClientError;
use crate::pairing::PairingFlow;
use crate::session::ProjectSession;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Outbound state shared with the sessions' local-update callbacks.
struct Outbound {
    queue: Mutex<UpdateQueue>,
    registry: Mutex<ProjectSyncRegistry>,
    wake: Notify,
}

impl Outbound {
    fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(UpdateQueue::new(capacity)),
            registry: Mutex::new(ProjectSyncRegistry::new()),
            wake: Notify::new(),
        }
    }

    /// Queue a local delta if the project is synced.
    fn push(&self, project_id: &ProjectId, payload: Vec<u8>) {
        if !lock(&self.registry).is_enabled(project_id) {
            debug!(project = %project_id, "sync disabled; not queueing local update");
            return;
        }

        let pending = {
            let mut queue = lock(&self.queue);
            if let Err(e) = queue.enqueue(QueuedUpdate::new(project_id.clone(), payload)) {
                warn!(project = %project_id, error = %e, "dropping local update");
            }
            queue.count_for(project_id)
        };
        lock(&self.registry).set_pending(project_id, pending);
        self.wake.notify_one();
    }

    fn refresh_pending(&self, project_id: &ProjectId) {
        let pending = lock(&self.queue).count_for(project_id);
        lock(&self.registry).set_pending(project_id, pending);
    }
}

/// Per-device sync engine.
pub struct SyncEngine<B: SyncBackend> {
    config: EngineConfig,
    device_id: DeviceId,
    backend: Arc<B>,
    connection: ConnectionManager<B>,
    sessions: tokio::sync::Mutex<HashMap<ProjectId, ProjectSession>>,
    /// Documents of projects that are not open; inbound deltas still land here.
    detached: Mutex<HashMap<ProjectId, Arc<LoroDoc>>>,
    outbound: Arc<Outbound>,
    keys: Mutex<HashMap<ProjectId, ProjectKey>>,
    devices: Mutex<Vec<DeviceRecord>>,
    devices_guard: StaleGuard,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<B: SyncBackend> SyncEngine<B> {
    /// Create the engine for `device_id` and start its background tasks.
    ///
    /// Must be called within a tokio runtime.
    pub fn start(config: EngineConfig, device_id: DeviceId, backend: B) -> Arc<Self> {
        let backend = Arc::new(backend);
        let connection = ConnectionManager::new(backend.clone(), config.connect_timeout());
        let outbound = Arc::new(Outbound::new(config.sync.max_pending_updates));

        let engine = Arc::new(Self {
            config,
            device_id,
            backend,
            connection,
            sessions: tokio::sync::Mutex::new(HashMap::new()),
            detached: Mutex::new(HashMap::new()),
            outbound,
            keys: Mutex::new(HashMap::new()),
            devices: Mutex::new(Vec::new()),
            devices_guard: StaleGuard::new(),
            tasks: Mutex::new(Vec::new()),
        });

        let event_pump = spawn_event_pump(Arc::downgrade(&engine), engine.backend.subscribe());
        let outbound_pump = spawn_outbound_pump(
            Arc::downgrade(&engine),
            engine.outbound.clone(),
            engine.connection.flush_signal(),
        );
        lock(&engine.tasks).extend([event_pump, outbound_pump]);

        info!(device = %device_id, name = %engine.config.device.name, "sync engine started");
        engine
    }

    /// This device.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// Effective configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The backend this engine talks to.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    // --- connection -------------------------------------------------------

    /// Connect to the sync service.
    pub async fn connect(&self, server_url: &str, token: &str) -> Result<(), ClientError> {
        self.connection
            .connect(server_url, token, &self.device_id)
            .await?;
        Ok(())
    }

    /// Connect using the configured server URL and token.
    pub async fn connect_configured(&self) -> Result<(), ClientError> {
        let token = self.config.server.token.clone().unwrap_or_default();
        self.connect(&self.config.server.url, &token).await
    }

    /// Disconnect. Always ends `disconnected`.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await;
    }

    /// Poll the service for its view of the connection.
    pub async fn refresh_status(&self) -> Result<ConnectionStatus, ClientError> {
        Ok(self.connection.refresh_status().await?)
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Watch connection status changes.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.watch()
    }

    /// Message of the current connection error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.connection.last_error()
    }

    /// Connection lifecycle events.
    pub fn sync_events(&self) -> broadcast::Receiver<SyncEvent> {
        self.connection.sync_events()
    }

    // --- projects and documents --------------------------------------------

    /// Open a project session. Opening an open project is a no-op.
    pub async fn open_project(&self, project_id: &ProjectId) -> Result<(), ClientError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(project_id) {
            return Ok(());
        }

        let doc = lock(&self.detached)
            .remove(project_id)
            .unwrap_or_else(|| Arc::new(LoroDoc::new()));
        let outbound = self.outbound.clone();
        let id = project_id.clone();
        let session = ProjectSession::open(project_id.clone(), doc, move |bytes| {
            outbound.push(&id, bytes);
        });
        sessions.insert(project_id.clone(), session);
        Ok(())
    }

    /// Close a project session, flushing every mounted document.
    ///
    /// The document is kept so deltas arriving while closed are not lost.
    pub async fn close_project(&self, project_id: &ProjectId) -> Result<(), ClientError> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(project_id)
            .ok_or_else(|| ClientError::ProjectNotOpen(project_id.to_string()))?;
        let doc = session.close().await;
        lock(&self.detached).insert(project_id.clone(), doc);
        Ok(())
    }

    /// Ids of open projects, sorted.
    pub async fn open_projects(&self) -> Vec<ProjectId> {
        let mut ids: Vec<_> = self.sessions.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Bind `editor` to document `slug` of an open project.
    ///
    /// The returned receiver sees every adapter event, including bootstrap.
    pub async fn mount_document(
        &self,
        project_id: &ProjectId,
        slug: DocumentSlug,
        editor: Arc<dyn EditorSurface>,
    ) -> Result<broadcast::Receiver<DocumentEvent>, ClientError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(project_id)
            .ok_or_else(|| ClientError::ProjectNotOpen(project_id.to_string()))?;
        session.mount(slug, editor, self.config.debounce())
    }

    /// Commit a document's pending edit now.
    pub async fn flush_document(
        &self,
        project_id: &ProjectId,
        slug: &DocumentSlug,
    ) -> Result<bool, ClientError> {
        let sessions = self.sessions.lock().await;
        let session = sessions
            .get(project_id)
            .ok_or_else(|| ClientError::ProjectNotOpen(project_id.to_string()))?;
        session.document(slug)?.flush().await
    }

    /// Release a document's editor, flushing pending edits.
    pub async fn unmount_document(
        &self,
        project_id: &ProjectId,
        slug: &DocumentSlug,
    ) -> Result<(), ClientError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(project_id)
            .ok_or_else(|| ClientError::ProjectNotOpen(project_id.to_string()))?;
        session.unmount(slug).await
    }

    /// Current CRDT text of a document, whether or not its project is open.
    pub async fn document_text(
        &self,
        project_id: &ProjectId,
        slug: &DocumentSlug,
    ) -> Result<String, ClientError> {
        if let Some(session) = self.sessions.lock().await.get(project_id) {
            return Ok(session.text(slug));
        }
        lock(&self.detached)
            .get(project_id)
            .map(|doc| doc.get_text(slug.as_str()).to_string())
            .ok_or_else(|| ClientError::ProjectNotOpen(project_id.to_string()))
    }

    async fn project_doc(&self, project_id: &ProjectId) -> Option<Arc<LoroDoc>> {
        if let Some(session) = self.sessions.lock().await.get(project_id) {
            return Some(session.doc().clone());
        }
        lock(&self.detached).get(project_id).cloned()
    }

    // --- project sync ------------------------------------------------------

    /// Start syncing a project: register a fresh key with the service and
    /// queue a full snapshot for peers.
    pub async fn enable_project_sync(&self, project_id: &ProjectId) -> Result<(), ClientError> {
        let key = ProjectKey::generate();
        self.backend.enable_project_sync(project_id, &key).await?;
        info!(project = %project_id, key = %key.fingerprint(), "project sync enabled");

        lock(&self.keys).insert(project_id.clone(), key);
        lock(&self.outbound.registry).enable(project_id.clone());

        if let Some(doc) = self.project_doc(project_id).await {
            let snapshot = doc
                .export(loro::ExportMode::Snapshot)
                .map_err(|e| ClientError::Crdt(e.to_string()))?;
            self.outbound.push(project_id, snapshot);
        }
        Ok(())
    }

    /// Stop syncing a project. Works without a connection; queued deltas are dropped.
    pub async fn disable_project_sync(&self, project_id: &ProjectId) -> Result<(), ClientError> {
        lock(&self.outbound.registry).disable(project_id);
        let dropped = lock(&self.outbound.queue).remove_project(project_id);
        lock(&self.keys).remove(project_id);
        info!(project = %project_id, dropped, "project sync disabled");

        if self.connection.is_connected() {
            if let Err(e) = self.backend.disable_project_sync(project_id).await {
                warn!(project = %project_id, error = %e, "service did not acknowledge disable");
            }
        }
        Ok(())
    }

    /// Sync bookkeeping for a project, if sync is enabled.
    pub fn project_sync_state(&self, project_id: &ProjectId) -> Option<ProjectSyncState> {
        lock(&self.outbound.registry).get(project_id).cloned()
    }

    /// Deltas queued (or in flight) for a project.
    pub fn pending_updates(&self, project_id: &ProjectId) -> usize {
        lock(&self.outbound.queue).count_for(project_id)
    }

    /// Fingerprint of the current key for a project.
    pub fn project_key_fingerprint(&self, project_id: &ProjectId) -> Option<String> {
        lock(&self.keys).get(project_id).map(ProjectKey::fingerprint)
    }

    /// Generate and register a fresh key for every synced project.
    ///
    /// Returns the number of projects rotated.
    pub async fn rotate_project_keys(&self) -> Result<usize, ClientError> {
        let projects = lock(&self.outbound.registry).enabled_projects();
        for project_id in &projects {
            let key = ProjectKey::generate();
            self.backend.enable_project_sync(project_id, &key).await?;
            debug!(project = %project_id, key = %key.fingerprint(), "project key rotated");
            lock(&self.keys).insert(project_id.clone(), key);
        }
        Ok(projects.len())
    }

    // --- devices -----------------------------------------------------------

    /// Open a pairing dialog.
    pub fn open_pairing(&self, role: PairingRole) -> PairingFlow<B> {
        PairingFlow::new(self.backend.clone(), self.device_id, role)
    }

    /// Submit a code through `flow`; on success record the device, refresh
    /// the device list and rotate project keys.
    pub async fn submit_pairing_code(
        &self,
        flow: &PairingFlow<B>,
        input: &str,
    ) -> Result<DeviceRecord, ClientError> {
        let record = flow.submit_code(input).await?;
        {
            let mut devices = lock(&self.devices);
            if !devices.iter().any(|d| d.device_id == record.device_id) {
                devices.push(record.clone());
            }
        }

        if let Err(e) = self.refresh_devices().await {
            warn!(error = %e, "device list refresh after pairing failed");
        }
        let rotated = self.rotate_project_keys().await?;
        info!(device = %record.device_id, rotated, "pairing complete");
        Ok(record)
    }

    /// Last known paired devices.
    pub fn list_paired_devices(&self) -> Vec<DeviceRecord> {
        lock(&self.devices).clone()
    }

    /// Fetch the paired-device list from the service. The latest refresh wins.
    pub async fn refresh_devices(&self) -> Result<Vec<DeviceRecord>, ClientError> {
        let token = self.devices_guard.begin();
        let result = self.backend.list_paired_devices().await;

        if self.devices_guard.is_stale(token) {
            debug!("discarding superseded device list");
            return Ok(self.list_paired_devices());
        }
        let records: Vec<DeviceRecord> = result?
            .into_iter()
            .map(|info| DeviceRecord::from_info(info, &self.device_id))
            .collect();
        *lock(&self.devices) = records.clone();
        Ok(records)
    }

    /// Revoke a paired device and refresh the list.
    pub async fn remove_device(&self, device_id: &DeviceId) -> Result<(), ClientError> {
        self.backend.remove_device(device_id).await?;
        info!(device = %device_id, "device removed");
        lock(&self.devices).retain(|d| &d.device_id != device_id);
        self.refresh_devices().await?;
        Ok(())
    }

    // --- lifecycle ---------------------------------------------------------

    /// Close every project, disconnect and stop background tasks.
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (project_id, session) in sessions {
            let doc = session.close().await;
            lock(&self.detached).insert(project_id, doc);
        }
        self.connection.disconnect().await;
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        info!(device = %self.device_id, "sync engine stopped");
    }

    // --- pumps -------------------------------------------------------------

    async fn handle_backend_event(&self, event: BackendEvent) {
        match event {
            BackendEvent::StatusChanged(status) => {
                self.connection.apply_status_event(status).await;
            }
            BackendEvent::UpdateReceived {
                project_id,
                payload,
            } => self.apply_inbound(&project_id, &payload).await,
            BackendEvent::DevicesChanged => {
                if let Err(e) = self.refresh_devices().await {
                    warn!(error = %e, "device list refresh failed");
                }
            }
        }
    }

    async fn apply_inbound(&self, project_id: &ProjectId, payload: &[u8]) {
        if !lock(&self.outbound.registry).is_enabled(project_id) {
            debug!(project = %project_id, "ignoring update for project without sync");
            return;
        }

        let result = match self.sessions.lock().await.get(project_id) {
            Some(session) => session.bridge().apply_remote_update(payload),
            None => {
                let doc = lock(&self.detached)
                    .entry(project_id.clone())
                    .or_insert_with(|| Arc::new(LoroDoc::new()))
                    .clone();
                doc.import(payload)
                    .map(|_| ())
                    .map_err(|e| ClientError::Crdt(e.to_string()))
            }
        };

        match result {
            Ok(()) => lock(&self.outbound.registry).record_sync(project_id, unix_now()),
            Err(e) => warn!(project = %project_id, error = %e, "rejected inbound update"),
        }
    }

    async fn drain_outbound(&self) {
        while self.connection.is_connected() {
            let Some(update) = lock(&self.outbound.queue).dequeue() else {
                return;
            };

            let result = self
                .backend
                .send_update(&update.project_id, &update.payload)
                .await;

            match result {
                Ok(()) => {
                    lock(&self.outbound.queue).ack(&update.update_id);
                    self.outbound.refresh_pending(&update.project_id);
                    lock(&self.outbound.registry).record_sync(&update.project_id, unix_now());
                }
                Err(BackendError::ProjectNotEnabled(_)) => {
                    warn!(project = %update.project_id, "service has no sync for project; dropping update");
                    lock(&self.outbound.queue).ack(&update.update_id);
                    self.outbound.refresh_pending(&update.project_id);
                }
                Err(e) => {
                    lock(&self.outbound.queue).nack(&update.update_id);
                    self.connection.report_transport_failure(&e).await;
                    return;
                }
            }
        }
    }
}

impl<B: SyncBackend> Drop for SyncEngine<B> {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

fn spawn_event_pump<B: SyncBackend>(
    engine: Weak<SyncEngine<B>>,
    mut events: broadcast::Receiver<BackendEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "backend event pump lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let Some(engine) = engine.upgrade() else {
                break;
            };
            engine.handle_backend_event(event).await;
        }
    })
}

fn spawn_outbound_pump<B: SyncBackend>(
    engine: Weak<SyncEngine<B>>,
    outbound: Arc<Outbound>,
    flush: Arc<Notify>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = outbound.wake.notified() => {}
                _ = flush.notified() => {}
            }
            let Some(engine) = engine.upgrade() else {
                break;
            };
            engine.drain_outbound().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use inkwell_sync_core::{MemoryEditor, PairingError};
    use inkwell_sync_types::DeviceInfo;

    fn project() -> ProjectId {
        ProjectId::new("/novel").unwrap()
    }

    fn slug() -> DocumentSlug {
        DocumentSlug::new("chapter-1").unwrap()
    }

    fn engine(backend: &MockBackend) -> Arc<SyncEngine<MockBackend>> {
        SyncEngine::start(EngineConfig::default(), DeviceId::random(), backend.clone())
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Build a delta a peer would send for `slug`.
    fn peer_delta(text: &str) -> Vec<u8> {
        let doc = LoroDoc::new();
        doc.get_text("chapter-1").insert(0, text).unwrap();
        doc.commit();
        doc.export(loro::ExportMode::Snapshot).unwrap()
    }

    #[tokio::test]
    async fn connect_and_disconnect() {
        let backend = MockBackend::new();
        let engine = engine(&backend);

        engine.connect("mem://relay", "token").await.unwrap();
        assert!(engine.status().is_connected());
        assert_eq!(backend.connected_url().as_deref(), Some("mem://relay"));

        engine.disconnect().await;
        assert_eq!(engine.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn connect_configured_uses_config() {
        let backend = MockBackend::new();
        let engine = engine(&backend);

        engine.connect_configured().await.unwrap();

        assert_eq!(backend.connected_url().as_deref(), Some("mem://local"));
    }

    #[tokio::test]
    async fn pushed_status_reaches_engine() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.connect("mem://relay", "token").await.unwrap();

        backend.emit(BackendEvent::StatusChanged(ConnectionStatus::Reconnecting));
        settle().await;

        assert_eq!(engine.status(), ConnectionStatus::Reconnecting);
    }

    #[tokio::test]
    async fn enable_sync_sends_snapshot() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.connect("mem://relay", "token").await.unwrap();
        engine.open_project(&project()).await.unwrap();

        engine.enable_project_sync(&project()).await.unwrap();
        settle().await;

        let enabled = backend.enabled_projects();
        assert_eq!(enabled.len(), 1);
        assert_eq!(
            Some(enabled[0].1.clone()),
            engine.project_key_fingerprint(&project())
        );
        assert_eq!(backend.sent_updates().len(), 1);
        assert_eq!(engine.pending_updates(&project()), 0);
        assert!(engine.project_sync_state(&project()).unwrap().enabled);
    }

    #[tokio::test]
    async fn local_edits_flow_to_backend() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.connect("mem://relay", "token").await.unwrap();
        engine.open_project(&project()).await.unwrap();
        engine.enable_project_sync(&project()).await.unwrap();
        let editor = MemoryEditor::new();
        engine
            .mount_document(&project(), slug(), Arc::new(editor.clone()))
            .await
            .unwrap();
        settle().await;
        let before = backend.sent_updates().len();

        editor.type_text(0, "Once upon a time");
        settle().await;
        assert!(engine.flush_document(&project(), &slug()).await.unwrap());
        settle().await;

        assert_eq!(backend.sent_updates().len(), before + 1);
        assert_eq!(
            engine.document_text(&project(), &slug()).await.unwrap(),
            "Once upon a time"
        );
    }

    #[tokio::test]
    async fn offline_edits_queue_until_connected() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.open_project(&project()).await.unwrap();
        engine.enable_project_sync(&project()).await.unwrap();
        let editor = MemoryEditor::new();
        engine
            .mount_document(&project(), slug(), Arc::new(editor.clone()))
            .await
            .unwrap();

        editor.type_text(0, "offline draft");
        engine.flush_document(&project(), &slug()).await.unwrap();
        settle().await;

        // Snapshot plus one edit.
        assert_eq!(engine.pending_updates(&project()), 2);
        assert_eq!(
            engine.project_sync_state(&project()).unwrap().pending_updates,
            2
        );
        assert!(backend.sent_updates().is_empty());

        engine.connect("mem://relay", "token").await.unwrap();
        settle().await;

        assert_eq!(backend.sent_updates().len(), 2);
        assert_eq!(engine.pending_updates(&project()), 0);
    }

    #[tokio::test]
    async fn send_failure_requeues_and_sets_error() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.connect("mem://relay", "token").await.unwrap();
        engine.open_project(&project()).await.unwrap();
        backend.fail_next_send(BackendError::SendFailed("broken pipe".into()));

        engine.enable_project_sync(&project()).await.unwrap();
        settle().await;

        assert_eq!(engine.pending_updates(&project()), 1);
        assert_eq!(
            engine.last_error().as_deref(),
            Some("send failed: broken pipe")
        );

        engine.connect("mem://relay", "token").await.unwrap();
        settle().await;
        assert_eq!(engine.pending_updates(&project()), 0);
    }

    #[tokio::test]
    async fn disable_sync_works_offline() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.open_project(&project()).await.unwrap();
        engine.enable_project_sync(&project()).await.unwrap();
        assert_eq!(engine.pending_updates(&project()), 1);

        engine.disable_project_sync(&project()).await.unwrap();

        assert_eq!(engine.pending_updates(&project()), 0);
        assert!(engine.project_sync_state(&project()).is_none());
        assert_eq!(engine.project_key_fingerprint(&project()), None);
    }

    #[tokio::test]
    async fn inbound_update_reaches_open_project() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.open_project(&project()).await.unwrap();
        engine.enable_project_sync(&project()).await.unwrap();

        backend.emit(BackendEvent::UpdateReceived {
            project_id: project(),
            payload: peer_delta("from the tablet"),
        });
        settle().await;

        assert_eq!(
            engine.document_text(&project(), &slug()).await.unwrap(),
            "from the tablet"
        );
        assert!(engine
            .project_sync_state(&project())
            .unwrap()
            .last_sync
            .is_some());
    }

    #[tokio::test]
    async fn inbound_update_for_closed_project_is_kept() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.open_project(&project()).await.unwrap();
        engine.enable_project_sync(&project()).await.unwrap();
        engine.close_project(&project()).await.unwrap();

        backend.emit(BackendEvent::UpdateReceived {
            project_id: project(),
            payload: peer_delta("written while closed"),
        });
        settle().await;
        assert_eq!(
            engine.document_text(&project(), &slug()).await.unwrap(),
            "written while closed"
        );

        engine.open_project(&project()).await.unwrap();
        let editor = MemoryEditor::new();
        engine
            .mount_document(&project(), slug(), Arc::new(editor.clone()))
            .await
            .unwrap();
        assert_eq!(editor.serialize().unwrap(), "written while closed");
    }

    #[tokio::test]
    async fn inbound_update_without_sync_is_ignored() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.open_project(&project()).await.unwrap();

        backend.emit(BackendEvent::UpdateReceived {
            project_id: project(),
            payload: peer_delta("stray"),
        });
        settle().await;

        assert_eq!(engine.document_text(&project(), &slug()).await.unwrap(), "");
    }

    #[tokio::test]
    async fn mount_requires_open_project() {
        let backend = MockBackend::new();
        let engine = engine(&backend);

        let result = engine
            .mount_document(&project(), slug(), Arc::new(MemoryEditor::new()))
            .await;

        assert!(matches!(result, Err(ClientError::ProjectNotOpen(_))));
    }

    #[tokio::test]
    async fn double_mount_is_rejected() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.open_project(&project()).await.unwrap();
        engine
            .mount_document(&project(), slug(), Arc::new(MemoryEditor::new()))
            .await
            .unwrap();

        let result = engine
            .mount_document(&project(), slug(), Arc::new(MemoryEditor::new()))
            .await;

        assert!(matches!(
            result,
            Err(ClientError::DocumentAlreadyMounted(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn close_project_flushes_pending_edits() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.open_project(&project()).await.unwrap();
        let editor = MemoryEditor::new();
        engine
            .mount_document(&project(), slug(), Arc::new(editor.clone()))
            .await
            .unwrap();

        editor.type_text(0, "unsaved");
        settle().await;
        engine.close_project(&project()).await.unwrap();

        assert_eq!(
            engine.document_text(&project(), &slug()).await.unwrap(),
            "unsaved"
        );
        assert!(!editor.has_listener());
    }

    #[tokio::test]
    async fn pairing_records_device_and_rotates_keys() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        backend.set_identity(DeviceInfo {
            device_id: engine.device_id(),
            name: "Tablet".into(),
        });
        engine.open_project(&project()).await.unwrap();
        engine.enable_project_sync(&project()).await.unwrap();
        let old_key = engine.project_key_fingerprint(&project()).unwrap();

        let flow = engine.open_pairing(PairingRole::Responder);
        let record = engine
            .submit_pairing_code(&flow, "sk-pair_v1.ABCDEFGHIJKLMNOP")
            .await
            .unwrap();

        assert_eq!(record.device_id, engine.device_id());
        assert!(record.is_current);
        assert_eq!(engine.list_paired_devices(), vec![record]);
        let new_key = engine.project_key_fingerprint(&project()).unwrap();
        assert_ne!(new_key, old_key);
        assert_eq!(backend.enabled_projects(), vec![(project(), new_key)]);
    }

    #[tokio::test]
    async fn failed_pairing_leaves_devices_untouched() {
        let backend = MockBackend::new();
        backend.fail_next_pairing(BackendError::Pairing(PairingError::UnknownCode));
        let engine = engine(&backend);

        let flow = engine.open_pairing(PairingRole::Responder);
        let result = engine
            .submit_pairing_code(&flow, "sk-pair_v1.ABCDEFGHIJKLMNOP")
            .await;

        assert!(result.is_err());
        assert!(engine.list_paired_devices().is_empty());
        assert!(flow.error().is_some());
    }

    #[tokio::test]
    async fn devices_changed_refreshes_list() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        let phone = DeviceInfo {
            device_id: DeviceId::random(),
            name: "Phone".into(),
        };
        backend.set_devices(vec![phone.clone()]);

        backend.emit(BackendEvent::DevicesChanged);
        settle().await;

        let devices = engine.list_paired_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_id, phone.device_id);
        assert!(!devices[0].is_current);
    }

    #[tokio::test]
    async fn remove_device_refreshes_list() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        let phone = DeviceInfo {
            device_id: DeviceId::random(),
            name: "Phone".into(),
        };
        backend.set_devices(vec![phone.clone()]);
        engine.refresh_devices().await.unwrap();

        engine.remove_device(&phone.device_id).await.unwrap();

        assert!(engine.list_paired_devices().is_empty());
        assert!(matches!(
            engine.remove_device(&phone.device_id).await,
            Err(ClientError::Backend(BackendError::UnknownDevice(_)))
        ));
    }

    #[tokio::test]
    async fn shutdown_stops_everything() {
        let backend = MockBackend::new();
        let engine = engine(&backend);
        engine.connect("mem://relay", "token").await.unwrap();
        engine.open_project(&project()).await.unwrap();

        engine.shutdown().await;

        assert!(engine.open_projects().await.is_empty());
        assert_eq!(engine.status(), ConnectionStatus::Disconnected);
        assert!(!backend.is_connected());
    }
}
