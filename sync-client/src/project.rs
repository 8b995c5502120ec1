//! Project store.
//!
//! Holds the manifest and loaded entity collections of the open project.
//! Every load is guarded:
//! - `open()` is exclusive: only the most recent open may publish its manifest.
//! - `load_entities()` is concurrent-safe: loads for different kinds may
//!   resolve in any order and all apply unless `open()` or `close()` ran.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use inkwell_sync_core::StaleGuard;
use inkwell_sync_types::{Entity, ProjectId, ProjectManifest};
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::ClientError;

/// Where project data comes from (disk, host application, ...).
#[async_trait]
pub trait ProjectSource: Send + Sync + 'static {
    /// Read the manifest of the project at `path`.
    async fn load_manifest(&self, path: &str) -> Result<ProjectManifest, ClientError>;

    /// Read every entity of `kind` in a project.
    async fn load_entities(
        &self,
        project_id: &ProjectId,
        kind: &str,
    ) -> Result<Vec<Entity>, ClientError>;
}

#[derive(Debug, Default)]
struct Loaded {
    manifest: Option<ProjectManifest>,
    entities: HashMap<String, Vec<Entity>>,
}

/// In-memory view of the open project.
pub struct ProjectStore<S: ProjectSource> {
    source: S,
    guard: StaleGuard,
    loaded: Mutex<Loaded>,
}

impl<S: ProjectSource> ProjectStore<S> {
    /// Create an empty store reading from `source`.
    pub fn new(source: S) -> Self {
        Self {
            source,
            guard: StaleGuard::new(),
            loaded: Mutex::new(Loaded::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Loaded> {
        self.loaded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the project at `path`.
    ///
    /// Returns `Ok(false)` if a later `open()` or `close()` superseded this one.
    pub async fn open(&self, path: &str) -> Result<bool, ClientError> {
        let token = self.guard.begin();
        {
            let mut loaded = self.lock();
            loaded.manifest = None;
            loaded.entities.clear();
        }

        let result = self.source.load_manifest(path).await;
        if self.guard.is_stale(token) {
            debug!(path, "discarding superseded project open");
            return Ok(false);
        }
        self.lock().manifest = Some(result?);
        Ok(true)
    }

    /// Load the entities of `kind` for the open project.
    ///
    /// Returns `Ok(false)` if the project changed while loading.
    pub async fn load_entities(&self, kind: &str) -> Result<bool, ClientError> {
        let token = self.guard.snapshot();
        let project_id = self
            .lock()
            .manifest
            .as_ref()
            .map(|m| m.project_id.clone())
            .ok_or_else(|| ClientError::ProjectNotOpen("no project open".into()))?;

        let result = self.source.load_entities(&project_id, kind).await;
        if self.guard.is_stale(token) {
            debug!(kind, "discarding stale entity load");
            return Ok(false);
        }
        self.lock().entities.insert(kind.to_string(), result?);
        Ok(true)
    }

    /// Close the project and discard any in-flight loads.
    pub fn close(&self) {
        self.guard.reset();
        let mut loaded = self.lock();
        loaded.manifest = None;
        loaded.entities.clear();
    }

    /// Manifest of the open project.
    pub fn manifest(&self) -> Option<ProjectManifest> {
        self.lock().manifest.clone()
    }

    /// Loaded entities of `kind`.
    pub fn entities(&self, kind: &str) -> Option<Vec<Entity>> {
        self.lock().entities.get(kind).cloned()
    }

    /// The source this store reads from.
    pub fn source(&self) -> &S {
        &self.source
    }
}

#[derive(Default)]
struct SourceInner {
    manifests: HashMap<String, ProjectManifest>,
    entities: HashMap<(ProjectId, String), Vec<Entity>>,
    held_manifests: HashMap<String, oneshot::Receiver<()>>,
    held_entities: HashMap<String, oneshot::Receiver<()>>,
    failing_entities: HashSet<String>,
}

/// Project source backed by maps, with hooks to delay individual responses.
#[derive(Clone, Default)]
pub struct MemoryProjectSource {
    inner: Arc<Mutex<SourceInner>>,
}

impl MemoryProjectSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SourceInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve `manifest` for `path`.
    pub fn insert_manifest(&self, path: &str, manifest: ProjectManifest) {
        self.lock().manifests.insert(path.to_string(), manifest);
    }

    /// Serve `entities` for `kind` in `project_id`.
    pub fn insert_entities(&self, project_id: &ProjectId, kind: &str, entities: Vec<Entity>) {
        self.lock()
            .entities
            .insert((project_id.clone(), kind.to_string()), entities);
    }

    /// Delay the next manifest load for `path` until the sender fires.
    pub fn hold_manifest(&self, path: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.lock().held_manifests.insert(path.to_string(), rx);
        tx
    }

    /// Make every entity load for `kind` fail.
    pub fn fail_entities(&self, kind: &str) {
        self.lock().failing_entities.insert(kind.to_string());
    }

    /// Delay the next entity load for `kind` until the sender fires.
    pub fn hold_entities(&self, kind: &str) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.lock().held_entities.insert(kind.to_string(), rx);
        tx
    }
}

#[async_trait]
impl ProjectSource for MemoryProjectSource {
    async fn load_manifest(&self, path: &str) -> Result<ProjectManifest, ClientError> {
        let held = self.lock().held_manifests.remove(path);
        if let Some(rx) = held {
            let _ = rx.await;
        }
        self.lock()
            .manifests
            .get(path)
            .cloned()
            .ok_or_else(|| ClientError::ProjectNotOpen(path.to_string()))
    }

    async fn load_entities(
        &self,
        project_id: &ProjectId,
        kind: &str,
    ) -> Result<Vec<Entity>, ClientError> {
        let held = self.lock().held_entities.remove(kind);
        if let Some(rx) = held {
            let _ = rx.await;
        }
        let inner = self.lock();
        if inner.failing_entities.contains(kind) {
            return Err(ClientError::ProjectData(format!("cannot read {kind} entities")));
        }
        Ok(inner
            .entities
            .get(&(project_id.clone(), kind.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(path: &str, title: &str) -> ProjectManifest {
        ProjectManifest {
            project_id: ProjectId::new(path).unwrap(),
            title: title.to_string(),
            documents: Vec::new(),
        }
    }

    fn entity(kind: &str, name: &str) -> Entity {
        Entity {
            id: name.to_lowercase(),
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    fn source() -> MemoryProjectSource {
        let source = MemoryProjectSource::new();
        source.insert_manifest("/project/A", manifest("/project/A", "A"));
        source.insert_manifest("/project/B", manifest("/project/B", "B"));
        source
    }

    #[tokio::test]
    async fn open_publishes_manifest() {
        let store = ProjectStore::new(source());
        assert!(store.open("/project/A").await.unwrap());
        assert_eq!(store.manifest().unwrap().title, "A");
    }

    #[tokio::test]
    async fn open_unknown_path_fails() {
        let store = ProjectStore::new(source());
        assert!(matches!(
            store.open("/nowhere").await,
            Err(ClientError::ProjectNotOpen(_))
        ));
        assert!(store.manifest().is_none());
    }

    #[tokio::test]
    async fn later_close_discards_open() {
        let source = source();
        let store = Arc::new(ProjectStore::new(source.clone()));
        let release = source.hold_manifest("/project/A");

        let task = {
            let store = store.clone();
            tokio::spawn(async move { store.open("/project/A").await })
        };
        tokio::task::yield_now().await;
        store.close();
        release.send(()).unwrap();

        assert!(!task.await.unwrap().unwrap());
        assert!(store.manifest().is_none());
    }

    #[tokio::test]
    async fn superseded_failing_open_is_dropped() {
        let source = source();
        let store = Arc::new(ProjectStore::new(source.clone()));
        let release = source.hold_manifest("/project/missing");

        let task = {
            let store = store.clone();
            tokio::spawn(async move { store.open("/project/missing").await })
        };
        tokio::task::yield_now().await;

        assert!(store.open("/project/B").await.unwrap());
        release.send(()).unwrap();

        assert!(!task.await.unwrap().unwrap());
        assert_eq!(store.manifest().unwrap().title, "B");
    }

    #[tokio::test]
    async fn failing_entity_load_after_close_is_dropped() {
        let source = source();
        let store = Arc::new(ProjectStore::new(source.clone()));
        store.open("/project/A").await.unwrap();
        source.fail_entities("character");
        let release = source.hold_entities("character");

        let task = {
            let store = store.clone();
            tokio::spawn(async move { store.load_entities("character").await })
        };
        tokio::task::yield_now().await;

        store.close();
        release.send(()).unwrap();

        assert!(!task.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn failing_entity_load_is_reported() {
        let source = source();
        let store = ProjectStore::new(source.clone());
        store.open("/project/A").await.unwrap();
        source.fail_entities("character");

        assert!(store.load_entities("character").await.is_err());
        assert!(store.entities("character").is_none());
    }

    #[tokio::test]
    async fn load_requires_open_project() {
        let store = ProjectStore::new(source());
        assert!(matches!(
            store.load_entities("character").await,
            Err(ClientError::ProjectNotOpen(_))
        ));
    }

    #[tokio::test]
    async fn reopen_clears_entities() {
        let source = source();
        let id = ProjectId::new("/project/A").unwrap();
        source.insert_entities(&id, "character", vec![entity("character", "Ada")]);
        let store = ProjectStore::new(source);

        store.open("/project/A").await.unwrap();
        store.load_entities("character").await.unwrap();
        assert_eq!(store.entities("character").unwrap().len(), 1);

        store.open("/project/B").await.unwrap();
        assert!(store.entities("character").is_none());
    }
}
