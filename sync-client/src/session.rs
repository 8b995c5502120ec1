//! Per-project session: one Loro document, its bridge, and mounted documents.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use inkwell_sync_core::EditorSurface;
use inkwell_sync_types::{DocumentSlug, ProjectId};
use loro::LoroDoc;
use tokio::sync::broadcast;
use tracing::info;

use crate::bridge::{TransportBridge, UpdateSubscription};
use crate::document::{DocumentAdapter, DocumentEvent, DocumentHandle};
use crate::error::ClientError;

/// An open project.
pub struct ProjectSession {
    project_id: ProjectId,
    bridge: TransportBridge,
    documents: HashMap<DocumentSlug, DocumentHandle>,
    _outbound: UpdateSubscription,
}

impl ProjectSession {
    /// Open a session over `doc`. Every local commit is handed to `on_local_update`.
    pub fn open<F>(project_id: ProjectId, doc: Arc<LoroDoc>, on_local_update: F) -> Self
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        let bridge = TransportBridge::new(doc);
        let outbound = bridge.on_local_update(on_local_update);
        info!(project = %project_id, "project session opened");
        Self {
            project_id,
            bridge,
            documents: HashMap::new(),
            _outbound: outbound,
        }
    }

    /// The project this session belongs to.
    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    /// The session's transport bridge.
    pub fn bridge(&self) -> &TransportBridge {
        &self.bridge
    }

    /// The project document.
    pub fn doc(&self) -> &Arc<LoroDoc> {
        self.bridge.doc()
    }

    /// Bind `editor` to the container `slug`.
    pub fn mount(
        &mut self,
        slug: DocumentSlug,
        editor: Arc<dyn EditorSurface>,
        debounce: Duration,
    ) -> Result<broadcast::Receiver<DocumentEvent>, ClientError> {
        if self.documents.contains_key(&slug) {
            return Err(ClientError::DocumentAlreadyMounted(slug.to_string()));
        }
        let adapter = DocumentAdapter::new(self.doc().clone(), slug.clone(), editor, debounce);
        let events = adapter.subscribe();
        let handle = adapter.mount()?;
        self.documents.insert(slug, handle);
        Ok(events)
    }

    /// The handle for a mounted document.
    pub fn document(&self, slug: &DocumentSlug) -> Result<&DocumentHandle, ClientError> {
        self.documents
            .get(slug)
            .ok_or_else(|| ClientError::DocumentNotMounted(slug.to_string()))
    }

    /// Stop the adapter for `slug`, flushing pending edits.
    pub async fn unmount(&mut self, slug: &DocumentSlug) -> Result<(), ClientError> {
        let handle = self
            .documents
            .remove(slug)
            .ok_or_else(|| ClientError::DocumentNotMounted(slug.to_string()))?;
        handle.shutdown().await;
        Ok(())
    }

    /// Slugs of mounted documents, sorted.
    pub fn mounted(&self) -> Vec<DocumentSlug> {
        let mut slugs: Vec<_> = self.documents.keys().cloned().collect();
        slugs.sort();
        slugs
    }

    /// Current text of container `slug` (mounted or not).
    pub fn text(&self, slug: &DocumentSlug) -> String {
        self.doc().get_text(slug.as_str()).to_string()
    }

    /// Stop every adapter and return the document.
    pub async fn close(mut self) -> Arc<LoroDoc> {
        for (_, handle) in self.documents.drain() {
            handle.shutdown().await;
        }
        info!(project = %self.project_id, "project session closed");
        self.bridge.doc().clone()
    }
}
