//! Transport bridge between a project's Loro document and the network.
//!
//! Outbound: every committed local change is handed to a callback as its
//! binary delta. Inbound: peer deltas are imported into the document, and the
//! import notifies mounted document adapters through their container
//! subscriptions. The bridge holds no other state.

use std::sync::Arc;

use loro::{ExportMode, LoroDoc, Subscription, VersionVector};
use tracing::debug;

use crate::error::ClientError;

/// Unsubscribes the local-update callback when dropped.
pub struct UpdateSubscription {
    _inner: Subscription,
}

impl std::fmt::Debug for UpdateSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateSubscription").finish_non_exhaustive()
    }
}

/// Moves binary deltas in and out of one project document.
#[derive(Clone)]
pub struct TransportBridge {
    doc: Arc<LoroDoc>,
}

impl TransportBridge {
    /// Bridge for `doc`.
    pub fn new(doc: Arc<LoroDoc>) -> Self {
        Self { doc }
    }

    /// Call `callback` once per committed local change with its delta.
    ///
    /// Imports never trigger the callback.
    pub fn on_local_update<F>(&self, callback: F) -> UpdateSubscription
    where
        F: Fn(Vec<u8>) + Send + Sync + 'static,
    {
        let inner = self.doc.subscribe_local_update(Box::new(move |update| {
            callback(update.to_vec());
            true
        }));
        UpdateSubscription { _inner: inner }
    }

    /// Import a peer's delta. Re-importing a known delta changes nothing.
    pub fn apply_remote_update(&self, bytes: &[u8]) -> Result<(), ClientError> {
        debug!(len = bytes.len(), "importing remote update");
        self.doc
            .import(bytes)
            .map_err(|e| ClientError::Crdt(e.to_string()))?;
        Ok(())
    }

    /// Full document snapshot for a device that has nothing yet.
    pub fn export_snapshot(&self) -> Result<Vec<u8>, ClientError> {
        self.doc
            .export(ExportMode::Snapshot)
            .map_err(|e| ClientError::Crdt(e.to_string()))
    }

    /// Deltas a peer at `version` (an encoded version vector) is missing.
    ///
    /// Returns `None` if the peer is already up to date.
    pub fn export_updates_since(&self, version: &[u8]) -> Result<Option<Vec<u8>>, ClientError> {
        let from = VersionVector::decode(version).map_err(|e| ClientError::Crdt(e.to_string()))?;
        if from == self.doc.oplog_vv() {
            return Ok(None);
        }

        let updates = self
            .doc
            .export(ExportMode::updates(&from))
            .map_err(|e| ClientError::Crdt(e.to_string()))?;
        Ok((!updates.is_empty()).then_some(updates))
    }

    /// Encoded version vector of everything this document has seen.
    pub fn version(&self) -> Vec<u8> {
        self.doc.oplog_vv().encode()
    }

    /// The underlying document.
    pub fn doc(&self) -> &Arc<LoroDoc> {
        &self.doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn doc_with(text: &str) -> Arc<LoroDoc> {
        let doc = Arc::new(LoroDoc::new());
        doc.get_text("chapter-1").insert(0, text).unwrap();
        doc.commit();
        doc
    }

    #[test]
    fn local_commits_reach_callback() {
        let doc = Arc::new(LoroDoc::new());
        let bridge = TransportBridge::new(doc.clone());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            bridge.on_local_update(move |bytes| seen.lock().unwrap().push(bytes))
        };

        doc.get_text("chapter-1").insert(0, "hello").unwrap();
        doc.commit();

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn imports_do_not_echo() {
        let source = doc_with("from a peer");
        let snapshot = TransportBridge::new(source).export_snapshot().unwrap();

        let doc = Arc::new(LoroDoc::new());
        let bridge = TransportBridge::new(doc.clone());
        let seen = Arc::new(Mutex::new(0usize));
        let _sub = {
            let seen = seen.clone();
            bridge.on_local_update(move |_| *seen.lock().unwrap() += 1)
        };

        bridge.apply_remote_update(&snapshot).unwrap();

        assert_eq!(doc.get_text("chapter-1").to_string(), "from a peer");
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[test]
    fn duplicate_import_is_noop() {
        let snapshot = TransportBridge::new(doc_with("once")).export_snapshot().unwrap();
        let bridge = TransportBridge::new(Arc::new(LoroDoc::new()));

        bridge.apply_remote_update(&snapshot).unwrap();
        let version = bridge.version();
        bridge.apply_remote_update(&snapshot).unwrap();

        assert_eq!(bridge.version(), version);
        assert_eq!(bridge.doc().get_text("chapter-1").to_string(), "once");
    }

    #[test]
    fn dropping_subscription_stops_callbacks() {
        let doc = Arc::new(LoroDoc::new());
        let bridge = TransportBridge::new(doc.clone());
        let seen = Arc::new(Mutex::new(0usize));
        let sub = {
            let seen = seen.clone();
            bridge.on_local_update(move |_| *seen.lock().unwrap() += 1)
        };
        drop(sub);

        doc.get_text("chapter-1").insert(0, "quiet").unwrap();
        doc.commit();

        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[test]
    fn updates_since_version() {
        let a = TransportBridge::new(doc_with("shared"));
        let b = TransportBridge::new(Arc::new(LoroDoc::new()));
        b.apply_remote_update(&a.export_snapshot().unwrap()).unwrap();
        assert_eq!(a.export_updates_since(&b.version()).unwrap(), None);

        a.doc().get_text("chapter-1").insert(6, " text").unwrap();
        a.doc().commit();

        let delta = a.export_updates_since(&b.version()).unwrap().unwrap();
        b.apply_remote_update(&delta).unwrap();
        assert_eq!(b.doc().get_text("chapter-1").to_string(), "shared text");
    }

    #[test]
    fn garbage_is_rejected() {
        let bridge = TransportBridge::new(Arc::new(LoroDoc::new()));
        assert!(matches!(
            bridge.apply_remote_update(b"not a loro update"),
            Err(ClientError::Crdt(_))
        ));
    }
}
