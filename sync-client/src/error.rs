//! Client errors.

use inkwell_sync_core::{ConversionError, PairingError, QueueError};
use inkwell_sync_types::SyncError;
use thiserror::Error;

use crate::backend::BackendError;

/// Errors surfaced by the sync engine.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Backend call failed.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Pairing was rejected locally.
    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    /// Editor content could not be converted.
    #[error("conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Outbound queue rejected an update.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Shared type error (identifiers, wire payloads).
    #[error(transparent)]
    Types(#[from] SyncError),

    /// CRDT document rejected an operation.
    #[error("crdt error: {0}")]
    Crdt(String),

    /// No project with this id is open.
    #[error("project not open: {0}")]
    ProjectNotOpen(String),

    /// The project source could not read project data.
    #[error("project data unavailable: {0}")]
    ProjectData(String),

    /// No adapter is mounted for this document.
    #[error("document not mounted: {0}")]
    DocumentNotMounted(String),

    /// An adapter is already mounted for this document.
    #[error("document already mounted: {0}")]
    DocumentAlreadyMounted(String),

    /// The document adapter task has stopped.
    #[error("document adapter stopped")]
    AdapterStopped,

    /// Operation needs a live connection.
    #[error("not connected")]
    NotConnected,
}
