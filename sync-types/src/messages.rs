//! Wire payloads exchanged with the sync relay.
//!
//! The engine never inspects update bytes: a [`Message`] only routes an
//! opaque CRDT delta to or from a project.

use serde::{Deserialize, Serialize};

use crate::{ConnectionStatus, ProjectId, SyncError, UpdateId};

/// All payload shapes carried between a device and the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Device → relay: deliver a local delta to the project's peers.
    SendUpdate {
        /// Target project.
        project_id: ProjectId,
        /// Queue entry this delta came from (for acknowledgement).
        update_id: UpdateId,
        /// Opaque CRDT delta.
        payload: Vec<u8>,
    },
    /// Relay → device: a peer's delta for a project.
    UpdateReceived {
        /// Source project.
        project_id: ProjectId,
        /// Opaque CRDT delta.
        payload: Vec<u8>,
    },
    /// Relay → device: authoritative connection status.
    StatusChanged {
        /// The new status.
        status: ConnectionStatus,
    },
}

impl Message {
    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SyncError> {
        rmp_serde::to_vec_named(self).map_err(SyncError::Serialization)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SyncError> {
        rmp_serde::from_slice(bytes).map_err(SyncError::Deserialization)
    }

    /// The project this message concerns, if any.
    pub fn project_id(&self) -> Option<&ProjectId> {
        match self {
            Self::SendUpdate { project_id, .. } | Self::UpdateReceived { project_id, .. } => {
                Some(project_id)
            }
            Self::StatusChanged { .. } => None,
        }
    }
}
