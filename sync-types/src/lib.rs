//! # sync-types
//!
//! Shared types for the Inkwell multi-device sync engine.
//!
//! This crate provides the foundational types used across all Inkwell sync crates:
//! - [`DeviceId`], [`ProjectId`], [`DocumentSlug`], [`UpdateId`] - Identity types
//! - [`DeviceInfo`], [`DeviceRecord`] - Paired device bookkeeping
//! - [`ConnectionStatus`] - Relay connection status
//! - [`UpdateOrigin`] - Origin tags carried by CRDT deltas
//! - [`Message`] - Wire payload shapes exchanged with the relay
//! - [`SyncError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod device;
mod error;
mod ids;
mod messages;
mod origin;
mod project;
mod status;

pub use device::{DeviceInfo, DeviceRecord};
pub use error::SyncError;
pub use ids::{DeviceId, DocumentSlug, ProjectId, UpdateId};
pub use messages::Message;
pub use origin::UpdateOrigin;
pub use project::{Entity, ProjectManifest};
pub use status::ConnectionStatus;
