//! # sync-client
//!
//! Client library for Inkwell multi-device sync.
//!
//! This is the main library the writing app embeds to keep documents in sync
//! across a user's devices.
//!
//! ## Features
//!
//! - **CRDT documents**: one Loro document per project, one text container per document
//! - **Editor adapter**: debounced, echo-free binding between an editor and its container
//! - **Backend abstraction**: pluggable sync service (in-process relay, mock)
//! - **Pure state machines**: connection and pairing logic live in sync-core
//!
//! ## Example
//!
//! ```ignore
//! use inkwell_sync_client::{EngineConfig, MemoryRelay, SyncEngine};
//!
//! let relay = MemoryRelay::new();
//! let backend = relay.register("Laptop");
//! let engine = SyncEngine::start(EngineConfig::default(), backend.device_id(), backend);
//!
//! engine.connect("mem://relay", "token").await?;
//! engine.open_project(&project_id).await?;
//! engine.mount_document(&project_id, slug, editor).await?;
//! engine.enable_project_sync(&project_id).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod bridge;
pub mod config;
pub mod connection;
pub mod document;
pub mod engine;
pub mod error;
pub mod pairing;
pub mod project;
pub mod session;

pub use backend::{
    BackendError, BackendEvent, MemoryRelay, MockBackend, RelayBackend, SyncBackend,
    EVENT_CHANNEL_CAPACITY,
};
pub use bridge::{TransportBridge, UpdateSubscription};
pub use config::{ConfigError, EngineConfig};
pub use connection::{ConnectionManager, DEFAULT_CONNECT_TIMEOUT};
pub use document::{AdapterState, BootstrapSource, DocumentAdapter, DocumentEvent, DocumentHandle};
pub use engine::SyncEngine;
pub use error::ClientError;
pub use pairing::PairingFlow;
pub use project::{MemoryProjectSource, ProjectSource, ProjectStore};
pub use session::ProjectSession;
