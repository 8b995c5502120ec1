//! # sync-core
//!
//! Pure logic for Inkwell sync (no I/O, instant tests).
//!
//! This crate implements the state machines and bookkeeping for multi-device
//! sync without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (relay connection, CRDT documents, timers) is performed by
//! `sync-client`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod debounce;
pub mod editor;
pub mod key;
pub mod markdown;
pub mod pairing;
pub mod registry;
pub mod splice;
pub mod stale_guard;
pub mod state;

pub use buffer::{QueueError, QueuedUpdate, UpdateQueue};
pub use debounce::{Debouncer, DEFAULT_DEBOUNCE};
pub use editor::{ConversionError, EditorChange, EditorListener, EditorSurface, UpdateKind};
pub use key::ProjectKey;
pub use markdown::{Block, BlockKind, MemoryEditor};
pub use pairing::{
    canonical_from_visual, normalize_input, DialogState, PairingCode, PairingDialog,
    PairingError, PairingRole, PairingTicket, DEFAULT_PAIRING_TTL, PAIRING_CODE_PREFIX,
};
pub use registry::{ProjectSyncRegistry, ProjectSyncState};
pub use splice::TextSplice;
pub use stale_guard::{StaleGuard, StaleToken};
pub use state::{Action, ConnectionMachine, Event, SyncEvent};
