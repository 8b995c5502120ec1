//! Connection state machine for Inkwell sync.
//!
//! This module provides a pure, side-effect-free state machine for the
//! relay connection lifecycle. It takes events as input and produces the new
//! [`ConnectionStatus`] plus a list of actions to execute.
//!
//! ```text
//! disconnected ──► connecting ──► connected ◄──► reconnecting
//!       ▲              │              │               │
//!       │              ▼              ▼               ▼
//!       └───────── error(message) ────┴──► reconnecting
//! ```
//!
//! The actual I/O (connecting, sending updates) is performed by sync-client,
//! not by this module.

use inkwell_sync_types::ConnectionStatus;

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionMachine {
    status: ConnectionStatus,
}

impl ConnectionMachine {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status.
    pub fn status(&self) -> &ConnectionStatus {
        &self.status
    }

    /// Process an event, update the status and return the actions to execute.
    ///
    /// The caller (sync-client) is responsible for executing the actions.
    pub fn on_event(&mut self, event: Event) -> Vec<Action> {
        let current = std::mem::take(&mut self.status);
        let (next, actions) = transition(current, event);
        self.status = next;
        actions
    }
}

/// Pure transition function behind [`ConnectionMachine::on_event`].
pub fn transition(status: ConnectionStatus, event: Event) -> (ConnectionStatus, Vec<Action>) {
    use ConnectionStatus as S;

    match (status, event) {
        // Authoritative reports from the service replace whatever we predicted.
        (previous, Event::StatusReported { status }) => {
            let mut actions = Vec::new();
            if status.is_connected() && !previous.is_connected() {
                actions.push(Action::FlushPending);
                actions.push(Action::Emit(SyncEvent::Connected));
            }
            if let S::Error(error) = &status {
                if previous.last_error() != Some(error.as_str()) {
                    actions.push(Action::Emit(SyncEvent::ConnectionFailed {
                        error: error.clone(),
                    }));
                }
            }
            (status, actions)
        }

        // A connect request is honoured from any state; it may target a new server.
        (_, Event::ConnectRequested) => (S::Connecting, vec![Action::Connect]),

        (S::Connecting | S::Reconnecting, Event::ConnectSucceeded) => (
            S::Connected,
            vec![Action::FlushPending, Action::Emit(SyncEvent::Connected)],
        ),
        (S::Connecting | S::Reconnecting, Event::ConnectFailed { error }) => (
            S::Error(error.clone()),
            vec![Action::Emit(SyncEvent::ConnectionFailed { error })],
        ),

        (S::Disconnected, Event::DisconnectRequested) => (S::Disconnected, vec![]),
        (_, Event::DisconnectRequested) => (
            S::Disconnected,
            vec![
                Action::Disconnect,
                Action::Emit(SyncEvent::Disconnected {
                    reason: "user requested".into(),
                }),
            ],
        ),

        (S::Connected, Event::ConnectionLost { reason }) => (
            S::Reconnecting,
            vec![Action::Emit(SyncEvent::Disconnected { reason })],
        ),
        (S::Error(_), Event::ReconnectStarted) => (S::Reconnecting, vec![]),

        (S::Connected | S::Reconnecting, Event::TransportFailed { error }) => (
            S::Error(error.clone()),
            vec![Action::Emit(SyncEvent::ConnectionFailed { error })],
        ),

        // Invalid transitions - stay in current state
        (status, _) => (status, vec![]),
    }
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// User requested a connection.
    ConnectRequested,
    /// The service accepted the connection.
    ConnectSucceeded,
    /// The connection attempt failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// User requested disconnect.
    DisconnectRequested,
    /// An established connection dropped.
    ConnectionLost {
        /// Reason for disconnection.
        reason: String,
    },
    /// The transport began re-establishing a failed connection.
    ReconnectStarted,
    /// Sending or receiving failed on an established connection.
    TransportFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// The service pushed or returned its authoritative status.
    StatusReported {
        /// The reported status.
        status: ConnectionStatus,
    },
}

/// Actions to be executed by sync-client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the connection to the service.
    Connect,
    /// Close the connection to the service.
    Disconnect,
    /// Send updates that were queued while offline.
    FlushPending,
    /// Report an event to the application.
    Emit(SyncEvent),
}

/// Events emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Connection established.
    Connected,
    /// Connection or transport failure.
    ConnectionFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Connection closed or lost.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
}
