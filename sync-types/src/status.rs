//! Relay connection status.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of the connection to the sync relay.
///
/// Created `Disconnected`; only the connection state machine moves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Not connected to the relay.
    #[default]
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected and able to exchange updates.
    Connected,
    /// Connection lost; the transport is re-establishing it.
    Reconnecting,
    /// The last operation failed.
    Error(String),
}

impl ConnectionStatus {
    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a connection is being established.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    /// The error message, if the status is `Error`.
    pub fn last_error(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Reconnecting => f.write_str("reconnecting"),
            Self::Error(message) => write!(f, "error: {}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_disconnected() {
        assert_eq!(ConnectionStatus::default(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn helpers() {
        assert!(ConnectionStatus::Connected.is_connected());
        assert!(!ConnectionStatus::Reconnecting.is_connected());
        assert!(ConnectionStatus::Reconnecting.is_connecting());
        assert!(ConnectionStatus::Connecting.is_connecting());
        assert_eq!(
            ConnectionStatus::Error("timeout".into()).last_error(),
            Some("timeout")
        );
        assert_eq!(ConnectionStatus::Connected.last_error(), None);
    }

    #[test]
    fn json_shape_is_tagged() {
        let json = serde_json::to_string(&ConnectionStatus::Error("timeout".into())).unwrap();
        assert_eq!(json, r#"{"state":"error","message":"timeout"}"#);

        let json = serde_json::to_string(&ConnectionStatus::Connected).unwrap();
        assert_eq!(json, r#"{"state":"connected"}"#);
    }
}
