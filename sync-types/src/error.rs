//! Error types for Inkwell sync.

use thiserror::Error;

/// Errors raised while building or decoding shared sync types.
#[derive(Debug, Error)]
pub enum SyncError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// An identifier was empty or malformed
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::InvalidId("empty slug".into());
        assert_eq!(err.to_string(), "invalid identifier: empty slug");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SyncError>();
    }
}
