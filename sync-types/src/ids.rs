//! Identity types for Inkwell sync.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SyncError;

/// A unique identifier for an editing device.
///
/// 32 bytes of random data, displayed as URL-safe base64.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId([u8; 32]);

impl DeviceId {
    /// Create a new random DeviceId.
    pub fn random() -> Self {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Create a DeviceId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() == 32 {
            let mut arr = [0u8; 32];
            arr.copy_from_slice(bytes);
            Some(Self(arr))
        } else {
            None
        }
    }

    /// Parse a DeviceId from its base64 display form.
    pub fn parse(encoded: &str) -> Result<Self, SyncError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| SyncError::InvalidId(format!("device id: {}", e)))?;
        Self::from_bytes(&bytes).ok_or_else(|| {
            SyncError::InvalidId(format!("device id must be 32 bytes, got {}", bytes.len()))
        })
    }

    /// Get the raw bytes of this DeviceId.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", &self.to_string()[..8])
    }
}

/// Identifies a writing project (usually its path on disk).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(String);

impl ProjectId {
    /// Create a ProjectId. Surrounding whitespace is trimmed.
    pub fn new(id: impl AsRef<str>) -> Result<Self, SyncError> {
        let id = id.as_ref().trim();
        if id.is_empty() {
            return Err(SyncError::InvalidId("project id must not be empty".into()));
        }
        Ok(Self(id.to_string()))
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProjectId({})", self.0)
    }
}

/// Stable slug of a document; doubles as the id of its CRDT text container.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentSlug(String);

impl DocumentSlug {
    /// Create a slug.
    ///
    /// Slugs are container names, so they must be non-empty and free of
    /// whitespace.
    pub fn new(slug: impl AsRef<str>) -> Result<Self, SyncError> {
        let slug = slug.as_ref();
        if slug.is_empty() {
            return Err(SyncError::InvalidId("document slug must not be empty".into()));
        }
        if slug.chars().any(char::is_whitespace) {
            return Err(SyncError::InvalidId(format!(
                "document slug must not contain whitespace: {:?}",
                slug
            )));
        }
        Ok(Self(slug.to_string()))
    }

    /// Borrow the slug as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DocumentSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentSlug({})", self.0)
    }
}

/// A unique identifier for an outbound update awaiting delivery.
///
/// UUID v4 format (16 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateId(uuid::Uuid);

impl UpdateId {
    /// Create a new random UpdateId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for UpdateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UpdateId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_display_parses_back() {
        let original = DeviceId::random();
        let restored = DeviceId::parse(&original.to_string()).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn device_id_base64_display() {
        let id = DeviceId::random();
        assert_eq!(id.to_string().len(), 43); // 32 bytes = 43 base64 chars (no padding)
    }

    #[test]
    fn device_id_from_invalid_length_fails() {
        assert!(DeviceId::from_bytes(&[0u8; 16]).is_none());
        assert!(DeviceId::parse("AAAA").is_err());
        assert!(DeviceId::parse("not base64 !!").is_err());
    }

    #[test]
    fn project_id_trims_and_rejects_empty() {
        assert_eq!(ProjectId::new("  /project/A ").unwrap().as_str(), "/project/A");
        assert!(ProjectId::new("   ").is_err());
    }

    #[test]
    fn document_slug_rules() {
        assert_eq!(DocumentSlug::new("chapter-1").unwrap().as_str(), "chapter-1");
        assert!(DocumentSlug::new("").is_err());
        assert!(DocumentSlug::new("chapter one").is_err());
    }

    #[test]
    fn update_id_is_uuid_v4() {
        let id = UpdateId::new();
        assert_eq!(id.as_uuid().get_version_num(), 4);
        assert_ne!(id, UpdateId::new());
    }
}
