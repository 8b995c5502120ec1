//! Project sync keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A 32-byte symmetric key handed to the sync service when a project is
/// enabled. Rotated after every successful pairing.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct ProjectKey([u8; 32]);

impl ProjectKey {
    /// Create a new random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        getrandom::getrandom(&mut bytes).expect("getrandom failed");
        Self(bytes)
    }

    /// Create from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short hex fingerprint, safe to log.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }
}

// Intentionally opaque debug to avoid logging key material
impl std::fmt::Debug for ProjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProjectKey({})", self.fingerprint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        assert_ne!(ProjectKey::generate(), ProjectKey::generate());
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let key = ProjectKey::from_bytes([0x42; 32]);
        assert_eq!(key.fingerprint(), key.clone().fingerprint());
        assert_eq!(key.fingerprint().len(), 16);
    }

    #[test]
    fn debug_does_not_leak_bytes() {
        let key = ProjectKey::from_bytes([0x42; 32]);
        let debug = format!("{:?}", key);
        assert!(debug.starts_with("ProjectKey("));
        assert!(!debug.contains("66, 66"));
    }
}
