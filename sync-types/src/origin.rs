//! Origin tags attached to CRDT commits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a CRDT change came from.
///
/// Used only to tell local and remote changes apart; never for ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateOrigin {
    /// A debounced edit made in the local editor.
    LocalEdit,
    /// Editor content pushed into an empty container on first mount.
    LocalInit,
    /// A delta imported from a peer.
    Remote,
}

impl UpdateOrigin {
    /// The tag string recorded on the commit.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalEdit => "local-edit",
            Self::LocalInit => "local-init",
            Self::Remote => "remote",
        }
    }

    /// Parse a commit tag. Unknown tags yield `None`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "local-edit" => Some(Self::LocalEdit),
            "local-init" => Some(Self::LocalInit),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }

    /// Whether the change was produced on this device.
    pub fn is_local(&self) -> bool {
        !matches!(self, Self::Remote)
    }
}

impl fmt::Display for UpdateOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_back() {
        for origin in [
            UpdateOrigin::LocalEdit,
            UpdateOrigin::LocalInit,
            UpdateOrigin::Remote,
        ] {
            assert_eq!(UpdateOrigin::from_tag(origin.as_str()), Some(origin));
        }
        assert_eq!(UpdateOrigin::from_tag(""), None);
    }

    #[test]
    fn locality() {
        assert!(UpdateOrigin::LocalEdit.is_local());
        assert!(UpdateOrigin::LocalInit.is_local());
        assert!(!UpdateOrigin::Remote.is_local());
    }
}
