//! The editing surface seen by the document adapter.
//!
//! The adapter only needs four things from an editor: read its content as
//! text, replace its content from text, know whether it is empty, and be told
//! when it changes.

use std::sync::Arc;
use thiserror::Error;

/// Failure converting between editor state and text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// Text could not be parsed into editor state.
    #[error("cannot parse text at line {line}: {reason}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// What was wrong.
        reason: String,
    },
    /// Editor state could not be serialized.
    #[error("cannot serialize editor state: {0}")]
    Serialize(String),
}

/// How a programmatic replacement is recorded by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    /// Not added to the undo history (remote changes).
    Discrete,
    /// Added to the undo history.
    Undoable,
}

/// Change notification from the editor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditorChange {
    /// Indices of blocks whose content changed. Empty for selection-only or
    /// other no-op transactions.
    pub dirty_blocks: Vec<usize>,
}

impl EditorChange {
    /// Whether the change touched content.
    pub fn is_noop(&self) -> bool {
        self.dirty_blocks.is_empty()
    }
}

/// Callback invoked synchronously for every editor transaction.
pub type EditorListener = Arc<dyn Fn(EditorChange) + Send + Sync>;

/// An editor the document adapter can drive.
///
/// Implementations use interior mutability: the adapter and the UI hold
/// handles to the same editor.
pub trait EditorSurface: Send + Sync {
    /// Serialize the whole document to text.
    fn serialize(&self) -> Result<String, ConversionError>;

    /// Replace the whole document from text.
    ///
    /// On error the editor is left unchanged.
    fn replace_from_text(&self, text: &str, kind: UpdateKind) -> Result<(), ConversionError>;

    /// True if the document has no content.
    fn is_empty(&self) -> bool;

    /// Install (or with `None`, remove) the change listener.
    fn set_listener(&self, listener: Option<EditorListener>);
}
