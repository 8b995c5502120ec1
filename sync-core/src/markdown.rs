//! A block-structured markdown editor model.
//!
//! [`MemoryEditor`] is a headless [`EditorSurface`]: the CLI demo and the
//! test suites drive it in place of a visual editor. A document is a list of
//! single-line blocks; its text form is one markdown line per block.
//!
//! | Block       | Line            |
//! |-------------|-----------------|
//! | Heading(n)  | `#… text`       |
//! | Quote       | `> text`        |
//! | ListItem    | `- text`        |
//! | Paragraph   | `text` (escaped with `\` when it starts with `#`, `>`, `-` or `\`) |
//!
//! The empty string is the empty document.

use crate::editor::{ConversionError, EditorChange, EditorListener, EditorSurface, UpdateKind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Kind of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Plain paragraph.
    Paragraph,
    /// Heading, level 1-6.
    Heading(u8),
    /// Block quote.
    Quote,
    /// Bullet list item.
    ListItem,
}

/// One line of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Block kind.
    pub kind: BlockKind,
    /// Inline text, without the markdown prefix.
    pub text: String,
}

impl Block {
    /// A paragraph.
    pub fn paragraph(text: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Paragraph,
            text: text.into(),
        }
    }

    /// A heading, level clamped to 1-6.
    pub fn heading(level: u8, text: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Heading(level.clamp(1, 6)),
            text: text.into(),
        }
    }

    /// A block quote.
    pub fn quote(text: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::Quote,
            text: text.into(),
        }
    }

    /// A list item.
    pub fn list_item(text: impl Into<String>) -> Self {
        Self {
            kind: BlockKind::ListItem,
            text: text.into(),
        }
    }

    fn to_line(&self) -> Result<String, ConversionError> {
        if let Some(c) = self.text.chars().find(|c| c.is_control() && *c != '\t') {
            return Err(ConversionError::Serialize(format!(
                "block contains control character U+{:04X}",
                c as u32
            )));
        }

        let line = match self.kind {
            BlockKind::Heading(level) if (1..=6).contains(&level) => {
                format!("{} {}", "#".repeat(level as usize), self.text)
            }
            BlockKind::Heading(level) => {
                return Err(ConversionError::Serialize(format!(
                    "heading level {} out of range",
                    level
                )))
            }
            BlockKind::Quote => format!("> {}", self.text),
            BlockKind::ListItem => format!("- {}", self.text),
            BlockKind::Paragraph if self.text.starts_with(['#', '>', '-', '\\']) => {
                format!("\\{}", self.text)
            }
            BlockKind::Paragraph => self.text.clone(),
        };
        Ok(line)
    }

    fn from_line(line: &str, number: usize) -> Result<Self, ConversionError> {
        if let Some(c) = line.chars().find(|c| c.is_control() && *c != '\t') {
            return Err(ConversionError::Parse {
                line: number,
                reason: format!("unsupported control character U+{:04X}", c as u32),
            });
        }

        let hashes = line.chars().take_while(|c| *c == '#').count();
        if (1..=6).contains(&hashes) {
            if let Some(text) = line[hashes..].strip_prefix(' ') {
                return Ok(Self::heading(hashes as u8, text));
            }
        }
        if let Some(text) = line.strip_prefix("> ") {
            return Ok(Self::quote(text));
        }
        if let Some(text) = line.strip_prefix("- ") {
            return Ok(Self::list_item(text));
        }
        if let Some(text) = line.strip_prefix('\\') {
            return Ok(Self::paragraph(text));
        }
        Ok(Self::paragraph(line))
    }
}

/// Serialize blocks to markdown.
///
/// A lone empty paragraph is the empty document: it serializes to `""`,
/// which parses back to no blocks.
pub fn serialize_blocks(blocks: &[Block]) -> Result<String, ConversionError> {
    let lines = blocks
        .iter()
        .map(Block::to_line)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(lines.join("\n"))
}

/// Parse markdown into blocks.
pub fn parse_blocks(text: &str) -> Result<Vec<Block>, ConversionError> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    text.split('\n')
        .enumerate()
        .map(|(i, line)| Block::from_line(line, i + 1))
        .collect()
}

#[derive(Default)]
struct EditorState {
    blocks: Vec<Block>,
    history: Vec<Vec<Block>>,
    listener: Option<EditorListener>,
}

/// In-memory editor. Clones share the same document.
#[derive(Clone, Default)]
pub struct MemoryEditor {
    state: Arc<Mutex<EditorState>>,
}

impl std::fmt::Debug for MemoryEditor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("MemoryEditor")
            .field("blocks", &state.blocks)
            .field("undo_depth", &state.history.len())
            .field("has_listener", &state.listener.is_some())
            .finish()
    }
}

impl MemoryEditor {
    /// Create an empty editor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an editor holding `markdown`.
    pub fn from_markdown(markdown: &str) -> Result<Self, ConversionError> {
        let editor = Self::new();
        editor.lock().blocks = parse_blocks(markdown)?;
        Ok(editor)
    }

    fn lock(&self) -> MutexGuard<'_, EditorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current blocks.
    pub fn blocks(&self) -> Vec<Block> {
        self.lock().blocks.clone()
    }

    /// Number of undo steps available.
    pub fn undo_depth(&self) -> usize {
        self.lock().history.len()
    }

    /// Whether a listener is installed.
    pub fn has_listener(&self) -> bool {
        self.lock().listener.is_some()
    }

    /// Replace (or append, when `index == len`) a block as a user edit.
    pub fn set_block(&self, index: usize, block: Block) {
        self.edit(|blocks| {
            if index < blocks.len() {
                blocks[index] = block;
            } else {
                blocks.push(block);
            }
        });
    }

    /// Append a block as a user edit.
    pub fn push_block(&self, block: Block) {
        self.edit(|blocks| blocks.push(block));
    }

    /// Type `text` at the end of block `index` (creating a paragraph if needed).
    pub fn type_text(&self, index: usize, text: &str) {
        self.edit(|blocks| match blocks.get_mut(index) {
            Some(block) => block.text.push_str(text),
            None => blocks.push(Block::paragraph(text)),
        });
    }

    /// Remove block `index` as a user edit.
    pub fn remove_block(&self, index: usize) {
        self.edit(|blocks| {
            if index < blocks.len() {
                blocks.remove(index);
            }
        });
    }

    /// A transaction that changes no content (selection move, focus).
    pub fn touch(&self) {
        let listener = self.lock().listener.clone();
        if let Some(listener) = listener {
            listener(EditorChange::default());
        }
    }

    /// Revert the last undoable change. Returns false if there was none.
    pub fn undo(&self) -> bool {
        let (change, listener) = {
            let mut state = self.lock();
            let Some(previous) = state.history.pop() else {
                return false;
            };
            let change = diff(&state.blocks, &previous);
            state.blocks = previous;
            (change, state.listener.clone())
        };
        notify(listener, change);
        true
    }

    fn edit(&self, f: impl FnOnce(&mut Vec<Block>)) {
        let (change, listener) = {
            let mut state = self.lock();
            let before = state.blocks.clone();
            f(&mut state.blocks);
            let change = diff(&before, &state.blocks);
            if !change.is_noop() {
                state.history.push(before);
            }
            (change, state.listener.clone())
        };
        notify(listener, change);
    }
}

// Listeners run outside the lock so they may call back into the editor.
fn notify(listener: Option<EditorListener>, change: EditorChange) {
    if let Some(listener) = listener {
        listener(change);
    }
}

fn diff(before: &[Block], after: &[Block]) -> EditorChange {
    let len = before.len().max(after.len());
    let dirty_blocks = (0..len)
        .filter(|&i| before.get(i) != after.get(i))
        .collect();
    EditorChange { dirty_blocks }
}

impl EditorSurface for MemoryEditor {
    fn serialize(&self) -> Result<String, ConversionError> {
        serialize_blocks(&self.lock().blocks)
    }

    fn replace_from_text(&self, text: &str, kind: UpdateKind) -> Result<(), ConversionError> {
        let blocks = parse_blocks(text)?;
        let (change, listener) = {
            let mut state = self.lock();
            let change = diff(&state.blocks, &blocks);
            let before = std::mem::replace(&mut state.blocks, blocks);
            if kind == UpdateKind::Undoable && !change.is_noop() {
                state.history.push(before);
            }
            (change, state.listener.clone())
        };
        notify(listener, change);
        Ok(())
    }

    fn is_empty(&self) -> bool {
        let state = self.lock();
        match state.blocks.as_slice() {
            [] => true,
            [only] => only.kind == BlockKind::Paragraph && only.text.is_empty(),
            _ => false,
        }
    }

    fn set_listener(&self, listener: Option<EditorListener>) {
        self.lock().listener = listener;
    }
}
