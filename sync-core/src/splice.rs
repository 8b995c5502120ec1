//! Single-range text edits.
//!
//! The document adapter turns "editor text changed from A to B" into one
//! [`TextSplice`] so only the edited range is written to the CRDT container.
//! When a peer's change landed in the container but has not reached the editor
//! yet, the local splice is rebased over it first.
//!
//! All positions and lengths count Unicode scalar values.

/// Replace `delete` characters at `start` with `insert`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSplice {
    /// Start position.
    pub start: usize,
    /// Number of characters removed.
    pub delete: usize,
    /// Text inserted at `start`.
    pub insert: String,
}

impl TextSplice {
    /// The smallest splice turning `old` into `new` (common prefix and suffix kept).
    pub fn between(old: &str, new: &str) -> Self {
        let old_chars: Vec<char> = old.chars().collect();
        let new_chars: Vec<char> = new.chars().collect();

        let prefix = old_chars
            .iter()
            .zip(&new_chars)
            .take_while(|(a, b)| a == b)
            .count();
        let max_suffix = old_chars.len().min(new_chars.len()) - prefix;
        let suffix = old_chars
            .iter()
            .rev()
            .zip(new_chars.iter().rev())
            .take(max_suffix)
            .take_while(|(a, b)| a == b)
            .count();

        Self {
            start: prefix,
            delete: old_chars.len() - prefix - suffix,
            insert: new_chars[prefix..new_chars.len() - suffix].iter().collect(),
        }
    }

    /// True if applying the splice changes nothing.
    pub fn is_noop(&self) -> bool {
        self.delete == 0 && self.insert.is_empty()
    }

    fn end(&self) -> usize {
        self.start + self.delete
    }

    fn inserted_len(&self) -> usize {
        self.insert.chars().count()
    }

    /// Apply to `text`. Out-of-range positions are clamped.
    pub fn apply(&self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let start = self.start.min(chars.len());
        let end = self.end().min(chars.len());

        let mut out: String = chars[..start].iter().collect();
        out.push_str(&self.insert);
        out.extend(&chars[end..]);
        out
    }

    /// Move this splice (made against `base`) so it applies after `other`
    /// (also made against `base`).
    ///
    /// Disjoint edits keep their content. Where both edits touch the same
    /// range, this splice's version of that range wins.
    pub fn rebase(&self, other: &TextSplice, base: &str) -> TextSplice {
        let shift = other.inserted_len() as isize - other.delete as isize;

        if self.end() <= other.start {
            return self.clone();
        }
        if self.start >= other.end() {
            return TextSplice {
                start: (self.start as isize + shift) as usize,
                delete: self.delete,
                insert: self.insert.clone(),
            };
        }

        // Overlap: replace the union of both ranges with our version of it.
        let base_chars: Vec<char> = base.chars().collect();
        let union_start = self.start.min(other.start);
        let union_end = self.end().max(other.end()).min(base_chars.len());

        let mut insert: String = base_chars[union_start..self.start.min(union_end)]
            .iter()
            .collect();
        insert.push_str(&self.insert);
        if self.end() < union_end {
            insert.extend(&base_chars[self.end()..union_end]);
        }

        TextSplice {
            start: union_start,
            delete: ((union_end - union_start) as isize + shift) as usize,
            insert,
        }
    }
}
