//! Project payloads loaded when a project is opened.

use serde::{Deserialize, Serialize};

use crate::{DocumentSlug, ProjectId};

/// Top-level description of an opened project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectManifest {
    /// The project identifier.
    pub project_id: ProjectId,
    /// Display title.
    pub title: String,
    /// Documents (chapters, notes) in binder order.
    pub documents: Vec<DocumentSlug>,
}

/// A codex entry (character, place, ...) belonging to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Entry identifier.
    pub id: String,
    /// Collection the entry belongs to, e.g. `character` or `place`.
    pub kind: String,
    /// Display name.
    pub name: String,
}
