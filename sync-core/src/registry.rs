//! Per-project sync enablement.
//!
//! A project has an entry only while sync is enabled for it. Disabling
//! removes the entry and never needs the relay connection.

use inkwell_sync_types::ProjectId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sync bookkeeping for one project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSyncState {
    /// Whether updates for the project are exchanged.
    pub enabled: bool,
    /// Unix timestamp of the last delta sent or received.
    pub last_sync: Option<u64>,
    /// Local deltas not yet accepted by the relay.
    pub pending_updates: usize,
}

/// Registry of sync-enabled projects.
#[derive(Debug, Default)]
pub struct ProjectSyncRegistry {
    projects: HashMap<ProjectId, ProjectSyncState>,
}

impl ProjectSyncRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the entry for `project_id`. Re-enabling keeps existing counters.
    pub fn enable(&mut self, project_id: ProjectId) -> &ProjectSyncState {
        let state = self.projects.entry(project_id).or_default();
        state.enabled = true;
        state
    }

    /// Remove the entry for `project_id`, returning it if it existed.
    pub fn disable(&mut self, project_id: &ProjectId) -> Option<ProjectSyncState> {
        self.projects.remove(project_id)
    }

    /// Whether sync is enabled for `project_id`.
    pub fn is_enabled(&self, project_id: &ProjectId) -> bool {
        self.projects.get(project_id).is_some_and(|s| s.enabled)
    }

    /// State for `project_id`, if enabled.
    pub fn get(&self, project_id: &ProjectId) -> Option<&ProjectSyncState> {
        self.projects.get(project_id)
    }

    /// Record a delta exchanged at `timestamp`.
    pub fn record_sync(&mut self, project_id: &ProjectId, timestamp: u64) {
        if let Some(state) = self.projects.get_mut(project_id) {
            state.last_sync = Some(timestamp);
        }
    }

    /// Set the pending-update count.
    pub fn set_pending(&mut self, project_id: &ProjectId, pending: usize) {
        if let Some(state) = self.projects.get_mut(project_id) {
            state.pending_updates = pending;
        }
    }

    /// Enabled projects, sorted.
    pub fn enabled_projects(&self) -> Vec<ProjectId> {
        let mut ids: Vec<_> = self
            .projects
            .iter()
            .filter(|(_, s)| s.enabled)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    /// Number of registered projects.
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    /// True if no project is registered.
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}
