//! Workspaces: isolated checkouts of a project's repository.
//!
//! A workspace is assigned to at most one active conversation at a time and
//! moves through the lifecycle in [`status`]. Its directory lives at
//! `<workspaces_root>/<workspace_id>` and is recreated on every setup pass.

mod fs;
mod lifecycle;
mod paths;
mod status;
mod store;

pub use fs::{FilesystemAdapter, LocalFilesystem};
pub use lifecycle::WorkspaceLifecycle;
pub use paths::{PathResolver, canonicalize_lenient, normalize_lexically};
pub use status::{StatusGuard, WorkspaceStatus};
pub use store::{InMemoryWorkspaceStore, WorkspaceStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LifecycleError;

/// A checked-out copy of a project's repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Changed only through [`Workspace::transition_to`].
    status: WorkspaceStatus,
    /// Assigned during setup; present iff setup completed at least once.
    pub branch_name: Option<String>,
    /// Cached once a pull request exists for the branch.
    pub pull_request_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    /// Create a workspace ready for its first setup pass.
    pub fn new(project_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            status: WorkspaceStatus::AvailableForSetup,
            branch_name: None,
            pull_request_url: None,
            created_at: Utc::now(),
        }
    }

    pub fn status(&self) -> WorkspaceStatus {
        self.status
    }

    /// Record a freshly created working branch.
    ///
    /// Any cached pull request belonged to the previous branch and is dropped.
    pub fn start_branch(&mut self, branch: impl Into<String>) {
        self.branch_name = Some(branch.into());
        self.pull_request_url = None;
    }

    /// Fixture in an arbitrary status, skipping the guard.
    #[cfg(test)]
    pub(crate) fn with_status(mut self, status: WorkspaceStatus) -> Self {
        self.status = status;
        self
    }

    /// Move to `to`, rejecting anything the [`StatusGuard`] disallows.
    pub fn transition_to(&mut self, to: WorkspaceStatus) -> Result<(), LifecycleError> {
        StatusGuard::validate_transition(self.status, to)?;
        tracing::info!(workspace_id = %self.id, "Workspace {} -> {}", self.status, to);
        self.status = to;
        Ok(())
    }

    /// First eight characters of the id, used in branch and container names.
    pub fn short_id(&self) -> String {
        short_id(&self.id)
    }
}

/// First eight characters of a UUID's hyphenated form.
pub fn short_id(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}
