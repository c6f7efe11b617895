//! Conversation, review and recovery transitions.
//!
//! Setup has its own orchestrator; everything else that moves a workspace
//! between states lives here so each change is validated and persisted the
//! same way.

use std::sync::Arc;

use crate::error::{LifecycleError, Result};
use crate::workspace::{StatusGuard, Workspace, WorkspaceStatus, WorkspaceStore};

/// Applies guarded status changes and persists them.
pub struct WorkspaceLifecycle {
    store: Arc<dyn WorkspaceStore>,
}

impl WorkspaceLifecycle {
    pub fn new(store: Arc<dyn WorkspaceStore>) -> Self {
        Self { store }
    }

    /// Claim a workspace for setup ahead of running it on a background task.
    ///
    /// The orchestrator accepts a workspace already in `IN_SETUP`, so a
    /// caller can mark it synchronously and hand the slow part off.
    pub async fn claim_for_setup(&self, workspace: &mut Workspace) -> Result<()> {
        if !StatusGuard::needs_setup(workspace.status()) {
            return Err(LifecycleError::InvalidState {
                status: workspace.status(),
                operation: "claim for setup",
            }
            .into());
        }
        self.apply(workspace, WorkspaceStatus::InSetup).await
    }

    /// Start a conversation on a workspace that has been set up.
    pub async fn begin_conversation(&self, workspace: &mut Workspace) -> Result<()> {
        if !StatusGuard::can_start_conversation(workspace.status())
            || StatusGuard::needs_setup(workspace.status())
        {
            return Err(LifecycleError::InvalidState {
                status: workspace.status(),
                operation: "start a conversation",
            }
            .into());
        }
        self.apply(workspace, WorkspaceStatus::InConversation).await
    }

    /// Release the workspace after a conversation ends without review.
    pub async fn end_conversation(&self, workspace: &mut Workspace) -> Result<()> {
        self.apply(workspace, WorkspaceStatus::AvailableForConversation)
            .await
    }

    pub async fn submit_for_review(&self, workspace: &mut Workspace) -> Result<()> {
        self.apply(workspace, WorkspaceStatus::InReview).await
    }

    /// Send a reviewed workspace back for more changes.
    pub async fn reopen(&self, workspace: &mut Workspace) -> Result<()> {
        if workspace.status() != WorkspaceStatus::InReview {
            return Err(LifecycleError::InvalidState {
                status: workspace.status(),
                operation: "reopen",
            }
            .into());
        }
        self.apply(workspace, WorkspaceStatus::AvailableForConversation)
            .await
    }

    /// Record that the pull request was merged. The next conversation will
    /// set the workspace up again on a fresh branch.
    pub async fn mark_merged(&self, workspace: &mut Workspace) -> Result<()> {
        self.apply(workspace, WorkspaceStatus::Merged).await?;
        workspace.pull_request_url = None;
        self.store.save(workspace).await?;
        Ok(())
    }

    pub async fn mark_problem(&self, workspace: &mut Workspace) -> Result<()> {
        self.apply(workspace, WorkspaceStatus::Problem).await
    }

    /// Return a broken workspace to the setup queue.
    pub async fn reset(&self, workspace: &mut Workspace) -> Result<()> {
        self.apply(workspace, WorkspaceStatus::AvailableForSetup)
            .await
    }

    async fn apply(&self, workspace: &mut Workspace, to: WorkspaceStatus) -> Result<()> {
        workspace.transition_to(to)?;
        self.store.save(workspace).await?;
        Ok(())
    }
}
