//! Workspace setup: fresh checkout, working branch, project bootstrap.
//!
//! ```text
//! AVAILABLE_FOR_SETUP / MERGED
//!          │ setup()
//!          ▼
//!      IN_SETUP ──▶ reset dir ──▶ clone ──▶ branch ──▶ bootstrap steps
//!          │                                                 │
//!          │ any failure                                     │ ok
//!          ▼                                                 ▼
//!       PROBLEM                                AVAILABLE_FOR_CONVERSATION
//! ```

pub mod steps;

pub use steps::{
    ContainerStepRunner, SetupStep, SetupStepRegistry, SetupStepRunner, StaticStepRegistry,
};

use std::sync::Arc;

use chrono::Utc;

use crate::error::{LifecycleError, SetupError};
use crate::git::GitAdapter;
use crate::projects::ProjectCatalog;
use crate::workspace::{
    FilesystemAdapter, PathResolver, StatusGuard, Workspace, WorkspaceStatus, WorkspaceStore,
};

/// Working branch name for a setup pass started now.
pub fn branch_name(workspace: &Workspace) -> String {
    format!(
        "ws-{}-{}",
        workspace.short_id(),
        Utc::now().format("%Y%m%d%H%M%S")
    )
}

/// Drives a workspace from needing setup to ready for conversation.
pub struct SetupOrchestrator {
    store: Arc<dyn WorkspaceStore>,
    projects: Arc<dyn ProjectCatalog>,
    fs: Arc<dyn FilesystemAdapter>,
    git: Arc<dyn GitAdapter>,
    registry: Arc<dyn SetupStepRegistry>,
    runner: Arc<dyn SetupStepRunner>,
    paths: PathResolver,
}

impl SetupOrchestrator {
    pub fn new(
        store: Arc<dyn WorkspaceStore>,
        projects: Arc<dyn ProjectCatalog>,
        fs: Arc<dyn FilesystemAdapter>,
        git: Arc<dyn GitAdapter>,
        registry: Arc<dyn SetupStepRegistry>,
        runner: Arc<dyn SetupStepRunner>,
        paths: PathResolver,
    ) -> Self {
        Self {
            store,
            projects,
            fs,
            git,
            registry,
            runner,
            paths,
        }
    }

    /// Set the workspace up from scratch.
    ///
    /// Accepts a workspace already claimed (`IN_SETUP`). Any failure after
    /// the claim leaves it in `PROBLEM` before the error is returned.
    #[tracing::instrument(skip_all, fields(workspace_id = %workspace.id))]
    pub async fn setup(&self, workspace: &mut Workspace) -> Result<(), SetupError> {
        if workspace.status() != WorkspaceStatus::InSetup {
            if !StatusGuard::needs_setup(workspace.status()) {
                return Err(LifecycleError::InvalidState {
                    status: workspace.status(),
                    operation: "set up",
                }
                .into());
            }
            workspace.transition_to(WorkspaceStatus::InSetup)?;
            self.store.save(workspace).await?;
        }

        match self.prepare(workspace).await {
            Ok(()) => {
                workspace.transition_to(WorkspaceStatus::AvailableForConversation)?;
                self.store.save(workspace).await?;
                tracing::info!("Workspace {} set up", workspace.id);
                Ok(())
            }
            Err(e) => {
                tracing::error!("Setup of workspace {} failed: {}", workspace.id, e);
                self.mark_problem(workspace).await;
                Err(e)
            }
        }
    }

    async fn prepare(&self, workspace: &mut Workspace) -> Result<(), SetupError> {
        let dir = self.paths.workspace_dir(&workspace.id.to_string());
        let root = self.paths.workspaces_root();

        self.fs
            .remove_dir(&dir)
            .await
            .map_err(|source| SetupError::Filesystem {
                path: dir.clone(),
                source,
            })?;
        self.fs
            .create_dir(root)
            .await
            .map_err(|source| SetupError::Filesystem {
                path: root.to_path_buf(),
                source,
            })?;

        let project = self.projects.get_project(workspace.project_id).await?;
        tracing::info!("Cloning {} for workspace {}", project.name, workspace.id);
        self.git
            .clone_repo(&project.git_url, &project.access_token, &dir)
            .await?;

        let branch = branch_name(workspace);
        self.git.create_branch(&dir, &branch).await?;
        workspace.start_branch(branch);
        self.store.save(workspace).await?;

        let steps = self.registry.steps_for(&project.project_type).await?;
        if steps.is_empty() {
            tracing::debug!("No setup steps for project type {}", project.project_type);
            return Ok(());
        }
        self.runner
            .run_steps(&dir, project.agent_image.as_deref(), &steps)
            .await
    }

    /// Best effort: the original failure is what the caller needs to see.
    async fn mark_problem(&self, workspace: &mut Workspace) {
        if let Err(e) = workspace.transition_to(WorkspaceStatus::Problem) {
            tracing::error!("Cannot mark workspace {} as problem: {}", workspace.id, e);
            return;
        }
        if let Err(e) = self.store.save(workspace).await {
            tracing::error!("Failed to persist problem state for {}: {}", workspace.id, e);
        }
    }
}
