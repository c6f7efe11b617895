//! Committing workspace changes and opening the pull request.

use std::path::PathBuf;
use std::sync::Arc;

use crate::context::TurnContext;
use crate::error::{GitError, Result};
use crate::git::cli::{CommitAuthor, GitAdapter};
use crate::git::hosted::{HostedRepoAdapter, NewPullRequest};
use crate::git::url::parse_repo_url;
use crate::projects::ProjectCatalog;
use crate::workspace::{PathResolver, Workspace, WorkspaceStore};

/// Ships a workspace's edits to the hosting provider.
pub struct GitOpsService {
    git: Arc<dyn GitAdapter>,
    hosted: Arc<dyn HostedRepoAdapter>,
    projects: Arc<dyn ProjectCatalog>,
    store: Arc<dyn WorkspaceStore>,
    paths: PathResolver,
}

impl GitOpsService {
    pub fn new(
        git: Arc<dyn GitAdapter>,
        hosted: Arc<dyn HostedRepoAdapter>,
        projects: Arc<dyn ProjectCatalog>,
        store: Arc<dyn WorkspaceStore>,
        paths: PathResolver,
    ) -> Self {
        Self {
            git,
            hosted,
            projects,
            store,
            paths,
        }
    }

    fn checkout_dir(&self, workspace: &Workspace) -> PathBuf {
        self.paths.workspace_dir(&workspace.id.to_string())
    }

    /// Commit every change in the workspace and push its branch.
    ///
    /// Returns `false` without touching the repository when the working
    /// tree is clean.
    #[tracing::instrument(skip_all, fields(workspace_id = %workspace.id))]
    pub async fn commit_and_push(
        &self,
        workspace: &Workspace,
        message: &str,
        author_email: &str,
    ) -> Result<bool> {
        let branch = require_branch(workspace)?;
        let dir = self.checkout_dir(workspace);

        if !self.git.has_changes(&dir).await? {
            tracing::debug!("Nothing to commit in workspace {}", workspace.id);
            return Ok(false);
        }

        let project = self.projects.get_project(workspace.project_id).await?;
        let author = CommitAuthor::from_email(author_email);

        self.git.stage_all(&dir).await?;
        self.git.commit(&dir, message, &author).await?;
        self.git.push(&dir, branch, &project.access_token).await?;

        tracing::info!("Pushed {} for workspace {}", branch, workspace.id);
        Ok(true)
    }

    /// Like [`GitOpsService::commit_and_push`], preferring a commit message
    /// the agent suggested during the turn over `fallback_message`.
    pub async fn commit_and_push_suggested(
        &self,
        workspace: &Workspace,
        turn: &TurnContext,
        author_email: &str,
        fallback_message: &str,
    ) -> Result<bool> {
        let message = turn
            .take_suggested_commit_message()
            .await
            .unwrap_or_else(|| fallback_message.to_string());
        self.commit_and_push(workspace, &message, author_email)
            .await
    }

    /// Return the workspace's pull request URL, opening one if needed.
    ///
    /// The URL is cached on the workspace, so repeated calls make no API
    /// requests once it is known.
    #[tracing::instrument(skip_all, fields(workspace_id = %workspace.id))]
    pub async fn ensure_pull_request(&self, workspace: &mut Workspace) -> Result<String> {
        let branch = require_branch(workspace)?.to_string();
        let project = self.projects.get_project(workspace.project_id).await?;
        let repo = parse_repo_url(&project.git_url)?;

        if let Some(url) = &workspace.pull_request_url {
            return Ok(url.clone());
        }

        let token = &project.access_token;
        let url = match self
            .hosted
            .find_open_pull_request(&repo, &branch, token)
            .await?
        {
            Some(existing) => {
                tracing::debug!("Reusing pull request #{} for {}", existing.number, branch);
                existing.url
            }
            None => {
                let base = self.hosted.default_branch(&repo, token).await?;
                let request = NewPullRequest {
                    title: format!("{}: changes from {}", project.name, branch),
                    body: format!(
                        "Changes made in workspace `{}` of {}.\n\nBranch: `{}`",
                        workspace.short_id(),
                        project.name,
                        branch
                    ),
                    head: branch.clone(),
                    base,
                };
                self.hosted
                    .create_pull_request(&repo, &request, token)
                    .await?
                    .url
            }
        };

        workspace.pull_request_url = Some(url.clone());
        self.store.save(workspace).await?;
        Ok(url)
    }
}

fn require_branch(workspace: &Workspace) -> std::result::Result<&str, GitError> {
    workspace
        .branch_name
        .as_deref()
        .ok_or(GitError::MissingBranch {
            workspace_id: workspace.id,
        })
}
