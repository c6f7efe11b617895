//! Project metadata consumed from the embedding application.

use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;

/// A tracked repository that workspaces are checked out from.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: Uuid,
    /// Display name, also used to derive container names.
    pub name: String,
    pub git_url: String,
    /// Token used for clone, push and the hosting API. Never logged.
    pub access_token: SecretString,
    /// Key into the setup-step registry (e.g. "nextjs", "astro").
    pub project_type: String,
    /// Image the agent's commands run in, if the project overrides the default.
    pub agent_image: Option<String>,
}

impl Project {
    pub fn new(
        name: impl Into<String>,
        git_url: impl Into<String>,
        access_token: impl Into<String>,
        project_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            git_url: git_url.into(),
            access_token: SecretString::from(access_token.into()),
            project_type: project_type.into(),
            agent_image: None,
        }
    }

    pub fn with_agent_image(mut self, image: impl Into<String>) -> Self {
        self.agent_image = Some(image.into());
        self
    }
}

/// Lookup of project metadata by id.
#[async_trait]
pub trait ProjectCatalog: Send + Sync {
    async fn find_project(&self, id: Uuid) -> Result<Option<Project>, StoreError>;

    /// Like [`ProjectCatalog::find_project`] but a missing project is an error.
    async fn get_project(&self, id: Uuid) -> Result<Project, StoreError> {
        self.find_project(id)
            .await?
            .ok_or(StoreError::ProjectNotFound { id })
    }
}

/// Process-local catalog.
#[derive(Debug, Default)]
pub struct InMemoryProjectCatalog {
    projects: RwLock<HashMap<Uuid, Project>>,
}

impl InMemoryProjectCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, project: Project) {
        self.projects.write().await.insert(project.id, project);
    }
}

#[async_trait]
impl ProjectCatalog for InMemoryProjectCatalog {
    async fn find_project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        Ok(self.projects.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[tokio::test]
    async fn test_get_project() {
        let catalog = InMemoryProjectCatalog::new();
        let project = Project::new("Site", "https://github.com/o/r.git", "ghp_x", "nextjs");
        let id = project.id;
        catalog.insert(project).await;

        let loaded = catalog.get_project(id).await.unwrap();
        assert_eq!(loaded.name, "Site");
        assert_eq!(loaded.access_token.expose_secret(), "ghp_x");
    }

    #[tokio::test]
    async fn test_get_missing_project() {
        let catalog = InMemoryProjectCatalog::new();
        let err = catalog.get_project(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StoreError::ProjectNotFound { .. }));
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let project = Project::new("Site", "https://github.com/o/r", "ghp_secret", "astro");
        assert!(!format!("{:?}", project).contains("ghp_secret"));
    }
}
