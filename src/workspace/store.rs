//! Persistence seam for workspace rows.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::workspace::{Workspace, WorkspaceStatus};

/// Workspace persistence, provided by the embedding application.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Workspace>, StoreError>;

    async fn find_by_project(&self, project_id: Uuid) -> Result<Vec<Workspace>, StoreError>;

    async fn find_by_status(&self, status: WorkspaceStatus)
    -> Result<Vec<Workspace>, StoreError>;

    /// Insert or overwrite the row for `workspace.id`.
    async fn save(&self, workspace: &Workspace) -> Result<(), StoreError>;
}

/// Process-local store, for wiring without a database and for tests.
#[derive(Debug, Default)]
pub struct InMemoryWorkspaceStore {
    rows: RwLock<HashMap<Uuid, Workspace>>,
}

impl InMemoryWorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkspaceStore for InMemoryWorkspaceStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Workspace>, StoreError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_by_project(&self, project_id: Uuid) -> Result<Vec<Workspace>, StoreError> {
        let mut found: Vec<_> = self
            .rows
            .read()
            .await
            .values()
            .filter(|w| w.project_id == project_id)
            .cloned()
            .collect();
        found.sort_by_key(|w| w.created_at);
        Ok(found)
    }

    async fn find_by_status(
        &self,
        status: WorkspaceStatus,
    ) -> Result<Vec<Workspace>, StoreError> {
        let mut found: Vec<_> = self
            .rows
            .read()
            .await
            .values()
            .filter(|w| w.status() == status)
            .cloned()
            .collect();
        found.sort_by_key(|w| w.created_at);
        Ok(found)
    }

    async fn save(&self, workspace: &Workspace) -> Result<(), StoreError> {
        self.rows
            .write()
            .await
            .insert(workspace.id, workspace.clone());
        Ok(())
    }
}
