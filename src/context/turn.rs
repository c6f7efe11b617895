//! Execution context for one agent turn.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::context::OutputSink;
use crate::sandbox::SandboxError;

/// Values every sandboxed call of a single turn needs.
///
/// Built by the turn orchestrator, installed on a [`TurnContext`] before the
/// first tool call and cleared when the turn ends.
#[derive(Clone)]
pub struct ExecutionContext {
    pub workspace_id: Uuid,
    /// Real path of the workspace directory. Never shown to the agent.
    pub workspace_path: PathBuf,
    pub conversation_id: Option<Uuid>,
    pub project_name: Option<String>,
    /// Manifests of remote assets the agent may reference.
    pub asset_manifest_urls: Vec<String>,
    image: String,
    /// Images displaced by overrides, most recent last.
    image_stack: Vec<String>,
    sink: Option<Arc<dyn OutputSink>>,
    suggested_commit_message: Option<String>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("workspace_id", &self.workspace_id)
            .field("workspace_path", &self.workspace_path)
            .field("conversation_id", &self.conversation_id)
            .field("project_name", &self.project_name)
            .field("image", &self.image)
            .field("image_stack", &self.image_stack)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}

impl ExecutionContext {
    pub fn new(
        workspace_id: Uuid,
        workspace_path: impl Into<PathBuf>,
        image: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id,
            workspace_path: workspace_path.into(),
            conversation_id: None,
            project_name: None,
            asset_manifest_urls: Vec::new(),
            image: image.into(),
            image_stack: Vec::new(),
            sink: None,
            suggested_commit_message: None,
        }
    }

    pub fn with_conversation(mut self, conversation_id: Uuid) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = Some(name.into());
        self
    }

    pub fn with_asset_manifests(mut self, urls: Vec<String>) -> Self {
        self.asset_manifest_urls = urls;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn workspace_path(&self) -> &Path {
        &self.workspace_path
    }

    /// Image commands currently run in.
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn sink(&self) -> Option<Arc<dyn OutputSink>> {
        self.sink.clone()
    }

    /// Switch to `image`, remembering the current one.
    pub fn override_image(&mut self, image: impl Into<String>) {
        let previous = std::mem::replace(&mut self.image, image.into());
        self.image_stack.push(previous);
    }

    /// Undo the most recent override. Returns the image now in effect, or
    /// `None` when there was nothing to restore.
    pub fn restore_image(&mut self) -> Option<&str> {
        let previous = self.image_stack.pop()?;
        self.image = previous;
        Some(&self.image)
    }

    pub fn override_depth(&self) -> usize {
        self.image_stack.len()
    }
}

/// Holder for the current turn's [`ExecutionContext`].
///
/// One per turn; never shared between concurrent turns.
#[derive(Debug, Default)]
pub struct TurnContext {
    inner: RwLock<Option<ExecutionContext>>,
}

impl TurnContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_context(&self, context: ExecutionContext) {
        tracing::debug!(
            "Execution context set for workspace {} (image {})",
            context.workspace_id,
            context.image
        );
        *self.inner.write().await = Some(context);
    }

    /// Remove the context, returning it.
    pub async fn clear_context(&self) -> Option<ExecutionContext> {
        self.inner.write().await.take()
    }

    pub async fn is_set(&self) -> bool {
        self.inner.read().await.is_some()
    }

    /// Copy of the current context.
    pub async fn snapshot(&self) -> Option<ExecutionContext> {
        self.inner.read().await.clone()
    }

    /// Current context or `ContextNotSet`.
    pub async fn require(&self) -> Result<ExecutionContext, SandboxError> {
        self.snapshot().await.ok_or(SandboxError::ContextNotSet)
    }

    pub async fn override_agent_image(&self, image: impl Into<String>) -> Result<(), SandboxError> {
        let mut guard = self.inner.write().await;
        let context = guard.as_mut().ok_or(SandboxError::ContextNotSet)?;
        let image = image.into();
        tracing::debug!("Overriding agent image {} -> {}", context.image, image);
        context.override_image(image);
        Ok(())
    }

    /// Undo the most recent override. A restore without a pending override
    /// leaves the image unchanged.
    pub async fn restore_agent_image(&self) -> Result<String, SandboxError> {
        let mut guard = self.inner.write().await;
        let context = guard.as_mut().ok_or(SandboxError::ContextNotSet)?;
        context.restore_image();
        Ok(context.image.clone())
    }

    /// Record a commit message proposed by the agent during the turn.
    pub async fn suggest_commit_message(
        &self,
        message: impl Into<String>,
    ) -> Result<(), SandboxError> {
        let mut guard = self.inner.write().await;
        let context = guard.as_mut().ok_or(SandboxError::ContextNotSet)?;
        context.suggested_commit_message = Some(message.into());
        Ok(())
    }

    /// Take the suggested commit message, leaving none behind.
    pub async fn take_suggested_commit_message(&self) -> Option<String> {
        self.inner
            .write()
            .await
            .as_mut()
            .and_then(|c| c.suggested_commit_message.take())
            .filter(|m| !m.trim().is_empty())
    }
}
