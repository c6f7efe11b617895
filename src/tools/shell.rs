//! Shell entry point for the agent's tool layer.
//!
//! Every command runs in an ephemeral container with the turn's workspace
//! mounted at the sandbox mount point. The agent may only pick a working
//! directory under that mount point.

use std::path::{Component, Path};
use std::sync::Arc;
use std::time::Duration;

use crate::context::{ExecutionContext, TurnContext, line_callback};
use crate::sandbox::{
    ContainerExecutor, ContainerResult, ContainerRun, LineCallback, SandboxError,
    StreamingHandle,
};
use crate::tools::alias::PathAlias;

/// Longest project slug kept in container names.
const MAX_SLUG_LEN: usize = 20;

/// Runs agent-issued commands in the turn's sandbox.
pub struct IsolatedShellFacade {
    executor: Arc<ContainerExecutor>,
    /// Overrides the executor's default timeout.
    timeout: Option<Duration>,
    network: bool,
}

impl std::fmt::Debug for IsolatedShellFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolatedShellFacade")
            .field("mount_point", &self.mount_point())
            .field("timeout", &self.timeout)
            .field("network", &self.network)
            .finish()
    }
}

impl IsolatedShellFacade {
    pub fn new(executor: Arc<ContainerExecutor>) -> Self {
        Self {
            executor,
            timeout: None,
            network: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_network(mut self, enabled: bool) -> Self {
        self.network = enabled;
        self
    }

    fn mount_point(&self) -> &str {
        &self.executor.config().mount_point
    }

    /// Run `command` to completion in the turn's sandbox.
    ///
    /// A non-zero exit is returned in the result, not as an error. Output and
    /// error messages show the mount point in place of the real workspace.
    pub async fn run_command(
        &self,
        turn: &TurnContext,
        working_directory: &str,
        command: &str,
    ) -> Result<ContainerResult, SandboxError> {
        let handle = self
            .run_command_async(turn, working_directory, command)
            .await?;
        let result = handle.finish().await;
        match &result {
            Ok(r) => tracing::debug!("Sandboxed command exited with {}", r.exit_code),
            Err(e) => tracing::warn!("Sandboxed command failed: {}", e),
        }
        result
    }

    /// Start `command` in the turn's sandbox and return without waiting.
    pub async fn run_command_async(
        &self,
        turn: &TurnContext,
        working_directory: &str,
        command: &str,
    ) -> Result<StreamingHandle, SandboxError> {
        let (context, run) = self.prepare(turn, working_directory, command).await?;
        let alias = PathAlias::new(context.workspace_path(), self.mount_point());
        let on_line = aliased_callback(&context, alias.clone());

        let handle = self.executor.start_async(&run, on_line)?;
        Ok(handle.with_output_rewrite(Arc::new(move |text: &str| alias.rewrite(text))))
    }

    async fn prepare(
        &self,
        turn: &TurnContext,
        working_directory: &str,
        command: &str,
    ) -> Result<(ExecutionContext, ContainerRun), SandboxError> {
        let context = turn.require().await?;
        if context.image().is_empty() || context.workspace_path().as_os_str().is_empty() {
            return Err(SandboxError::ContextNotSet);
        }
        validate_working_directory(working_directory, self.mount_point())?;

        tracing::debug!(
            "Sandboxed command in {} (workspace {}): {}",
            working_directory,
            context.workspace_id,
            command
        );

        let mut run = ContainerRun::new(context.image(), command, context.workspace_path())
            .working_dir(working_directory)
            .network(self.network)
            .name(container_name(&context));
        if let Some(timeout) = self.timeout {
            run = run.timeout(timeout);
        }
        Ok((context, run))
    }
}

/// Forward lines to the context's sink with the real path hidden.
fn aliased_callback(context: &ExecutionContext, alias: PathAlias) -> Option<LineCallback> {
    let forward = line_callback(context.sink()?);
    Some(Arc::new(move |line: &str, is_error: bool| {
        forward(&alias.rewrite(line), is_error)
    }))
}

/// Require `working_directory` to equal or descend from `mount_point`.
///
/// The check is component-wise and rejects `..` anywhere, so
/// `/workspace/../etc` and `/workspacefoo` both fail.
pub fn validate_working_directory(
    working_directory: &str,
    mount_point: &str,
) -> Result<(), SandboxError> {
    let path = Path::new(working_directory);
    let outside = || SandboxError::OutsideSandbox {
        path: working_directory.to_string(),
        mount_point: mount_point.to_string(),
    };

    if path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(outside());
    }
    if !path.starts_with(mount_point) {
        return Err(outside());
    }
    Ok(())
}

/// Logical container name for a turn: `<project>-<ws8>-<conv8>`.
///
/// Parts that are absent are left out. The executor adds a random suffix.
pub fn container_name(context: &ExecutionContext) -> String {
    let mut parts = Vec::new();
    if let Some(slug) = context.project_name.as_deref().map(slugify)
        && !slug.is_empty()
    {
        parts.push(slug);
    }
    parts.push(crate::workspace::short_id(&context.workspace_id));
    if let Some(conversation_id) = &context.conversation_id {
        parts.push(crate::workspace::short_id(conversation_id));
    }
    parts.join("-")
}

/// Lowercase `[a-z0-9-]` slug, dashes collapsed, at most 20 chars.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    let truncated: String = slug.chars().take(MAX_SLUG_LEN).collect();
    truncated.trim_end_matches('-').to_string()
}
