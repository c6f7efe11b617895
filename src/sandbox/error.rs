//! Error types for sandboxed execution.

use std::time::Duration;

/// Errors that can occur while running commands in containers.
///
/// A command that exits non-zero is *not* an error; only failures of the
/// isolation runtime itself, contract violations and timeouts are.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// No execution context was set for the current turn.
    #[error("Execution context not set: workspace path and container image are required")]
    ContextNotSet,

    /// Requested working directory is not inside the sandbox mount point.
    #[error("Working directory {path} is outside the sandbox mount point {mount_point}")]
    OutsideSandbox { path: String, mount_point: String },

    /// The container image is missing and could not be fetched.
    #[error("Container image not found: {image}")]
    ImageNotFound { image: String, output: String },

    /// The runtime refused access (daemon socket or mount).
    #[error("Permission denied by container runtime: {output}")]
    PermissionDenied { output: String },

    /// The runtime failed before or around the command (exit code >= 125).
    #[error("Container runtime failed with exit code {exit_code}: {output}")]
    ExecutorFailure { exit_code: i64, output: String },

    /// Command exceeded its timeout.
    #[error("Command timed out after {0:?}")]
    ExecutionTimeout(Duration),

    /// The runtime binary could not be started.
    #[error("Failed to start container runtime '{runtime}': {source}")]
    SpawnFailed {
        runtime: String,
        #[source]
        source: std::io::Error,
    },

    /// Docker daemon is not available or not running.
    #[error("Docker not available: {reason}")]
    DockerNotAvailable { reason: String },

    /// Pulling an image failed.
    #[error("Failed to pull image {image}: {reason}")]
    ImagePullFailed { image: String, reason: String },

    /// Docker API error.
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;
