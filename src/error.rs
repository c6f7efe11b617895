//! Error types for the workspace engine.
//!
//! Each subsystem has its own enum so callers can match on the failure class
//! they care about. [`Error`] aggregates all of them for callers that only
//! need to propagate.

use std::path::PathBuf;

use uuid::Uuid;

use crate::sandbox::SandboxError;
use crate::workspace::WorkspaceStatus;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Path error: {0}")]
    Path(#[from] PathError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Hosted repository error: {0}")]
    HostedRepo(#[from] HostedRepoError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Workspace lifecycle misuse. Always a caller bug, never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: WorkspaceStatus,
        to: WorkspaceStatus,
    },

    #[error("Cannot {operation} while workspace is {status}")]
    InvalidState {
        status: WorkspaceStatus,
        operation: &'static str,
    },
}

/// Path validation errors.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Path escapes workspace root: {path}")]
    PathTraversal { path: PathBuf },

    #[error("Cannot resolve {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Git command-line failures and git-related preconditions.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("Workspace {workspace_id} has no branch; run setup first")]
    MissingBranch { workspace_id: Uuid },

    #[error("Cannot parse owner/repo from git URL: {url}")]
    UnparseableRepoUrl { url: String },

    #[error("git {command} failed with exit code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Failed to run git: {0}")]
    Io(#[from] std::io::Error),
}

/// Hosted git provider API failures.
#[derive(Debug, thiserror::Error)]
pub enum HostedRepoError {
    #[error("Request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

/// Persistence seam failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Workspace {id} not found")]
    WorkspaceNotFound { id: Uuid },

    #[error("Project {id} not found")]
    ProjectNotFound { id: Uuid },

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Failures raised while setting up a workspace.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Failed to prepare workspace directory {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Setup step '{step}' exited with code {exit_code}: {output}")]
    StepFailed {
        step: String,
        exit_code: i64,
        output: String,
    },
}

/// Result type alias using the top-level error.
pub type Result<T> = std::result::Result<T, Error>;
