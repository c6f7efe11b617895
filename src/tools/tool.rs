//! Error type shared by the agent-facing tool facades.

use thiserror::Error;

use crate::error::PathError;
use crate::sandbox::SandboxError;

/// Error returned to the agent's tool layer.
///
/// Messages are plain strings so they can be rewritten to the sandbox alias
/// before the agent sees them.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),
}

impl ToolError {
    /// Apply `f` to the message, keeping the variant.
    pub fn map_message(self, f: impl FnOnce(&str) -> String) -> Self {
        match self {
            ToolError::InvalidParameters(m) => ToolError::InvalidParameters(f(&m)),
            ToolError::ExecutionFailed(m) => ToolError::ExecutionFailed(f(&m)),
            ToolError::NotAuthorized(m) => ToolError::NotAuthorized(f(&m)),
            ToolError::Sandbox(m) => ToolError::Sandbox(f(&m)),
        }
    }
}

impl From<std::io::Error> for ToolError {
    fn from(err: std::io::Error) -> Self {
        ToolError::ExecutionFailed(err.to_string())
    }
}

impl From<PathError> for ToolError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::PathTraversal { .. } => ToolError::NotAuthorized(err.to_string()),
            PathError::Io { .. } => ToolError::ExecutionFailed(err.to_string()),
        }
    }
}

impl From<SandboxError> for ToolError {
    fn from(err: SandboxError) -> Self {
        ToolError::Sandbox(err.to_string())
    }
}
