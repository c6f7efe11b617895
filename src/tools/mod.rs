//! Facades the agent's tool layer calls into.
//!
//! - [`IsolatedShellFacade`] runs shell commands in the turn's sandbox
//! - [`SecureFileFacade`] performs path-validated file operations
//!
//! Both present the workspace to the agent under the sandbox mount point
//! and never reveal its real location.

mod alias;
mod file;
mod shell;
mod tool;

pub use alias::PathAlias;
pub use file::SecureFileFacade;
pub use shell::{IsolatedShellFacade, container_name, validate_working_directory};
pub use tool::ToolError;
