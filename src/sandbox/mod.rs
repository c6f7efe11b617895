//! Sandboxed command execution in ephemeral containers.
//!
//! Every run gets a fresh container with the workspace bind-mounted at a
//! fixed mount point, resource limits, and an optional network cut-off.
//! Runs can be awaited or started in the background and polled through a
//! [`StreamingHandle`].

pub mod config;
pub mod container;
pub mod error;
pub mod handle;
pub mod runtime;

pub use config::{ContainerConfig, DEFAULT_MOUNT_POINT, PathMapping};
pub use container::{ContainerExecutor, ContainerRun, classify_exit};
pub use error::SandboxError;
pub use handle::{ContainerResult, LineCallback, OutputRewrite, StreamingHandle};
pub use runtime::{DaemonProbe, connect_docker};
