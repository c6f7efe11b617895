//! Configuration for sandboxed container runs.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default in-container path the workspace is mounted at.
pub const DEFAULT_MOUNT_POINT: &str = "/workspace";

/// Default per-run timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Settings shared by every container run.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Container CLI binary (`docker`, `podman`, ...).
    pub runtime: String,
    /// Where the workspace is mounted inside the container.
    pub mount_point: String,
    /// Memory ceiling passed to `--memory`.
    pub memory_limit: String,
    /// Relative CPU weight passed to `--cpu-shares`.
    pub cpu_shares: u32,
    /// Node heap hint for build tooling, in megabytes.
    pub heap_size_mb: u32,
    /// Timeout applied when a run does not set its own.
    pub default_timeout: Duration,
    /// Translation from our filesystem view to the daemon's.
    pub path_mapping: PathMapping,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            mount_point: DEFAULT_MOUNT_POINT.to_string(),
            memory_limit: "2g".to_string(),
            cpu_shares: 1024,
            heap_size_mb: 4096,
            default_timeout: DEFAULT_TIMEOUT,
            path_mapping: PathMapping::identity(),
        }
    }
}

/// Maps mount paths from the orchestrator's filesystem to the host's.
///
/// When the orchestrator itself runs in a container and talks to the host
/// daemon over a socket, bind-mount sources are resolved by the daemon
/// against the host filesystem. A workspace at `/data/workspaces/w1` inside
/// our container may live at `/srv/app/workspaces/w1` on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapping {
    container_base: PathBuf,
    host_base: PathBuf,
}

impl PathMapping {
    pub fn new(container_base: impl Into<PathBuf>, host_base: impl Into<PathBuf>) -> Self {
        Self {
            container_base: container_base.into(),
            host_base: host_base.into(),
        }
    }

    /// A mapping that never rewrites, for orchestrators running on the host.
    pub fn identity() -> Self {
        Self::new("", "")
    }

    pub fn is_identity(&self) -> bool {
        self.container_base == self.host_base
    }

    /// Rewrite `path` to the host's view.
    ///
    /// Paths outside the container base pass through unchanged; the
    /// security boundary is path resolution, not this mapping.
    pub fn to_host(&self, path: &Path) -> PathBuf {
        if self.is_identity() {
            return path.to_path_buf();
        }
        match path.strip_prefix(&self.container_base) {
            Ok(rest) if rest.as_os_str().is_empty() => self.host_base.clone(),
            Ok(rest) => self.host_base.join(rest),
            Err(_) => path.to_path_buf(),
        }
    }
}
