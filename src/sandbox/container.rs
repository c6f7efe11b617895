//! Ephemeral container execution through the container CLI.
//!
//! # Container Setup
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                    Ephemeral Container (--rm)                          │
//! │                                                                        │
//! │  Name:     <logical-name>-<8 random hex>                               │
//! │                                                                        │
//! │  Environment:                                                          │
//! │    NODE_OPTIONS=--max-old-space-size=<heap_size_mb>                    │
//! │                                                                        │
//! │  Mounts:                                                               │
//! │    <mount point> ─▶ workspace directory, translated to the host view  │
//! │                     (rw)                                               │
//! │                                                                        │
//! │  Limits:                                                               │
//! │    Memory: 2g (default)                                                │
//! │    CPU: 1024 shares                                                    │
//! │    Network: default bridge, or none                                    │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A non-zero exit from the command is returned as normal output. Only the
//! exit codes the runtime reserves for itself (125 and above) are treated as
//! failures.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use tokio::process::Command;

use crate::sandbox::config::ContainerConfig;
use crate::sandbox::error::{Result, SandboxError};
use crate::sandbox::handle::{ContainerResult, LineCallback, StreamingHandle};
use crate::sandbox::runtime::DaemonProbe;

/// Exit codes at or above this come from the runtime, not the command.
pub const RUNTIME_EXIT_CODE_FLOOR: i64 = 125;

/// Logical name used when a run does not supply one.
const DEFAULT_LOGICAL_NAME: &str = "sandbox";

/// One isolated command execution.
#[derive(Debug, Clone)]
pub struct ContainerRun {
    pub image: String,
    pub command: String,
    /// Directory bind-mounted at the mount point, in our filesystem view.
    pub mount_path: PathBuf,
    /// Working directory inside the container. Defaults to the mount point.
    pub working_dir: Option<String>,
    /// Overrides the configured default timeout.
    pub timeout: Option<Duration>,
    pub network: bool,
    /// Logical container name. A random suffix is always appended.
    pub name: Option<String>,
}

impl ContainerRun {
    pub fn new(
        image: impl Into<String>,
        command: impl Into<String>,
        mount_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            image: image.into(),
            command: command.into(),
            mount_path: mount_path.into(),
            working_dir: None,
            timeout: None,
            network: true,
            name: None,
        }
    }

    pub fn working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn network(mut self, enabled: bool) -> Self {
        self.network = enabled;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Runs commands in ephemeral, resource-limited containers.
#[derive(Debug)]
pub struct ContainerExecutor {
    config: ContainerConfig,
    probe: DaemonProbe,
}

impl ContainerExecutor {
    pub fn new(config: ContainerConfig) -> Self {
        Self {
            config,
            probe: DaemonProbe::new(),
        }
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Mount source as the isolation daemon sees it.
    pub fn host_mount_path(&self, path: &Path) -> PathBuf {
        self.config.path_mapping.to_host(path)
    }

    /// Append an 8-hex random suffix so runs sharing a logical name never
    /// collide.
    pub fn unique_container_name(logical: Option<&str>) -> String {
        let base = logical
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_LOGICAL_NAME);
        let suffix: u32 = rand::thread_rng().r#gen();
        format!("{}-{:08x}", base, suffix)
    }

    /// Arguments passed to the runtime CLI for `run` under `container_name`.
    pub fn build_run_args(&self, run: &ContainerRun, container_name: &str) -> Vec<String> {
        let host_mount = self.host_mount_path(&run.mount_path);
        let working_dir = run
            .working_dir
            .clone()
            .unwrap_or_else(|| self.config.mount_point.clone());

        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            container_name.to_string(),
            "-v".to_string(),
            format!("{}:{}", host_mount.display(), self.config.mount_point),
            "-w".to_string(),
            working_dir,
            "--memory".to_string(),
            self.config.memory_limit.clone(),
            "--cpu-shares".to_string(),
            self.config.cpu_shares.to_string(),
            "-e".to_string(),
            format!(
                "NODE_OPTIONS=--max-old-space-size={}",
                self.config.heap_size_mb
            ),
        ];

        if !run.network {
            args.push("--network".to_string());
            args.push("none".to_string());
        }

        args.push(run.image.clone());
        args.push("sh".to_string());
        args.push("-c".to_string());
        args.push(run.command.clone());
        args
    }

    /// Run to completion, streaming lines to `on_line`.
    pub async fn run(
        &self,
        run: &ContainerRun,
        on_line: Option<LineCallback>,
    ) -> Result<ContainerResult> {
        let handle = self.start_async(run, on_line)?;
        let result = handle.finish().await;
        match &result {
            Ok(r) => tracing::debug!("Container run finished with exit code {}", r.exit_code),
            Err(e) => tracing::warn!("Container run failed: {}", e),
        }
        result
    }

    /// Start without blocking and return a pollable handle.
    pub fn start_async(
        &self,
        run: &ContainerRun,
        on_line: Option<LineCallback>,
    ) -> Result<StreamingHandle> {
        let container_name = Self::unique_container_name(run.name.as_deref());
        let args = self.build_run_args(run, &container_name);
        let timeout = run.timeout.unwrap_or(self.config.default_timeout);

        tracing::debug!(
            "Starting container {} (image {}, network {})",
            container_name,
            run.image,
            run.network
        );

        let mut command = Command::new(&self.config.runtime);
        command.args(&args);

        let mut kill_command = Command::new(&self.config.runtime);
        kill_command.args(["kill", container_name.as_str()]);

        StreamingHandle::spawn(
            command,
            kill_command,
            container_name,
            run.image.clone(),
            timeout,
            on_line,
        )
        .map_err(|source| SandboxError::SpawnFailed {
            runtime: self.config.runtime.clone(),
            source,
        })
    }

    /// Whether the isolation daemon answers.
    pub async fn is_isolation_runtime_available(&self) -> bool {
        self.probe.is_available().await
    }

    /// Make sure `image` is present locally, pulling it on first use.
    ///
    /// Returns true when a pull happened.
    pub async fn ensure_image_available(&self, image: &str) -> Result<bool> {
        self.probe.ensure_image(image).await
    }
}

/// Classify a finished run.
///
/// Exit codes below [`RUNTIME_EXIT_CODE_FLOOR`] belong to the command and
/// are never errors. Within the runtime range the exit code is the primary
/// signal; the message only refines which failure it was.
///
/// The exit code is checked before the "image not found" and "permission
/// denied" markers, not after. A command that prints either phrase and exits
/// below the floor (`ls /root` failing with 2) is the command's own result.
pub fn classify_exit(exit_code: i64, output: &str, image: &str) -> Option<SandboxError> {
    if exit_code < RUNTIME_EXIT_CODE_FLOOR {
        return None;
    }

    let lower = output.to_lowercase();
    if lower.contains("image not found")
        || lower.contains("unable to find image")
        || lower.contains("no such image")
    {
        Some(SandboxError::ImageNotFound {
            image: image.to_string(),
            output: output.to_string(),
        })
    } else if lower.contains("permission denied") {
        Some(SandboxError::PermissionDenied {
            output: output.to_string(),
        })
    } else {
        Some(SandboxError::ExecutorFailure {
            exit_code,
            output: output.to_string(),
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sandbox::config::PathMapping;
    use pretty_assertions::assert_eq;
    use std::sync::{Arc, Mutex};

    /// Write a runtime stand-in that ignores every argument except the last
    /// and runs it with `sh -c`, so runs work without a daemon.
    #[cfg(unix)]
    pub(crate) fn stub_runtime(dir: &Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-runtime");
        std::fs::write(&path, "#!/bin/sh\nfor last; do :; done\nexec sh -c \"$last\"\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    fn stub_executor(dir: &Path) -> ContainerExecutor {
        ContainerExecutor::new(ContainerConfig {
            runtime: stub_runtime(dir),
            ..Default::default()
        })
    }

    fn executor_with_mapping(container_base: &str, host_base: &str) -> ContainerExecutor {
        ContainerExecutor::new(ContainerConfig {
            path_mapping: PathMapping::new(container_base, host_base),
            ..Default::default()
        })
    }

    #[test]
    fn test_host_mount_translation() {
        let executor = executor_with_mapping("/a", "/b");
        assert_eq!(
            executor.host_mount_path(Path::new("/a/w1")),
            PathBuf::from("/b/w1")
        );
        assert_eq!(
            executor.host_mount_path(Path::new("/c/w1")),
            PathBuf::from("/c/w1")
        );
    }

    #[test]
    fn test_run_args_mount_translated_path() {
        let executor = executor_with_mapping("/a", "/b");
        let run = ContainerRun::new("node:22", "npm test", "/a/w1");
        let args = executor.build_run_args(&run, "site-1234abcd");

        assert!(args.contains(&"/b/w1:/workspace".to_string()));
        assert_eq!(&args[..4], &["run", "--rm", "--name", "site-1234abcd"]);
        assert_eq!(
            &args[args.len() - 4..],
            &["node:22", "sh", "-c", "npm test"]
        );
    }

    #[test]
    fn test_run_args_limits_and_heap_hint() {
        let executor = ContainerExecutor::new(ContainerConfig::default());
        let run = ContainerRun::new("node:22", "ls", "/srv/w1").working_dir("/workspace/app");
        let args = executor.build_run_args(&run, "n");

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-w") + 1], "/workspace/app");
        assert_eq!(args[pos("--memory") + 1], "2g");
        assert_eq!(args[pos("--cpu-shares") + 1], "1024");
        assert_eq!(args[pos("-e") + 1], "NODE_OPTIONS=--max-old-space-size=4096");
        assert!(!args.contains(&"--network".to_string()));
    }

    #[test]
    fn test_run_args_network_disabled() {
        let executor = ContainerExecutor::new(ContainerConfig::default());
        let run = ContainerRun::new("alpine", "true", "/srv/w1").network(false);
        let args = executor.build_run_args(&run, "n");

        let pos = args.iter().position(|a| a == "--network").unwrap();
        assert_eq!(args[pos + 1], "none");
        // Flags must precede the image.
        assert!(pos < args.iter().position(|a| a == "alpine").unwrap());
    }

    #[test]
    fn test_unique_names_differ_for_same_logical_name() {
        let a = ContainerExecutor::unique_container_name(Some("site-ws"));
        let b = ContainerExecutor::unique_container_name(Some("site-ws"));
        assert_ne!(a, b);
        assert!(a.starts_with("site-ws-"));
        let suffix = a.strip_prefix("site-ws-").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_unnamed_runs_still_get_a_name() {
        let name = ContainerExecutor::unique_container_name(None);
        assert!(name.starts_with("sandbox-"));
        assert_eq!(name.len(), "sandbox-".len() + 8);
    }

    #[test]
    fn test_classify_image_not_found() {
        let err = classify_exit(
            125,
            "Unable to find image 'nope:latest' locally\nmanifest unknown",
            "nope:latest",
        );
        assert!(matches!(err, Some(SandboxError::ImageNotFound { .. })));
    }

    #[test]
    fn test_classify_permission_denied() {
        let err = classify_exit(
            126,
            "permission denied while trying to connect to the Docker daemon socket",
            "alpine",
        );
        assert!(matches!(err, Some(SandboxError::PermissionDenied { .. })));
    }

    #[test]
    fn test_classify_runtime_exit_code() {
        let err = classify_exit(125, "docker: invalid reference format", "alpine");
        assert!(matches!(
            err,
            Some(SandboxError::ExecutorFailure { exit_code: 125, .. })
        ));
    }

    #[test]
    fn test_command_failure_is_not_an_error() {
        assert!(classify_exit(1, "1 test failed", "alpine").is_none());
        assert!(classify_exit(0, "", "alpine").is_none());
        // The command's own output may mention permissions; still its outcome.
        assert!(classify_exit(1, "ls: /root: Permission denied", "alpine").is_none());
        assert!(classify_exit(2, "grep: no such image in cache", "alpine").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_streams_lines_with_stream_flag() {
        let dir = tempfile::tempdir().unwrap();
        let executor = stub_executor(dir.path());
        let seen: Arc<Mutex<Vec<(String, bool)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let on_line: LineCallback = Arc::new(move |line: &str, is_error: bool| {
            sink.lock().unwrap().push((line.to_string(), is_error));
        });

        let run = ContainerRun::new("alpine", "echo out; echo err >&2", dir.path());
        let result = executor.run(&run, Some(on_line)).await.unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(result.output.contains("out\n"));
        assert!(result.output.contains("err\n"));
        let seen = seen.lock().unwrap();
        assert!(seen.contains(&("out".to_string(), false)));
        assert!(seen.contains(&("err".to_string(), true)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_command_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let executor = stub_executor(dir.path());
        let run = ContainerRun::new("alpine", "echo '2 tests failed'; exit 1", dir.path());

        let result = executor.run(&run, None).await.unwrap();
        assert_eq!(result.exit_code, 1);
        assert!(!result.is_success());
        assert!(result.output.contains("2 tests failed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_image_message_with_runtime_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let executor = stub_executor(dir.path());
        let run = ContainerRun::new(
            "nope:latest",
            "echo \"Unable to find image 'nope:latest' locally\" >&2; exit 125",
            dir.path(),
        );

        let err = executor.run(&run, None).await.unwrap_err();
        assert!(matches!(err, SandboxError::ImageNotFound { image, .. } if image == "nope:latest"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runtime_exit_code_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        let executor = stub_executor(dir.path());
        let run = ContainerRun::new("alpine", "echo 'daemon hiccup' >&2; exit 125", dir.path());

        let err = executor.run(&run, None).await.unwrap_err();
        assert!(matches!(err, SandboxError::ExecutorFailure { exit_code: 125, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let executor = stub_executor(dir.path());
        let run = ContainerRun::new("alpine", "sleep 5", dir.path())
            .timeout(Duration::from_millis(200));

        let err = executor.run(&run, None).await.unwrap_err();
        assert!(matches!(err, SandboxError::ExecutionTimeout(d) if d == Duration::from_millis(200)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_async_runs_with_same_name_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let executor = stub_executor(dir.path());
        let first = ContainerRun::new("alpine", "sleep 0.2; echo first", dir.path()).name("site");
        let second = ContainerRun::new("alpine", "echo second", dir.path()).name("site");

        let a = executor.start_async(&first, None).unwrap();
        let b = executor.start_async(&second, None).unwrap();
        assert_ne!(a.container_name(), b.container_name());
        assert!(a.container_name().starts_with("site-"));

        assert_eq!(b.wait().await, Some(0));
        assert_eq!(a.wait().await, Some(0));
        assert!(a.check_result().is_ok());
        assert!(!a.is_running());
        assert_eq!(a.output(), "first\n");
        assert_eq!(b.output(), "second\n");
        assert!(a.is_success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_check_result_is_noop_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let executor = stub_executor(dir.path());
        let run = ContainerRun::new("alpine", "sleep 1; exit 125", dir.path());

        let handle = executor.start_async(&run, None).unwrap();
        assert!(handle.is_running());
        assert!(handle.check_result().is_ok());
        assert_eq!(handle.exit_code(), None);

        assert_eq!(handle.wait().await, Some(125));
        assert!(handle.check_result().is_err());
    }

    #[tokio::test]
    async fn test_spawn_failure_names_runtime() {
        let executor = ContainerExecutor::new(ContainerConfig {
            runtime: "/nonexistent/container-runtime".to_string(),
            ..Default::default()
        });
        let run = ContainerRun::new("alpine", "true", "/tmp");
        let err = executor.start_async(&run, None).unwrap_err();
        assert!(
            matches!(err, SandboxError::SpawnFailed { runtime, .. } if runtime.contains("nonexistent"))
        );
    }
}
