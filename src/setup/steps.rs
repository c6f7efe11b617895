//! Project-type bootstrap steps and how they are run.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{SetupError, StoreError};
use crate::sandbox::{ContainerExecutor, ContainerRun};

/// Output kept in a step failure, from the end of the log.
const MAX_FAILURE_OUTPUT: usize = 4000;

/// One unit of bootstrap work, e.g. installing dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupStep {
    pub name: String,
    pub command: String,
    /// Image to run in instead of the runner's default.
    pub image: Option<String>,
    pub timeout: Option<Duration>,
}

impl SetupStep {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            image: None,
            timeout: None,
        }
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Ordered steps per project type.
#[async_trait]
pub trait SetupStepRegistry: Send + Sync {
    /// Steps for `project_type`, in execution order. Unknown types have none.
    async fn steps_for(&self, project_type: &str) -> Result<Vec<SetupStep>, StoreError>;
}

/// Executes steps against a checked-out workspace.
#[async_trait]
pub trait SetupStepRunner: Send + Sync {
    /// `project_image` is the project's own image, used for steps that do
    /// not name one before any runner-wide default.
    async fn run_steps(
        &self,
        workspace_path: &Path,
        project_image: Option<&str>,
        steps: &[SetupStep],
    ) -> Result<(), SetupError>;
}

/// Registry configured in code.
#[derive(Debug, Clone, Default)]
pub struct StaticStepRegistry {
    steps: HashMap<String, Vec<SetupStep>>,
}

impl StaticStepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dependency install for the JavaScript site generators we host.
    pub fn with_defaults() -> Self {
        let install = || {
            SetupStep::new(
                "install dependencies",
                "if [ -f package-lock.json ]; then npm ci; else npm install; fi",
            )
            .with_timeout(Duration::from_secs(900))
        };
        Self::new()
            .with_steps("nextjs", vec![install()])
            .with_steps("astro", vec![install()])
            .with_steps("static", Vec::new())
    }

    pub fn with_steps(mut self, project_type: impl Into<String>, steps: Vec<SetupStep>) -> Self {
        self.steps.insert(project_type.into(), steps);
        self
    }
}

#[async_trait]
impl SetupStepRegistry for StaticStepRegistry {
    async fn steps_for(&self, project_type: &str) -> Result<Vec<SetupStep>, StoreError> {
        Ok(self.steps.get(project_type).cloned().unwrap_or_default())
    }
}

/// Runs each step in its own sandbox container with the workspace mounted.
pub struct ContainerStepRunner {
    executor: Arc<ContainerExecutor>,
    default_image: String,
}

impl ContainerStepRunner {
    pub fn new(executor: Arc<ContainerExecutor>, default_image: impl Into<String>) -> Self {
        Self {
            executor,
            default_image: default_image.into(),
        }
    }
}

#[async_trait]
impl SetupStepRunner for ContainerStepRunner {
    async fn run_steps(
        &self,
        workspace_path: &Path,
        project_image: Option<&str>,
        steps: &[SetupStep],
    ) -> Result<(), SetupError> {
        for (idx, step) in steps.iter().enumerate() {
            let image = step
                .image
                .as_deref()
                .or(project_image)
                .unwrap_or(&self.default_image);
            tracing::info!(
                "Setup step {}/{}: {} (image {})",
                idx + 1,
                steps.len(),
                step.name,
                image
            );

            let mut run = ContainerRun::new(image, &step.command, workspace_path).name("setup");
            if let Some(timeout) = step.timeout {
                run = run.timeout(timeout);
            }

            let result = self.executor.run(&run, None).await?;
            if !result.is_success() {
                return Err(SetupError::StepFailed {
                    step: step.name.clone(),
                    exit_code: result.exit_code,
                    output: tail(&result.output, MAX_FAILURE_OUTPUT),
                });
            }
        }
        Ok(())
    }
}

/// Last `max` bytes of `s`, on a char boundary.
fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_registry_lookup() {
        let registry = StaticStepRegistry::with_defaults();
        let steps = registry.steps_for("nextjs").await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].name, "install dependencies");

        assert!(registry.steps_for("static").await.unwrap().is_empty());
        assert!(registry.steps_for("unknown").await.unwrap().is_empty());
    }

    #[test]
    fn test_tail_respects_char_boundaries() {
        assert_eq!(tail("abc", 10), "abc");
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("aé", 1), "");
        assert_eq!(tail("aéb", 2), "b");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_stops_at_failing_step() {
        use crate::sandbox::ContainerConfig;

        let dir = tempfile::tempdir().unwrap();
        let runtime = crate::sandbox::container::tests::stub_runtime(dir.path());
        let marker = dir.path().join("third-ran");
        let runner = ContainerStepRunner::new(
            Arc::new(ContainerExecutor::new(ContainerConfig {
                runtime,
                ..Default::default()
            })),
            "node:22",
        );

        let steps = vec![
            SetupStep::new("ok", "echo fine"),
            SetupStep::new("build", "echo 'build broke'; exit 2"),
            SetupStep::new("never", format!("touch {}", marker.display())),
        ];
        let err = runner
            .run_steps(dir.path(), None, &steps)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SetupError::StepFailed { ref step, exit_code: 2, ref output }
                if step == "build" && output.contains("build broke")
        ));
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runner_image_precedence() {
        use crate::sandbox::ContainerConfig;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("args.log");
        let runtime = dir.path().join("logging-runtime");
        std::fs::write(
            &runtime,
            format!(
                "#!/bin/sh\necho \"$@\" >> {}\nfor last; do :; done\nexec sh -c \"$last\"\n",
                log.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&runtime, std::fs::Permissions::from_mode(0o755)).unwrap();

        let runner = ContainerStepRunner::new(
            Arc::new(ContainerExecutor::new(ContainerConfig {
                runtime: runtime.display().to_string(),
                ..Default::default()
            })),
            "node:22",
        );
        let steps = vec![
            SetupStep::new("pinned", "true").with_image("alpine:3"),
            SetupStep::new("project", "true"),
        ];
        runner
            .run_steps(dir.path(), Some("node:20-alpine"), &steps)
            .await
            .unwrap();

        let logged = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = logged.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains(" alpine:3 sh -c true"), "{}", lines[0]);
        assert!(lines[1].contains(" node:20-alpine sh -c true"), "{}", lines[1]);
    }
}
