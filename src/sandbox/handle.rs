//! Handle to a container run started without blocking.

use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::sandbox::container::classify_exit;
use crate::sandbox::error::{Result, SandboxError};

/// How long to wait for output pipes to close after the process exits.
const READER_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Receives each output line as it arrives. The flag is true for stderr.
pub type LineCallback = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Applied to output before a caller sees it, in results and errors alike.
pub type OutputRewrite = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Exited(i64),
    TimedOut,
    /// Waiting on the runtime process failed.
    Lost(String),
}

/// Final result of a container run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerResult {
    /// Stdout and stderr lines, interleaved in arrival order.
    pub output: String,
    pub exit_code: i64,
}

impl ContainerResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

struct Shared {
    output: Mutex<String>,
}

impl Shared {
    fn output(&self) -> MutexGuard<'_, String> {
        self.output.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Pollable handle to a running container.
///
/// Output accumulates while the command runs and is also pushed to the
/// line callback the run was started with.
pub struct StreamingHandle {
    container_name: String,
    image: String,
    timeout: Duration,
    shared: Arc<Shared>,
    outcome: watch::Receiver<Option<RunOutcome>>,
    rewrite: Option<OutputRewrite>,
}

impl std::fmt::Debug for StreamingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingHandle")
            .field("container_name", &self.container_name)
            .field("image", &self.image)
            .field("timeout", &self.timeout)
            .field("outcome", &*self.outcome.borrow())
            .field("rewrites_output", &self.rewrite.is_some())
            .finish()
    }
}

impl StreamingHandle {
    /// Spawn `command` and supervise it until exit or timeout.
    ///
    /// `kill_command` is run on timeout to stop the container itself, since
    /// killing the CLI client does not stop a detached daemon-side process.
    pub(crate) fn spawn(
        mut command: Command,
        kill_command: Command,
        container_name: String,
        image: String,
        timeout: Duration,
        on_line: Option<LineCallback>,
    ) -> std::io::Result<Self> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let shared = Arc::new(Shared {
            output: Mutex::new(String::new()),
        });

        let readers = [
            child
                .stdout
                .take()
                .map(|out| spawn_reader(out, false, shared.clone(), on_line.clone())),
            child
                .stderr
                .take()
                .map(|err| spawn_reader(err, true, shared.clone(), on_line.clone())),
        ];

        let (tx, rx) = watch::channel(None);
        let name = container_name.clone();
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) => RunOutcome::Exited(status.code().unwrap_or(-1) as i64),
                Ok(Err(e)) => RunOutcome::Lost(e.to_string()),
                Err(_) => {
                    tracing::warn!("Container {} timed out after {:?}", name, timeout);
                    let _ = child.kill().await;
                    stop_container(kill_command, &name).await;
                    RunOutcome::TimedOut
                }
            };

            // Drain the pipes before publishing so output() is complete. A
            // grandchild holding a pipe open must not wedge the supervisor.
            for reader in readers.into_iter().flatten() {
                let _ = tokio::time::timeout(READER_DRAIN_GRACE, reader).await;
            }
            let _ = tx.send(Some(outcome));
        });

        Ok(Self {
            container_name,
            image,
            timeout,
            shared,
            outcome: rx,
            rewrite: None,
        })
    }

    /// Pass everything [`StreamingHandle::output`] and
    /// [`StreamingHandle::check_result`] return through `rewrite`.
    ///
    /// Line callbacks are not affected; wrap those separately.
    pub fn with_output_rewrite(mut self, rewrite: OutputRewrite) -> Self {
        self.rewrite = Some(rewrite);
        self
    }

    fn present(&self, text: &str) -> String {
        match &self.rewrite {
            Some(rewrite) => rewrite(text),
            None => text.to_string(),
        }
    }

    /// Actual container name, including the random suffix.
    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn is_running(&self) -> bool {
        self.outcome.borrow().is_none()
    }

    /// Block until the run ends. Returns the exit code, or `None` on
    /// timeout or a lost process.
    pub async fn wait(&self) -> Option<i64> {
        let mut rx = self.outcome.clone();
        let outcome = match rx.wait_for(|o| o.is_some()).await {
            Ok(outcome) => outcome.clone(),
            // Supervisor gone without publishing; treat as lost.
            Err(_) => Some(RunOutcome::Lost("supervisor task ended".to_string())),
        };
        match outcome {
            Some(RunOutcome::Exited(code)) => Some(code),
            _ => None,
        }
    }

    /// Apply failure classification once the run has stopped.
    ///
    /// While the container is still running this is a no-op returning `Ok`.
    pub fn check_result(&self) -> Result<()> {
        let outcome = self.outcome.borrow().clone();
        match outcome {
            None => Ok(()),
            Some(RunOutcome::TimedOut) => Err(SandboxError::ExecutionTimeout(self.timeout)),
            Some(RunOutcome::Lost(reason)) => Err(SandboxError::ExecutorFailure {
                exit_code: -1,
                output: self.present(&reason),
            }),
            Some(RunOutcome::Exited(code)) => {
                match classify_exit(code, &self.output(), &self.image) {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
        }
    }

    /// Output accumulated so far.
    pub fn output(&self) -> String {
        let output = self.shared.output().clone();
        self.present(&output)
    }

    /// Exit code, once the container has exited.
    pub fn exit_code(&self) -> Option<i64> {
        match &*self.outcome.borrow() {
            Some(RunOutcome::Exited(code)) => Some(*code),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == Some(0)
    }

    /// Wait for exit, classify, and return the final result.
    pub async fn finish(self) -> Result<ContainerResult> {
        let exit_code = self.wait().await;
        self.check_result()?;
        Ok(ContainerResult {
            output: self.output(),
            exit_code: exit_code.unwrap_or(-1),
        })
    }
}

fn spawn_reader<R>(
    stream: R,
    is_error: bool,
    shared: Arc<Shared>,
    on_line: Option<LineCallback>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    {
                        let mut output = shared.output();
                        output.push_str(&line);
                        output.push('\n');
                    }
                    if let Some(cb) = &on_line {
                        cb(&line, is_error);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Error reading container output: {}", e);
                    break;
                }
            }
        }
    })
}

async fn stop_container(mut kill_command: Command, name: &str) {
    kill_command.stdout(Stdio::null()).stderr(Stdio::null());
    match kill_command.status().await {
        Ok(status) if status.success() => tracing::debug!("Killed container {}", name),
        Ok(_) => tracing::debug!("Container {} already gone", name),
        Err(e) => tracing::warn!("Failed to kill container {}: {}", name, e),
    }
}
