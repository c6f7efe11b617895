//! Operator commands.
//!
//! Small entry points for checking a host and poking at a workspace by hand.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::config::Config;
use crate::context::{ExecutionContext, OutputSink, TurnContext};
use crate::sandbox::ContainerExecutor;
use crate::tools::IsolatedShellFacade;
use crate::workspace::{PathResolver, StatusGuard, WorkspaceStatus};

#[derive(Parser, Debug)]
#[command(name = "sandyard", version, about = "Workspace lifecycle and sandboxed execution")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Check that the container daemon is reachable
    Probe {
        /// Also make sure this image is present locally, pulling if needed
        #[arg(short, long)]
        image: Option<String>,
    },

    /// Run a command in a sandbox with a workspace mounted
    Exec {
        /// Workspace directory to mount
        #[arg(short, long)]
        workspace: PathBuf,

        /// Image to run in (defaults to SANDYARD_DEFAULT_IMAGE)
        #[arg(short, long)]
        image: Option<String>,

        /// Working directory inside the container (defaults to the mount point)
        #[arg(long)]
        workdir: Option<String>,

        /// Run without network access
        #[arg(long)]
        no_network: bool,

        /// Command line, passed to `sh -c`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Resolve a path against a workspace root, rejecting escapes
    Resolve {
        /// Workspace root
        root: PathBuf,

        /// Candidate path, absolute or relative to the root
        path: PathBuf,
    },

    /// List the statuses a workspace may move to next
    Transitions {
        /// Current status (e.g., "IN_SETUP")
        status: String,
    },
}

/// Run a command. Returns the process exit code.
pub async fn run_command(cmd: Command, config: &Config) -> anyhow::Result<i32> {
    match cmd {
        Command::Probe { image } => probe(config, image.as_deref()).await,
        Command::Exec {
            workspace,
            image,
            workdir,
            no_network,
            command,
        } => {
            exec(
                config,
                workspace,
                image,
                workdir,
                !no_network && config.network,
                &command.join(" "),
            )
            .await
        }
        Command::Resolve { root, path } => resolve(root, path),
        Command::Transitions { status } => transitions(&status),
    }
}

/// Report daemon and image availability.
async fn probe(config: &Config, image: Option<&str>) -> anyhow::Result<i32> {
    let executor = ContainerExecutor::new(config.container.clone());

    if !executor.is_isolation_runtime_available().await {
        println!("Container daemon: unavailable");
        return Ok(1);
    }
    println!("Container daemon: available");

    if let Some(image) = image {
        let pulled = executor.ensure_image_available(image).await?;
        println!(
            "Image {}: {}",
            image,
            if pulled { "pulled" } else { "present" }
        );
    }
    Ok(0)
}

/// Writes streamed output straight to our own stdout/stderr.
struct StdioSink;

impl OutputSink for StdioSink {
    fn write(&self, data: &[u8], is_error: bool) {
        if is_error {
            let mut err = std::io::stderr().lock();
            let _ = err.write_all(data);
        } else {
            let mut out = std::io::stdout().lock();
            let _ = out.write_all(data);
            let _ = out.flush();
        }
    }
}

async fn exec(
    config: &Config,
    workspace: PathBuf,
    image: Option<String>,
    workdir: Option<String>,
    network: bool,
    command: &str,
) -> anyhow::Result<i32> {
    let workspace = std::fs::canonicalize(&workspace)
        .map_err(|e| anyhow::anyhow!("Workspace {}: {}", workspace.display(), e))?;

    // Directories named after a workspace id keep that id; anything else gets
    // a throwaway one.
    let workspace_id = workspace
        .file_name()
        .and_then(|name| Uuid::parse_str(&name.to_string_lossy()).ok())
        .unwrap_or_else(Uuid::new_v4);

    let image = image.unwrap_or_else(|| config.default_image.clone());
    let workdir = workdir.unwrap_or_else(|| config.container.mount_point.clone());

    let turn = TurnContext::new();
    turn.set_context(
        ExecutionContext::new(workspace_id, &workspace, image).with_sink(Arc::new(StdioSink)),
    )
    .await;

    let executor = Arc::new(ContainerExecutor::new(config.container.clone()));
    let shell = IsolatedShellFacade::new(executor).with_network(network);

    let result = shell.run_command(&turn, &workdir, command).await?;
    turn.clear_context().await;

    tracing::info!("Command exited with {}", result.exit_code);
    Ok(i32::try_from(result.exit_code).unwrap_or(1))
}

fn resolve(root: PathBuf, path: PathBuf) -> anyhow::Result<i32> {
    let resolver = PathResolver::new(&root);
    match resolver.resolve(&root, &path) {
        Ok(resolved) => {
            println!("{}", resolved.display());
            Ok(0)
        }
        Err(e) => {
            eprintln!("{}", e);
            Ok(1)
        }
    }
}

fn transitions(status: &str) -> anyhow::Result<i32> {
    let status: WorkspaceStatus = status.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let next = StatusGuard::allowed_transitions(status);

    println!("{}:", status);
    for to in next {
        println!("  -> {}", to);
    }
    Ok(0)
}
