//! Probes against the isolation daemon: availability and image presence.
//!
//! Runs themselves go through the CLI (see [`crate::sandbox::container`]);
//! these checks talk to the daemon API directly.

use std::collections::HashSet;

use bollard::Docker;
use bollard::image::CreateImageOptions;
use futures::StreamExt;
use tokio::sync::Mutex;

use crate::sandbox::error::{Result, SandboxError};

/// Lazily connected daemon client with a cache of images already ensured.
#[derive(Default)]
pub struct DaemonProbe {
    docker: Mutex<Option<Docker>>,
    ensured_images: Mutex<HashSet<String>>,
}

impl std::fmt::Debug for DaemonProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonProbe").finish_non_exhaustive()
    }
}

impl DaemonProbe {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client(&self) -> Result<Docker> {
        let mut guard = self.docker.lock().await;
        if let Some(docker) = guard.as_ref() {
            return Ok(docker.clone());
        }
        let docker = connect_docker().await?;
        *guard = Some(docker.clone());
        Ok(docker)
    }

    /// Whether the daemon answers a ping.
    pub async fn is_available(&self) -> bool {
        match self.client().await {
            Ok(docker) => docker.ping().await.is_ok(),
            Err(e) => {
                tracing::debug!("Isolation runtime unavailable: {}", e);
                false
            }
        }
    }

    /// Pull `image` unless it is already present. Returns true when pulled.
    ///
    /// Inspect failures other than a missing image surface as
    /// [`SandboxError::Docker`].
    ///
    /// Images ensured once are not inspected again for the life of the probe.
    pub async fn ensure_image(&self, image: &str) -> Result<bool> {
        if self.ensured_images.lock().await.contains(image) {
            return Ok(false);
        }

        let docker = self.client().await?;
        let pulled = match docker.inspect_image(image).await {
            Ok(_) => false,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                pull_image(&docker, image).await?;
                true
            }
            Err(e) => return Err(e.into()),
        };

        self.ensured_images.lock().await.insert(image.to_string());
        Ok(pulled)
    }
}

async fn pull_image(docker: &Docker, image: &str) -> Result<()> {
    tracing::info!("Pulling image: {}", image);

    let options = CreateImageOptions {
        from_image: image.to_string(),
        ..Default::default()
    };

    let mut stream = docker.create_image(Some(options), None, None);
    while let Some(result) = stream.next().await {
        match result {
            Ok(info) => {
                if let Some(status) = info.status {
                    tracing::debug!("Pull status: {}", status);
                }
            }
            Err(e) => {
                return Err(SandboxError::ImagePullFailed {
                    image: image.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    tracing::info!("Successfully pulled image: {}", image);
    Ok(())
}

/// Connect to the Docker daemon.
///
/// Tries these locations in order:
/// 1. `DOCKER_HOST` env var (bollard default)
/// 2. `/var/run/docker.sock` (Linux default)
/// 3. `~/.docker/run/docker.sock` (Docker Desktop on macOS)
pub async fn connect_docker() -> Result<Docker> {
    if let Ok(docker) = Docker::connect_with_local_defaults()
        && docker.ping().await.is_ok()
    {
        return Ok(docker);
    }

    if let Some(home) = std::env::var_os("HOME") {
        let desktop_sock = std::path::Path::new(&home).join(".docker/run/docker.sock");
        if desktop_sock.exists() {
            let sock_str = desktop_sock.to_string_lossy();
            if let Ok(docker) =
                Docker::connect_with_socket(&sock_str, 120, bollard::API_DEFAULT_VERSION)
                && docker.ping().await.is_ok()
            {
                return Ok(docker);
            }
        }
    }

    Err(SandboxError::DockerNotAvailable {
        reason: "no reachable daemon socket".to_string(),
    })
}
