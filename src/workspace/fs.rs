//! Filesystem adapter for workspace directories.

use std::path::Path;

use async_trait::async_trait;

/// Directory operations used while (re)creating workspaces.
#[async_trait]
pub trait FilesystemAdapter: Send + Sync {
    /// Remove a directory tree. Missing directories are not an error.
    async fn remove_dir(&self, path: &Path) -> std::io::Result<()>;

    /// Create a directory and any missing parents.
    async fn create_dir(&self, path: &Path) -> std::io::Result<()>;

    async fn exists(&self, path: &Path) -> bool;
}

/// Adapter backed by `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

#[async_trait]
impl FilesystemAdapter for LocalFilesystem {
    async fn remove_dir(&self, path: &Path) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Ok(()) => {
                tracing::debug!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn create_dir(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}
