//! Version control through the `git` command line.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::process::Command;

use crate::error::GitError;

/// Environment variable the inline credential helper reads the token from.
const TOKEN_ENV: &str = "SANDYARD_GIT_TOKEN";

/// Identity recorded on commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitAuthor {
    pub name: String,
    pub email: String,
}

impl CommitAuthor {
    /// Author whose name is the local part of `email`.
    pub fn from_email(email: &str) -> Self {
        let name = email
            .split_once('@')
            .map(|(local, _)| local)
            .filter(|local| !local.is_empty())
            .unwrap_or(email);
        Self {
            name: name.to_string(),
            email: email.to_string(),
        }
    }
}

/// Git operations the orchestrators need.
#[async_trait]
pub trait GitAdapter: Send + Sync {
    /// Clone `url` into `dest`, authenticating with `token`.
    async fn clone_repo(&self, url: &str, token: &SecretString, dest: &Path)
    -> Result<(), GitError>;

    /// Create and check out `branch`.
    async fn create_branch(&self, repo: &Path, branch: &str) -> Result<(), GitError>;

    /// Whether the working tree has uncommitted changes.
    async fn has_changes(&self, repo: &Path) -> Result<bool, GitError>;

    async fn stage_all(&self, repo: &Path) -> Result<(), GitError>;

    async fn commit(
        &self,
        repo: &Path,
        message: &str,
        author: &CommitAuthor,
    ) -> Result<(), GitError>;

    /// Push `branch` to `origin`, authenticating with `token`.
    async fn push(&self, repo: &Path, branch: &str, token: &SecretString) -> Result<(), GitError>;
}

/// [`GitAdapter`] backed by the `git` binary.
///
/// Tokens reach git only through the process environment, read by an
/// inline credential helper. They are never put in a remote URL, written
/// to git config or logged.
#[derive(Debug, Clone)]
pub struct GitCli {
    binary: PathBuf,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("git"),
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    fn command(&self, repo: Option<&Path>, token: Option<&SecretString>) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(repo) = repo {
            cmd.current_dir(repo);
        }
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(token) = token {
            // Clear inherited helpers first so ours is the only one consulted.
            cmd.args(["-c", "credential.helper="]).arg("-c").arg(format!(
                "credential.helper=!f() {{ echo username=x-access-token; echo \"password=${}\"; }}; f",
                TOKEN_ENV
            ));
            cmd.env(TOKEN_ENV, token.expose_secret());
        }
        cmd
    }

    async fn run(&self, mut cmd: Command, args: &[&str]) -> Result<String, GitError> {
        let subcommand = args.first().copied().unwrap_or_default();
        tracing::debug!("Running git {}", subcommand);

        let output = cmd.args(args).output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::warn!("git {} failed: {}", subcommand, stderr);
            return Err(GitError::CommandFailed {
                command: subcommand.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl GitAdapter for GitCli {
    async fn clone_repo(
        &self,
        url: &str,
        token: &SecretString,
        dest: &Path,
    ) -> Result<(), GitError> {
        let dest = dest.to_string_lossy();
        self.run(self.command(None, Some(token)), &["clone", "--", url, &dest])
            .await?;
        Ok(())
    }

    async fn create_branch(&self, repo: &Path, branch: &str) -> Result<(), GitError> {
        self.run(self.command(Some(repo), None), &["checkout", "-b", branch])
            .await?;
        Ok(())
    }

    async fn has_changes(&self, repo: &Path) -> Result<bool, GitError> {
        let status = self
            .run(self.command(Some(repo), None), &["status", "--porcelain"])
            .await?;
        Ok(!status.trim().is_empty())
    }

    async fn stage_all(&self, repo: &Path) -> Result<(), GitError> {
        self.run(self.command(Some(repo), None), &["add", "-A"])
            .await?;
        Ok(())
    }

    async fn commit(
        &self,
        repo: &Path,
        message: &str,
        author: &CommitAuthor,
    ) -> Result<(), GitError> {
        let mut cmd = self.command(Some(repo), None);
        cmd.env("GIT_AUTHOR_NAME", &author.name)
            .env("GIT_AUTHOR_EMAIL", &author.email)
            .env("GIT_COMMITTER_NAME", &author.name)
            .env("GIT_COMMITTER_EMAIL", &author.email);
        self.run(cmd, &["commit", "-m", message]).await?;
        Ok(())
    }

    async fn push(&self, repo: &Path, branch: &str, token: &SecretString) -> Result<(), GitError> {
        self.run(
            self.command(Some(repo), Some(token)),
            &["push", "-u", "origin", branch],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|o| o.status.success())
    }

    #[test]
    fn test_author_from_email() {
        assert_eq!(
            CommitAuthor::from_email("jane.doe@example.com"),
            CommitAuthor {
                name: "jane.doe".into(),
                email: "jane.doe@example.com".into()
            }
        );
        assert_eq!(CommitAuthor::from_email("no-at-sign").name, "no-at-sign");
        assert_eq!(CommitAuthor::from_email("@example.com").name, "@example.com");
    }

    #[tokio::test]
    async fn test_clone_url_is_never_an_option() {
        if !git_available() {
            eprintln!("Skipping git test: git not available");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let git = GitCli::new();
        let token = SecretString::from("unused".to_string());

        let err = git
            .clone_repo("-q", &token, &dir.path().join("checkout"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, GitError::CommandFailed { ref stderr, .. } if stderr.contains("'-q'")),
            "{}",
            err
        );
    }

    #[tokio::test]
    async fn test_clone_commit_push_roundtrip() {
        if !git_available() {
            eprintln!("Skipping git test: git not available");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("origin.git");
        let status = std::process::Command::new("git")
            .args(["init", "--bare", "-q"])
            .arg(&origin)
            .status()
            .unwrap();
        assert!(status.success());

        let git = GitCli::new();
        let token = SecretString::from("unused-for-local-remotes".to_string());
        let checkout = dir.path().join("checkout");
        git.clone_repo(origin.to_str().unwrap(), &token, &checkout)
            .await
            .unwrap();
        git.create_branch(&checkout, "ws-test").await.unwrap();
        assert!(!git.has_changes(&checkout).await.unwrap());

        std::fs::write(checkout.join("index.html"), "<h1>hi</h1>\n").unwrap();
        assert!(git.has_changes(&checkout).await.unwrap());

        git.stage_all(&checkout).await.unwrap();
        git.commit(
            &checkout,
            "Add index",
            &CommitAuthor::from_email("dev@example.com"),
        )
        .await
        .unwrap();
        assert!(!git.has_changes(&checkout).await.unwrap());
        git.push(&checkout, "ws-test", &token).await.unwrap();

        let branches = std::process::Command::new("git")
            .arg("--git-dir")
            .arg(&origin)
            .args(["branch", "--list", "ws-test"])
            .output()
            .unwrap();
        assert!(String::from_utf8_lossy(&branches.stdout).contains("ws-test"));
    }

    #[tokio::test]
    async fn test_failed_command_reports_exit_code() {
        if !git_available() {
            eprintln!("Skipping git test: git not available");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let err = GitCli::new().has_changes(dir.path()).await.unwrap_err();
        assert!(matches!(
            err,
            GitError::CommandFailed { ref command, exit_code, .. } if command == "status" && exit_code != 0
        ));
    }
}
