//! Pull requests on a GitHub-compatible hosting API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::HostedRepoError;
use crate::git::url::RepoSlug;

/// Public GitHub API.
pub const DEFAULT_API_URL: &str = "https://api.github.com";

const USER_AGENT: &str = "sandyard";

/// An open pull request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    #[serde(rename = "html_url")]
    pub url: String,
}

/// Request body for opening a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    /// Branch with the changes.
    pub head: String,
    /// Branch to merge into.
    pub base: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryInfo {
    default_branch: String,
}

/// Operations on the hosting provider.
#[async_trait]
pub trait HostedRepoAdapter: Send + Sync {
    /// Open pull request whose head is `branch`, if any.
    async fn find_open_pull_request(
        &self,
        repo: &RepoSlug,
        branch: &str,
        token: &SecretString,
    ) -> Result<Option<PullRequest>, HostedRepoError>;

    async fn default_branch(
        &self,
        repo: &RepoSlug,
        token: &SecretString,
    ) -> Result<String, HostedRepoError>;

    async fn create_pull_request(
        &self,
        repo: &RepoSlug,
        request: &NewPullRequest,
        token: &SecretString,
    ) -> Result<PullRequest, HostedRepoError>;
}

/// [`HostedRepoAdapter`] over the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    api_url: String,
}

impl Default for GitHubClient {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl GitHubClient {
    /// Client for the API rooted at `api_url` (GitHub Enterprise or a mock).
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn repo_url(&self, repo: &RepoSlug, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.api_url, repo.owner, repo.repo, suffix
        )
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        token: &SecretString,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", token.expose_secret()))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
    }

    async fn send<R: DeserializeOwned>(
        &self,
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<R, HostedRepoError> {
        let response = request.send().await.map_err(|e| {
            tracing::error!("Hosted repo request failed: {}", e);
            HostedRepoError::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        tracing::debug!("Hosted repo response status: {} ({})", status, url);

        if !status.is_success() {
            return Err(HostedRepoError::Api {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| {
            HostedRepoError::InvalidResponse(format!("JSON parse error: {}. Raw: {}", e, body))
        })
    }
}

#[async_trait]
impl HostedRepoAdapter for GitHubClient {
    async fn find_open_pull_request(
        &self,
        repo: &RepoSlug,
        branch: &str,
        token: &SecretString,
    ) -> Result<Option<PullRequest>, HostedRepoError> {
        let url = self.repo_url(repo, "/pulls");
        let head = format!("{}:{}", repo.owner, branch);
        let request = self
            .request(reqwest::Method::GET, &url, token)
            .query(&[("head", head.as_str()), ("state", "open")]);

        let pulls: Vec<PullRequest> = self.send(&url, request).await?;
        Ok(pulls.into_iter().next())
    }

    async fn default_branch(
        &self,
        repo: &RepoSlug,
        token: &SecretString,
    ) -> Result<String, HostedRepoError> {
        let url = self.repo_url(repo, "");
        let request = self.request(reqwest::Method::GET, &url, token);
        let info: RepositoryInfo = self.send(&url, request).await?;
        Ok(info.default_branch)
    }

    async fn create_pull_request(
        &self,
        repo: &RepoSlug,
        new_pr: &NewPullRequest,
        token: &SecretString,
    ) -> Result<PullRequest, HostedRepoError> {
        let url = self.repo_url(repo, "/pulls");
        let request = self
            .request(reqwest::Method::POST, &url, token)
            .json(new_pr);
        let pr: PullRequest = self.send(&url, request).await?;
        tracing::info!("Opened pull request #{} on {}", pr.number, repo);
        Ok(pr)
    }
}
