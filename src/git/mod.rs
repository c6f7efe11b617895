//! Git integration: the CLI adapter, the hosting provider API, and the
//! service that commits workspace edits and opens pull requests.

pub mod cli;
pub mod hosted;
pub mod ops;
pub mod url;

pub use cli::{CommitAuthor, GitAdapter, GitCli};
pub use hosted::{GitHubClient, HostedRepoAdapter, NewPullRequest, PullRequest};
pub use ops::GitOpsService;
pub use url::{RepoSlug, parse_repo_url, redact_credentials};
