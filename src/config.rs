//! Configuration loaded from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::git::GitHubClient;
use crate::git::hosted::DEFAULT_API_URL;
use crate::sandbox::{ContainerConfig, DEFAULT_MOUNT_POINT, PathMapping};
use crate::workspace::PathResolver;

/// Default image commands run in when a project does not pick one.
pub const DEFAULT_IMAGE: &str = "node:22-bookworm";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one subdirectory per workspace.
    pub workspaces_root: PathBuf,
    pub default_image: String,
    /// Whether sandboxed commands get network access.
    pub network: bool,
    /// Base URL of the GitHub-compatible API.
    pub github_api_url: String,
    pub container: ContainerConfig,
}

impl Config {
    /// Load `.env` if present, then read `SANDYARD_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let workspaces_root =
            PathBuf::from(get("SANDYARD_WORKSPACES_ROOT").unwrap_or_else(|| "./workspaces".into()));
        let container_base = get("SANDYARD_CONTAINER_BASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| workspaces_root.clone());
        let host_base = get("SANDYARD_HOST_BASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| container_base.clone());

        let defaults = ContainerConfig::default();
        let timeout_secs: u64 = parse_or(&get, "SANDYARD_TIMEOUT_SECS", 300)?;

        let container = ContainerConfig {
            runtime: get("SANDYARD_CONTAINER_RUNTIME").unwrap_or(defaults.runtime),
            mount_point: get("SANDYARD_MOUNT_POINT").unwrap_or_else(|| DEFAULT_MOUNT_POINT.into()),
            memory_limit: get("SANDYARD_MEMORY_LIMIT").unwrap_or(defaults.memory_limit),
            cpu_shares: parse_or(&get, "SANDYARD_CPU_SHARES", defaults.cpu_shares)?,
            heap_size_mb: parse_or(&get, "SANDYARD_HEAP_MB", defaults.heap_size_mb)?,
            default_timeout: Duration::from_secs(timeout_secs),
            path_mapping: PathMapping::new(container_base, host_base),
        };

        if !container.mount_point.starts_with('/') {
            return Err(ConfigError::Invalid {
                key: "SANDYARD_MOUNT_POINT".into(),
                message: format!("must be an absolute path, got {}", container.mount_point),
            });
        }
        if timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "SANDYARD_TIMEOUT_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }

        Ok(Self {
            workspaces_root,
            default_image: get("SANDYARD_DEFAULT_IMAGE").unwrap_or_else(|| DEFAULT_IMAGE.into()),
            network: parse_bool(&get, "SANDYARD_NETWORK", true)?,
            github_api_url: get("SANDYARD_GITHUB_API_URL")
                .unwrap_or_else(|| DEFAULT_API_URL.into()),
            container,
        })
    }

    pub fn path_resolver(&self) -> PathResolver {
        PathResolver::new(&self.workspaces_root)
    }

    /// Pull-request client for the configured API.
    pub fn hosted_repo_client(&self) -> GitHubClient {
        GitHubClient::new(self.github_api_url.clone())
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: format!("{} ({:?})", e, raw),
        }),
        None => Ok(default),
    }
}

fn parse_bool(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key: key.to_string(),
                message: format!("expected a boolean, got {:?}", v),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::path::Path;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.workspaces_root, PathBuf::from("./workspaces"));
        assert_eq!(config.default_image, "node:22-bookworm");
        assert!(config.network);
        assert_eq!(config.github_api_url, "https://api.github.com");
        assert_eq!(config.container.mount_point, "/workspace");
        assert_eq!(config.container.memory_limit, "2g");
        assert_eq!(config.container.cpu_shares, 1024);
        assert_eq!(config.container.heap_size_mb, 4096);
        assert_eq!(config.container.default_timeout, Duration::from_secs(300));
        assert!(config.container.path_mapping.is_identity());
    }

    #[test]
    fn test_path_mapping_from_env() {
        let config = load(&[
            ("SANDYARD_WORKSPACES_ROOT", "/data/workspaces"),
            ("SANDYARD_HOST_BASE_PATH", "/srv/app/workspaces"),
        ])
        .unwrap();
        assert_eq!(
            config
                .container
                .path_mapping
                .to_host(Path::new("/data/workspaces/w1")),
            PathBuf::from("/srv/app/workspaces/w1")
        );
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("SANDYARD_NETWORK", "false"),
            ("SANDYARD_TIMEOUT_SECS", "60"),
            ("SANDYARD_CONTAINER_RUNTIME", "podman"),
            ("SANDYARD_DEFAULT_IMAGE", "node:20"),
        ])
        .unwrap();
        assert!(!config.network);
        assert_eq!(config.container.default_timeout, Duration::from_secs(60));
        assert_eq!(config.container.runtime, "podman");
        assert_eq!(config.default_image, "node:20");
    }

    #[test]
    fn test_hosted_repo_client_uses_api_url() {
        let config = load(&[]).unwrap();
        assert_eq!(config.hosted_repo_client().api_url(), "https://api.github.com");

        let config = load(&[("SANDYARD_GITHUB_API_URL", "https://ghe.acme.dev/api/v3/")]).unwrap();
        assert_eq!(
            config.hosted_repo_client().api_url(),
            "https://ghe.acme.dev/api/v3"
        );
    }

    #[test]
    fn test_invalid_number() {
        let err = load(&[("SANDYARD_CPU_SHARES", "lots")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "SANDYARD_CPU_SHARES"));
    }

    #[test]
    fn test_invalid_bool() {
        let err = load(&[("SANDYARD_NETWORK", "maybe")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "SANDYARD_NETWORK"));
    }

    #[test]
    fn test_relative_mount_point_rejected() {
        assert!(load(&[("SANDYARD_MOUNT_POINT", "workspace")]).is_err());
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = load(&[("SANDYARD_MEMORY_LIMIT", "  ")]).unwrap();
        assert_eq!(config.container.memory_limit, "2g");
    }
}
