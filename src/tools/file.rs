//! Validated file operations for the agent's tool layer.
//!
//! Every path is resolved through [`PathResolver`] before anything touches
//! the disk. With an execution context active, the agent works in terms of
//! the sandbox mount point: incoming `/workspace/...` paths are mapped onto
//! the real workspace directory and every string in a result (errors
//! included) has the real directory replaced by the mount point.
//!
//! Without a context, paths are confined to the configured workspaces root
//! and returned as-is.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Value, json};
use tokio::fs;

use crate::context::TurnContext;
use crate::tools::alias::PathAlias;
use crate::tools::tool::ToolError;
use crate::workspace::PathResolver;

/// Maximum file size for reading (1MB).
const MAX_READ_SIZE: u64 = 1024 * 1024;

/// Maximum file size for writing (5MB).
const MAX_WRITE_SIZE: usize = 5 * 1024 * 1024;

/// Maximum directory listing entries.
const MAX_DIR_ENTRIES: usize = 500;

/// Maximum search hits returned.
const MAX_SEARCH_MATCHES: usize = 200;

/// Matched lines longer than this are cut.
const MAX_MATCH_LINE_CHARS: usize = 300;

/// Directories never descended into by listings and searches.
const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    "__pycache__",
    "venv",
    ".venv",
    ".next",
];

/// Where paths resolve and how results are presented for one call.
struct Scope {
    root: PathBuf,
    alias: Option<PathAlias>,
}

impl Scope {
    fn to_real(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match &self.alias {
            Some(alias) => alias.to_real(path),
            None => path.to_path_buf(),
        }
    }

    fn finish(&self, result: Result<Value, ToolError>) -> Result<Value, ToolError> {
        let Some(alias) = &self.alias else {
            return result;
        };
        match result {
            Ok(mut value) => {
                alias.rewrite_value(&mut value);
                Ok(value)
            }
            Err(e) => Err(e.map_message(|m| alias.rewrite(m))),
        }
    }
}

/// File operations confined to a workspace.
#[derive(Debug, Clone)]
pub struct SecureFileFacade {
    resolver: PathResolver,
    mount_point: String,
}

impl SecureFileFacade {
    pub fn new(resolver: PathResolver, mount_point: impl Into<String>) -> Self {
        Self {
            resolver,
            mount_point: mount_point.into(),
        }
    }

    async fn scope(&self, turn: &TurnContext) -> Scope {
        match turn.snapshot().await {
            Some(ctx) => Scope {
                alias: Some(PathAlias::new(ctx.workspace_path(), &self.mount_point)),
                root: ctx.workspace_path,
            },
            None => Scope {
                root: self.resolver.workspaces_root().to_path_buf(),
                alias: None,
            },
        }
    }

    fn resolve(&self, scope: &Scope, path: &str) -> Result<PathBuf, ToolError> {
        if path.trim().is_empty() {
            return Err(ToolError::InvalidParameters("path must not be empty".into()));
        }
        Ok(self.resolver.resolve(&scope.root, scope.to_real(path))?)
    }

    /// Read a whole file.
    pub async fn read_file(&self, turn: &TurnContext, path: &str) -> Result<Value, ToolError> {
        let scope = self.scope(turn).await;
        let result = self.read_file_in(&scope, path).await;
        scope.finish(result)
    }

    /// Read lines `start..=end`, 1-based. `end` past the last line is clamped.
    pub async fn read_lines(
        &self,
        turn: &TurnContext,
        path: &str,
        start: usize,
        end: usize,
    ) -> Result<Value, ToolError> {
        let scope = self.scope(turn).await;
        let result = self.read_lines_in(&scope, path, start, end).await;
        scope.finish(result)
    }

    /// Write a file, creating parent directories.
    pub async fn write_file(
        &self,
        turn: &TurnContext,
        path: &str,
        content: &str,
    ) -> Result<Value, ToolError> {
        let scope = self.scope(turn).await;
        let result = self.write_file_in(&scope, path, content).await;
        scope.finish(result)
    }

    /// Regex search over files under `path` (a directory or single file).
    pub async fn search(
        &self,
        turn: &TurnContext,
        path: &str,
        pattern: &str,
    ) -> Result<Value, ToolError> {
        let scope = self.scope(turn).await;
        let result = self.search_in(&scope, path, pattern).await;
        scope.finish(result)
    }

    /// List a directory, optionally recursing up to `max_depth` levels.
    pub async fn list_dir(
        &self,
        turn: &TurnContext,
        path: &str,
        recursive: bool,
        max_depth: usize,
    ) -> Result<Value, ToolError> {
        let scope = self.scope(turn).await;
        let result = self.list_dir_in(&scope, path, recursive, max_depth).await;
        scope.finish(result)
    }

    /// Create a directory and any missing parents.
    pub async fn create_dir(&self, turn: &TurnContext, path: &str) -> Result<Value, ToolError> {
        let scope = self.scope(turn).await;
        let result = self.create_dir_in(&scope, path).await;
        scope.finish(result)
    }

    /// Existence, kind, size and modification time of a path.
    pub async fn file_info(&self, turn: &TurnContext, path: &str) -> Result<Value, ToolError> {
        let scope = self.scope(turn).await;
        let result = self.file_info_in(&scope, path).await;
        scope.finish(result)
    }

    async fn read_file_in(&self, scope: &Scope, path: &str) -> Result<Value, ToolError> {
        let resolved = self.resolve(scope, path)?;
        let content = read_checked(&resolved).await?;
        Ok(json!({
            "path": resolved.display().to_string(),
            "content": content,
            "size": content.len(),
        }))
    }

    async fn read_lines_in(
        &self,
        scope: &Scope,
        path: &str,
        start: usize,
        end: usize,
    ) -> Result<Value, ToolError> {
        if start == 0 || end < start {
            return Err(ToolError::InvalidParameters(format!(
                "invalid line range {}..{} (lines are 1-based)",
                start, end
            )));
        }
        let resolved = self.resolve(scope, path)?;
        let content = read_checked(&resolved).await?;

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        let first = (start - 1).min(total_lines);
        let last = end.min(total_lines);
        let selected = &lines[first..last];

        Ok(json!({
            "path": resolved.display().to_string(),
            "start": start,
            "end": last,
            "total_lines": total_lines,
            "lines": selected,
        }))
    }

    async fn write_file_in(
        &self,
        scope: &Scope,
        path: &str,
        content: &str,
    ) -> Result<Value, ToolError> {
        if content.len() > MAX_WRITE_SIZE {
            return Err(ToolError::InvalidParameters(format!(
                "Content too large ({} bytes). Maximum is {} bytes.",
                content.len(),
                MAX_WRITE_SIZE
            )));
        }
        let resolved = self.resolve(scope, path)?;

        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::ExecutionFailed(format!("Failed to create directories: {}", e))
            })?;
        }
        fs::write(&resolved, content).await.map_err(|e| {
            ToolError::ExecutionFailed(format!(
                "Failed to write {}: {}",
                resolved.display(),
                e
            ))
        })?;

        tracing::debug!("Wrote {} bytes to {}", content.len(), resolved.display());
        Ok(json!({
            "path": resolved.display().to_string(),
            "bytes_written": content.len(),
            "success": true,
        }))
    }

    async fn search_in(
        &self,
        scope: &Scope,
        path: &str,
        pattern: &str,
    ) -> Result<Value, ToolError> {
        let regex = Regex::new(pattern)
            .map_err(|e| ToolError::InvalidParameters(format!("invalid pattern: {}", e)))?;
        let resolved = self.resolve(scope, path)?;

        let mut matches = Vec::new();
        let truncated = search_inner(&resolved, &regex, &mut matches).await?;

        Ok(json!({
            "path": resolved.display().to_string(),
            "pattern": pattern,
            "matches": matches,
            "truncated": truncated,
        }))
    }

    async fn list_dir_in(
        &self,
        scope: &Scope,
        path: &str,
        recursive: bool,
        max_depth: usize,
    ) -> Result<Value, ToolError> {
        let resolved = self.resolve(scope, path)?;
        let mut entries = Vec::new();
        list_dir_inner(&resolved, &resolved, recursive, max_depth, 0, &mut entries).await?;
        entries.sort();
        let truncated = entries.len() >= MAX_DIR_ENTRIES;

        Ok(json!({
            "path": resolved.display().to_string(),
            "entries": entries,
            "count": entries.len(),
            "truncated": truncated,
        }))
    }

    async fn create_dir_in(&self, scope: &Scope, path: &str) -> Result<Value, ToolError> {
        let resolved = self.resolve(scope, path)?;
        let existed = fs::try_exists(&resolved).await.unwrap_or(false);
        fs::create_dir_all(&resolved).await.map_err(|e| {
            ToolError::ExecutionFailed(format!(
                "Failed to create {}: {}",
                resolved.display(),
                e
            ))
        })?;
        Ok(json!({
            "path": resolved.display().to_string(),
            "created": !existed,
        }))
    }

    async fn file_info_in(&self, scope: &Scope, path: &str) -> Result<Value, ToolError> {
        let resolved = self.resolve(scope, path)?;
        let metadata = match fs::metadata(&resolved).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(json!({
                    "path": resolved.display().to_string(),
                    "exists": false,
                }));
            }
            Err(e) => return Err(e.into()),
        };
        let modified = metadata
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

        Ok(json!({
            "path": resolved.display().to_string(),
            "exists": true,
            "is_dir": metadata.is_dir(),
            "size": metadata.len(),
            "size_display": format_size(metadata.len()),
            "modified": modified,
        }))
    }
}

async fn read_checked(path: &Path) -> Result<String, ToolError> {
    let metadata = fs::metadata(path).await.map_err(|e| {
        ToolError::ExecutionFailed(format!("Cannot access {}: {}", path.display(), e))
    })?;
    if metadata.len() > MAX_READ_SIZE {
        return Err(ToolError::ExecutionFailed(format!(
            "File too large ({} bytes). Maximum is {} bytes. Use a line range instead.",
            metadata.len(),
            MAX_READ_SIZE
        )));
    }
    fs::read_to_string(path).await.map_err(|e| {
        ToolError::ExecutionFailed(format!("Failed to read {}: {}", path.display(), e))
    })
}

/// Returns true when the match limit was hit.
async fn search_inner(
    root: &Path,
    regex: &Regex,
    matches: &mut Vec<Value>,
) -> Result<bool, ToolError> {
    let mut pending = vec![root.to_path_buf()];

    while let Some(path) = pending.pop() {
        // Links are never followed: their targets were not checked against the root.
        let metadata = fs::symlink_metadata(&path).await?;
        if metadata.file_type().is_symlink() {
            tracing::debug!("Search skipping symlink {}", path.display());
            continue;
        }
        if metadata.is_dir() {
            let mut children = Vec::new();
            let mut dir = fs::read_dir(&path).await?;
            while let Some(entry) = dir.next_entry().await? {
                let name = entry.file_name();
                if SKIPPED_DIRS.contains(&name.to_string_lossy().as_ref()) {
                    continue;
                }
                children.push(entry.path());
            }
            // Reverse so the stack yields entries in name order.
            children.sort();
            pending.extend(children.into_iter().rev());
            continue;
        }

        if metadata.len() > MAX_READ_SIZE {
            continue;
        }
        // Binary or non-UTF-8 files are not searchable.
        let Ok(content) = fs::read_to_string(&path).await else {
            continue;
        };

        for (idx, line) in content.lines().enumerate() {
            if !regex.is_match(line) {
                continue;
            }
            if matches.len() >= MAX_SEARCH_MATCHES {
                return Ok(true);
            }
            let line: String = line.chars().take(MAX_MATCH_LINE_CHARS).collect();
            matches.push(json!({
                "path": path.display().to_string(),
                "line_number": idx + 1,
                "line": line,
            }));
        }
    }

    Ok(false)
}

/// Recursively list directory contents.
async fn list_dir_inner(
    base: &Path,
    path: &Path,
    recursive: bool,
    max_depth: usize,
    current_depth: usize,
    entries: &mut Vec<String>,
) -> Result<(), ToolError> {
    if entries.len() >= MAX_DIR_ENTRIES {
        return Ok(());
    }

    let mut dir = fs::read_dir(path).await.map_err(|e| {
        ToolError::ExecutionFailed(format!("Failed to read directory {}: {}", path.display(), e))
    })?;

    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("Failed to read entry: {}", e)))?
    {
        if entries.len() >= MAX_DIR_ENTRIES {
            break;
        }

        let entry_path = entry.path();
        let relative = entry_path
            .strip_prefix(base)
            .unwrap_or(&entry_path)
            .to_string_lossy();

        let metadata = entry.metadata().await.ok();
        let is_dir = metadata.as_ref().is_some_and(|m| m.is_dir());

        let display = if is_dir {
            format!("{}/", relative)
        } else {
            let size = metadata.as_ref().map(|m| m.len()).unwrap_or(0);
            format!("{} ({})", relative, format_size(size))
        };
        entries.push(display);

        if recursive && is_dir && current_depth < max_depth {
            let name = entry.file_name();
            if !SKIPPED_DIRS.contains(&name.to_string_lossy().as_ref()) {
                Box::pin(list_dir_inner(
                    base,
                    &entry_path,
                    recursive,
                    max_depth,
                    current_depth + 1,
                    entries,
                ))
                .await?;
            }
        }
    }

    Ok(())
}

/// Format file size in human-readable form.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.1}MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1}KB", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;
    use uuid::Uuid;

    struct Fixture {
        _root: TempDir,
        workspace: PathBuf,
        facade: SecureFileFacade,
        turn: TurnContext,
    }

    async fn fixture(with_context: bool) -> Fixture {
        let root = TempDir::new().unwrap();
        let workspace = root.path().join("w1");
        std::fs::create_dir_all(workspace.join("src")).unwrap();
        std::fs::write(workspace.join("src/app.ts"), "const a = 1;\nconst b = 2;\nexport { a };\n")
            .unwrap();

        let turn = TurnContext::new();
        if with_context {
            turn.set_context(ExecutionContext::new(Uuid::new_v4(), &workspace, "node:22"))
                .await;
        }

        Fixture {
            facade: SecureFileFacade::new(PathResolver::new(root.path()), "/workspace"),
            _root: root,
            workspace,
            turn,
        }
    }

    fn real_prefix(f: &Fixture) -> String {
        f.workspace.canonicalize().unwrap().display().to_string()
    }

    #[tokio::test]
    async fn test_read_file_through_alias() {
        let f = fixture(true).await;
        let result = f
            .facade
            .read_file(&f.turn, "/workspace/src/app.ts")
            .await
            .unwrap();

        assert_eq!(result["path"], "/workspace/src/app.ts");
        assert!(result["content"].as_str().unwrap().contains("const a"));
    }

    #[tokio::test]
    async fn test_relative_path_resolves_against_workspace() {
        let f = fixture(true).await;
        let result = f.facade.read_file(&f.turn, "src/app.ts").await.unwrap();
        assert_eq!(result["path"], "/workspace/src/app.ts");
    }

    #[tokio::test]
    async fn test_traversal_rejected_without_leaking_real_path() {
        let f = fixture(true).await;
        let err = f
            .facade
            .read_file(&f.turn, "/workspace/../../etc/passwd")
            .await
            .unwrap_err();

        assert!(matches!(err, ToolError::NotAuthorized(_)));
        let msg = err.to_string();
        assert!(!msg.contains(&f.workspace.display().to_string()), "{}", msg);
        assert!(msg.contains("/workspace"), "{}", msg);
    }

    #[tokio::test]
    async fn test_write_then_read_lines() {
        let f = fixture(true).await;
        let written = f
            .facade
            .write_file(&f.turn, "/workspace/docs/notes.md", "one\ntwo\nthree\nfour\n")
            .await
            .unwrap();
        assert_eq!(written["path"], "/workspace/docs/notes.md");
        assert!(f.workspace.join("docs/notes.md").exists());

        let lines = f
            .facade
            .read_lines(&f.turn, "/workspace/docs/notes.md", 2, 10)
            .await
            .unwrap();
        assert_eq!(lines["lines"], json!(["two", "three", "four"]));
        assert_eq!(lines["end"], 4);
        assert_eq!(lines["total_lines"], 4);
    }

    #[tokio::test]
    async fn test_read_lines_rejects_zero_start() {
        let f = fixture(true).await;
        let err = f
            .facade
            .read_lines(&f.turn, "src/app.ts", 0, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn test_search_skips_dependency_dirs() {
        let f = fixture(true).await;
        std::fs::create_dir_all(f.workspace.join("node_modules/pkg")).unwrap();
        std::fs::write(f.workspace.join("node_modules/pkg/index.js"), "const a = 9;\n").unwrap();

        let result = f
            .facade
            .search(&f.turn, "/workspace", r"const \w+ =")
            .await
            .unwrap();

        let matches = result["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0]["path"], "/workspace/src/app.ts");
        assert_eq!(matches[1]["line_number"], 2);
        assert_eq!(result["truncated"], false);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_write_through_dangling_symlink_rejected() {
        let f = fixture(true).await;
        let outside = f._root.path().join("planted.txt");
        std::os::unix::fs::symlink(&outside, f.workspace.join("k")).unwrap();

        let err = f
            .facade
            .write_file(&f.turn, "/workspace/k", "pwned")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotAuthorized(_)));
        assert!(!outside.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_search_does_not_follow_symlinks() {
        let f = fixture(true).await;
        let outside = f._root.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("secret.env"), "API_KEY=topsecret\n").unwrap();
        std::os::unix::fs::symlink(&outside, f.workspace.join("leak")).unwrap();
        std::os::unix::fs::symlink(outside.join("secret.env"), f.workspace.join("env")).unwrap();

        let result = f
            .facade
            .search(&f.turn, "/workspace", "API_KEY")
            .await
            .unwrap();
        assert_eq!(result["matches"], json!([]));
    }

    #[tokio::test]
    async fn test_search_rejects_bad_pattern() {
        let f = fixture(true).await;
        let err = f.facade.search(&f.turn, ".", "(").await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidParameters(_)));
    }

    #[tokio::test]
    async fn test_list_dir_and_create_dir() {
        let f = fixture(true).await;
        let created = f
            .facade
            .create_dir(&f.turn, "/workspace/public/img")
            .await
            .unwrap();
        assert_eq!(created["created"], true);

        let listing = f
            .facade
            .list_dir(&f.turn, "/workspace", true, 3)
            .await
            .unwrap();
        let entries: Vec<&str> = listing["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e.as_str().unwrap())
            .collect();
        assert!(entries.contains(&"public/"));
        assert!(entries.contains(&"public/img/"));
        assert!(entries.iter().any(|e| e.starts_with("src/app.ts (")));
    }

    #[tokio::test]
    async fn test_file_info() {
        let f = fixture(true).await;
        let info = f.facade.file_info(&f.turn, "src/app.ts").await.unwrap();
        assert_eq!(info["exists"], true);
        assert_eq!(info["is_dir"], false);
        assert_eq!(info["path"], "/workspace/src/app.ts");

        let missing = f.facade.file_info(&f.turn, "src/nope.ts").await.unwrap();
        assert_eq!(missing["exists"], false);
    }

    #[tokio::test]
    async fn test_without_context_paths_pass_through() {
        let f = fixture(false).await;
        let path = f.workspace.join("src/app.ts");
        let result = f
            .facade
            .read_file(&f.turn, path.to_str().unwrap())
            .await
            .unwrap();

        let returned = result["path"].as_str().unwrap();
        assert!(returned.starts_with(&real_prefix(&f)), "{}", returned);
    }

    #[tokio::test]
    async fn test_without_context_outside_root_rejected() {
        let f = fixture(false).await;
        let err = f.facade.read_file(&f.turn, "/etc/hostname").await.unwrap_err();
        assert!(matches!(err, ToolError::NotAuthorized(_)));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.0KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0MB");
    }
}
