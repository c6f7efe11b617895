//! Path resolution and confinement for workspace directories.
//!
//! Every path the agent hands us is resolved against a workspace root and
//! rejected unless the canonical result stays inside that root. `..`
//! segments, absolute-path substitution and symlinked parents are all
//! handled by comparing canonical forms.

use std::path::{Component, Path, PathBuf};

use crate::error::PathError;

/// Resolves candidate paths against workspace roots.
#[derive(Debug, Clone)]
pub struct PathResolver {
    /// Directory holding one subdirectory per workspace.
    workspaces_root: PathBuf,
}

impl PathResolver {
    pub fn new(workspaces_root: impl Into<PathBuf>) -> Self {
        Self {
            workspaces_root: workspaces_root.into(),
        }
    }

    pub fn workspaces_root(&self) -> &Path {
        &self.workspaces_root
    }

    /// On-disk directory for a workspace id.
    pub fn workspace_dir(&self, workspace_id: &str) -> PathBuf {
        self.workspaces_root.join(workspace_id)
    }

    /// Resolve `candidate` against `workspace_root`.
    ///
    /// Relative candidates are joined onto the root. The result is the
    /// canonical path, which must equal or descend from the canonical root.
    pub fn resolve(
        &self,
        workspace_root: &Path,
        candidate: impl AsRef<Path>,
    ) -> Result<PathBuf, PathError> {
        let candidate = candidate.as_ref();
        let root = canonicalize_lenient(workspace_root)?;

        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            root.join(candidate)
        };
        let resolved = canonicalize_lenient(&joined)?;

        if resolved.starts_with(&root) {
            Ok(resolved)
        } else {
            tracing::warn!(
                "Rejected path {} (resolves outside {})",
                candidate.display(),
                root.display()
            );
            Err(PathError::PathTraversal {
                path: candidate.to_path_buf(),
            })
        }
    }

    /// Whether `path` is inside the configured workspaces root.
    pub fn is_within_workspace_root(&self, path: impl AsRef<Path>) -> bool {
        self.resolve(&self.workspaces_root, path).is_ok()
    }

    /// Recover the workspace id from a path under the workspaces root.
    ///
    /// Returns the first component below the root, or `None` when the path is
    /// the root itself or lies outside it.
    pub fn extract_workspace_id(&self, path: impl AsRef<Path>) -> Option<String> {
        let resolved = self.resolve(&self.workspaces_root, path).ok()?;
        let root = canonicalize_lenient(&self.workspaces_root).ok()?;

        match resolved.strip_prefix(&root).ok()?.components().next()? {
            Component::Normal(id) => Some(id.to_string_lossy().into_owned()),
            _ => None,
        }
    }
}

/// Symlink hops followed by hand before giving up, matching Linux `MAXSYMLINKS`.
const MAX_SYMLINK_HOPS: usize = 40;

/// Canonicalize a path that may not exist yet.
///
/// `.` and `..` are folded lexically first, then the deepest existing
/// ancestor is canonicalized (resolving symlinks) and the missing tail is
/// appended. A dangling symlink counts as existing: its target is followed
/// so the result names the file a write would actually create.
pub fn canonicalize_lenient(path: &Path) -> Result<PathBuf, PathError> {
    canonicalize_hops(path, 0).map_err(|source| PathError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn canonicalize_hops(path: &Path, hops: usize) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    let normalized = normalize_lexically(&absolute);

    let mut existing = normalized.as_path();
    let mut tail = Vec::new();
    loop {
        match std::fs::symlink_metadata(existing) {
            Ok(meta) if meta.file_type().is_symlink() && !existing.exists() => {
                if hops >= MAX_SYMLINK_HOPS {
                    return Err(std::io::Error::other(format!(
                        "too many levels of symbolic links at {}",
                        existing.display()
                    )));
                }
                let target = std::fs::read_link(existing)?;
                let mut next = match existing.parent() {
                    Some(parent) => parent.canonicalize()?.join(target),
                    None => target,
                };
                for name in tail.into_iter().rev() {
                    next.push(name);
                }
                return canonicalize_hops(&next, hops + 1);
            }
            Ok(_) => break,
            Err(_) => {}
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }

    let mut canonical = existing.canonicalize()?;
    for name in tail.into_iter().rev() {
        canonical.push(name);
    }
    Ok(canonical)
}

/// Fold `.` and `..` components without touching the filesystem.
///
/// `..` at the root stays at the root, matching how the kernel treats `/..`.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
