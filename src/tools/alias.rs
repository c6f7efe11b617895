//! Translation between a workspace's real path and the agent-facing alias.
//!
//! The agent only ever sees the sandbox mount point (`/workspace/...`). Paths
//! it sends are mapped onto the real directory; everything we send back has
//! the real directory replaced by the mount point.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::workspace::canonicalize_lenient;

/// Two-way mapping for one workspace.
#[derive(Debug, Clone)]
pub struct PathAlias {
    real: PathBuf,
    mount_point: String,
    /// Every spelling of the real path we might emit, longest first.
    forms: Vec<String>,
    pattern: Option<Regex>,
}

impl PathAlias {
    pub fn new(real: impl Into<PathBuf>, mount_point: impl Into<String>) -> Self {
        let real = real.into();
        let mount_point = mount_point.into();

        let mut forms = vec![trim_trailing_slash(&real.to_string_lossy())];
        if let Ok(canonical) = canonicalize_lenient(&real) {
            let canonical = trim_trailing_slash(&canonical.to_string_lossy());
            if !forms.contains(&canonical) {
                forms.push(canonical);
            }
        }
        forms.retain(|f| !f.is_empty());
        forms.sort_by_key(|f| std::cmp::Reverse(f.len()));

        let pattern = if forms.is_empty() {
            None
        } else {
            let alternatives: Vec<String> = forms
                .iter()
                .map(|f| {
                    let boundary = if f.chars().last().is_some_and(is_word_char) {
                        r"\b"
                    } else {
                        ""
                    };
                    format!("{}{}", regex::escape(f), boundary)
                })
                .collect();
            Regex::new(&alternatives.join("|")).ok()
        };

        Self {
            real,
            mount_point,
            forms,
            pattern,
        }
    }

    pub fn mount_point(&self) -> &str {
        &self.mount_point
    }

    pub fn real(&self) -> &Path {
        &self.real
    }

    /// Map an agent-supplied path onto the real workspace directory.
    ///
    /// Paths not under the mount point are returned unchanged.
    pub fn to_real(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.mount_point) {
            Ok(rest) if rest.as_os_str().is_empty() => self.real.clone(),
            Ok(rest) => self.real.join(rest),
            Err(_) => path.to_path_buf(),
        }
    }

    /// Replace every occurrence of the real path in `text` with the alias.
    pub fn rewrite(&self, text: &str) -> String {
        match &self.pattern {
            Some(pattern) => pattern
                .replace_all(text, regex::NoExpand(&self.mount_point))
                .into_owned(),
            None => self
                .forms
                .iter()
                .fold(text.to_string(), |acc, f| acc.replace(f, &self.mount_point)),
        }
    }

    /// Rewrite every string inside a JSON value.
    pub fn rewrite_value(&self, value: &mut serde_json::Value) {
        match value {
            serde_json::Value::String(s) => {
                let rewritten = self.rewrite(s);
                if rewritten != *s {
                    *s = rewritten;
                }
            }
            serde_json::Value::Array(items) => {
                for item in items {
                    self.rewrite_value(item);
                }
            }
            serde_json::Value::Object(map) => {
                for item in map.values_mut() {
                    self.rewrite_value(item);
                }
            }
            _ => {}
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn trim_trailing_slash(s: &str) -> String {
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() && !s.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}
