//! The `filesystem` and `hub_files` tools (spec §4.3).
//!
//! `filesystem` resolves against a configured allow-listed prefix set;
//! `hub_files` is the bounded variant restricted to a single agent's
//! `<store>/<agentId>/files/` root. Both share the same path-containment
//! check, adapted from the teacher's `file_ops::validate_path`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FileAction {
    Read { path: String },
    Write { path: String, content: String },
    List { path: String },
    Delete { path: String },
    Mkdir { path: String },
    Stat { path: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatResult {
    pub size: u64,
    pub modified: DateTime<Utc>,
    pub is_dir: bool,
}

/// Resolve `requested` against `roots`, rejecting traversal escapes after
/// normalization. At least one root must contain the resolved path.
pub fn resolve_within(roots: &[PathBuf], requested: &str) -> Result<PathBuf, String> {
    let requested_path = Path::new(requested);
    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err("path must not contain '..' components".into());
        }
    }

    for root in roots {
        let Ok(canonical_root) = root.canonicalize() else {
            continue;
        };
        let candidate = if requested_path.is_absolute() {
            requested_path.to_path_buf()
        } else {
            canonical_root.join(requested_path)
        };

        let resolved = normalize(&candidate);
        if resolved.starts_with(&canonical_root) {
            return Ok(resolved);
        }
    }

    Err(format!(
        "path '{requested}' does not resolve within any allowed prefix"
    ))
}

/// Lexically normalize a path without requiring it to exist (so writes to
/// not-yet-created files still resolve).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub async fn execute(action: FileAction, roots: &[PathBuf]) -> Result<serde_json::Value, String> {
    match action {
        FileAction::Read { path } => {
            let resolved = resolve_within(roots, &path)?;
            let content = fs::read_to_string(&resolved)
                .await
                .map_err(|e| format!("read failed: {e}"))?;
            Ok(serde_json::json!({ "content": content }))
        }
        FileAction::Write { path, content } => {
            let resolved = resolve_within(roots, &path)?;
            if let Some(parent) = resolved.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| format!("mkdir failed: {e}"))?;
            }
            fs::write(&resolved, content)
                .await
                .map_err(|e| format!("write failed: {e}"))?;
            Ok(serde_json::json!({ "written": true }))
        }
        FileAction::List { path } => {
            let resolved = resolve_within(roots, &path)?;
            let mut entries = Vec::new();
            let mut read_dir = fs::read_dir(&resolved)
                .await
                .map_err(|e| format!("list failed: {e}"))?;
            while let Some(entry) = read_dir
                .next_entry()
                .await
                .map_err(|e| format!("list failed: {e}"))?
            {
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| format!("stat failed: {e}"))?;
                entries.push(DirEntry {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size: meta.len(),
                    modified: meta.modified().map(DateTime::<Utc>::from).unwrap_or(Utc::now()),
                    is_dir: meta.is_dir(),
                });
            }
            Ok(serde_json::to_value(entries).unwrap())
        }
        FileAction::Delete { path } => {
            let resolved = resolve_within(roots, &path)?;
            let meta = fs::metadata(&resolved)
                .await
                .map_err(|e| format!("stat failed: {e}"))?;
            if meta.is_dir() {
                fs::remove_dir_all(&resolved)
                    .await
                    .map_err(|e| format!("delete failed: {e}"))?;
            } else {
                fs::remove_file(&resolved)
                    .await
                    .map_err(|e| format!("delete failed: {e}"))?;
            }
            Ok(serde_json::json!({ "deleted": true }))
        }
        FileAction::Mkdir { path } => {
            let resolved = resolve_within(roots, &path)?;
            fs::create_dir_all(&resolved)
                .await
                .map_err(|e| format!("mkdir failed: {e}"))?;
            Ok(serde_json::json!({ "created": true }))
        }
        FileAction::Stat { path } => {
            let resolved = resolve_within(roots, &path)?;
            let meta = fs::metadata(&resolved)
                .await
                .map_err(|e| format!("stat failed: {e}"))?;
            Ok(serde_json::to_value(StatResult {
                size: meta.len(),
                modified: meta.modified().map(DateTime::<Utc>::from).unwrap_or(Utc::now()),
                is_dir: meta.is_dir(),
            })
            .unwrap())
        }
    }
}

/// The bounded `hub_files` root for one agent: `<store>/<agentId>/files/`.
pub fn hub_files_root(store_root: &Path, agent_id: &str) -> PathBuf {
    store_root.join(agent_id).join("files")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let roots = vec![dir.path().to_path_buf()];
        execute(
            FileAction::Write {
                path: "a.txt".into(),
                content: "hi".into(),
            },
            &roots,
        )
        .await
        .unwrap();
        let result = execute(FileAction::Read { path: "a.txt".into() }, &roots)
            .await
            .unwrap();
        assert_eq!(result["content"], "hi");
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let roots = vec![dir.path().to_path_buf()];
        let err = execute(
            FileAction::Read {
                path: "../outside.txt".into(),
            },
            &roots,
        )
        .await
        .unwrap_err();
        assert!(err.contains(".."));
    }

    #[tokio::test]
    async fn absolute_path_outside_roots_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let roots = vec![dir.path().to_path_buf()];
        let err = execute(
            FileAction::Read {
                path: "/etc/passwd".into(),
            },
            &roots,
        )
        .await
        .unwrap_err();
        assert!(err.contains("does not resolve"));
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let roots = vec![dir.path().to_path_buf()];
        execute(
            FileAction::Write {
                path: "b.txt".into(),
                content: "x".into(),
            },
            &roots,
        )
        .await
        .unwrap();
        execute(FileAction::Delete { path: "b.txt".into() }, &roots)
            .await
            .unwrap();
        assert!(!dir.path().join("b.txt").exists());
    }

    #[test]
    fn hub_files_root_is_scoped_per_agent() {
        let root = Path::new("/data/agents");
        assert_eq!(
            hub_files_root(root, "a1"),
            PathBuf::from("/data/agents/a1/files")
        );
    }
}
