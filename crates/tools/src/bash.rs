//! The `bash` tool (spec §4.3): run a command string inside a per-agent
//! sandbox directory, bounded by a timeout, optionally dropped to an
//! unprivileged user.
//!
//! Grounded on the teacher's `exec.rs` process-monitor shape (spawn via
//! `sh -c`, `tokio::select!` race between completion and a deadline) but
//! stripped of background sessions and stdin streaming — the bash tool's
//! contract is one command in, one combined-output result out.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

#[derive(Debug, Clone, Deserialize)]
pub struct BashRequest {
    pub command: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BashResult {
    pub output: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// Create the agent's sandbox directory on demand, setting ownership to
/// `run_as_user` when configured (spec §4.3: `<sandboxRoot>/<hubAgentId>`).
pub async fn ensure_sandbox_dir(
    sandbox_root: &Path,
    agent_id: &str,
    run_as_user: Option<&str>,
) -> std::io::Result<PathBuf> {
    let dir = sandbox_root.join(agent_id);
    tokio::fs::create_dir_all(&dir).await?;
    if let Some(user) = run_as_user {
        chown_to_user(&dir, user).await;
    }
    Ok(dir)
}

#[cfg(unix)]
async fn chown_to_user(dir: &Path, user: &str) {
    let dir = dir.to_owned();
    let user = user.to_owned();
    let _ = tokio::task::spawn_blocking(move || {
        let _ = std::process::Command::new("chown")
            .arg(&user)
            .arg(&dir)
            .status();
    })
    .await;
}

#[cfg(not(unix))]
async fn chown_to_user(_dir: &Path, _user: &str) {}

/// Run `req.command` under `sh -c`, racing completion against `timeout_ms`
/// (falling back to the configured default/max). Isolation is via the
/// working directory and optional `run_as_user`, not command filtering —
/// an escaping absolute path is not specially restricted (spec §4.3).
pub async fn run_bash(
    req: BashRequest,
    sandbox_dir: &Path,
    default_timeout_ms: u64,
    max_timeout_ms: u64,
    run_as_user: Option<&str>,
) -> BashResult {
    let timeout_ms = req
        .timeout_ms
        .unwrap_or(default_timeout_ms)
        .min(max_timeout_ms);

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&req.command);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());

    let cwd = req
        .cwd
        .map(|c| sandbox_dir.join(c))
        .unwrap_or_else(|| sandbox_dir.to_path_buf());
    cmd.current_dir(&cwd);

    #[cfg(unix)]
    if let Some(user) = run_as_user {
        if let Some(uid) = resolve_uid(user) {
            use std::os::unix::process::CommandExt;
            cmd.uid(uid);
        }
    }
    #[cfg(not(unix))]
    let _ = run_as_user;

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return BashResult {
                output: format!("failed to spawn: {e}"),
                exit_code: None,
                timed_out: false,
            }
        }
    };

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let deadline = tokio::time::sleep(std::time::Duration::from_millis(timeout_ms));

    tokio::select! {
        status = child.wait() => {
            let mut output = String::new();
            if let Some(mut s) = stdout.take() {
                let _ = s.read_to_string(&mut output).await;
            }
            let mut err = String::new();
            if let Some(mut s) = stderr.take() {
                let _ = s.read_to_string(&mut err).await;
            }
            output.push_str(&err);
            BashResult {
                output,
                exit_code: status.ok().and_then(|s| s.code()),
                timed_out: false,
            }
        }
        _ = deadline => {
            let _ = child.kill().await;
            let mut output = String::new();
            if let Some(mut s) = stdout.take() {
                let _ = s.read_to_string(&mut output).await;
            }
            BashResult {
                output,
                exit_code: None,
                timed_out: true,
            }
        }
    }
}

#[cfg(unix)]
fn resolve_uid(user: &str) -> Option<u32> {
    if let Ok(n) = user.parse::<u32>() {
        return Some(n);
    }
    // Best-effort /etc/passwd lookup; a missing user just skips the drop.
    let passwd = std::fs::read_to_string("/etc/passwd").ok()?;
    for line in passwd.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() >= 3 && fields[0] == user {
            return fields[2].parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_simple_command() {
        let dir = tempfile::tempdir().unwrap();
        let req = BashRequest {
            command: "echo hello".into(),
            cwd: None,
            timeout_ms: None,
        };
        let result = run_bash(req, dir.path(), 5_000, 30_000, None).await;
        assert_eq!(result.exit_code, Some(0));
        assert!(result.output.contains("hello"));
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn times_out_long_running_command() {
        let dir = tempfile::tempdir().unwrap();
        let req = BashRequest {
            command: "sleep 5".into(),
            cwd: None,
            timeout_ms: Some(50),
        };
        let result = run_bash(req, dir.path(), 5_000, 30_000, None).await;
        assert!(result.timed_out);
        assert!(result.exit_code.is_none());
    }

    #[tokio::test]
    async fn timeout_is_clamped_to_max() {
        let dir = tempfile::tempdir().unwrap();
        let req = BashRequest {
            command: "echo ok".into(),
            cwd: None,
            timeout_ms: Some(u64::MAX),
        };
        let result = run_bash(req, dir.path(), 30_000, 300_000, None).await;
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn ensure_sandbox_dir_creates_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = ensure_sandbox_dir(root.path(), "agent-1", None).await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir, root.path().join("agent-1"));
    }
}
