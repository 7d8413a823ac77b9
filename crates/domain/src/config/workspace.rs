use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn d_sandbox_path() -> PathBuf {
    PathBuf::from("./data/sandbox")
}
fn d_agent_store_path() -> PathBuf {
    PathBuf::from("./data/agents")
}

/// Parent directories for per-agent bash sandboxes and persisted sessions
/// (spec §6 Configuration surface: `sandboxPath`, `agentStorePath`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    #[serde(default = "d_sandbox_path")]
    pub sandbox_path: PathBuf,
    #[serde(default = "d_agent_store_path")]
    pub agent_store_path: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            sandbox_path: d_sandbox_path(),
            agent_store_path: d_agent_store_path(),
        }
    }
}
