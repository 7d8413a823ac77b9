//! AgentStore: on-disk persistence (spec §4.6).
//!
//! Layout: `<store>/<agentId>/{session.json, files/, api-key.json?}`. Writes
//! are atomic (write to `.tmp`, then rename), adapted from the teacher's
//! admin `save_config` handler.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hub_domain::agent::AgentConfig;
use hub_domain::error::{Error, Result};
use hub_domain::tool::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scheduler::ScheduleEntry;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub serialized_at: DateTime<Utc>,
}

/// Full persisted state of one Runner (spec §4.1 `serialize()`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub config: AgentConfig,
    pub conversation: Vec<Message>,
    pub metadata: SnapshotMetadata,
    #[serde(default)]
    pub state: std::collections::HashMap<String, Value>,
    #[serde(default)]
    pub storage: std::collections::HashMap<String, Value>,
    #[serde(default)]
    pub dom_mirror: Option<DomMirror>,
    #[serde(default)]
    pub schedules: Vec<ScheduleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomMirror {
    pub body_html: String,
    pub head_html: String,
    pub body_attributes: std::collections::HashMap<String, String>,
    pub captured_at: DateTime<Utc>,
}

pub struct AgentStore {
    root: PathBuf,
}

impl AgentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn agent_dir(&self, agent_id: &str) -> PathBuf {
        self.root.join(agent_id)
    }

    /// The bounded files root for this agent, per spec §3 FilesRoot.
    pub fn files_root(&self, agent_id: &str) -> PathBuf {
        self.agent_dir(agent_id).join("files")
    }

    pub async fn save(&self, agent_id: &str, snapshot: &AgentSnapshot) -> Result<()> {
        let dir = self.agent_dir(agent_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(Error::Io)?;
        tokio::fs::create_dir_all(dir.join("files"))
            .await
            .map_err(Error::Io)?;

        let path = dir.join("session.json");
        let tmp_path = dir.join("session.json.tmp");
        let body = serde_json::to_vec_pretty(snapshot).map_err(Error::Json)?;
        tokio::fs::write(&tmp_path, &body).await.map_err(Error::Io)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(Error::Io)?;
        Ok(())
    }

    pub async fn load(&self, agent_id: &str) -> Result<AgentSnapshot> {
        let path = self.agent_dir(agent_id).join("session.json");
        let body = tokio::fs::read(&path).await.map_err(Error::Io)?;
        serde_json::from_slice(&body).map_err(Error::Json)
    }

    pub async fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        if !self.root.exists() {
            return Ok(ids);
        }
        let mut read_dir = tokio::fs::read_dir(&self.root).await.map_err(Error::Io)?;
        while let Some(entry) = read_dir.next_entry().await.map_err(Error::Io)? {
            if entry.path().is_dir() && entry.path().join("session.json").exists() {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub async fn delete(&self, agent_id: &str) -> Result<()> {
        let dir = self.agent_dir(agent_id);
        if dir.exists() {
            tokio::fs::remove_dir_all(&dir).await.map_err(Error::Io)?;
        }
        Ok(())
    }

    /// Persist a per-agent API key at `api-key.json`, mode 0600.
    pub async fn save_api_key(&self, agent_id: &str, key: &str) -> Result<()> {
        let dir = self.agent_dir(agent_id);
        tokio::fs::create_dir_all(&dir).await.map_err(Error::Io)?;
        let path = dir.join("api-key.json");
        let body = serde_json::to_vec(&serde_json::json!({ "key": key })).map_err(Error::Json)?;
        tokio::fs::write(&path, &body).await.map_err(Error::Io)?;
        set_owner_only_permissions(&path).await;
        Ok(())
    }
}

#[cfg(unix)]
async fn set_owner_only_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = tokio::fs::metadata(path).await {
        let mut perms = meta.permissions();
        perms.set_mode(0o600);
        let _ = tokio::fs::set_permissions(path, perms).await;
    }
}

#[cfg(not(unix))]
async fn set_owner_only_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_snapshot() -> AgentSnapshot {
        AgentSnapshot {
            config: AgentConfig {
                id: "a1".into(),
                name: "test".into(),
                model: "m".into(),
                provider: "p".into(),
                system_prompt: "sys".into(),
                tools: vec![],
                skills: vec![],
                max_tokens: 1000,
                token_budget: None,
                cost_budget_usd: None,
                network_policy: None,
                sandbox_permissions: None,
            },
            conversation: vec![Message::user("hi")],
            metadata: SnapshotMetadata::default(),
            state: Default::default(),
            storage: Default::default(),
            dom_mirror: None,
            schedules: vec![],
        }
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::new(dir.path());
        let snapshot = test_snapshot();
        store.save("a1", &snapshot).await.unwrap();
        let loaded = store.load("a1").await.unwrap();
        assert_eq!(loaded.config.id, "a1");
        assert_eq!(loaded.conversation.len(), 1);
    }

    #[tokio::test]
    async fn list_returns_saved_agents() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::new(dir.path());
        store.save("a1", &test_snapshot()).await.unwrap();
        store.save("a2", &test_snapshot()).await.unwrap();
        let ids = store.list().await.unwrap();
        assert_eq!(ids, vec!["a1".to_string(), "a2".to_string()]);
    }

    #[tokio::test]
    async fn delete_removes_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::new(dir.path());
        store.save("a1", &test_snapshot()).await.unwrap();
        store.delete("a1").await.unwrap();
        assert!(store.load("a1").await.is_err());
    }

    #[tokio::test]
    async fn files_root_is_scoped_per_agent() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::new(dir.path());
        assert_eq!(store.files_root("a1"), dir.path().join("a1").join("files"));
    }
}
