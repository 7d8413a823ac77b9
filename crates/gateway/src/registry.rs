//! AgentRegistry: the sole owner of live Runners (spec §3 Ownership
//! summary). The Scheduler and ConnectionManager hold only agent ids and
//! look runners up here on every use (§9 "Cyclic references").

use std::collections::HashMap;
use std::sync::Arc;

use hub_domain::agent::RunnerState;
use parking_lot::RwLock;

use crate::runner::AgentRunner;

#[derive(Default)]
pub struct AgentRegistry {
    runners: RwLock<HashMap<String, Arc<AgentRunner>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, runner: Arc<AgentRunner>) {
        self.runners.write().insert(runner.id().to_string(), runner);
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<AgentRunner>> {
        self.runners.read().get(agent_id).cloned()
    }

    /// Removing implies resource disposal: the caller is expected to have
    /// already called `kill()`/`stop()` on the runner (§9 "Replacing loose
    /// maps with semantic containers").
    pub fn remove(&self, agent_id: &str) -> Option<Arc<AgentRunner>> {
        self.runners.write().remove(agent_id)
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.runners.read().keys().cloned().collect()
    }

    pub fn runner_state(&self, agent_id: &str) -> Option<RunnerState> {
        self.runners.read().get(agent_id).map(|r| r.state())
    }

    pub fn is_busy(&self, agent_id: &str) -> Option<bool> {
        self.runners.read().get(agent_id).map(|r| r.is_busy())
    }

    pub fn len(&self) -> usize {
        self.runners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use hub_domain::agent::AgentConfig;

    fn test_config(id: &str) -> AgentConfig {
        AgentConfig {
            id: id.into(),
            name: id.into(),
            model: "m".into(),
            provider: "p".into(),
            system_prompt: String::new(),
            tools: vec![],
            skills: vec![],
            max_tokens: 1000,
            token_budget: None,
            cost_budget_usd: None,
            network_policy: None,
            sandbox_permissions: None,
        }
    }

    #[test]
    fn insert_then_get_round_trips() {
        let registry = AgentRegistry::new();
        let runner = Arc::new(AgentRunner::new(test_config("a1"), CancelToken::new()));
        registry.insert(runner.clone());
        assert!(registry.get("a1").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn remove_forgets_the_runner() {
        let registry = AgentRegistry::new();
        let runner = Arc::new(AgentRunner::new(test_config("a1"), CancelToken::new()));
        registry.insert(runner);
        registry.remove("a1");
        assert!(registry.get("a1").is_none());
    }
}
