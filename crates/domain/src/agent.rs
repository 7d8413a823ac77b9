//! Per-agent configuration and lifecycle types (spec §3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable snapshot read at the start of a turn (§3). Mutations land
/// through [`AgentConfig::updated`], a copy-on-write constructor, so a
/// turn already in flight never observes a mid-turn change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Stable across restart; also the key AgentStore persists under.
    pub id: String,
    pub name: String,
    pub model: String,
    pub provider: String,
    pub system_prompt: String,
    /// Agent-declared tool names visible to the LLM, unioned with the
    /// hub-injected tools at request-build time (§4.1 step 2).
    #[serde(default)]
    pub tools: Vec<String>,
    /// Names of skill tools (SKILL.md directories) this agent has enabled;
    /// each is registered alongside `tools` and runs through the pipeline.
    #[serde(default)]
    pub skills: Vec<String>,
    pub max_tokens: u32,
    #[serde(default)]
    pub token_budget: Option<u64>,
    #[serde(default)]
    pub cost_budget_usd: Option<f64>,
    #[serde(default)]
    pub network_policy: Option<NetworkPolicy>,
    #[serde(default)]
    pub sandbox_permissions: Option<SandboxPermissions>,
}

impl AgentConfig {
    /// Copy-on-write update: returns a new config reflecting `f`, leaving
    /// any config already captured by an in-flight turn untouched.
    pub fn updated(&self, f: impl FnOnce(&mut AgentConfig)) -> AgentConfig {
        let mut next = self.clone();
        f(&mut next);
        next
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkPolicy {
    pub mode: NetworkMode,
    #[serde(default)]
    pub domains: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkMode {
    AllowAll,
    Allowlist,
    Blocklist,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SandboxPermissions {
    #[serde(default)]
    pub camera: bool,
    #[serde(default)]
    pub microphone: bool,
    #[serde(default)]
    pub geolocation: bool,
}

/// Runner lifecycle state (§3). Transitions are enumerated on the type
/// that owns them (the runner), not here — this is pure data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerState {
    Pending,
    Running,
    Paused,
    Stopped,
    Error,
    Killed,
}

impl RunnerState {
    /// States in which `sendMessage` must throw (§4.1 public contract).
    pub fn rejects_messages(self) -> bool {
        matches!(self, RunnerState::Stopped | RunnerState::Killed | RunnerState::Error)
    }
}

/// Monotonic usage accumulators (§3). Never decrease across a runner's
/// lifetime; budget checks compare against these before any network call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TurnUsage {
    pub total_tokens: u64,
    pub total_cost: f64,
}

impl TurnUsage {
    pub fn add(&mut self, tokens: u64, cost: f64) {
        self.total_tokens += tokens;
        self.total_cost += cost;
    }

    /// Whether `config`'s budgets (if any) are already exceeded.
    pub fn exhausted(&self, config: &AgentConfig) -> bool {
        if let Some(budget) = config.token_budget {
            if self.total_tokens > budget {
                return true;
            }
        }
        if let Some(budget) = config.cost_budget_usd {
            if self.total_cost > budget {
                return true;
            }
        }
        false
    }
}

/// Per-agent model overrides used when the hub dispatches a tool call or
/// scheduled run against a different role (kept for forward use by the
/// schedule tool; not otherwise read from the wire).
pub type ModelOverrides = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> AgentConfig {
        AgentConfig {
            id: "a1".into(),
            name: "test".into(),
            model: "m".into(),
            provider: "p".into(),
            system_prompt: "".into(),
            tools: vec![],
            skills: vec![],
            max_tokens: 1024,
            token_budget: Some(100),
            cost_budget_usd: None,
            network_policy: None,
            sandbox_permissions: None,
        }
    }

    #[test]
    fn updated_is_copy_on_write() {
        let base = cfg();
        let next = base.updated(|c| c.max_tokens = 2048);
        assert_eq!(base.max_tokens, 1024);
        assert_eq!(next.max_tokens, 2048);
    }

    #[test]
    fn budget_exhaustion_is_strict_greater_than() {
        let config = cfg();
        let mut usage = TurnUsage::default();
        usage.add(100, 0.0);
        assert!(!usage.exhausted(&config));
        usage.add(1, 0.0);
        assert!(usage.exhausted(&config));
    }

    #[test]
    fn rejects_messages_matches_terminal_states() {
        assert!(RunnerState::Stopped.rejects_messages());
        assert!(RunnerState::Killed.rejects_messages());
        assert!(RunnerState::Error.rejects_messages());
        assert!(!RunnerState::Running.rejects_messages());
        assert!(!RunnerState::Paused.rejects_messages());
        assert!(!RunnerState::Pending.rejects_messages());
    }
}
