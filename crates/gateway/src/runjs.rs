//! The `hub_runjs` tool (spec §4.3, §9 "Replacing dynamic code execution").
//!
//! Executes a string of sandboxed script in an isolated interpreter with a
//! bounded API surface: no filesystem, environment, process, or network
//! access except through the `state_get`/`state_set`/`storage_get`/
//! `storage_set`/`log` functions registered below. `rhai` ships with none
//! of that access by default, which is what makes it the right engine here
//! rather than a general-purpose one.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rhai::{Dynamic, Engine, Scope};
use serde::Serialize;
use serde_json::Value;

use crate::runner::AgentRunner;

const MAX_OPERATIONS: u64 = 500_000;
const MAX_STRING_SIZE: usize = 64 * 1024;
const MAX_LOG_ENTRIES: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct RunJsLogEntry {
    pub script: String,
    pub output: Value,
    pub is_error: bool,
    pub at: DateTime<Utc>,
}

/// Per-agent circular log of recent `hub_runjs` invocations (spec §4.3).
pub struct RunJsSandbox {
    logs: parking_lot::Mutex<HashMap<String, VecDeque<RunJsLogEntry>>>,
    timeout: Duration,
}

impl RunJsSandbox {
    pub fn new(timeout: Duration) -> Self {
        Self {
            logs: parking_lot::Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn record(&self, agent_id: &str, entry: RunJsLogEntry) {
        let mut logs = self.logs.lock();
        let queue = logs.entry(agent_id.to_string()).or_default();
        if queue.len() >= MAX_LOG_ENTRIES {
            queue.pop_front();
        }
        queue.push_back(entry);
    }

    pub fn recent_log(&self, agent_id: &str) -> Vec<RunJsLogEntry> {
        self.logs
            .lock()
            .get(agent_id)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Run `script` against `runner`'s state/storage stores, bounded by
    /// the configured timeout and operation/string caps.
    pub async fn execute(&self, agent_id: &str, script: String, runner: Arc<AgentRunner>) -> Result<Value, String> {
        let timeout = self.timeout;
        let runner_for_task = runner.clone();
        let script_for_task = script.clone();
        let result = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || run_script(&script_for_task, runner_for_task)),
        )
        .await;

        let outcome = match result {
            Ok(Ok(inner)) => inner,
            Ok(Err(join_err)) => Err(format!("script task panicked: {join_err}")),
            Err(_) => Err(format!("script exceeded timeout of {timeout:?}")),
        };

        self.record(
            agent_id,
            RunJsLogEntry {
                script,
                output: outcome.clone().unwrap_or_else(|e| Value::String(e)),
                is_error: outcome.is_err(),
                at: Utc::now(),
            },
        );
        outcome
    }
}

fn run_script(script: &str, runner: Arc<AgentRunner>) -> Result<Value, String> {
    let mut engine = Engine::new();
    engine.set_max_operations(MAX_OPERATIONS);
    engine.set_max_string_size(MAX_STRING_SIZE);
    engine.set_max_array_size(10_000);
    engine.set_max_map_size(10_000);
    engine.set_max_expr_depths(64, 32);
    engine.disable_symbol("eval");

    let state_runner = runner.clone();
    engine.register_fn("state_get", move |key: &str| -> Dynamic {
        state_runner
            .state_get(key)
            .and_then(|v| rhai::serde::to_dynamic(v).ok())
            .unwrap_or(Dynamic::UNIT)
    });

    let state_runner = runner.clone();
    engine.register_fn("state_set", move |key: &str, value: Dynamic| -> bool {
        let Ok(json) = rhai::serde::from_dynamic::<Value>(&value) else {
            return false;
        };
        state_runner.state_set(key, json).is_ok()
    });

    let storage_runner = runner.clone();
    engine.register_fn("storage_get", move |key: &str| -> Dynamic {
        storage_runner
            .storage_get(key)
            .and_then(|v| rhai::serde::to_dynamic(v).ok())
            .unwrap_or(Dynamic::UNIT)
    });

    let storage_runner = runner.clone();
    engine.register_fn("storage_set", move |key: &str, value: Dynamic| -> bool {
        let Ok(json) = rhai::serde::from_dynamic::<Value>(&value) else {
            return false;
        };
        storage_runner.storage_set(key, json).is_ok()
    });

    let log_runner = runner;
    engine.register_fn("log", move |message: &str| {
        log_runner.add_info_message(format!("[hub_runjs] {message}"));
    });

    let mut scope = Scope::new();
    let result: Dynamic = engine
        .eval_with_scope(&mut scope, script)
        .map_err(|e| e.to_string())?;

    rhai::serde::from_dynamic(&result).map_err(|e| e.to_string())
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

    #[tokio::test]
    async fn evaluates_a_simple_expression() {
        let sandbox = RunJsSandbox::new(Duration::from_secs(2));
        let runner = Arc::new(AgentRunner::new(test_config("a1"), CancelToken::new()));
        let result = sandbox.execute("a1", "1 + 2".into(), runner).await.unwrap();
        assert_eq!(result, Value::from(3));
    }

    #[tokio::test]
    async fn state_set_then_get_round_trips_through_the_runner() {
        let sandbox = RunJsSandbox::new(Duration::from_secs(2));
        let runner = Arc::new(AgentRunner::new(test_config("a1"), CancelToken::new()));
        sandbox
            .execute("a1", r#"state_set("x", 42); state_get("x")"#.into(), runner.clone())
            .await
            .unwrap();
        assert_eq!(runner.state_get("x"), Some(Value::from(42)));
    }

    #[tokio::test]
    async fn an_infinite_loop_is_killed_by_the_operation_cap() {
        let sandbox = RunJsSandbox::new(Duration::from_secs(5));
        let runner = Arc::new(AgentRunner::new(test_config("a1"), CancelToken::new()));
        let result = sandbox.execute("a1", "while (true) {}".into(), runner).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn no_filesystem_access_is_exposed() {
        let sandbox = RunJsSandbox::new(Duration::from_secs(2));
        let runner = Arc::new(AgentRunner::new(test_config("a1"), CancelToken::new()));
        let result = sandbox.execute("a1", r#"File::open("/etc/passwd")"#.into(), runner).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn recent_log_records_both_successes_and_failures() {
        let sandbox = RunJsSandbox::new(Duration::from_secs(2));
        let runner = Arc::new(AgentRunner::new(test_config("a1"), CancelToken::new()));
        sandbox.execute("a1", "1 + 1".into(), runner.clone()).await.ok();
        sandbox.execute("a1", "!!!".into(), runner).await.ok();
        let log = sandbox.recent_log("a1");
        assert_eq!(log.len(), 2);
        assert!(!log[0].is_error);
        assert!(log[1].is_error);
    }
}
