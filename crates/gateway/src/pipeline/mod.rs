//! ToolPipeline: the pre-hook → execute → post-hook envelope every tool
//! call travels through (spec §4.3).

pub mod hooks;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use hub_domain::agent::AgentConfig;
use hub_domain::config::ToolsConfig;
use hub_domain::error::Error;
use hub_domain::tool::{ContentPart, ToolDefinition};
use hub_tools::bash::{ensure_sandbox_dir, run_bash, BashRequest};
use hub_tools::filesystem::{execute as execute_file_action, FileAction};
use parking_lot::RwLock;
use serde_json::{json, Value};

use crate::browser::BrowserPool;
use crate::registry::AgentRegistry;
use crate::runjs::RunJsSandbox;
use crate::runner::ToolExecutor;
use crate::scheduler::{NewSchedule, ScheduleAction, ScheduleKind, Scheduler};
use crate::store::AgentStore;

pub use hooks::{HookAction, HookRule};

/// Dispatches a tool call to a subscribed client and awaits the matching
/// response (spec §4.3 "browser-routed tools"). Implemented by
/// ConnectionManager and injected here to keep the pipeline from depending
/// on the connection layer directly (§9 "Cyclic references").
#[async_trait]
pub trait BrowserRoutedDispatcher: Send + Sync {
    async fn dispatch(&self, agent_id: &str, tool_name: &str, input: Value) -> Result<Value, String>;
}

pub struct ToolPipeline {
    registry: Arc<AgentRegistry>,
    scheduler: Arc<Scheduler>,
    store: Arc<AgentStore>,
    skills: Arc<hub_skills::SkillsRegistry>,
    browser: Option<Arc<BrowserPool>>,
    runjs: Arc<RunJsSandbox>,
    browser_routed: RwLock<Option<Arc<dyn BrowserRoutedDispatcher>>>,
    browser_routed_tool_names: HashSet<String>,
    browser_routed_timeout: std::time::Duration,
    config: ToolsConfig,
    sandbox_root: PathBuf,
    declarative_rules: RwLock<Vec<HookRule>>,
    imperative_rules: RwLock<Vec<HookRule>>,
    post_hooks: RwLock<Vec<Arc<dyn Fn(&str, &Value, &ContentPart) + Send + Sync>>>,
}

pub struct ToolPipelineDeps {
    pub registry: Arc<AgentRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub store: Arc<AgentStore>,
    pub skills: Arc<hub_skills::SkillsRegistry>,
    pub browser: Option<Arc<BrowserPool>>,
    pub runjs: Arc<RunJsSandbox>,
    pub config: ToolsConfig,
    pub sandbox_root: PathBuf,
    pub browser_routed_tool_names: HashSet<String>,
}

impl ToolPipeline {
    pub fn new(deps: ToolPipelineDeps) -> Self {
        let timeout = std::time::Duration::from_millis(deps.config.browser_routed_timeout_ms);
        Self {
            registry: deps.registry,
            scheduler: deps.scheduler,
            store: deps.store,
            skills: deps.skills,
            browser: deps.browser,
            runjs: deps.runjs,
            browser_routed: RwLock::new(None),
            browser_routed_tool_names: deps.browser_routed_tool_names,
            browser_routed_timeout: timeout,
            config: deps.config,
            sandbox_root: deps.sandbox_root,
            declarative_rules: RwLock::new(Vec::new()),
            imperative_rules: RwLock::new(Vec::new()),
            post_hooks: RwLock::new(Vec::new()),
        }
    }

    /// Wired once ConnectionManager exists (constructed after the pipeline
    /// to break the cycle — see `ToolPipelineDeps` doc).
    pub fn set_browser_routed_dispatcher(&self, dispatcher: Arc<dyn BrowserRoutedDispatcher>) {
        *self.browser_routed.write() = Some(dispatcher);
    }

    /// Declarative rules come from config and are evaluated before any
    /// imperative (programmatically registered) rule (spec §4.3 step 1-2).
    pub fn add_declarative_rule(&self, rule: HookRule) {
        let mut rules = self.declarative_rules.write();
        rules.push(rule);
        rules.sort_by_key(|r| r.priority);
    }

    pub fn add_imperative_rule(&self, rule: HookRule) {
        let mut rules = self.imperative_rules.write();
        rules.push(rule);
        rules.sort_by_key(|r| r.priority);
    }

    pub fn add_post_hook(&self, hook: Arc<dyn Fn(&str, &Value, &ContentPart) + Send + Sync>) {
        self.post_hooks.write().push(hook);
    }

    /// Step 1-2 of the pipeline: declarative rules first, then imperative,
    /// in priority order within each group. Returns `Some(result)` if a
    /// `deny` short-circuited dispatch.
    fn run_pre_hooks(&self, tool_name: &str, input: &Value) -> Option<ContentPart> {
        for group in [&self.declarative_rules, &self.imperative_rules] {
            let rules = group.read();
            for rule in rules.iter() {
                if !rule.matches(tool_name, input) {
                    continue;
                }
                match &rule.action {
                    HookAction::Deny { reason } => {
                        return Some(ContentPart::ToolResult {
                            tool_use_id: String::new(),
                            content: reason.clone(),
                            is_error: true,
                        });
                    }
                    HookAction::Allow => return None,
                    HookAction::Log => {
                        tracing::info!(tool = %tool_name, rule = %rule.matcher.as_str(), "pre-hook log rule matched");
                    }
                }
            }
        }
        None
    }

    fn run_post_hooks(&self, tool_name: &str, input: &Value, result: &ContentPart) {
        for hook in self.post_hooks.read().iter() {
            hook(tool_name, input, result);
        }
    }

    fn tool_result(call_id: &str, value: Result<Value, String>) -> ContentPart {
        match value {
            Ok(v) => ContentPart::ToolResult {
                tool_use_id: call_id.to_string(),
                content: serde_json::to_string(&v).unwrap_or_default(),
                is_error: false,
            },
            Err(e) => ContentPart::ToolResult {
                tool_use_id: call_id.to_string(),
                content: e,
                is_error: true,
            },
        }
    }

    async fn dispatch(&self, agent_id: &str, call_id: &str, tool_name: &str, input: Value) -> ContentPart {
        if self.browser_routed_tool_names.contains(tool_name) {
            return self.dispatch_browser_routed(agent_id, call_id, tool_name, input).await;
        }

        let outcome: Result<Value, String> = match tool_name {
            "bash" => self.run_bash(agent_id, input).await,
            "filesystem" => self.run_filesystem(input).await,
            "hub_files" => self.run_hub_files(agent_id, input).await,
            "hub_state" => self.run_hub_state(agent_id, input),
            "hub_storage" => self.run_hub_storage(agent_id, input),
            "hub_runjs" => self.run_hub_runjs(agent_id, input).await,
            "schedule" => self.run_schedule(agent_id, input),
            "browse" => self.run_browse(agent_id, input).await,
            "context_search" => self.run_context_search(agent_id, input),
            other => self.run_skill_or_unknown(other),
        };
        Self::tool_result(call_id, outcome)
    }

    async fn run_bash(&self, agent_id: &str, input: Value) -> Result<Value, String> {
        if !self.config.bash.enabled {
            return Err("bash tool is disabled".into());
        }
        let req: BashRequest = serde_json::from_value(input).map_err(|e| e.to_string())?;
        let run_as_user = match self.config.bash.mode {
            hub_domain::config::BashMode::Restricted => self.config.bash.run_as_user.as_deref(),
            hub_domain::config::BashMode::Unrestricted => None,
        };
        let sandbox_dir = ensure_sandbox_dir(&self.sandbox_root, agent_id, run_as_user)
            .await
            .map_err(|e| e.to_string())?;
        let result = run_bash(
            req,
            &sandbox_dir,
            self.config.bash.timeout_ms,
            self.config.bash.max_timeout_ms,
            run_as_user,
        )
        .await;
        Ok(serde_json::to_value(result).unwrap())
    }

    async fn run_filesystem(&self, input: Value) -> Result<Value, String> {
        if !self.config.filesystem.enabled {
            return Err("filesystem tool is disabled".into());
        }
        let action: FileAction = serde_json::from_value(input).map_err(|e| e.to_string())?;
        let roots: Vec<PathBuf> = self.config.filesystem.allowed_paths.iter().map(PathBuf::from).collect();
        execute_file_action(action, &roots).await
    }

    async fn run_hub_files(&self, agent_id: &str, input: Value) -> Result<Value, String> {
        let action_name = input.get("action").and_then(Value::as_str).unwrap_or_default();
        match action_name {
            "pack" => self.pack_files(agent_id).await,
            "unpack" => {
                let manifest = input.get("manifest").cloned().ok_or("missing `manifest` field")?;
                self.unpack_files(agent_id, manifest).await
            }
            _ => {
                let action: FileAction = serde_json::from_value(input).map_err(|e| e.to_string())?;
                let roots = vec![self.store.files_root(agent_id)];
                execute_file_action(action, &roots).await
            }
        }
    }

    /// Bundle the agent's files root into a manifest of `{path, content_base64}`
    /// entries for session handoff (spec §4.3 "hub_files ... pack/unpack for
    /// session handoff").
    async fn pack_files(&self, agent_id: &str) -> Result<Value, String> {
        use base64::Engine;
        let root = self.store.files_root(agent_id);
        let mut entries = Vec::new();
        collect_files(&root, &root, &mut entries).await?;
        let manifest: Vec<Value> = entries
            .into_iter()
            .map(|(rel, bytes)| json!({ "path": rel, "content_base64": base64::engine::general_purpose::STANDARD.encode(bytes) }))
            .collect();
        Ok(json!({ "files": manifest }))
    }

    async fn unpack_files(&self, agent_id: &str, manifest: Value) -> Result<Value, String> {
        use base64::Engine;
        let root = self.store.files_root(agent_id);
        let files = manifest
            .get("files")
            .and_then(Value::as_array)
            .ok_or_else(|| "manifest missing `files` array".to_string())?;
        let mut written = 0usize;
        for entry in files {
            let path = entry.get("path").and_then(Value::as_str).ok_or("entry missing path")?;
            let content_b64 = entry.get("content_base64").and_then(Value::as_str).ok_or("entry missing content_base64")?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(content_b64)
                .map_err(|e| e.to_string())?;
            let resolved = hub_tools::filesystem::resolve_within(&[root.clone()], path)?;
            if let Some(parent) = resolved.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| e.to_string())?;
            }
            tokio::fs::write(&resolved, bytes).await.map_err(|e| e.to_string())?;
            written += 1;
        }
        Ok(json!({ "written": written }))
    }

    fn run_hub_state(&self, agent_id: &str, input: Value) -> Result<Value, String> {
        let runner = self.runner(agent_id)?;
        #[derive(serde::Deserialize)]
        #[serde(tag = "action", rename_all = "snake_case")]
        enum StateAction {
            Get { key: String },
            GetAll,
            Set { key: String, value: Value },
            Delete { key: String },
        }
        let action: StateAction = serde_json::from_value(input).map_err(|e| e.to_string())?;
        match action {
            StateAction::Get { key } => Ok(runner.state_get(&key).unwrap_or(Value::Null)),
            StateAction::GetAll => Ok(serde_json::to_value(runner.state_get_all()).unwrap()),
            StateAction::Set { key, value } => {
                let escalations = runner.state_set(&key, value).map_err(|e| e.to_string())?;
                for esc in escalations {
                    self.apply_escalation(&runner, esc);
                }
                Ok(json!({ "ok": true }))
            }
            StateAction::Delete { key } => {
                runner.state_delete(&key);
                Ok(json!({ "ok": true }))
            }
        }
    }

    fn run_hub_storage(&self, agent_id: &str, input: Value) -> Result<Value, String> {
        let runner = self.runner(agent_id)?;
        #[derive(serde::Deserialize)]
        #[serde(tag = "action", rename_all = "snake_case")]
        enum StorageAction {
            Get { key: String },
            GetAll,
            Set { key: String, value: Value },
            Delete { key: String },
        }
        let action: StorageAction = serde_json::from_value(input).map_err(|e| e.to_string())?;
        match action {
            StorageAction::Get { key } => Ok(runner.storage_get(&key).unwrap_or(Value::Null)),
            StorageAction::GetAll => Ok(serde_json::to_value(runner.storage_get_all()).unwrap()),
            StorageAction::Set { key, value } => {
                let escalations = runner.storage_set(&key, value).map_err(|e| e.to_string())?;
                for esc in escalations {
                    self.apply_escalation(&runner, esc);
                }
                Ok(json!({ "ok": true }))
            }
            StorageAction::Delete { key } => {
                runner.storage_delete(&key);
                Ok(json!({ "ok": true }))
            }
        }
    }

    fn apply_escalation(&self, runner: &Arc<crate::runner::AgentRunner>, escalation: crate::runner::conversation::Escalation) {
        match escalation {
            crate::runner::conversation::Escalation::InboxMessage(msg) => runner.queue_message(msg),
            crate::runner::conversation::Escalation::Event { name, data } => {
                let dispatches = self.scheduler.fire_event(&name, &runner.id(), &data, &self.registry);
                for dispatch in dispatches {
                    self.apply_trigger_dispatch(dispatch);
                }
            }
        }
    }

    fn apply_trigger_dispatch(&self, dispatch: crate::scheduler::TriggerDispatch) {
        match dispatch {
            crate::scheduler::TriggerDispatch::SendMessage { agent_id, message } => {
                if let Some(runner) = self.registry.get(&agent_id) {
                    runner.queue_message(message);
                }
            }
            crate::scheduler::TriggerDispatch::ExecuteTool { agent_id, tool, tool_input } => {
                if let Some(runner) = self.registry.get(&agent_id) {
                    runner.add_info_message(format!("scheduler executed tool `{tool}` with input {tool_input}"));
                }
            }
        }
    }

    async fn run_hub_runjs(&self, agent_id: &str, input: Value) -> Result<Value, String> {
        let runner = self.runner(agent_id)?;
        let script = input.get("script").and_then(Value::as_str).ok_or("missing `script` field")?;
        self.runjs.execute(agent_id, script.to_string(), runner).await
    }

    fn run_schedule(&self, agent_id: &str, input: Value) -> Result<Value, String> {
        #[derive(serde::Deserialize)]
        #[serde(tag = "action", rename_all = "snake_case")]
        enum ScheduleAction_ {
            Add {
                #[serde(rename = "type")]
                kind: String,
                cron_expression: Option<String>,
                event_name: Option<String>,
                event_condition: Option<String>,
                message: Option<String>,
                tool: Option<String>,
                #[serde(default)]
                tool_input: Value,
                max_runs: Option<u64>,
            },
            Remove { id: u64 },
            Enable { id: u64 },
            Disable { id: u64 },
            List,
        }
        let action: ScheduleAction_ = serde_json::from_value(input).map_err(|e| e.to_string())?;
        match action {
            ScheduleAction_::Add { kind, cron_expression, event_name, event_condition, message, tool, tool_input, max_runs } => {
                let kind = match kind.as_str() {
                    "cron" => ScheduleKind::Cron,
                    "event" => ScheduleKind::Event,
                    other => return Err(format!("unknown schedule type '{other}'")),
                };
                let action = match (message, tool) {
                    (Some(message), None) => ScheduleAction::Message { message },
                    (None, Some(tool)) => ScheduleAction::Tool { tool, tool_input },
                    _ => return Err("exactly one of `message`/`tool` must be set".into()),
                };
                let id = self
                    .scheduler
                    .add_schedule(NewSchedule {
                        hub_agent_id: agent_id.to_string(),
                        kind,
                        cron_expression,
                        event_name,
                        event_condition,
                        action,
                        max_runs,
                        enabled: true,
                    })
                    .map_err(|e| e.to_string())?;
                Ok(json!({ "id": id }))
            }
            ScheduleAction_::Remove { id } => {
                self.scheduler.remove_schedule(agent_id, id);
                Ok(json!({ "ok": true }))
            }
            ScheduleAction_::Enable { id } => {
                self.scheduler.set_enabled(agent_id, id, true);
                Ok(json!({ "ok": true }))
            }
            ScheduleAction_::Disable { id } => {
                self.scheduler.set_enabled(agent_id, id, false);
                Ok(json!({ "ok": true }))
            }
            ScheduleAction_::List => Ok(serde_json::to_value(self.scheduler.get_schedules(agent_id)).unwrap()),
        }
    }

    async fn run_browse(&self, agent_id: &str, input: Value) -> Result<Value, String> {
        let Some(pool) = &self.browser else {
            return Err("browse tool is disabled".into());
        };
        #[derive(serde::Deserialize)]
        #[serde(tag = "action", rename_all = "snake_case")]
        enum BrowseAction {
            Goto { url: String },
            Click { element_ref: String },
            Type { element_ref: String, text: String },
            Press { key: String },
            Scroll { dx: i32, dy: i32 },
            Snapshot,
            Screenshot,
            Back,
            Forward,
            Reload,
            Close,
        }
        let action: BrowseAction = serde_json::from_value(input).map_err(|e| e.to_string())?;
        let result = match action {
            BrowseAction::Goto { url } => pool.goto(agent_id, &url).await.map_err(|e| e.to_string())?,
            BrowseAction::Click { element_ref } => pool.click(agent_id, &element_ref).await.map_err(|e| e.to_string())?,
            BrowseAction::Type { element_ref, text } => pool.type_text(agent_id, &element_ref, &text).await.map_err(|e| e.to_string())?,
            BrowseAction::Press { key } => pool.press(agent_id, &key).await.map_err(|e| e.to_string())?,
            BrowseAction::Scroll { dx, dy } => pool.scroll(agent_id, dx, dy).await.map_err(|e| e.to_string())?,
            BrowseAction::Snapshot => pool.snapshot(agent_id).await.map_err(|e| e.to_string())?,
            BrowseAction::Screenshot => pool.screenshot(agent_id).await.map_err(|e| e.to_string())?,
            BrowseAction::Back => pool.back(agent_id).await.map_err(|e| e.to_string())?,
            BrowseAction::Forward => pool.forward(agent_id).await.map_err(|e| e.to_string())?,
            BrowseAction::Reload => pool.reload(agent_id).await.map_err(|e| e.to_string())?,
            BrowseAction::Close => {
                pool.close_session(agent_id).await.map_err(|e| e.to_string())?;
                return Ok(json!({ "closed": true }));
            }
        };
        Ok(serde_json::to_value(result).unwrap())
    }

    fn run_context_search(&self, agent_id: &str, input: Value) -> Result<Value, String> {
        let runner = self.runner(agent_id)?;
        let req = serde_json::from_value(input).map_err(|e: serde_json::Error| e.to_string())?;
        let history = runner.message_history();
        let result = hub_tools::context_search(&history, req, self.config.context_search.max_output_bytes)?;
        Ok(serde_json::to_value(result).unwrap())
    }

    fn run_skill_or_unknown(&self, name: &str) -> Result<Value, String> {
        if self.skills.list().iter().any(|s| s.name == name) {
            return self.skills.read_doc(name).map(|doc| json!({ "instructions": doc })).map_err(|e| e.to_string());
        }
        Err(format!("unknown tool: {name}"))
    }

    async fn dispatch_browser_routed(&self, agent_id: &str, call_id: &str, tool_name: &str, input: Value) -> ContentPart {
        let dispatcher = self.browser_routed.read().clone();
        let Some(dispatcher) = dispatcher else {
            return ContentPart::ToolResult {
                tool_use_id: call_id.to_string(),
                content: "no client subscribed to handle this browser-routed tool".into(),
                is_error: true,
            };
        };
        let result = tokio::time::timeout(self.browser_routed_timeout, dispatcher.dispatch(agent_id, tool_name, input)).await;
        match result {
            Ok(Ok(value)) => Self::tool_result(call_id, Ok(value)),
            Ok(Err(e)) => Self::tool_result(call_id, Err(e)),
            Err(_) => ContentPart::ToolResult {
                tool_use_id: call_id.to_string(),
                content: format!("browser-routed tool timed out after {:?}", self.browser_routed_timeout),
                is_error: true,
            },
        }
    }

    fn runner(&self, agent_id: &str) -> Result<Arc<crate::runner::AgentRunner>, String> {
        self.registry.get(agent_id).ok_or_else(|| format!("unknown agent: {agent_id}"))
    }
}

async fn collect_files(root: &std::path::Path, dir: &std::path::Path, out: &mut Vec<(String, Vec<u8>)>) -> Result<(), String> {
    if !dir.exists() {
        return Ok(());
    }
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| e.to_string())?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| e.to_string())? {
        let path = entry.path();
        if path.is_dir() {
            Box::pin(collect_files(root, &path, out)).await?;
        } else {
            let bytes = tokio::fs::read(&path).await.map_err(|e| e.to_string())?;
            let rel = path.strip_prefix(root).unwrap_or(&path).to_string_lossy().into_owned();
            out.push((rel, bytes));
        }
    }
    Ok(())
}

#[async_trait]
impl ToolExecutor for ToolPipeline {
    async fn execute(&self, agent_id: &str, call_id: &str, tool_name: &str, input: Value) -> ContentPart {
        if let Some(denied) = self.run_pre_hooks(tool_name, &input) {
            return match denied {
                ContentPart::ToolResult { content, is_error, .. } => ContentPart::ToolResult {
                    tool_use_id: call_id.to_string(),
                    content,
                    is_error,
                },
                other => other,
            };
        }
        let result = self.dispatch(agent_id, call_id, tool_name, input.clone()).await;
        self.run_post_hooks(tool_name, &input, &result);
        result
    }

    /// Hub-injected tools unioned with config-declared ones (spec §4.1 step
    /// 2: "schedule, context_search, hub_runjs, bash, filesystem, skills"
    /// are always offered; `hub_state`/`hub_storage`/`hub_files`/`browse`
    /// are offered only when the agent declares them in `config.tools`,
    /// since not every agent needs state escalation or browser automation.
    fn tool_definitions(&self, config: &AgentConfig) -> Vec<ToolDefinition> {
        let mut defs = vec![
            def("bash", "Run a shell command in this agent's sandbox directory.", json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string"},
                    "cwd": {"type": "string"},
                    "timeout_ms": {"type": "integer"}
                },
                "required": ["command"]
            })),
            def("filesystem", "Read/write/list/delete files within allow-listed paths.", json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["read", "write", "list", "delete", "mkdir", "stat"]},
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["action", "path"]
            })),
            def("schedule", "Add, remove, enable, disable, or list this agent's cron/event schedules.", json!({"type": "object"})),
            def("context_search", "Search this conversation's history by substring or regex.", json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "regex": {"type": "boolean"},
                    "max_results": {"type": "integer"}
                },
                "required": ["query"]
            })),
            def("hub_runjs", "Run a short script in a sandboxed interpreter with access to this agent's state/storage.", json!({
                "type": "object",
                "properties": {"script": {"type": "string"}},
                "required": ["script"]
            })),
        ];

        defs.extend(
            self.skills
                .list()
                .into_iter()
                .filter(|s| config.skills.iter().any(|n| n == &s.name))
                .map(|s| def(&s.name, &s.description, json!({"type": "object"}))),
        );

        for name in &config.tools {
            match name.as_str() {
                "hub_state" => defs.push(def("hub_state", "Get/set/delete this agent's escalation-aware state store.", json!({"type": "object"}))),
                "hub_storage" => defs.push(def("hub_storage", "Get/set/delete this agent's general-purpose storage.", json!({"type": "object"}))),
                "hub_files" => defs.push(def("hub_files", "Read/write files under this agent's bounded files root; pack/unpack for handoff.", json!({"type": "object"}))),
                "browse" => defs.push(def("browse", "Drive a persistent headless browser session for this agent.", json!({"type": "object"}))),
                _ => {}
            }
        }
        defs
    }
}

fn def(name: &str, description: &str, parameters: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    }
}

impl From<Error> for ContentPart {
    fn from(e: Error) -> Self {
        ContentPart::ToolResult {
            tool_use_id: String::new(),
            content: e.to_string(),
            is_error: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::runner::AgentRunner;
    use hub_domain::agent::AgentConfig;
    use std::time::Duration;

    fn test_config(id: &str, tools: Vec<String>) -> AgentConfig {
        AgentConfig {
            id: id.into(),
            name: id.into(),
            model: "m".into(),
            provider: "p".into(),
            system_prompt: String::new(),
            tools,
            skills: vec![],
            max_tokens: 1000,
            token_budget: None,
            cost_budget_usd: None,
            network_policy: None,
            sandbox_permissions: None,
        }
    }

    fn pipeline(dir: &std::path::Path) -> ToolPipeline {
        let registry = Arc::new(AgentRegistry::new());
        ToolPipeline::new(ToolPipelineDeps {
            registry,
            scheduler: Arc::new(Scheduler::new()),
            store: Arc::new(AgentStore::new(dir)),
            skills: Arc::new(hub_skills::SkillsRegistry::empty()),
            browser: None,
            runjs: Arc::new(RunJsSandbox::new(Duration::from_secs(2))),
            config: ToolsConfig::default(),
            sandbox_root: dir.join("sandbox"),
            browser_routed_tool_names: HashSet::new(),
        })
    }

    #[tokio::test]
    async fn bash_runs_through_the_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let result = pipeline
            .execute("a1", "call-1", "bash", json!({"command": "echo hi"}))
            .await;
        match result {
            ContentPart::ToolResult { content, is_error, .. } => {
                assert!(!is_error);
                assert!(content.contains("hi"));
            }
            _ => panic!("expected tool_result"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let result = pipeline.execute("a1", "call-1", "nonexistent", json!({})).await;
        match result {
            ContentPart::ToolResult { is_error, .. } => assert!(is_error),
            _ => panic!("expected tool_result"),
        }
    }

    #[tokio::test]
    async fn deny_rule_short_circuits_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        pipeline.add_declarative_rule(HookRule {
            matcher: regex::Regex::new("^bash$").unwrap(),
            input_matchers: vec![],
            action: HookAction::Deny { reason: "bash is blocked in this context".into() },
            priority: 0,
        });
        let result = pipeline.execute("a1", "call-1", "bash", json!({"command": "echo hi"})).await;
        match result {
            ContentPart::ToolResult { content, is_error, .. } => {
                assert!(is_error);
                assert_eq!(content, "bash is blocked in this context");
            }
            _ => panic!("expected tool_result"),
        }
    }

    #[tokio::test]
    async fn hub_state_round_trips_through_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let runner = Arc::new(AgentRunner::new(test_config("a1", vec!["hub_state".into()]), CancelToken::new()));
        pipeline.registry.insert(runner.clone());

        pipeline
            .execute("a1", "c1", "hub_state", json!({"action": "set", "key": "x", "value": 1}))
            .await;
        let result = pipeline.execute("a1", "c2", "hub_state", json!({"action": "get", "key": "x"})).await;
        match result {
            ContentPart::ToolResult { content, is_error, .. } => {
                assert!(!is_error);
                assert_eq!(content, "1");
            }
            _ => panic!("expected tool_result"),
        }
    }

    #[tokio::test]
    async fn tool_definitions_always_include_the_hub_injected_set() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let defs = pipeline.tool_definitions(&test_config("a1", vec![]));
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        for expected in ["bash", "filesystem", "schedule", "context_search", "hub_runjs"] {
            assert!(names.contains(&expected), "missing {expected} in {names:?}");
        }
        assert!(!names.contains(&"hub_state"));
    }

    #[tokio::test]
    async fn tool_definitions_add_declared_optional_tools() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path());
        let defs = pipeline.tool_definitions(&test_config("a1", vec!["hub_state".into(), "browse".into()]));
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert!(names.contains(&"hub_state"));
        assert!(names.contains(&"browse"));
    }
}
