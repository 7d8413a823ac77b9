//! AgentRunner: the per-agent turn loop (spec §4.1).
//!
//! Grounded on the teacher's `runtime/turn.rs` (`run_turn`/`run_turn_inner`):
//! spawn one tokio task per turn, stream events out over a channel, dispatch
//! concurrent tool calls via `join_all` to preserve emission order, bound
//! the tool-call loop by a hard iteration cap. The turn itself is pulled out
//! of the daemon's request/response cycle entirely here — a runner owns its
//! own conversation and is driven by whatever calls `send_message`/`start`,
//! not by an HTTP handler.

pub mod conversation;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use hub_domain::agent::{AgentConfig, RunnerState, TurnUsage};
use hub_domain::config::StoreQuotaConfig;
use hub_domain::error::{Error, Result};
use hub_domain::stream::{StopReason, StreamEvent, Usage};
use hub_domain::tool::{ContentPart, Message, MessageContent, ToolDefinition};
use hub_providers::{ChatRequest, LlmProvider};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::cancel::CancelToken;
use crate::store::{AgentSnapshot, DomMirror, SnapshotMetadata};
use conversation::{compress_browse_results, Escalation, KvStore};

/// Hard cap on tool-call loops within one turn (spec §4.1 edge cases: an
/// agent that never stops calling tools must still terminate).
const MAX_TOOL_LOOPS: usize = 25;

/// Dispatches one `tool_use` block and returns its `tool_result`. Failures
/// never propagate as `Err` — they become an `is_error: true` block (§4.1
/// step 5, §7). Implemented by the gateway's ToolPipeline and injected here
/// so the runner never depends on the pipeline directly (§9 "Cyclic
/// references": Runner → Pipeline → Runner would otherwise be a cycle).
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, agent_id: &str, call_id: &str, tool_name: &str, input: Value) -> ContentPart;

    /// Tool definitions visible to this agent — hub-provided tools unioned
    /// with `config.tools`/`config.skills` (§4.1 step 2).
    fn tool_definitions(&self, config: &AgentConfig) -> Vec<ToolDefinition>;
}

/// Events a runner emits as a turn progresses. Subscribers (ConnectionManager
/// fanout) see these verbatim; nothing here is buffered or replayed.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    Stream(StreamEvent),
    MessageAppended(Message),
    StateChanged(RunnerState),
    /// A user-facing notification for the push transport (spec §4.4 "Push
    /// notifications"). Never sent to the LLM.
    NotifyUser { title: String, body: String, tag: Option<String> },
}

struct ChatAccumulation {
    text: String,
    tool_calls: Vec<(String, String, String)>, // (call_id, tool_name, partial_json)
    tool_order: Vec<String>,
    usage: Usage,
    stop_reason: StopReason,
}

/// The per-agent turn loop and its associated conversation/state/storage.
/// Owns the FIFO inbox that queues messages arriving while a turn is
/// in flight (spec §3 "Runner lifecycle").
pub struct AgentRunner {
    config: RwLock<AgentConfig>,
    state: RwLock<RunnerState>,
    busy: AtomicBool,
    inbox: Mutex<VecDeque<String>>,
    conversation: Mutex<Vec<Message>>,
    usage: Mutex<TurnUsage>,
    state_store: Mutex<KvStore>,
    storage_store: Mutex<KvStore>,
    dom_mirror: Mutex<Option<DomMirror>>,
    created_at: chrono::DateTime<Utc>,
    cancel: CancelToken,
    events: broadcast::Sender<RunnerEvent>,
}

impl AgentRunner {
    pub fn new(config: AgentConfig, cancel: CancelToken) -> Self {
        Self::with_quotas(config, cancel, StoreQuotaConfig::default(), StoreQuotaConfig::default())
    }

    pub fn with_quotas(
        config: AgentConfig,
        cancel: CancelToken,
        state_quotas: StoreQuotaConfig,
        storage_quotas: StoreQuotaConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config: RwLock::new(config),
            state: RwLock::new(RunnerState::Pending),
            busy: AtomicBool::new(false),
            inbox: Mutex::new(VecDeque::new()),
            conversation: Mutex::new(Vec::new()),
            usage: Mutex::new(TurnUsage::default()),
            state_store: Mutex::new(KvStore::new(state_quotas)),
            storage_store: Mutex::new(KvStore::new(storage_quotas)),
            dom_mirror: Mutex::new(None),
            created_at: Utc::now(),
            cancel,
            events,
        }
    }

    pub fn id(&self) -> String {
        self.config.read().id.clone()
    }

    pub fn config(&self) -> AgentConfig {
        self.config.read().clone()
    }

    pub fn update_config(&self, f: impl FnOnce(&mut AgentConfig)) {
        let next = self.config.read().updated(f);
        *self.config.write() = next;
    }

    pub fn state(&self) -> RunnerState {
        *self.state.read()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunnerEvent> {
        self.events.subscribe()
    }

    fn set_state(&self, next: RunnerState) {
        *self.state.write() = next;
        let _ = self.events.send(RunnerEvent::StateChanged(next));
    }

    pub fn message_history(&self) -> Vec<Message> {
        self.conversation.lock().clone()
    }

    fn append_message(&self, message: Message) {
        self.conversation.lock().push(message.clone());
        let _ = self.events.send(RunnerEvent::MessageAppended(message));
    }

    /// Hub-originated narration, visible to subscribers but never sent to
    /// the LLM (spec §3 "`info` messages").
    pub fn add_info_message(&self, text: impl Into<String>) {
        self.append_message(Message::info(text));
    }

    /// Emit a `notify_user` event for the push transport to pick up (spec
    /// §4.4). Does not itself decide whether a push is dispatched — that is
    /// the ConnectionManager's job, consulting the DeviceStateTable.
    pub fn notify_user(&self, title: impl Into<String>, body: impl Into<String>, tag: Option<String>) {
        let _ = self.events.send(RunnerEvent::NotifyUser {
            title: title.into(),
            body: body.into(),
            tag,
        });
    }

    pub fn usage(&self) -> TurnUsage {
        *self.usage.lock()
    }

    pub fn dom_mirror(&self) -> Option<DomMirror> {
        self.dom_mirror.lock().clone()
    }

    pub fn set_dom_mirror(&self, mirror: DomMirror) {
        *self.dom_mirror.lock() = Some(mirror);
    }

    pub fn state_get(&self, key: &str) -> Option<Value> {
        self.state_store.lock().get(key).cloned()
    }

    pub fn state_get_all(&self) -> std::collections::HashMap<String, Value> {
        self.state_store.lock().get_all().clone()
    }

    pub fn state_set(&self, key: &str, value: Value) -> Result<Vec<Escalation>> {
        self.state_store.lock().set(key, value)
    }

    pub fn state_delete(&self, key: &str) {
        self.state_store.lock().delete(key);
    }

    pub fn storage_get(&self, key: &str) -> Option<Value> {
        self.storage_store.lock().get(key).cloned()
    }

    pub fn storage_get_all(&self) -> std::collections::HashMap<String, Value> {
        self.storage_store.lock().get_all().clone()
    }

    pub fn storage_set(&self, key: &str, value: Value) -> Result<Vec<Escalation>> {
        self.storage_store.lock().set(key, value)
    }

    pub fn storage_delete(&self, key: &str) {
        self.storage_store.lock().delete(key);
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    pub fn pause(&self) {
        if self.state() == RunnerState::Running {
            self.set_state(RunnerState::Paused);
        }
    }

    pub fn resume(&self) {
        if self.state() == RunnerState::Paused {
            self.set_state(RunnerState::Running);
        }
    }

    pub fn stop(&self) {
        self.set_state(RunnerState::Stopped);
    }

    /// Hard-stop: cancels any turn in flight in addition to the `stop()`
    /// state transition (spec §9 "cancellation").
    pub fn kill(&self) {
        self.cancel.cancel();
        self.set_state(RunnerState::Killed);
    }

    fn mark_running_if_pending(&self) {
        if matches!(self.state(), RunnerState::Pending) {
            self.set_state(RunnerState::Running);
        }
    }

    /// Queue a message without starting a turn — used for escalations and
    /// scheduler-delivered messages so they observe the same FIFO ordering
    /// as user-submitted ones (spec §3).
    pub fn queue_message(&self, text: impl Into<String>) {
        self.inbox.lock().push_back(text.into());
    }

    /// Submit `text` as a user turn. Queues behind any turn already in
    /// flight rather than interleaving (spec §4.1 public contract).
    pub fn send_message(
        self: &Arc<Self>,
        text: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        tools: Arc<dyn ToolExecutor>,
        on_persist: Option<Arc<dyn Fn(AgentSnapshot) + Send + Sync>>,
    ) -> Result<()> {
        let state = self.state();
        if state.rejects_messages() {
            return Err(Error::validation(format!(
                "runner '{}' is {:?} and rejects new messages",
                self.id(),
                state
            )));
        }
        self.mark_running_if_pending();

        if self.busy.swap(true, Ordering::SeqCst) {
            self.queue_message(text);
            return Ok(());
        }

        let runner = self.clone();
        let text = text.into();
        let span = tracing::info_span!("agent_turn", agent_id = %runner.id());
        tokio::spawn(
            async move {
                runner.clone().run_turn_loop(text, provider, tools, on_persist).await;
            }
            .instrument(span),
        );
        Ok(())
    }

    /// Drive turns until the inbox is drained (spec §4.1 step 7: "persist,
    /// then dequeue the next inbox message"). One call to `send_message`
    /// may therefore process several queued messages in sequence.
    async fn run_turn_loop(
        self: Arc<Self>,
        first_message: String,
        provider: Arc<dyn LlmProvider>,
        tools: Arc<dyn ToolExecutor>,
        on_persist: Option<Arc<dyn Fn(AgentSnapshot) + Send + Sync>>,
    ) {
        let mut next = Some(first_message);
        while let Some(text) = next.take() {
            if self.cancel.is_cancelled() || self.state().rejects_messages() {
                break;
            }
            self.append_message(Message::user(text));
            if let Err(e) = self.run_one_turn(&provider, &tools).await {
                tracing::warn!(agent_id = %self.id(), error = %e, "turn failed");
                self.set_state(RunnerState::Error);
            }
            if let Some(cb) = &on_persist {
                cb(self.serialize());
            }
            next = self.inbox.lock().pop_front();
        }
        self.busy.store(false, Ordering::SeqCst);
    }

    /// Steps 1-6 of the turn algorithm for one inbox message: budget check,
    /// build request, call the provider, append the assistant message,
    /// dispatch tools concurrently, loop until the model stops calling
    /// tools or the loop cap is hit.
    async fn run_one_turn(&self, provider: &Arc<dyn LlmProvider>, tools: &Arc<dyn ToolExecutor>) -> Result<()> {
        for _ in 0..MAX_TOOL_LOOPS {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let usage_so_far = self.usage();
            let config = self.config();
            if usage_so_far.exhausted(&config) {
                return Err(Error::Other(format!(
                    "runner '{}' has exhausted its token/cost budget",
                    config.id
                )));
            }

            let request = self.build_request(&config, tools.as_ref());
            let stream = provider.chat_stream(request).await.map_err(|e| Error::Adapter(e.to_string()))?;
            let accum = self.drain_stream(stream).await?;

            self.usage.lock().add(accum.usage.total_tokens as u64, accum.usage.cost_usd);

            let mut content = Vec::new();
            if !accum.text.is_empty() {
                content.push(ContentPart::Text { text: accum.text.clone() });
            }
            let mut tool_uses = Vec::new();
            for call_id in &accum.tool_order {
                let (_, tool_name, partial_json) = accum
                    .tool_calls
                    .iter()
                    .find(|(id, _, _)| id == call_id)
                    .expect("tool_order entries come from tool_calls");
                let input: Value = if partial_json.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(partial_json).unwrap_or(Value::Object(Default::default()))
                };
                content.push(ContentPart::ToolUse {
                    id: call_id.clone(),
                    name: tool_name.clone(),
                    input: input.clone(),
                });
                tool_uses.push((call_id.clone(), tool_name.clone(), input));
            }
            self.append_message(Message::assistant_parts(content));

            if tool_uses.is_empty() {
                tracing::debug!(agent_id = %config.id, stop_reason = ?accum.stop_reason, "turn ended");
                return Ok(());
            }

            let agent_id = config.id.clone();
            let dispatch_futures = tool_uses.iter().map(|(call_id, tool_name, input)| {
                let tools = tools.clone();
                let agent_id = agent_id.clone();
                let call_id = call_id.clone();
                let tool_name = tool_name.clone();
                let input = input.clone();
                async move { tools.execute(&agent_id, &call_id, &tool_name, input).await }
            });
            let results = futures_util::future::join_all(dispatch_futures).await;
            self.append_message(Message::tool_results(results));
            compress_browse_results(&mut self.conversation.lock(), |id| self.is_browse_call(id));
        }

        self.add_info_message(format!("tool loop limit reached ({MAX_TOOL_LOOPS} iterations)"));
        Ok(())
    }

    fn is_browse_call(&self, tool_use_id: &str) -> bool {
        self.conversation.lock().iter().any(|m| {
            if let MessageContent::Parts(parts) = &m.content {
                parts.iter().any(|p| matches!(p, ContentPart::ToolUse { id, name, .. } if id == tool_use_id && name == "browse"))
            } else {
                false
            }
        })
    }

    fn build_request(&self, config: &AgentConfig, tools: &dyn ToolExecutor) -> ChatRequest {
        ChatRequest {
            system_prompt: config.system_prompt.clone(),
            messages: self.conversation.lock().clone(),
            tools: tools.tool_definitions(config),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }

    async fn drain_stream(
        &self,
        mut stream: hub_domain::stream::BoxStream<'static, Result<StreamEvent>>,
    ) -> Result<ChatAccumulation> {
        let mut accum = ChatAccumulation {
            text: String::new(),
            tool_calls: Vec::new(),
            tool_order: Vec::new(),
            usage: Usage::default(),
            stop_reason: StopReason::EndTurn,
        };

        while let Some(event) = stream.next().await {
            if self.cancel.is_cancelled() {
                break;
            }
            let event = event?;
            let _ = self.events.send(RunnerEvent::Stream(event.clone()));
            match event {
                StreamEvent::TextDelta { text } => accum.text.push_str(&text),
                StreamEvent::ToolUseStart { call_id, tool_name } => {
                    accum.tool_calls.push((call_id.clone(), tool_name, String::new()));
                    accum.tool_order.push(call_id);
                }
                StreamEvent::ToolUseDelta { call_id, partial_json } => {
                    if let Some(entry) = accum.tool_calls.iter_mut().find(|(id, _, _)| *id == call_id) {
                        entry.2.push_str(&partial_json);
                    }
                }
                StreamEvent::ToolUseStop { call_id, tool_name, input } => {
                    if let Some(entry) = accum.tool_calls.iter_mut().find(|(id, _, _)| *id == call_id) {
                        entry.1 = tool_name;
                        entry.2 = serde_json::to_string(&input).unwrap_or_default();
                    }
                }
                StreamEvent::Usage { usage } => accum.usage = usage,
                StreamEvent::Done { stop_reason } => accum.stop_reason = stop_reason,
                StreamEvent::Error { message } => return Err(Error::Adapter(message)),
            }
        }
        Ok(accum)
    }

    // ── Persistence ─────────────────────────────────────────────────

    pub fn serialize(&self) -> AgentSnapshot {
        let usage = self.usage();
        AgentSnapshot {
            config: self.config(),
            conversation: self.message_history(),
            metadata: SnapshotMetadata {
                created_at: self.created_at,
                total_tokens: usage.total_tokens,
                total_cost: usage.total_cost,
                serialized_at: Utc::now(),
            },
            state: self.state_get_all(),
            storage: self.storage_get_all(),
            dom_mirror: self.dom_mirror(),
            schedules: Vec::new(),
        }
    }

    /// Rebuild a runner from a stored snapshot (spec §4.6). The restored
    /// runner starts `Paused` — callers decide when to resume it (spec §9
    /// Open Question: `restore_agent` needs only a subscription, not an
    /// explicit resume).
    pub fn from_snapshot(snapshot: AgentSnapshot, cancel: CancelToken) -> Self {
        let runner = Self::new(snapshot.config, cancel);
        *runner.conversation.lock() = snapshot.conversation;
        *runner.usage.lock() = TurnUsage {
            total_tokens: snapshot.metadata.total_tokens,
            total_cost: snapshot.metadata.total_cost,
        };
        for (k, v) in snapshot.state {
            let _ = runner.state_store.lock().set(&k, v);
        }
        for (k, v) in snapshot.storage {
            let _ = runner.storage_store.lock().set(&k, v);
        }
        *runner.dom_mirror.lock() = snapshot.dom_mirror;
        runner.set_state(RunnerState::Paused);
        runner
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_domain::stream::BoxStream;

    fn test_config(id: &str) -> AgentConfig {
        AgentConfig {
            id: id.into(),
            name: id.into(),
            model: "m".into(),
            provider: "stub".into(),
            system_prompt: "be helpful".into(),
            tools: vec![],
            skills: vec![],
            max_tokens: 1024,
            token_budget: None,
            cost_budget_usd: None,
            network_policy: None,
            sandbox_permissions: None,
        }
    }

    struct StubProvider;
    #[async_trait]
    impl LlmProvider for StubProvider {
        async fn chat_stream(&self, _req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            let events = vec![
                Ok(StreamEvent::TextDelta { text: "hi there".into() }),
                Ok(StreamEvent::Usage {
                    usage: Usage { input_tokens: 5, output_tokens: 2, total_tokens: 7, cost_usd: 0.001 },
                }),
                Ok(StreamEvent::Done { stop_reason: StopReason::EndTurn }),
            ];
            Ok(Box::pin(futures_util::stream::iter(events)))
        }
        fn provider_id(&self) -> &str {
            "stub"
        }
    }

    struct NoopTools;
    #[async_trait]
    impl ToolExecutor for NoopTools {
        async fn execute(&self, _agent_id: &str, call_id: &str, _tool_name: &str, _input: Value) -> ContentPart {
            ContentPart::ToolResult { tool_use_id: call_id.into(), content: "ok".into(), is_error: false }
        }
        fn tool_definitions(&self, _config: &AgentConfig) -> Vec<ToolDefinition> {
            Vec::new()
        }
    }

    #[test]
    fn fresh_runner_starts_pending_and_idle() {
        let runner = AgentRunner::new(test_config("a1"), CancelToken::new());
        assert_eq!(runner.state(), RunnerState::Pending);
        assert!(!runner.is_busy());
    }

    #[test]
    fn killed_runner_rejects_messages() {
        let runner = Arc::new(AgentRunner::new(test_config("a1"), CancelToken::new()));
        runner.kill();
        let result = runner.send_message("hi", Arc::new(StubProvider), Arc::new(NoopTools), None);
        assert!(result.is_err());
    }

    #[test]
    fn pause_then_resume_is_idempotent_from_pending() {
        let runner = AgentRunner::new(test_config("a1"), CancelToken::new());
        runner.pause();
        assert_eq!(runner.state(), RunnerState::Pending);
    }

    #[tokio::test]
    async fn a_turn_with_no_tool_calls_appends_one_assistant_message() {
        let runner = Arc::new(AgentRunner::new(test_config("a1"), CancelToken::new()));
        runner
            .send_message("hello", Arc::new(StubProvider), Arc::new(NoopTools), None)
            .unwrap();

        for _ in 0..50 {
            if !runner.is_busy() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let history = runner.message_history();
        assert_eq!(history.len(), 2); // user + assistant
        assert_eq!(runner.state(), RunnerState::Running);
        assert_eq!(runner.usage().total_tokens, 7);
    }

    #[test]
    fn state_store_quota_violation_is_reported() {
        let mut quotas = StoreQuotaConfig::default();
        quotas.max_keys = 0;
        let runner = AgentRunner::with_quotas(test_config("a1"), CancelToken::new(), quotas, StoreQuotaConfig::default());
        assert!(runner.state_set("x", Value::from(1)).is_err());
    }

    #[test]
    fn serialize_then_restore_round_trips_conversation() {
        let runner = AgentRunner::new(test_config("a1"), CancelToken::new());
        runner.add_info_message("note");
        let snapshot = runner.serialize();
        let restored = AgentRunner::from_snapshot(snapshot, CancelToken::new());
        assert_eq!(restored.message_history().len(), 1);
        assert_eq!(restored.state(), RunnerState::Paused);
    }
}
