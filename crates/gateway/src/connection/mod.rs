//! ConnectionManager: authenticates duplex connections, routes typed
//! messages, and fans out Runner events to subscribed clients (spec §4.4).

pub mod protocol;
pub mod ws;

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hub_domain::config::FailedAuthConfig;
use hub_domain::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;

use crate::pipeline::BrowserRoutedDispatcher;
use crate::push::{PushRegistry, SubscriptionDescriptor};
use crate::registry::AgentRegistry;
use crate::scheduler::Scheduler;
use crate::store::{AgentSnapshot, AgentStore};

pub use protocol::{
    AdminHubMessage, AdminMessage, AgentActionKind, ClientMessage, HubMessage, InterventionMode,
    WriteThroughAction,
};

/// Constant-time token comparison, hashed first so both operands always
/// compare at a fixed 32-byte length regardless of input length — the same
/// construction the teacher uses for its node-to-gateway token check.
pub fn token_eq(a: &str, b: &str) -> bool {
    let ha = Sha256::digest(a.as_bytes());
    let hb = Sha256::digest(b.as_bytes());
    ha.ct_eq(&hb).into()
}

pub fn is_loopback(addr: IpAddr) -> bool {
    addr.is_loopback()
}

pub fn runner_state_name(state: hub_domain::agent::RunnerState) -> String {
    match state {
        hub_domain::agent::RunnerState::Pending => "pending",
        hub_domain::agent::RunnerState::Running => "running",
        hub_domain::agent::RunnerState::Paused => "paused",
        hub_domain::agent::RunnerState::Stopped => "stopped",
        hub_domain::agent::RunnerState::Error => "error",
        hub_domain::agent::RunnerState::Killed => "killed",
    }
    .to_string()
}

struct FailedAuthEntry {
    count: u32,
    locked_until: Option<DateTime<Utc>>,
    last_attempt: DateTime<Utc>,
}

/// Per-remote-address failed-auth bookkeeping with lockout and bounded
/// capacity (spec §4.4, §9 "Failed-auth table is a mapping with TTL
/// semantics ... bounded capacity with LRU eviction restricted to
/// non-locked entries").
pub struct FailedAuthTable {
    entries: Mutex<HashMap<IpAddr, FailedAuthEntry>>,
    config: FailedAuthConfig,
}

impl FailedAuthTable {
    pub fn new(config: FailedAuthConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// `Some(minutes_remaining)` if currently locked out.
    pub fn check_locked(&self, addr: IpAddr) -> Option<i64> {
        let entries = self.entries.lock();
        let entry = entries.get(&addr)?;
        let locked_until = entry.locked_until?;
        let now = Utc::now();
        if now < locked_until {
            Some(((locked_until - now).num_seconds() + 59) / 60)
        } else {
            None
        }
    }

    pub fn record_failure(&self, addr: IpAddr) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.config.table_capacity && !entries.contains_key(&addr) {
            if let Some(oldest) = entries
                .iter()
                .filter(|(_, e)| e.locked_until.is_none())
                .min_by_key(|(_, e)| e.last_attempt)
                .map(|(addr, _)| *addr)
            {
                entries.remove(&oldest);
            }
        }
        let now = Utc::now();
        let entry = entries.entry(addr).or_insert(FailedAuthEntry {
            count: 0,
            locked_until: None,
            last_attempt: now,
        });
        entry.count += 1;
        entry.last_attempt = now;
        if entry.count >= self.config.max_attempts {
            entry.locked_until = Some(now + chrono::Duration::minutes(self.config.lockout_minutes as i64));
        }
    }

    pub fn record_success(&self, addr: IpAddr) {
        self.entries.lock().remove(&addr);
    }

    /// Sweep stale, unlocked entries (spec §4.4 "A background sweep every 5
    /// minutes expires stale records").
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| match e.locked_until {
            Some(until) => until > now,
            None => now - e.last_attempt < chrono::Duration::minutes(self.config.sweep_interval_minutes as i64 * 2),
        });
        before - entries.len()
    }
}

#[derive(Debug, Clone)]
struct InterventionSession {
    agent_id: String,
    client_id: String,
    mode: InterventionMode,
    event_log: Vec<serde_json::Value>,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

/// Grants exclusive interactive control of an agent to one client at a time
/// (spec §4.4 "Intervention sessions").
pub struct InterveneManager {
    sessions: Mutex<HashMap<String, InterventionSession>>,
    inactivity_timeout: chrono::Duration,
}

pub struct InterveneEnded {
    pub agent_id: String,
    pub mode: InterventionMode,
    pub event_log: Vec<serde_json::Value>,
}

impl InterveneManager {
    pub fn new(inactivity_timeout_minutes: u64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            inactivity_timeout: chrono::Duration::minutes(inactivity_timeout_minutes as i64),
        }
    }

    pub fn try_intervene(&self, agent_id: &str, client_id: &str, mode: InterventionMode) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(agent_id) {
            return false;
        }
        let now = Utc::now();
        sessions.insert(
            agent_id.to_string(),
            InterventionSession {
                agent_id: agent_id.to_string(),
                client_id: client_id.to_string(),
                mode,
                event_log: Vec::new(),
                started_at: now,
                last_activity: now,
            },
        );
        true
    }

    pub fn journal(&self, agent_id: &str, client_id: &str, event: serde_json::Value) {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get_mut(agent_id) {
            if session.client_id != client_id || session.mode != InterventionMode::Visible {
                return;
            }
            session.last_activity = Utc::now();
            session.event_log.push(event);
        }
    }

    pub fn end(&self, agent_id: &str, client_id: &str) -> Option<InterveneEnded> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get(agent_id)?;
        if session.client_id != client_id {
            return None;
        }
        let session = sessions.remove(agent_id)?;
        Some(InterveneEnded {
            agent_id: session.agent_id,
            mode: session.mode,
            event_log: session.event_log,
        })
    }

    /// Release every session owned by a disconnecting client.
    pub fn release_for_client(&self, client_id: &str) -> Vec<InterveneEnded> {
        let mut sessions = self.sessions.lock();
        let owned: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| s.client_id == client_id)
            .map(|(id, _)| id.clone())
            .collect();
        owned
            .into_iter()
            .filter_map(|agent_id| {
                sessions.remove(&agent_id).map(|s| InterveneEnded {
                    agent_id: s.agent_id,
                    mode: s.mode,
                    event_log: s.event_log,
                })
            })
            .collect()
    }

    pub fn sweep_idle(&self) -> Vec<InterveneEnded> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock();
        let expired: Vec<String> = sessions
            .iter()
            .filter(|(_, s)| now - s.last_activity > self.inactivity_timeout)
            .map(|(id, _)| id.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|agent_id| {
                sessions.remove(&agent_id).map(|s| InterveneEnded {
                    agent_id: s.agent_id,
                    mode: s.mode,
                    event_log: s.event_log,
                })
            })
            .collect()
    }

    pub fn is_under_intervention(&self, agent_id: &str) -> bool {
        self.sessions.lock().contains_key(agent_id)
    }
}

/// One authenticated (or pre-auth) client connection.
pub struct ClientHandle {
    pub id: String,
    pub remote_addr: Option<IpAddr>,
    pub sink: mpsc::Sender<HubMessage>,
    pub subscribed_agents: RwLock<HashSet<String>>,
    pub device_id: RwLock<Option<String>>,
    pub authenticated: std::sync::atomic::AtomicBool,
}

impl ClientHandle {
    fn send(&self, msg: HubMessage) {
        let _ = self.sink.try_send(msg);
    }
}

pub struct ConnectionManager {
    clients: RwLock<HashMap<String, Arc<ClientHandle>>>,
    pub failed_auth: FailedAuthTable,
    pub intervene: InterveneManager,
    pub push: Arc<PushRegistry>,
    registry: Arc<AgentRegistry>,
    store: Arc<AgentStore>,
    scheduler: Arc<Scheduler>,
    providers: Arc<hub_providers::ProviderRegistry>,
    tools: RwLock<Option<Arc<dyn crate::runner::ToolExecutor>>>,
    auth_token: String,
    admin_token: String,
    localhost_bypass: bool,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<AgentStore>,
        scheduler: Arc<Scheduler>,
        push: Arc<PushRegistry>,
        providers: Arc<hub_providers::ProviderRegistry>,
        failed_auth_config: FailedAuthConfig,
        intervention_timeout_minutes: u64,
        auth_token: String,
        admin_token: String,
        localhost_bypass: bool,
    ) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            failed_auth: FailedAuthTable::new(failed_auth_config),
            intervene: InterveneManager::new(intervention_timeout_minutes),
            push,
            registry,
            store,
            scheduler,
            providers,
            tools: RwLock::new(None),
            auth_token,
            admin_token,
            localhost_bypass,
        }
    }

    /// Wired in after construction to avoid a cycle: the `ToolPipeline`
    /// itself needs a `ConnectionManager` reference for browser-routed
    /// tools (§9 "Cyclic references").
    pub fn set_tool_executor(&self, tools: Arc<dyn crate::runner::ToolExecutor>) {
        *self.tools.write() = Some(tools);
    }

    /// Submit a user turn to a runner (spec §4.1 `sendMessage`). Persists
    /// after every turn via the same `AgentStore` write-through path.
    pub fn send_message(&self, agent_id: &str, text: String) -> Result<()> {
        let runner = self.registry.get(agent_id).ok_or_else(|| Error::validation("unknown agent"))?;
        let provider = self
            .providers
            .get(&runner.config().provider)
            .ok_or_else(|| Error::validation(format!("unknown provider '{}'", runner.config().provider)))?;
        let tools = self
            .tools
            .read()
            .clone()
            .ok_or_else(|| Error::Fatal("tool executor not wired".into()))?;
        let store = self.store.clone();
        let agent_id_owned = agent_id.to_string();
        let on_persist: Arc<dyn Fn(AgentSnapshot) + Send + Sync> = Arc::new(move |snapshot| {
            let store = store.clone();
            let agent_id = agent_id_owned.clone();
            tokio::spawn(async move {
                if let Err(e) = store.save(&agent_id, &snapshot).await {
                    tracing::warn!(agent_id = %agent_id, error = %e, "failed to persist after turn");
                }
            });
        });
        runner.send_message(text, provider, tools, Some(on_persist))
    }

    pub fn register_client(&self, remote_addr: Option<IpAddr>) -> (Arc<ClientHandle>, mpsc::Receiver<HubMessage>) {
        let (tx, rx) = mpsc::channel(128);
        let handle = Arc::new(ClientHandle {
            id: uuid::Uuid::new_v4().to_string(),
            remote_addr,
            sink: tx,
            subscribed_agents: RwLock::new(HashSet::new()),
            device_id: RwLock::new(None),
            authenticated: std::sync::atomic::AtomicBool::new(false),
        });
        self.clients.write().insert(handle.id.clone(), handle.clone());
        (handle, rx)
    }

    pub fn remove_client(&self, client_id: &str) {
        self.clients.write().remove(client_id);
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.clients.read().keys().cloned().collect()
    }

    /// Drive a scheduler-fired dispatch to completion (spec §4.2). Used by
    /// both the cron tick loop and `fire_event` callers.
    pub async fn apply_trigger_dispatch(&self, dispatch: crate::scheduler::TriggerDispatch) {
        match dispatch {
            crate::scheduler::TriggerDispatch::SendMessage { agent_id, message } => {
                if let Err(e) = self.send_message(&agent_id, message) {
                    tracing::warn!(agent_id = %agent_id, error = %e, "scheduled send_message failed");
                }
            }
            crate::scheduler::TriggerDispatch::ExecuteTool { agent_id, tool, tool_input } => {
                let Some(tools) = self.tools.read().clone() else {
                    tracing::warn!(agent_id = %agent_id, "tool executor not wired; dropping scheduled tool call");
                    return;
                };
                let call_id = uuid::Uuid::new_v4().to_string();
                let _ = tools.execute(&agent_id, &call_id, &tool, tool_input).await;
            }
        }
    }

    /// Authenticate a regular client connection. Returns `Ok(())` on
    /// success; `Err` carries the user-facing reason.
    pub fn authenticate(&self, client: &ClientHandle, token: &str) -> Result<()> {
        if let Some(addr) = client.remote_addr {
            if is_loopback(addr) && self.localhost_bypass {
                client.authenticated.store(true, std::sync::atomic::Ordering::SeqCst);
                self.failed_auth.record_success(addr);
                return Ok(());
            }
            if let Some(minutes) = self.failed_auth.check_locked(addr) {
                return Err(Error::authorization(format!(
                    "too many failed attempts; locked for {minutes} more minute(s)"
                )));
            }
            if token_eq(token, &self.auth_token) {
                client.authenticated.store(true, std::sync::atomic::Ordering::SeqCst);
                self.failed_auth.record_success(addr);
                Ok(())
            } else {
                self.failed_auth.record_failure(addr);
                Err(Error::authorization("invalid token"))
            }
        } else if token_eq(token, &self.auth_token) {
            client.authenticated.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        } else {
            Err(Error::authorization("invalid token"))
        }
    }

    pub fn authenticate_admin(&self, client: &ClientHandle, token: &str) -> Result<()> {
        // An empty admin_token means `admin_token_env` was unset at startup;
        // the admin surface stays closed rather than matching an empty
        // client-supplied token (ServerConfig doc: "admin endpoints reject
        // every request").
        if !self.admin_token.is_empty() && token_eq(token, &self.admin_token) {
            client.authenticated.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        } else {
            if let Some(addr) = client.remote_addr {
                self.failed_auth.record_failure(addr);
            }
            Err(Error::authorization("invalid admin token"))
        }
    }

    /// Subscribe a client and push the initial sync (spec §4.4).
    pub fn subscribe(&self, client: &ClientHandle, agent_id: &str) {
        client.subscribed_agents.write().insert(agent_id.to_string());
        let Some(runner) = self.registry.get(agent_id) else {
            return;
        };
        client.send(HubMessage::AgentState {
            agent_id: agent_id.to_string(),
            state: runner_state_name(runner.state()),
            id: None,
        });
        client.send(HubMessage::ConversationHistory {
            agent_id: agent_id.to_string(),
            messages: runner.message_history(),
        });
        client.send(HubMessage::RestoreDomState {
            agent_id: agent_id.to_string(),
            dom: runner.dom_mirror(),
        });
    }

    pub fn unsubscribe(&self, client: &ClientHandle, agent_id: &str) {
        client.subscribed_agents.write().remove(agent_id);
    }

    fn subscribers_of(&self, agent_id: &str, exclude: Option<&str>) -> Vec<Arc<ClientHandle>> {
        self.clients
            .read()
            .values()
            .filter(|c| Some(c.id.as_str()) != exclude)
            .filter(|c| c.subscribed_agents.read().contains(agent_id))
            .cloned()
            .collect()
    }

    /// Fan out a Runner event to every subscribed client (spec §4.4
    /// "Fanout"). Best-effort, per-client independent — one slow/closed
    /// client's backpressure never blocks delivery to others.
    pub fn fanout_agent_event(&self, agent_id: &str, event: serde_json::Value) {
        for client in self.subscribers_of(agent_id, None) {
            client.send(HubMessage::AgentEvent {
                agent_id: agent_id.to_string(),
                event: event.clone(),
            });
        }
    }

    pub fn fanout_loop_event(&self, agent_id: &str, event: serde_json::Value) {
        for client in self.subscribers_of(agent_id, None) {
            client.send(HubMessage::AgentLoopEvent {
                agent_id: agent_id.to_string(),
                event: event.clone(),
            });
        }
    }

    fn broadcast_state_change(&self, agent_id: &str, state: hub_domain::agent::RunnerState) {
        let state_name = runner_state_name(state);
        for client in self.subscribers_of(agent_id, None) {
            client.send(HubMessage::AgentState {
                agent_id: agent_id.to_string(),
                state: state_name.clone(),
                id: None,
            });
        }
    }

    /// Forward one runner's event stream into subscriber fanout and the
    /// push transport, for the lifetime of the runner (spec §4.1
    /// `onEvent`/`onAgentEvent`, §4.4 "Push notifications"). Spawned once
    /// per runner, when it is created or restored.
    pub fn watch_runner(
        self: &Arc<Self>,
        runner: Arc<crate::runner::AgentRunner>,
        push_sink: Arc<dyn crate::push::PushSink>,
    ) {
        let mut events = runner.subscribe();
        let manager = self.clone();
        let agent_id = runner.id();
        tokio::spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };
                match event {
                    crate::runner::RunnerEvent::Stream(stream_event) => {
                        let value = serde_json::to_value(&stream_event).unwrap_or(serde_json::Value::Null);
                        manager.fanout_loop_event(&agent_id, value);
                    }
                    crate::runner::RunnerEvent::MessageAppended(message) => {
                        let value = serde_json::json!({"type": "message", "message": message});
                        manager.fanout_agent_event(&agent_id, value);
                    }
                    crate::runner::RunnerEvent::StateChanged(state) => {
                        manager.broadcast_state_change(&agent_id, state);
                    }
                    crate::runner::RunnerEvent::NotifyUser { title, body, tag } => {
                        let known_devices: Vec<String> = manager
                            .push
                            .verified_endpoints()
                            .into_iter()
                            .map(|s| s.device_id)
                            .collect();
                        manager
                            .maybe_push(
                                push_sink.as_ref(),
                                crate::push::PushPayload {
                                    title,
                                    body,
                                    tag,
                                    agent_id: agent_id.clone(),
                                },
                                &known_devices,
                            )
                            .await;
                    }
                }
            }
        });
    }

    /// Authorized state write-through: the sender must be subscribed to
    /// `agent_id` (spec §4.4). Applies to the runner's state store, persists
    /// asynchronously, and replicates to every *other* subscriber.
    pub async fn write_through_state(
        &self,
        client: &ClientHandle,
        agent_id: &str,
        key: &str,
        value: serde_json::Value,
        action: WriteThroughAction,
    ) -> Result<()> {
        if !client.subscribed_agents.read().contains(agent_id) {
            return Err(Error::authorization("not subscribed to this agent"));
        }
        let Some(runner) = self.registry.get(agent_id) else {
            return Err(Error::validation("unknown agent"));
        };
        match action {
            WriteThroughAction::Set => {
                runner.state_set(key, value.clone())?;
            }
            WriteThroughAction::Delete => {
                runner.state_delete(key);
            }
        }
        for other in self.subscribers_of(agent_id, Some(&client.id)) {
            other.send(HubMessage::StatePush {
                agent_id: agent_id.to_string(),
                key: key.to_string(),
                value: value.clone(),
                action,
            });
        }
        let snapshot = runner.serialize();
        let store = self.store.clone();
        let agent_id = agent_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.save(&agent_id, &snapshot).await {
                tracing::warn!(agent_id = %agent_id, error = %e, "failed to persist write-through");
            }
        });
        Ok(())
    }

    pub async fn write_through_file(
        &self,
        client: &ClientHandle,
        agent_id: &str,
        path: &str,
        content: &str,
    ) -> Result<()> {
        if !client.subscribed_agents.read().contains(agent_id) {
            return Err(Error::authorization("not subscribed to this agent"));
        }
        let root = self.store.files_root(agent_id);
        tokio::fs::create_dir_all(&root).await.map_err(Error::Io)?;
        let roots = vec![root];
        let resolved =
            hub_tools::filesystem::resolve_within(&roots, path).map_err(Error::validation)?;
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(Error::Io)?;
        }
        tokio::fs::write(&resolved, content).await.map_err(Error::Io)?;
        for other in self.subscribers_of(agent_id, Some(&client.id)) {
            other.send(HubMessage::FilePush {
                agent_id: agent_id.to_string(),
                path: path.to_string(),
                content: content.to_string(),
            });
        }
        Ok(())
    }

    pub fn dom_state_update(&self, client: &ClientHandle, agent_id: &str, dom: crate::store::DomMirror) -> Result<()> {
        if !client.subscribed_agents.read().contains(agent_id) {
            return Err(Error::authorization("not subscribed to this agent"));
        }
        let Some(runner) = self.registry.get(agent_id) else {
            return Err(Error::validation("unknown agent"));
        };
        runner.set_dom_mirror(dom.clone());
        for other in self.subscribers_of(agent_id, Some(&client.id)) {
            other.send(HubMessage::RestoreDomState {
                agent_id: agent_id.to_string(),
                dom: Some(dom.clone()),
            });
        }
        Ok(())
    }

    /// Decide whether a `notify_user` event should reach the push
    /// transport, consulting the DeviceStateTable (spec §4.4).
    pub async fn maybe_push(&self, sink: &dyn crate::push::PushSink, payload: crate::push::PushPayload, known_devices: &[String]) {
        if self.push.any_device_active(known_devices) {
            return;
        }
        for sub in self.push.verified_endpoints() {
            if known_devices.contains(&sub.device_id) {
                if let Err(e) = sink.send(&sub.descriptor.endpoint, &payload).await {
                    tracing::warn!(endpoint = %sub.descriptor.endpoint, error = %e, "push delivery failed");
                }
            }
        }
    }

    pub fn push_subscribe(&self, client: &ClientHandle, device_id: &str, descriptor: SubscriptionDescriptor) -> String {
        *client.device_id.write() = Some(device_id.to_string());
        self.push.device_connected(device_id);
        self.push.begin_subscription(device_id, descriptor)
    }

    pub fn push_verify_pin(&self, endpoint: &str, pin: &str) -> bool {
        self.push.verify_pin(endpoint, pin)
    }

    pub fn push_unsubscribe(&self, endpoint: &str) {
        self.push.unsubscribe(endpoint);
    }

    pub fn visibility_state(&self, client: &ClientHandle, device_id: &str, visible: bool) {
        *client.device_id.write() = Some(device_id.to_string());
        self.push.set_visibility(device_id, visible);
    }

    pub fn intervene(&self, client: &ClientHandle, agent_id: &str, mode: InterventionMode) -> bool {
        self.intervene.try_intervene(agent_id, &client.id, mode)
    }

    /// End an intervention session and flush its journal back into the
    /// agent's conversation (spec §4.4, scenario 6).
    pub fn end_intervene(&self, client_id: &str, agent_id: &str) {
        if let Some(ended) = self.intervene.end(agent_id, client_id) {
            self.apply_intervene_ended(ended);
        }
    }

    fn apply_intervene_ended(&self, ended: InterveneEnded) {
        let Some(runner) = self.registry.get(&ended.agent_id) else {
            return;
        };
        let mode_name = match ended.mode {
            InterventionMode::Visible => "visible",
            InterventionMode::Private => "private",
        };
        let mut text = format!("[User intervention ended — {mode_name} mode]");
        if !ended.event_log.is_empty() {
            let journal = serde_json::to_string_pretty(&ended.event_log).unwrap_or_default();
            text.push('\n');
            text.push_str(&journal);
        }
        runner.add_info_message(text);
    }

    /// Release every intervention session owned by a disconnecting client
    /// and flush its journal (spec §4.4).
    pub fn on_disconnect(&self, client: &Arc<ClientHandle>) {
        for ended in self.intervene.release_for_client(&client.id) {
            self.apply_intervene_ended(ended);
        }
        if let Some(device_id) = client.device_id.read().clone() {
            self.push.device_disconnected(&device_id);
        }
        self.remove_client(&client.id);
    }

    /// Periodic sweep: expired failed-auth locks and idle interventions
    /// (spec §4.4, §5).
    pub fn sweep(&self) {
        let purged_auth = self.failed_auth.sweep();
        let expired_push = self.push.sweep_expired_pending();
        if purged_auth > 0 || expired_push > 0 {
            tracing::debug!(purged_auth, expired_push, "connection manager sweep");
        }
        for ended in self.intervene.sweep_idle() {
            self.apply_intervene_ended(ended);
        }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<AgentStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub async fn persist_agent(&self, agent_id: &str) -> Result<()> {
        let Some(runner) = self.registry.get(agent_id) else {
            return Err(Error::validation("unknown agent"));
        };
        let snapshot: AgentSnapshot = runner.serialize();
        self.store.save(agent_id, &snapshot).await
    }

    /// `restore_agent` authorization is subscription-only (spec §4.4, §9
    /// Open Question: no additional persister-identity check).
    pub async fn restore_agent(&self, client: &ClientHandle, agent_id: &str) -> Result<AgentSnapshot> {
        if !client.subscribed_agents.read().contains(agent_id) {
            return Err(Error::authorization("not subscribed to this agent"));
        }
        self.store.load(agent_id).await
    }
}

#[async_trait::async_trait]
impl BrowserRoutedDispatcher for ConnectionManager {
    async fn dispatch(&self, agent_id: &str, tool_name: &str, input: serde_json::Value) -> std::result::Result<serde_json::Value, String> {
        let subscribers = self.subscribers_of(agent_id, None);
        let Some(client) = subscribers.first() else {
            return Err("no client subscribed to this agent".into());
        };
        let request_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = tokio::sync::oneshot::channel();
        {
            let mut pending = PENDING_BROWSER_REQUESTS.lock();
            pending.insert(request_id.clone(), tx);
        }
        client.send(HubMessage::BrowserToolRequest {
            request_id: request_id.clone(),
            agent_id: agent_id.to_string(),
            tool: tool_name.to_string(),
            input,
        });
        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                PENDING_BROWSER_REQUESTS.lock().remove(&request_id);
                Err("client disconnected before responding".into())
            }
        }
    }
}

type PendingBrowserResult = std::result::Result<serde_json::Value, String>;

static PENDING_BROWSER_REQUESTS: once_cell_lite::Lazy<Mutex<HashMap<String, tokio::sync::oneshot::Sender<PendingBrowserResult>>>> =
    once_cell_lite::Lazy::new(HashMap::new);

/// Complete a pending browser-routed tool request by id (called from the WS
/// reader loop on `browser_tool_result`).
pub fn complete_browser_request(request_id: &str, result: PendingBrowserResult) {
    if let Some(tx) = PENDING_BROWSER_REQUESTS.lock().remove(request_id) {
        let _ = tx.send(result);
    }
}

/// Minimal `Lazy<Mutex<T>>` without pulling in `once_cell` as a new
/// dependency, matching the scope of what this crate needs: a
/// process-wide table of in-flight browser-routed requests.
mod once_cell_lite {
    use std::sync::OnceLock;

    pub struct Lazy<T: 'static> {
        cell: OnceLock<T>,
        init: fn() -> T,
    }

    impl<T> Lazy<T> {
        pub const fn new(init: fn() -> T) -> Self {
            Self { cell: OnceLock::new(), init }
        }
    }

    impl<T> std::ops::Deref for Lazy<T> {
        type Target = T;
        fn deref(&self) -> &T {
            self.cell.get_or_init(self.init)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_eq_normalizes_length_before_comparing() {
        assert!(token_eq("short", "short"));
        assert!(!token_eq("short", "a-much-longer-token-value"));
    }

    #[test]
    fn failed_auth_locks_out_after_max_attempts() {
        let table = FailedAuthTable::new(FailedAuthConfig {
            max_attempts: 3,
            lockout_minutes: 15,
            sweep_interval_minutes: 5,
            table_capacity: 100,
        });
        let addr: IpAddr = "203.0.113.5".parse().unwrap();
        for _ in 0..2 {
            table.record_failure(addr);
            assert!(table.check_locked(addr).is_none());
        }
        table.record_failure(addr);
        assert!(table.check_locked(addr).is_some());
    }

    #[test]
    fn intervene_denies_a_second_concurrent_request() {
        let manager = InterveneManager::new(10);
        assert!(manager.try_intervene("a1", "c1", InterventionMode::Visible));
        assert!(!manager.try_intervene("a1", "c2", InterventionMode::Visible));
    }

    #[test]
    fn release_for_client_flushes_owned_sessions_only() {
        let manager = InterveneManager::new(10);
        manager.try_intervene("a1", "c1", InterventionMode::Visible);
        manager.try_intervene("a2", "c2", InterventionMode::Visible);
        let ended = manager.release_for_client("c1");
        assert_eq!(ended.len(), 1);
        assert_eq!(ended[0].agent_id, "a1");
        assert!(manager.is_under_intervention("a2"));
        assert!(!manager.is_under_intervention("a1"));
    }
}
