//! Wire protocol for both client and admin WebSocket endpoints (spec §6
//! "External Interfaces"). Modeled on the teacher's `sa_protocol::WsMessage`
//! tagged-by-`type` message enum.

use hub_domain::agent::AgentConfig;
use hub_domain::tool::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scheduler::ScheduleEntry;
use crate::store::DomMirror;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Auth {
        token: String,
        #[serde(default)]
        id: Option<String>,
    },
    SubscribeAgent {
        agent_id: String,
        #[serde(default)]
        id: Option<String>,
    },
    UnsubscribeAgent {
        agent_id: String,
        #[serde(default)]
        id: Option<String>,
    },
    SendMessage {
        agent_id: String,
        message: String,
        #[serde(default)]
        id: Option<String>,
    },
    AgentAction {
        agent_id: String,
        action: AgentActionKind,
        #[serde(default)]
        id: Option<String>,
    },
    PersistAgent {
        agent_id: String,
        #[serde(default)]
        id: Option<String>,
    },
    RestoreAgent {
        agent_id: String,
        #[serde(default)]
        id: Option<String>,
    },
    ListHubAgents {
        #[serde(default)]
        id: Option<String>,
    },
    StateWriteThrough {
        agent_id: String,
        key: String,
        value: Value,
        action: WriteThroughAction,
        #[serde(default)]
        id: Option<String>,
    },
    DomStateUpdate {
        agent_id: String,
        dom: DomMirror,
        #[serde(default)]
        id: Option<String>,
    },
    FileWriteThrough {
        agent_id: String,
        path: String,
        content: String,
        #[serde(default)]
        id: Option<String>,
    },
    PushSubscribe {
        device_id: String,
        endpoint: String,
        p256dh: String,
        auth: String,
        #[serde(default)]
        id: Option<String>,
    },
    PushVerifyPin {
        endpoint: String,
        pin: String,
        #[serde(default)]
        id: Option<String>,
    },
    PushUnsubscribe {
        endpoint: String,
        #[serde(default)]
        id: Option<String>,
    },
    VisibilityState {
        device_id: String,
        visible: bool,
        #[serde(default)]
        id: Option<String>,
    },
    BrowserToolResult {
        request_id: String,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<String>,
    },
    Intervene {
        agent_id: String,
        mode: InterventionMode,
        #[serde(default)]
        id: Option<String>,
    },
    EndIntervene {
        agent_id: String,
        #[serde(default)]
        id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentActionKind {
    Pause,
    Resume,
    Stop,
    Kill,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteThroughAction {
    Set,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionMode {
    Visible,
    Private,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    AuthResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    AgentState {
        agent_id: String,
        state: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    AgentEvent {
        agent_id: String,
        event: Value,
    },
    AgentLoopEvent {
        agent_id: String,
        event: Value,
    },
    ConversationHistory {
        agent_id: String,
        messages: Vec<Message>,
    },
    RestoreDomState {
        agent_id: String,
        dom: Option<DomMirror>,
    },
    StatePush {
        agent_id: String,
        key: String,
        value: Value,
        action: WriteThroughAction,
    },
    FilePush {
        agent_id: String,
        path: String,
        content: String,
    },
    PersistResult {
        hub_agent_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    RestoreSession {
        hub_agent_id: String,
        config: AgentConfig,
        messages: Vec<Message>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    HubAgentsList {
        agents: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    BrowserToolRequest {
        request_id: String,
        agent_id: String,
        tool: String,
        input: Value,
    },
    PushSubscribeResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    PushVerifyResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    VapidPublicKey {
        key: Option<String>,
    },
    InterveneResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminMessage {
    AdminAuth {
        token: String,
        #[serde(default)]
        id: Option<String>,
    },
    ListAgents {
        #[serde(default)]
        id: Option<String>,
    },
    InspectAgent {
        agent_id: String,
        #[serde(default)]
        id: Option<String>,
    },
    PauseAgent {
        agent_id: String,
        #[serde(default)]
        id: Option<String>,
    },
    StopAgent {
        agent_id: String,
        #[serde(default)]
        id: Option<String>,
    },
    KillAgent {
        agent_id: String,
        #[serde(default)]
        id: Option<String>,
    },
    RemoveAgent {
        agent_id: String,
        #[serde(default)]
        id: Option<String>,
    },
    ListConnections {
        #[serde(default)]
        id: Option<String>,
    },
    Disconnect {
        connection_id: String,
        #[serde(default)]
        id: Option<String>,
    },
    GetConfig {
        #[serde(default)]
        id: Option<String>,
    },
    ReloadConfig {
        #[serde(default)]
        id: Option<String>,
    },
    SubscribeLogs {
        #[serde(default)]
        id: Option<String>,
    },
    GetStats {
        #[serde(default)]
        id: Option<String>,
    },
    GetUsage {
        agent_id: String,
        #[serde(default)]
        id: Option<String>,
    },
    GetAgentSchedules {
        agent_id: String,
        #[serde(default)]
        id: Option<String>,
    },
    GetAgentLog {
        agent_id: String,
        #[serde(default)]
        id: Option<String>,
    },
    GetAgentDom {
        agent_id: String,
        #[serde(default)]
        id: Option<String>,
    },
    Nuke {
        #[serde(default)]
        id: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminHubMessage {
    AuthResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    AgentsList {
        agents: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    AgentInfo {
        agent_id: String,
        state: String,
        is_busy: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    ConnectionsList {
        connections: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Config {
        config: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    ConfigReloaded {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    LogEntry {
        line: String,
    },
    Stats {
        agent_count: usize,
        connection_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Usage {
        agent_id: String,
        total_tokens: u64,
        total_cost_usd: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    AgentSchedules {
        agent_id: String,
        schedules: Vec<ScheduleEntry>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    AgentLog {
        agent_id: String,
        messages: Vec<Message>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    AgentDom {
        agent_id: String,
        dom: Option<DomMirror>,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Ok {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}
