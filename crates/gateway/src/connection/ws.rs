//! WebSocket endpoints for the client and admin channels (spec §6
//! "External Interfaces"). Modeled directly on the teacher's
//! `nodes/ws.rs`: an upgrade handler that checks a query-string token,
//! then a socket handler running a writer task draining an outbound
//! channel alongside a reader loop dispatching inbound messages.

use std::net::SocketAddr;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use crate::app::AppState;
use crate::push::SubscriptionDescriptor;

use super::protocol::{AdminHubMessage, AdminMessage, AgentActionKind, ClientMessage, HubMessage};
use super::{runner_state_name, ClientHandle};

/// GET /v1/ws — the public client channel. Authentication happens over the
/// socket itself (the first `auth` message), not a query-string token, so
/// the token never lands in a server access log (spec §4.4).
pub async fn client_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client_socket(socket, state, Some(addr.ip())))
}

/// GET /v1/admin/ws — the admin channel. Query-string tokens are not
/// accepted here; auth happens via the first `admin_auth` message, same as
/// the client channel, so the token never lands in a server access log.
pub async fn admin_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let _ = addr;
    ws.on_upgrade(move |socket| handle_admin_socket(socket, state))
}

async fn send_hub_message(sink: &mut (impl SinkExt<WsMessage> + Unpin), msg: &HubMessage) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sink.send(WsMessage::Text(json)).await.map_err(|_| ())
}

async fn send_admin_message(sink: &mut (impl SinkExt<WsMessage> + Unpin), msg: &AdminHubMessage) -> Result<(), ()> {
    let json = serde_json::to_string(msg).map_err(|_| ())?;
    sink.send(WsMessage::Text(json)).await.map_err(|_| ())
}

async fn handle_client_socket(socket: WebSocket, state: AppState, remote_addr: Option<std::net::IpAddr>) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (client, mut outbound_rx) = state.connections.register_client(remote_addr);

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if send_hub_message(&mut ws_sink, &msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            WsMessage::Text(text) => {
                let Ok(parsed) = serde_json::from_str::<ClientMessage>(&text) else {
                    client.send(HubMessage::Error {
                        message: "unparseable message".into(),
                        code: Some("validation".into()),
                        id: None,
                    });
                    continue;
                };
                handle_client_message(&state, &client, parsed).await;
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    state.connections.on_disconnect(&client);
    writer.abort();
}

async fn handle_client_message(state: &AppState, client: &ClientHandle, msg: ClientMessage) {
    match msg {
        ClientMessage::Auth { token, id } => {
            let result = state.connections.authenticate(client, &token);
            client.send(HubMessage::AuthResult {
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
                id,
            });
        }
        _ if !client.authenticated.load(std::sync::atomic::Ordering::SeqCst) => {
            client.send(HubMessage::Error {
                message: "not authenticated".into(),
                code: Some("auth".into()),
                id: None,
            });
        }
        ClientMessage::SubscribeAgent { agent_id, .. } => {
            state.connections.subscribe(client, &agent_id);
        }
        ClientMessage::UnsubscribeAgent { agent_id, .. } => {
            state.connections.unsubscribe(client, &agent_id);
        }
        ClientMessage::SendMessage { agent_id, message, id } => {
            if let Err(e) = state.connections.send_message(&agent_id, message) {
                client.send(HubMessage::Error {
                    message: e.to_string(),
                    code: None,
                    id,
                });
            }
        }
        ClientMessage::AgentAction { agent_id, action, id } => {
            apply_agent_action(state, &agent_id, action);
            let _ = id;
        }
        ClientMessage::PersistAgent { agent_id, id } => {
            let result = state.connections.persist_agent(&agent_id).await;
            client.send(HubMessage::PersistResult {
                hub_agent_id: agent_id,
                success: result.is_ok(),
                id,
            });
        }
        ClientMessage::RestoreAgent { agent_id, id } => match state.connections.restore_agent(client, &agent_id).await {
            Ok(snapshot) => client.send(HubMessage::RestoreSession {
                hub_agent_id: agent_id,
                config: snapshot.config,
                messages: snapshot.conversation,
                id,
            }),
            Err(e) => client.send(HubMessage::Error {
                message: e.to_string(),
                code: None,
                id,
            }),
        },
        ClientMessage::ListHubAgents { id } => match state.store.list().await {
            Ok(agents) => client.send(HubMessage::HubAgentsList { agents, id }),
            Err(e) => client.send(HubMessage::Error {
                message: e.to_string(),
                code: None,
                id,
            }),
        },
        ClientMessage::StateWriteThrough { agent_id, key, value, action, id } => {
            if let Err(e) = state.connections.write_through_state(client, &agent_id, &key, value, action).await {
                client.send(HubMessage::Error {
                    message: e.to_string(),
                    code: None,
                    id,
                });
            }
        }
        ClientMessage::DomStateUpdate { agent_id, dom, .. } => {
            let _ = state.connections.dom_state_update(client, &agent_id, dom);
        }
        ClientMessage::FileWriteThrough { agent_id, path, content, .. } => {
            let _ = state.connections.write_through_file(client, &agent_id, &path, &content).await;
        }
        ClientMessage::PushSubscribe { device_id, endpoint, p256dh, auth, id } => {
            state.connections.push_subscribe(
                client,
                &device_id,
                SubscriptionDescriptor { endpoint, p256dh, auth },
            );
            client.send(HubMessage::PushSubscribeResult { success: true, id });
        }
        ClientMessage::PushVerifyPin { endpoint, pin, id } => {
            let success = state.connections.push_verify_pin(&endpoint, &pin);
            client.send(HubMessage::PushVerifyResult { success, id });
        }
        ClientMessage::PushUnsubscribe { endpoint, .. } => {
            state.connections.push_unsubscribe(&endpoint);
        }
        ClientMessage::VisibilityState { device_id, visible, .. } => {
            state.connections.visibility_state(client, &device_id, visible);
        }
        ClientMessage::BrowserToolResult { request_id, result, error } => {
            let outcome = match (result, error) {
                (Some(value), _) => Ok(value),
                (None, Some(err)) => Err(err),
                (None, None) => Err("empty browser tool result".to_string()),
            };
            super::complete_browser_request(&request_id, outcome);
        }
        ClientMessage::Intervene { agent_id, mode, id } => {
            let success = state.connections.intervene(client, &agent_id, mode);
            client.send(HubMessage::InterveneResult {
                success,
                reason: (!success).then(|| "agent is already under intervention".to_string()),
                id,
            });
        }
        ClientMessage::EndIntervene { agent_id, .. } => {
            state.connections.end_intervene(&client.id, &agent_id);
        }
    }
}

fn apply_agent_action(state: &AppState, agent_id: &str, action: AgentActionKind) {
    let Some(runner) = state.registry.get(agent_id) else {
        return;
    };
    match action {
        AgentActionKind::Pause => runner.pause(),
        AgentActionKind::Resume => runner.resume(),
        AgentActionKind::Stop => runner.stop(),
        AgentActionKind::Kill => runner.kill(),
        AgentActionKind::Remove => {
            runner.kill();
            state.registry.remove(agent_id);
        }
    }
}

async fn handle_admin_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    // The shared `ClientHandle` carries a `HubMessage` sink built for the
    // client channel; the admin channel never uses it and replies over its
    // own `AdminHubMessage` channel instead.
    let (client, _unused_outbound_rx) = state.connections.register_client(None);

    let (reply_tx, mut reply_rx) = tokio::sync::mpsc::channel::<AdminHubMessage>(64);

    let writer = tokio::spawn(async move {
        while let Some(msg) = reply_rx.recv().await {
            if send_admin_message(&mut ws_sink, &msg).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            WsMessage::Text(text) => {
                let Ok(parsed) = serde_json::from_str::<AdminMessage>(&text) else {
                    let _ = reply_tx
                        .send(AdminHubMessage::Error { message: "unparseable message".into(), id: None })
                        .await;
                    continue;
                };
                if let Some(reply) = handle_admin_message(&state, &client, parsed).await {
                    let _ = reply_tx.send(reply).await;
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    state.connections.on_disconnect(&client);
    writer.abort();
}

async fn handle_admin_message(state: &AppState, client: &ClientHandle, msg: AdminMessage) -> Option<AdminHubMessage> {
    if let AdminMessage::AdminAuth { token, id } = &msg {
        let result = state.connections.authenticate_admin(client, token);
        return Some(AdminHubMessage::AuthResult { success: result.is_ok(), id: id.clone() });
    }
    if !client.authenticated.load(std::sync::atomic::Ordering::SeqCst) {
        return Some(AdminHubMessage::Error { message: "not authenticated".into(), id: None });
    }
    match msg {
        AdminMessage::AdminAuth { .. } => unreachable!("handled above"),
        AdminMessage::ListAgents { id } => match state.store.list().await {
            Ok(agents) => Some(AdminHubMessage::AgentsList { agents, id }),
            Err(e) => Some(AdminHubMessage::Error { message: e.to_string(), id }),
        },
        AdminMessage::InspectAgent { agent_id, id } => match state.registry.get(&agent_id) {
            Some(runner) => Some(AdminHubMessage::AgentInfo {
                agent_id: agent_id.clone(),
                state: runner_state_name(runner.state()),
                is_busy: runner.is_busy(),
                id,
            }),
            None => Some(AdminHubMessage::Error { message: "unknown agent".into(), id }),
        },
        AdminMessage::PauseAgent { agent_id, id } => {
            if let Some(runner) = state.registry.get(&agent_id) {
                runner.pause();
            }
            Some(AdminHubMessage::Ok { id })
        }
        AdminMessage::StopAgent { agent_id, id } => {
            if let Some(runner) = state.registry.get(&agent_id) {
                runner.stop();
            }
            Some(AdminHubMessage::Ok { id })
        }
        AdminMessage::KillAgent { agent_id, id } => {
            if let Some(runner) = state.registry.get(&agent_id) {
                runner.kill();
            }
            Some(AdminHubMessage::Ok { id })
        }
        AdminMessage::RemoveAgent { agent_id, id } => {
            if let Some(runner) = state.registry.get(&agent_id) {
                runner.kill();
            }
            state.registry.remove(&agent_id);
            Some(AdminHubMessage::Ok { id })
        }
        AdminMessage::ListConnections { id } => Some(AdminHubMessage::ConnectionsList {
            connections: state.connections.client_ids(),
            id,
        }),
        AdminMessage::Disconnect { connection_id, id } => {
            state.connections.remove_client(&connection_id);
            Some(AdminHubMessage::Ok { id })
        }
        AdminMessage::GetConfig { id } => Some(AdminHubMessage::Config {
            config: serde_json::to_value(state.config.as_ref()).unwrap_or(serde_json::Value::Null),
            id,
        }),
        AdminMessage::ReloadConfig { id } => {
            // Hot-reloading the on-disk config is out of scope for this
            // channel (§1 configuration mechanics); acknowledge without
            // effect so operators get a deterministic reply.
            Some(AdminHubMessage::ConfigReloaded { success: false, id })
        }
        AdminMessage::SubscribeLogs { id } => {
            Some(AdminHubMessage::Ok { id })
        }
        AdminMessage::GetStats { id } => Some(AdminHubMessage::Stats {
            agent_count: state.registry.len(),
            connection_count: state.connections.client_ids().len(),
            id,
        }),
        AdminMessage::GetUsage { agent_id, id } => match state.registry.get(&agent_id) {
            Some(runner) => {
                let usage = runner.usage();
                Some(AdminHubMessage::Usage {
                    agent_id,
                    total_tokens: usage.total_tokens,
                    total_cost_usd: usage.total_cost,
                    id,
                })
            }
            None => Some(AdminHubMessage::Error { message: "unknown agent".into(), id }),
        },
        AdminMessage::GetAgentSchedules { agent_id, id } => Some(AdminHubMessage::AgentSchedules {
            schedules: state.scheduler.get_schedules(&agent_id),
            agent_id,
            id,
        }),
        AdminMessage::GetAgentLog { agent_id, id } => match state.registry.get(&agent_id) {
            Some(runner) => Some(AdminHubMessage::AgentLog {
                agent_id,
                messages: runner.message_history(),
                id,
            }),
            None => Some(AdminHubMessage::Error { message: "unknown agent".into(), id }),
        },
        AdminMessage::GetAgentDom { agent_id, id } => match state.registry.get(&agent_id) {
            Some(runner) => Some(AdminHubMessage::AgentDom {
                agent_id,
                dom: runner.dom_mirror(),
                id,
            }),
            None => Some(AdminHubMessage::Error { message: "unknown agent".into(), id }),
        },
        AdminMessage::Nuke { id } => {
            for agent_id in state.registry.list_ids() {
                if let Some(runner) = state.registry.get(&agent_id) {
                    runner.kill();
                }
                state.registry.remove(&agent_id);
            }
            Some(AdminHubMessage::Ok { id })
        }
    }
}
