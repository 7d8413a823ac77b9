mod app;
mod browser;
mod cancel;
mod cli;
mod connection;
mod pipeline;
mod push;
mod registry;
mod runjs;
mod runner;
mod scheduler;
mod store;

use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use hub_domain::config::{Config, ConfigSeverity};
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::app::AppState;
use crate::browser::BrowserPool;
use crate::cli::{Cli, Command, ConfigCommand};
use crate::connection::ws::{admin_ws, client_ws};
use crate::push::{NullPushSink, PushRegistry};
use crate::registry::AgentRegistry;
use crate::runjs::RunJsSandbox;
use crate::scheduler::Scheduler;
use crate::store::AgentStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            let (config, _path) = cli::load_config()?;
            init_tracing(&config);
            match run_server(config).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    // Config validation (exit 2) and bind failures (exit 3,
                    // spec §6) exit directly from run_server; anything that
                    // bubbles up here is a generic error (exit 1).
                    tracing::error!(error = %e, "hub exited with error");
                    std::process::exit(1);
                }
            }
        }
        Some(Command::Doctor) => {
            let (config, path) = cli::load_config()?;
            if !cli::run_doctor(&config, &path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, path) = cli::load_config()?;
            if !cli::print_validation(&config, &path) {
                std::process::exit(2);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _path) = cli::load_config()?;
            cli::show_config(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("hubd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn log_filter(config: &Config) -> EnvFilter {
    std::env::var("HUB_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new(format!("info,hub_gateway={}", config.observability.log_level)))
}

/// Structured JSON tracing, filterable via `RUST_LOG`/`HUB_LOG`, with an
/// optional OTLP exporter layered in when `observability.otlp_endpoint` is
/// set (spec §1A). Degrades to pure local logging when unset.
fn init_tracing(config: &Config) {
    let fmt_layer = tracing_subscriber::fmt::layer().json().with_filter(log_filter(config));
    let registry = tracing_subscriber::registry().with(fmt_layer);

    let Some(endpoint) = config.observability.otlp_endpoint.clone() else {
        registry.init();
        return;
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint.clone())
        .build();
    let exporter = match exporter {
        Ok(exporter) => exporter,
        Err(e) => {
            registry.init();
            tracing::warn!(endpoint = %endpoint, error = %e, "failed to build OTLP exporter, continuing with local logging only");
            return;
        }
    };

    use opentelemetry::trace::TracerProvider as _;
    let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .build();
    let tracer = provider.tracer("hub-gateway");
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer).with_filter(log_filter(config));
    registry.with(otel_layer).init();
}

/// Assemble every service, restore persisted agents, start background
/// sweep tasks, and serve both the public and admin WebSocket listeners
/// (spec §2 dependency order: leaves first, daemon last).
async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!(name = %config.server.name, "hub starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        tracing::error!("config validation failed, refusing to start");
        std::process::exit(2);
    }

    std::fs::create_dir_all(&config.workspace.sandbox_path)
        .context("creating workspace.sandbox_path")?;
    std::fs::create_dir_all(&config.workspace.agent_store_path)
        .context("creating workspace.agent_store_path")?;

    let registry = Arc::new(AgentRegistry::new());
    let store = Arc::new(AgentStore::new(config.workspace.agent_store_path.clone()));
    let scheduler = Arc::new(Scheduler::new());
    let cancel_map = Arc::new(cancel::CancelMap::new());

    let skills_root = std::env::var("HUB_SKILLS_PATH").unwrap_or_else(|_| "./skills".into());
    let skills = Arc::new(
        hub_skills::SkillsRegistry::load(std::path::Path::new(&skills_root))
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, path = %skills_root, "failed to load skills, starting with none");
                hub_skills::SkillsRegistry::empty()
            }),
    );

    // No concrete LlmProvider adapters ship with this crate (§1 Non-goal:
    // "reimplementing provider adapters for each LLM vendor") — an embedder
    // registers them before agents can run turns.
    let providers = Arc::new(hub_providers::ProviderRegistry::new());
    if providers.is_empty() {
        tracing::warn!("no LLM providers registered — send_message will fail until an embedder registers one");
    }

    // No concrete BrowserDriver ships either; `browse` calls route to a
    // subscribed client instead (app::browser_routed_tool_names).
    let browser: Option<Arc<BrowserPool>> = None;
    if config.tools.browse.enabled {
        tracing::info!("browse tool enabled with no local driver configured — routed through subscribed clients");
    }

    let runjs = Arc::new(RunJsSandbox::new(std::time::Duration::from_millis(
        config.timeouts.tool_subprocess_ms,
    )));

    let push = Arc::new(PushRegistry::new(config.push.pin_ttl_minutes));
    let push_sink: Arc<dyn crate::push::PushSink> = Arc::new(NullPushSink);
    if config.push.enabled {
        tracing::info!("push enabled with no delivery transport configured — notifications are recorded but never sent");
    }

    let auth_token = std::env::var(&config.server.auth_token_env).unwrap_or_default();
    if auth_token.is_empty() {
        tracing::warn!(env_var = %config.server.auth_token_env, "client bearer-token auth DISABLED — set it to enable");
    } else {
        tracing::info!(env_var = %config.server.auth_token_env, "client bearer-token auth enabled");
    }
    let admin_token = std::env::var(&config.server.admin_token_env).unwrap_or_default();
    if admin_token.is_empty() {
        tracing::warn!(env_var = %config.server.admin_token_env, "admin bearer-token auth DISABLED — admin endpoints reject every request until it is set");
    } else {
        tracing::info!(env_var = %config.server.admin_token_env, "admin bearer-token auth enabled");
    }

    let state = AppState::new(
        config.clone(),
        registry.clone(),
        store.clone(),
        scheduler.clone(),
        skills,
        providers,
        browser,
        runjs,
        push,
        push_sink.clone(),
        auth_token,
        admin_token,
    );

    restore_agents(&state, &cancel_map).await?;

    spawn_scheduler_ticker(state.clone());
    spawn_sweep_task(state.clone());
    spawn_browser_sweep_task(state.clone());

    let public_app = Router::new()
        .route("/v1/ws", get(client_ws))
        .with_state(state.clone());

    let public_addr = format!("{}:{}", config.server.host, config.server.port);
    let public_listener = match tokio::net::TcpListener::bind(&public_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %public_addr, error = %e, "failed to bind public listener");
            std::process::exit(3);
        }
    };
    tracing::info!(addr = %public_addr, "public listener bound");

    let admin_serve = if let Some(admin_port) = config.server.admin_port {
        let admin_app = Router::new()
            .route("/v1/admin/ws", get(admin_ws))
            .with_state(state.clone());
        let admin_addr = format!("{}:{}", config.server.host, admin_port);
        let admin_listener = match tokio::net::TcpListener::bind(&admin_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!(addr = %admin_addr, error = %e, "failed to bind admin listener");
                std::process::exit(3);
            }
        };
        tracing::info!(addr = %admin_addr, "admin listener bound");
        Some((admin_listener, admin_app))
    } else {
        tracing::info!("server.admin_port unset — admin listener disabled");
        None
    };

    let public_server = axum::serve(
        public_listener,
        public_app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    );

    match admin_serve {
        Some((admin_listener, admin_app)) => {
            let admin_server = axum::serve(
                admin_listener,
                admin_app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
            );
            tokio::try_join!(
                async { public_server.await.context("public listener error") },
                async { admin_server.await.context("admin listener error") },
            )?;
        }
        None => {
            public_server.await.context("public listener error")?;
        }
    }

    Ok(())
}

/// Rehydrate every persisted agent at startup (spec §4.6), wiring each
/// restored Runner into the registry and its event stream into the
/// connection fanout, and merging its schedules into the Scheduler.
async fn restore_agents(state: &AppState, cancel_map: &Arc<cancel::CancelMap>) -> anyhow::Result<()> {
    let ids = state.store.list().await.context("listing persisted agents")?;
    let mut all_schedules = Vec::new();
    for agent_id in ids {
        let snapshot = match state.store.load(&agent_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(agent_id = %agent_id, error = %e, "failed to load persisted agent, skipping");
                continue;
            }
        };
        all_schedules.extend(snapshot.schedules.clone());
        let cancel = cancel_map.register(&agent_id);
        let runner = Arc::new(runner::AgentRunner::from_snapshot(snapshot, cancel));
        state.registry.insert(runner.clone());
        state.connections.watch_runner(runner, state.push_sink.clone());
        tracing::info!(agent_id = %agent_id, "restored agent");
    }
    if let Err(e) = state.scheduler.restore(all_schedules) {
        tracing::warn!(error = %e, "failed to restore schedules, starting with none");
    }
    Ok(())
}

/// Ticks the Scheduler at its configured interval and applies every
/// resulting dispatch (spec §4.2 "Tick discipline").
fn spawn_scheduler_ticker(state: AppState) {
    let interval_ms = state.config.scheduler.tick_interval_ms;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;
            let dispatches = state.scheduler.tick(chrono::Utc::now(), &state.registry);
            for dispatch in dispatches {
                state.connections.apply_trigger_dispatch(dispatch).await;
            }
        }
    });
}

/// Sweeps failed-auth lockouts, idle intervention sessions, and expired
/// pending push subscriptions on a fixed cadence (spec §4.4, §9).
fn spawn_sweep_task(state: AppState) {
    let interval_minutes = state.config.failed_auth.sweep_interval_minutes.max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_minutes * 60));
        loop {
            interval.tick().await;
            state.connections.sweep();
        }
    });
}

/// Closes browser sessions idle past their configured timeout (spec §4.5
/// "swept every minute").
fn spawn_browser_sweep_task(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            if let Some(browser) = &state.browser {
                let closed = browser.sweep_idle().await;
                if !closed.is_empty() {
                    tracing::info!(count = closed.len(), "closed idle browser sessions");
                }
            }
        }
    });
}
