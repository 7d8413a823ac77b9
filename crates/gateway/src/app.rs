//! Shared application state passed to every WebSocket handler, adapted
//! from the teacher's `state.rs`: one `Arc`-wrapped field per owned
//! service, cloned cheaply into each connection task.

use std::collections::HashSet;
use std::sync::Arc;

use hub_domain::config::Config;

use crate::browser::BrowserPool;
use crate::connection::ConnectionManager;
use crate::pipeline::ToolPipeline;
use crate::push::PushRegistry;
use crate::registry::AgentRegistry;
use crate::runjs::RunJsSandbox;
use crate::scheduler::Scheduler;
use crate::store::AgentStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<AgentRegistry>,
    pub store: Arc<AgentStore>,
    pub scheduler: Arc<Scheduler>,
    pub skills: Arc<hub_skills::SkillsRegistry>,
    pub providers: Arc<hub_providers::ProviderRegistry>,
    pub browser: Option<Arc<BrowserPool>>,
    pub runjs: Arc<RunJsSandbox>,
    pub pipeline: Arc<ToolPipeline>,
    pub connections: Arc<ConnectionManager>,
    pub push: Arc<PushRegistry>,
    pub push_sink: Arc<dyn crate::push::PushSink>,
}

/// Tool names routed through a subscribed client rather than dispatched
/// locally (spec §4.3 "browser-routed tools"): when no local `BrowserPool`
/// driver is configured, `browse` itself is routed out to whichever client
/// happens to be attached.
pub fn browser_routed_tool_names(browser_configured: bool) -> HashSet<String> {
    let mut names = HashSet::new();
    if !browser_configured {
        names.insert("browse".to_string());
    }
    names
}

impl AppState {
    pub fn new(
        config: Config,
        registry: Arc<AgentRegistry>,
        store: Arc<AgentStore>,
        scheduler: Arc<Scheduler>,
        skills: Arc<hub_skills::SkillsRegistry>,
        providers: Arc<hub_providers::ProviderRegistry>,
        browser: Option<Arc<BrowserPool>>,
        runjs: Arc<RunJsSandbox>,
        push: Arc<PushRegistry>,
        push_sink: Arc<dyn crate::push::PushSink>,
        auth_token: String,
        admin_token: String,
    ) -> Self {
        let config = Arc::new(config);

        let pipeline = Arc::new(ToolPipeline::new(crate::pipeline::ToolPipelineDeps {
            registry: registry.clone(),
            scheduler: scheduler.clone(),
            store: store.clone(),
            skills: skills.clone(),
            browser: browser.clone(),
            runjs: runjs.clone(),
            config: config.tools.clone(),
            sandbox_root: config.workspace.sandbox_path.clone(),
            browser_routed_tool_names: browser_routed_tool_names(browser.is_none()),
        }));

        let connections = Arc::new(ConnectionManager::new(
            registry.clone(),
            store.clone(),
            scheduler.clone(),
            push.clone(),
            providers.clone(),
            config.failed_auth,
            config.intervention.inactivity_timeout_minutes,
            auth_token,
            admin_token,
            config.server.localhost_bypass_auth,
        ));

        pipeline.set_browser_routed_dispatcher(connections.clone());
        connections.set_tool_executor(pipeline.clone());

        Self {
            config,
            registry,
            store,
            scheduler,
            skills,
            providers,
            browser,
            runjs,
            pipeline,
            connections,
            push,
            push_sink,
        }
    }
}
