use serde::{Deserialize, Serialize};

fn d_true() -> bool {
    true
}
/// Default bash timeout, 30s per spec §4.3.
fn d_bash_timeout_ms() -> u64 {
    30_000
}
/// Maximum bash timeout a caller may request, 300s per spec §4.3.
fn d_bash_max_timeout_ms() -> u64 {
    300_000
}
fn d_browse_max_sessions() -> usize {
    4
}
fn d_browse_timeout_minutes() -> u64 {
    10
}
fn d_browser_routed_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub bash: BashConfig,
    pub filesystem: FilesystemConfig,
    pub browse: BrowseConfig,
    pub fetch_proxy: FetchProxyConfig,
    /// Timeout for a browser-routed tool call awaiting a client response.
    #[serde(default = "d_browser_routed_timeout_ms")]
    pub browser_routed_timeout_ms: u64,
    pub context_search: ContextSearchConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            bash: BashConfig::default(),
            filesystem: FilesystemConfig::default(),
            browse: BrowseConfig::default(),
            fetch_proxy: FetchProxyConfig::default(),
            browser_routed_timeout_ms: d_browser_routed_timeout_ms(),
            context_search: ContextSearchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BashMode {
    Restricted,
    Unrestricted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BashConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    pub mode: BashMode,
    /// Unprivileged user bash commands are dropped to, when set.
    pub run_as_user: Option<String>,
    #[serde(default = "d_bash_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "d_bash_max_timeout_ms")]
    pub max_timeout_ms: u64,
}

impl Default for BashConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: BashMode::Restricted,
            run_as_user: None,
            timeout_ms: d_bash_timeout_ms(),
            max_timeout_ms: d_bash_max_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesystemConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    pub allowed_paths: Vec<String>,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_paths: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowseConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_browse_max_sessions")]
    pub max_concurrent_sessions: usize,
    #[serde(default = "d_browse_timeout_minutes")]
    pub session_timeout_minutes: u64,
    pub viewport: Option<Viewport>,
}

impl Default for BrowseConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_sessions: d_browse_max_sessions(),
            session_timeout_minutes: d_browse_timeout_minutes(),
            viewport: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchProxyConfig {
    pub enabled: bool,
    pub allowed_patterns: Vec<String>,
    pub blocked_patterns: Vec<String>,
}

impl Default for FetchProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_patterns: vec![],
            blocked_patterns: vec![],
        }
    }
}

fn d_context_search_max_output() -> usize {
    32 * 1024
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextSearchConfig {
    #[serde(default = "d_context_search_max_output")]
    pub max_output_bytes: usize,
}

impl Default for ContextSearchConfig {
    fn default() -> Self {
        Self {
            max_output_bytes: d_context_search_max_output(),
        }
    }
}
