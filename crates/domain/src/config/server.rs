use serde::{Deserialize, Serialize};

fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_port() -> u16 {
    8787
}
fn d_name() -> String {
    "hub".into()
}
fn d_auth_token_env() -> String {
    "HUB_AUTH_TOKEN".into()
}
fn d_admin_token_env() -> String {
    "HUB_ADMIN_TOKEN".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    /// `None` disables the admin listener entirely.
    pub admin_port: Option<u16>,
    /// Env var holding the admin bearer token. If unset at startup, admin
    /// endpoints reject every request (no accidental open admin surface).
    pub admin_token_env: String,
    /// Env var holding the regular-client bearer token.
    pub auth_token_env: String,
    /// Loopback connections skip the token check entirely when true.
    pub localhost_bypass_auth: bool,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            name: d_name(),
            admin_port: None,
            admin_token_env: d_admin_token_env(),
            auth_token_env: d_auth_token_env(),
            localhost_bypass_auth: false,
            cors: CorsConfig::default(),
            rate_limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
}
