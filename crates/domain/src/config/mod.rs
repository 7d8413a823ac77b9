//! Layered hub configuration. File/env loading mechanics are out of scope
//! (§1) — this crate defines the typed shape and a startup `validate()`
//! pass; the caller is responsible for producing a `Config` value.

mod connection;
mod observability;
mod push;
mod quota;
mod scheduler;
mod server;
mod tools;
mod workspace;

pub use connection::{FailedAuthConfig, InterventionConfig, TimeoutsConfig};
pub use observability::ObservabilityConfig;
pub use push::PushConfig;
pub use quota::StoreQuotaConfig;
pub use scheduler::SchedulerConfig;
pub use server::{CorsConfig, RateLimitConfig, ServerConfig};
pub use tools::{
    BashConfig, BashMode, BrowseConfig, ContextSearchConfig, FetchProxyConfig, FilesystemConfig,
    ToolsConfig, Viewport,
};
pub use workspace::WorkspaceConfig;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub workspace: WorkspaceConfig,
    pub tools: ToolsConfig,
    pub scheduler: SchedulerConfig,
    pub quotas: StoreQuotaConfig,
    pub failed_auth: FailedAuthConfig,
    pub intervention: InterventionConfig,
    pub timeouts: TimeoutsConfig,
    pub push: PushConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Collects every problem rather than failing fast on the first one,
    /// so a single run of `hub config validate` surfaces the whole list.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "must be nonzero".into(),
            });
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "must not be empty".into(),
            });
        }
        if let Some(admin_port) = self.server.admin_port {
            if admin_port == self.server.port {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.admin_port".into(),
                    message: "must differ from server.port".into(),
                });
            }
        }

        if self.tools.bash.timeout_ms > self.tools.bash.max_timeout_ms {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "tools.bash.timeout_ms".into(),
                message: "exceeds tools.bash.max_timeout_ms".into(),
            });
        }
        if self.tools.bash.run_as_user.is_some()
            && self.tools.bash.mode == BashMode::Unrestricted
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "tools.bash.run_as_user".into(),
                message: "run_as_user is ignored while mode is unrestricted".into(),
            });
        }

        if self.tools.filesystem.enabled && self.tools.filesystem.allowed_paths.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "tools.filesystem.allowed_paths".into(),
                message: "filesystem tool enabled with no allowed paths — every read/write will be rejected".into(),
            });
        }

        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 || rl.burst_size == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit".into(),
                    message: "requests_per_second and burst_size must both be > 0".into(),
                });
            }
        }

        if self.server.cors.allowed_origins.iter().any(|o| o == "*")
            && self.server.cors.allowed_origins.len() > 1
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" combined with other origins; the wildcard subsumes them".into(),
            });
        }

        for pattern in self
            .tools
            .fetch_proxy
            .allowed_patterns
            .iter()
            .chain(self.tools.fetch_proxy.blocked_patterns.iter())
        {
            if regex::Regex::new(pattern).is_err() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "tools.fetch_proxy".into(),
                    message: format!("invalid regex pattern: {pattern}"),
                });
            }
        }

        if self.scheduler.max_schedules_per_agent == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "scheduler.max_schedules_per_agent".into(),
                message: "must allow at least one schedule per agent".into(),
            });
        }

        if self.push.enabled && self.push.vapid_email.is_none() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "push.vapid_email".into(),
                message: "push enabled without a contact email".into(),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_clean() {
        let config = Config::default();
        let errors = config.validate();
        assert!(
            errors.iter().all(|e| e.severity == ConfigSeverity::Warning),
            "default config should have no hard errors: {errors:?}"
        );
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut config = Config::default();
        config.server.port = 0;
        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| e.severity == ConfigSeverity::Error && e.field == "server.port"));
    }

    #[test]
    fn admin_port_colliding_with_server_port_is_an_error() {
        let mut config = Config::default();
        config.server.admin_port = Some(config.server.port);
        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| e.field == "server.admin_port" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn bash_timeout_exceeding_max_is_an_error() {
        let mut config = Config::default();
        config.tools.bash.timeout_ms = 999_999;
        config.tools.bash.max_timeout_ms = 300_000;
        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| e.field == "tools.bash.timeout_ms" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn invalid_fetch_proxy_regex_is_an_error() {
        let mut config = Config::default();
        config.tools.fetch_proxy.allowed_patterns.push("[".into());
        let errors = config.validate();
        assert!(errors
            .iter()
            .any(|e| e.field == "tools.fetch_proxy" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn toml_roundtrip_of_defaults() {
        let config = Config::default();
        let text = toml::to_string(&config).expect("serialize");
        let back: Config = toml::from_str(&text).expect("parse");
        assert_eq!(back.server.port, config.server.port);
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "must be nonzero".into(),
        };
        assert_eq!(err.to_string(), "[ERROR] server.port: must be nonzero");
    }
}
