use serde::{Deserialize, Serialize};

fn d_log_level() -> String {
    "info".into()
}

/// Log formatting itself is out of scope (§1); this only carries what a
/// `tracing`/OTel init needs at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    #[serde(default = "d_log_level")]
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: d_log_level(),
            otlp_endpoint: None,
        }
    }
}
