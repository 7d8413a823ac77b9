use serde::{Deserialize, Serialize};

/// Push delivery transport itself is out of scope (§1); this is the
/// bookkeeping configuration the `PushSink` seam reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,
    pub vapid_email: Option<String>,
    /// How long an unverified PIN subscription survives before purge.
    #[serde(default = "d_pin_ttl_minutes")]
    pub pin_ttl_minutes: u64,
}

fn d_pin_ttl_minutes() -> u64 {
    5
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            vapid_email: None,
            pin_ttl_minutes: d_pin_ttl_minutes(),
        }
    }
}
