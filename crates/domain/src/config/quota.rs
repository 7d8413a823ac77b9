use serde::{Deserialize, Serialize};

fn d_max_keys() -> usize {
    1000
}
fn d_max_value_bytes() -> usize {
    1_048_576
}
fn d_max_total_bytes() -> usize {
    10_485_760
}

/// StateStore/StorageStore quotas (spec §3, §8 boundary cases).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreQuotaConfig {
    #[serde(default = "d_max_keys")]
    pub max_keys: usize,
    #[serde(default = "d_max_value_bytes")]
    pub max_value_bytes: usize,
    #[serde(default = "d_max_total_bytes")]
    pub max_total_bytes: usize,
}

impl Default for StoreQuotaConfig {
    fn default() -> Self {
        Self {
            max_keys: d_max_keys(),
            max_value_bytes: d_max_value_bytes(),
            max_total_bytes: d_max_total_bytes(),
        }
    }
}
