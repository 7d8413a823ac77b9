use serde::{Deserialize, Serialize};

fn d_tick_interval_ms() -> u64 {
    30_000
}
fn d_max_schedules_per_agent() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(default = "d_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "d_max_schedules_per_agent")]
    pub max_schedules_per_agent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: d_tick_interval_ms(),
            max_schedules_per_agent: d_max_schedules_per_agent(),
        }
    }
}
