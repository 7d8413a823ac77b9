use serde::{Deserialize, Serialize};

fn d_max_attempts() -> u32 {
    5
}
fn d_lockout_minutes() -> u64 {
    15
}
fn d_sweep_interval_minutes() -> u64 {
    5
}
fn d_table_capacity() -> usize {
    10_000
}

/// Failed-auth rate limiting (spec §4.4, §8 invariant, §9 "failed-auth
/// table" semantic container: TTL entries, bounded capacity, LRU eviction
/// restricted to non-locked entries).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FailedAuthConfig {
    #[serde(default = "d_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "d_lockout_minutes")]
    pub lockout_minutes: u64,
    #[serde(default = "d_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,
    #[serde(default = "d_table_capacity")]
    pub table_capacity: usize,
}

impl Default for FailedAuthConfig {
    fn default() -> Self {
        Self {
            max_attempts: d_max_attempts(),
            lockout_minutes: d_lockout_minutes(),
            sweep_interval_minutes: d_sweep_interval_minutes(),
            table_capacity: d_table_capacity(),
        }
    }
}

fn d_intervention_timeout_minutes() -> u64 {
    10
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct InterventionConfig {
    #[serde(default = "d_intervention_timeout_minutes")]
    pub inactivity_timeout_minutes: u64,
}

impl Default for InterventionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_minutes: d_intervention_timeout_minutes(),
        }
    }
}

fn d_llm_timeout_ms() -> u64 {
    120_000
}
fn d_tool_timeout_ms() -> u64 {
    30_000
}

/// Cross-cutting timeouts named in §5.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutsConfig {
    #[serde(default = "d_llm_timeout_ms")]
    pub llm_request_ms: u64,
    #[serde(default = "d_tool_timeout_ms")]
    pub tool_subprocess_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            llm_request_ms: d_llm_timeout_ms(),
            tool_subprocess_ms: d_tool_timeout_ms(),
        }
    }
}
