//! The Scheduler: cron + event-trigger wake-ups for agents (spec §4.2).

pub mod condition;
pub mod cron;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hub_domain::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use self::condition::Condition;
use self::cron::{minute_key, CronSchedule};
use crate::registry::AgentRegistry;

pub use condition::Condition as TriggerCondition;

const MAX_SCHEDULES_PER_AGENT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Cron,
    Event,
}

/// A schedule entry's action: exactly one of `message` or `tool` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleAction {
    Message { message: String },
    Tool { tool: String, tool_input: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub id: u64,
    pub hub_agent_id: String,
    pub kind: ScheduleKind,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(default)]
    pub event_condition: Option<String>,
    pub action: ScheduleAction,
    pub enabled: bool,
    #[serde(default)]
    pub max_runs: Option<u64>,
    #[serde(default)]
    pub run_count: u64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
}

pub struct NewSchedule {
    pub hub_agent_id: String,
    pub kind: ScheduleKind,
    pub cron_expression: Option<String>,
    pub event_name: Option<String>,
    pub event_condition: Option<String>,
    pub action: ScheduleAction,
    pub max_runs: Option<u64>,
    pub enabled: bool,
}

struct CompiledEntry {
    entry: ScheduleEntry,
    cron: Option<CronSchedule>,
    condition: Option<Condition>,
}

/// What a tick/fireEvent decided to do with a triggered entry, returned so
/// the caller (ConnectionManager wiring, in production; tests here) can
/// drive the actual runner/tool dispatch without the Scheduler depending on
/// AgentRunner directly (§9 "Cyclic references").
#[derive(Debug, Clone)]
pub enum TriggerDispatch {
    SendMessage { agent_id: String, message: String },
    ExecuteTool { agent_id: String, tool: String, tool_input: Value },
}

pub struct Scheduler {
    entries: Mutex<Vec<CompiledEntry>>,
    next_id: AtomicU64,
    last_minute_key: Mutex<Option<i64>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            last_minute_key: Mutex::new(None),
        }
    }

    pub fn add_schedule(&self, new: NewSchedule) -> Result<u64> {
        match (&new.cron_expression, &new.event_name) {
            (Some(_), None) if new.kind == ScheduleKind::Cron => {}
            (None, Some(_)) if new.kind == ScheduleKind::Event => {}
            _ => {
                return Err(Error::validation(
                    "exactly one of cronExpression/eventName must be set, matching `kind`",
                ))
            }
        }

        let count = self
            .entries
            .lock()
            .iter()
            .filter(|e| e.entry.hub_agent_id == new.hub_agent_id)
            .count();
        if count >= MAX_SCHEDULES_PER_AGENT {
            return Err(Error::validation(format!(
                "agent {} already has the maximum of {MAX_SCHEDULES_PER_AGENT} schedules",
                new.hub_agent_id
            )));
        }

        let cron = new
            .cron_expression
            .as_deref()
            .map(CronSchedule::parse)
            .transpose()?;
        let condition = new
            .event_condition
            .as_deref()
            .map(Condition::parse)
            .transpose()
            .map_err(Error::validation)?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let entry = ScheduleEntry {
            id,
            hub_agent_id: new.hub_agent_id,
            kind: new.kind,
            cron_expression: new.cron_expression,
            event_name: new.event_name,
            event_condition: new.event_condition,
            action: new.action,
            enabled: new.enabled,
            max_runs: new.max_runs,
            run_count: 0,
            created_at: Utc::now(),
            last_run_at: None,
        };
        self.entries.lock().push(CompiledEntry { entry, cron, condition });
        Ok(id)
    }

    pub fn remove_schedule(&self, agent_id: &str, id: u64) {
        self.entries
            .lock()
            .retain(|e| !(e.entry.hub_agent_id == agent_id && e.entry.id == id));
    }

    pub fn remove_all_for_agent(&self, agent_id: &str) {
        self.entries.lock().retain(|e| e.entry.hub_agent_id != agent_id);
    }

    pub fn set_enabled(&self, agent_id: &str, id: u64, enabled: bool) {
        if let Some(e) = self
            .entries
            .lock()
            .iter_mut()
            .find(|e| e.entry.hub_agent_id == agent_id && e.entry.id == id)
        {
            e.entry.enabled = enabled;
        }
    }

    pub fn get_schedules(&self, agent_id: &str) -> Vec<ScheduleEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.entry.hub_agent_id == agent_id)
            .map(|e| e.entry.clone())
            .collect()
    }

    pub fn serialize(&self) -> Vec<ScheduleEntry> {
        self.entries.lock().iter().map(|e| e.entry.clone()).collect()
    }

    /// Restore a previously serialized entry set; `next_id` is reconstructed
    /// as `max(id) + 1` (spec §4.2 Persistence).
    pub fn restore(&self, entries: Vec<ScheduleEntry>) -> Result<()> {
        let mut compiled = Vec::with_capacity(entries.len());
        let mut max_id = 0u64;
        for entry in entries {
            max_id = max_id.max(entry.id);
            let cron = entry
                .cron_expression
                .as_deref()
                .map(CronSchedule::parse)
                .transpose()?;
            let condition = entry
                .event_condition
                .as_deref()
                .map(Condition::parse)
                .transpose()
                .map_err(Error::validation)?;
            compiled.push(CompiledEntry { entry, cron, condition });
        }
        *self.entries.lock() = compiled;
        self.next_id.store(max_id + 1, Ordering::SeqCst);
        Ok(())
    }

    /// One scheduler tick: dedups by minute key, then evaluates every
    /// enabled cron entry against `now`, consulting `registry` for runner
    /// state (spec §4.2 "Tick discipline").
    pub fn tick(&self, now: DateTime<Utc>, registry: &AgentRegistry) -> Vec<TriggerDispatch> {
        let key = minute_key(now);
        {
            let mut last = self.last_minute_key.lock();
            if *last == Some(key) {
                return Vec::new();
            }
            *last = Some(key);
        }

        let mut dispatches = Vec::new();
        let mut entries = self.entries.lock();
        for compiled in entries.iter_mut() {
            if !compiled.entry.enabled || compiled.entry.kind != ScheduleKind::Cron {
                continue;
            }
            let Some(cron) = &compiled.cron else { continue };
            if !cron.matches(now) {
                continue;
            }
            if let Some(dispatch) = fire_entry(compiled, registry, now) {
                dispatches.push(dispatch);
            }
        }
        dispatches
    }

    /// Evaluate event-type entries matching `(agent_id, event_name)` against
    /// `data` (spec §4.2 "Event triggers"). One entry's failure to resolve a
    /// dispatch never prevents others from being evaluated (§4.2 "Event
    /// bus").
    pub fn fire_event(
        &self,
        event_name: &str,
        agent_id: &str,
        data: &Value,
        registry: &AgentRegistry,
    ) -> Vec<TriggerDispatch> {
        let mut dispatches = Vec::new();
        let mut entries = self.entries.lock();
        for compiled in entries.iter_mut() {
            if !compiled.entry.enabled || compiled.entry.kind != ScheduleKind::Event {
                continue;
            }
            if compiled.entry.hub_agent_id != agent_id {
                continue;
            }
            if compiled.entry.event_name.as_deref() != Some(event_name) {
                continue;
            }
            let matched = match &compiled.condition {
                Some(cond) => cond.evaluate(data, None),
                None => true,
            };
            if !matched {
                continue;
            }
            if let Some(dispatch) = fire_entry(compiled, registry, Utc::now()) {
                dispatches.push(dispatch);
            }
        }
        dispatches
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared trigger-action logic for both cron ticks and event firing (spec
/// §4.2 "Trigger action"). A `paused` runner is treated as not-`running` for
/// both kinds and is skipped without advancing counters.
fn fire_entry(
    compiled: &mut CompiledEntry,
    registry: &AgentRegistry,
    now: DateTime<Utc>,
) -> Option<TriggerDispatch> {
    let state = registry.runner_state(&compiled.entry.hub_agent_id)?;
    if state != hub_domain::agent::RunnerState::Running {
        return None;
    }

    match &compiled.entry.action {
        ScheduleAction::Tool { tool, tool_input } => {
            advance_counters(compiled, now);
            Some(TriggerDispatch::ExecuteTool {
                agent_id: compiled.entry.hub_agent_id.clone(),
                tool: tool.clone(),
                tool_input: tool_input.clone(),
            })
        }
        ScheduleAction::Message { message } => {
            if registry.is_busy(&compiled.entry.hub_agent_id).unwrap_or(true) {
                return None;
            }
            advance_counters(compiled, now);
            Some(TriggerDispatch::SendMessage {
                agent_id: compiled.entry.hub_agent_id.clone(),
                message: message.clone(),
            })
        }
    }
}

fn advance_counters(compiled: &mut CompiledEntry, now: DateTime<Utc>) {
    compiled.entry.run_count += 1;
    compiled.entry.last_run_at = Some(now);
    if let Some(max) = compiled.entry.max_runs {
        if compiled.entry.run_count >= max {
            compiled.entry.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_message_schedule(agent_id: &str, cron: &str) -> NewSchedule {
        NewSchedule {
            hub_agent_id: agent_id.into(),
            kind: ScheduleKind::Cron,
            cron_expression: Some(cron.into()),
            event_name: None,
            event_condition: None,
            action: ScheduleAction::Message { message: "ping".into() },
            max_runs: None,
            enabled: true,
        }
    }

    #[test]
    fn add_schedule_rejects_mismatched_kind() {
        let scheduler = Scheduler::new();
        let mut bad = new_message_schedule("a1", "* * * * *");
        bad.kind = ScheduleKind::Event;
        assert!(scheduler.add_schedule(bad).is_err());
    }

    #[test]
    fn add_schedule_enforces_per_agent_cap() {
        let scheduler = Scheduler::new();
        for _ in 0..MAX_SCHEDULES_PER_AGENT {
            scheduler.add_schedule(new_message_schedule("a1", "* * * * *")).unwrap();
        }
        assert!(scheduler.add_schedule(new_message_schedule("a1", "* * * * *")).is_err());
    }

    #[test]
    fn serialize_then_restore_preserves_next_id() {
        let scheduler = Scheduler::new();
        let id1 = scheduler.add_schedule(new_message_schedule("a1", "* * * * *")).unwrap();
        let entries = scheduler.serialize();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id1);

        let restored = Scheduler::new();
        restored.restore(entries).unwrap();
        let id2 = restored.add_schedule(new_message_schedule("a1", "* * * * *")).unwrap();
        assert_eq!(id2, id1 + 1);
    }

    #[test]
    fn remove_all_for_agent_clears_only_that_agent() {
        let scheduler = Scheduler::new();
        scheduler.add_schedule(new_message_schedule("a1", "* * * * *")).unwrap();
        scheduler.add_schedule(new_message_schedule("a2", "* * * * *")).unwrap();
        scheduler.remove_all_for_agent("a1");
        assert!(scheduler.get_schedules("a1").is_empty());
        assert_eq!(scheduler.get_schedules("a2").len(), 1);
    }
}
