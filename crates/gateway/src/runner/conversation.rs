//! StateStore/StorageStore (spec §3) and conversation compression (spec §8
//! round-trip property).

use std::collections::HashMap;

use hub_domain::config::StoreQuotaConfig;
use hub_domain::error::{Error, Result};
use hub_domain::tool::{ContentPart, Message, MessageContent};
use serde_json::Value;

use crate::scheduler::condition::Condition;

#[derive(Debug, Clone)]
pub struct EscalationRule {
    pub key: String,
    pub condition: Condition,
    pub message: Option<String>,
    pub event_name: Option<String>,
}

/// What firing an escalation rule produces: a message onto the runner's own
/// inbox, or an event handed to the Scheduler's event bus (spec §3).
#[derive(Debug, Clone)]
pub enum Escalation {
    InboxMessage(String),
    Event { name: String, data: Value },
}

/// A string→JSON map with optional escalation rules and quota enforcement
/// (spec §3 StateStore/StorageStore).
pub struct KvStore {
    entries: HashMap<String, Value>,
    rules: Vec<EscalationRule>,
    quotas: StoreQuotaConfig,
}

impl KvStore {
    pub fn new(quotas: StoreQuotaConfig) -> Self {
        Self {
            entries: HashMap::new(),
            rules: Vec::new(),
            quotas,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_all(&self) -> &HashMap<String, Value> {
        &self.entries
    }

    fn total_bytes(&self) -> usize {
        self.entries
            .values()
            .map(|v| serde_json::to_vec(v).map(|b| b.len()).unwrap_or(0))
            .sum()
    }

    /// Set `key` to `value`, enforcing quotas first (spec §3, §8 boundary
    /// cases). Returns any escalations that fired as a result.
    pub fn set(&mut self, key: &str, value: Value) -> Result<Vec<Escalation>> {
        let value_bytes = serde_json::to_vec(&value).map_err(Error::Json)?.len();
        if value_bytes > self.quotas.max_value_bytes {
            return Err(Error::validation(format!(
                "value for '{key}' is {value_bytes} bytes, exceeds max_value_bytes {}",
                self.quotas.max_value_bytes
            )));
        }

        let is_new_key = !self.entries.contains_key(key);
        if is_new_key && self.entries.len() + 1 > self.quotas.max_keys {
            return Err(Error::validation(format!(
                "store already holds the maximum of {} keys",
                self.quotas.max_keys
            )));
        }

        let previous_bytes = self
            .entries
            .get(key)
            .map(|v| serde_json::to_vec(v).map(|b| b.len()).unwrap_or(0))
            .unwrap_or(0);
        let projected_total = self.total_bytes() - previous_bytes + value_bytes;
        if projected_total > self.quotas.max_total_bytes {
            return Err(Error::validation(format!(
                "write would bring total store size to {projected_total} bytes, exceeds max_total_bytes {}",
                self.quotas.max_total_bytes
            )));
        }

        let previous = self.entries.get(key).cloned();
        self.entries.insert(key.to_string(), value.clone());

        let mut escalations = Vec::new();
        for rule in &self.rules {
            if rule.key != key {
                continue;
            }
            if rule.condition.evaluate(&value, previous.as_ref()) {
                if let Some(message) = &rule.message {
                    escalations.push(Escalation::InboxMessage(message.clone()));
                } else if let Some(event_name) = &rule.event_name {
                    escalations.push(Escalation::Event {
                        name: event_name.clone(),
                        data: value.clone(),
                    });
                }
            }
        }
        Ok(escalations)
    }

    pub fn delete(&mut self, key: &str) {
        self.entries.remove(key);
    }

    pub fn escalation_rules(&self) -> &[EscalationRule] {
        &self.rules
    }

    pub fn set_escalation_rule(&mut self, rule: EscalationRule) {
        self.rules.retain(|r| r.key != rule.key);
        self.rules.push(rule);
    }

    pub fn clear_escalation_rule(&mut self, key: &str) {
        self.rules.retain(|r| r.key != key);
    }
}

/// Compress prior `browse` tool_result blocks: every occurrence but the most
/// recent is replaced with a one-line descriptor (spec §8 round-trips).
/// Idempotent — compressing an already-compressed conversation is a no-op.
pub fn compress_browse_results(messages: &mut [Message], tool_use_id_is_browse: impl Fn(&str) -> bool) {
    let browse_result_indices: Vec<usize> = messages
        .iter()
        .enumerate()
        .filter(|(_, m)| {
            matches!(
                &m.content,
                MessageContent::Parts(parts)
                    if parts.iter().any(|p| matches!(p, ContentPart::ToolResult { tool_use_id, .. } if tool_use_id_is_browse(tool_use_id)))
            )
        })
        .map(|(i, _)| i)
        .collect();

    let Some(&latest) = browse_result_indices.last() else {
        return;
    };

    for &idx in &browse_result_indices {
        if idx == latest {
            continue;
        }
        if let MessageContent::Parts(parts) = &mut messages[idx].content {
            for part in parts.iter_mut() {
                if let ContentPart::ToolResult { tool_use_id, content, .. } = part {
                    if tool_use_id_is_browse(tool_use_id) && !content.starts_with("Browsed:") {
                        *content = descriptor_line(content);
                    }
                }
            }
        }
    }
}

fn descriptor_line(snapshot_json: &str) -> String {
    let parsed: Value = serde_json::from_str(snapshot_json).unwrap_or(Value::Null);
    let title = parsed.get("title").and_then(Value::as_str).unwrap_or("untitled");
    let url = parsed.get("url").and_then(Value::as_str).unwrap_or("");
    format!("Browsed: {title} ({url})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let mut store = KvStore::new(StoreQuotaConfig::default());
        store.set("x", Value::from(42)).unwrap();
        assert_eq!(store.get("x"), Some(&Value::from(42)));
    }

    #[test]
    fn max_keys_plus_one_fails_but_overwrite_succeeds() {
        let mut quotas = StoreQuotaConfig::default();
        quotas.max_keys = 1;
        let mut store = KvStore::new(quotas);
        store.set("a", Value::from(1)).unwrap();
        assert!(store.set("b", Value::from(2)).is_err());
        assert!(store.set("a", Value::from(99)).is_ok());
    }

    #[test]
    fn oversized_value_is_rejected() {
        let mut quotas = StoreQuotaConfig::default();
        quotas.max_value_bytes = 4;
        let mut store = KvStore::new(quotas);
        assert!(store.set("a", Value::from("way too long a string")).is_err());
    }

    #[test]
    fn cumulative_overflow_is_rejected() {
        let mut quotas = StoreQuotaConfig::default();
        quotas.max_value_bytes = 1000;
        quotas.max_keys = 1000;
        quotas.max_total_bytes = 10;
        let mut store = KvStore::new(quotas);
        assert!(store.set("a", Value::from("12345")).is_ok());
        assert!(store.set("b", Value::from("12345")).is_err());
    }

    #[test]
    fn always_rule_fires_an_inbox_message() {
        let mut store = KvStore::new(StoreQuotaConfig::default());
        store.set_escalation_rule(EscalationRule {
            key: "status".into(),
            condition: Condition::Always,
            message: Some("status changed".into()),
            event_name: None,
        });
        let escalations = store.set("status", Value::from("ready")).unwrap();
        assert_eq!(escalations.len(), 1);
        assert!(matches!(&escalations[0], Escalation::InboxMessage(m) if m == "status changed"));
    }

    #[test]
    fn changed_rule_does_not_fire_on_identical_repeat_write() {
        let mut store = KvStore::new(StoreQuotaConfig::default());
        store.set_escalation_rule(EscalationRule {
            key: "status".into(),
            condition: Condition::Changed,
            message: Some("status changed".into()),
            event_name: None,
        });
        store.set("status", Value::from("ready")).unwrap();
        let escalations = store.set("status", Value::from("ready")).unwrap();
        assert!(escalations.is_empty());
    }

    #[test]
    fn compress_browse_results_keeps_latest_verbatim() {
        let tool_use_id_is_browse = |id: &str| id.starts_with("browse-");
        let mut messages = vec![
            Message::tool_results(vec![ContentPart::ToolResult {
                tool_use_id: "browse-1".into(),
                content: r#"{"title":"Page One","url":"https://a"}"#.into(),
                is_error: false,
            }]),
            Message::tool_results(vec![ContentPart::ToolResult {
                tool_use_id: "browse-2".into(),
                content: r#"{"title":"Page Two","url":"https://b"}"#.into(),
                is_error: false,
            }]),
        ];
        compress_browse_results(&mut messages, tool_use_id_is_browse);
        if let MessageContent::Parts(parts) = &messages[0].content {
            if let ContentPart::ToolResult { content, .. } = &parts[0] {
                assert_eq!(content, "Browsed: Page One (https://a)");
            }
        }
        if let MessageContent::Parts(parts) = &messages[1].content {
            if let ContentPart::ToolResult { content, .. } = &parts[0] {
                assert!(content.contains("Page Two"));
                assert!(!content.starts_with("Browsed:"));
            }
        }
    }

    #[test]
    fn compress_browse_results_is_idempotent() {
        let tool_use_id_is_browse = |id: &str| id.starts_with("browse-");
        let mut messages = vec![
            Message::tool_results(vec![ContentPart::ToolResult {
                tool_use_id: "browse-1".into(),
                content: "Browsed: Already Compressed (https://a)".into(),
                is_error: false,
            }]),
            Message::tool_results(vec![ContentPart::ToolResult {
                tool_use_id: "browse-2".into(),
                content: r#"{"title":"Latest","url":"https://b"}"#.into(),
                is_error: false,
            }]),
        ];
        let before = messages.clone();
        compress_browse_results(&mut messages, tool_use_id_is_browse);
        if let (MessageContent::Parts(a), MessageContent::Parts(b)) =
            (&messages[0].content, &before[0].content)
        {
            assert_eq!(format!("{a:?}"), format!("{b:?}"));
        }
    }
}
