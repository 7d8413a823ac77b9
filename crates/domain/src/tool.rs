//! Conversation and tool-call data model (spec §3).
//!
//! The wire format intentionally tracks the shape the LLM adapter speaks:
//! a flat list of typed content blocks per message, tagged by role. Unlike
//! a generic chat-completion schema there is no `system` or `tool` role —
//! the system prompt is assembled into the request at turn-build time
//! (§4.1 step 2) and tool results travel inside a `user`-role message
//! (§4.1 step 6), never as their own role.

use serde::{Deserialize, Serialize};

/// Internal tool call format (provider-agnostic).
/// Every adapter converts provider-specific tool calls to/from this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool definition exposed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
}

/// A message in the conversation (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

/// `info` messages are visible to subscribers but never sent to the LLM —
/// they carry hub-originated narration (e.g. "user intervention ended").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        /// Base64-encoded image bytes.
        data: String,
        media_type: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

// ── Convenience constructors ───────────────────────────────────────

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Parts(parts),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self {
            role: Role::Info,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Build the single user-role message that carries the concatenated
    /// tool_result blocks for one turn step (§4.1 step 6), in the same
    /// order the matching tool_use blocks were emitted.
    pub fn tool_results(results: Vec<ContentPart>) -> Self {
        debug_assert!(results
            .iter()
            .all(|p| matches!(p, ContentPart::ToolResult { .. })));
        Self {
            role: Role::User,
            content: MessageContent::Parts(results),
        }
    }

    /// `tool_use` blocks in this message, in emission order.
    pub fn tool_uses(&self) -> Vec<&ContentPart> {
        match &self.content {
            MessageContent::Parts(parts) => parts
                .iter()
                .filter(|p| matches!(p, ContentPart::ToolUse { .. }))
                .collect(),
            MessageContent::Text(_) => Vec::new(),
        }
    }
}

impl MessageContent {
    /// Extract the plain-text content (first text part, or the full text).
    pub fn text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(t) => Some(t.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Extract and join all text content, returning an owned String.
    ///
    /// For `Text` variant, returns the string directly.
    /// For `Parts` variant, joins all `Text` parts with `"\n"`.
    /// Non-text parts (ToolUse, ToolResult, Image) are skipped.
    pub fn extract_all_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_all_text_from_text_variant() {
        let content = MessageContent::Text("hello world".into());
        assert_eq!(content.extract_all_text(), "hello world");
    }

    #[test]
    fn extract_all_text_from_parts_joins_with_newline() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text {
                text: "line one".into(),
            },
            ContentPart::ToolUse {
                id: "c1".into(),
                name: "exec".into(),
                input: serde_json::json!({}),
            },
            ContentPart::Text {
                text: "line two".into(),
            },
        ]);
        assert_eq!(content.extract_all_text(), "line one\nline two");
    }

    #[test]
    fn extract_all_text_empty_parts() {
        let content = MessageContent::Parts(vec![]);
        assert_eq!(content.extract_all_text(), "");
    }

    #[test]
    fn tool_results_preserves_order() {
        let msg = Message::tool_results(vec![
            ContentPart::ToolResult {
                tool_use_id: "a".into(),
                content: "1".into(),
                is_error: false,
            },
            ContentPart::ToolResult {
                tool_use_id: "b".into(),
                content: "2".into(),
                is_error: true,
            },
        ]);
        match msg.content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                match &parts[0] {
                    ContentPart::ToolResult { tool_use_id, .. } => assert_eq!(tool_use_id, "a"),
                    _ => panic!("expected tool_result"),
                }
            }
            _ => panic!("expected parts"),
        }
    }

    #[test]
    fn info_role_serializes_lowercase() {
        let msg = Message::info("note");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "info");
    }
}
