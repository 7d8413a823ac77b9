//! Streaming events from the injected LLM adapter (§4.1 step 3).
//!
//! `SendApiRequest` is the out-of-scope external collaborator named in §1;
//! this module defines only the event shape the hub forwards verbatim to
//! `onAgentEvent` subscribers while a turn's LLM call is in flight.

use serde::{Deserialize, Serialize};
use std::pin::Pin;

pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted while streaming one LLM request. Forwarded verbatim to
/// `onAgentEvent` subscribers per §4.1 step 3.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },

    #[serde(rename = "tool_use_start")]
    ToolUseStart { call_id: String, tool_name: String },

    #[serde(rename = "tool_use_delta")]
    ToolUseDelta { call_id: String, partial_json: String },

    #[serde(rename = "tool_use_stop")]
    ToolUseStop {
        call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "usage")]
    Usage { usage: Usage },

    #[serde(rename = "done")]
    Done {
        stop_reason: StopReason,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

/// Monotonic usage delta reported during/after a stream.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    #[serde(default)]
    pub cost_usd: f64,
}

/// Why the model stopped generating (§4.1 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
}
