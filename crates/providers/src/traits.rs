//! The `SendApiRequest` seam (spec §1, §4.1 step 3).
//!
//! The LLM HTTP/SSE wire format and per-vendor adapters are explicitly out
//! of scope. This trait is the narrow interface the turn loop calls
//! through; a concrete adapter is supplied by the embedder, not by this
//! crate.

use hub_domain::error::Result;
use hub_domain::stream::{BoxStream, StopReason, StreamEvent, Usage};
use hub_domain::tool::{ContentPart, Message, ToolDefinition};

/// A provider-agnostic chat completion request assembled by the turn loop
/// at §4.1 step 2.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub model: String,
    pub max_tokens: u32,
}

/// The finalized assistant message returned once a stream completes
/// (§4.1 step 4): typed content blocks plus the reason generation stopped.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: Vec<ContentPart>,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

/// Every adapter the embedder plugs in implements this. The hub never
/// speaks a vendor wire format directly.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Issue a streaming chat completion. The returned stream yields
    /// [`StreamEvent`]s forwarded verbatim to `onAgentEvent` subscribers,
    /// terminated by a `Done`/`Error` event.
    async fn chat_stream(&self, req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>>;

    /// A unique identifier for this provider instance, matching
    /// `AgentConfig.provider`.
    fn provider_id(&self) -> &str;
}
