//! Provider registry.
//!
//! Per-vendor adapter construction is out of scope (§1 Non-goals). The hub
//! receives already-constructed [`LlmProvider`] instances from its embedder
//! and looks them up by the id named in `AgentConfig.provider`. This crate's
//! job is just that lookup plus masked error bookkeeping for providers the
//! embedder reports as failed to initialize.

use crate::traits::LlmProvider;
use std::collections::HashMap;
use std::sync::Arc;

/// Holds registered LLM providers, keyed by `AgentConfig.provider`.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    init_errors: Vec<ProviderInitError>,
}

/// Records a provider the embedder reported as failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    /// Error message with any potential secrets masked.
    pub error: String,
}

/// Masks substrings that look like API keys or bearer tokens in an error
/// message before it is logged or surfaced on an admin endpoint.
pub fn mask_secrets(msg: &str) -> String {
    let mut result = msg.to_string();
    for word in msg.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = if trimmed.len() > 8 {
                format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..])
            } else {
                "***masked***".to_string()
            };
            result = result.replace(trimmed, &masked);
        }
    }
    result
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            init_errors: Vec::new(),
        }
    }

    /// Register a provider instance under its own `provider_id()`.
    pub fn register(&mut self, provider: Arc<dyn LlmProvider>) {
        let id = provider.provider_id().to_string();
        tracing::info!(provider_id = %id, "registered LLM provider");
        self.providers.insert(id, provider);
    }

    /// Record a provider the embedder failed to construct, with its error
    /// masked, so it can still be surfaced on an admin readiness endpoint
    /// instead of only appearing in startup logs.
    pub fn record_init_error(&mut self, provider_id: impl Into<String>, error: &str) {
        let provider_id = provider_id.into();
        let safe_error = mask_secrets(error);
        tracing::warn!(provider_id = %provider_id, error = %safe_error, "LLM provider failed to initialize");
        self.init_errors.push(ProviderInitError {
            provider_id,
            error: safe_error,
        });
    }

    /// Look up a provider by the id named in `AgentConfig.provider`.
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<dyn LlmProvider>)> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Provider initialization errors (empty if all succeeded).
    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::ChatRequest;
    use hub_domain::error::Result;
    use hub_domain::stream::{BoxStream, StreamEvent};

    struct StubProvider(&'static str);

    #[async_trait::async_trait]
    impl LlmProvider for StubProvider {
        async fn chat_stream(&self, _req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
            unimplemented!("not exercised by these tests")
        }

        fn provider_id(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn register_then_get_round_trips() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubProvider("anthropic")));
        assert!(registry.get("anthropic").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn mask_secrets_redacts_long_alnum_tokens() {
        let masked = mask_secrets("request failed: key sk-ant-REDACTED rejected");
        assert!(!masked.contains("sk-ant-REDACTED"));
        assert!(masked.contains("sk-a"));
    }

    #[test]
    fn init_errors_accumulate_masked() {
        let mut registry = ProviderRegistry::new();
        registry.record_init_error("broken", "token abcdefghijklmnopqrstuvwxyz0123 invalid");
        assert_eq!(registry.init_errors().len(), 1);
        assert!(!registry.init_errors()[0].error.contains("abcdefghijklmnopqrstuvwxyz0123"));
    }
}
