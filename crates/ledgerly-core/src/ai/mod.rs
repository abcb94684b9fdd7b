//! AI classifier adapter
//!
//! # Architecture
//!
//! - `CompletionBackend` trait: one chat completion call
//! - `AIClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `OpenAICompatibleBackend`, `MockBackend`
//! - `retry`: exponential backoff for rate limits
//! - `fallback`: walks the configured model list
//! - `classifier`: prompt building and answer mapping for categories
//!
//! # Usage
//!
//! ```rust,ignore
//! let client = AIClient::from_env(&config.ai)?;
//! let ai = AiClassifier::new(client, &config.ai);
//! let verdict = ai.classify("DEBITO UBER CORRIDA", -25.30, &categories).await?;
//! println!("Category: {}", verdict.category_name);
//! ```
//!
//! # Configuration
//!
//! Environment variables:
//! - `AI_PROVIDER`: openrouter (default), openai, custom or mock
//! - `OPENROUTER_API_KEY` / `OPENAI_API_KEY`: provider keys
//! - `LEDGERLY_AI_BASE_URL` / `LEDGERLY_AI_API_KEY`: custom gateway

pub mod classifier;
pub mod fallback;
mod mock;
mod openai_compatible;
pub mod parsing;
pub mod retry;
pub mod types;

pub use classifier::AiClassifier;
pub use fallback::{complete_with_fallback, FallbackOutcome};
pub use mock::{MockBackend, MockReply};
pub use openai_compatible::{OpenAICompatibleBackend, Provider, ProviderConfig};
pub use retry::{retry_async, RetryPolicy};
pub use types::*;

use async_trait::async_trait;

use crate::config::AiConfig;
use crate::error::{Error, Result};

/// A chat completion provider
///
/// Backends should be Send + Sync to allow use across async tasks.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Send one request and return the assistant's text
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Short backend name (for logging)
    fn name(&self) -> &str;
}

/// Concrete AI client enum
///
/// Provides Clone and compile-time dispatch without Box<dyn> overhead.
#[derive(Clone)]
pub enum AIClient {
    /// OpenRouter, OpenAI or any compatible gateway
    OpenAICompatible(OpenAICompatibleBackend),
    /// Mock backend for testing
    Mock(MockBackend),
}

impl AIClient {
    /// Create an AI client from environment variables
    ///
    /// `AI_PROVIDER` (or `config.provider`) selects the backend. Missing
    /// credentials are reported here, before the first call.
    pub fn from_env(config: &AiConfig) -> Result<Self> {
        let provider = std::env::var("AI_PROVIDER")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| config.provider.clone());
        Self::for_provider(&provider)
    }

    /// Build the client for a provider name; unknown names are a configuration error
    fn for_provider(provider: &str) -> Result<Self> {
        if provider.eq_ignore_ascii_case("mock") {
            return Ok(AIClient::Mock(MockBackend::new()));
        }
        provider.parse::<Provider>().map_err(Error::Config)?;
        OpenAICompatibleBackend::from_env(provider).map(AIClient::OpenAICompatible)
    }

    /// Create a mock backend for testing
    pub fn mock() -> Self {
        AIClient::Mock(MockBackend::new())
    }
}

#[async_trait]
impl CompletionBackend for AIClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        match self {
            AIClient::OpenAICompatible(b) => b.complete(request).await,
            AIClient::Mock(b) => b.complete(request).await,
        }
    }

    fn name(&self) -> &str {
        match self {
            AIClient::OpenAICompatible(b) => b.name(),
            AIClient::Mock(b) => b.name(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_is_config_error() {
        let err = AIClient::for_provider("anthropic").err().unwrap();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("Unknown AI provider: anthropic"));
    }

    #[test]
    fn test_mock_provider_needs_no_key() {
        let client = AIClient::for_provider("MOCK").unwrap();
        assert!(matches!(client, AIClient::Mock(_)));
    }
}
