//! OpenAI-compatible chat completion backend
//!
//! Works with any server that implements the `/chat/completions` API:
//! - OpenRouter (https://openrouter.ai/api/v1)
//! - OpenAI (https://api.openai.com/v1)
//! - Any self-hosted gateway via `LEDGERLY_AI_BASE_URL`
//!
//! # Configuration
//!
//! Environment variables:
//! - `AI_PROVIDER`: openrouter (default), openai or custom
//! - `OPENROUTER_API_KEY`: key for OpenRouter
//! - `OPENAI_API_KEY`: key for OpenAI
//! - `LEDGERLY_AI_BASE_URL`: base URL override (required for custom)
//! - `LEDGERLY_AI_API_KEY`: key for custom gateways, fallback for the others

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

use super::types::{ChatMessage, CompletionRequest};
use super::CompletionBackend;

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1";
const OPENAI_URL: &str = "https://api.openai.com/v1";

/// Which API family the backend talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenRouter,
    OpenAI,
    Custom,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenRouter => "openrouter",
            Self::OpenAI => "openai",
            Self::Custom => "custom",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openrouter" => Ok(Self::OpenRouter),
            "openai" => Ok(Self::OpenAI),
            "custom" | "openai_compatible" => Ok(Self::Custom),
            _ => Err(format!("Unknown AI provider: {}", s)),
        }
    }
}

/// Validated provider settings
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    pub provider: Provider,
    pub base_url: String,
    pub api_key: Option<String>,
}

impl ProviderConfig {
    pub fn new(provider: Provider, base_url: &str, api_key: Option<&str>) -> Self {
        Self {
            provider,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
        }
    }

    /// Read provider settings from the environment
    ///
    /// `default_provider` applies when `AI_PROVIDER` is unset. Fails with
    /// `Error::NotConfigured` before any call is made when a key is missing.
    pub fn from_env(default_provider: &str) -> Result<Self> {
        Self::from_lookup(default_provider, |name| {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        })
    }

    fn from_lookup<F>(default_provider: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider_name = lookup("AI_PROVIDER").unwrap_or_else(|| default_provider.to_string());
        let provider: Provider = provider_name.parse().map_err(Error::Config)?;
        Self::resolve(provider, lookup)
    }

    fn resolve<F>(provider: Provider, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_override = lookup("LEDGERLY_AI_BASE_URL");
        let generic_key = lookup("LEDGERLY_AI_API_KEY");

        let config = match provider {
            Provider::OpenRouter => {
                let key = lookup("OPENROUTER_API_KEY").or(generic_key).ok_or_else(|| {
                    Error::NotConfigured("OpenRouter API key not configured (set OPENROUTER_API_KEY)".into())
                })?;
                Self::new(
                    provider,
                    base_override.as_deref().unwrap_or(OPENROUTER_URL),
                    Some(&key),
                )
            }
            Provider::OpenAI => {
                let key = lookup("OPENAI_API_KEY").or(generic_key).ok_or_else(|| {
                    Error::NotConfigured("OpenAI API key not configured (set OPENAI_API_KEY)".into())
                })?;
                Self::new(
                    provider,
                    base_override.as_deref().unwrap_or(OPENAI_URL),
                    Some(&key),
                )
            }
            Provider::Custom => {
                let base = base_override.ok_or_else(|| {
                    Error::NotConfigured("Custom AI base URL not configured (set LEDGERLY_AI_BASE_URL)".into())
                })?;
                Self::new(provider, &base, generic_key.as_deref())
            }
        };
        Ok(config)
    }

    /// Model id in the form the provider expects
    ///
    /// OpenRouter wants vendor-prefixed ids (`openai/gpt-4o-mini`); OpenAI
    /// wants bare ids.
    pub fn model_id(&self, model: &str) -> String {
        let model = model.trim();
        match self.provider {
            Provider::OpenRouter => {
                if model.contains('/') {
                    model.to_string()
                } else if model.starts_with("gpt-") || model.starts_with("o1") || model.starts_with("o3") {
                    format!("openai/{}", model)
                } else if model.starts_with("gemini") {
                    format!("google/{}", model)
                } else if model.starts_with("claude") {
                    format!("anthropic/{}", model)
                } else {
                    model.to_string()
                }
            }
            Provider::OpenAI => model.trim_start_matches("openai/").to_string(),
            Provider::Custom => model.to_string(),
        }
    }
}

/// Chat completion client for OpenAI-compatible APIs
#[derive(Clone)]
pub struct OpenAICompatibleBackend {
    http_client: Client,
    config: ProviderConfig,
}

impl OpenAICompatibleBackend {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            http_client: Client::new(),
            config,
        }
    }

    pub fn from_env(default_provider: &str) -> Result<Self> {
        Ok(Self::new(ProviderConfig::from_env(default_provider)?))
    }

    pub fn host(&self) -> &str {
        &self.config.base_url
    }

    pub fn provider(&self) -> Provider {
        self.config.provider
    }
}

/// Wait hinted by the server, from `Retry-After` or a "try again in Ns" body
pub(crate) fn parse_retry_after(header: Option<&str>, body: &str) -> Option<Duration> {
    // Out-of-range hints are dropped so the caller falls back to its own backoff
    if let Some(wait) = header
        .and_then(|h| h.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    {
        return Some(wait);
    }

    let re = regex::Regex::new(r"(?i)try again in (\d+(?:\.\d+)?)\s*s").ok()?;
    let secs: f64 = re.captures(body)?.get(1)?.as_str().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

#[async_trait]
impl CompletionBackend for OpenAICompatibleBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let model = self.config.model_id(&request.model);
        let body = ChatCompletionRequest {
            model: model.clone(),
            messages: &request.messages,
            temperature: Some(request.temperature),
            max_tokens: request.max_tokens,
            stream: false,
        };

        let mut req_builder = self
            .http_client
            .post(format!("{}/chat/completions", self.config.base_url))
            .json(&body);

        if let Some(ref api_key) = self.config.api_key {
            req_builder = req_builder.header("Authorization", format!("Bearer {}", api_key));
        }
        if self.config.provider == Provider::OpenRouter {
            req_builder = req_builder.header("X-Title", "ledgerly");
        }

        debug!(model = %model, host = %self.config.base_url, "Sending chat completion");
        let response = req_builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let retry_header = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.unwrap_or_default();

            if status == StatusCode::TOO_MANY_REQUESTS || body.contains("rate_limit") {
                return Err(Error::RateLimited {
                    message: format!("{} rate limited model {}: {}", self.config.provider.as_str(), model, body),
                    retry_after: parse_retry_after(retry_header.as_deref(), &body),
                });
            }
            return Err(Error::InvalidData(format!(
                "OpenAI API error {}: {}",
                status, body
            )));
        }

        let chat_response: ChatCompletionResponse = response.json().await?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::InvalidData("No response from OpenAI API".into()))
    }

    fn name(&self) -> &str {
        self.config.provider.as_str()
    }
}

/// OpenAI chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: String,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

/// OpenAI chat completion response
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

/// Chat completion choice
#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

/// Chat response message
#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_openrouter_is_default_and_needs_key() {
        let err = ProviderConfig::from_lookup("openrouter", lookup(&[])).unwrap_err();
        assert!(matches!(err, Error::NotConfigured(_)));
        assert!(err.to_string().contains("not configured"));

        let config =
            ProviderConfig::from_lookup("openrouter", lookup(&[("OPENROUTER_API_KEY", "sk-or")])).unwrap();
        assert_eq!(config.provider, Provider::OpenRouter);
        assert_eq!(config.base_url, OPENROUTER_URL);
        assert_eq!(config.api_key.as_deref(), Some("sk-or"));
    }

    #[test]
    fn test_provider_selected_from_env() {
        let config = ProviderConfig::from_lookup(
            "openrouter",
            lookup(&[("AI_PROVIDER", "openai"), ("OPENAI_API_KEY", "sk-oa")]),
        )
        .unwrap();
        assert_eq!(config.provider, Provider::OpenAI);
        assert_eq!(config.base_url, OPENAI_URL);

        let custom = ProviderConfig::from_lookup(
            "openrouter",
            lookup(&[("AI_PROVIDER", "custom"), ("LEDGERLY_AI_BASE_URL", "http://localhost:4000/v1/")]),
        )
        .unwrap();
        assert_eq!(custom.base_url, "http://localhost:4000/v1");
        assert_eq!(custom.api_key, None);

        assert!(matches!(
            ProviderConfig::from_lookup("openrouter", lookup(&[("AI_PROVIDER", "custom")])),
            Err(Error::NotConfigured(_))
        ));
        assert!(matches!(
            ProviderConfig::from_lookup("bogus", lookup(&[])),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_model_prefixing() {
        let openrouter = ProviderConfig::new(Provider::OpenRouter, OPENROUTER_URL, Some("k"));
        assert_eq!(openrouter.model_id("gpt-4o-mini"), "openai/gpt-4o-mini");
        assert_eq!(openrouter.model_id("gemini-2.0-flash-001"), "google/gemini-2.0-flash-001");
        assert_eq!(openrouter.model_id("claude-3.5-haiku"), "anthropic/claude-3.5-haiku");
        assert_eq!(openrouter.model_id("meta-llama/llama-3-8b"), "meta-llama/llama-3-8b");

        let openai = ProviderConfig::new(Provider::OpenAI, OPENAI_URL, Some("k"));
        assert_eq!(openai.model_id("openai/gpt-4o-mini"), "gpt-4o-mini");
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("3"), ""), Some(Duration::from_secs(3)));
        assert_eq!(
            parse_retry_after(None, "Rate limit reached. Please try again in 1.5s."),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(parse_retry_after(Some("soon"), "no hint"), None);
    }

    #[test]
    fn test_parse_retry_after_out_of_range() {
        assert_eq!(parse_retry_after(Some("1e30"), ""), None);
        assert_eq!(parse_retry_after(Some("-5"), ""), None);
        assert_eq!(parse_retry_after(Some("NaN"), ""), None);
        assert_eq!(
            parse_retry_after(None, "Please try again in 99999999999999999999999999s"),
            None
        );
        // A bad header still lets the body hint through
        assert_eq!(
            parse_retry_after(Some("1e30"), "try again in 2s"),
            Some(Duration::from_secs(2))
        );
    }
}
