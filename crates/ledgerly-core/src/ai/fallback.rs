//! Model fallback
//!
//! Tries each configured model in order, each one through the retry policy,
//! and returns the first reply that is long enough to be meaningful.

use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::retry::{retry_async, RetryPolicy};
use super::types::CompletionRequest;
use super::CompletionBackend;

/// Reply that survived the fallback chain
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackOutcome {
    /// Model that produced the reply
    pub model: String,
    pub content: String,
    /// Models tried, including the successful one
    pub attempts: usize,
}

/// Ask each model in turn until one gives a usable reply
///
/// A reply whose trimmed length does not exceed `min_chars` counts as a
/// failure of that model. When every model fails the error lists each
/// model's reason.
pub async fn complete_with_fallback<B>(
    backend: &B,
    models: &[String],
    request: &CompletionRequest,
    policy: &RetryPolicy,
    min_chars: usize,
) -> Result<FallbackOutcome>
where
    B: CompletionBackend + ?Sized,
{
    if models.is_empty() {
        return Err(Error::Config("No AI models configured".into()));
    }

    let mut failures: Vec<String> = Vec::new();

    for (idx, model) in models.iter().enumerate() {
        let model_request = request.for_model(model);
        let result = retry_async(policy, model, || backend.complete(&model_request)).await;

        match result {
            Ok(content) if content.trim().chars().count() > min_chars => {
                debug!(model = %model, attempts = idx + 1, "AI completion succeeded");
                return Ok(FallbackOutcome {
                    model: model.clone(),
                    content,
                    attempts: idx + 1,
                });
            }
            Ok(content) => {
                warn!(model = %model, chars = content.trim().len(), "Degenerate AI reply, trying next model");
                failures.push(format!("{}: reply too short", model));
            }
            Err(e) => {
                warn!(model = %model, error = %e, "AI model failed, trying next model");
                failures.push(format!("{}: {}", model, e));
            }
        }
    }

    Err(Error::ModelsExhausted(failures.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::mock::{MockBackend, MockReply};
    use crate::ai::types::ChatMessage;
    use std::time::Duration;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            hint_buffer: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        }
    }

    fn models(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![ChatMessage::user("classify")])
    }

    #[tokio::test]
    async fn test_first_model_wins() {
        let backend = MockBackend::new().script("a", vec![MockReply::text(r#"{"category": "X", "confidence": 0.9}"#)]);
        let outcome = complete_with_fallback(&backend, &models(&["a", "b"]), &request(), &policy(), 10)
            .await
            .unwrap();
        assert_eq!(outcome.model, "a");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(backend.calls("b"), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_before_falling_back() {
        let backend = MockBackend::new()
            .script("a", vec![MockReply::RateLimited, MockReply::text(r#"{"category": "X", "confidence": 0.9}"#)]);
        let outcome = complete_with_fallback(&backend, &models(&["a", "b"]), &request(), &policy(), 10)
            .await
            .unwrap();
        assert_eq!(outcome.model, "a");
        assert_eq!(backend.calls("a"), 2);
    }

    #[tokio::test]
    async fn test_degenerate_and_failed_models_fall_through() {
        let backend = MockBackend::new()
            .script("a", vec![MockReply::text("ok")])
            .script("b", vec![MockReply::Error("boom".into())])
            .script("c", vec![MockReply::text(r#"{"category": "Y", "confidence": 0.8}"#)]);
        let outcome = complete_with_fallback(&backend, &models(&["a", "b", "c"]), &request(), &policy(), 10)
            .await
            .unwrap();
        assert_eq!(outcome.model, "c");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(backend.calls("b"), 1);
    }

    #[tokio::test]
    async fn test_exhausted_lists_every_model() {
        let backend = MockBackend::new()
            .script("a", vec![MockReply::RateLimited; 3])
            .script("b", vec![MockReply::Error("server error".into())]);
        let err = complete_with_fallback(&backend, &models(&["a", "b"]), &request(), &policy(), 10)
            .await
            .unwrap_err();

        match err {
            Error::ModelsExhausted(msg) => {
                assert!(msg.contains("a: Rate limited"));
                assert!(msg.contains("b: Invalid data: server error"));
            }
            other => panic!("expected ModelsExhausted, got {:?}", other),
        }
        assert_eq!(backend.calls("a"), 3);
    }
}
