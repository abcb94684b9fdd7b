//! Test utilities for ledgerly-core
//!
//! A mock OpenAI-compatible completion server for adapter and
//! integration tests. Replies are queued up front; once the queue is empty
//! the server answers with a fixed classification.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Json, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde::Deserialize;
use tokio::sync::oneshot;

/// One queued HTTP reply
#[derive(Debug, Clone)]
pub enum MockHttpReply {
    /// 200 with this assistant content
    Content(String),
    /// 429 with an optional Retry-After header (seconds)
    RateLimited { retry_after_secs: Option<u64> },
    /// 500 with a body
    ServerError(String),
}

#[derive(Default)]
struct ServerState {
    replies: Mutex<VecDeque<MockHttpReply>>,
    models: Mutex<Vec<String>>,
    auth_headers: Mutex<Vec<Option<String>>>,
}

/// Mock OpenAI-compatible server for testing
pub struct MockOpenAIServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockOpenAIServer {
    /// Start the mock server on an available port
    pub async fn start(replies: Vec<MockHttpReply>) -> Self {
        let state = Arc::new(ServerState {
            replies: Mutex::new(replies.into()),
            ..ServerState::default()
        });

        let app = Router::new()
            .route("/chat/completions", post(handle_completion))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Models requested so far, in order
    pub fn requested_models(&self) -> Vec<String> {
        self.state.models.lock().unwrap().clone()
    }

    /// Authorization headers seen so far, in order
    pub fn auth_headers(&self) -> Vec<Option<String>> {
        self.state.auth_headers.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.models.lock().unwrap().len()
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockOpenAIServer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Deserialize)]
struct CompletionBody {
    model: String,
}

async fn handle_completion(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<CompletionBody>,
) -> Response {
    state.models.lock().unwrap().push(body.model);
    state.auth_headers.lock().unwrap().push(
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );

    let reply = state.replies.lock().unwrap().pop_front();
    match reply {
        Some(MockHttpReply::Content(content)) => completion(&content),
        Some(MockHttpReply::RateLimited { retry_after_secs }) => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                r#"{"error": {"code": "rate_limit_exceeded", "message": "Rate limit reached"}}"#,
            )
                .into_response();
            if let Some(secs) = retry_after_secs {
                response
                    .headers_mut()
                    .insert("retry-after", HeaderValue::from(secs));
            }
            response
        }
        Some(MockHttpReply::ServerError(body)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
        }
        None => completion(
            r#"{"category": "Transporte", "confidence": 0.9, "reasoning": "default mock reply"}"#,
        ),
    }
}

fn completion(content: &str) -> Response {
    Json(serde_json::json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{
        ChatMessage, CompletionBackend, CompletionRequest, OpenAICompatibleBackend, Provider,
        ProviderConfig,
    };
    use crate::error::Error;

    fn backend(server: &MockOpenAIServer, provider: Provider) -> OpenAICompatibleBackend {
        OpenAICompatibleBackend::new(ProviderConfig::new(provider, &server.url(), Some("sk-test")))
    }

    fn request(model: &str) -> CompletionRequest {
        CompletionRequest::new(vec![ChatMessage::user("Transaction: \"UBER\"")]).for_model(model)
    }

    #[tokio::test]
    async fn test_completion_round_trip() {
        let server = MockOpenAIServer::start(vec![MockHttpReply::Content("{\"ok\": true}".into())]).await;
        let reply = backend(&server, Provider::OpenRouter)
            .complete(&request("gpt-4o-mini"))
            .await
            .unwrap();

        assert_eq!(reply, "{\"ok\": true}");
        assert_eq!(server.requested_models(), vec!["openai/gpt-4o-mini"]);
        assert_eq!(server.auth_headers(), vec![Some("Bearer sk-test".to_string())]);
    }

    #[tokio::test]
    async fn test_429_maps_to_rate_limited_with_hint() {
        let server = MockOpenAIServer::start(vec![MockHttpReply::RateLimited {
            retry_after_secs: Some(2),
        }])
        .await;
        let err = backend(&server, Provider::OpenAI)
            .complete(&request("gpt-4o-mini"))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_server_error_is_not_retryable() {
        let server = MockOpenAIServer::start(vec![MockHttpReply::ServerError("overloaded".into())]).await;
        let err = backend(&server, Provider::Custom)
            .complete(&request("local-model"))
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
        assert!(matches!(err, Error::InvalidData(ref m) if m.contains("500")));
        assert_eq!(server.requested_models(), vec!["local-model"]);
    }
}
