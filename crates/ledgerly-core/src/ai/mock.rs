//! Mock backend for testing
//!
//! Replies can be scripted per model (text, rate limit, error); once a
//! model's script runs out the backend answers with a keyword-based
//! classification of the last user message. Calls are counted per model.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Error, Result};

use super::types::{CompletionRequest, Role};
use super::CompletionBackend;

/// One scripted reply
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply {
    Text(String),
    RateLimited,
    Error(String),
}

impl MockReply {
    pub fn text(s: &str) -> Self {
        Self::Text(s.to_string())
    }

    /// Well-formed classification reply
    pub fn classification(category: &str, confidence: f64) -> Self {
        Self::Text(
            serde_json::json!({
                "category": category,
                "confidence": confidence,
                "reasoning": "scripted",
            })
            .to_string(),
        )
    }
}

/// Mock AI backend for testing
#[derive(Clone, Default)]
pub struct MockBackend {
    scripts: Arc<Mutex<HashMap<String, VecDeque<MockReply>>>>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue replies for one model, consumed in order
    pub fn script(self, model: &str, replies: Vec<MockReply>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(model.to_string())
            .or_default()
            .extend(replies);
        self
    }

    /// Calls made for one model
    pub fn calls(&self, model: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(model)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .sum()
    }

    fn next_reply(&self, model: &str) -> Option<MockReply> {
        self.scripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_mut(model)
            .and_then(|queue| queue.pop_front())
    }
}

/// Keyword classification over the default chart of categories
fn keyword_reply(text: &str) -> String {
    let t = text.to_uppercase();
    let (category, confidence) = if t.contains("UBER") || t.contains("99POP") || t.contains("POSTO") {
        ("Transporte", 0.9)
    } else if t.contains("TARIFA") || t.contains("CESTA") {
        ("Tarifas Bancárias", 0.88)
    } else if t.contains("NETFLIX") || t.contains("SPOTIFY") || t.contains("AWS") {
        ("Software e Assinaturas", 0.92)
    } else if t.contains("SISPAG") {
        // Ambiguous batch payments
        ("Fornecedores", 0.5)
    } else if t.contains("IFOOD") || t.contains("RESTAURANTE") || t.contains("PADARIA") {
        ("Alimentação", 0.85)
    } else if t.contains("DAS ") || t.contains("DARF") {
        ("Impostos", 0.9)
    } else {
        ("Transferências", 0.4)
    };

    serde_json::json!({
        "category": category,
        "confidence": confidence,
        "reasoning": "keyword match",
    })
    .to_string()
}

#[async_trait]
impl CompletionBackend for MockBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        *self
            .calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(request.model.clone())
            .or_insert(0) += 1;

        match self.next_reply(&request.model) {
            Some(MockReply::Text(text)) => Ok(text),
            Some(MockReply::RateLimited) => Err(Error::RateLimited {
                message: format!("mock rate limit for {}", request.model),
                retry_after: None,
            }),
            Some(MockReply::Error(msg)) => Err(Error::InvalidData(msg)),
            None => {
                let user_text = request
                    .messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or_default();
                Ok(keyword_reply(user_text))
            }
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
