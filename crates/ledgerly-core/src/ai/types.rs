//! AI request and response types
//!
//! These types are provider-agnostic and shared by every backend.

use serde::{Deserialize, Serialize};

/// Chat message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A single chat completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            model: String::new(),
            messages,
            temperature: 0.1,
            max_tokens: Some(2000),
        }
    }

    /// Same request aimed at another model
    pub fn for_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Raw classification as the model returns it
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AiClassification {
    #[serde(alias = "micro")]
    pub category: String,
    /// Either 0-1 or 0-100, normalized by the parser
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

/// Classification resolved against the tenant's categories
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AiVerdict {
    pub category_id: i64,
    pub category_name: String,
    /// Always within 0..=1
    pub confidence: f64,
    pub reasoning: Option<String>,
    /// Model that produced the answer
    pub model: String,
}
