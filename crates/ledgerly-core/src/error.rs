//! Error types for Ledgerly

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("AI provider not configured: {0}")]
    NotConfigured(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        /// Server-suggested wait, when the provider sent one
        retry_after: Option<Duration>,
    },

    #[error("All models failed: {0}")]
    ModelsExhausted(String),
}

impl Error {
    /// Whether retrying the same call later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    /// Server-suggested wait before the next attempt
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_rate_limits_are_retryable() {
        let limited = Error::RateLimited {
            message: "429".into(),
            retry_after: Some(Duration::from_millis(1500)),
        };
        assert!(limited.is_retryable());
        assert_eq!(limited.retry_after(), Some(Duration::from_millis(1500)));

        assert!(!Error::NotConfigured("OPENAI_API_KEY".into()).is_retryable());
        assert!(!Error::InvalidData("bad".into()).is_retryable());
        assert_eq!(Error::NotFound("rule 1".into()).retry_after(), None);
    }
}
