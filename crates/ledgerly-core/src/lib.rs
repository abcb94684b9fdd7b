//! Ledgerly Core Library
//!
//! Transaction classification and rule governance:
//! - Database access and migrations (SQLCipher at rest)
//! - Pattern rules with specificity-ranked matching
//! - In-memory classification cache with similarity lookup
//! - Accounting polarity validation
//! - AI classification over OpenAI-compatible providers with retry and fallback
//! - Classification orchestrator (cache, rules, AI, validator, review)
//! - Rule health analysis, pattern suggestion and clustering
//! - Review queue with feedback to rules
//! - Batched historical reclassification

pub mod ai;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod matcher;
pub mod models;
pub mod reclassify;
pub mod review;
pub mod suggest;
pub mod validator;

/// Test utilities including mock completion server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{AIClient, AiClassifier, CompletionBackend, MockBackend, OpenAICompatibleBackend};
pub use cache::ClassificationCache;
pub use classifier::{ClassifyStats, Classifier};
pub use config::EngineConfig;
pub use db::{Database, TransactionFilter};
pub use error::{Error, Result};
pub use health::{RuleHealthAnalyzer, RuleHealthReport};
pub use matcher::PatternMatcher;
pub use reclassify::{CancelFlag, Reclassifier, ReclassifyOptions};
pub use review::ReviewService;
pub use suggest::PatternSuggestor;
pub use validator::AccountingValidator;
