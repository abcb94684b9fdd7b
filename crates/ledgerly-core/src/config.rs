//! Engine configuration
//!
//! Thresholds, cache bounds, the reversal lexicon, AI model order and
//! maintenance settings all live in one TOML document.
//!
//! ## Configuration Resolution
//!
//! Config is loaded with a two-layer resolution:
//! 1. Explicit path, or the override in the data dir
//!    (~/.local/share/ledgerly/config/engine.toml)
//! 2. Fall back to embedded defaults (compiled into binary)
//!
//! Missing keys in an override keep their default values.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Embedded default config (compiled into binary)
const DEFAULT_CONFIG: &str = include_str!("../../../config/engine.toml");

/// Thresholds used by the classification pipeline
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Minimum confidence for any source to be accepted without review
    pub acceptance_threshold: f64,
    /// Rules below this confidence are not considered at all
    pub rule_min_confidence: f64,
    /// AI answers at or above this confidence are cached
    pub cache_write_threshold: f64,
    /// Token-overlap threshold for approximate cache hits
    pub similarity_threshold: f64,
    pub auto_learn: bool,
    pub auto_learn_threshold: f64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.7,
            rule_min_confidence: 0.5,
            cache_write_threshold: 0.8,
            similarity_threshold: 0.8,
            auto_learn: true,
            auto_learn_threshold: 0.75,
        }
    }
}

/// Cache bounds
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_days: i64,
    pub max_entries: usize,
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.ttl_days)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_days: 30,
            max_entries: 10_000,
        }
    }
}

/// Accounting validation settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Words that mark a refund or reversal
    pub reversal_keywords: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            reversal_keywords: [
                "estorno",
                "devolução",
                "devolucao",
                "restituição",
                "restituicao",
                "reembolso",
                "ressarcimento",
                "chargeback",
                "refund",
                "reversal",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// AI adapter settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// openrouter, openai or custom
    pub provider: String,
    /// Tried in order until one gives a usable answer
    pub models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    /// Replies this short or shorter count as degenerate
    pub min_response_chars: usize,
}

impl AiConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: "openrouter".to_string(),
            models: vec![
                "openai/gpt-4o-mini".to_string(),
                "google/gemini-2.0-flash-001".to_string(),
            ],
            temperature: 0.1,
            max_tokens: 2000,
            max_retries: 3,
            base_delay_ms: 1000,
            min_response_chars: 10,
        }
    }
}

/// Rule health thresholds
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Uses plus feedback needed before a rule can be retired
    pub min_evidence: i64,
    pub deactivate_health: f64,
    pub deactivate_precision: f64,
    pub review_health: f64,
    pub review_precision: f64,
    /// Days without use until recency reaches zero
    pub recency_days: i64,
    /// Recent descriptions sampled for overlapping rules
    pub sample_size: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            min_evidence: 5,
            deactivate_health: 0.3,
            deactivate_precision: 0.4,
            review_health: 0.6,
            review_precision: 0.7,
            recency_days: 90,
            sample_size: 500,
        }
    }
}

/// Clustering settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub similarity_threshold: f64,
    pub min_cluster_size: usize,
    pub max_cluster_size: usize,
    pub lookback_days: i64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            min_cluster_size: 3,
            max_cluster_size: 50,
            lookback_days: 90,
        }
    }
}

/// Reclassification job settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReclassificationConfig {
    pub batch_size: usize,
}

impl Default for ReclassificationConfig {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub classification: ClassificationConfig,
    pub cache: CacheConfig,
    pub validation: ValidationConfig,
    pub ai: AiConfig,
    pub health: HealthConfig,
    pub clustering: ClusteringConfig,
    pub reclassification: ReclassificationConfig,
}

impl EngineConfig {
    /// Load configuration (explicit path, then override dir, then embedded)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let content = match path {
            Some(p) => fs::read_to_string(p)
                .map_err(|e| Error::Config(format!("Failed to read {}: {}", p.display(), e)))?,
            None => match default_config_path() {
                Some(p) if p.exists() => fs::read_to_string(&p).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", p.display(), e))
                })?,
                _ => DEFAULT_CONFIG.to_string(),
            },
        };

        parse_config(&content)
    }

    /// Embedded defaults only
    pub fn embedded() -> Result<Self> {
        parse_config(DEFAULT_CONFIG)
    }
}

/// Default config override path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("ledgerly").join("config").join("engine.toml"))
}

/// Parse config from TOML content
fn parse_config(content: &str) -> Result<EngineConfig> {
    let config: EngineConfig = toml::from_str(content)
        .map_err(|e| Error::Config(format!("Invalid config TOML: {}", e)))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &EngineConfig) -> Result<()> {
    let unit = |name: &str, v: f64| {
        if (0.0..=1.0).contains(&v) {
            Ok(())
        } else {
            Err(Error::Config(format!("{} must be within 0..=1, got {}", name, v)))
        }
    };
    let c = &config.classification;
    unit("classification.acceptance_threshold", c.acceptance_threshold)?;
    unit("classification.rule_min_confidence", c.rule_min_confidence)?;
    unit("classification.cache_write_threshold", c.cache_write_threshold)?;
    unit("classification.similarity_threshold", c.similarity_threshold)?;
    unit("classification.auto_learn_threshold", c.auto_learn_threshold)?;
    unit(
        "clustering.similarity_threshold",
        config.clustering.similarity_threshold,
    )?;

    if config.cache.max_entries == 0 {
        return Err(Error::Config("cache.max_entries must be positive".into()));
    }
    if config.reclassification.batch_size == 0 {
        return Err(Error::Config(
            "reclassification.batch_size must be positive".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_default_config() {
        let config = EngineConfig::embedded().unwrap();
        assert_eq!(config.classification.acceptance_threshold, 0.7);
        assert_eq!(config.cache.max_entries, 10_000);
        assert_eq!(config.cache.ttl(), chrono::Duration::days(30));
        assert!(config
            .validation
            .reversal_keywords
            .iter()
            .any(|k| k == "estorno"));
        assert!(config.ai.models.len() >= 2);
        assert_eq!(config.reclassification.batch_size, 100);
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let config = parse_config(
            r#"
            [cache]
            max_entries = 50

            [validation]
            reversal_keywords = ["refund"]
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.cache.ttl_days, 30);
        assert_eq!(config.validation.reversal_keywords, vec!["refund"]);
        assert_eq!(config.classification, ClassificationConfig::default());
    }

    #[test]
    fn test_rejects_out_of_range_thresholds() {
        let err = parse_config("[classification]\nacceptance_threshold = 70\n").unwrap_err();
        assert!(err.to_string().contains("acceptance_threshold"));

        assert!(parse_config("[reclassification]\nbatch_size = 0\n").is_err());
        assert!(parse_config("not = [valid").is_err());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[ai]\nmodels = [\"gpt-4o\"]\nmax_retries = 1").unwrap();

        let config = EngineConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.ai.models, vec!["gpt-4o"]);
        assert_eq!(config.ai.max_retries, 1);
        assert_eq!(config.ai.min_response_chars, 10);

        let missing = EngineConfig::load(Some(Path::new("/nonexistent/engine.toml")));
        assert!(matches!(missing, Err(Error::Config(_))));
    }
}
