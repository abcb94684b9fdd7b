//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `open_db` - Shared utility to open the database
//! - `load_config` - Engine configuration from --config or the defaults
//! - `open_cache` / `save_cache` - Cache snapshot between CLI runs
//! - `build_ai` - AI classifier from the environment, when configured
//! - `resolve_category` - Category lookup by ID or name
//! - `cmd_init` - Initialize the database

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use ledgerly_core::ai::{AIClient, AiClassifier};
use ledgerly_core::cache::ClassificationCache;
use ledgerly_core::config::EngineConfig;
use ledgerly_core::models::Category;
use ledgerly_core::Database;
use tracing::{debug, info, warn};

/// Open database with encryption by default, or unencrypted if --no-encrypt
pub fn open_db(db_path: &Path, no_encrypt: bool) -> Result<Database> {
    let path_str = db_path
        .to_str()
        .with_context(|| format!("Database path is not valid UTF-8: {}", db_path.display()))?;
    if no_encrypt {
        Database::new_unencrypted(path_str).context("Failed to open database (unencrypted)")
    } else {
        Database::new(path_str).context("Failed to open database")
    }
}

pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    EngineConfig::load(path).context("Failed to load engine configuration")
}

/// Cache warmed from the tenant's stored snapshot
pub fn open_cache(db: &Database, tenant: &str, config: &EngineConfig) -> Result<Arc<ClassificationCache>> {
    let cache = ClassificationCache::new(&config.cache);
    let stored = db
        .load_cache_entries(tenant)
        .context("Failed to load cache snapshot")?;
    let restored = cache.restore(stored);
    debug!(tenant, restored, "Cache restored");
    Ok(Arc::new(cache))
}

pub fn save_cache(db: &Database, tenant: &str, cache: &ClassificationCache) -> Result<()> {
    let saved = db
        .save_cache_entries(tenant, &cache.snapshot())
        .context("Failed to save cache snapshot")?;
    debug!(tenant, saved, "Cache saved");
    Ok(())
}

/// AI classifier, or `None` when no provider is configured
pub fn build_ai(config: &EngineConfig) -> Option<AiClassifier> {
    match AIClient::from_env(&config.ai) {
        Ok(client) => {
            info!(models = ?config.ai.models, "AI classification enabled");
            Some(AiClassifier::new(client, &config.ai))
        }
        Err(e @ ledgerly_core::Error::Config(_)) => {
            warn!("AI classification disabled: {}", e);
            None
        }
        Err(e) => {
            debug!("AI classification disabled: {}", e);
            None
        }
    }
}

/// Look a category up by numeric ID or by name (case-insensitive)
pub fn resolve_category(db: &Database, tenant: &str, key: &str) -> Result<Category> {
    let found = match key.trim().parse::<i64>() {
        Ok(id) => db.get_category(id)?.filter(|c| c.tenant_id == tenant),
        Err(_) => db.get_category_by_name(tenant, key.trim())?,
    };
    found.ok_or_else(|| anyhow::anyhow!("Category '{}' not found", key))
}

pub fn cmd_init(db_path: &Path, tenant: &str, no_encrypt: bool) -> Result<()> {
    println!("🔧 Initializing database at {}...", db_path.display());

    let db = open_db(db_path, no_encrypt)?;

    let seeded = db
        .seed_default_categories(tenant)
        .context("Failed to seed default categories")?;
    println!("   Seeded {} default categories for tenant '{}'", seeded, tenant);

    if no_encrypt {
        println!("   ⚠️  Encryption: DISABLED (--no-encrypt)");
    } else {
        println!("   🔒 Encryption: ENABLED");
    }

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Import transactions: ledgerly transactions import --file statement.csv");
    println!("  2. Classify them:       ledgerly classify");

    Ok(())
}
