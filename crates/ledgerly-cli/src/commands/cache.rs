//! Cache command implementations

use anyhow::Result;
use ledgerly_core::config::EngineConfig;
use ledgerly_core::Database;

use super::open_cache;

pub fn cmd_cache_stats(db: &Database, tenant: &str, config: &EngineConfig) -> Result<()> {
    let cache = open_cache(db, tenant, config)?;
    let stats = cache.stats(10);

    println!();
    println!("🗃️  Classification Cache");
    println!("   ─────────────────────────────");
    println!("   Entries:         {} / {}", stats.entries, cache.max_entries());
    println!("   Total accesses:  {}", stats.total_accesses);
    println!("   Avg confidence:  {:.2}", stats.avg_confidence);

    if !stats.top.is_empty() {
        println!();
        println!("   Most used:");
        for (key, accesses) in &stats.top {
            println!("     {:>5}  {}", accesses, key);
        }
    }
    Ok(())
}

pub fn cmd_cache_clear(db: &Database, tenant: &str) -> Result<()> {
    let cleared = db.clear_cache_entries(tenant)?;
    println!("✅ Cleared {} cached classifications", cleared);
    Ok(())
}
