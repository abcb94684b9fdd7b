//! Category command implementations

use anyhow::{Context, Result};
use ledgerly_core::models::{LedgerGroup, LedgerType, NewCategory};
use ledgerly_core::Database;

use super::resolve_category;

pub fn cmd_categories_list(db: &Database, tenant: &str, all: bool) -> Result<()> {
    let categories = db.list_categories(tenant, all)?;

    if categories.is_empty() {
        println!("No categories found. Seed the default chart with:");
        println!("  ledgerly init");
        return Ok(());
    }

    println!();
    println!("📂 Categories");
    println!("   ─────────────────────────────────────────────────────────────");

    for category in categories {
        println!(
            "   [{:>3}] {:<32} {:<20} {}{}",
            category.id,
            category.name,
            category.ledger_type.as_str(),
            category.ledger_group.map(|g| g.as_str()).unwrap_or("-"),
            if category.active { "" } else { "  (inactive)" }
        );
    }

    Ok(())
}

pub fn cmd_categories_add(
    db: &Database,
    tenant: &str,
    name: &str,
    ledger_type: &str,
    group: Option<&str>,
) -> Result<()> {
    let ledger_type: LedgerType = ledger_type.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let mut category = NewCategory::new(tenant, name, ledger_type);
    if let Some(group) = group {
        let group: LedgerGroup = group.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        category = category.with_group(Some(group));
    }

    let id = db
        .create_category(&category)
        .with_context(|| format!("Failed to create category '{}'", name))?;

    println!("✅ Created category {} ({}, {})", name, ledger_type, id);
    Ok(())
}

pub fn cmd_categories_deactivate(db: &Database, tenant: &str, key: &str) -> Result<()> {
    let category = resolve_category(db, tenant, key)?;
    db.set_category_active(category.id, false)?;

    println!("✅ Deactivated category {}", category.name);
    println!("   Rules pointing at it stop matching; run 'ledgerly health' to review them.");
    Ok(())
}
