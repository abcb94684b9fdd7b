//! Rule command implementations

use anyhow::{Context, Result};
use ledgerly_core::models::{NewRule, PatternKind};
use ledgerly_core::{Database, PatternMatcher, PatternSuggestor};

use ledgerly_core::config::EngineConfig;

use super::{resolve_category, truncate};

pub fn cmd_rules_list(db: &Database, tenant: &str, all: bool) -> Result<()> {
    let rules = db.list_rules(tenant, all)?;

    if rules.is_empty() {
        println!("No rules yet. Add one with:");
        println!("  ledgerly rules add UBER --category Transporte");
        return Ok(());
    }

    println!();
    println!("📋 Rules");
    println!("   ─────────────────────────────────────────────────────────────────────");

    for rule in rules {
        let category = match rule.category_id {
            Some(id) => db
                .get_category(id)?
                .map(|c| c.name)
                .unwrap_or_else(|| format!("#{} (missing)", id)),
            None => "(none)".to_string(),
        };
        println!(
            "   [{:>3}] {:<9} {:<28} → {:<24} conf {:.2}  uses {:>4}  {}/{}",
            rule.id,
            rule.pattern_kind.as_str(),
            truncate(&rule.pattern, 28),
            truncate(&category, 24),
            rule.confidence,
            rule.usage_count,
            rule.status,
            rule.source.as_str()
        );
    }

    Ok(())
}

pub fn cmd_rules_add(
    db: &Database,
    tenant: &str,
    pattern: &str,
    category: &str,
    kind: &str,
    confidence: f64,
) -> Result<i64> {
    let kind: PatternKind = kind.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let category = resolve_category(db, tenant, category)?;

    if let Some(existing) = db.find_rule_by_pattern(tenant, pattern, kind)? {
        anyhow::bail!(
            "Rule {} already uses pattern '{}' ({})",
            existing.id,
            existing.pattern,
            kind
        );
    }

    let rule = NewRule::new(tenant, pattern, kind, category.id).with_confidence(confidence);
    let id = db
        .create_rule(&rule)
        .with_context(|| format!("Failed to create rule '{}'", pattern))?;

    println!("✅ Created rule {}: {} '{}' → {}", id, kind, pattern, category.name);
    Ok(id)
}

pub fn cmd_rules_deactivate(db: &Database, id: i64) -> Result<()> {
    let rule = db
        .get_rule(id)?
        .ok_or_else(|| anyhow::anyhow!("Rule {} not found", id))?;
    db.deactivate_rule(id)?;

    println!("✅ Deactivated rule {} ('{}')", id, rule.pattern);
    Ok(())
}

pub fn cmd_rules_test(db: &Database, tenant: &str, config: &EngineConfig, description: &str) -> Result<()> {
    let rules = db.list_matchable_rules(tenant)?;
    let matcher = PatternMatcher::new();
    let matches = matcher.rank_matches(&rules, description, config.classification.rule_min_confidence);

    if matches.is_empty() {
        println!("No rule matches \"{}\"", description);
        return Ok(());
    }

    println!();
    println!("🎯 Matches for \"{}\" (best first)", description);
    for m in matches {
        println!(
            "   [{:>3}] {:<9} {:<28} score {:.3}  specificity {:.2}  conf {:.2}",
            m.rule.id,
            m.rule.pattern_kind.as_str(),
            truncate(&m.rule.pattern, 28),
            m.score,
            m.specificity,
            m.rule.confidence
        );
    }

    Ok(())
}

pub fn cmd_rules_preview(
    db: &Database,
    tenant: &str,
    config: &EngineConfig,
    pattern: &str,
    kind: &str,
    limit: usize,
) -> Result<()> {
    let kind: PatternKind = kind.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let preview = PatternSuggestor::new(db.clone(), &config.clustering)
        .preview_pattern(tenant, pattern, kind, limit)
        .context("Failed to preview pattern")?;

    println!();
    println!(
        "🔎 {} '{}' matches {} of {} transactions (specificity {:.2})",
        preview.kind, preview.pattern, preview.total_matches, preview.scanned, preview.specificity
    );

    if !preview.by_category.is_empty() {
        println!();
        println!("   Current categories:");
        for entry in &preview.by_category {
            let name = match entry.category_id {
                Some(id) => db.get_category(id)?.map(|c| c.name).unwrap_or_default(),
                None => "(uncategorized)".to_string(),
            };
            println!("     {:>5}  {}", entry.count, name);
        }
    }

    if !preview.sample.is_empty() {
        println!();
        println!("   Sample:");
        for m in &preview.sample {
            println!(
                "     [{}] {:>10.2}  {}",
                m.transaction_id,
                m.amount,
                truncate(&m.description, 50)
            );
        }
    }

    Ok(())
}
