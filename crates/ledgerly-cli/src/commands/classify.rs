//! Classification and review command implementations

use anyhow::{Context, Result};
use ledgerly_core::config::EngineConfig;
use ledgerly_core::models::ClassificationResult;
use ledgerly_core::{Classifier, Database, ReviewService};

use super::{build_ai, open_cache, resolve_category, save_cache, truncate};

fn category_name(db: &Database, id: Option<i64>) -> Result<String> {
    Ok(match id {
        Some(id) => db
            .get_category(id)?
            .map(|c| c.name)
            .unwrap_or_else(|| format!("#{}", id)),
        None => "-".to_string(),
    })
}

fn print_result(db: &Database, result: &ClassificationResult) -> Result<()> {
    let sources: Vec<&str> = result.attempted_sources.iter().map(|s| s.as_str()).collect();
    if result.needs_review {
        let reason = result.reason.as_ref();
        println!(
            "⚠️  Transaction {} needs review: {}",
            result.transaction_id,
            reason.map(|r| r.code.as_str()).unwrap_or("?")
        );
        if let Some(reason) = reason {
            println!("   {}", reason.message);
        }
        if result.suggested_category_id.is_some() {
            println!(
                "   Hint: {} (confidence {:.2})",
                category_name(db, result.suggested_category_id)?,
                result.confidence
            );
        }
    } else {
        println!(
            "✅ Transaction {} → {} (confidence {:.2}, via {})",
            result.transaction_id,
            category_name(db, result.category_id)?,
            result.confidence,
            result.provenance.map(|p| p.as_str()).unwrap_or("-")
        );
    }
    println!("   Sources tried: {}", sources.join(" → "));
    if let Some(reasoning) = &result.reasoning {
        println!("   Reasoning: {}", reasoning);
    }
    Ok(())
}

pub async fn cmd_classify(
    db: &Database,
    tenant: &str,
    config: &EngineConfig,
    id: Option<i64>,
    limit: i64,
    dry_run: bool,
) -> Result<()> {
    let cache = open_cache(db, tenant, config)?;
    let ai = build_ai(config);
    if ai.is_none() {
        println!("   💡 Tip: Set OPENROUTER_API_KEY (or AI_PROVIDER + key) to enable AI classification");
    }
    let classifier = Classifier::new(db.clone(), cache.clone(), ai, config);

    if dry_run {
        let transactions = match id {
            Some(id) => vec![db
                .get_transaction(id)?
                .ok_or_else(|| anyhow::anyhow!("Transaction {} not found", id))?],
            None => db.list_pending_classification(tenant, true, limit)?,
        };
        println!("🔎 Dry run over {} transactions (nothing is saved)", transactions.len());
        for tx in &transactions {
            println!();
            println!("   {}", truncate(&tx.description, 60));
            let result = classifier
                .evaluate(tx)
                .await
                .with_context(|| format!("Failed to evaluate transaction {}", tx.id))?;
            print_result(db, &result)?;
        }
        return Ok(());
    }

    match id {
        Some(id) => {
            let result = classifier
                .classify(id)
                .await
                .with_context(|| format!("Failed to classify transaction {}", id))?;
            print_result(db, &result)?;
        }
        None => {
            println!("🏷️  Classifying pending transactions...");
            let stats = classifier
                .classify_pending(tenant, limit)
                .await
                .context("Classification run failed")?;

            println!();
            println!("📊 Classification Results");
            println!("   ─────────────────────────────");
            println!("   Processed:       {}", stats.processed);
            println!("   Classified:      {}", stats.classified);
            println!("     from cache:    {}", stats.by_cache);
            println!("     from rules:    {}", stats.by_rule);
            println!("     from AI:       {}", stats.by_ai);
            println!("   Needs review:    {}", stats.needs_review);
            println!("   Rules learned:   {}", stats.rules_learned);
            if stats.errors > 0 {
                println!("   ❌ Errors:        {}", stats.errors);
            }
            if stats.needs_review > 0 {
                println!();
                println!("   Run 'ledgerly review' to work the queue.");
            }
        }
    }

    save_cache(db, tenant, &cache)
}

pub fn cmd_review_list(db: &Database, tenant: &str, config: &EngineConfig, limit: i64) -> Result<()> {
    let service = ReviewService::new(db.clone(), open_cache(db, tenant, config)?);
    let queue = service.get_review_queue(tenant, limit)?;

    if queue.is_empty() {
        println!("✅ Review queue is empty.");
        return Ok(());
    }

    println!();
    println!("🔍 Review Queue (largest amounts first)");
    println!("   ─────────────────────────────────────────────────────────────");

    for item in queue {
        let tx = &item.transaction;
        println!(
            "   [{:>4}] {} │ {:>12.2} │ {}",
            tx.id,
            tx.date,
            tx.amount,
            truncate(&tx.description, 45)
        );
        if let Some(reason) = &item.reason {
            println!("          {}: {}", reason.code, reason.message);
        }
        if let Some(category) = &item.suggested_category {
            let via = item
                .rule
                .as_ref()
                .map(|r| format!(" (rule {} '{}')", r.id, r.pattern))
                .unwrap_or_default();
            println!("          hint: {}{}", category.name, via);
        }
    }

    println!();
    println!("   Resolve with: ledgerly review resolve <id> --category <name>");
    Ok(())
}

pub fn cmd_review_resolve(
    db: &Database,
    tenant: &str,
    config: &EngineConfig,
    id: i64,
    category: &str,
    create_rule: bool,
) -> Result<()> {
    let category = resolve_category(db, tenant, category)?;
    let cache = open_cache(db, tenant, config)?;
    let service = ReviewService::new(db.clone(), cache.clone());

    let outcome = service
        .resolve_review(id, category.id, tenant, create_rule)
        .with_context(|| format!("Failed to resolve transaction {}", id))?;

    println!("✅ Transaction {} → {}", id, category.name);
    if let (Some(kind), Some(rule_id)) = (outcome.feedback, outcome.feedback_rule_id) {
        println!("   Recorded {} for rule {}", kind.as_str(), rule_id);
    }
    match outcome.rule_created {
        Some(rule_id) => println!("   Created rule {}", rule_id),
        None if create_rule => println!("   No new rule (no usable pattern or already covered)"),
        None => {}
    }

    save_cache(db, tenant, &cache)
}

pub fn cmd_review_stats(db: &Database, tenant: &str, config: &EngineConfig) -> Result<()> {
    let service = ReviewService::new(db.clone(), open_cache(db, tenant, config)?);
    let stats = service.review_stats(tenant)?;

    println!();
    println!("🔍 {} transactions waiting for review", stats.pending);
    for (code, count) in &stats.by_reason {
        println!("   {:<26} {:>5}", code, count);
    }
    Ok(())
}
