//! Rule governance commands: health, maintenance, suggestions, reclassification

use anyhow::{Context, Result};
use ledgerly_core::config::EngineConfig;
use ledgerly_core::health::HealthBucket;
use ledgerly_core::reclassify::estimate_processing_time;
use ledgerly_core::suggest::extract_pattern;
use ledgerly_core::{Database, PatternSuggestor, Reclassifier, RuleHealthAnalyzer};

use super::{resolve_category, truncate};

pub fn cmd_health(db: &Database, tenant: &str, config: &EngineConfig, apply: bool, json: bool) -> Result<()> {
    let analyzer = RuleHealthAnalyzer::new(db.clone(), &config.health, &config.clustering);
    let report = analyzer.analyze(tenant).context("Rule health analysis failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!("🩺 Rule Health: {} / 100 ({})", report.score, report.status);
        println!("   ─────────────────────────────");
        println!("   Rules:            {} ({} active)", report.total_rules, report.active_rules);
        println!("   Avg confidence:   {:.2}", report.avg_confidence);
        println!("   Avg health:       {:.2}", report.avg_health);
        println!("   Conflicts:        {}", report.conflicts.len());
        println!("   Orphans:          {}", report.orphans.len());
        println!(
            "   To deactivate:    {}",
            report.in_bucket(HealthBucket::Deactivate).count()
        );
        println!(
            "   To monitor:       {}",
            report.in_bucket(HealthBucket::Monitor).count()
        );

        for conflict in &report.conflicts {
            println!(
                "   ⚔️  rules {} and {} ({}) both match \"{}\"",
                conflict.rule_a,
                conflict.rule_b,
                conflict.kind,
                truncate(&conflict.example, 40)
            );
        }
        for orphan in &report.orphans {
            println!(
                "   👻 rule {} '{}' is orphaned ({:?})",
                orphan.rule_id, orphan.pattern, orphan.reason
            );
        }
        for alert in &report.alerts {
            println!("   [{:?}] {}", alert.severity, alert.message);
        }
    }

    if apply {
        let applied = analyzer.apply_recommendations(&report)?;
        println!();
        println!(
            "✅ Deactivated {} unhealthy and {} orphan rules",
            applied.rules_deactivated, applied.orphan_rules_deactivated
        );
    }

    Ok(())
}

pub fn cmd_maintenance(db: &Database, tenant: &str, config: &EngineConfig) -> Result<()> {
    println!("🧹 Running rule maintenance...");
    let analyzer = RuleHealthAnalyzer::new(db.clone(), &config.health, &config.clustering);
    let report = analyzer.run_maintenance(tenant).context("Rule maintenance failed")?;

    println!();
    println!("   Rules deactivated:        {}", report.rules_deactivated);
    println!("   Orphan rules deactivated: {}", report.orphan_rules_deactivated);
    println!("   Rules promoted:           {}", report.rules_promoted);
    println!("   Clusters processed:       {}", report.clusters_processed);
    println!("   Rules created:            {}", report.rules_created);
    Ok(())
}

pub fn cmd_suggest_rules(db: &Database, tenant: &str, config: &EngineConfig) -> Result<()> {
    let suggestions = PatternSuggestor::new(db.clone(), &config.clustering)
        .suggest_rules(tenant)
        .context("Failed to build suggestions")?;

    if suggestions.is_empty() {
        println!("No rule suggestions right now.");
        return Ok(());
    }

    println!();
    println!("💡 Rule Suggestions");
    println!("   ─────────────────────────────────────────────────────────────");
    for s in suggestions {
        let category = match s.category_id {
            Some(id) => db.get_category(id)?.map(|c| c.name).unwrap_or_default(),
            None => "(no dominant category)".to_string(),
        };
        println!(
            "   {} '{}' → {}  ({} transactions, confidence {:.2}, cohesion {:.2})",
            s.kind, s.pattern, category, s.transaction_count, s.confidence, s.cohesion
        );
        for example in s.examples.iter().take(3) {
            println!("      e.g. {}", truncate(example, 50));
        }
    }
    Ok(())
}

pub fn cmd_suggest_similar(
    db: &Database,
    tenant: &str,
    config: &EngineConfig,
    description: &str,
    limit: usize,
) -> Result<()> {
    let similar = PatternSuggestor::new(db.clone(), &config.clustering)
        .find_similar_transactions(tenant, description, limit)?;

    if similar.is_empty() {
        println!("No similar transactions found.");
        return Ok(());
    }

    for s in similar {
        println!(
            "   [{:>4}] {:.2}  {}",
            s.transaction_id,
            s.similarity,
            truncate(&s.description, 50)
        );
    }
    Ok(())
}

pub fn cmd_suggest_pattern(description: &str) -> Result<()> {
    let extraction = extract_pattern(description);

    match &extraction.best {
        Some(best) => println!(
            "🎯 {} '{}' ({}, est. precision {:.2})",
            best.kind,
            best.pattern,
            best.strategy.as_str(),
            best.estimated_precision
        ),
        None => println!("No usable pattern in \"{}\"", description),
    }
    for alt in extraction.alternatives.iter().skip(1) {
        println!(
            "   alt: {} '{}' ({}, genericity {:.2})",
            alt.kind,
            alt.pattern,
            alt.strategy.as_str(),
            alt.genericity
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_reclassify(
    db: &Database,
    tenant: &str,
    config: &EngineConfig,
    rule_id: i64,
    category: Option<&str>,
    include_manual: bool,
    batch_size: Option<usize>,
    preview: bool,
) -> Result<()> {
    let reclassifier = Reclassifier::new(db.clone(), &config.reclassification);
    let only_automatic = !include_manual;

    let summary = reclassifier.preview(rule_id, only_automatic)?;
    let estimate = estimate_processing_time(summary.would_update);
    println!();
    println!(
        "🔄 Rule {}: {} transactions ({} automatic, {} manual), {} would move (~{})",
        rule_id,
        summary.total,
        summary.automatic,
        summary.manual,
        summary.would_update,
        estimate.formatted
    );
    for month in &summary.by_month {
        println!("   {}  {:>5}", month.month, month.count);
    }

    if preview {
        for row in &summary.sample {
            println!(
                "   [{:>4}] {} {:>10.2}  {}{}",
                row.transaction_id,
                row.date,
                row.amount,
                truncate(&row.description, 40),
                if row.manual { "  (manual)" } else { "" }
            );
        }
        return Ok(());
    }

    let category = category.ok_or_else(|| anyhow::anyhow!("--category is required unless --preview is set"))?;
    let category = resolve_category(db, tenant, category)?;

    let mut options = reclassifier.default_options();
    options.only_automatic = only_automatic;
    if let Some(size) = batch_size {
        options.batch_size = size;
    }
    let batch_size = options.batch_size;

    let job = reclassifier
        .run(rule_id, category.id, options, None)
        .with_context(|| format!("Failed to reclassify rule {}", rule_id))?;

    println!();
    println!(
        "   Job {} {}: {}/{} moved to {} (batches of {})",
        job.id, job.status, job.processed_count, job.affected_count, category.name, batch_size
    );
    for error in &job.errors {
        println!(
            "   ❌ batch {} ({} transactions): {}",
            error.batch_index + 1,
            error.transaction_count,
            error.message
        );
    }
    Ok(())
}

pub fn cmd_jobs(db: &Database, config: &EngineConfig, rule: Option<i64>) -> Result<()> {
    let jobs = Reclassifier::new(db.clone(), &config.reclassification).list_jobs(rule)?;

    if jobs.is_empty() {
        println!("No reclassification jobs.");
        return Ok(());
    }

    for job in jobs {
        println!(
            "   [{:>3}] rule {} → category {}  {:<10} {}/{}  started {}",
            job.id,
            job.rule_id,
            job.new_category_id,
            job.status.as_str(),
            job.processed_count,
            job.affected_count,
            job.started_at.format("%Y-%m-%d %H:%M")
        );
    }
    Ok(())
}
