//! Integration tests for ledgerly-core
//!
//! These tests exercise the classify → review → govern → reclassify workflow
//! against a real (temporary) database.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use ledgerly_core::{
    ai::{AIClient, AiClassifier, MockBackend, MockReply, RetryPolicy},
    cache::{CachedClassification, ClassificationCache},
    config::{AiConfig, EngineConfig},
    db::Database,
    health::{HealthBucket, RuleHealthAnalyzer},
    models::{
        FeedbackKind, JobStatus, LedgerType, NewCategory, NewRule, NewTransaction, PatternKind,
        Provenance, ReasonCode, RuleSource, DEFAULT_TENANT,
    },
    reclassify::{Reclassifier, ReclassifyOptions},
    review::ReviewService,
    Classifier,
};

struct Ledger {
    db: Database,
    config: EngineConfig,
    transporte: i64,
    viagens: i64,
    vendas: i64,
    tarifas: i64,
}

fn ledger() -> Ledger {
    let db = Database::in_memory().expect("Failed to create in-memory database");
    let create = |name: &str, ledger_type| {
        db.create_category(&NewCategory::new(DEFAULT_TENANT, name, ledger_type))
            .expect("Failed to create category")
    };
    let transporte = create("Transporte", LedgerType::VariableCost);
    let viagens = create("Viagens", LedgerType::VariableCost);
    let vendas = create("Receita de Vendas", LedgerType::Revenue);
    let tarifas = create("Tarifas Bancárias", LedgerType::FixedCost);
    Ledger {
        db,
        config: EngineConfig::default(),
        transporte,
        viagens,
        vendas,
        tarifas,
    }
}

fn add_tx(db: &Database, day: u32, description: &str, amount: f64) -> i64 {
    db.insert_transaction(&NewTransaction::new(
        DEFAULT_TENANT,
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap(),
        description,
        amount,
    ))
    .expect("Failed to insert transaction")
}

fn mock_ai(backend: MockBackend) -> AiClassifier {
    let config = AiConfig {
        models: vec!["primary".into(), "fallback".into()],
        ..AiConfig::default()
    };
    AiClassifier::new(AIClient::Mock(backend), &config).with_policy(RetryPolicy {
        max_retries: 1,
        base_delay: Duration::from_millis(1),
        hint_buffer: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
    })
}

fn classifier(l: &Ledger, ai: Option<AiClassifier>) -> Classifier {
    Classifier::new(
        l.db.clone(),
        Arc::new(ClassificationCache::new(&l.config.cache)),
        ai,
        &l.config,
    )
}

// =============================================================================
// Classification
// =============================================================================

#[tokio::test]
async fn test_supplier_payment_never_lands_in_revenue() {
    let l = ledger();
    let rule = l
        .db
        .create_rule(&NewRule::new(DEFAULT_TENANT, "SISPAG", PatternKind::Contains, l.vendas))
        .unwrap();
    let tx_id = add_tx(&l.db, 3, "SISPAG FORNECEDORES LTDA", -4500.0);

    let result = classifier(&l, None).classify(tx_id).await.unwrap();

    assert!(result.needs_review);
    assert_eq!(result.category_id, None);
    assert_eq!(result.suggested_category_id, Some(l.vendas));
    assert_eq!(result.rule_id, Some(rule));
    assert_eq!(result.reason.unwrap().code, ReasonCode::DebitToRevenueType);

    // The rule was selected, so the match counts even though its answer was rejected
    assert_eq!(l.db.get_rule(rule).unwrap().unwrap().usage_count, 1);
}

#[tokio::test]
async fn test_fee_reversal_is_accepted_as_credit() {
    let l = ledger();
    l.db.create_rule(&NewRule::new(DEFAULT_TENANT, "TARIFA", PatternKind::Contains, l.tarifas))
        .unwrap();
    let tx_id = add_tx(&l.db, 4, "ESTORNO TARIFA PACOTE SERVICOS", 29.90);

    let result = classifier(&l, None).classify(tx_id).await.unwrap();

    assert!(!result.needs_review);
    assert_eq!(result.category_id, Some(l.tarifas));
    assert_eq!(result.provenance, Some(Provenance::Rule));
}

#[tokio::test]
async fn test_ai_fallback_then_cache_then_learned_rule() {
    let l = ledger();
    // Primary model is rate limited through its retry; the fallback answers
    let backend = MockBackend::new()
        .script("primary", vec![MockReply::RateLimited, MockReply::RateLimited])
        .script("fallback", vec![MockReply::classification("Transporte", 0.92)]);
    let c = classifier(&l, Some(mock_ai(backend.clone())));

    let first = add_tx(&l.db, 5, "UBER *TRIP HELP.UBER.COM", -32.50);
    let result = c.classify(first).await.unwrap();
    assert_eq!(result.provenance, Some(Provenance::Ai));
    assert_eq!(result.category_id, Some(l.transporte));
    assert_eq!(
        result.attempted_sources,
        vec![Provenance::Cache, Provenance::Rule, Provenance::Ai]
    );
    assert_eq!(backend.calls("primary"), 2);
    assert_eq!(backend.calls("fallback"), 1);

    // Same description, different amount: answered from cache, no AI call
    let second = add_tx(&l.db, 6, "UBER *TRIP HELP.UBER.COM", -18.00);
    let again = c.classify(second).await.unwrap();
    assert_eq!(again.provenance, Some(Provenance::Cache));
    assert_eq!(again.category_id, Some(l.transporte));
    assert_eq!(backend.total_calls(), 3);

    // The accepted answer was turned into a monitoring rule
    let rules = l.db.list_rules(DEFAULT_TENANT, true).unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].source, RuleSource::Ai);
    assert_eq!(rules[0].category_id, Some(l.transporte));
}

#[tokio::test]
async fn test_reclassifying_is_idempotent() {
    let l = ledger();
    let rule = l
        .db
        .create_rule(&NewRule::new(DEFAULT_TENANT, "UBER", PatternKind::Contains, l.transporte))
        .unwrap();
    let c = classifier(&l, None);
    for day in 1..=3 {
        add_tx(&l.db, day, "UBER TRIP", -20.0);
    }

    let stats = c.classify_pending(DEFAULT_TENANT, 100).await.unwrap();
    assert_eq!(stats.processed, 3);
    assert_eq!(stats.classified, 3);
    // The first rule answer is written through; the rest come from the cache
    assert_eq!(stats.by_rule, 1);
    assert_eq!(stats.by_cache, 2);
    assert_eq!(l.db.get_rule(rule).unwrap().unwrap().usage_count, 1);

    // Nothing left to do on the second pass
    let stats = c.classify_pending(DEFAULT_TENANT, 100).await.unwrap();
    assert_eq!(stats.processed, 0);

    let tx = l.db.list_transactions_by_rule(rule, false).unwrap();
    let before: Vec<_> = tx.iter().map(|t| (t.category_id, t.confidence)).collect();
    for t in &tx {
        c.classify(t.id).await.unwrap();
    }
    let after: Vec<_> = l
        .db
        .list_transactions_by_rule(rule, false)
        .unwrap()
        .iter()
        .map(|t| (t.category_id, t.confidence))
        .collect();
    assert_eq!(before, after);
}

#[test]
fn test_cache_evicts_least_accessed_entry() {
    let cache = ClassificationCache::with_limits(chrono::Duration::hours(1), 2);
    let value = |category_id| CachedClassification {
        category_id,
        confidence: 0.9,
        source: Provenance::Ai,
        rule_id: None,
    };

    cache.set("UBER TRIP", value(1), None);
    cache.set("IFOOD PEDIDO", value(2), None);
    assert!(cache.get("UBER TRIP", None).is_some());

    cache.set("POSTO SHELL", value(3), None);

    assert_eq!(cache.len(), 2);
    assert!(cache.get("UBER TRIP", None).is_some());
    assert!(cache.get("IFOOD PEDIDO", None).is_none());
    assert!(cache.get("POSTO SHELL", None).is_some());
}

// =============================================================================
// Review and governance
// =============================================================================

#[tokio::test]
async fn test_review_correction_feeds_rule_health() {
    let l = ledger();
    let rule = l
        .db
        .create_rule(&NewRule::new(DEFAULT_TENANT, "SISPAG", PatternKind::Contains, l.vendas))
        .unwrap();
    let c = classifier(&l, None);
    let review = ReviewService::new(l.db.clone(), c.cache().clone());

    for day in 1..=6 {
        let id = add_tx(&l.db, day, "SISPAG FORNECEDORES", -1000.0 - day as f64);
        c.classify(id).await.unwrap();
    }

    let queue = review.get_review_queue(DEFAULT_TENANT, 50).unwrap();
    assert_eq!(queue.len(), 6);
    assert_eq!(queue[0].rule.as_ref().map(|r| r.id), Some(rule));

    for item in &queue {
        let outcome = review
            .resolve_review(item.transaction.id, l.tarifas, DEFAULT_TENANT, false)
            .unwrap();
        assert_eq!(outcome.feedback, Some(FeedbackKind::Correction));
    }
    assert_eq!(review.review_stats(DEFAULT_TENANT).unwrap().pending, 0);

    let analyzer = RuleHealthAnalyzer::new(l.db.clone(), &l.config.health, &l.config.clustering);
    let report = analyzer.analyze(DEFAULT_TENANT).unwrap();
    let metrics = report
        .metrics
        .iter()
        .find(|m| m.rule_id == rule)
        .expect("rule should be scored");
    assert_eq!(metrics.precision, 0.0);
    // Six corrections plus six selected matches
    assert_eq!(metrics.evidence, 12);
    assert_eq!(metrics.bucket, HealthBucket::Deactivate);

    let applied = analyzer.apply_recommendations(&report).unwrap();
    assert_eq!(applied.rules_deactivated, 1);
    assert!(!l.db.get_rule(rule).unwrap().unwrap().active);

    // The reviewer's answer now comes straight from the cache
    let next = add_tx(&l.db, 20, "SISPAG FORNECEDORES", -999.0);
    let result = c.classify(next).await.unwrap();
    assert_eq!(result.provenance, Some(Provenance::Cache));
    assert_eq!(result.category_id, Some(l.tarifas));
}

// =============================================================================
// Reclassification
// =============================================================================

#[tokio::test]
async fn test_reclassification_skips_manual_rows() {
    let l = ledger();
    let rule = l
        .db
        .create_rule(&NewRule::new(DEFAULT_TENANT, "UBER", PatternKind::Contains, l.transporte))
        .unwrap();
    let c = classifier(&l, None);

    let ids: Vec<i64> = (1..=7).map(|d| add_tx(&l.db, d, "UBER TRIP", -15.0)).collect();
    c.classify_pending(DEFAULT_TENANT, 100).await.unwrap();
    // Two rows get a human decision that happens to agree with the rule
    l.db.set_manual_category(ids[0], l.transporte).unwrap();
    l.db.set_manual_category(ids[1], l.transporte).unwrap();

    let reclassifier = Reclassifier::new(l.db.clone(), &l.config.reclassification);
    let preview = reclassifier.preview(rule, true).unwrap();
    assert_eq!(preview.total, 7);
    assert_eq!(preview.manual, 2);
    assert_eq!(preview.would_update, 5);

    let job = reclassifier
        .run(
            rule,
            l.viagens,
            ReclassifyOptions {
                only_automatic: true,
                batch_size: 2,
            },
            None,
        )
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.affected_count, 5);
    assert_eq!(job.processed_count, 5);

    for (i, id) in ids.iter().enumerate() {
        let tx = l.db.get_transaction(*id).unwrap().unwrap();
        if i < 2 {
            assert_eq!(tx.category_id, Some(l.transporte));
            assert_eq!(tx.provenance, Some(Provenance::Manual));
        } else {
            assert_eq!(tx.category_id, Some(l.viagens));
        }
    }

    // New matches follow the retargeted rule
    let fresh = add_tx(&l.db, 25, "UBER TRIP", -15.0);
    let result = c.classify(fresh).await.unwrap();
    assert_eq!(result.category_id, Some(l.viagens));
}

#[tokio::test]
async fn test_failed_batch_is_recorded_and_others_commit() {
    let l = ledger();
    let rule = l
        .db
        .create_rule(&NewRule::new(DEFAULT_TENANT, "UBER", PatternKind::Contains, l.transporte))
        .unwrap();
    let c = classifier(&l, None);
    let ids: Vec<i64> = (1..=5).map(|d| add_tx(&l.db, d, "UBER TRIP", -15.0)).collect();
    c.classify_pending(DEFAULT_TENANT, 100).await.unwrap();

    // Any write to the third row aborts, taking its whole batch with it
    l.db.conn()
        .unwrap()
        .execute_batch(&format!(
            "CREATE TRIGGER fail_one BEFORE UPDATE OF category_id ON transactions \
             WHEN OLD.id = {} BEGIN SELECT RAISE(ABORT, 'forced failure'); END;",
            ids[2]
        ))
        .unwrap();

    let job = Reclassifier::new(l.db.clone(), &l.config.reclassification)
        .run(
            rule,
            l.viagens,
            ReclassifyOptions {
                only_automatic: true,
                batch_size: 2,
            },
            None,
        )
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.affected_count, 5);
    assert_eq!(job.processed_count, 3);
    assert_eq!(job.errors.len(), 1);
    assert_eq!(job.errors[0].batch_index, 1);
    assert_eq!(job.errors[0].transaction_count, 2);
    assert!(job.errors[0].message.contains("forced failure"));

    let categories: Vec<Option<i64>> = ids
        .iter()
        .map(|id| l.db.get_transaction(*id).unwrap().unwrap().category_id)
        .collect();
    assert_eq!(
        categories,
        vec![
            Some(l.viagens),
            Some(l.viagens),
            Some(l.transporte),
            Some(l.transporte),
            Some(l.viagens),
        ]
    );
}
