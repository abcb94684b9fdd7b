//! Review queue and reviewer feedback
//!
//! A human decision is the final word on a transaction: it is stored with
//! manual provenance, fed back to the originating rule as a confirmation or
//! correction, and written to the cache at full confidence.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::cache::{CachedClassification, ClassificationCache};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{
    Category, FeedbackKind, NewRule, Provenance, ReviewReason, Rule, RuleSource, Transaction,
};
use crate::suggest::extract_pattern;

/// A transaction awaiting review with its context
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewItem {
    pub transaction: Transaction,
    pub reason: Option<ReviewReason>,
    pub suggested_category: Option<Category>,
    /// Rule that produced the hint, if any
    pub rule: Option<Rule>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionOutcome {
    pub transaction_id: i64,
    pub category_id: i64,
    /// Verdict recorded against the originating rule
    pub feedback: Option<FeedbackKind>,
    pub feedback_rule_id: Option<i64>,
    pub rule_created: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReviewStats {
    pub pending: usize,
    /// Pending count per reason code
    pub by_reason: BTreeMap<String, usize>,
}

const STATS_SCAN_LIMIT: i64 = 100_000;

pub struct ReviewService {
    db: Database,
    cache: Arc<ClassificationCache>,
}

impl ReviewService {
    pub fn new(db: Database, cache: Arc<ClassificationCache>) -> Self {
        Self { db, cache }
    }

    /// Transactions needing review, largest amounts first
    pub fn get_review_queue(&self, tenant_id: &str, limit: i64) -> Result<Vec<ReviewItem>> {
        let transactions = self.db.list_review_queue(tenant_id, limit)?;

        let mut categories: HashMap<i64, Option<Category>> = HashMap::new();
        let mut rules: HashMap<i64, Option<Rule>> = HashMap::new();
        let mut items = Vec::with_capacity(transactions.len());

        for tx in transactions {
            let suggested_category = match tx.suggested_category_id {
                Some(id) => match categories.get(&id) {
                    Some(cached) => cached.clone(),
                    None => {
                        let category = self.db.get_category(id)?;
                        categories.insert(id, category.clone());
                        category
                    }
                },
                None => None,
            };
            let rule = match tx.rule_id {
                Some(id) => match rules.get(&id) {
                    Some(cached) => cached.clone(),
                    None => {
                        let rule = self.db.get_rule(id)?;
                        rules.insert(id, rule.clone());
                        rule
                    }
                },
                None => None,
            };

            items.push(ReviewItem {
                reason: tx.review_reason.clone(),
                transaction: tx,
                suggested_category,
                rule,
            });
        }

        Ok(items)
    }

    /// Record a reviewer's category for a transaction
    ///
    /// With `create_rule`, a rule is authored from the description when a
    /// usable pattern can be extracted and no equivalent rule exists.
    pub fn resolve_review(
        &self,
        transaction_id: i64,
        category_id: i64,
        tenant_id: &str,
        create_rule: bool,
    ) -> Result<ResolutionOutcome> {
        let tx = self
            .db
            .get_transaction(transaction_id)?
            .filter(|tx| tx.tenant_id == tenant_id)
            .ok_or_else(|| Error::NotFound(format!("Transaction {}", transaction_id)))?;
        let category = self
            .db
            .get_category(category_id)?
            .filter(|c| c.tenant_id == tenant_id)
            .ok_or_else(|| Error::NotFound(format!("Category {}", category_id)))?;
        if !category.active {
            return Err(Error::InvalidData(format!(
                "Category '{}' is inactive",
                category.name
            )));
        }

        let mut outcome = ResolutionOutcome {
            transaction_id,
            category_id,
            feedback: None,
            feedback_rule_id: None,
            rule_created: None,
        };

        self.db.set_manual_category(transaction_id, category_id)?;

        // Feedback only describes a resolution that actually landed
        if let Some(rule) = tx.rule_id.map(|id| self.db.get_rule(id)).transpose()?.flatten() {
            let kind = if rule.category_id == Some(category_id) {
                FeedbackKind::Confirmation
            } else {
                FeedbackKind::Correction
            };
            let new_category = (kind == FeedbackKind::Correction).then_some(category_id);
            self.db
                .record_rule_feedback(rule.id, transaction_id, kind, new_category)?;
            outcome.feedback = Some(kind);
            outcome.feedback_rule_id = Some(rule.id);
        }

        self.cache.set(
            tx.match_text(),
            CachedClassification {
                category_id,
                confidence: 1.0,
                source: Provenance::Manual,
                rule_id: None,
            },
            None,
        );

        if create_rule {
            outcome.rule_created = self.author_rule(&tx, category_id)?;
        }

        info!(
            transaction_id,
            category_id,
            feedback = ?outcome.feedback,
            rule_created = ?outcome.rule_created,
            "Review resolved"
        );
        Ok(outcome)
    }

    fn author_rule(&self, tx: &Transaction, category_id: i64) -> Result<Option<i64>> {
        let Some(best) = extract_pattern(tx.match_text()).best else {
            warn!(transaction_id = tx.id, "No usable pattern in description, rule not created");
            return Ok(None);
        };
        if self
            .db
            .find_rule_by_pattern(&tx.tenant_id, &best.pattern, best.kind)?
            .is_some()
        {
            return Ok(None);
        }

        let rule = NewRule::new(&tx.tenant_id, &best.pattern, best.kind, category_id)
            .with_source(RuleSource::Review);
        Ok(Some(self.db.create_rule(&rule)?))
    }

    /// Pending review count, split by reason code
    pub fn review_stats(&self, tenant_id: &str) -> Result<ReviewStats> {
        let queue = self.db.list_review_queue(tenant_id, STATS_SCAN_LIMIT)?;
        let mut stats = ReviewStats {
            pending: queue.len(),
            ..ReviewStats::default()
        };
        for tx in &queue {
            let code = tx
                .review_reason
                .as_ref()
                .map(|r| r.code.as_str())
                .unwrap_or("UNKNOWN");
            *stats.by_reason.entry(code.to_string()).or_insert(0) += 1;
        }
        Ok(stats)
    }
}
