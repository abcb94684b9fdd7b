//! Rule health analysis and maintenance
//!
//! Finds orphan and overlapping rules, scores every active rule from its
//! feedback precision, usage and recency, and rolls everything up into a
//! 0-100 health score. Analysis only recommends; `apply_recommendations`
//! and `run_maintenance` act on the findings.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{ClusteringConfig, HealthConfig};
use crate::db::Database;
use crate::error::Result;
use crate::matcher::PatternMatcher;
use crate::models::{Category, PatternKind, Rule, RuleStatus};
use crate::suggest::PatternSuggestor;

/// How two overlapping rules disagree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Different ledger types: the same money lands in different P&L lines
    CrossCategory,
    /// Different categories with the same ledger type
    CategoryMismatch,
    /// Same category
    Duplicate,
}

impl ConflictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CrossCategory => "cross_category",
            Self::CategoryMismatch => "category_mismatch",
            Self::Duplicate => "duplicate",
        }
    }
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Two rules matching the same description
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleConflict {
    pub rule_a: i64,
    pub rule_b: i64,
    pub kind: ConflictKind,
    /// A description both rules match
    pub example: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    NoCategory,
    MissingCategory,
    InactiveCategory,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrphanRule {
    pub rule_id: i64,
    pub pattern: String,
    pub category_id: Option<i64>,
    pub reason: OrphanReason,
}

/// Recommendation for one rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthBucket {
    Healthy,
    Monitor,
    Deactivate,
}

impl HealthBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Monitor => "monitor",
            Self::Deactivate => "deactivate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleMetrics {
    pub rule_id: i64,
    pub pattern: String,
    pub kind: PatternKind,
    pub status: RuleStatus,
    pub category_id: Option<i64>,
    pub confidence: f64,
    pub precision: f64,
    pub usage: f64,
    pub recency: f64,
    pub health: f64,
    /// Feedback count plus uses
    pub evidence: i64,
    pub bucket: HealthBucket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthStatus {
    pub fn from_score(score: u32) -> Self {
        if score >= 90 {
            Self::Excellent
        } else if score >= 75 {
            Self::Good
        } else if score >= 60 {
            Self::Fair
        } else if score >= 40 {
            Self::Poor
        } else {
            Self::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthAlert {
    pub severity: AlertSeverity,
    pub message: String,
    pub rule_ids: Vec<i64>,
}

/// Full health picture of a tenant's rule set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleHealthReport {
    pub tenant_id: String,
    pub total_rules: usize,
    pub active_rules: usize,
    pub orphans: Vec<OrphanRule>,
    pub conflicts: Vec<RuleConflict>,
    pub metrics: Vec<RuleMetrics>,
    pub avg_confidence: f64,
    pub avg_health: f64,
    pub score: u32,
    pub status: HealthStatus,
    pub alerts: Vec<HealthAlert>,
    pub generated_at: DateTime<Utc>,
}

impl RuleHealthReport {
    pub fn in_bucket(&self, bucket: HealthBucket) -> impl Iterator<Item = &RuleMetrics> {
        self.metrics.iter().filter(move |m| m.bucket == bucket)
    }

    pub fn conflict_count(&self, kind: ConflictKind) -> usize {
        self.conflicts.iter().filter(|c| c.kind == kind).count()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AppliedRecommendations {
    pub rules_deactivated: usize,
    pub orphan_rules_deactivated: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MaintenanceReport {
    pub clusters_processed: usize,
    pub rules_created: usize,
    pub rules_deactivated: usize,
    pub orphan_rules_deactivated: usize,
    pub rules_promoted: usize,
}

// ========== Scoring ==========

/// Usage component: saturates at 99 uses
pub fn usage_score(usage_count: i64) -> f64 {
    ((usage_count.max(0) as f64 + 1.0).log10() / 2.0).min(1.0)
}

/// Recency component: 1 when used now, 0 after `horizon_days`
pub fn recency_score(days_since_use: i64, horizon_days: i64) -> f64 {
    if horizon_days <= 0 {
        return 0.0;
    }
    (1.0 - days_since_use.max(0) as f64 / horizon_days as f64).max(0.0)
}

pub fn health_value(precision: f64, usage: f64, recency: f64) -> f64 {
    0.5 * precision + 0.3 * usage + 0.2 * recency
}

fn bucket_for(health: f64, precision: f64, evidence: i64, config: &HealthConfig) -> HealthBucket {
    if health < config.deactivate_health || precision < config.deactivate_precision {
        if evidence >= config.min_evidence {
            HealthBucket::Deactivate
        } else {
            HealthBucket::Monitor
        }
    } else if health < config.review_health || precision < config.review_precision {
        HealthBucket::Monitor
    } else {
        HealthBucket::Healthy
    }
}

/// Counts feeding the 0-100 score
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreInputs {
    pub rule_count: usize,
    pub cross_category: usize,
    pub category_mismatch: usize,
    pub duplicates: usize,
    pub orphans: usize,
    pub deactivate: usize,
    pub avg_confidence: f64,
    pub avg_health: f64,
}

pub fn health_score(inputs: &ScoreInputs) -> u32 {
    if inputs.rule_count == 0 {
        return 100;
    }

    let conflict_penalty = (10 * inputs.cross_category + 5 * inputs.category_mismatch + 2 * inputs.duplicates)
        .min(30) as f64;
    let orphan_penalty = (5 * inputs.orphans).min(20) as f64;
    let deactivate_penalty = (3 * inputs.deactivate).min(15) as f64;

    let mut score = 100.0 - conflict_penalty - orphan_penalty - deactivate_penalty;
    if inputs.avg_confidence >= 0.85 {
        score += 5.0;
    } else if inputs.avg_confidence < 0.70 {
        score -= 10.0;
    }

    let blended = 0.7 * score + 0.3 * 100.0 * inputs.avg_health;
    blended.clamp(0.0, 100.0).round() as u32
}

fn conflict_kind(a: &Category, b: &Category) -> ConflictKind {
    if a.id == b.id {
        ConflictKind::Duplicate
    } else if a.ledger_type != b.ledger_type {
        ConflictKind::CrossCategory
    } else {
        ConflictKind::CategoryMismatch
    }
}

/// Literal sample text of patterns that have one
fn literal_samples(rule: &Rule) -> Vec<String> {
    match rule.pattern_kind {
        PatternKind::Exact => vec![rule.pattern.trim().to_string()],
        PatternKind::Contains => rule
            .pattern
            .split('|')
            .map(|alt| alt.trim().to_string())
            .filter(|alt| !alt.is_empty())
            .collect(),
        PatternKind::Wildcard | PatternKind::Regex => Vec::new(),
    }
}

// ========== Analyzer ==========

pub struct RuleHealthAnalyzer {
    db: Database,
    matcher: PatternMatcher,
    config: HealthConfig,
    clustering: ClusteringConfig,
}

impl RuleHealthAnalyzer {
    pub fn new(db: Database, config: &HealthConfig, clustering: &ClusteringConfig) -> Self {
        Self {
            db,
            matcher: PatternMatcher::new(),
            config: config.clone(),
            clustering: clustering.clone(),
        }
    }

    fn find_conflicts(
        &self,
        tenant_id: &str,
        rules: &[&Rule],
        categories: &HashMap<i64, Category>,
    ) -> Result<Vec<RuleConflict>> {
        let mut samples = self
            .db
            .recent_descriptions(tenant_id, self.config.sample_size as i64)?;
        samples.extend(rules.iter().flat_map(|r| literal_samples(r)));

        let mut seen: BTreeSet<(i64, i64)> = BTreeSet::new();
        let mut conflicts = Vec::new();

        for sample in &samples {
            let matching: Vec<&Rule> = rules
                .iter()
                .copied()
                .filter(|r| self.matcher.evaluate(&r.pattern, r.pattern_kind, sample).matched)
                .collect();
            for (i, a) in matching.iter().enumerate() {
                for b in &matching[i + 1..] {
                    let pair = (a.id.min(b.id), a.id.max(b.id));
                    if !seen.insert(pair) {
                        continue;
                    }
                    let (Some(cat_a), Some(cat_b)) = (
                        a.category_id.and_then(|id| categories.get(&id)),
                        b.category_id.and_then(|id| categories.get(&id)),
                    ) else {
                        continue;
                    };
                    conflicts.push(RuleConflict {
                        rule_a: pair.0,
                        rule_b: pair.1,
                        kind: conflict_kind(cat_a, cat_b),
                        example: sample.clone(),
                    });
                }
            }
        }

        conflicts.sort_by(|a, b| a.kind.cmp(&b.kind).then((a.rule_a, a.rule_b).cmp(&(b.rule_a, b.rule_b))));
        Ok(conflicts)
    }

    /// Analyze a tenant's rules; never mutates anything
    pub fn analyze(&self, tenant_id: &str) -> Result<RuleHealthReport> {
        let now = Utc::now();
        let all_rules = self.db.list_rules(tenant_id, true)?;
        let categories: HashMap<i64, Category> = self
            .db
            .list_categories(tenant_id, true)?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();
        let feedback = self.db.rule_feedback_stats(tenant_id)?;

        let active: Vec<&Rule> = all_rules
            .iter()
            .filter(|r| r.active && r.status != RuleStatus::Deprecated)
            .collect();

        let orphans: Vec<OrphanRule> = active
            .iter()
            .filter_map(|r| {
                let reason = match r.category_id {
                    None => OrphanReason::NoCategory,
                    Some(id) => match categories.get(&id) {
                        None => OrphanReason::MissingCategory,
                        Some(c) if !c.active => OrphanReason::InactiveCategory,
                        Some(_) => return None,
                    },
                };
                Some(OrphanRule {
                    rule_id: r.id,
                    pattern: r.pattern.clone(),
                    category_id: r.category_id,
                    reason,
                })
            })
            .collect();

        let matchable: Vec<&Rule> = active
            .iter()
            .copied()
            .filter(|r| !orphans.iter().any(|o| o.rule_id == r.id))
            .collect();
        let conflicts = self.find_conflicts(tenant_id, &matchable, &categories)?;

        let metrics: Vec<RuleMetrics> = active
            .iter()
            .map(|r| {
                let stats = feedback.get(&r.id).copied().unwrap_or_default();
                let precision = stats.precision().unwrap_or(0.5);
                let usage = usage_score(r.usage_count);
                let last_use = r.last_used_at.unwrap_or(r.created_at);
                let recency = recency_score((now - last_use).num_days(), self.config.recency_days);
                let health = health_value(precision, usage, recency);
                let evidence = stats.total() + r.usage_count;
                RuleMetrics {
                    rule_id: r.id,
                    pattern: r.pattern.clone(),
                    kind: r.pattern_kind,
                    status: r.status,
                    category_id: r.category_id,
                    confidence: r.confidence,
                    precision,
                    usage,
                    recency,
                    health,
                    evidence,
                    bucket: bucket_for(health, precision, evidence, &self.config),
                }
            })
            .collect();

        let mean = |values: Vec<f64>| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        };
        let avg_confidence = mean(active.iter().map(|r| r.confidence).collect());
        let avg_health = mean(metrics.iter().map(|m| m.health).collect());

        let inputs = ScoreInputs {
            rule_count: active.len(),
            cross_category: conflicts.iter().filter(|c| c.kind == ConflictKind::CrossCategory).count(),
            category_mismatch: conflicts
                .iter()
                .filter(|c| c.kind == ConflictKind::CategoryMismatch)
                .count(),
            duplicates: conflicts.iter().filter(|c| c.kind == ConflictKind::Duplicate).count(),
            orphans: orphans.len(),
            deactivate: metrics.iter().filter(|m| m.bucket == HealthBucket::Deactivate).count(),
            avg_confidence,
            avg_health,
        };
        let score = health_score(&inputs);
        let alerts = build_alerts(&inputs, &orphans, &conflicts, &metrics);

        debug!(tenant = tenant_id, score, rules = active.len(), "Rule health analyzed");

        Ok(RuleHealthReport {
            tenant_id: tenant_id.to_string(),
            total_rules: all_rules.len(),
            active_rules: active.len(),
            orphans,
            conflicts,
            metrics,
            avg_confidence,
            avg_health,
            score,
            status: HealthStatus::from_score(score),
            alerts,
            generated_at: now,
        })
    }

    /// Deactivate the `deactivate` bucket and orphan rules of a report
    pub fn apply_recommendations(&self, report: &RuleHealthReport) -> Result<AppliedRecommendations> {
        let mut applied = AppliedRecommendations::default();

        for orphan in &report.orphans {
            self.db.deactivate_rule(orphan.rule_id)?;
            applied.orphan_rules_deactivated += 1;
        }
        for metrics in report.in_bucket(HealthBucket::Deactivate) {
            if report.orphans.iter().any(|o| o.rule_id == metrics.rule_id) {
                continue;
            }
            self.db.deactivate_rule(metrics.rule_id)?;
            applied.rules_deactivated += 1;
        }

        if applied != AppliedRecommendations::default() {
            info!(
                tenant = %report.tenant_id,
                rules = applied.rules_deactivated,
                orphans = applied.orphan_rules_deactivated,
                "Applied rule health recommendations"
            );
        }
        Ok(applied)
    }

    /// Apply recommendations, promote proven monitoring rules and create rules from clusters
    pub fn run_maintenance(&self, tenant_id: &str) -> Result<MaintenanceReport> {
        let report = self.analyze(tenant_id)?;
        let applied = self.apply_recommendations(&report)?;

        let mut rules_promoted = 0;
        for metrics in report.in_bucket(HealthBucket::Healthy) {
            if metrics.status == RuleStatus::Monitoring
                && metrics.evidence >= self.config.min_evidence
                && !report.orphans.iter().any(|o| o.rule_id == metrics.rule_id)
            {
                self.db.set_rule_status(metrics.rule_id, RuleStatus::Active)?;
                rules_promoted += 1;
            }
        }

        let clusters = PatternSuggestor::new(self.db.clone(), &self.clustering).process_clusters(tenant_id)?;

        let result = MaintenanceReport {
            clusters_processed: clusters.clusters_processed,
            rules_created: clusters.rules_created,
            rules_deactivated: applied.rules_deactivated,
            orphan_rules_deactivated: applied.orphan_rules_deactivated,
            rules_promoted,
        };
        info!(
            tenant = tenant_id,
            clusters = result.clusters_processed,
            created = result.rules_created,
            deactivated = result.rules_deactivated,
            orphans = result.orphan_rules_deactivated,
            promoted = result.rules_promoted,
            "Rule maintenance finished"
        );
        Ok(result)
    }
}

fn build_alerts(
    inputs: &ScoreInputs,
    orphans: &[OrphanRule],
    conflicts: &[RuleConflict],
    metrics: &[RuleMetrics],
) -> Vec<HealthAlert> {
    let mut alerts = Vec::new();
    let conflict_ids = |kind: ConflictKind| -> Vec<i64> {
        let ids: BTreeSet<i64> = conflicts
            .iter()
            .filter(|c| c.kind == kind)
            .flat_map(|c| [c.rule_a, c.rule_b])
            .collect();
        ids.into_iter().collect()
    };

    if inputs.cross_category > 0 {
        alerts.push(HealthAlert {
            severity: AlertSeverity::Error,
            message: format!(
                "{} rule pair(s) send the same descriptions to different ledger types",
                inputs.cross_category
            ),
            rule_ids: conflict_ids(ConflictKind::CrossCategory),
        });
    }
    if !orphans.is_empty() {
        alerts.push(HealthAlert {
            severity: AlertSeverity::Warning,
            message: format!("{} active rule(s) point at no usable category", orphans.len()),
            rule_ids: orphans.iter().map(|o| o.rule_id).collect(),
        });
    }
    if inputs.deactivate > 0 {
        alerts.push(HealthAlert {
            severity: AlertSeverity::Warning,
            message: format!("{} rule(s) should be deactivated", inputs.deactivate),
            rule_ids: metrics
                .iter()
                .filter(|m| m.bucket == HealthBucket::Deactivate)
                .map(|m| m.rule_id)
                .collect(),
        });
    }
    if inputs.category_mismatch > 0 {
        alerts.push(HealthAlert {
            severity: AlertSeverity::Warning,
            message: format!(
                "{} rule pair(s) overlap with different categories",
                inputs.category_mismatch
            ),
            rule_ids: conflict_ids(ConflictKind::CategoryMismatch),
        });
    }
    if inputs.duplicates > 0 {
        alerts.push(HealthAlert {
            severity: AlertSeverity::Info,
            message: format!("{} redundant rule pair(s)", inputs.duplicates),
            rule_ids: conflict_ids(ConflictKind::Duplicate),
        });
    }
    if inputs.rule_count > 0 && inputs.avg_confidence < 0.70 {
        alerts.push(HealthAlert {
            severity: AlertSeverity::Info,
            message: format!("Average rule confidence is low ({:.2})", inputs.avg_confidence),
            rule_ids: Vec::new(),
        });
    }

    alerts
}
