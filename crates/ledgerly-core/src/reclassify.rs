//! Historical reclassification when a rule changes category
//!
//! The rule is retargeted first, then every transaction it classified is
//! moved to the new category in fixed-size batches. Each batch commits on its
//! own; a failed batch is recorded on the job and skipped.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ReclassificationConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{BatchError, JobStatus, ReclassificationJob, Rule};

/// Shared flag checked between batches
pub type CancelFlag = Arc<AtomicBool>;

const PREVIEW_SAMPLE: usize = 10;

/// Rough per-transaction cost used for estimates
const MS_PER_TRANSACTION: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReclassifyOptions {
    /// Leave manually categorized rows alone
    pub only_automatic: bool,
    pub batch_size: usize,
}

impl ReclassifyOptions {
    pub fn from_config(config: &ReclassificationConfig) -> Self {
        Self {
            only_automatic: true,
            batch_size: config.batch_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthCount {
    /// `YYYY-MM`
    pub month: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewRow {
    pub transaction_id: i64,
    pub description: String,
    pub amount: f64,
    pub date: String,
    pub manual: bool,
}

/// What a reclassification would touch, without touching it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReclassificationPreview {
    pub rule_id: i64,
    pub current_category_id: Option<i64>,
    pub total: usize,
    pub automatic: usize,
    pub manual: usize,
    /// Rows a run with the same `only_automatic` setting would update
    pub would_update: usize,
    pub by_month: Vec<MonthCount>,
    pub sample: Vec<PreviewRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeEstimate {
    pub seconds: u64,
    pub minutes: u64,
    pub formatted: String,
}

/// Estimate wall time for reclassifying `count` transactions
pub fn estimate_processing_time(count: usize) -> TimeEstimate {
    let ms = count as u64 * MS_PER_TRANSACTION;
    let seconds = ms.div_ceil(1000);
    let minutes = seconds.div_ceil(60);

    let formatted = if seconds < 60 {
        format!("{}s", seconds)
    } else if minutes < 60 {
        format!("{}min", minutes)
    } else {
        format!("{}h {}min", minutes / 60, minutes % 60)
    };

    TimeEstimate {
        seconds,
        minutes,
        formatted,
    }
}

pub struct Reclassifier {
    db: Database,
    config: ReclassificationConfig,
}

impl Reclassifier {
    pub fn new(db: Database, config: &ReclassificationConfig) -> Self {
        Self {
            db,
            config: config.clone(),
        }
    }

    pub fn default_options(&self) -> ReclassifyOptions {
        ReclassifyOptions::from_config(&self.config)
    }

    fn load_rule(&self, rule_id: i64) -> Result<Rule> {
        self.db
            .get_rule(rule_id)?
            .ok_or_else(|| Error::NotFound(format!("Rule {}", rule_id)))
    }

    pub fn preview(&self, rule_id: i64, only_automatic: bool) -> Result<ReclassificationPreview> {
        let rule = self.load_rule(rule_id)?;
        let rows = self.db.list_transactions_by_rule(rule_id, false)?;

        let manual = rows.iter().filter(|t| t.manually_categorized).count();
        let automatic = rows.len() - manual;

        let mut months: BTreeMap<String, usize> = BTreeMap::new();
        for tx in &rows {
            *months.entry(tx.date.format("%Y-%m").to_string()).or_default() += 1;
        }

        let sample = rows
            .iter()
            .take(PREVIEW_SAMPLE)
            .map(|t| PreviewRow {
                transaction_id: t.id,
                description: t.description.clone(),
                amount: t.amount,
                date: t.date.to_string(),
                manual: t.manually_categorized,
            })
            .collect();

        Ok(ReclassificationPreview {
            rule_id,
            current_category_id: rule.category_id,
            total: rows.len(),
            automatic,
            manual,
            would_update: if only_automatic { automatic } else { rows.len() },
            by_month: months
                .into_iter()
                .map(|(month, count)| MonthCount { month, count })
                .collect(),
            sample,
        })
    }

    /// Retarget `rule_id` to `new_category_id` and move its history along
    ///
    /// Validation failures return before anything is written. Once the job
    /// exists, batch failures are recorded on it instead of aborting.
    pub fn run(
        &self,
        rule_id: i64,
        new_category_id: i64,
        options: ReclassifyOptions,
        cancel: Option<&CancelFlag>,
    ) -> Result<ReclassificationJob> {
        if options.batch_size == 0 {
            return Err(Error::InvalidData("Batch size must be at least 1".into()));
        }

        let rule = self.load_rule(rule_id)?;
        let category = self
            .db
            .get_category(new_category_id)?
            .filter(|c| c.tenant_id == rule.tenant_id)
            .ok_or_else(|| Error::NotFound(format!("Category {}", new_category_id)))?;
        if !category.active {
            return Err(Error::InvalidData(format!(
                "Category '{}' is inactive",
                category.name
            )));
        }

        let ids: Vec<i64> = self
            .db
            .list_transactions_by_rule(rule_id, options.only_automatic)?
            .into_iter()
            .map(|t| t.id)
            .collect();

        let job_id = self.db.create_reclassification_job(
            rule_id,
            rule.category_id,
            new_category_id,
            options.only_automatic,
            options.batch_size,
            ids.len() as i64,
        )?;
        self.db.set_rule_category(rule_id, new_category_id)?;

        info!(
            job_id,
            rule_id,
            old_category = ?rule.category_id,
            new_category = new_category_id,
            affected = ids.len(),
            "Reclassification started"
        );

        let total_batches = ids.len().div_ceil(options.batch_size);
        let mut processed: i64 = 0;
        let mut errors: Vec<BatchError> = Vec::new();
        let mut cancelled = false;

        for (index, batch) in ids.chunks(options.batch_size).enumerate() {
            if cancel.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
                info!(job_id, batch = index + 1, "Reclassification cancelled");
                cancelled = true;
                break;
            }

            match self.db.reclassify_batch(batch, rule_id, new_category_id) {
                Ok(updated) => {
                    processed += updated as i64;
                    info!(
                        job_id,
                        "Batch {}/{} done: {}/{}",
                        index + 1,
                        total_batches,
                        processed,
                        ids.len()
                    );
                }
                Err(e) => {
                    warn!(job_id, batch = index + 1, "Batch failed: {}", e);
                    errors.push(BatchError {
                        batch_index: index,
                        transaction_count: batch.len(),
                        message: e.to_string(),
                    });
                }
            }
            self.db.update_job_progress(job_id, processed, &errors)?;
        }

        let status = if !errors.is_empty() {
            JobStatus::Failed
        } else if cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Completed
        };
        self.db.finish_job(job_id, status)?;

        info!(
            job_id,
            processed,
            errors = errors.len(),
            status = %status,
            "Reclassification finished"
        );

        self.get_job(job_id)?
            .ok_or_else(|| Error::NotFound(format!("Reclassification job {}", job_id)))
    }

    pub fn get_job(&self, job_id: i64) -> Result<Option<ReclassificationJob>> {
        self.db.get_reclassification_job(job_id)
    }

    pub fn list_jobs(&self, rule_id: Option<i64>) -> Result<Vec<ReclassificationJob>> {
        self.db.list_reclassification_jobs(rule_id)
    }
}
