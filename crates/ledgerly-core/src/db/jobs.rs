//! Reclassification job records

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{BatchError, JobStatus, ReclassificationJob};

const JOB_COLUMNS: &str = "id, rule_id, old_category_id, new_category_id, only_automatic, \
     batch_size, status, affected_count, processed_count, errors, started_at, completed_at";

impl Database {
    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<ReclassificationJob> {
        let status_str: String = row.get(6)?;
        let errors_json: String = row.get(9)?;
        let started_at_str: String = row.get(10)?;
        let completed_at_str: Option<String> = row.get(11)?;
        Ok(ReclassificationJob {
            id: row.get(0)?,
            rule_id: row.get(1)?,
            old_category_id: row.get(2)?,
            new_category_id: row.get(3)?,
            only_automatic: row.get::<_, i64>(4)? != 0,
            batch_size: row.get::<_, i64>(5)?.max(1) as usize,
            status: status_str.parse().unwrap_or(JobStatus::Failed),
            affected_count: row.get(7)?,
            processed_count: row.get(8)?,
            errors: serde_json::from_str::<Vec<BatchError>>(&errors_json).unwrap_or_default(),
            started_at: parse_datetime(&started_at_str),
            completed_at: completed_at_str.map(|s| parse_datetime(&s)),
        })
    }

    /// Record a new job in `processing` state
    pub fn create_reclassification_job(
        &self,
        rule_id: i64,
        old_category_id: Option<i64>,
        new_category_id: i64,
        only_automatic: bool,
        batch_size: usize,
        affected_count: i64,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO reclassification_jobs
                (rule_id, old_category_id, new_category_id, only_automatic, batch_size, status, affected_count)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                rule_id,
                old_category_id,
                new_category_id,
                only_automatic as i64,
                batch_size as i64,
                JobStatus::Processing.as_str(),
                affected_count,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Store progress after a batch
    pub fn update_job_progress(
        &self,
        job_id: i64,
        processed_count: i64,
        errors: &[BatchError],
    ) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE reclassification_jobs SET processed_count = ?, errors = ? WHERE id = ?",
            params![processed_count, serde_json::to_string(errors)?, job_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Reclassification job {}", job_id)));
        }
        Ok(())
    }

    /// Move a job to a terminal status and stamp its completion time
    pub fn finish_job(&self, job_id: i64, status: JobStatus) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE reclassification_jobs SET status = ?, completed_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![status.as_str(), job_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Reclassification job {}", job_id)));
        }
        Ok(())
    }

    pub fn get_reclassification_job(&self, job_id: i64) -> Result<Option<ReclassificationJob>> {
        let conn = self.conn()?;
        let job = conn
            .query_row(
                &format!("SELECT {} FROM reclassification_jobs WHERE id = ?", JOB_COLUMNS),
                params![job_id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    /// Jobs, newest first, optionally restricted to one rule
    pub fn list_reclassification_jobs(&self, rule_id: Option<i64>) -> Result<Vec<ReclassificationJob>> {
        let conn = self.conn()?;
        let jobs = match rule_id {
            Some(rule_id) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM reclassification_jobs WHERE rule_id = ? ORDER BY id DESC",
                    JOB_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![rule_id], Self::row_to_job)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM reclassification_jobs ORDER BY id DESC",
                    JOB_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], Self::row_to_job)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(jobs)
    }
}
