//! Transaction operations

use chrono::NaiveDate;
use rusqlite::{params, OptionalExtension, ToSql};

use super::{parse_date, parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{ClassificationResult, NewTransaction, ReviewReason, Transaction};

const TX_COLUMNS: &str = "id, tenant_id, date, description, enriched_description, amount, \
     category_id, suggested_category_id, confidence, provenance, rule_id, manually_categorized, \
     needs_review, review_reason, classified_at, created_at";

/// Filters for listing transactions
#[derive(Debug, Clone)]
pub struct TransactionFilter {
    pub tenant_id: String,
    pub needs_review: Option<bool>,
    /// Only rows without a category
    pub uncategorized: bool,
    pub since: Option<NaiveDate>,
    pub limit: i64,
    pub offset: i64,
}

impl TransactionFilter {
    pub fn new(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            needs_review: None,
            uncategorized: false,
            since: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl Database {
    pub(crate) fn row_to_transaction(row: &rusqlite::Row) -> rusqlite::Result<Transaction> {
        let date_str: String = row.get(2)?;
        let provenance_str: Option<String> = row.get(9)?;
        let reason_json: Option<String> = row.get(13)?;
        let classified_at_str: Option<String> = row.get(14)?;
        let created_at_str: String = row.get(15)?;
        Ok(Transaction {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            date: parse_date(&date_str),
            description: row.get(3)?,
            enriched_description: row.get(4)?,
            amount: row.get(5)?,
            category_id: row.get(6)?,
            suggested_category_id: row.get(7)?,
            confidence: row.get(8)?,
            provenance: provenance_str.and_then(|s| s.parse().ok()),
            rule_id: row.get(10)?,
            manually_categorized: row.get::<_, i64>(11)? != 0,
            needs_review: row.get::<_, i64>(12)? != 0,
            review_reason: reason_json.and_then(|j| serde_json::from_str::<ReviewReason>(&j).ok()),
            classified_at: classified_at_str.map(|s| parse_datetime(&s)),
            created_at: parse_datetime(&created_at_str),
        })
    }

    /// Insert a transaction, returning its id
    pub fn insert_transaction(&self, tx: &NewTransaction) -> Result<i64> {
        if tx.description.trim().is_empty() {
            return Err(Error::InvalidData("Transaction description cannot be empty".into()));
        }
        if !tx.amount.is_finite() {
            return Err(Error::InvalidData(format!("Invalid amount: {}", tx.amount)));
        }

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO transactions (tenant_id, date, description, enriched_description, amount)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                tx.tenant_id,
                tx.date.format("%Y-%m-%d").to_string(),
                tx.description.trim(),
                tx.enriched_description,
                tx.amount,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Get a single transaction by id
    pub fn get_transaction(&self, id: i64) -> Result<Option<Transaction>> {
        let conn = self.conn()?;
        let tx = conn
            .query_row(
                &format!("SELECT {} FROM transactions WHERE id = ?", TX_COLUMNS),
                params![id],
                Self::row_to_transaction,
            )
            .optional()?;
        Ok(tx)
    }

    /// List transactions matching a filter, newest first
    pub fn list_transactions(&self, filter: &TransactionFilter) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;

        let mut sql = format!("SELECT {} FROM transactions WHERE tenant_id = ?", TX_COLUMNS);
        let mut params_vec: Vec<Box<dyn ToSql>> = vec![Box::new(filter.tenant_id.clone())];

        if let Some(review) = filter.needs_review {
            sql.push_str(" AND needs_review = ?");
            params_vec.push(Box::new(review as i64));
        }
        if filter.uncategorized {
            sql.push_str(" AND category_id IS NULL");
        }
        if let Some(since) = filter.since {
            sql.push_str(" AND date >= ?");
            params_vec.push(Box::new(since.format("%Y-%m-%d").to_string()));
        }

        sql.push_str(" ORDER BY date DESC, id DESC LIMIT ? OFFSET ?");
        params_vec.push(Box::new(filter.limit));
        params_vec.push(Box::new(filter.offset));

        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_refs.as_slice(), Self::row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Transactions that still need a classification pass
    ///
    /// Never-classified rows always qualify; rows waiting for review qualify
    /// when `include_review` is set. Manual rows never do.
    pub fn list_pending_classification(
        &self,
        tenant_id: &str,
        include_review: bool,
        limit: i64,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"
            SELECT {} FROM transactions
            WHERE tenant_id = ? AND manually_categorized = 0
              AND (classified_at IS NULL{})
            ORDER BY date, id
            LIMIT ?
            "#,
            TX_COLUMNS,
            if include_review {
                " OR needs_review = 1"
            } else {
                ""
            }
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![tenant_id, limit], Self::row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Persist a classification outcome
    ///
    /// Manually categorized rows are left untouched. Returns whether a row changed.
    pub fn apply_classification(&self, result: &ClassificationResult) -> Result<bool> {
        let reason_json = result
            .reason
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE transactions
            SET category_id = ?, suggested_category_id = ?, confidence = ?, provenance = ?,
                rule_id = ?, needs_review = ?, review_reason = ?, classified_at = CURRENT_TIMESTAMP
            WHERE id = ? AND manually_categorized = 0
            "#,
            params![
                result.category_id,
                result.suggested_category_id,
                result.confidence,
                result.provenance.map(|p| p.as_str()),
                result.rule_id,
                result.needs_review as i64,
                reason_json,
                result.transaction_id,
            ],
        )?;
        Ok(updated > 0)
    }

    /// Record a human decision: manual provenance, full confidence, review cleared
    pub fn set_manual_category(&self, transaction_id: i64, category_id: i64) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            r#"
            UPDATE transactions
            SET category_id = ?, suggested_category_id = NULL, confidence = 1.0,
                provenance = 'manual', manually_categorized = 1, needs_review = 0,
                review_reason = NULL, classified_at = CURRENT_TIMESTAMP
            WHERE id = ?
            "#,
            params![category_id, transaction_id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Transaction {}", transaction_id)));
        }
        Ok(())
    }

    /// Transactions awaiting review, largest amounts first
    pub fn list_review_queue(&self, tenant_id: &str, limit: i64) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE tenant_id = ? AND needs_review = 1
            ORDER BY ABS(amount) DESC, date DESC, id
            LIMIT ?
            "#,
            TX_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![tenant_id, limit], Self::row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Transactions whose originating rule is `rule_id`
    pub fn list_transactions_by_rule(
        &self,
        rule_id: i64,
        only_automatic: bool,
    ) -> Result<Vec<Transaction>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM transactions WHERE rule_id = ?{} ORDER BY id",
            TX_COLUMNS,
            if only_automatic {
                " AND manually_categorized = 0"
            } else {
                ""
            }
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![rule_id], Self::row_to_transaction)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Move one batch of a rule's transactions to a new category
    ///
    /// Runs in a single SQL transaction: either the whole batch commits or
    /// nothing does. Rows awaiting review keep waiting, with the new category
    /// as their hint; manual rows keep manual provenance.
    pub fn reclassify_batch(
        &self,
        transaction_ids: &[i64],
        rule_id: i64,
        new_category_id: i64,
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let sql_tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt = sql_tx.prepare(
                r#"
                UPDATE transactions
                SET category_id = CASE WHEN needs_review = 1 THEN NULL ELSE ?1 END,
                    suggested_category_id = CASE WHEN needs_review = 1 THEN ?1 ELSE NULL END,
                    provenance = CASE WHEN manually_categorized = 1 THEN 'manual' ELSE 'rule' END,
                    classified_at = CURRENT_TIMESTAMP
                WHERE id = ?2 AND rule_id = ?3
                "#,
            )?;
            for id in transaction_ids {
                updated += stmt.execute(params![new_category_id, id, rule_id])?;
            }
        }
        sql_tx.commit()?;
        Ok(updated)
    }

    /// Most recent descriptions of a tenant (samples for rule overlap detection)
    pub fn recent_descriptions(&self, tenant_id: &str, limit: i64) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT COALESCE(NULLIF(TRIM(enriched_description), ''), description)
            FROM transactions
            WHERE tenant_id = ?
            ORDER BY date DESC, id DESC
            LIMIT ?
            "#,
        )?;
        let rows = stmt
            .query_map(params![tenant_id, limit], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Count transactions of a tenant
    pub fn count_transactions(&self, tenant_id: &str) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM transactions WHERE tenant_id = ?",
            params![tenant_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}
