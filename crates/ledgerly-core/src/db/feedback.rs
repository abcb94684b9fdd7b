//! Rule feedback operations

use std::collections::HashMap;

use rusqlite::params;

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::{FeedbackKind, RuleFeedback, RuleFeedbackStats};

impl Database {
    /// Append a reviewer verdict on a rule
    pub fn record_rule_feedback(
        &self,
        rule_id: i64,
        transaction_id: i64,
        kind: FeedbackKind,
        new_category_id: Option<i64>,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO rule_feedback (rule_id, transaction_id, kind, new_category_id)
            VALUES (?, ?, ?, ?)
            "#,
            params![rule_id, transaction_id, kind.as_str(), new_category_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Feedback recorded against a rule, oldest first
    pub fn list_rule_feedback(&self, rule_id: i64) -> Result<Vec<RuleFeedback>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, rule_id, transaction_id, kind, new_category_id, created_at
            FROM rule_feedback
            WHERE rule_id = ?
            ORDER BY id
            "#,
        )?;

        let feedback = stmt
            .query_map(params![rule_id], |row| {
                let kind_str: String = row.get(3)?;
                let created_at_str: String = row.get(5)?;
                Ok(RuleFeedback {
                    id: row.get(0)?,
                    rule_id: row.get(1)?,
                    transaction_id: row.get(2)?,
                    kind: kind_str.parse().unwrap_or(FeedbackKind::Correction),
                    new_category_id: row.get(4)?,
                    created_at: parse_datetime(&created_at_str),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(feedback)
    }

    /// Confirmation/correction counts per rule for a tenant
    pub fn rule_feedback_stats(&self, tenant_id: &str) -> Result<HashMap<i64, RuleFeedbackStats>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT f.rule_id,
                   SUM(CASE WHEN f.kind = 'confirmation' THEN 1 ELSE 0 END),
                   SUM(CASE WHEN f.kind = 'correction' THEN 1 ELSE 0 END)
            FROM rule_feedback f
            INNER JOIN rules r ON f.rule_id = r.id
            WHERE r.tenant_id = ?
            GROUP BY f.rule_id
            "#,
        )?;

        let rows = stmt
            .query_map(params![tenant_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    RuleFeedbackStats {
                        confirmations: row.get(1)?,
                        corrections: row.get(2)?,
                    },
                ))
            })?
            .collect::<std::result::Result<HashMap<_, _>, _>>()?;

        Ok(rows)
    }
}
