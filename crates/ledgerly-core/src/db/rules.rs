//! Rule operations

use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::matcher::validate_pattern_syntax;
use crate::models::{NewRule, PatternKind, Rule, RuleSource, RuleStatus};

const RULE_COLUMNS: &str = "r.id, r.tenant_id, r.pattern, r.pattern_kind, r.category_id, \
     r.confidence, r.active, r.usage_count, r.status, r.source, r.created_at, r.last_used_at";

impl Database {
    fn row_to_rule(row: &rusqlite::Row) -> rusqlite::Result<Rule> {
        let kind_str: String = row.get(3)?;
        let status_str: String = row.get(8)?;
        let source_str: String = row.get(9)?;
        let created_at_str: String = row.get(10)?;
        let last_used_str: Option<String> = row.get(11)?;
        Ok(Rule {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            pattern: row.get(2)?,
            pattern_kind: kind_str.parse().unwrap_or(PatternKind::Contains),
            category_id: row.get(4)?,
            confidence: row.get(5)?,
            active: row.get::<_, i64>(6)? != 0,
            usage_count: row.get(7)?,
            status: status_str.parse().unwrap_or(RuleStatus::Active),
            source: source_str.parse().unwrap_or(RuleSource::Manual),
            created_at: parse_datetime(&created_at_str),
            last_used_at: last_used_str.map(|s| parse_datetime(&s)),
        })
    }

    /// Create a rule after checking its pattern compiles
    pub fn create_rule(&self, rule: &NewRule) -> Result<i64> {
        validate_pattern_syntax(&rule.pattern, rule.pattern_kind)?;
        if !(0.0..=1.0).contains(&rule.confidence) {
            return Err(Error::InvalidData(format!(
                "Rule confidence must be within 0..=1, got {}",
                rule.confidence
            )));
        }

        let conn = self.conn()?;
        let category_tenant: Option<String> = conn
            .query_row(
                "SELECT tenant_id FROM categories WHERE id = ?",
                params![rule.category_id],
                |row| row.get(0),
            )
            .optional()?;
        match category_tenant {
            Some(t) if t == rule.tenant_id => {}
            _ => {
                return Err(Error::NotFound(format!(
                    "Category {} for tenant {}",
                    rule.category_id, rule.tenant_id
                )))
            }
        }

        let active = rule.status != RuleStatus::Deprecated;
        conn.execute(
            r#"
            INSERT INTO rules (tenant_id, pattern, pattern_kind, category_id, confidence, active, status, source)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                rule.tenant_id,
                rule.pattern.trim(),
                rule.pattern_kind.as_str(),
                rule.category_id,
                rule.confidence,
                active as i64,
                rule.status.as_str(),
                rule.source.as_str(),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get a rule by id
    pub fn get_rule(&self, id: i64) -> Result<Option<Rule>> {
        let conn = self.conn()?;
        let rule = conn
            .query_row(
                &format!("SELECT {} FROM rules r WHERE r.id = ?", RULE_COLUMNS),
                params![id],
                Self::row_to_rule,
            )
            .optional()?;
        Ok(rule)
    }

    /// List a tenant's rules
    pub fn list_rules(&self, tenant_id: &str, include_inactive: bool) -> Result<Vec<Rule>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM rules r WHERE r.tenant_id = ?{} ORDER BY r.id",
            RULE_COLUMNS,
            if include_inactive { "" } else { " AND r.active = 1" }
        );
        let mut stmt = conn.prepare(&sql)?;
        let rules = stmt
            .query_map(params![tenant_id], Self::row_to_rule)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    /// Rules eligible for matching: active, not deprecated, pointing at an active category
    pub fn list_matchable_rules(&self, tenant_id: &str) -> Result<Vec<Rule>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"
            SELECT {}
            FROM rules r
            INNER JOIN categories c ON r.category_id = c.id
            WHERE r.tenant_id = ? AND r.active = 1 AND r.status != 'deprecated' AND c.active = 1
            ORDER BY r.id
            "#,
            RULE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rules = stmt
            .query_map(params![tenant_id], Self::row_to_rule)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    /// Find an active rule with the same pattern and kind (case-insensitive)
    pub fn find_rule_by_pattern(
        &self,
        tenant_id: &str,
        pattern: &str,
        kind: PatternKind,
    ) -> Result<Option<Rule>> {
        let conn = self.conn()?;
        let rule = conn
            .query_row(
                &format!(
                    "SELECT {} FROM rules r WHERE r.tenant_id = ? AND r.pattern = ? COLLATE NOCASE \
                     AND r.pattern_kind = ? AND r.active = 1 LIMIT 1",
                    RULE_COLUMNS
                ),
                params![tenant_id, pattern.trim(), kind.as_str()],
                Self::row_to_rule,
            )
            .optional()?;
        Ok(rule)
    }

    /// Count one use of a rule
    ///
    /// The increment happens in SQL so concurrent classifications never lose updates.
    pub fn increment_rule_usage(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE rules SET usage_count = usage_count + 1, last_used_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![id],
        )?;
        Ok(())
    }

    /// Explicitly reset a rule's usage counter
    pub fn reset_rule_usage(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute("UPDATE rules SET usage_count = 0 WHERE id = ?", params![id])?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Rule {}", id)));
        }
        Ok(())
    }

    /// Point a rule at a different category
    pub fn set_rule_category(&self, id: i64, category_id: i64) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE rules SET category_id = ? WHERE id = ?",
            params![category_id, id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Rule {}", id)));
        }
        Ok(())
    }

    /// Change a rule's lifecycle status; deprecated rules are also deactivated
    pub fn set_rule_status(&self, id: i64, status: RuleStatus) -> Result<()> {
        let conn = self.conn()?;
        let active = status != RuleStatus::Deprecated;
        let updated = conn.execute(
            "UPDATE rules SET status = ?, active = ? WHERE id = ?",
            params![status.as_str(), active as i64, id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Rule {}", id)));
        }
        Ok(())
    }

    /// Soft-deactivate a rule
    pub fn deactivate_rule(&self, id: i64) -> Result<()> {
        self.set_rule_status(id, RuleStatus::Deprecated)
    }
}
