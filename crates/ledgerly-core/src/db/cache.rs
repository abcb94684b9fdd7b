//! Classification cache persistence

use rusqlite::params;

use super::{format_datetime, parse_datetime, Database};
use crate::cache::{CacheEntry, CachedClassification};
use crate::error::Result;
use crate::models::Provenance;

impl Database {
    /// Replace a tenant's stored cache with a snapshot
    pub fn save_cache_entries(&self, tenant_id: &str, entries: &[CacheEntry]) -> Result<usize> {
        let mut conn = self.conn()?;
        let sql_tx = conn.transaction()?;
        sql_tx.execute(
            "DELETE FROM cache_entries WHERE tenant_id = ?",
            params![tenant_id],
        )?;
        {
            let mut stmt = sql_tx.prepare(
                r#"
                INSERT INTO cache_entries
                    (tenant_id, key, normalized, category_id, confidence, source, rule_id, written_at, access_count)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )?;
            for entry in entries {
                stmt.execute(params![
                    tenant_id,
                    entry.key,
                    entry.normalized,
                    entry.value.category_id,
                    entry.value.confidence,
                    entry.value.source.as_str(),
                    entry.value.rule_id,
                    format_datetime(&entry.written_at),
                    entry.access_count as i64,
                ])?;
            }
        }
        sql_tx.commit()?;
        Ok(entries.len())
    }

    /// Load a tenant's stored cache snapshot
    pub fn load_cache_entries(&self, tenant_id: &str) -> Result<Vec<CacheEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT key, normalized, category_id, confidence, source, rule_id, written_at, access_count
            FROM cache_entries
            WHERE tenant_id = ?
            ORDER BY key
            "#,
        )?;

        let entries = stmt
            .query_map(params![tenant_id], |row| {
                let source_str: String = row.get(4)?;
                let written_at_str: String = row.get(6)?;
                Ok(CacheEntry {
                    key: row.get(0)?,
                    normalized: row.get(1)?,
                    value: CachedClassification {
                        category_id: row.get(2)?,
                        confidence: row.get(3)?,
                        source: source_str.parse().unwrap_or(Provenance::Cache),
                        rule_id: row.get(5)?,
                    },
                    written_at: parse_datetime(&written_at_str),
                    access_count: row.get::<_, i64>(7)?.max(0) as u64,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }

    /// Drop a tenant's stored cache
    pub fn clear_cache_entries(&self, tenant_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM cache_entries WHERE tenant_id = ?",
            params![tenant_id],
        )?;
        Ok(deleted)
    }
}
