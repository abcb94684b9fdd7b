//! Category operations

use rusqlite::{params, OptionalExtension};
use tracing::info;

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Category, LedgerGroup, LedgerType, NewCategory};

/// Default chart of categories seeded by `init`
const DEFAULT_CATEGORIES: &[(&str, LedgerType)] = &[
    ("Receita de Vendas", LedgerType::Revenue),
    ("Receita de Serviços", LedgerType::Revenue),
    ("Fornecedores", LedgerType::VariableCost),
    ("Transporte", LedgerType::VariableCost),
    ("Alimentação", LedgerType::VariableCost),
    ("Tarifas Bancárias", LedgerType::FixedCost),
    ("Aluguel", LedgerType::FixedCost),
    ("Software e Assinaturas", LedgerType::FixedCost),
    ("Salários", LedgerType::FixedCost),
    ("Impostos", LedgerType::Tax),
    ("Receitas Financeiras", LedgerType::NonOperational),
    ("Transferências", LedgerType::FinancialMovement),
];

const CATEGORY_COLUMNS: &str =
    "id, tenant_id, name, ledger_type, ledger_group, active, created_at";

impl Database {
    fn row_to_category(row: &rusqlite::Row) -> rusqlite::Result<Category> {
        let ledger_type_str: String = row.get(3)?;
        let ledger_group_str: Option<String> = row.get(4)?;
        let created_at_str: String = row.get(6)?;
        Ok(Category {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            name: row.get(2)?,
            ledger_type: ledger_type_str.parse().unwrap_or(LedgerType::NonOperational),
            ledger_group: ledger_group_str.and_then(|s| s.parse::<LedgerGroup>().ok()),
            active: row.get::<_, i64>(5)? != 0,
            created_at: parse_datetime(&created_at_str),
        })
    }

    /// Create a category, returning its id
    pub fn create_category(&self, category: &NewCategory) -> Result<i64> {
        let name = category.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidData("Category name cannot be empty".into()));
        }

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO categories (tenant_id, name, ledger_type, ledger_group) VALUES (?, ?, ?, ?)",
            params![
                category.tenant_id,
                name,
                category.ledger_type.as_str(),
                category.ledger_group.map(|g| g.as_str()),
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Get a category by id
    pub fn get_category(&self, id: i64) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                &format!("SELECT {} FROM categories WHERE id = ?", CATEGORY_COLUMNS),
                params![id],
                Self::row_to_category,
            )
            .optional()?;
        Ok(category)
    }

    /// Find a category by name (case-insensitive) within a tenant
    pub fn get_category_by_name(&self, tenant_id: &str, name: &str) -> Result<Option<Category>> {
        let conn = self.conn()?;
        let category = conn
            .query_row(
                &format!(
                    "SELECT {} FROM categories WHERE tenant_id = ? AND name = ? COLLATE NOCASE",
                    CATEGORY_COLUMNS
                ),
                params![tenant_id, name.trim()],
                Self::row_to_category,
            )
            .optional()?;
        Ok(category)
    }

    /// List a tenant's categories
    pub fn list_categories(&self, tenant_id: &str, include_inactive: bool) -> Result<Vec<Category>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM categories WHERE tenant_id = ?{} ORDER BY ledger_type, name",
            CATEGORY_COLUMNS,
            if include_inactive { "" } else { " AND active = 1" }
        );
        let mut stmt = conn.prepare(&sql)?;
        let categories = stmt
            .query_map(params![tenant_id], Self::row_to_category)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(categories)
    }

    /// Activate or deactivate a category
    ///
    /// Rules pointing at an inactive category stop matching immediately and
    /// show up as orphans in the health report.
    pub fn set_category_active(&self, id: i64, active: bool) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE categories SET active = ? WHERE id = ?",
            params![active as i64, id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Category {}", id)));
        }
        Ok(())
    }

    /// Update ledger attributes of a category
    pub fn update_category_ledger(
        &self,
        id: i64,
        ledger_type: LedgerType,
        ledger_group: Option<LedgerGroup>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE categories SET ledger_type = ?, ledger_group = ? WHERE id = ?",
            params![ledger_type.as_str(), ledger_group.map(|g| g.as_str()), id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound(format!("Category {}", id)));
        }
        Ok(())
    }

    /// Seed the default chart of categories for a tenant (idempotent)
    pub fn seed_default_categories(&self, tenant_id: &str) -> Result<usize> {
        let conn = self.conn()?;
        let mut inserted = 0;
        for (name, ledger_type) in DEFAULT_CATEGORIES {
            inserted += conn.execute(
                "INSERT OR IGNORE INTO categories (tenant_id, name, ledger_type, ledger_group) VALUES (?, ?, ?, ?)",
                params![
                    tenant_id,
                    name,
                    ledger_type.as_str(),
                    LedgerGroup::for_type(*ledger_type).as_str()
                ],
            )?;
        }
        if inserted > 0 {
            info!(tenant = tenant_id, inserted, "Seeded default categories");
        }
        Ok(inserted)
    }
}
