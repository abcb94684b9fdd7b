//! Transaction command implementations

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use ledgerly_core::models::{NewTransaction, Transaction};
use ledgerly_core::{Database, TransactionFilter};
use serde::Deserialize;

use super::truncate;

/// One row of a generic transaction CSV
#[derive(Debug, Deserialize)]
struct CsvRow {
    date: String,
    description: String,
    amount: String,
    #[serde(default)]
    enriched_description: Option<String>,
}

/// Parse `YYYY-MM-DD` or `DD/MM/YYYY`
pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d/%m/%Y"))
        .with_context(|| format!("Invalid date '{}' (expected YYYY-MM-DD or DD/MM/YYYY)", s))
}

/// Parse an amount written either as `-1234.56` or `-1.234,56`
pub fn parse_amount(s: &str) -> Result<f64> {
    let cleaned: String = s.trim().chars().filter(|c| !c.is_whitespace()).collect();
    let normalized = if cleaned.contains(',') {
        cleaned.replace('.', "").replace(',', ".")
    } else {
        cleaned
    };
    normalized
        .parse::<f64>()
        .ok()
        .filter(|a| a.is_finite())
        .with_context(|| format!("Invalid amount '{}'", s))
}

fn print_transaction(tx: &Transaction) {
    let amount_str = if tx.amount < 0.0 {
        format!("\x1b[31m{:.2}\x1b[0m", tx.amount) // Red for outflows
    } else {
        format!("\x1b[32m+{:.2}\x1b[0m", tx.amount) // Green for inflows
    };
    let state = if tx.needs_review {
        format!(
            "review: {}",
            tx.review_reason
                .as_ref()
                .map(|r| r.code.as_str())
                .unwrap_or("?")
        )
    } else {
        match tx.provenance {
            Some(p) => p.as_str().to_string(),
            None => "-".to_string(),
        }
    };

    println!(
        "   [{:>4}] {} │ {:>20} │ {:<40} │ {}",
        tx.id,
        tx.date,
        amount_str,
        truncate(&tx.description, 40),
        state
    );
}

pub fn cmd_transactions_list(db: &Database, tenant: &str, limit: i64, review: bool) -> Result<()> {
    let mut filter = TransactionFilter::new(tenant);
    filter.limit = limit;
    if review {
        filter.needs_review = Some(true);
    }
    let transactions = db.list_transactions(&filter)?;

    if transactions.is_empty() {
        println!("No transactions found. Import some with:");
        println!("  ledgerly transactions import --file statement.csv");
        return Ok(());
    }

    println!();
    println!("📝 Recent Transactions");
    println!("   ─────────────────────────────────────────────────────────────");

    for tx in &transactions {
        print_transaction(tx);
    }

    Ok(())
}

pub fn cmd_transactions_add(
    db: &Database,
    tenant: &str,
    date: &str,
    description: &str,
    amount: f64,
) -> Result<i64> {
    let date = parse_date(date)?;
    let id = db
        .insert_transaction(&NewTransaction::new(tenant, date, description, amount))
        .context("Failed to add transaction")?;

    println!("✅ Added transaction {}", id);
    Ok(id)
}

/// Load a `date,description,amount[,enriched_description]` CSV
pub fn cmd_transactions_import(db: &Database, tenant: &str, file: &Path) -> Result<usize> {
    println!("📥 Importing {}...", file.display());

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(file)
        .with_context(|| format!("Failed to open {}", file.display()))?;

    let mut imported = 0;
    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        // Header is line 1
        let line = line + 2;
        let row = row.with_context(|| format!("Line {}: malformed row", line))?;

        let mut tx = NewTransaction::new(
            tenant,
            parse_date(&row.date).with_context(|| format!("Line {}", line))?,
            &row.description,
            parse_amount(&row.amount).with_context(|| format!("Line {}", line))?,
        );
        tx.enriched_description = row.enriched_description.filter(|s| !s.trim().is_empty());

        db.insert_transaction(&tx)
            .with_context(|| format!("Line {}: failed to store transaction", line))?;
        imported += 1;
    }

    println!("✅ Imported {} transactions", imported);
    println!("   Classify them with: ledgerly classify");
    Ok(imported)
}
