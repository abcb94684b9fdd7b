//! Database access layer with connection pooling and migrations
//!
//! This module is organized by domain:
//! - `categories` - Accounting categories and the default chart
//! - `rules` - Pattern rules, usage counters and lifecycle status
//! - `transactions` - Transactions and their classification fields
//! - `feedback` - Append-only rule feedback
//! - `cache` - Classification cache snapshots
//! - `jobs` - Reclassification job records

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::error::{Error, Result};

mod cache;
mod categories;
mod feedback;
mod jobs;
mod rules;
mod transactions;

pub use transactions::TransactionFilter;

pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Environment variable for database encryption key
pub const DB_KEY_ENV: &str = "LEDGERLY_DB_KEY";

const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Derive an encryption key from a passphrase using Argon2
///
/// Uses a fixed application salt so the same passphrase always produces the same key,
/// regardless of database path.
fn derive_key(passphrase: &str) -> Result<String> {
    use argon2::{password_hash::SaltString, Argon2, PasswordHasher};

    // Changing this would invalidate all existing encrypted databases
    const APP_SALT: &[u8; 16] = b"ledgerly-salt-v1";

    let salt = SaltString::encode_b64(APP_SALT)
        .map_err(|e| Error::Encryption(format!("Failed to create salt: {}", e)))?;

    let hash = Argon2::default()
        .hash_password(passphrase.as_bytes(), &salt)
        .map_err(|e| Error::Encryption(format!("Failed to derive key: {}", e)))?;

    let hash_str = hash
        .hash
        .ok_or_else(|| Error::Encryption("No hash output".to_string()))?;
    Ok(hex::encode(hash_str.as_bytes()))
}

/// Parse a SQLite datetime string into a DateTime<Utc>
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    // SQLite stores as "YYYY-MM-DD HH:MM:SS" format
    chrono::NaiveDateTime::parse_from_str(s, DATETIME_FORMAT)
        .map(|dt| dt.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc)))
        .unwrap_or_else(|_| Utc::now())
}

/// Format a timestamp the way SQLite's CURRENT_TIMESTAMP does
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(DATETIME_FORMAT).to_string()
}

pub(crate) fn parse_date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap_or_default()
}

/// Database wrapper with connection pooling
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    /// Path to the database file
    db_path: String,
}

impl Database {
    /// Create a new database connection pool with encryption
    ///
    /// Requires `LEDGERLY_DB_KEY` to be set. Use `new_unencrypted()` for
    /// development/testing without encryption.
    pub fn new(path: &str) -> Result<Self> {
        match std::env::var(DB_KEY_ENV).ok() {
            Some(key) => Self::new_with_key(path, Some(&key)),
            None => Err(Error::Encryption(format!(
                "Database encryption required. Set {} environment variable with your passphrase, \
                or use --no-encrypt for unencrypted databases.",
                DB_KEY_ENV
            ))),
        }
    }

    /// Create a new unencrypted database connection pool
    pub fn new_unencrypted(path: &str) -> Result<Self> {
        Self::new_with_key(path, None)
    }

    /// Create a new database with an explicit encryption key
    pub fn new_with_key(path: &str, passphrase: Option<&str>) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);

        let pool = if let Some(pass) = passphrase {
            let key = derive_key(pass)?;
            let key_pragma = format!("PRAGMA key = 'x\"{}\"';", key);

            // Set the key on every new connection
            let manager = manager.with_init(move |conn| {
                conn.execute_batch(&key_pragma)?;
                conn.execute_batch("PRAGMA foreign_keys = ON;")?;
                Ok(())
            });

            Pool::builder().max_size(10).build(manager)?
        } else {
            let manager =
                manager.with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
            Pool::builder().max_size(10).build(manager)?
        };

        let db = Self {
            pool,
            db_path: path.to_string(),
        };
        db.run_migrations()?;

        Ok(db)
    }

    /// Get the path to the database file
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Create a throwaway database (for testing)
    ///
    /// Note: Uses a temporary file rather than `:memory:` because pooled
    /// connections would each see a separate in-memory database.
    pub fn in_memory() -> Result<Self> {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "ledgerly_test_{}_{}.db",
            std::process::id(),
            id
        ));
        let path = path.to_string_lossy().to_string();

        // Remove any leftovers from an earlier run
        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_file(format!("{}-wal", path));
        let _ = std::fs::remove_file(format!("{}-shm", path));

        Self::new_unencrypted(&path)
    }

    /// Get a connection from the pool
    pub fn conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- WAL mode: readers don't block the writer
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;

            -- Accounting categories
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                ledger_type TEXT NOT NULL,             -- revenue, variable_cost, fixed_cost, ...
                ledger_group TEXT,                     -- revenue-group, fixed-cost-group, ...
                active INTEGER NOT NULL DEFAULT 1,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE(tenant_id, name)
            );

            CREATE INDEX IF NOT EXISTS idx_categories_tenant ON categories(tenant_id, active);

            -- Pattern rules
            CREATE TABLE IF NOT EXISTS rules (
                id INTEGER PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                pattern TEXT NOT NULL,
                pattern_kind TEXT NOT NULL,            -- exact, contains, wildcard, regex
                category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                confidence REAL NOT NULL DEFAULT 0.9,
                active INTEGER NOT NULL DEFAULT 1,
                usage_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'active', -- active, monitoring, deprecated
                source TEXT NOT NULL DEFAULT 'manual', -- manual, ai, cluster, review
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                last_used_at DATETIME
            );

            CREATE INDEX IF NOT EXISTS idx_rules_tenant ON rules(tenant_id, active);
            CREATE INDEX IF NOT EXISTS idx_rules_category ON rules(category_id);

            -- Transactions (classification-relevant fields)
            CREATE TABLE IF NOT EXISTS transactions (
                id INTEGER PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                date DATE NOT NULL,
                description TEXT NOT NULL,
                enriched_description TEXT,
                amount REAL NOT NULL,
                category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                suggested_category_id INTEGER REFERENCES categories(id) ON DELETE SET NULL,
                confidence REAL,
                provenance TEXT,                       -- cache, rule, ai, manual
                rule_id INTEGER REFERENCES rules(id) ON DELETE SET NULL,
                manually_categorized INTEGER NOT NULL DEFAULT 0,
                needs_review INTEGER NOT NULL DEFAULT 0,
                review_reason TEXT,                    -- JSON: {code, message, metadata}
                classified_at DATETIME,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                CHECK (manually_categorized = 0 OR (provenance = 'manual' AND needs_review = 0))
            );

            CREATE INDEX IF NOT EXISTS idx_transactions_tenant ON transactions(tenant_id, date);
            CREATE INDEX IF NOT EXISTS idx_transactions_review ON transactions(tenant_id, needs_review);
            CREATE INDEX IF NOT EXISTS idx_transactions_rule ON transactions(rule_id);

            -- Reviewer verdicts on rules (append-only)
            CREATE TABLE IF NOT EXISTS rule_feedback (
                id INTEGER PRIMARY KEY,
                rule_id INTEGER NOT NULL REFERENCES rules(id),
                transaction_id INTEGER NOT NULL REFERENCES transactions(id),
                kind TEXT NOT NULL,                    -- confirmation, correction
                new_category_id INTEGER REFERENCES categories(id),
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE INDEX IF NOT EXISTS idx_rule_feedback_rule ON rule_feedback(rule_id);

            -- Classification cache snapshot
            CREATE TABLE IF NOT EXISTS cache_entries (
                tenant_id TEXT NOT NULL,
                key TEXT NOT NULL,
                normalized TEXT NOT NULL,
                category_id INTEGER NOT NULL,
                confidence REAL NOT NULL,
                source TEXT NOT NULL,
                rule_id INTEGER,
                written_at DATETIME NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (tenant_id, key)
            );

            -- Reclassification jobs
            CREATE TABLE IF NOT EXISTS reclassification_jobs (
                id INTEGER PRIMARY KEY,
                rule_id INTEGER NOT NULL REFERENCES rules(id),
                old_category_id INTEGER,
                new_category_id INTEGER NOT NULL,
                only_automatic INTEGER NOT NULL DEFAULT 1,
                batch_size INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                affected_count INTEGER NOT NULL DEFAULT 0,
                processed_count INTEGER NOT NULL DEFAULT 0,
                errors TEXT NOT NULL DEFAULT '[]',     -- JSON: [{batch_index, transaction_count, message}]
                started_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                completed_at DATETIME
            );

            CREATE INDEX IF NOT EXISTS idx_reclassification_jobs_rule ON reclassification_jobs(rule_id);
            "#,
        )?;

        info!("Database schema initialized");
        Ok(())
    }
}
