//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ledgerly_core::models::DEFAULT_TENANT;

/// Ledgerly - Classify transactions and keep categorization rules healthy
#[derive(Parser)]
#[command(name = "ledgerly")]
#[command(about = "Transaction classification and rule governance engine", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path
    #[arg(long, default_value = "ledgerly.db", global = true)]
    pub db: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable database encryption (not recommended for production)
    ///
    /// By default, the database is encrypted using SQLCipher.
    /// Set LEDGERLY_DB_KEY environment variable with your passphrase.
    /// Use --no-encrypt only for development or testing.
    #[arg(long, global = true)]
    pub no_encrypt: bool,

    /// Engine configuration file (TOML); defaults to the built-in settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Tenant whose data the command works on
    #[arg(long, default_value = DEFAULT_TENANT, global = true)]
    pub tenant: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and seed the default chart of categories
    Init,

    /// Manage accounting categories
    Categories {
        #[command(subcommand)]
        action: Option<CategoriesAction>,
    },

    /// Manage classification rules
    Rules {
        #[command(subcommand)]
        action: Option<RulesAction>,
    },

    /// Manage transactions (list, add, import)
    Transactions {
        #[command(subcommand)]
        action: Option<TransactionsAction>,
    },

    /// Classify one transaction, or every pending one
    Classify {
        /// Transaction ID (omit to classify all pending transactions)
        id: Option<i64>,

        /// Maximum transactions to process in one run
        #[arg(short, long, default_value = "500")]
        limit: i64,

        /// Show the decisions without saving them
        #[arg(long)]
        dry_run: bool,
    },

    /// Work the review queue
    Review {
        #[command(subcommand)]
        action: Option<ReviewAction>,
    },

    /// Analyze rule health
    Health {
        /// Deactivate orphan rules and rules in the deactivate bucket
        #[arg(long)]
        apply: bool,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run rule maintenance (apply recommendations, promote rules, cluster)
    Maintenance,

    /// Suggest rules from unruled transactions
    Suggest {
        #[command(subcommand)]
        action: Option<SuggestAction>,
    },

    /// Move a rule and its history to another category
    Reclassify {
        /// Rule ID
        rule: i64,

        /// New category (ID or name)
        #[arg(short, long)]
        category: Option<String>,

        /// Also move manually categorized transactions
        #[arg(long)]
        include_manual: bool,

        /// Transactions per batch (defaults to the configured size)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Only show what would change
        #[arg(long)]
        preview: bool,
    },

    /// List reclassification jobs
    Jobs {
        /// Only jobs for this rule
        #[arg(long)]
        rule: Option<i64>,
    },

    /// Inspect or clear the classification cache
    Cache {
        #[command(subcommand)]
        action: Option<CacheAction>,
    },
}

#[derive(Subcommand)]
pub enum CategoriesAction {
    /// List categories
    List {
        /// Include inactive categories
        #[arg(long)]
        all: bool,
    },
    /// Add a category
    Add {
        /// Category name
        name: String,

        /// Ledger type: revenue, variable_cost, fixed_cost, tax, non_operational, financial_movement
        #[arg(short = 't', long = "type")]
        ledger_type: String,

        /// Ledger group (defaults to the type's natural group)
        #[arg(short, long)]
        group: Option<String>,
    },
    /// Deactivate a category (its rules become orphans)
    Deactivate {
        /// Category (ID or name)
        category: String,
    },
}

#[derive(Subcommand)]
pub enum RulesAction {
    /// List rules
    List {
        /// Include deactivated rules
        #[arg(long)]
        all: bool,
    },
    /// Add a rule
    Add {
        /// Pattern to match against descriptions
        pattern: String,

        /// Target category (ID or name)
        #[arg(short, long)]
        category: String,

        /// Pattern kind: exact, contains, wildcard, regex
        #[arg(short, long, default_value = "contains")]
        kind: String,

        /// Rule confidence (0-1)
        #[arg(long, default_value = "0.9")]
        confidence: f64,
    },
    /// Deactivate a rule
    Deactivate {
        /// Rule ID
        id: i64,
    },
    /// Show which rules match a description
    Test {
        /// Description to test
        description: String,
    },
    /// Show what a pattern would match before creating a rule
    Preview {
        /// Pattern to preview
        pattern: String,

        /// Pattern kind: exact, contains, wildcard, regex
        #[arg(short, long, default_value = "contains")]
        kind: String,

        /// Maximum sample rows to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum TransactionsAction {
    /// List recent transactions
    List {
        /// Maximum transactions to show
        #[arg(short, long, default_value = "20")]
        limit: i64,

        /// Only transactions waiting for review
        #[arg(long)]
        review: bool,
    },
    /// Add a single transaction
    Add {
        /// Date (YYYY-MM-DD)
        #[arg(long)]
        date: String,

        /// Bank description
        #[arg(long)]
        description: String,

        /// Signed amount (negative = outflow)
        #[arg(long, allow_hyphen_values = true)]
        amount: f64,
    },
    /// Import transactions from a CSV file (date,description,amount)
    Import {
        /// CSV file to import
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum ReviewAction {
    /// List transactions waiting for review
    List {
        /// Maximum transactions to show
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },
    /// Resolve a transaction with the correct category
    Resolve {
        /// Transaction ID
        id: i64,

        /// Correct category (ID or name)
        #[arg(short, long)]
        category: String,

        /// Also create a rule from the description
        #[arg(long)]
        create_rule: bool,
    },
    /// Pending count by reason
    Stats,
}

#[derive(Subcommand)]
pub enum SuggestAction {
    /// Propose rules from clusters of similar transactions
    Rules,
    /// Find transactions similar to a description
    Similar {
        /// Description to compare
        description: String,

        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Extract a pattern from a single description
    Pattern {
        /// Description to analyze
        description: String,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Drop every cached classification
    Clear,
}
