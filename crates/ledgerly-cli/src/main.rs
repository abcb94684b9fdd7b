//! Ledgerly CLI - Transaction classification and rule governance
//!
//! Usage:
//!   ledgerly init                          Initialize database and seed categories
//!   ledgerly transactions import --file F  Import a CSV statement
//!   ledgerly classify                      Classify pending transactions
//!   ledgerly review list                   Show the review queue
//!   ledgerly health                        Analyze rule health
//!   ledgerly reclassify 12 -c Marketing    Move a rule and its history

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let tenant = cli.tenant.as_str();

    if let Commands::Init = cli.command {
        return commands::cmd_init(&cli.db, tenant, cli.no_encrypt);
    }

    let config = commands::load_config(cli.config.as_deref())?;
    let db = commands::open_db(&cli.db, cli.no_encrypt)?;

    match cli.command {
        Commands::Init => Ok(()),
        Commands::Categories { action } => match action {
            None | Some(CategoriesAction::List { all: false }) => {
                commands::cmd_categories_list(&db, tenant, false)
            }
            Some(CategoriesAction::List { all: true }) => commands::cmd_categories_list(&db, tenant, true),
            Some(CategoriesAction::Add {
                name,
                ledger_type,
                group,
            }) => commands::cmd_categories_add(&db, tenant, &name, &ledger_type, group.as_deref()),
            Some(CategoriesAction::Deactivate { category }) => {
                commands::cmd_categories_deactivate(&db, tenant, &category)
            }
        },
        Commands::Rules { action } => match action {
            None => commands::cmd_rules_list(&db, tenant, false),
            Some(RulesAction::List { all }) => commands::cmd_rules_list(&db, tenant, all),
            Some(RulesAction::Add {
                pattern,
                category,
                kind,
                confidence,
            }) => commands::cmd_rules_add(&db, tenant, &pattern, &category, &kind, confidence).map(|_| ()),
            Some(RulesAction::Deactivate { id }) => commands::cmd_rules_deactivate(&db, id),
            Some(RulesAction::Test { description }) => {
                commands::cmd_rules_test(&db, tenant, &config, &description)
            }
            Some(RulesAction::Preview { pattern, kind, limit }) => {
                commands::cmd_rules_preview(&db, tenant, &config, &pattern, &kind, limit)
            }
        },
        Commands::Transactions { action } => match action {
            None => commands::cmd_transactions_list(&db, tenant, 20, false),
            Some(TransactionsAction::List { limit, review }) => {
                commands::cmd_transactions_list(&db, tenant, limit, review)
            }
            Some(TransactionsAction::Add {
                date,
                description,
                amount,
            }) => commands::cmd_transactions_add(&db, tenant, &date, &description, amount).map(|_| ()),
            Some(TransactionsAction::Import { file }) => {
                commands::cmd_transactions_import(&db, tenant, &file).map(|_| ())
            }
        },
        Commands::Classify { id, limit, dry_run } => {
            commands::cmd_classify(&db, tenant, &config, id, limit, dry_run).await
        }
        Commands::Review { action } => match action {
            None => commands::cmd_review_list(&db, tenant, &config, 20),
            Some(ReviewAction::List { limit }) => commands::cmd_review_list(&db, tenant, &config, limit),
            Some(ReviewAction::Resolve {
                id,
                category,
                create_rule,
            }) => commands::cmd_review_resolve(&db, tenant, &config, id, &category, create_rule),
            Some(ReviewAction::Stats) => commands::cmd_review_stats(&db, tenant, &config),
        },
        Commands::Health { apply, json } => commands::cmd_health(&db, tenant, &config, apply, json),
        Commands::Maintenance => commands::cmd_maintenance(&db, tenant, &config),
        Commands::Suggest { action } => match action {
            None | Some(SuggestAction::Rules) => commands::cmd_suggest_rules(&db, tenant, &config),
            Some(SuggestAction::Similar { description, limit }) => {
                commands::cmd_suggest_similar(&db, tenant, &config, &description, limit)
            }
            Some(SuggestAction::Pattern { description }) => commands::cmd_suggest_pattern(&description),
        },
        Commands::Reclassify {
            rule,
            category,
            include_manual,
            batch_size,
            preview,
        } => commands::cmd_reclassify(
            &db,
            tenant,
            &config,
            rule,
            category.as_deref(),
            include_manual,
            batch_size,
            preview,
        ),
        Commands::Jobs { rule } => commands::cmd_jobs(&db, &config, rule),
        Commands::Cache { action } => match action {
            None | Some(CacheAction::Stats) => commands::cmd_cache_stats(&db, tenant, &config),
            Some(CacheAction::Clear) => commands::cmd_cache_clear(&db, tenant),
        },
    }
}
