//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `cache` - Cache statistics and clearing
//! - `categories` - Category commands (list, add, deactivate)
//! - `classify` - Classification and review queue commands
//! - `core` - Init and shared utilities (open_db, config, cache snapshot)
//! - `governance` - Rule health, maintenance, suggestions, reclassification
//! - `rules` - Rule commands (list, add, deactivate, test, preview)
//! - `transactions` - Transaction commands (list, add, CSV import)

pub mod cache;
pub mod categories;
pub mod classify;
pub mod core;
pub mod governance;
pub mod rules;
pub mod transactions;

// Re-export command functions for main.rs
pub use cache::*;
pub use categories::*;
pub use classify::*;
pub use core::*;
pub use governance::*;
pub use rules::*;
pub use transactions::*;

/// Truncate a string to a maximum length, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
