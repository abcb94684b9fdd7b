//! Accounting sign validation
//!
//! Credits must not land in expense categories and debits must not land in
//! revenue categories, unless the description marks a refund or reversal.
//! The ledger type is checked before the ledger group.

use serde_json::json;

use crate::config::ValidationConfig;
use crate::models::{Category, Polarity, ReasonCode, ReviewReason};

/// Verdict for one candidate classification
#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid,
    /// Sign mismatch accepted because the description names a reversal
    ReversalException { keyword: String },
    Invalid(ReviewReason),
}

impl Validation {
    pub fn is_acceptable(&self) -> bool {
        !matches!(self, Validation::Invalid(_))
    }
}

/// Checks that a category is compatible with the sign of an amount
#[derive(Debug, Clone)]
pub struct AccountingValidator {
    /// Lowercased reversal lexicon
    keywords: Vec<String>,
}

impl AccountingValidator {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &ValidationConfig) -> Self {
        Self::new(&config.reversal_keywords)
    }

    /// First reversal keyword found in a description
    pub fn reversal_keyword(&self, description: &str) -> Option<&str> {
        let lowered = description.to_lowercase();
        self.keywords
            .iter()
            .find(|k| lowered.contains(k.as_str()))
            .map(String::as_str)
    }

    pub fn validate(&self, description: &str, amount: f64, category: &Category) -> Validation {
        let Some(code) = sign_mismatch(amount, category) else {
            return Validation::Valid;
        };

        if let Some(keyword) = self.reversal_keyword(description) {
            return Validation::ReversalException {
                keyword: keyword.to_string(),
            };
        }

        let group = category
            .ledger_group
            .map(|g| g.as_str())
            .unwrap_or("none");
        let direction = if amount > 0.0 { "Credit" } else { "Debit" };
        let message = match code {
            ReasonCode::CreditToExpenseType | ReasonCode::DebitToRevenueType => format!(
                "{} of {:.2} cannot be classified as '{}': ledger type {} (ledger group {}) expects the opposite sign",
                direction, amount, category.name, category.ledger_type, group
            ),
            _ => format!(
                "{} of {:.2} cannot be classified as '{}': ledger group {} (ledger type {}) expects the opposite sign",
                direction, amount, category.name, group, category.ledger_type
            ),
        };

        Validation::Invalid(ReviewReason::new(code, message).with_metadata(json!({
            "amount": amount,
            "ledger_type": category.ledger_type.as_str(),
            "ledger_group": category.ledger_group.map(|g| g.as_str()),
            "category_id": category.id,
        })))
    }
}

fn sign_mismatch(amount: f64, category: &Category) -> Option<ReasonCode> {
    if amount > 0.0 {
        if category.ledger_type.polarity() == Polarity::Outflow {
            return Some(ReasonCode::CreditToExpenseType);
        }
        if category.ledger_group.map(|g| g.polarity()) == Some(Polarity::Outflow) {
            return Some(ReasonCode::CreditToExpenseGroup);
        }
    } else if amount < 0.0 {
        if category.ledger_type.polarity() == Polarity::Inflow {
            return Some(ReasonCode::DebitToRevenueType);
        }
        if category.ledger_group.map(|g| g.polarity()) == Some(Polarity::Inflow) {
            return Some(ReasonCode::DebitToRevenueGroup);
        }
    }
    None
}
