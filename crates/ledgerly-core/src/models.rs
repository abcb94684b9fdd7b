//! Domain models for Ledgerly

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Tenant used when the caller does not resolve one
pub const DEFAULT_TENANT: &str = "default";

// ========== Category Models ==========

/// Which way money must flow for a ledger type or group to make sense
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// Revenue-like: expects credits
    Inflow,
    /// Cost-like: expects debits
    Outflow,
    /// Either sign is acceptable
    Neutral,
}

/// A category's role in the profit-and-loss statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerType {
    Revenue,
    VariableCost,
    FixedCost,
    NonOperational,
    Tax,
    FinancialMovement,
}

impl LedgerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Revenue => "revenue",
            Self::VariableCost => "variable_cost",
            Self::FixedCost => "fixed_cost",
            Self::NonOperational => "non_operational",
            Self::Tax => "tax",
            Self::FinancialMovement => "financial_movement",
        }
    }

    pub fn polarity(&self) -> Polarity {
        match self {
            Self::Revenue => Polarity::Inflow,
            Self::VariableCost | Self::FixedCost | Self::Tax => Polarity::Outflow,
            Self::NonOperational | Self::FinancialMovement => Polarity::Neutral,
        }
    }

    pub fn all() -> &'static [LedgerType] {
        &[
            Self::Revenue,
            Self::VariableCost,
            Self::FixedCost,
            Self::NonOperational,
            Self::Tax,
            Self::FinancialMovement,
        ]
    }
}

impl std::str::FromStr for LedgerType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "revenue" | "income" => Ok(Self::Revenue),
            "variable_cost" => Ok(Self::VariableCost),
            "fixed_cost" | "expense" => Ok(Self::FixedCost),
            "non_operational" => Ok(Self::NonOperational),
            "tax" => Ok(Self::Tax),
            "financial_movement" => Ok(Self::FinancialMovement),
            _ => Err(format!("Unknown ledger type: {}", s)),
        }
    }
}

impl std::fmt::Display for LedgerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarser grouping used for validation cross-checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerGroup {
    #[serde(rename = "revenue-group")]
    Revenue,
    #[serde(rename = "variable-cost-group")]
    VariableCost,
    #[serde(rename = "fixed-cost-group")]
    FixedCost,
    #[serde(rename = "tax-group")]
    Tax,
    #[serde(rename = "non-operational-group")]
    NonOperational,
    #[serde(rename = "financial-movement-group")]
    FinancialMovement,
}

impl LedgerGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Revenue => "revenue-group",
            Self::VariableCost => "variable-cost-group",
            Self::FixedCost => "fixed-cost-group",
            Self::Tax => "tax-group",
            Self::NonOperational => "non-operational-group",
            Self::FinancialMovement => "financial-movement-group",
        }
    }

    pub fn polarity(&self) -> Polarity {
        match self {
            Self::Revenue => Polarity::Inflow,
            Self::VariableCost | Self::FixedCost | Self::Tax => Polarity::Outflow,
            Self::NonOperational | Self::FinancialMovement => Polarity::Neutral,
        }
    }

    /// Natural group for a ledger type
    pub fn for_type(ledger_type: LedgerType) -> Self {
        match ledger_type {
            LedgerType::Revenue => Self::Revenue,
            LedgerType::VariableCost => Self::VariableCost,
            LedgerType::FixedCost => Self::FixedCost,
            LedgerType::Tax => Self::Tax,
            LedgerType::NonOperational => Self::NonOperational,
            LedgerType::FinancialMovement => Self::FinancialMovement,
        }
    }
}

impl std::str::FromStr for LedgerGroup {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.to_lowercase().replace('_', "-");
        let normalized = normalized.trim_end_matches("-group");
        match normalized {
            "revenue" => Ok(Self::Revenue),
            "variable-cost" => Ok(Self::VariableCost),
            "fixed-cost" => Ok(Self::FixedCost),
            "tax" => Ok(Self::Tax),
            "non-operational" => Ok(Self::NonOperational),
            "financial-movement" => Ok(Self::FinancialMovement),
            _ => Err(format!("Unknown ledger group: {}", s)),
        }
    }
}

impl std::fmt::Display for LedgerGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An accounting category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub tenant_id: String,
    pub name: String,
    pub ledger_type: LedgerType,
    pub ledger_group: Option<LedgerGroup>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCategory {
    pub tenant_id: String,
    pub name: String,
    pub ledger_type: LedgerType,
    pub ledger_group: Option<LedgerGroup>,
}

impl NewCategory {
    /// Category whose group follows its ledger type
    pub fn new(tenant_id: &str, name: &str, ledger_type: LedgerType) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            ledger_type,
            ledger_group: Some(LedgerGroup::for_type(ledger_type)),
        }
    }

    pub fn with_group(mut self, group: Option<LedgerGroup>) -> Self {
        self.ledger_group = group;
        self
    }
}

// ========== Rule Models ==========

/// How a rule's pattern is compared against a description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternKind {
    /// Case-insensitive full equality after normalization
    Exact,
    /// Case-insensitive substring match (supports | for OR)
    Contains,
    /// `*` matches any run, `?` a single character
    Wildcard,
    /// Regular expression match
    Regex,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Contains => "contains",
            Self::Wildcard => "wildcard",
            Self::Regex => "regex",
        }
    }
}

impl std::str::FromStr for PatternKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "contains" => Ok(Self::Contains),
            "wildcard" => Ok(Self::Wildcard),
            "regex" => Ok(Self::Regex),
            _ => Err(format!("Unknown pattern kind: {}", s)),
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    /// Trusted, used for matching
    Active,
    /// Used for matching but still gathering evidence
    Monitoring,
    /// Retired by health maintenance or by hand
    Deprecated,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Monitoring => "monitoring",
            Self::Deprecated => "deprecated",
        }
    }
}

impl std::str::FromStr for RuleStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "monitoring" => Ok(Self::Monitoring),
            "deprecated" => Ok(Self::Deprecated),
            _ => Err(format!("Unknown rule status: {}", s)),
        }
    }
}

impl std::fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who authored a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleSource {
    Manual,
    Ai,
    Cluster,
    Review,
}

impl RuleSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Ai => "ai",
            Self::Cluster => "cluster",
            Self::Review => "review",
        }
    }
}

impl std::str::FromStr for RuleSource {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "ai" => Ok(Self::Ai),
            "cluster" => Ok(Self::Cluster),
            "review" => Ok(Self::Review),
            _ => Err(format!("Unknown rule source: {}", s)),
        }
    }
}

/// A pattern rule mapping descriptions to a category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub tenant_id: String,
    pub pattern: String,
    pub pattern_kind: PatternKind,
    /// Nullable so a removed category leaves an orphan instead of a dangling join
    pub category_id: Option<i64>,
    pub confidence: f64,
    pub active: bool,
    pub usage_count: i64,
    pub status: RuleStatus,
    pub source: RuleSource,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// Input for creating a rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub tenant_id: String,
    pub pattern: String,
    pub pattern_kind: PatternKind,
    pub category_id: i64,
    pub confidence: f64,
    pub status: RuleStatus,
    pub source: RuleSource,
}

impl NewRule {
    /// Hand-authored active rule
    pub fn new(tenant_id: &str, pattern: &str, kind: PatternKind, category_id: i64) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            pattern: pattern.to_string(),
            pattern_kind: kind,
            category_id,
            confidence: 0.9,
            status: RuleStatus::Active,
            source: RuleSource::Manual,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_status(mut self, status: RuleStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_source(mut self, source: RuleSource) -> Self {
        self.source = source;
        self
    }
}

// ========== Transaction Models ==========

/// Source that produced a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Cache,
    Rule,
    Ai,
    Manual,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Rule => "rule",
            Self::Ai => "ai",
            Self::Manual => "manual",
        }
    }
}

impl std::str::FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cache" => Ok(Self::Cache),
            "rule" => Ok(Self::Rule),
            "ai" => Ok(Self::Ai),
            "manual" => Ok(Self::Manual),
            _ => Err(format!("Unknown provenance: {}", s)),
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A bank transaction with its classification fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub tenant_id: String,
    pub date: NaiveDate,
    pub description: String,
    pub enriched_description: Option<String>,
    /// Positive = inflow/credit, negative = outflow/debit
    pub amount: f64,
    pub category_id: Option<i64>,
    /// Best-effort category recorded while the transaction awaits review
    pub suggested_category_id: Option<i64>,
    pub confidence: Option<f64>,
    pub provenance: Option<Provenance>,
    pub rule_id: Option<i64>,
    pub manually_categorized: bool,
    pub needs_review: bool,
    pub review_reason: Option<ReviewReason>,
    pub classified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Text used for matching: enriched description when available
    pub fn match_text(&self) -> &str {
        self.enriched_description
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.description)
    }
}

/// Input for creating a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub tenant_id: String,
    pub date: NaiveDate,
    pub description: String,
    pub enriched_description: Option<String>,
    pub amount: f64,
}

impl NewTransaction {
    pub fn new(tenant_id: &str, date: NaiveDate, description: &str, amount: f64) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            date,
            description: description.to_string(),
            enriched_description: None,
            amount,
        }
    }
}

// ========== Review Models ==========

/// Machine-matchable reason a transaction needs review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    NoMatch,
    LowConfidence,
    AiUnavailable,
    CreditToExpenseType,
    DebitToRevenueType,
    CreditToExpenseGroup,
    DebitToRevenueGroup,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoMatch => "NO_MATCH",
            Self::LowConfidence => "LOW_CONFIDENCE",
            Self::AiUnavailable => "AI_UNAVAILABLE",
            Self::CreditToExpenseType => "CREDIT_TO_EXPENSE_TYPE",
            Self::DebitToRevenueType => "DEBIT_TO_REVENUE_TYPE",
            Self::CreditToExpenseGroup => "CREDIT_TO_EXPENSE_GROUP",
            Self::DebitToRevenueGroup => "DEBIT_TO_REVENUE_GROUP",
        }
    }

    /// Whether the code comes from the accounting validator
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::CreditToExpenseType
                | Self::DebitToRevenueType
                | Self::CreditToExpenseGroup
                | Self::DebitToRevenueGroup
        )
    }
}

impl std::str::FromStr for ReasonCode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NO_MATCH" => Ok(Self::NoMatch),
            "LOW_CONFIDENCE" => Ok(Self::LowConfidence),
            "AI_UNAVAILABLE" => Ok(Self::AiUnavailable),
            "CREDIT_TO_EXPENSE_TYPE" => Ok(Self::CreditToExpenseType),
            "DEBIT_TO_REVENUE_TYPE" => Ok(Self::DebitToRevenueType),
            "CREDIT_TO_EXPENSE_GROUP" => Ok(Self::CreditToExpenseGroup),
            "DEBIT_TO_REVENUE_GROUP" => Ok(Self::DebitToRevenueGroup),
            _ => Err(format!("Unknown reason code: {}", s)),
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured failure reason, stored as JSON on the transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewReason {
    pub code: ReasonCode,
    pub message: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl ReviewReason {
    pub fn new(code: ReasonCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Outcome of classifying one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub transaction_id: i64,
    /// Persisted category; `None` whenever review is needed
    pub category_id: Option<i64>,
    /// Best candidate seen, kept as a hint for reviewers
    pub suggested_category_id: Option<i64>,
    pub confidence: f64,
    pub provenance: Option<Provenance>,
    pub rule_id: Option<i64>,
    pub needs_review: bool,
    pub reason: Option<ReviewReason>,
    pub reasoning: Option<String>,
    /// Sources consulted, in order
    pub attempted_sources: Vec<Provenance>,
}

// ========== Rule Feedback Models ==========

/// Whether a reviewer agreed with a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Confirmation,
    Correction,
}

impl FeedbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmation => "confirmation",
            Self::Correction => "correction",
        }
    }
}

impl std::str::FromStr for FeedbackKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "confirmation" => Ok(Self::Confirmation),
            "correction" => Ok(Self::Correction),
            _ => Err(format!("Unknown feedback kind: {}", s)),
        }
    }
}

/// Append-only record of a reviewer's verdict on a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFeedback {
    pub id: i64,
    pub rule_id: i64,
    pub transaction_id: i64,
    pub kind: FeedbackKind,
    pub new_category_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Aggregated feedback counts for one rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleFeedbackStats {
    pub confirmations: i64,
    pub corrections: i64,
}

impl RuleFeedbackStats {
    pub fn total(&self) -> i64 {
        self.confirmations + self.corrections
    }

    /// Share of verdicts that agreed with the rule, if any exist
    pub fn precision(&self) -> Option<f64> {
        if self.total() == 0 {
            None
        } else {
            Some(self.confirmations as f64 / self.total() as f64)
        }
    }
}

// ========== Reclassification Models ==========

/// Lifecycle of a reclassification job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A batch that failed and was rolled back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchError {
    pub batch_index: usize,
    pub transaction_count: usize,
    pub message: String,
}

/// Persistent record of a reclassification run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReclassificationJob {
    pub id: i64,
    pub rule_id: i64,
    pub old_category_id: Option<i64>,
    pub new_category_id: i64,
    pub only_automatic: bool,
    pub batch_size: usize,
    pub status: JobStatus,
    pub affected_count: i64,
    pub processed_count: i64,
    pub errors: Vec<BatchError>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_type_round_trip_and_polarity() {
        for t in LedgerType::all() {
            assert_eq!(t.as_str().parse::<LedgerType>().unwrap(), *t);
        }
        assert_eq!("income".parse::<LedgerType>().unwrap(), LedgerType::Revenue);
        assert_eq!(LedgerType::Tax.polarity(), Polarity::Outflow);
        assert_eq!(LedgerType::FinancialMovement.polarity(), Polarity::Neutral);
        assert!("salary".parse::<LedgerType>().is_err());
    }

    #[test]
    fn test_ledger_group_parsing_accepts_short_forms() {
        assert_eq!(
            "revenue-group".parse::<LedgerGroup>().unwrap(),
            LedgerGroup::Revenue
        );
        assert_eq!(
            "fixed_cost".parse::<LedgerGroup>().unwrap(),
            LedgerGroup::FixedCost
        );
        assert_eq!(
            serde_json::to_string(&LedgerGroup::VariableCost).unwrap(),
            "\"variable-cost-group\""
        );
    }

    #[test]
    fn test_review_reason_serializes_as_tagged_object() {
        let reason = ReviewReason::new(ReasonCode::LowConfidence, "confidence 0.40")
            .with_metadata(serde_json::json!({"confidence": 0.4}));
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["code"], "LOW_CONFIDENCE");
        assert_eq!(json["metadata"]["confidence"], 0.4);

        let back: ReviewReason = serde_json::from_value(json).unwrap();
        assert_eq!(back, reason);
    }

    #[test]
    fn test_feedback_precision() {
        let none = RuleFeedbackStats::default();
        assert_eq!(none.precision(), None);

        let stats = RuleFeedbackStats {
            confirmations: 3,
            corrections: 1,
        };
        assert_eq!(stats.total(), 4);
        assert!((stats.precision().unwrap() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_match_text_prefers_enriched_description() {
        let mut tx = Transaction {
            id: 1,
            tenant_id: DEFAULT_TENANT.into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            description: "PIX 123".into(),
            enriched_description: Some("PIX PADARIA CENTRAL".into()),
            amount: -12.0,
            category_id: None,
            suggested_category_id: None,
            confidence: None,
            provenance: None,
            rule_id: None,
            manually_categorized: false,
            needs_review: false,
            review_reason: None,
            classified_at: None,
            created_at: Utc::now(),
        };
        assert_eq!(tx.match_text(), "PIX PADARIA CENTRAL");

        tx.enriched_description = Some("  ".into());
        assert_eq!(tx.match_text(), "PIX 123");
    }
}
