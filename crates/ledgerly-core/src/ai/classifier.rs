//! Category classification through the AI backend
//!
//! Builds the prompt from the tenant's active categories, sends it through
//! the model fallback chain and maps the answer back to a category id.

use std::fmt::Write as _;

use tracing::debug;

use crate::config::AiConfig;
use crate::error::{Error, Result};
use crate::models::{Category, LedgerType};

use super::fallback::complete_with_fallback;
use super::parsing::parse_classification;
use super::retry::RetryPolicy;
use super::types::{AiVerdict, ChatMessage, CompletionRequest};
use super::AIClient;

const SYSTEM_PREAMBLE: &str = "You are a senior accountant classifying bank transactions for a \
small business. Be strict and never invent facts.

Sign rules (mandatory):
1. A negative amount is money leaving the account. It must be a cost, expense, tax, \
investment or transfer. It can never be revenue.
2. A positive amount is money entering the account. It must be revenue, a loan, a redemption \
or a transfer. It can never be an expense, UNLESS the description says it is a reversal or \
refund (ESTORNO, REEMBOLSO, DEVOLUCAO, REFUND, CHARGEBACK), in which case it may take the \
category of the reversed expense.
3. Loans and receivable advances (EMPRESTIMO, MUTUO, ANTECIPACAO, FIDC) are never revenue.

Ambiguity rule: when the description is generic (for example \"SISPAG FORNECEDORES\", \
\"PIX ENVIADO\", \"TED MESMA TITULARIDADE\") do not guess the counterparty; pick the closest \
generic category and set confidence to exactly 0.5 so a human reviews it.";

const RESPONSE_FORMAT: &str = "Answer ONLY with valid JSON:
{\"category\": \"exact category name from the list\", \"confidence\": 0.85, \"reasoning\": \"short explanation based on the sign and the terms\"}";

fn type_heading(ledger_type: LedgerType) -> &'static str {
    match ledger_type {
        LedgerType::Revenue => "REVENUE",
        LedgerType::VariableCost => "VARIABLE COSTS",
        LedgerType::FixedCost => "FIXED COSTS",
        LedgerType::Tax => "TAXES",
        LedgerType::NonOperational => "NON-OPERATIONAL",
        LedgerType::FinancialMovement => "FINANCIAL MOVEMENTS AND TRANSFERS",
    }
}

/// Classifies transactions with an LLM
#[derive(Clone)]
pub struct AiClassifier {
    client: AIClient,
    models: Vec<String>,
    policy: RetryPolicy,
    temperature: f32,
    max_tokens: u32,
    min_response_chars: usize,
}

impl AiClassifier {
    pub fn new(client: AIClient, config: &AiConfig) -> Self {
        Self {
            client,
            models: config.models.clone(),
            policy: RetryPolicy::from_config(config),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            min_response_chars: config.min_response_chars,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn client(&self) -> &AIClient {
        &self.client
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// System and user messages for one transaction
    pub fn build_messages(description: &str, amount: f64, categories: &[Category]) -> Vec<ChatMessage> {
        let mut system = String::from(SYSTEM_PREAMBLE);
        system.push_str("\n\nAvailable categories:\n");

        for ledger_type in LedgerType::all() {
            let mut in_type = categories
                .iter()
                .filter(|c| c.active && c.ledger_type == *ledger_type)
                .peekable();
            if in_type.peek().is_none() {
                continue;
            }
            let _ = writeln!(system, "\n## {}", type_heading(*ledger_type));
            for category in in_type {
                let _ = writeln!(
                    system,
                    "- {} (type: {}, group: {})",
                    category.name,
                    category.ledger_type,
                    category.ledger_group.map(|g| g.as_str()).unwrap_or("none")
                );
            }
        }

        system.push('\n');
        system.push_str(RESPONSE_FORMAT);

        let direction = if amount < 0.0 { "outflow" } else { "inflow" };
        let user = format!(
            "Transaction: \"{}\"\nAmount: {:.2} ({})",
            description.trim(),
            amount,
            direction
        );

        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }

    /// Classify one transaction against the given categories
    ///
    /// Infrastructure failures surface as errors (`ModelsExhausted`,
    /// `NotConfigured`); an answer naming an unknown category is
    /// `InvalidData`.
    pub async fn classify(
        &self,
        description: &str,
        amount: f64,
        categories: &[Category],
    ) -> Result<AiVerdict> {
        if categories.iter().all(|c| !c.active) {
            return Err(Error::InvalidData("No active categories to classify into".into()));
        }

        let request = CompletionRequest::new(Self::build_messages(description, amount, categories))
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);

        let outcome = complete_with_fallback(
            &self.client,
            &self.models,
            &request,
            &self.policy,
            self.min_response_chars,
        )
        .await?;
        debug!(model = %outcome.model, "AI classification reply: {}", outcome.content);

        let parsed = parse_classification(&outcome.content)?;
        let category = categories
            .iter()
            .filter(|c| c.active)
            .find(|c| c.name.trim().eq_ignore_ascii_case(&parsed.category))
            .or_else(|| {
                let wanted = parsed.category.to_lowercase();
                categories
                    .iter()
                    .filter(|c| c.active)
                    .find(|c| c.name.trim().to_lowercase() == wanted)
            })
            .ok_or_else(|| {
                Error::InvalidData(format!(
                    "AI suggested unknown category '{}'",
                    parsed.category
                ))
            })?;

        Ok(AiVerdict {
            category_id: category.id,
            category_name: category.name.clone(),
            confidence: parsed.confidence,
            reasoning: parsed.reasoning,
            model: outcome.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::mock::{MockBackend, MockReply};
    use crate::models::LedgerGroup;
    use chrono::Utc;
    use std::time::Duration;

    fn category(id: i64, name: &str, ledger_type: LedgerType) -> Category {
        Category {
            id,
            tenant_id: "default".into(),
            name: name.into(),
            ledger_type,
            ledger_group: Some(LedgerGroup::for_type(ledger_type)),
            active: true,
            created_at: Utc::now(),
        }
    }

    fn categories() -> Vec<Category> {
        vec![
            category(1, "Transporte", LedgerType::VariableCost),
            category(2, "Receita de Vendas", LedgerType::Revenue),
            category(3, "Tarifas Bancárias", LedgerType::FixedCost),
        ]
    }

    fn classifier(backend: MockBackend, models: &[&str]) -> AiClassifier {
        let config = AiConfig {
            models: models.iter().map(|m| m.to_string()).collect(),
            ..AiConfig::default()
        };
        AiClassifier::new(AIClient::Mock(backend), &config).with_policy(RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
            hint_buffer: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        })
    }

    #[test]
    fn test_prompt_lists_categories_and_sign_rules() {
        let messages = AiClassifier::build_messages("PIX RECEBIDO", 150.0, &categories());
        let system = &messages[0].content;
        assert!(system.contains("- Transporte (type: variable_cost, group: variable-cost-group)"));
        assert!(system.contains("## REVENUE"));
        assert!(system.contains("never be revenue"));
        assert!(!system.contains("## TAXES"));
        assert!(messages[1].content.contains("Amount: 150.00 (inflow)"));
    }

    #[tokio::test]
    async fn test_maps_category_case_insensitively() {
        let backend = MockBackend::new().script("m1", vec![MockReply::classification("transporte", 88.0)]);
        let verdict = classifier(backend, &["m1"])
            .classify("DEBITO UBER", -25.3, &categories())
            .await
            .unwrap();
        assert_eq!(verdict.category_id, 1);
        assert!((verdict.confidence - 0.88).abs() < 1e-9);
        assert_eq!(verdict.model, "m1");
    }

    #[tokio::test]
    async fn test_unknown_category_is_invalid_data() {
        let backend = MockBackend::new().script("m1", vec![MockReply::classification("Marketing", 0.9)]);
        let err = classifier(backend, &["m1"])
            .classify("GOOGLE ADS", -300.0, &categories())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidData(ref m) if m.contains("Marketing")));
    }

    #[tokio::test]
    async fn test_falls_back_to_second_model() {
        let backend = MockBackend::new()
            .script("m1", vec![MockReply::RateLimited, MockReply::RateLimited])
            .script("m2", vec![MockReply::classification("Tarifas Bancárias", 0.9)]);
        let verdict = classifier(backend.clone(), &["m1", "m2"])
            .classify("TARIFA PACOTE", -45.9, &categories())
            .await
            .unwrap();
        assert_eq!(verdict.category_id, 3);
        assert_eq!(verdict.model, "m2");
        assert_eq!(backend.calls("m1"), 2);
    }
}
