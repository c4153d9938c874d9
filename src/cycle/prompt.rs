use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::path::Path;

use crate::indicators::{TechnicalSnapshot, INDICATOR_INTERVAL};
use crate::models::AccountStatus;

const PORTFOLIO_PLACEHOLDER: &str = "{portfolio}";
const CONTEXT_PLACEHOLDER: &str = "{context}";

pub const DEFAULT_TEMPLATE: &str = "You are a crypto trading AI.\n\n\
Portfolio: {portfolio}\n\n\
Context: {context}\n\n\
Respond with JSON: operation, symbol, direction, target_portion_of_balance, leverage, reason";

/// Renders the decision prompt from a template with `{portfolio}` and `{context}` slots
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    template: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl PromptBuilder {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Read the template file, falling back to the built-in template when it is missing
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(template) => {
                if !template.contains(PORTFOLIO_PLACEHOLDER) {
                    tracing::warn!(
                        "Prompt template {} has no {} placeholder",
                        path.display(),
                        PORTFOLIO_PLACEHOLDER
                    );
                }
                Self::new(template)
            }
            Err(e) => {
                tracing::warn!(
                    "Prompt template {} not readable ({}), using built-in template",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn build(
        &self,
        account: &AccountStatus,
        technicals: &[TechnicalSnapshot],
        prices: &BTreeMap<String, Decimal>,
        allowed_symbols: &[String],
    ) -> Result<String> {
        let portfolio =
            serde_json::to_string_pretty(account).context("Failed to serialize account status")?;
        let context = market_context(technicals, prices, allowed_symbols);

        Ok(self
            .template
            .replace(PORTFOLIO_PLACEHOLDER, &portfolio)
            .replace(CONTEXT_PLACEHOLDER, &context))
    }
}

fn market_context(
    technicals: &[TechnicalSnapshot],
    prices: &BTreeMap<String, Decimal>,
    allowed_symbols: &[String],
) -> String {
    let mut context = String::new();

    if !technicals.is_empty() {
        context.push_str(&format!(
            "=== TECHNICAL INDICATORS ({}) ===\n",
            INDICATOR_INTERVAL
        ));
        for snapshot in technicals {
            context.push_str(&snapshot.render());
        }
        context.push('\n');
    }

    if !prices.is_empty() {
        context.push_str("=== REAL-TIME PRICES ===\n");
        for (ticker, price) in prices {
            context.push_str(&format!("  {}: ${}\n", ticker, price));
        }
        context.push('\n');
    }

    context.push_str(&format!("Tradable symbols: {}", allowed_symbols.join(", ")));
    context
}
