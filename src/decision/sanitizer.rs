use std::collections::HashSet;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::models::{Direction, Operation, TradingSignal};

/// Hard leverage ceiling for a decision, independent of the venue or configured max
pub const MAX_DECISION_LEVERAGE: u32 = 20;

/// Turns raw backend text into a `TradingSignal`, or the inert fallback.
///
/// Never fails: extraction, parse and validation problems all produce a `hold`
/// on the default symbol with the diagnostic in `reason`.
#[derive(Debug, Clone)]
pub struct DecisionSanitizer {
    allowed_symbols: HashSet<String>,
    default_symbol: String,
}

impl DecisionSanitizer {
    pub fn new<I, S>(allowed_symbols: I, default_symbol: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_symbols: allowed_symbols
                .into_iter()
                .map(|s| s.as_ref().trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            default_symbol: default_symbol.into(),
        }
    }

    /// Allowed symbols in sorted order
    pub fn allowed_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.allowed_symbols.iter().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn default_symbol(&self) -> &str {
        &self.default_symbol
    }

    pub fn fallback(&self, reason: impl Into<String>) -> TradingSignal {
        TradingSignal::fallback(&self.default_symbol, reason)
    }

    pub fn sanitize(&self, raw: &str) -> TradingSignal {
        let json = match extract_json(raw) {
            Some(json) => json,
            None => {
                tracing::warn!("Could not extract JSON from decision response");
                return self.fallback(format!("Response is not JSON: {}", preview(raw, 200)));
            }
        };

        let value: Value = match serde_json::from_str(json) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Decision JSON is invalid: {}", e);
                return self.fallback(format!("JSON parse error: {}", e));
            }
        };

        match self.validate(&value) {
            Ok(signal) => {
                tracing::info!(
                    "Decision: {} {} {}",
                    signal.operation,
                    signal.symbol,
                    signal.direction
                );
                signal
            }
            Err(message) => {
                tracing::warn!("Decision rejected: {}", message);
                self.fallback(format!("Validation failed: {}", message))
            }
        }
    }

    /// Apply the validation rules in order. The first failing rule wins.
    pub fn validate(&self, decision: &Value) -> Result<TradingSignal, String> {
        let reason = decision
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let operation = match decision.get("operation") {
            Some(Value::String(op)) => {
                Operation::parse(op).ok_or_else(|| format!("invalid operation: {}", op))?
            }
            other => return Err(format!("invalid operation: {}", describe(other))),
        };

        let symbol = decision
            .get("symbol")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_uppercase())
            .unwrap_or_default();

        if operation == Operation::Hold {
            let mut signal = self.fallback(reason);
            if !symbol.is_empty() {
                signal.symbol = symbol;
            }
            if let Some(direction) = decision
                .get("direction")
                .and_then(Value::as_str)
                .and_then(Direction::parse)
            {
                signal.direction = direction;
            }
            return Ok(signal);
        }

        if !self.allowed_symbols.contains(&symbol) {
            return Err(format!("symbol not allowed: {:?}", symbol));
        }

        let direction = match decision.get("direction") {
            Some(Value::String(dir)) => {
                Direction::parse(dir).ok_or_else(|| format!("invalid direction: {}", dir))?
            }
            other => return Err(format!("invalid direction: {}", describe(other))),
        };

        let (target_portion_of_balance, leverage) = if operation == Operation::Open {
            let portion = decision
                .get("target_portion_of_balance")
                .and_then(number)
                .filter(|p| *p > Decimal::ZERO && *p <= Decimal::ONE)
                .ok_or_else(|| {
                    format!(
                        "target_portion_of_balance must be 0.0 < x <= 1.0, got {}",
                        describe(decision.get("target_portion_of_balance"))
                    )
                })?;

            let leverage = decision
                .get("leverage")
                .and_then(number)
                .filter(|l| l.fract().is_zero())
                .and_then(|l| l.to_u32())
                .filter(|l| (1..=MAX_DECISION_LEVERAGE).contains(l))
                .ok_or_else(|| {
                    format!(
                        "leverage must be an integer 1-{}, got {}",
                        MAX_DECISION_LEVERAGE,
                        describe(decision.get("leverage"))
                    )
                })?;

            (portion, leverage)
        } else {
            (Decimal::ZERO, 1)
        };

        Ok(TradingSignal {
            operation,
            symbol,
            direction,
            target_portion_of_balance,
            leverage,
            reason,
        })
    }
}

/// Locate the JSON object inside a response that may carry prose or markdown fencing.
///
/// A fenced block is unwrapped first (outermost fence, optional `json` tag), then
/// the text from the first `{` to the last `}` is taken.
pub fn extract_json(content: &str) -> Option<&str> {
    let mut content = content.trim();
    if content.is_empty() {
        return None;
    }

    if let Some(open) = content.find("```") {
        let after_open = &content[open + 3..];
        if let Some(close) = after_open.rfind("```") {
            let inner = &after_open[..close];
            content = inner.strip_prefix("json").unwrap_or(inner).trim();
        }
    }

    let start = content.find('{')?;
    let end = content.rfind('}')?;
    if end <= start {
        return None;
    }

    Some(&content[start..=end])
}

/// Exact decimal value of a JSON number. Strings and booleans are not numbers.
fn number(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        _ => None,
    }
}

fn describe(value: Option<&Value>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "missing".to_string(),
    }
}

fn preview(raw: &str, max_chars: usize) -> String {
    raw.chars().take(max_chars).collect()
}
