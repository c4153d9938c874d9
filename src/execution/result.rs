use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Direction, Operation, Position, TradingSignal};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Hold signal, nothing to do
    NoAction,
    /// Nothing actionable on the venue (position already open, or none to close)
    Skipped,
    /// The entry or closing order was accepted
    Filled,
    /// A critical step failed; the cycle stopped at that step
    Error,
}

/// Structured outcome of one signal execution. Doubles as the audit payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub operation: Operation,
    pub symbol: String,
    pub market: String,
    pub direction: Direction,
    pub reason: String,
    pub detail: Option<String>,
    pub entry_price: Option<Decimal>,
    pub size: Option<Decimal>,
    pub leverage: Option<u32>,
    pub stop_loss_price: Option<Decimal>,
    pub take_profit_price: Option<Decimal>,
    pub entry_order: Option<String>,
    pub stop_loss_order: Option<String>,
    pub take_profit_order: Option<String>,
    pub close_order: Option<String>,
    pub existing_position: Option<Position>,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionResult {
    fn base(status: ExecutionStatus, signal: &TradingSignal, market: &str) -> Self {
        Self {
            status,
            operation: signal.operation,
            symbol: signal.symbol.clone(),
            market: market.to_string(),
            direction: signal.direction,
            reason: signal.reason.clone(),
            detail: None,
            entry_price: None,
            size: None,
            leverage: None,
            stop_loss_price: None,
            take_profit_price: None,
            entry_order: None,
            stop_loss_order: None,
            take_profit_order: None,
            close_order: None,
            existing_position: None,
            executed_at: Utc::now(),
        }
    }

    pub fn no_action(signal: &TradingSignal, market: &str) -> Self {
        let mut result = Self::base(ExecutionStatus::NoAction, signal, market);
        if result.reason.is_empty() {
            result.reason = "No action requested (hold)".to_string();
        }
        result
    }

    pub fn skipped(signal: &TradingSignal, market: &str, detail: impl Into<String>) -> Self {
        let mut result = Self::base(ExecutionStatus::Skipped, signal, market);
        result.detail = Some(detail.into());
        result
    }

    pub fn error(signal: &TradingSignal, market: &str, detail: impl Into<String>) -> Self {
        let mut result = Self::base(ExecutionStatus::Error, signal, market);
        result.detail = Some(detail.into());
        result
    }

    pub fn filled(signal: &TradingSignal, market: &str) -> Self {
        Self::base(ExecutionStatus::Filled, signal, market)
    }

    pub fn with_existing_position(mut self, position: Position) -> Self {
        self.existing_position = Some(position);
        self
    }

    /// An open that filled but is missing at least one protective leg
    pub fn is_under_protected(&self) -> bool {
        self.status == ExecutionStatus::Filled
            && self.operation == Operation::Open
            && (self.stop_loss_order.is_none() || self.take_profit_order.is_none())
    }
}
