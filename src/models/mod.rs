use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the decision asks the engine to do
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Open,
    Close,
    Hold,
}

impl Operation {
    /// Exact (case-sensitive) match against the wire names
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "close" => Some(Self::Close),
            "hold" => Some(Self::Hold),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Hold => "hold",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of the trade a signal refers to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "long" => Some(Self::Long),
            "short" => Some(Self::Short),
            _ => None,
        }
    }

    /// Side of the order that opens a position in this direction
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }

    /// Side of the orders that reduce a position in this direction
    pub fn exit_side(&self) -> OrderSide {
        self.entry_side().opposite()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The sanitized unit of work handed to the execution engine.
///
/// Built once per cycle by the decision sanitizer and never mutated afterwards.
/// A `Hold` signal carries no trading side-effects whatever its other fields say.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradingSignal {
    pub operation: Operation,
    pub symbol: String,
    pub direction: Direction,
    pub target_portion_of_balance: Decimal,
    pub leverage: u32,
    pub reason: String,
}

impl TradingSignal {
    /// The inert decision returned whenever a raw decision cannot be trusted
    pub fn fallback(symbol: &str, reason: impl Into<String>) -> Self {
        Self {
            operation: Operation::Hold,
            symbol: symbol.to_string(),
            direction: Direction::Long,
            target_portion_of_balance: Decimal::ZERO,
            leverage: 1,
            reason: reason.into(),
        }
    }

    pub fn is_hold(&self) -> bool {
        self.operation == Operation::Hold
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which protective leg a trigger order represents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TriggerKind {
    StopLoss,
    TakeProfit,
}

impl TriggerKind {
    /// Binance futures order type for this trigger
    pub fn order_type(&self) -> &'static str {
        match self {
            Self::StopLoss => "STOP_MARKET",
            Self::TakeProfit => "TAKE_PROFIT_MARKET",
        }
    }
}

/// Side of an exchange-held position as reported by the venue
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

/// Exchange-owned position state. Read through the gateway, never built by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    /// `None` when the venue reports an absent or ambiguous side
    pub side: Option<PositionSide>,
    /// Contracts held, reported as an absolute amount
    pub size: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    pub unrealized_pnl: Decimal,
    pub notional_usd: Decimal,
}

/// A resting order on the venue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: String,
    pub quantity: Decimal,
    pub reduce_only: bool,
}

/// Venue acknowledgement of an accepted order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
}

/// Decimal places the venue accepts for a market
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarketPrecision {
    pub price_precision: u32,
    pub quantity_precision: u32,
}

impl Default for MarketPrecision {
    fn default() -> Self {
        Self {
            price_precision: 2,    // 2 decimals for prices
            quantity_precision: 6, // 6 decimals for quantities
        }
    }
}

/// OHLCV candlestick. Indicator math runs in `f64`; order sizes and prices never do.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Snapshot of the account used to build decision context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStatus {
    pub exchange: String,
    pub network: String,
    pub balance_usd: Decimal,
    pub free_balance_usd: Decimal,
    pub open_positions: Vec<Position>,
}
