use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{
    AccountStatus, Candle, MarketPrecision, OpenOrder, OrderAck, OrderSide, Position, TriggerKind,
};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("no price available for {0}")]
    PriceUnavailable(String),

    #[error("failed to set leverage: {0}")]
    LeverageSetFailed(String),

    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("rate limited by venue")]
    RateLimited,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("request timed out")]
    Timeout,

    #[error("venue error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("failed to decode venue response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Rate-limit and connectivity failures are worth retrying; rejections are not
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Connection(_) | Self::Timeout
        )
    }
}

/// Capability interface onto one derivatives venue.
///
/// Every call reads or mutates exchange-owned state; nothing here caches account,
/// position or order state beyond a single call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketGateway: Send + Sync {
    /// Free (unreserved) quote-currency balance
    async fn get_free_balance(&self) -> Result<Decimal, GatewayError>;

    /// Last traded price. Fails with `PriceUnavailable` when no ticker exists.
    async fn get_current_price(&self, market: &str) -> Result<Decimal, GatewayError>;

    /// Decimal precision rules, `None` when the venue does not disclose them
    async fn get_market_precision(
        &self,
        market: &str,
    ) -> Result<Option<MarketPrecision>, GatewayError>;

    async fn find_open_position(&self, market: &str) -> Result<Option<Position>, GatewayError>;

    async fn list_open_orders(&self, market: &str) -> Result<Vec<OpenOrder>, GatewayError>;

    async fn set_leverage(&self, market: &str, leverage: u32) -> Result<(), GatewayError>;

    async fn place_market_order(
        &self,
        market: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<OrderAck, GatewayError>;

    async fn place_trigger_order(
        &self,
        market: &str,
        side: OrderSide,
        quantity: Decimal,
        trigger_price: Decimal,
        kind: TriggerKind,
        reduce_only: bool,
    ) -> Result<OrderAck, GatewayError>;

    async fn cancel_order(&self, market: &str, order_id: &str) -> Result<(), GatewayError>;

    /// Balances plus every open position, used for decision context
    async fn account_status(&self) -> Result<AccountStatus, GatewayError>;

    /// Most recent `limit` candles, oldest first. The last one may still be forming.
    async fn get_candles(
        &self,
        market: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, GatewayError>;
}

/// Venue market code for an asset, e.g. `BTC` + `USDT` -> `BTCUSDT`
pub fn market_symbol(symbol: &str, quote_asset: &str) -> String {
    let symbol = symbol.trim().to_uppercase();
    if let Some((base, quote)) = symbol.split_once('/') {
        return format!("{}{}", base, quote);
    }
    if symbol.ends_with(&quote_asset.to_uppercase()) && symbol.len() > quote_asset.len() {
        return symbol;
    }
    format!("{}{}", symbol, quote_asset.to_uppercase())
}
