use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::execution::gateway::{GatewayError, MarketGateway};
use crate::models::{
    AccountStatus, Candle, MarketPrecision, OpenOrder, OrderAck, OrderSide, Position,
    PositionSide, TriggerKind,
};

const MAINNET_BASE_URL: &str = "https://fapi.binance.com";
const TESTNET_BASE_URL: &str = "https://testnet.binancefuture.com";
const RATE_LIMIT_RPM: u32 = 1200; // USD-M request weight budget per minute
const RECV_WINDOW_MS: u64 = 5000;
const MAX_READ_ATTEMPTS: u32 = 3;
const MAX_KLINES: u32 = 1500;

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Binance USD-M futures REST client.
///
/// Cloneable; clones share the rate limiter and the exchange-info precision cache.
/// Only read-only requests are retried. Order, leverage and cancel requests go out
/// exactly once because a lost response says nothing about whether they executed.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    quote_asset: String,
    testnet: bool,
    rate_limiter: Arc<BinanceRateLimiter>,
    /// `None` until exchangeInfo has been loaded once
    precision_cache: Arc<RwLock<Option<HashMap<String, MarketPrecision>>>>,
    read_backoff: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceEntry {
    asset: String,
    balance: Decimal,
    available_balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: Decimal,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    price_precision: u32,
    quantity_precision: u32,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolFilter {
    filter_type: String,
    #[serde(default)]
    tick_size: Option<Decimal>,
    #[serde(default)]
    step_size: Option<Decimal>,
}

impl SymbolInfo {
    /// Decimals the venue accepts. `PRICE_FILTER.tickSize` and `LOT_SIZE.stepSize` are
    /// authoritative; `pricePrecision` can be finer than the tick (BTCUSDT: 2 vs 0.10).
    fn precision(&self) -> MarketPrecision {
        let decimals = |filter_type: &str, pick: fn(&SymbolFilter) -> Option<Decimal>| {
            self.filters
                .iter()
                .filter(|f| f.filter_type == filter_type)
                .find_map(pick)
                .filter(|step| *step > Decimal::ZERO)
                .map(|step| step.normalize().scale())
        };

        MarketPrecision {
            price_precision: decimals("PRICE_FILTER", |f| f.tick_size)
                .unwrap_or(self.price_precision),
            quantity_precision: decimals("LOT_SIZE", |f| f.step_size)
                .unwrap_or(self.quantity_precision),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRisk {
    symbol: String,
    position_amt: Decimal,
    entry_price: Decimal,
    #[serde(rename = "unRealizedProfit")]
    unrealized_profit: Decimal,
    leverage: Decimal,
    #[serde(default)]
    notional: Decimal,
    #[serde(default)]
    position_side: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenOrderEntry {
    order_id: i64,
    symbol: String,
    side: OrderSide,
    #[serde(rename = "type")]
    order_type: String,
    orig_qty: Decimal,
    #[serde(default)]
    reduce_only: bool,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

impl PositionRisk {
    fn into_position(self) -> Option<Position> {
        if self.position_amt.is_zero() {
            return None;
        }

        // Hedge mode reports LONG/SHORT; one-way mode reports BOTH with a signed amount
        let side = match self.position_side.as_str() {
            "LONG" => Some(PositionSide::Long),
            "SHORT" => Some(PositionSide::Short),
            _ if self.position_amt > Decimal::ZERO => Some(PositionSide::Long),
            _ => Some(PositionSide::Short),
        };

        Some(Position {
            symbol: self.symbol,
            side,
            size: self.position_amt.abs(),
            entry_price: self.entry_price,
            leverage: self.leverage.to_u32().unwrap_or(1),
            unrealized_pnl: self.unrealized_profit,
            notional_usd: self.notional.abs(),
        })
    }
}

impl BinanceFuturesClient {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        testnet: bool,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: if testnet {
                TESTNET_BASE_URL
            } else {
                MAINNET_BASE_URL
            }
            .to_string(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
            quote_asset: "USDT".to_string(),
            testnet,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            precision_cache: Arc::new(RwLock::new(None)),
            read_backoff: Duration::from_secs(1),
        })
    }

    /// Point the client at another host (used by tests)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_quote_asset(mut self, quote_asset: impl Into<String>) -> Self {
        self.quote_asset = quote_asset.into().to_uppercase();
        self
    }

    /// Base wait between read retries, doubled per attempt
    pub fn with_read_backoff(mut self, backoff: Duration) -> Self {
        self.read_backoff = backoff;
        self
    }

    pub fn network(&self) -> &'static str {
        if self.testnet {
            "testnet"
        } else {
            "mainnet"
        }
    }

    fn sign(&self, query: &str) -> Result<String, GatewayError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| GatewayError::Connection(format!("invalid API secret: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn build_query(&self, params: &[(&str, String)], signed: bool) -> Result<String, GatewayError> {
        let mut query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        if signed {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&format!(
                "recvWindow={}&timestamp={}",
                RECV_WINDOW_MS,
                chrono::Utc::now().timestamp_millis()
            ));
            let signature = self.sign(&query)?;
            query.push_str(&format!("&signature={}", signature));
        }

        Ok(query)
    }

    /// Send one request and decode the body. No retries at this level.
    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<T, GatewayError> {
        self.rate_limiter.until_ready().await;

        let query = self.build_query(params, signed)?;
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let mut request = self.client.request(method.clone(), &url);
        if signed {
            request = request.header("X-MBX-APIKEY", &self.api_key);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| {
                GatewayError::Decode(format!("{} {}: {}", method, path, e))
            });
        }

        // 418 is the IP ban that follows ignored 429s
        if status.as_u16() == 429 || status.as_u16() == 418 {
            tracing::warn!("Rate limited by Binance ({}) on {} {}", status, method, path);
            return Err(GatewayError::RateLimited);
        }

        if status.is_server_error() {
            return Err(GatewayError::Connection(format!(
                "server error {} on {}",
                status, path
            )));
        }

        match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(err) => Err(GatewayError::Api {
                code: err.code,
                message: err.msg,
            }),
            Err(_) => Err(GatewayError::Api {
                code: i64::from(status.as_u16()),
                message: body,
            }),
        }
    }

    /// GET with bounded exponential backoff on transient failures
    async fn read<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> Result<T, GatewayError> {
        let mut attempt = 1;
        loop {
            match self.send(Method::GET, path, params, signed).await {
                Err(e) if e.is_transient() && attempt < MAX_READ_ATTEMPTS => {
                    let backoff = self.read_backoff * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        "{} failed: {}, retrying in {:?} (attempt {}/{})",
                        path,
                        e,
                        backoff,
                        attempt,
                        MAX_READ_ATTEMPTS
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn balances(&self) -> Result<Vec<BalanceEntry>, GatewayError> {
        self.read("/fapi/v2/balance", &[], true).await
    }

    async fn position_risk(&self, market: Option<&str>) -> Result<Vec<PositionRisk>, GatewayError> {
        let params: Vec<(&str, String)> = market
            .map(|m| vec![("symbol", m.to_string())])
            .unwrap_or_default();
        self.read("/fapi/v2/positionRisk", &params, true).await
    }

    async fn submit_order(&self, params: &[(&str, String)]) -> Result<OrderAck, GatewayError> {
        let response: OrderResponse = self
            .send(Method::POST, "/fapi/v1/order", params, true)
            .await
            .map_err(|e| match e {
                GatewayError::Api { code, message } => {
                    GatewayError::OrderRejected(format!("{} (code {})", message, code))
                }
                other => other,
            })?;

        Ok(OrderAck {
            order_id: response.order_id.to_string(),
            status: response.status,
        })
    }
}

/// `[openTime, open, high, low, close, volume, closeTime, ...]` with prices as strings
fn parse_kline(row: &[serde_json::Value]) -> Option<Candle> {
    let field = |i: usize| row.get(i)?.as_str()?.parse::<f64>().ok();

    Some(Candle {
        open_time: Utc.timestamp_millis_opt(row.first()?.as_i64()?).single()?,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Connection(e.to_string())
    }
}

#[async_trait]
impl MarketGateway for BinanceFuturesClient {
    async fn get_free_balance(&self) -> Result<Decimal, GatewayError> {
        let balances = self.balances().await?;
        Ok(balances
            .into_iter()
            .find(|b| b.asset == self.quote_asset)
            .map(|b| b.available_balance)
            .unwrap_or(Decimal::ZERO))
    }

    async fn get_current_price(&self, market: &str) -> Result<Decimal, GatewayError> {
        let ticker: TickerPrice = self
            .read("/fapi/v1/ticker/price", &[("symbol", market.to_string())], false)
            .await
            .map_err(|e| match e {
                GatewayError::Api { .. } | GatewayError::Decode(_) => {
                    GatewayError::PriceUnavailable(format!("{}: {}", market, e))
                }
                other => other,
            })?;

        if ticker.price <= Decimal::ZERO {
            return Err(GatewayError::PriceUnavailable(market.to_string()));
        }
        Ok(ticker.price)
    }

    async fn get_market_precision(
        &self,
        market: &str,
    ) -> Result<Option<MarketPrecision>, GatewayError> {
        // A market missing from a loaded exchangeInfo is answered from the cache too
        if let Some(markets) = self.precision_cache.read().await.as_ref() {
            return Ok(markets.get(market).copied());
        }

        let info: ExchangeInfo = self.read("/fapi/v1/exchangeInfo", &[], false).await?;
        let markets: HashMap<String, MarketPrecision> = info
            .symbols
            .into_iter()
            .map(|symbol| {
                let precision = symbol.precision();
                (symbol.symbol, precision)
            })
            .collect();
        tracing::debug!("Cached precision for {} markets", markets.len());

        let precision = markets.get(market).copied();
        *self.precision_cache.write().await = Some(markets);
        Ok(precision)
    }

    async fn find_open_position(&self, market: &str) -> Result<Option<Position>, GatewayError> {
        let positions = self.position_risk(Some(market)).await?;
        Ok(positions
            .into_iter()
            .filter(|p| p.symbol == market)
            .find_map(PositionRisk::into_position))
    }

    async fn list_open_orders(&self, market: &str) -> Result<Vec<OpenOrder>, GatewayError> {
        let orders: Vec<OpenOrderEntry> = self
            .read("/fapi/v1/openOrders", &[("symbol", market.to_string())], true)
            .await?;

        Ok(orders
            .into_iter()
            .map(|o| OpenOrder {
                order_id: o.order_id.to_string(),
                symbol: o.symbol,
                side: o.side,
                order_type: o.order_type,
                quantity: o.orig_qty,
                reduce_only: o.reduce_only,
            })
            .collect())
    }

    async fn set_leverage(&self, market: &str, leverage: u32) -> Result<(), GatewayError> {
        let _: serde_json::Value = self
            .send(
                Method::POST,
                "/fapi/v1/leverage",
                &[("symbol", market.to_string()), ("leverage", leverage.to_string())],
                true,
            )
            .await
            .map_err(|e| GatewayError::LeverageSetFailed(e.to_string()))?;
        Ok(())
    }

    async fn place_market_order(
        &self,
        market: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<OrderAck, GatewayError> {
        self.submit_order(&[
            ("symbol", market.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("reduceOnly", reduce_only.to_string()),
        ])
        .await
    }

    async fn place_trigger_order(
        &self,
        market: &str,
        side: OrderSide,
        quantity: Decimal,
        trigger_price: Decimal,
        kind: TriggerKind,
        reduce_only: bool,
    ) -> Result<OrderAck, GatewayError> {
        self.submit_order(&[
            ("symbol", market.to_string()),
            ("side", side.as_str().to_string()),
            ("type", kind.order_type().to_string()),
            ("quantity", quantity.normalize().to_string()),
            ("stopPrice", trigger_price.normalize().to_string()),
            ("reduceOnly", reduce_only.to_string()),
        ])
        .await
    }

    async fn cancel_order(&self, market: &str, order_id: &str) -> Result<(), GatewayError> {
        let _: serde_json::Value = self
            .send(
                Method::DELETE,
                "/fapi/v1/order",
                &[("symbol", market.to_string()), ("orderId", order_id.to_string())],
                true,
            )
            .await?;
        Ok(())
    }

    async fn account_status(&self) -> Result<AccountStatus, GatewayError> {
        let quote = self
            .balances()
            .await?
            .into_iter()
            .find(|b| b.asset == self.quote_asset);

        let open_positions = self
            .position_risk(None)
            .await?
            .into_iter()
            .filter_map(PositionRisk::into_position)
            .collect();

        Ok(AccountStatus {
            exchange: "binance-usdm".to_string(),
            network: self.network().to_string(),
            balance_usd: quote.as_ref().map(|b| b.balance).unwrap_or(Decimal::ZERO),
            free_balance_usd: quote
                .as_ref()
                .map(|b| b.available_balance)
                .unwrap_or(Decimal::ZERO),
            open_positions,
        })
    }

    async fn get_candles(
        &self,
        market: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, GatewayError> {
        let rows: Vec<Vec<serde_json::Value>> = self
            .read(
                "/fapi/v1/klines",
                &[
                    ("symbol", market.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.clamp(1, MAX_KLINES).to_string()),
                ],
                false,
            )
            .await?;

        rows.iter()
            .map(|row| {
                parse_kline(row).ok_or_else(|| {
                    GatewayError::Decode(format!("malformed kline for {}: {:?}", market, row))
                })
            })
            .collect()
    }
}
