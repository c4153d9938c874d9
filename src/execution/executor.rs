use rust_decimal::Decimal;

use crate::execution::gateway::{market_symbol, MarketGateway};
use crate::execution::result::{ExecutionResult, ExecutionStatus};
use crate::models::{Operation, OrderSide, PositionSide, TradingSignal, TriggerKind};
use crate::risk::{round_price, round_quantity, RiskLimits};

/// Drives venue state forward for one sanitized signal.
///
/// Open: existence check, funding check, sizing, leverage, entry, then protective
/// orders. Close: existence check, zero-size guard, cancel resting orders, then a
/// reduce-only unwind. Steps run strictly in that order and never go backwards.
///
/// Best-effort steps (leverage, protective legs, stray cancels) log and continue.
/// Critical steps (entry, unwind) end the call with an `Error` result. Nothing is
/// ever retried here: a resubmitted market order could double the position.
pub struct Executor {
    limits: RiskLimits,
    quote_asset: String,
}

impl Executor {
    pub fn new(limits: RiskLimits, quote_asset: impl Into<String>) -> Self {
        Self {
            limits,
            quote_asset: quote_asset.into(),
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn quote_asset(&self) -> &str {
        &self.quote_asset
    }

    /// Execute a signal against the gateway. Always returns a structured result.
    pub async fn execute(
        &self,
        signal: &TradingSignal,
        gateway: &dyn MarketGateway,
    ) -> ExecutionResult {
        let market = market_symbol(&signal.symbol, &self.quote_asset);

        tracing::info!(
            "Executing signal: {} {} {} ({})",
            signal.operation,
            signal.symbol,
            signal.direction,
            market
        );

        match signal.operation {
            Operation::Hold => ExecutionResult::no_action(signal, &market),
            Operation::Open => self.open_position(signal, &market, gateway).await,
            Operation::Close => self.close_position(signal, &market, gateway).await,
        }
    }

    async fn open_position(
        &self,
        signal: &TradingSignal,
        market: &str,
        gateway: &dyn MarketGateway,
    ) -> ExecutionResult {
        // One-way mode: never add to or flip an existing position
        match gateway.find_open_position(market).await {
            Ok(Some(existing)) => {
                tracing::warn!("Position already open on {}, skipping", market);
                return ExecutionResult::skipped(
                    signal,
                    market,
                    format!("Position already open on {}", signal.symbol),
                )
                .with_existing_position(existing);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::error!("Failed to query position for {}: {}", market, e);
                return ExecutionResult::error(
                    signal,
                    market,
                    format!("Failed to query position: {}", e),
                );
            }
        }

        let free_balance = match gateway.get_free_balance().await {
            Ok(balance) if balance > Decimal::ZERO => balance,
            Ok(balance) => {
                tracing::error!("No free balance available ({})", balance);
                return ExecutionResult::error(signal, market, "Free balance is zero");
            }
            Err(e) => {
                tracing::error!("Failed to fetch free balance: {}", e);
                return ExecutionResult::error(
                    signal,
                    market,
                    format!("Failed to fetch free balance: {}", e),
                );
            }
        };

        let portion = signal.target_portion_of_balance;
        if portion <= Decimal::ZERO || portion > Decimal::ONE {
            return ExecutionResult::error(
                signal,
                market,
                format!("Invalid target_portion_of_balance: {}", portion),
            );
        }

        let leverage = self.limits.effective_leverage(signal.leverage);
        if leverage != signal.leverage {
            tracing::warn!(
                "Leverage {}x requested, clamped to {}x",
                signal.leverage,
                leverage
            );
        }

        let price = match gateway.get_current_price(market).await {
            Ok(price) => price,
            Err(e) => {
                tracing::error!("Failed to fetch price for {}: {}", market, e);
                return ExecutionResult::error(
                    signal,
                    market,
                    format!("Failed to fetch price: {}", e),
                );
            }
        };

        let sizing = match self
            .limits
            .size_position(free_balance, portion, leverage, price)
        {
            Some(sizing) => sizing,
            None => {
                return ExecutionResult::error(
                    signal,
                    market,
                    format!("Invalid current price: {}", price),
                );
            }
        };

        let precision = match gateway.get_market_precision(market).await {
            Ok(precision) => precision,
            Err(e) => {
                tracing::warn!("Precision unavailable for {} ({}), using defaults", market, e);
                None
            }
        };

        let size = round_quantity(sizing.raw_size, precision);
        if size <= Decimal::ZERO {
            return ExecutionResult::error(
                signal,
                market,
                format!(
                    "Position size {} rounds to zero at market precision",
                    sizing.raw_size
                ),
            );
        }

        let levels = self.limits.protective_levels(price, signal.direction);
        let stop_loss_price = round_price(levels.stop_loss, precision);
        let take_profit_price = round_price(levels.take_profit, precision);
        let entry_side = signal.direction.entry_side();
        let protective_side = signal.direction.exit_side();

        // Non-fatal: the venue keeps its previous leverage setting
        match gateway.set_leverage(market, leverage).await {
            Ok(()) => tracing::info!("Leverage set to {}x for {}", leverage, market),
            Err(e) => tracing::warn!("Could not set leverage for {}: {}", market, e),
        }

        tracing::info!(
            "Opening {} {}: size={}, leverage={}x, price~{}, notional={}",
            signal.direction,
            signal.symbol,
            size,
            leverage,
            price,
            sizing.notional
        );

        let mut result = ExecutionResult::filled(signal, market);
        result.entry_price = Some(price);
        result.size = Some(size);
        result.leverage = Some(leverage);
        result.stop_loss_price = Some(stop_loss_price);
        result.take_profit_price = Some(take_profit_price);

        let entry = match gateway
            .place_market_order(market, entry_side, size, false)
            .await
        {
            Ok(ack) => ack,
            Err(e) => {
                tracing::error!("Entry order failed for {}: {}", market, e);
                return ExecutionResult {
                    status: ExecutionStatus::Error,
                    detail: Some(format!("Entry order failed: {}", e)),
                    ..result
                };
            }
        };
        tracing::info!("Entry order accepted: {} ({})", entry.order_id, entry.status);
        result.entry_order = Some(entry.order_id);

        result.stop_loss_order = self
            .place_protective(
                gateway,
                market,
                protective_side,
                size,
                stop_loss_price,
                TriggerKind::StopLoss,
            )
            .await;

        result.take_profit_order = self
            .place_protective(
                gateway,
                market,
                protective_side,
                size,
                take_profit_price,
                TriggerKind::TakeProfit,
            )
            .await;

        if result.is_under_protected() {
            tracing::error!(
                "{} is open but under-protected (stop-loss: {:?}, take-profit: {:?})",
                market,
                result.stop_loss_order,
                result.take_profit_order
            );
        }

        result
    }

    /// Place one protective leg. Failure is reported as `None`, never propagated.
    async fn place_protective(
        &self,
        gateway: &dyn MarketGateway,
        market: &str,
        side: OrderSide,
        size: Decimal,
        trigger_price: Decimal,
        kind: TriggerKind,
    ) -> Option<String> {
        match gateway
            .place_trigger_order(market, side, size, trigger_price, kind, true)
            .await
        {
            Ok(ack) => {
                tracing::info!(
                    "{:?} placed: {} {} @ trigger {} (order {})",
                    kind,
                    side,
                    size,
                    trigger_price,
                    ack.order_id
                );
                Some(ack.order_id)
            }
            Err(e) => {
                tracing::error!("{:?} placement failed for {}: {}", kind, market, e);
                None
            }
        }
    }

    async fn close_position(
        &self,
        signal: &TradingSignal,
        market: &str,
        gateway: &dyn MarketGateway,
    ) -> ExecutionResult {
        let position = match gateway.find_open_position(market).await {
            Ok(Some(position)) => position,
            Ok(None) => {
                tracing::warn!("No position to close on {}", market);
                return ExecutionResult::skipped(
                    signal,
                    market,
                    format!("No open position found on {}", signal.symbol),
                );
            }
            Err(e) => {
                tracing::error!("Failed to query position for {}: {}", market, e);
                return ExecutionResult::error(
                    signal,
                    market,
                    format!("Failed to query position: {}", e),
                );
            }
        };

        if position.size <= Decimal::ZERO {
            return ExecutionResult::skipped(
                signal,
                market,
                format!("No size > 0 to close on {}", signal.symbol),
            )
            .with_existing_position(position);
        }

        self.cancel_open_orders(gateway, market).await;

        let side = match position.side {
            Some(PositionSide::Long) => OrderSide::Sell,
            Some(PositionSide::Short) => OrderSide::Buy,
            None => {
                tracing::warn!(
                    "Position side unknown on {}, closing as {} per signal",
                    market,
                    signal.direction
                );
                signal.direction.exit_side()
            }
        };
        let size = position.size.abs();

        tracing::info!("Closing {:?} {}: side={}, size={}", position.side, market, side, size);

        match gateway.place_market_order(market, side, size, true).await {
            Ok(ack) => {
                tracing::info!("Close order accepted: {} ({})", ack.order_id, ack.status);
                let mut result = ExecutionResult::filled(signal, market);
                result.size = Some(size);
                result.entry_price = Some(position.entry_price);
                result.leverage = Some(position.leverage);
                result.close_order = Some(ack.order_id);
                result.with_existing_position(position)
            }
            Err(e) => {
                tracing::error!("Close order failed for {}: {}", market, e);
                ExecutionResult::error(signal, market, format!("Close order failed: {}", e))
                    .with_existing_position(position)
            }
        }
    }

    /// Cancel every resting order on the market. Failures are logged and skipped.
    async fn cancel_open_orders(&self, gateway: &dyn MarketGateway, market: &str) {
        let orders = match gateway.list_open_orders(market).await {
            Ok(orders) => orders,
            Err(e) => {
                tracing::warn!("Failed to list open orders for {}: {}", market, e);
                return;
            }
        };

        for order in orders {
            match gateway.cancel_order(market, &order.order_id).await {
                Ok(()) => tracing::debug!("Cancelled order {}", order.order_id),
                Err(e) => tracing::warn!("Failed to cancel order {}: {}", order.order_id, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::gateway::{GatewayError, MockMarketGateway};
    use crate::models::{
        Direction, MarketPrecision, OpenOrder, OrderAck, Position, TradingSignal,
    };
    use mockall::Sequence;
    use rust_decimal_macros::dec;

    fn executor() -> Executor {
        Executor::new(RiskLimits::default(), "USDT")
    }

    fn open_signal(direction: Direction, portion: Decimal, leverage: u32) -> TradingSignal {
        TradingSignal {
            operation: Operation::Open,
            symbol: "BTC".to_string(),
            direction,
            target_portion_of_balance: portion,
            leverage,
            reason: "test open".to_string(),
        }
    }

    fn close_signal(direction: Direction) -> TradingSignal {
        TradingSignal {
            operation: Operation::Close,
            symbol: "BTC".to_string(),
            direction,
            target_portion_of_balance: Decimal::ZERO,
            leverage: 1,
            reason: "test close".to_string(),
        }
    }

    fn position(side: Option<PositionSide>, size: Decimal) -> Position {
        Position {
            symbol: "BTCUSDT".to_string(),
            side,
            size,
            entry_price: dec!(50),
            leverage: 3,
            unrealized_pnl: dec!(1.5),
            notional_usd: size * dec!(50),
        }
    }

    fn ack(id: &str) -> OrderAck {
        OrderAck {
            order_id: id.to_string(),
            status: "NEW".to_string(),
        }
    }

    fn resting(id: &str) -> OpenOrder {
        OpenOrder {
            order_id: id.to_string(),
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Sell,
            order_type: "STOP_MARKET".to_string(),
            quantity: dec!(18),
            reduce_only: true,
        }
    }

    /// No position, 1000 free, price 50, no precision metadata
    fn flat_account(gateway: &mut MockMarketGateway) {
        gateway
            .expect_find_open_position()
            .returning(|_| Ok(None));
        gateway
            .expect_get_free_balance()
            .returning(|| Ok(dec!(1000)));
        gateway
            .expect_get_current_price()
            .returning(|_| Ok(dec!(50)));
        gateway
            .expect_get_market_precision()
            .returning(|_| Ok(None));
    }

    #[tokio::test]
    async fn test_hold_makes_no_gateway_calls() {
        // Any call on a mock without expectations panics
        let gateway = MockMarketGateway::new();
        let signal = TradingSignal::fallback("BTC", "nothing to do");

        let result = executor().execute(&signal, &gateway).await;

        assert_eq!(result.status, ExecutionStatus::NoAction);
        assert_eq!(result.reason, "nothing to do");
    }

    #[tokio::test]
    async fn test_hold_ignores_other_fields() {
        let gateway = MockMarketGateway::new();
        let mut signal = open_signal(Direction::Short, dec!(1), 20);
        signal.operation = Operation::Hold;

        let result = executor().execute(&signal, &gateway).await;
        assert_eq!(result.status, ExecutionStatus::NoAction);
    }

    #[tokio::test]
    async fn test_open_skipped_when_position_exists() {
        let mut gateway = MockMarketGateway::new();
        gateway
            .expect_find_open_position()
            .withf(|market| market == "BTCUSDT")
            .times(1)
            .returning(|_| Ok(Some(position(Some(PositionSide::Long), dec!(2)))));
        gateway.expect_set_leverage().never();
        gateway.expect_place_market_order().never();
        gateway.expect_place_trigger_order().never();

        let signal = open_signal(Direction::Long, dec!(0.3), 3);
        let result = executor().execute(&signal, &gateway).await;

        assert_eq!(result.status, ExecutionStatus::Skipped);
        assert!(result.existing_position.is_some());
        assert!(result.detail.unwrap().contains("already open"));
    }

    #[tokio::test]
    async fn test_open_long_full_sequence() {
        let mut gateway = MockMarketGateway::new();
        flat_account(&mut gateway);
        let mut seq = Sequence::new();

        gateway
            .expect_set_leverage()
            .withf(|market, leverage| market == "BTCUSDT" && *leverage == 3)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        gateway
            .expect_place_market_order()
            .withf(|market, side, qty, reduce_only| {
                market == "BTCUSDT" && *side == OrderSide::Buy && *qty == dec!(18) && !reduce_only
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(ack("entry-1")));
        gateway
            .expect_place_trigger_order()
            .withf(|_, side, qty, price, kind, reduce_only| {
                *side == OrderSide::Sell
                    && *qty == dec!(18)
                    && *price == dec!(49)
                    && *kind == TriggerKind::StopLoss
                    && *reduce_only
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _, _, _| Ok(ack("sl-1")));
        gateway
            .expect_place_trigger_order()
            .withf(|_, side, qty, price, kind, reduce_only| {
                *side == OrderSide::Sell
                    && *qty == dec!(18)
                    && *price == dec!(52)
                    && *kind == TriggerKind::TakeProfit
                    && *reduce_only
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _, _, _| Ok(ack("tp-1")));

        let signal = open_signal(Direction::Long, dec!(0.3), 3);
        let result = executor().execute(&signal, &gateway).await;

        assert_eq!(result.status, ExecutionStatus::Filled);
        assert_eq!(result.entry_price, Some(dec!(50)));
        assert_eq!(result.size, Some(dec!(18)));
        assert_eq!(result.leverage, Some(3));
        assert_eq!(result.stop_loss_price, Some(dec!(49)));
        assert_eq!(result.take_profit_price, Some(dec!(52)));
        assert_eq!(result.entry_order.as_deref(), Some("entry-1"));
        assert_eq!(result.stop_loss_order.as_deref(), Some("sl-1"));
        assert_eq!(result.take_profit_order.as_deref(), Some("tp-1"));
        assert!(!result.is_under_protected());
    }

    #[tokio::test]
    async fn test_open_short_mirrors_sides_and_levels() {
        let mut gateway = MockMarketGateway::new();
        gateway.expect_find_open_position().returning(|_| Ok(None));
        gateway.expect_get_free_balance().returning(|| Ok(dec!(1000)));
        gateway.expect_get_current_price().returning(|_| Ok(dec!(100)));
        gateway.expect_get_market_precision().returning(|_| Ok(None));
        gateway.expect_set_leverage().returning(|_, _| Ok(()));
        gateway
            .expect_place_market_order()
            .withf(|_, side, _, reduce_only| *side == OrderSide::Sell && !reduce_only)
            .times(1)
            .returning(|_, _, _, _| Ok(ack("entry")));
        gateway
            .expect_place_trigger_order()
            .withf(|_, side, _, _, _, _| *side == OrderSide::Buy)
            .times(2)
            .returning(|_, _, _, _, kind, _| match kind {
                TriggerKind::StopLoss => Ok(ack("sl")),
                TriggerKind::TakeProfit => Ok(ack("tp")),
            });

        let signal = open_signal(Direction::Short, dec!(0.5), 2);
        let result = executor().execute(&signal, &gateway).await;

        assert_eq!(result.status, ExecutionStatus::Filled);
        assert_eq!(result.stop_loss_price, Some(dec!(102)));
        assert_eq!(result.take_profit_price, Some(dec!(96)));
        // 1000 * 0.5 * 2 / 100
        assert_eq!(result.size, Some(dec!(10)));
    }

    #[tokio::test]
    async fn test_leverage_above_max_is_clamped() {
        let mut gateway = MockMarketGateway::new();
        flat_account(&mut gateway);
        gateway
            .expect_set_leverage()
            .withf(|market, leverage| market == "BTCUSDT" && *leverage == 5)
            .times(1)
            .returning(|_, _| Ok(()));
        // 1000 * 0.3 * 5 / 50 = 30
        gateway
            .expect_place_market_order()
            .withf(|_, _, qty, _| *qty == dec!(30))
            .times(1)
            .returning(|_, _, _, _| Ok(ack("entry")));
        gateway
            .expect_place_trigger_order()
            .times(2)
            .returning(|_, _, _, _, _, _| Ok(ack("protect")));

        let signal = open_signal(Direction::Long, dec!(0.3), 20);
        let result = executor().execute(&signal, &gateway).await;

        assert_eq!(result.leverage, Some(5));
        assert_eq!(result.size, Some(dec!(30)));
    }

    #[tokio::test]
    async fn test_entry_failure_stops_before_protection() {
        let mut gateway = MockMarketGateway::new();
        flat_account(&mut gateway);
        gateway.expect_set_leverage().times(1).returning(|_, _| Ok(()));
        gateway
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _, _| Err(GatewayError::OrderRejected("insufficient margin".into())));
        gateway.expect_place_trigger_order().never();

        let signal = open_signal(Direction::Long, dec!(0.3), 3);
        let result = executor().execute(&signal, &gateway).await;

        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.detail.unwrap().contains("insufficient margin"));
        assert!(result.entry_order.is_none());
        assert!(result.stop_loss_order.is_none());
    }

    #[tokio::test]
    async fn test_stop_loss_failure_still_attempts_take_profit() {
        let mut gateway = MockMarketGateway::new();
        flat_account(&mut gateway);
        gateway.expect_set_leverage().returning(|_, _| Ok(()));
        gateway
            .expect_place_market_order()
            .returning(|_, _, _, _| Ok(ack("entry")));
        gateway
            .expect_place_trigger_order()
            .withf(|_, _, _, _, kind, _| *kind == TriggerKind::StopLoss)
            .times(1)
            .returning(|_, _, _, _, _, _| Err(GatewayError::OrderRejected("would trigger".into())));
        gateway
            .expect_place_trigger_order()
            .withf(|_, _, _, _, kind, _| *kind == TriggerKind::TakeProfit)
            .times(1)
            .returning(|_, _, _, _, _, _| Ok(ack("tp-9")));

        let signal = open_signal(Direction::Long, dec!(0.3), 3);
        let result = executor().execute(&signal, &gateway).await;

        assert_eq!(result.status, ExecutionStatus::Filled);
        assert!(result.stop_loss_order.is_none());
        assert_eq!(result.take_profit_order.as_deref(), Some("tp-9"));
        assert!(result.is_under_protected());
    }

    #[tokio::test]
    async fn test_leverage_failure_is_not_fatal() {
        let mut gateway = MockMarketGateway::new();
        flat_account(&mut gateway);
        gateway
            .expect_set_leverage()
            .times(1)
            .returning(|_, _| Err(GatewayError::LeverageSetFailed("open orders exist".into())));
        gateway
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _, _| Ok(ack("entry")));
        gateway
            .expect_place_trigger_order()
            .times(2)
            .returning(|_, _, _, _, _, _| Ok(ack("protect")));

        let signal = open_signal(Direction::Long, dec!(0.3), 3);
        let result = executor().execute(&signal, &gateway).await;

        assert_eq!(result.status, ExecutionStatus::Filled);
    }

    #[tokio::test]
    async fn test_zero_balance_is_error() {
        let mut gateway = MockMarketGateway::new();
        gateway.expect_find_open_position().returning(|_| Ok(None));
        gateway.expect_get_free_balance().returning(|| Ok(dec!(0)));
        gateway.expect_get_current_price().never();
        gateway.expect_place_market_order().never();

        let signal = open_signal(Direction::Long, dec!(0.3), 3);
        let result = executor().execute(&signal, &gateway).await;

        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.detail.unwrap().contains("zero"));
    }

    #[tokio::test]
    async fn test_balance_lookup_failure_is_error() {
        let mut gateway = MockMarketGateway::new();
        gateway.expect_find_open_position().returning(|_| Ok(None));
        gateway
            .expect_get_free_balance()
            .returning(|| Err(GatewayError::Api { code: -2015, message: "Invalid API-key".into() }));
        gateway.expect_get_current_price().never();
        gateway.expect_set_leverage().never();
        gateway.expect_place_market_order().never();

        let signal = open_signal(Direction::Long, dec!(0.3), 3);
        let result = executor().execute(&signal, &gateway).await;

        assert_eq!(result.status, ExecutionStatus::Error);
        let detail = result.detail.unwrap();
        assert!(detail.contains("Failed to fetch free balance"), "{}", detail);
        assert!(detail.contains("Invalid API-key"), "{}", detail);
    }

    #[tokio::test]
    async fn test_price_unavailable_is_error() {
        let mut gateway = MockMarketGateway::new();
        gateway.expect_find_open_position().returning(|_| Ok(None));
        gateway.expect_get_free_balance().returning(|| Ok(dec!(1000)));
        gateway
            .expect_get_current_price()
            .returning(|m| Err(GatewayError::PriceUnavailable(m.to_string())));
        gateway.expect_set_leverage().never();
        gateway.expect_place_market_order().never();

        let signal = open_signal(Direction::Long, dec!(0.3), 3);
        let result = executor().execute(&signal, &gateway).await;

        assert_eq!(result.status, ExecutionStatus::Error);
    }

    #[tokio::test]
    async fn test_non_positive_price_is_error() {
        let mut gateway = MockMarketGateway::new();
        gateway.expect_find_open_position().returning(|_| Ok(None));
        gateway.expect_get_free_balance().returning(|| Ok(dec!(1000)));
        gateway.expect_get_current_price().returning(|_| Ok(dec!(0)));
        gateway.expect_place_market_order().never();

        let signal = open_signal(Direction::Long, dec!(0.3), 3);
        let result = executor().execute(&signal, &gateway).await;

        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.detail.unwrap().contains("Invalid current price"));
    }

    #[tokio::test]
    async fn test_out_of_range_portion_is_error() {
        let mut gateway = MockMarketGateway::new();
        gateway.expect_find_open_position().returning(|_| Ok(None));
        gateway.expect_get_free_balance().returning(|| Ok(dec!(1000)));
        gateway.expect_place_market_order().never();

        let signal = open_signal(Direction::Long, dec!(1.5), 3);
        let result = executor().execute(&signal, &gateway).await;

        assert_eq!(result.status, ExecutionStatus::Error);
    }

    #[tokio::test]
    async fn test_sizes_and_prices_truncated_to_market_precision() {
        let mut gateway = MockMarketGateway::new();
        gateway.expect_find_open_position().returning(|_| Ok(None));
        gateway.expect_get_free_balance().returning(|| Ok(dec!(1000)));
        gateway
            .expect_get_current_price()
            .returning(|_| Ok(dec!(30000.55)));
        gateway.expect_get_market_precision().returning(|_| {
            Ok(Some(MarketPrecision {
                price_precision: 1,
                quantity_precision: 3,
            }))
        });
        gateway.expect_set_leverage().returning(|_, _| Ok(()));
        // 1000 * 0.1 * 2 / 30000.55 = 0.00666654... -> 0.006
        gateway
            .expect_place_market_order()
            .withf(|_, _, qty, _| *qty == dec!(0.006))
            .times(1)
            .returning(|_, _, _, _| Ok(ack("entry")));
        gateway
            .expect_place_trigger_order()
            .times(2)
            .returning(|_, _, _, _, _, _| Ok(ack("protect")));

        let signal = open_signal(Direction::Long, dec!(0.1), 2);
        let result = executor().execute(&signal, &gateway).await;

        // 30000.55 * 0.98 = 29400.539 -> 29400.5, * 1.04 = 31200.572 -> 31200.5
        assert_eq!(result.stop_loss_price, Some(dec!(29400.5)));
        assert_eq!(result.take_profit_price, Some(dec!(31200.5)));
        assert_eq!(result.size, Some(dec!(0.006)));
    }

    #[tokio::test]
    async fn test_precision_lookup_failure_uses_defaults() {
        let mut gateway = MockMarketGateway::new();
        gateway.expect_find_open_position().returning(|_| Ok(None));
        gateway.expect_get_free_balance().returning(|| Ok(dec!(100)));
        gateway.expect_get_current_price().returning(|_| Ok(dec!(3)));
        gateway
            .expect_get_market_precision()
            .returning(|_| Err(GatewayError::Timeout));
        gateway.expect_set_leverage().returning(|_, _| Ok(()));
        // 100 * 0.1 * 1 / 3 = 3.333... -> 3.333333
        gateway
            .expect_place_market_order()
            .withf(|_, _, qty, _| *qty == dec!(3.333333))
            .times(1)
            .returning(|_, _, _, _| Ok(ack("entry")));
        gateway
            .expect_place_trigger_order()
            .times(2)
            .returning(|_, _, _, _, _, _| Ok(ack("protect")));

        let signal = open_signal(Direction::Long, dec!(0.1), 1);
        let result = executor().execute(&signal, &gateway).await;

        assert_eq!(result.status, ExecutionStatus::Filled);
        assert_eq!(result.stop_loss_price, Some(dec!(2.94)));
    }

    #[tokio::test]
    async fn test_size_rounding_to_zero_places_nothing() {
        let mut gateway = MockMarketGateway::new();
        gateway.expect_find_open_position().returning(|_| Ok(None));
        gateway.expect_get_free_balance().returning(|| Ok(dec!(1)));
        gateway
            .expect_get_current_price()
            .returning(|_| Ok(dec!(90000)));
        gateway.expect_get_market_precision().returning(|_| {
            Ok(Some(MarketPrecision {
                price_precision: 1,
                quantity_precision: 3,
            }))
        });
        gateway.expect_set_leverage().never();
        gateway.expect_place_market_order().never();

        let signal = open_signal(Direction::Long, dec!(0.1), 1);
        let result = executor().execute(&signal, &gateway).await;

        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.detail.unwrap().contains("rounds to zero"));
    }

    #[tokio::test]
    async fn test_close_skipped_without_position() {
        let mut gateway = MockMarketGateway::new();
        gateway.expect_find_open_position().returning(|_| Ok(None));
        gateway.expect_list_open_orders().never();
        gateway.expect_place_market_order().never();

        let result = executor()
            .execute(&close_signal(Direction::Long), &gateway)
            .await;

        assert_eq!(result.status, ExecutionStatus::Skipped);
    }

    #[tokio::test]
    async fn test_close_skipped_for_zero_size() {
        let mut gateway = MockMarketGateway::new();
        gateway
            .expect_find_open_position()
            .returning(|_| Ok(Some(position(Some(PositionSide::Long), dec!(0)))));
        gateway.expect_list_open_orders().never();
        gateway.expect_cancel_order().never();
        gateway.expect_place_market_order().never();

        let result = executor()
            .execute(&close_signal(Direction::Long), &gateway)
            .await;

        assert_eq!(result.status, ExecutionStatus::Skipped);
        assert!(result.existing_position.is_some());
    }

    #[tokio::test]
    async fn test_close_cancels_then_unwinds() {
        let mut gateway = MockMarketGateway::new();
        let mut seq = Sequence::new();

        gateway
            .expect_find_open_position()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(Some(position(Some(PositionSide::Long), dec!(18)))));
        gateway
            .expect_list_open_orders()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(vec![resting("sl-1"), resting("tp-1")]));
        gateway
            .expect_cancel_order()
            .withf(|_, id| id == "sl-1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(GatewayError::Api {
                code: -2011,
                message: "Unknown order sent.".into(),
            }));
        gateway
            .expect_cancel_order()
            .withf(|_, id| id == "tp-1")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        gateway
            .expect_place_market_order()
            .withf(|_, side, qty, reduce_only| {
                *side == OrderSide::Sell && *qty == dec!(18) && *reduce_only
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _| Ok(ack("close-1")));

        let result = executor()
            .execute(&close_signal(Direction::Long), &gateway)
            .await;

        assert_eq!(result.status, ExecutionStatus::Filled);
        assert_eq!(result.close_order.as_deref(), Some("close-1"));
        assert_eq!(result.size, Some(dec!(18)));
    }

    #[tokio::test]
    async fn test_close_short_buys_back() {
        let mut gateway = MockMarketGateway::new();
        gateway
            .expect_find_open_position()
            .returning(|_| Ok(Some(position(Some(PositionSide::Short), dec!(4)))));
        gateway.expect_list_open_orders().returning(|_| Ok(vec![]));
        gateway
            .expect_place_market_order()
            .withf(|_, side, _, reduce_only| *side == OrderSide::Buy && *reduce_only)
            .times(1)
            .returning(|_, _, _, _| Ok(ack("close")));

        // Signal direction disagrees; the venue-reported side wins
        let result = executor()
            .execute(&close_signal(Direction::Long), &gateway)
            .await;

        assert_eq!(result.status, ExecutionStatus::Filled);
    }

    #[tokio::test]
    async fn test_close_unknown_side_falls_back_to_signal_direction() {
        let mut gateway = MockMarketGateway::new();
        gateway
            .expect_find_open_position()
            .returning(|_| Ok(Some(position(None, dec!(4)))));
        gateway.expect_list_open_orders().returning(|_| Ok(vec![]));
        gateway
            .expect_place_market_order()
            .withf(|_, side, _, _| *side == OrderSide::Buy)
            .times(1)
            .returning(|_, _, _, _| Ok(ack("close")));

        let result = executor()
            .execute(&close_signal(Direction::Short), &gateway)
            .await;

        assert_eq!(result.status, ExecutionStatus::Filled);
    }

    #[tokio::test]
    async fn test_close_position_lookup_failure_is_error() {
        let mut gateway = MockMarketGateway::new();
        gateway
            .expect_find_open_position()
            .returning(|_| Err(GatewayError::Timeout));
        gateway.expect_list_open_orders().never();
        gateway.expect_cancel_order().never();
        gateway.expect_place_market_order().never();

        let result = executor()
            .execute(&close_signal(Direction::Long), &gateway)
            .await;

        assert_eq!(result.status, ExecutionStatus::Error);
        let detail = result.detail.unwrap();
        assert!(detail.contains("Failed to query position"), "{}", detail);
        assert!(detail.contains("timed out"), "{}", detail);
    }

    #[tokio::test]
    async fn test_close_continues_when_order_listing_fails() {
        let mut gateway = MockMarketGateway::new();
        gateway
            .expect_find_open_position()
            .returning(|_| Ok(Some(position(Some(PositionSide::Long), dec!(1)))));
        gateway
            .expect_list_open_orders()
            .returning(|_| Err(GatewayError::Connection("reset by peer".into())));
        gateway.expect_cancel_order().never();
        gateway
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _, _| Ok(ack("close")));

        let result = executor()
            .execute(&close_signal(Direction::Long), &gateway)
            .await;

        assert_eq!(result.status, ExecutionStatus::Filled);
    }

    #[tokio::test]
    async fn test_close_order_failure_surfaces_as_error() {
        let mut gateway = MockMarketGateway::new();
        gateway
            .expect_find_open_position()
            .returning(|_| Ok(Some(position(Some(PositionSide::Long), dec!(1)))));
        gateway.expect_list_open_orders().returning(|_| Ok(vec![]));
        gateway
            .expect_place_market_order()
            .times(1)
            .returning(|_, _, _, _| Err(GatewayError::OrderRejected("ReduceOnly Order is rejected".into())));

        let result = executor()
            .execute(&close_signal(Direction::Long), &gateway)
            .await;

        assert_eq!(result.status, ExecutionStatus::Error);
        assert!(result.detail.unwrap().contains("ReduceOnly"));
        assert!(result.existing_position.is_some());
    }
}
