use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::MarketPrecision;

/// Truncate to `decimals` places. Never rounds away from zero, so an order can
/// never exceed the precision or size the venue disclosed.
pub fn round_toward_zero(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
}

/// Round a price using market precision, or the default precision when unknown
pub fn round_price(value: Decimal, precision: Option<MarketPrecision>) -> Decimal {
    let precision = precision.unwrap_or_default();
    round_toward_zero(value, precision.price_precision)
}

/// Round a quantity using market precision, or the default precision when unknown
pub fn round_quantity(value: Decimal, precision: Option<MarketPrecision>) -> Decimal {
    let precision = precision.unwrap_or_default();
    round_toward_zero(value, precision.quantity_precision)
}
