use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::Direction;

/// System-wide safety limits applied to every open, whatever the signal asked for
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_leverage: u32,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_leverage: 5,           // Overrides anything the model asks for
            stop_loss_pct: dec!(0.02), // 2% from entry
            take_profit_pct: dec!(0.04), // 4% from entry (1:2 reward-risk)
        }
    }
}

/// Stop-loss and take-profit trigger prices for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtectiveLevels {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// Exposure derived from balance, portion and leverage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionSizing {
    pub notional: Decimal,
    /// `notional / price`, before precision rounding
    pub raw_size: Decimal,
}

impl RiskLimits {
    /// Clamp requested leverage into `[1, max_leverage]`
    pub fn effective_leverage(&self, requested: u32) -> u32 {
        requested.clamp(1, self.max_leverage.max(1))
    }

    /// Trigger levels for an entry at `price`. Long stops below and takes profit above;
    /// short mirrors it.
    pub fn protective_levels(&self, price: Decimal, direction: Direction) -> ProtectiveLevels {
        match direction {
            Direction::Long => ProtectiveLevels {
                stop_loss: price * (Decimal::ONE - self.stop_loss_pct),
                take_profit: price * (Decimal::ONE + self.take_profit_pct),
            },
            Direction::Short => ProtectiveLevels {
                stop_loss: price * (Decimal::ONE + self.stop_loss_pct),
                take_profit: price * (Decimal::ONE - self.take_profit_pct),
            },
        }
    }

    /// Size an entry. Returns `None` when price is not positive.
    pub fn size_position(
        &self,
        free_balance: Decimal,
        portion: Decimal,
        leverage: u32,
        price: Decimal,
    ) -> Option<PositionSizing> {
        if price <= Decimal::ZERO {
            return None;
        }

        let notional = free_balance * portion * Decimal::from(leverage);
        let raw_size = notional.checked_div(price)?;

        Some(PositionSizing { notional, raw_size })
    }
}
