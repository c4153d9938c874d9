// Risk management module
pub mod limits;
pub mod rounding;

pub use limits::{PositionSizing, ProtectiveLevels, RiskLimits};
pub use rounding::{round_price, round_quantity, round_toward_zero};
