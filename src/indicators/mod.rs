// Technical indicators for decision context
// EMA, MACD, RSI, ATR and volume on venue candles

pub mod atr;
pub mod moving_average;
pub mod rsi;
pub mod snapshot;

pub use atr::calculate_atr;
pub use moving_average::{calculate_ema, calculate_macd, calculate_sma};
pub use rsi::calculate_rsi;
pub use snapshot::{TechnicalSnapshot, INDICATOR_CANDLES, INDICATOR_INTERVAL};
