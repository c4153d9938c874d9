use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::indicators::{calculate_atr, calculate_ema, calculate_macd, calculate_rsi, calculate_sma};
use crate::models::Candle;

pub const INDICATOR_INTERVAL: &str = "15m";
pub const INDICATOR_CANDLES: u32 = 200;

const VOLUME_LOOKBACK: usize = 20;

/// Latest indicator readings for one ticker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TechnicalSnapshot {
    pub symbol: String,
    pub interval: String,
    pub timestamp: DateTime<Utc>,
    pub current_price: f64,
    pub ema20: f64,
    pub macd: f64,
    pub rsi14: f64,
    pub rsi7: f64,
    pub atr14: f64,
    pub volume_current: f64,
    pub volume_average: f64,
}

impl TechnicalSnapshot {
    /// `None` when there are too few candles for every indicator (MACD needs 26)
    pub fn analyze(symbol: &str, interval: &str, candles: &[Candle]) -> Option<Self> {
        let last = candles.last()?;
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        Some(Self {
            symbol: symbol.to_uppercase(),
            interval: interval.to_string(),
            timestamp: last.open_time,
            current_price: last.close,
            ema20: calculate_ema(&closes, 20)?,
            macd: calculate_macd(&closes)?,
            rsi14: calculate_rsi(&closes, 14)?,
            rsi7: calculate_rsi(&closes, 7)?,
            atr14: calculate_atr(candles, 14)?,
            volume_current: last.volume,
            volume_average: calculate_sma(&volumes, VOLUME_LOOKBACK.min(volumes.len()))?,
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== {} ({}) ===", self.symbol, self.interval);
        let _ = writeln!(out, "Timestamp (UTC): {}", self.timestamp.to_rfc3339());
        let _ = writeln!(out, "Price: {:.4}", self.current_price);
        let _ = writeln!(out, "EMA20: {:.4}", self.ema20);
        let _ = writeln!(out, "MACD: {:.4}", self.macd);
        let _ = writeln!(out, "RSI(14): {:.2}", self.rsi14);
        let _ = writeln!(out, "RSI(7): {:.2}", self.rsi7);
        let _ = writeln!(out, "ATR(14): {:.4}", self.atr14);
        let _ = writeln!(out, "Volume (current candle): {:.4}", self.volume_current);
        let _ = writeln!(
            out,
            "Volume (avg last {}): {:.4}",
            VOLUME_LOOKBACK, self.volume_average
        );
        out
    }
}
