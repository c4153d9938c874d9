/// Mean of the last `period` values
pub fn calculate_sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let sum: f64 = values.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Exponential moving average at the last value, seeded with the SMA of the first `period`
pub fn calculate_ema(values: &[f64], period: usize) -> Option<f64> {
    let seed = calculate_sma(values.get(..period)?, period)?;
    let k = 2.0 / (period as f64 + 1.0);

    Some(
        values[period..]
            .iter()
            .fold(seed, |ema, value| (value - ema) * k + ema),
    )
}

/// MACD line (EMA12 - EMA26) at the last close
pub fn calculate_macd(closes: &[f64]) -> Option<f64> {
    Some(calculate_ema(closes, 12)? - calculate_ema(closes, 26)?)
}
