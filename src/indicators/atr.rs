use crate::models::Candle;

/// Average True Range with Wilder's smoothing.
///
/// True range is the widest of high-low, |high - prev close| and |low - prev close|.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs())
        })
        .collect();

    let n = period as f64;
    let seed = true_ranges[..period].iter().sum::<f64>() / n;

    Some(
        true_ranges[period..]
            .iter()
            .fold(seed, |atr, tr| (atr * (n - 1.0) + tr) / n),
    )
}
