/// Relative Strength Index with Wilder's smoothing.
///
/// The first average gain/loss is a plain mean over `period` changes, later
/// changes are smoothed as `(prev * (period - 1) + current) / period`.
/// Above 70 reads as overbought, below 30 as oversold.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let gain = |c: &f64| c.max(0.0);
    let loss = |c: &f64| (-c).max(0.0);

    let n = period as f64;
    let mut avg_gain = changes[..period].iter().map(gain).sum::<f64>() / n;
    let mut avg_loss = changes[..period].iter().map(loss).sum::<f64>() / n;

    for change in &changes[period..] {
        avg_gain = (avg_gain * (n - 1.0) + gain(change)) / n;
        avg_loss = (avg_loss * (n - 1.0) + loss(change)) / n;
    }

    if avg_loss == 0.0 {
        // Flat series sits in the middle
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}
