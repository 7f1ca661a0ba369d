// =============================================================================
// Relative Strength Index (RSI), simple-average variant
// =============================================================================
//
// Step 1: delta[t] = close[t] - close[t-1]
// Step 2: gain[t] = max(delta[t], 0),  loss[t] = max(-delta[t], 0)
// Step 3: avg_gain / avg_loss = simple moving average of the last `period`
//          gains / losses (NOT Wilder's exponential smoothing)
// Step 4: RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS)
//
// The division is left to IEEE arithmetic: avg_loss == 0 yields RS = inf and
// RSI = 100, and a flat window yields NaN.  Callers must check `is_finite`.
// =============================================================================

/// One RSI observation together with the averages it was derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RsiPoint {
    pub avg_gain: f64,
    pub avg_loss: f64,
    pub value: f64,
}

/// Compute the RSI series aligned with `closes`.
///
/// Element `t` is `None` until a full window of `period` deltas exists, i.e.
/// for every `t < period`.  The output always has `closes.len()` elements.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<Option<RsiPoint>> {
    let mut result = vec![None; closes.len()];
    if period == 0 || closes.len() < period + 1 {
        return result;
    }

    let gains: Vec<f64> = closes
        .windows(2)
        .map(|w| (w[1] - w[0]).max(0.0))
        .collect();
    let losses: Vec<f64> = closes
        .windows(2)
        .map(|w| (w[0] - w[1]).max(0.0))
        .collect();

    let period_f = period as f64;
    // deltas[i] belongs to close index i + 1.
    for end in period..=gains.len() {
        let avg_gain = gains[end - period..end].iter().sum::<f64>() / period_f;
        let avg_loss = losses[end - period..end].iter().sum::<f64>() / period_f;
        let rs = avg_gain / avg_loss;
        let value = 100.0 - 100.0 / (1.0 + rs);
        result[end] = Some(RsiPoint {
            avg_gain,
            avg_loss,
            value,
        });
    }

    result
}

/// Most recent RSI point, if the series is long enough.
pub fn current_rsi(closes: &[f64], period: usize) -> Option<RsiPoint> {
    calculate_rsi(closes, period).last().copied().flatten()
}
