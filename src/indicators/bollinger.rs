// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Middle band = SMA(period) of close, upper/lower = middle ± k·σ where σ is
// the rolling *sample* standard deviation (n - 1 denominator).

/// Bands for one index of the series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bands for the window ending at the last element of `closes`.
///
/// Returns `None` when fewer than `period` closes are available or
/// `period < 2` (the sample deviation is undefined).
pub fn calculate_bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerResult> {
    if period < 2 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    let variance =
        window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / (period - 1) as f64;
    let std_dev = variance.sqrt();

    Some(BollingerResult {
        upper: middle + num_std * std_dev,
        middle,
        lower: middle - num_std * std_dev,
    })
}

/// Rolling bands aligned with `closes`; `None` until a full window exists.
pub fn bollinger_series(closes: &[f64], period: usize, num_std: f64) -> Vec<Option<BollingerResult>> {
    (0..closes.len())
        .map(|t| calculate_bollinger(&closes[..=t], period, num_std))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_basic() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!((bb.middle - 10.5).abs() < 1e-12);
        assert!(bb.upper > bb.middle);
        assert!(bb.lower < bb.middle);
        assert!(((bb.upper - bb.middle) - (bb.middle - bb.lower)).abs() < 1e-12);
    }

    #[test]
    fn bollinger_uses_sample_deviation() {
        // [2, 4, 4, 4, 5, 5, 7, 9]: mean 5, sum of squares 32,
        // sample variance 32/7.
        let closes = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let bb = calculate_bollinger(&closes, 8, 2.0).unwrap();
        let sigma = (32.0_f64 / 7.0).sqrt();
        assert!((bb.upper - (5.0 + 2.0 * sigma)).abs() < 1e-12);
        assert!((bb.lower - (5.0 - 2.0 * sigma)).abs() < 1e-12);
    }

    #[test]
    fn bollinger_insufficient_data() {
        assert!(calculate_bollinger(&[1.0, 2.0, 3.0], 20, 2.0).is_none());
    }

    #[test]
    fn bollinger_flat_collapses_bands() {
        let bb = calculate_bollinger(&[100.0; 20], 20, 2.0).unwrap();
        assert_eq!(bb.upper, 100.0);
        assert_eq!(bb.lower, 100.0);
    }

    #[test]
    fn series_only_uses_trailing_window() {
        let mut closes = vec![1000.0];
        closes.extend(std::iter::repeat(50.0).take(20));
        let series = bollinger_series(&closes, 20, 2.0);
        assert!(series[18].is_none());
        assert!(series[19].unwrap().upper > 50.0);
        // The outlier has left the window by the last index.
        assert_eq!(series[20].unwrap().upper, 50.0);
    }
}
