// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// Formula:
//   k      = 2 / (span + 1)
//   EMA_0  = close_0
//   EMA_t  = close_t * k + EMA_{t-1} * (1 - k)
//
// The recursion is seeded with the first close (no SMA warm-up), so the
// output has one value per input close.
// =============================================================================

/// Smoothing factor for a given span.
pub fn smoothing_factor(span: usize) -> f64 {
    2.0 / (span as f64 + 1.0)
}

/// Compute the EMA series for `closes` with the given `span`.
///
/// Returns an empty `Vec` when the input is empty or `span == 0`.
pub fn calculate_ema(closes: &[f64], span: usize) -> Vec<f64> {
    if span == 0 || closes.is_empty() {
        return Vec::new();
    }

    let k = smoothing_factor(span);
    let mut result = Vec::with_capacity(closes.len());
    let mut prev = closes[0];
    result.push(prev);

    for &close in &closes[1..] {
        let ema = close * k + prev * (1.0 - k);
        result.push(ema);
        prev = ema;
    }

    result
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ema_empty_input() {
        assert!(calculate_ema(&[], 5).is_empty());
    }

    #[test]
    fn ema_span_zero() {
        assert!(calculate_ema(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn ema_seeded_with_first_price() {
        let ema = calculate_ema(&[42.0], 10);
        assert_eq!(ema, vec![42.0]);
    }

    #[test]
    fn ema_hand_computed_five_points() {
        // span 3 => k = 0.5
        // ema0 = 10
        // ema1 = 12*0.5 + 10*0.5   = 11
        // ema2 = 14*0.5 + 11*0.5   = 12.5
        // ema3 = 13*0.5 + 12.5*0.5 = 12.75
        // ema4 = 17*0.5 + 12.75*0.5 = 14.875
        let closes = [10.0, 12.0, 14.0, 13.0, 17.0];
        let ema = calculate_ema(&closes, 3);
        assert_eq!(ema, vec![10.0, 11.0, 12.5, 12.75, 14.875]);
    }

    #[test]
    fn ema_recursion_matches_formula_exactly() {
        let closes = [1.25, 3.5, 2.0, 8.75, 4.125];
        let span = 10;
        let k = 2.0 / 11.0;
        let ema = calculate_ema(&closes, span);

        let mut expected = closes[0];
        assert_eq!(ema[0], expected);
        for t in 1..closes.len() {
            expected = closes[t] * k + expected * (1.0 - k);
            assert_eq!(ema[t], expected, "mismatch at t={t}");
        }
    }

    #[test]
    fn ema_fast_tracks_rise_sooner_than_slow() {
        let closes: Vec<f64> = (1..=50).map(|x| x as f64).collect();
        let fast = calculate_ema(&closes, 10);
        let slow = calculate_ema(&closes, 20);
        assert!(fast.last().unwrap() > slow.last().unwrap());
    }
}
