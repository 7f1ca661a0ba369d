// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators the signal
// generator consumes.  Series helpers return one element per input close so
// that "current" and "previous" snapshots can be read off by index.

pub mod bollinger;
pub mod ema;
pub mod rsi;

use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use bollinger::bollinger_series;
use ema::calculate_ema;
use rsi::calculate_rsi;

// =============================================================================
// Parameters
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorParams {
    pub rsi_period: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub bb_period: usize,
    pub bb_std: f64,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            ema_fast: 10,
            ema_slow: 20,
            bb_period: 20,
            bb_std: 2.0,
        }
    }
}

impl IndicatorParams {
    /// Candles needed before two consecutive complete snapshots exist.
    pub fn min_candles(&self) -> usize {
        self.rsi_period.max(self.bb_period) + 1
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// All indicator values at one bar.  `rsi` may be non-finite (flat or purely
/// rising window); consumers must check.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub bb_upper: f64,
    pub bb_lower: f64,
    pub close: f64,
}

impl IndicatorSnapshot {
    pub fn is_finite(&self) -> bool {
        self.rsi.is_finite()
            && self.ema_fast.is_finite()
            && self.ema_slow.is_finite()
            && self.bb_upper.is_finite()
            && self.bb_lower.is_finite()
            && self.close.is_finite()
    }
}

/// The latest bar and the one before it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotPair {
    pub previous: IndicatorSnapshot,
    pub current: IndicatorSnapshot,
}

// =============================================================================
// Indicator Engine
// =============================================================================

/// Recomputes every series wholesale from the supplied closes.
#[derive(Debug, Clone, Default)]
pub struct IndicatorEngine {
    params: IndicatorParams,
}

impl IndicatorEngine {
    pub fn new(params: IndicatorParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &IndicatorParams {
        &self.params
    }

    /// Snapshot at every index of `closes` where all indicators are defined.
    fn snapshot_at(
        &self,
        t: usize,
        closes: &[f64],
        rsi: &[Option<rsi::RsiPoint>],
        fast: &[f64],
        slow: &[f64],
        bands: &[Option<bollinger::BollingerResult>],
    ) -> Option<IndicatorSnapshot> {
        let r = rsi.get(t).copied().flatten()?;
        let b = bands.get(t).copied().flatten()?;
        Some(IndicatorSnapshot {
            rsi: r.value,
            ema_fast: *fast.get(t)?,
            ema_slow: *slow.get(t)?,
            bb_upper: b.upper,
            bb_lower: b.lower,
            close: closes[t],
        })
    }

    /// Compute the current and previous snapshots.
    ///
    /// Fails with `InsufficientData` when fewer than
    /// [`IndicatorParams::min_candles`] closes are supplied.
    pub fn evaluate(&self, closes: &[f64]) -> EngineResult<SnapshotPair> {
        let need = self.params.min_candles();
        if closes.len() < need {
            return Err(EngineError::InsufficientData {
                have: closes.len(),
                need,
            });
        }

        let p = &self.params;
        let rsi = calculate_rsi(closes, p.rsi_period);
        let fast = calculate_ema(closes, p.ema_fast);
        let slow = calculate_ema(closes, p.ema_slow);
        let bands = bollinger_series(closes, p.bb_period, p.bb_std);

        let last = closes.len() - 1;
        let current = self.snapshot_at(last, closes, &rsi, &fast, &slow, &bands);
        let previous = self.snapshot_at(last - 1, closes, &rsi, &fast, &slow, &bands);

        match (previous, current) {
            (Some(previous), Some(current)) => Ok(SnapshotPair { previous, current }),
            _ => Err(EngineError::InsufficientData {
                have: closes.len(),
                need,
            }),
        }
    }
}
