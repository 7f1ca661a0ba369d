// =============================================================================
// Strategy: mean-reversion crossover signal
// =============================================================================
//
// Evaluated once per candle batch or closed bar.
//
// Pipeline:
//   1. Trading-hours filter (UTC, start <= hour < end)
//   2. Indicator snapshots for the last two bars (needs >= 21 closes)
//   3. Signal rules:
//        BUY  = rsi < 30, fast EMA crosses above slow, close <= lower band
//        SELL = rsi > 70, fast EMA crosses below slow, close >= upper band
//   4. Any non-finite input => no signal
// =============================================================================

use tracing::debug;

use crate::error::EngineError;
use crate::indicators::{IndicatorEngine, IndicatorSnapshot, SnapshotPair};
use crate::types::Signal;

pub const RSI_OVERSOLD: f64 = 30.0;
pub const RSI_OVERBOUGHT: f64 = 70.0;

// =============================================================================
// Signal rules
// =============================================================================

/// Pure signal function over the previous and current snapshots.
pub fn generate_signal(previous: &IndicatorSnapshot, current: &IndicatorSnapshot) -> Signal {
    if !previous.is_finite() || !current.is_finite() {
        return Signal::None;
    }

    let buy = current.rsi < RSI_OVERSOLD
        && previous.ema_fast < previous.ema_slow
        && current.ema_fast > current.ema_slow
        && current.close <= current.bb_lower;

    let sell = current.rsi > RSI_OVERBOUGHT
        && previous.ema_fast > previous.ema_slow
        && current.ema_fast < current.ema_slow
        && current.close >= current.bb_upper;

    if buy {
        Signal::Buy
    } else if sell {
        Signal::Sell
    } else {
        Signal::None
    }
}

/// `start <= hour < end`, all UTC.
pub fn within_trading_hours(hour: u32, start: u32, end: u32) -> bool {
    start <= hour && hour < end
}

// =============================================================================
// Evaluation cycle
// =============================================================================

/// Outcome of one evaluation cycle for an instrument.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    OutsideHours { hour: u32 },
    InsufficientData { have: usize, need: usize },
    Evaluated { signal: Signal, snapshots: SnapshotPair },
}

pub struct StrategyEngine {
    indicators: IndicatorEngine,
    start_hour: u32,
    end_hour: u32,
}

impl StrategyEngine {
    pub fn new(indicators: IndicatorEngine, start_hour: u32, end_hour: u32) -> Self {
        Self {
            indicators,
            start_hour,
            end_hour,
        }
    }

    /// Run one cycle over `closes` (oldest-first) at UTC hour `hour`.
    pub fn evaluate(&self, symbol: &str, closes: &[f64], hour: u32) -> Evaluation {
        if !within_trading_hours(hour, self.start_hour, self.end_hour) {
            debug!(symbol, hour, "outside trading hours");
            return Evaluation::OutsideHours { hour };
        }

        match self.indicators.evaluate(closes) {
            Ok(snapshots) => {
                let signal = generate_signal(&snapshots.previous, &snapshots.current);
                debug!(
                    symbol,
                    rsi = snapshots.current.rsi,
                    ema_fast = snapshots.current.ema_fast,
                    ema_slow = snapshots.current.ema_slow,
                    close = snapshots.current.close,
                    %signal,
                    "evaluated"
                );
                Evaluation::Evaluated { signal, snapshots }
            }
            Err(EngineError::InsufficientData { have, need }) => {
                debug!(symbol, have, need, "insufficient candles, cycle skipped");
                Evaluation::InsufficientData { have, need }
            }
            Err(e) => {
                // evaluate() only fails with InsufficientData today.
                debug!(symbol, error = %e, "indicator evaluation failed");
                Evaluation::InsufficientData {
                    have: closes.len(),
                    need: self.indicators.params().min_candles(),
                }
            }
        }
    }
}
