use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLC candle.  Immutable once received; live-bar updates replace
/// the whole value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bar open time, UNIX seconds.
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// What a streaming update did to the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleUpdate {
    /// The live bar was revised in place.
    Revised,
    /// A new bar opened; the previous tail is now closed.
    Opened,
    /// The update was older than the tail and was dropped.
    Stale,
}

// ---------------------------------------------------------------------------
// CandleBuffer -- thread-safe bounded window per instrument
// ---------------------------------------------------------------------------

/// Thread-safe ring-buffer that stores the most recent candles per instrument.
///
/// Invariant: every ring holds at most `max_candles` entries in strictly
/// increasing `open_time` order.
pub struct CandleBuffer {
    buffers: RwLock<HashMap<String, VecDeque<Candle>>>,
    max_candles: usize,
}

impl CandleBuffer {
    /// Create a new buffer that retains at most `max_candles` candles per
    /// instrument.
    pub fn new(max_candles: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            max_candles: max_candles.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_candles
    }

    /// Replace the window for `symbol` with the tail of a venue snapshot.
    ///
    /// The venue delivers history oldest-first; anything out of order is
    /// sorted and duplicate open times keep the last occurrence.
    pub fn replace(&self, symbol: &str, candles: &[Candle]) {
        let mut sorted: Vec<Candle> = candles.to_vec();
        sorted.sort_by_key(|c| c.open_time);
        sorted.dedup_by(|later, earlier| {
            if later.open_time == earlier.open_time {
                *earlier = *later;
                true
            } else {
                false
            }
        });

        let start = sorted.len().saturating_sub(self.max_candles);
        let ring: VecDeque<Candle> = sorted[start..].iter().copied().collect();

        debug!(symbol, count = ring.len(), "candle window replaced");
        self.buffers.write().insert(symbol.to_string(), ring);
    }

    /// Apply a streaming update of the live bar.
    ///
    /// * Same `open_time` as the tail: the tail is replaced.
    /// * Newer `open_time`: appended, and the ring is trimmed to
    ///   `max_candles`.
    /// * Older `open_time`: ignored.
    pub fn update(&self, symbol: &str, candle: Candle) -> CandleUpdate {
        let mut map = self.buffers.write();
        let ring = map
            .entry(symbol.to_string())
            .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));

        match ring.back() {
            Some(last) if last.open_time == candle.open_time => {
                ring.pop_back();
                ring.push_back(candle);
                CandleUpdate::Revised
            }
            Some(last) if last.open_time > candle.open_time => CandleUpdate::Stale,
            _ => {
                ring.push_back(candle);
                while ring.len() > self.max_candles {
                    ring.pop_front();
                }
                CandleUpdate::Opened
            }
        }
    }

    /// Snapshot of the window for `symbol` (oldest-first).
    pub fn candles(&self, symbol: &str) -> Vec<Candle> {
        let map = self.buffers.read();
        map.get(symbol)
            .map(|ring| ring.iter().copied().collect())
            .unwrap_or_default()
    }

    /// All candles except the live tail, i.e. the bars that have closed.
    pub fn closed_candles(&self, symbol: &str) -> Vec<Candle> {
        let mut all = self.candles(symbol);
        all.pop();
        all
    }

    /// Close prices of the window (oldest-first).
    pub fn closes(&self, symbol: &str) -> Vec<f64> {
        self.candles(symbol).iter().map(|c| c.close).collect()
    }

    /// Close price of the most recent candle, if any.
    pub fn last_close(&self, symbol: &str) -> Option<f64> {
        let map = self.buffers.read();
        map.get(symbol).and_then(|ring| ring.back().map(|c| c.close))
    }

    pub fn count(&self, symbol: &str) -> usize {
        let map = self.buffers.read();
        map.get(symbol).map_or(0, VecDeque::len)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_candle(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
        }
    }

    fn assert_chronological(buf: &CandleBuffer, symbol: &str) {
        let candles = buf.candles(symbol);
        assert!(candles.len() <= buf.capacity());
        for w in candles.windows(2) {
            assert!(w[0].open_time < w[1].open_time, "out of order: {w:?}");
        }
    }

    #[test]
    fn snapshot_replace_keeps_tail() {
        let buf = CandleBuffer::new(3);
        let batch: Vec<Candle> = (0..5).map(|i| sample_candle(i * 60, 100.0 + i as f64)).collect();

        buf.replace("R_100", &batch);

        assert_eq!(buf.count("R_100"), 3);
        assert_eq!(buf.closes("R_100"), vec![102.0, 103.0, 104.0]);
        assert_chronological(&buf, "R_100");
    }

    #[test]
    fn replace_discards_previous_contents() {
        let buf = CandleBuffer::new(10);
        buf.replace("R_10", &[sample_candle(0, 1.0), sample_candle(60, 2.0)]);
        buf.replace("R_10", &[sample_candle(600, 9.0)]);
        assert_eq!(buf.closes("R_10"), vec![9.0]);
    }

    #[test]
    fn replace_sorts_unordered_batch() {
        let buf = CandleBuffer::new(10);
        buf.replace(
            "R_25",
            &[sample_candle(120, 3.0), sample_candle(0, 1.0), sample_candle(60, 2.0)],
        );
        assert_eq!(buf.closes("R_25"), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn live_bar_is_revised_then_rolled() {
        let buf = CandleBuffer::new(3);
        buf.replace("R_50", &[sample_candle(0, 10.0), sample_candle(60, 11.0)]);

        assert_eq!(buf.update("R_50", sample_candle(60, 11.5)), CandleUpdate::Revised);
        assert_eq!(buf.count("R_50"), 2);
        assert_eq!(buf.last_close("R_50"), Some(11.5));

        assert_eq!(buf.update("R_50", sample_candle(120, 12.0)), CandleUpdate::Opened);
        assert_eq!(buf.update("R_50", sample_candle(180, 13.0)), CandleUpdate::Opened);
        assert_eq!(buf.count("R_50"), 3);
        assert_eq!(buf.closes("R_50"), vec![11.5, 12.0, 13.0]);
        assert_eq!(buf.closed_candles("R_50").len(), 2);
    }

    #[test]
    fn stale_update_is_dropped() {
        let buf = CandleBuffer::new(5);
        buf.replace("R_75", &[sample_candle(60, 1.0), sample_candle(120, 2.0)]);
        assert_eq!(buf.update("R_75", sample_candle(0, 0.5)), CandleUpdate::Stale);
        assert_eq!(buf.closes("R_75"), vec![1.0, 2.0]);
    }

    #[test]
    fn capacity_holds_for_any_update_sequence() {
        let buf = CandleBuffer::new(7);
        let mut t = 0;
        for round in 0..40 {
            if round % 9 == 0 {
                let batch: Vec<Candle> =
                    (0..round).map(|i| sample_candle(t + i as i64 * 60, i as f64)).collect();
                buf.replace("R_100", &batch);
                t += round as i64 * 60;
            } else if round % 3 == 0 {
                buf.update("R_100", sample_candle(t, round as f64));
            } else {
                t += 60;
                buf.update("R_100", sample_candle(t, round as f64));
            }
            assert_chronological(&buf, "R_100");
        }
    }

    #[test]
    fn unknown_symbol_is_empty() {
        let buf = CandleBuffer::new(10);
        assert!(buf.candles("XYZ").is_empty());
        assert_eq!(buf.last_close("XYZ"), None);
        assert_eq!(buf.count("XYZ"), 0);
    }
}
