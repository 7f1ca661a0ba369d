// =============================================================================
// Risk Manager: stake sizing and global submission pacing
// =============================================================================
//
//   stake    = round(risk_percent / 100 * balance, 2), floored at min_stake
//   cooldown = at most one submission per `cooldown_seconds`, across ALL
//              instruments; the slot is reserved at submit time, before the
//              venue confirms.
//
// The manager also keeps the session counters (trades, wins, losses,
// realised profit) that the status surfaces report.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Session counters for status display.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub trades_submitted: u32,
    pub wins: u32,
    pub losses: u32,
    pub failed: u32,
    pub profit_today: f64,
    #[serde(default)]
    pub last_submit_time: Option<DateTime<Utc>>,
}

impl SessionStats {
    /// Win rate over settled trades, in percent.
    pub fn win_rate(&self) -> f64 {
        let settled = self.wins + self.losses;
        if settled == 0 {
            0.0
        } else {
            self.wins as f64 / settled as f64 * 100.0
        }
    }
}

// ---------------------------------------------------------------------------
// Internal mutable state (behind RwLock)
// ---------------------------------------------------------------------------

struct Inner {
    last_submit_time: Option<DateTime<Utc>>,
    trades_submitted: u32,
    wins: u32,
    losses: u32,
    failed: u32,
    profit_today: f64,
}

// ---------------------------------------------------------------------------
// Risk Manager
// ---------------------------------------------------------------------------

pub struct RiskManager {
    state: RwLock<Inner>,
    /// Percent of balance staked per trade (2.0 = 2 %).
    risk_percent: f64,
    /// Venue minimum stake; smaller computed stakes are raised to it.
    min_stake: f64,
    cooldown_seconds: i64,
}

impl RiskManager {
    pub fn new(risk_percent: f64, min_stake: f64, cooldown_seconds: u64) -> Self {
        info!(risk_percent, min_stake, cooldown_seconds, "RiskManager initialised");
        Self {
            state: RwLock::new(Inner {
                last_submit_time: None,
                trades_submitted: 0,
                wins: 0,
                losses: 0,
                failed: 0,
                profit_today: 0.0,
            }),
            risk_percent,
            min_stake,
            cooldown_seconds: i64::try_from(cooldown_seconds).unwrap_or(i64::MAX),
        }
    }

    pub fn risk_percent(&self) -> f64 {
        self.risk_percent
    }

    // -------------------------------------------------------------------------
    // Sizing
    // -------------------------------------------------------------------------

    /// Stake for `balance` at `risk_percent`, rounded to cents and clamped to
    /// the configured minimum.
    pub fn compute_stake(&self, balance: f64, risk_percent: f64) -> f64 {
        let raw = round_cents(risk_percent / 100.0 * balance);
        if raw < self.min_stake {
            debug!(raw, min_stake = self.min_stake, "stake below minimum, clamping");
            self.min_stake
        } else {
            raw
        }
    }

    // -------------------------------------------------------------------------
    // Pacing
    // -------------------------------------------------------------------------

    /// Whether the global cooldown has elapsed at `now`.
    pub fn can_submit(&self, now: DateTime<Utc>) -> bool {
        Self::gate_open(self.state.read().last_submit_time, now, self.cooldown_seconds)
    }

    /// Atomically check the cooldown and, if open, reserve the slot at `now`.
    pub fn try_reserve(&self, now: DateTime<Utc>) -> bool {
        let mut s = self.state.write();
        if !Self::gate_open(s.last_submit_time, now, self.cooldown_seconds) {
            return false;
        }
        s.last_submit_time = Some(now);
        s.trades_submitted += 1;
        true
    }

    /// Seconds left until the gate reopens (0 when open).
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> i64 {
        match self.state.read().last_submit_time {
            Some(last) => (self.cooldown_seconds - (now - last).num_seconds()).max(0),
            None => 0,
        }
    }

    fn gate_open(last: Option<DateTime<Utc>>, now: DateTime<Utc>, cooldown: i64) -> bool {
        match last {
            Some(last) => (now - last).num_seconds() >= cooldown,
            None => true,
        }
    }

    // -------------------------------------------------------------------------
    // Trade recording
    // -------------------------------------------------------------------------

    /// Record a settled trade's profit.
    pub fn record_settlement(&self, profit: f64) {
        let mut s = self.state.write();
        s.profit_today += profit;
        if profit > 0.0 {
            s.wins += 1;
        } else {
            s.losses += 1;
        }
    }

    pub fn record_failure(&self) {
        self.state.write().failed += 1;
    }

    pub fn stats(&self) -> SessionStats {
        let s = self.state.read();
        SessionStats {
            trades_submitted: s.trades_submitted,
            wins: s.wins,
            losses: s.losses,
            failed: s.failed,
            profit_today: s.profit_today,
            last_submit_time: s.last_submit_time,
        }
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
