// =============================================================================
// Central Application State: the trading session
// =============================================================================
//
// The single source of truth for the engine.  Subsystems manage their own
// interior mutability; AppState ties them together and builds the status
// snapshot served to the stdin console and the REST API.
//
// Thread safety:
//   - Atomic counter for version tracking.
//   - parking_lot::RwLock for the small mutable collections held here.
//   - Arc wrappers for subsystems shared with spawned tasks.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::connection::ConnectionManager;
use crate::indicators::{IndicatorEngine, IndicatorParams, IndicatorSnapshot};
use crate::market_data::CandleBuffer;
use crate::risk::{RiskManager, SessionStats};
use crate::runtime_config::RuntimeConfig;
use crate::shutdown::ShutdownSignal;
use crate::strategy::{within_trading_hours, StrategyEngine};
use crate::trade_log::TradeSink;
use crate::trade_tracker::{Trade, TradeTracker};
use crate::types::Signal;

// =============================================================================
// Records
// =============================================================================

/// A recorded error event for the status error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// Latest evaluation result for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRecord {
    pub signal: Signal,
    pub indicators: IndicatorSnapshot,
    pub at: DateTime<Utc>,
}

/// Account balance as last reported by the venue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountBalance {
    pub balance: f64,
    pub currency: String,
}

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

// =============================================================================
// AppState
// =============================================================================

/// Session state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Incremented on every meaningful state mutation.
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub config_path: PathBuf,

    // ── Venue ───────────────────────────────────────────────────────────
    pub connection: Arc<ConnectionManager>,
    pub account: RwLock<AccountBalance>,

    // ── Market Data & Strategy ──────────────────────────────────────────
    pub candle_buffer: Arc<CandleBuffer>,
    pub strategy: StrategyEngine,
    pub last_signals: RwLock<HashMap<String, SignalRecord>>,

    // ── Risk & Trades ───────────────────────────────────────────────────
    pub risk: Arc<RiskManager>,
    pub tracker: Arc<TradeTracker>,

    // ── Error Log ───────────────────────────────────────────────────────
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Lifecycle ───────────────────────────────────────────────────────
    pub shutdown: ShutdownSignal,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire every subsystem from `config`.  The trade tracker starts with
    /// trading enabled according to `config.enable_trading`.
    pub fn new(
        config: RuntimeConfig,
        config_path: impl Into<PathBuf>,
        connection: Arc<ConnectionManager>,
        sink: Arc<dyn TradeSink>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let risk = Arc::new(RiskManager::new(
            config.risk_percent,
            config.min_stake,
            config.cooldown_seconds,
        ));
        let tracker = Arc::new(TradeTracker::new(
            connection.clone(),
            risk.clone(),
            sink,
            config.currency.clone(),
            config.duration_minutes,
            config.enable_trading,
        ));
        let strategy = StrategyEngine::new(
            IndicatorEngine::new(IndicatorParams::default()),
            config.trading_start_hour_utc,
            config.trading_end_hour_utc,
        );

        Self {
            state_version: AtomicU64::new(1),

            account: RwLock::new(AccountBalance {
                balance: 0.0,
                currency: config.currency.clone(),
            }),
            candle_buffer: Arc::new(CandleBuffer::new(config.max_candles)),
            runtime_config: Arc::new(RwLock::new(config)),
            config_path: config_path.into(),

            connection,
            strategy,
            last_signals: RwLock::new(HashMap::new()),

            risk,
            tracker,

            recent_errors: RwLock::new(Vec::new()),

            shutdown,
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Account ─────────────────────────────────────────────────────────

    pub fn set_balance(&self, balance: f64, currency: &str) {
        {
            let mut account = self.account.write();
            account.balance = balance;
            if !currency.is_empty() {
                account.currency = currency.to_string();
            }
        }
        self.increment_version();
    }

    pub fn balance(&self) -> f64 {
        self.account.read().balance
    }

    // ── Signals ─────────────────────────────────────────────────────────

    pub fn record_signal(&self, symbol: &str, record: SignalRecord) {
        self.last_signals.write().insert(symbol.to_string(), record);
        self.increment_version();
    }

    pub fn last_signal(&self, symbol: &str) -> Option<SignalRecord> {
        self.last_signals.read().get(symbol).copied()
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error message.  The ring buffer is capped at
    /// [`MAX_RECENT_ERRORS`].
    pub fn push_error(&self, msg: String) {
        let record = ErrorRecord {
            message: msg,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);

        self.increment_version();
    }

    // ── Trading switch ──────────────────────────────────────────────────

    /// Enable or disable live submission and persist the choice.
    pub fn set_trading_enabled(&self, enabled: bool) -> bool {
        self.tracker.set_trading_enabled(enabled);
        self.persist_trading_flag(enabled);
        enabled
    }

    /// Flip live submission and persist the choice.  Returns the new value.
    pub fn toggle_trading(&self) -> bool {
        let enabled = self.tracker.toggle_trading();
        self.persist_trading_flag(enabled);
        enabled
    }

    fn persist_trading_flag(&self, enabled: bool) {
        self.runtime_config.write().enable_trading = enabled;
        if let Err(e) = RuntimeConfig::persist_enable_trading(&self.config_path, enabled) {
            tracing::warn!(error = %e, "failed to persist trading switch");
        }
        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Serialisable view of the whole session at `now`.
    pub fn build_snapshot(&self, now: DateTime<Utc>) -> StatusSnapshot {
        let config = self.runtime_config.read();
        let account = self.account.read().clone();
        let session = self.risk.stats();
        let last_signals = self.last_signals.read();

        let symbols = config
            .symbols
            .iter()
            .map(|symbol| SymbolStatus {
                symbol: symbol.clone(),
                candles: self.candle_buffer.count(symbol),
                last_close: self.candle_buffer.last_close(symbol),
                last_signal: last_signals.get(symbol).copied(),
            })
            .collect();

        StatusSnapshot {
            state_version: self.current_state_version(),
            server_time: now.timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),

            connection: self.connection.state().to_string(),
            loginid: self.connection.account().map(|a| a.loginid),
            subscriptions: self.connection.subscription_count(),
            reconnects: self.connection.reconnect_count(),

            balance: account.balance,
            currency: account.currency,

            trading_enabled: self.tracker.is_trading_enabled(),
            trading_hours: TradingHours {
                start_hour_utc: config.trading_start_hour_utc,
                end_hour_utc: config.trading_end_hour_utc,
                open_now: within_trading_hours(
                    now.hour(),
                    config.trading_start_hour_utc,
                    config.trading_end_hour_utc,
                ),
            },
            cooldown_remaining_secs: self.risk.cooldown_remaining(now),

            win_rate: session.win_rate(),
            session,
            active_trades: self.tracker.active_trades(),
            symbols,
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,

    pub connection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loginid: Option<String>,
    pub subscriptions: usize,
    pub reconnects: u64,

    pub balance: f64,
    pub currency: String,

    pub trading_enabled: bool,
    pub trading_hours: TradingHours,
    pub cooldown_remaining_secs: i64,

    pub session: SessionStats,
    pub win_rate: f64,
    pub active_trades: Vec<Trade>,
    pub symbols: Vec<SymbolStatus>,
    pub recent_errors: Vec<ErrorRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradingHours {
    pub start_hour_utc: u32,
    pub end_hour_utc: u32,
    pub open_now: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolStatus {
    pub symbol: String,
    pub candles: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_close: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_signal: Option<SignalRecord>,
}

// =============================================================================
// Test fixture
// =============================================================================


// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::fixture::{session, test_config};
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn snapshot_reports_session_view() {
        let s = session(test_config());
        s.state.set_balance(500.0, "USD");
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap();

        let snap = s.state.build_snapshot(now);
        assert_eq!(snap.balance, 500.0);
        assert_eq!(snap.currency, "USD");
        assert_eq!(snap.connection, "Disconnected");
        assert!(snap.trading_enabled);
        assert!(!snap.trading_hours.open_now);
        assert_eq!(snap.symbols.len(), 2);
        assert_eq!(snap.symbols[0].candles, 0);
        assert!(snap.active_trades.is_empty());

        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["tradingHours"]["startHourUtc"], 6);
        assert_eq!(json["session"]["tradesSubmitted"], 0);
    }

    #[test]
    fn toggle_persists_to_config_file() {
        let s = session(test_config());
        assert!(!s.state.toggle_trading());
        assert!(!s.state.tracker.is_trading_enabled());

        let saved = RuntimeConfig::load(&s.state.config_path).unwrap();
        assert!(!saved.enable_trading);
        assert!(s.state.set_trading_enabled(true));
        assert!(RuntimeConfig::load(&s.state.config_path).unwrap().enable_trading);
    }

    #[test]
    fn toggle_leaves_overridden_token_off_disk() {
        let s = session(RuntimeConfig {
            token: "token-from-env".into(),
            ..test_config()
        });
        let on_disk = RuntimeConfig {
            token: "token-from-file".into(),
            ..test_config()
        };
        on_disk.save(&s.state.config_path).unwrap();

        assert!(!s.state.toggle_trading());

        let saved = RuntimeConfig::load(&s.state.config_path).unwrap();
        assert!(!saved.enable_trading);
        assert_eq!(saved.token, "token-from-file");
        let raw = std::fs::read_to_string(&s.state.config_path).unwrap();
        assert!(!raw.contains("token-from-env"));
        assert_eq!(s.state.runtime_config.read().token, "token-from-env");
    }

    #[test]
    fn error_log_is_capped() {
        let s = session(test_config());
        for i in 0..(MAX_RECENT_ERRORS + 5) {
            s.state.push_error(format!("e{i}"));
        }
        let errors = s.state.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors[0].message, "e5");
    }
}
