// =============================================================================
// Runtime Configuration: flat key/value engine settings with atomic save
// =============================================================================
//
// The configuration file is a flat JSON object.  Every key carries a serde
// default so that a partial file (or an older one) still loads, and a missing
// file is synthesised from the defaults and written back to disk.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::indicators::IndicatorParams;

/// Credential value shipped in the default file.  Starting with it is refused.
pub const PLACEHOLDER_TOKEN: &str = "your_deriv_api_token";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_token() -> String {
    PLACEHOLDER_TOKEN.to_string()
}

fn default_endpoint() -> String {
    "wss://ws.derivws.com/websockets/v3?app_id=1089".to_string()
}

fn default_symbols() -> Vec<String> {
    vec![
        "R_100".to_string(),
        "R_10".to_string(),
        "R_25".to_string(),
        "R_50".to_string(),
        "R_75".to_string(),
    ]
}

fn default_candle_interval_seconds() -> u32 {
    60
}

fn default_max_candles() -> usize {
    100
}

fn default_risk_percent() -> f64 {
    2.0
}

fn default_min_stake() -> f64 {
    1.0
}

fn default_cooldown_seconds() -> u64 {
    120
}

fn default_trading_start_hour_utc() -> u32 {
    6
}

fn default_trading_end_hour_utc() -> u32 {
    20
}

fn default_duration_minutes() -> u32 {
    1
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_trade_log_path() -> String {
    "trade_log.csv".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    /// API credential sent in the `authorize` handshake.
    #[serde(default = "default_token")]
    pub token: String,

    /// WebSocket endpoint of the venue (including the application id).
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Instruments subscribed and traded.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Candle granularity in seconds.
    #[serde(default = "default_candle_interval_seconds")]
    pub candle_interval_seconds: u32,

    /// Capacity of the per-instrument candle buffer.
    #[serde(default = "default_max_candles")]
    pub max_candles: usize,

    /// Percentage of the balance committed per trade (2.0 means 2 %).
    #[serde(default = "default_risk_percent")]
    pub risk_percent: f64,

    /// Smallest stake the venue accepts.
    #[serde(default = "default_min_stake")]
    pub min_stake: f64,

    /// Global pause between two order submissions.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,

    /// Trading window start, inclusive, UTC hour.
    #[serde(default = "default_trading_start_hour_utc")]
    pub trading_start_hour_utc: u32,

    /// Trading window end, exclusive, UTC hour.
    #[serde(default = "default_trading_end_hour_utc")]
    pub trading_end_hour_utc: u32,

    /// Contract duration in minutes.
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: u32,

    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default = "default_trade_log_path")]
    pub trade_log_path: String,

    /// When false every signal takes the paper path.
    #[serde(default = "default_true")]
    pub enable_trading: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            token: default_token(),
            endpoint: default_endpoint(),
            symbols: default_symbols(),
            candle_interval_seconds: default_candle_interval_seconds(),
            max_candles: default_max_candles(),
            risk_percent: default_risk_percent(),
            min_stake: default_min_stake(),
            cooldown_seconds: default_cooldown_seconds(),
            trading_start_hour_utc: default_trading_start_hour_utc(),
            trading_end_hour_utc: default_trading_end_hour_utc(),
            duration_minutes: default_duration_minutes(),
            currency: default_currency(),
            trade_log_path: default_trade_log_path(),
            enable_trading: true,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            enable_trading = config.enable_trading,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Load `path`, or synthesise the defaults and write them there when the
    /// file does not exist yet.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        warn!(path = %path.display(), "config file missing, writing defaults");
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Rewrite only `enableTrading` in the file at `path`.  Every other
    /// field keeps its stored value, so process overrides (an env token,
    /// `--paper`) never reach disk.
    pub fn persist_enable_trading(path: impl AsRef<Path>, enabled: bool) -> Result<()> {
        let path = path.as_ref();
        let mut stored = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        stored.enable_trading = enabled;
        stored.save(path)
    }

    /// Reject settings the engine cannot start with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.token.trim().is_empty() || self.token == PLACEHOLDER_TOKEN {
            return Err(EngineError::Config(
                "API token not set; edit the config file with your venue token".into(),
            ));
        }
        if self.symbols.is_empty() {
            return Err(EngineError::Config("no symbols configured".into()));
        }
        // A new bar evaluates the closed bars only, one fewer than the window.
        let min_candles = IndicatorParams::default().min_candles();
        if self.max_candles <= min_candles {
            return Err(EngineError::Config(format!(
                "maxCandles must exceed {min_candles}, got {}",
                self.max_candles
            )));
        }
        if !(self.risk_percent > 0.0 && self.risk_percent <= 100.0) {
            return Err(EngineError::Config(format!(
                "riskPercent must be in (0, 100], got {}",
                self.risk_percent
            )));
        }
        if self.trading_start_hour_utc > 24 || self.trading_end_hour_utc > 24 {
            return Err(EngineError::Config("trading hours must be within 0..=24".into()));
        }
        Ok(())
    }
}
