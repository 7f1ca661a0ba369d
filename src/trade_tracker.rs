// =============================================================================
// Trade Lifecycle Tracker: state machine for submitted contracts
// =============================================================================
//
// Life-cycle:
//   Pending  ->  Confirmed  ->  Won | Lost
//   Pending  ->  Failed
//
// Correlation:
//   submit          inserts a Pending trade keyed by the request's req_id
//   buy reply       matched by req_id -> Confirmed (+ contract monitor) or Failed
//   contract update matched by contract_id; settled updates finish the trade
//
// Terminal trades leave the active map and are written to the trade log.
// Thread-safety: the active map is behind `parking_lot::RwLock` and is never
// held across an await.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::{ConnectionManager, ContractStatus, InboundMessage, Request};
use crate::error::{EngineError, EngineResult};
use crate::risk::RiskManager;
use crate::trade_log::{TradeRecord, TradeSink};
use crate::types::{Direction, TradeStatus};

// ---------------------------------------------------------------------------
// Trade model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Local identifier (UUID v4).
    pub id: String,
    /// `req_id` of the buy request.
    pub correlation_id: u64,
    pub symbol: String,
    pub direction: Direction,
    pub stake: f64,
    pub submitted_at: DateTime<Utc>,
    pub status: TradeStatus,
    pub contract_id: Option<u64>,
    pub buy_price: Option<f64>,
    pub profit: Option<f64>,
}

impl Trade {
    pub fn new(
        correlation_id: u64,
        symbol: &str,
        direction: Direction,
        stake: f64,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            correlation_id,
            symbol: symbol.to_string(),
            direction,
            stake,
            submitted_at,
            status: TradeStatus::Pending,
            contract_id: None,
            buy_price: None,
            profit: None,
        }
    }

    /// Move to `next`, or fail with `InvalidTransition` leaving the trade
    /// untouched.
    pub fn transition(&mut self, next: TradeStatus) -> EngineResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            debug!(trade = %self.id, status = %next, "trade closed");
        }
        Ok(())
    }

    /// Trade-log row for the current state.  Until a contract id exists the
    /// correlation id fills that column.
    pub fn record(&self) -> TradeRecord {
        TradeRecord {
            time: self.submitted_at.to_rfc3339(),
            direction: self.direction,
            stake: self.stake,
            result: self.status.log_label().to_string(),
            contract_id: Some(
                self.contract_id
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| self.correlation_id.to_string()),
            ),
            profit: self.profit,
        }
    }
}

// ---------------------------------------------------------------------------
// Submission outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// Buy request sent; the trade is Pending under this correlation id.
    Submitted(u64),
    /// Trading disabled: logged only, nothing recorded.
    Paper,
    /// Global cooldown still running.
    CoolingDown { remaining_secs: i64 },
    /// Not attempted (connection not ready).
    Blocked(String),
    /// The send itself failed; the trade was recorded as Failed.
    Failed(String),
}

impl std::fmt::Display for SubmitOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Submitted(id) => write!(f, "Submitted({id})"),
            Self::Paper => write!(f, "Paper"),
            Self::CoolingDown { remaining_secs } => write!(f, "CoolingDown({remaining_secs}s)"),
            Self::Blocked(reason) => write!(f, "Blocked({reason})"),
            Self::Failed(err) => write!(f, "Failed({err})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

pub struct TradeTracker {
    connection: Arc<ConnectionManager>,
    risk: Arc<RiskManager>,
    sink: Arc<dyn TradeSink>,
    currency: String,
    duration_minutes: u32,
    trading_enabled: AtomicBool,
    active: RwLock<HashMap<u64, Trade>>,
}

impl TradeTracker {
    pub fn new(
        connection: Arc<ConnectionManager>,
        risk: Arc<RiskManager>,
        sink: Arc<dyn TradeSink>,
        currency: impl Into<String>,
        duration_minutes: u32,
        trading_enabled: bool,
    ) -> Self {
        Self {
            connection,
            risk,
            sink,
            currency: currency.into(),
            duration_minutes,
            trading_enabled: AtomicBool::new(trading_enabled),
            active: RwLock::new(HashMap::new()),
        }
    }

    // -------------------------------------------------------------------------
    // Trading switch
    // -------------------------------------------------------------------------

    pub fn is_trading_enabled(&self) -> bool {
        self.trading_enabled.load(Ordering::SeqCst)
    }

    pub fn set_trading_enabled(&self, enabled: bool) {
        self.trading_enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "trading switch set");
    }

    /// Flip the switch and return the new value.
    pub fn toggle_trading(&self) -> bool {
        let enabled = !self.trading_enabled.fetch_xor(true, Ordering::SeqCst);
        info!(enabled, "trading switch toggled");
        enabled
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Active trades ordered by submission.
    pub fn active_trades(&self) -> Vec<Trade> {
        let mut trades: Vec<Trade> = self.active.read().values().cloned().collect();
        trades.sort_by_key(|t| t.correlation_id);
        trades
    }

    pub fn active_count(&self) -> usize {
        self.active.read().len()
    }

    pub fn get(&self, correlation_id: u64) -> Option<Trade> {
        self.active.read().get(&correlation_id).cloned()
    }

    // -------------------------------------------------------------------------
    // Submit
    // -------------------------------------------------------------------------

    /// Submit a contract purchase at `now`.
    pub async fn submit(
        &self,
        symbol: &str,
        direction: Direction,
        stake: f64,
        now: DateTime<Utc>,
    ) -> SubmitOutcome {
        if !self.is_trading_enabled() {
            info!(symbol, %direction, stake, "paper trade, trading disabled");
            return SubmitOutcome::Paper;
        }
        if !self.connection.is_ready() {
            warn!(symbol, %direction, state = %self.connection.state(), "submission blocked, connection not ready");
            return SubmitOutcome::Blocked("connection not ready".into());
        }
        if !self.risk.try_reserve(now) {
            let remaining_secs = self.risk.cooldown_remaining(now);
            info!(symbol, %direction, remaining_secs, "submission skipped, cooldown active");
            return SubmitOutcome::CoolingDown { remaining_secs };
        }

        let correlation_id = self.connection.allocate_req_id();
        let trade = Trade::new(correlation_id, symbol, direction, stake, now);
        self.active.write().insert(correlation_id, trade.clone());

        let request = Request::Buy {
            symbol: symbol.to_string(),
            direction,
            stake,
            currency: self.currency.clone(),
            duration_minutes: self.duration_minutes,
        };

        match self.connection.send_tracked(correlation_id, &request).await {
            Ok(()) => {
                info!(
                    correlation_id,
                    trade_id = %trade.id,
                    symbol,
                    %direction,
                    stake,
                    "trade submitted"
                );
                self.write_log(&trade);
                SubmitOutcome::Submitted(correlation_id)
            }
            Err(e) => {
                warn!(correlation_id, symbol, error = %e, "buy request could not be sent");
                if let Err(err) = self.fail(correlation_id, &e) {
                    warn!(correlation_id, error = %err, "could not mark trade failed");
                }
                SubmitOutcome::Failed(e.to_string())
            }
        }
    }

    // -------------------------------------------------------------------------
    // Buy replies
    // -------------------------------------------------------------------------

    /// Apply the venue's reply to a buy request.  Replies for unknown
    /// correlation ids are ignored.
    pub async fn on_buy_reply(&self, req_id: Option<u64>, message: &InboundMessage) -> EngineResult<()> {
        let Some(correlation_id) = req_id else {
            warn!(kind = message.kind(), "buy reply without req_id ignored");
            return Ok(());
        };

        match message {
            InboundMessage::Buy {
                contract_id,
                buy_price,
            } => {
                {
                    let mut active = self.active.write();
                    let Some(trade) = active.get_mut(&correlation_id) else {
                        debug!(correlation_id, "buy reply for unknown trade ignored");
                        return Ok(());
                    };
                    trade.transition(TradeStatus::Confirmed)?;
                    trade.contract_id = Some(*contract_id);
                    trade.buy_price = Some(*buy_price);
                }
                info!(correlation_id, contract_id, buy_price, "trade confirmed");

                let monitor = Request::ContractMonitor {
                    contract_id: *contract_id,
                };
                if let Err(e) = self.connection.subscribe_tracked(monitor).await {
                    warn!(contract_id, error = %e, "contract monitor not sent, will replay after reconnect");
                }
                Ok(())
            }
            InboundMessage::Error { code, message, .. } => {
                let rejection = EngineError::TradeRejected(format!("{code}: {message}"));
                warn!(correlation_id, error = %rejection, "buy rejected by venue");
                self.fail(correlation_id, &rejection)
            }
            other => {
                debug!(kind = other.kind(), "not a buy reply");
                Ok(())
            }
        }
    }

    /// Pending -> Failed, remove, log.
    fn fail(&self, correlation_id: u64, reason: &EngineError) -> EngineResult<()> {
        let failed = {
            let mut active = self.active.write();
            let Some(trade) = active.get_mut(&correlation_id) else {
                return Ok(());
            };
            trade.transition(TradeStatus::Failed)?;
            active.remove(&correlation_id)
        };
        if let Some(trade) = failed {
            self.risk.record_failure();
            warn!(correlation_id, trade_id = %trade.id, reason = %reason, "trade failed");
            self.write_log(&trade);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Contract monitor
    // -------------------------------------------------------------------------

    /// Apply a contract-monitor update.  Returns the settled trade when the
    /// update finished one.
    pub async fn on_contract_update(
        &self,
        subscription_id: Option<&str>,
        status: &ContractStatus,
    ) -> EngineResult<Option<Trade>> {
        if !status.is_sold {
            return Ok(None);
        }

        let profit = status.sell_price - status.buy_price;
        let settled = {
            let mut active = self.active.write();
            let Some(correlation_id) = active
                .values()
                .find(|t| t.contract_id == Some(status.contract_id))
                .map(|t| t.correlation_id)
            else {
                debug!(contract_id = status.contract_id, "update for unknown contract ignored");
                return Ok(None);
            };
            let Some(trade) = active.get_mut(&correlation_id) else {
                return Ok(None);
            };
            let next = if profit > 0.0 {
                TradeStatus::Won
            } else {
                TradeStatus::Lost
            };
            trade.transition(next)?;
            trade.profit = Some(profit);
            active.remove(&correlation_id)
        };

        let Some(trade) = settled else {
            return Ok(None);
        };
        self.risk.record_settlement(profit);
        info!(
            contract_id = status.contract_id,
            trade_id = %trade.id,
            result = trade.status.log_label(),
            profit,
            "trade settled"
        );
        self.write_log(&trade);

        if let Some(sub_id) = subscription_id {
            if let Err(e) = self.connection.forget(sub_id).await {
                warn!(subscription_id = sub_id, error = %e, "could not forget contract monitor");
            }
        }
        Ok(Some(trade))
    }

    fn write_log(&self, trade: &Trade) {
        if let Err(e) = self.sink.record(&trade.record()) {
            warn!(trade_id = %trade.id, error = %e, "trade log write failed");
        }
    }
}

impl std::fmt::Debug for TradeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeTracker")
            .field("currency", &self.currency)
            .field("duration_minutes", &self.duration_minutes)
            .field("trading_enabled", &self.is_trading_enabled())
            .field("active", &self.active_count())
            .finish()
    }
}
