// =============================================================================
// Engine: startup sequence, inbound dispatch and keepalive
// =============================================================================
//
// Startup:   connect + authorize -> balance subscription -> one candle
//            subscription per configured instrument.
// Dispatch:  one inbound message at a time, routed by kind:
//              balance          -> account balance
//              candles          -> window replaced, evaluated
//              ohlc             -> live bar updated; a newly opened bar
//                                  evaluates the closed bars
//              buy / buy error  -> trade tracker
//              contract update  -> trade tracker
// Keepalive: ping every `KEEPALIVE_INTERVAL`; a failed ping marks the
//            connection down and dispatch recovers it.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tracing::{debug, error, info, warn};

use crate::app_state::{AppState, SignalRecord};
use crate::connection::{Inbound, InboundMessage, Request};
use crate::error::{EngineError, EngineResult};
use crate::market_data::CandleUpdate;
use crate::strategy::Evaluation;
use crate::trade_tracker::SubmitOutcome;
use crate::types::Signal;

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

// =============================================================================
// Startup
// =============================================================================

/// Authorize and open the standing subscriptions.  A rejected candle
/// subscription for one instrument is logged and skipped.
pub async fn start(state: &AppState) -> EngineResult<()> {
    let account = state.connection.connect().await?;
    state.set_balance(account.balance, &account.currency);

    state.connection.subscribe(Request::Balance).await?;

    let (symbols, granularity, count) = {
        let config = state.runtime_config.read();
        (
            config.symbols.clone(),
            config.candle_interval_seconds,
            config.max_candles,
        )
    };
    for symbol in &symbols {
        let request = Request::CandleHistory {
            symbol: symbol.clone(),
            granularity,
            count,
        };
        match state.connection.subscribe(request).await {
            Ok(subscription_id) => {
                info!(symbol = %symbol, subscription_id = %subscription_id, "candle stream subscribed")
            }
            Err(e @ EngineError::Protocol(_)) => {
                warn!(symbol = %symbol, error = %e, "candle subscription rejected, instrument skipped");
                state.push_error(format!("{symbol}: {e}"));
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        instruments = symbols.len(),
        subscriptions = state.connection.subscription_count(),
        "engine started"
    );
    Ok(())
}

// =============================================================================
// Dispatch loop
// =============================================================================

/// Process inbound messages until shutdown.  A fatal connection error
/// triggers shutdown and is returned.
pub async fn run_dispatch(state: Arc<AppState>) -> EngineResult<()> {
    info!("dispatch loop running");
    loop {
        let inbound = match state.connection.next_message().await {
            Ok(Some(inbound)) => inbound,
            Ok(None) => {
                info!("dispatch loop stopped");
                return Ok(());
            }
            Err(e) => {
                error!(error = %e, "connection lost for good, shutting down");
                state.push_error(e.to_string());
                state.shutdown.trigger();
                return Err(e);
            }
        };

        if let Err(e) = handle_message(&state, inbound, Utc::now()).await {
            warn!(error = %e, "message handling failed");
            state.push_error(e.to_string());
        }
    }
}

/// Route one inbound message.
pub async fn handle_message(
    state: &AppState,
    inbound: Inbound,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    let Inbound {
        req_id,
        subscription_id,
        message: body,
    } = inbound;

    match body {
        InboundMessage::Balance { balance, currency } => {
            debug!(balance, currency = %currency, "balance update");
            state.set_balance(balance, &currency);
        }
        InboundMessage::Authorize(info) => {
            state.set_balance(info.balance, &info.currency);
        }
        InboundMessage::Candles { symbol, candles } => {
            state.candle_buffer.replace(&symbol, &candles);
            info!(symbol = %symbol, count = state.candle_buffer.count(&symbol), "candle history loaded");
            let closes = state.candle_buffer.closes(&symbol);
            evaluate_and_trade(state, &symbol, &closes, now).await;
        }
        InboundMessage::Ohlc { symbol, candle } => match state.candle_buffer.update(&symbol, candle) {
            CandleUpdate::Opened => {
                let closes: Vec<f64> = state
                    .candle_buffer
                    .closed_candles(&symbol)
                    .iter()
                    .map(|c| c.close)
                    .collect();
                evaluate_and_trade(state, &symbol, &closes, now).await;
            }
            CandleUpdate::Revised => {}
            CandleUpdate::Stale => {
                debug!(symbol = %symbol, open_time = candle.open_time, "stale bar dropped")
            }
        },
        InboundMessage::ContractUpdate(Some(status)) => {
            if state
                .tracker
                .on_contract_update(subscription_id.as_deref(), &status)
                .await?
                .is_some()
            {
                state.increment_version();
            }
        }
        InboundMessage::ContractUpdate(None) => debug!("empty contract update"),
        InboundMessage::Pong => debug!("pong"),
        InboundMessage::Forget { removed } => debug!(removed, "forget acknowledged"),
        InboundMessage::Error {
            msg_type,
            code,
            message,
        } if msg_type != "buy" => {
            warn!(msg_type = %msg_type, code = %code, message = %message, "venue error");
            state.push_error(format!("{msg_type}: {code}: {message}"));
        }
        reply @ (InboundMessage::Buy { .. } | InboundMessage::Error { .. }) => {
            state.tracker.on_buy_reply(req_id, &reply).await?;
            state.increment_version();
        }
    }
    Ok(())
}

// =============================================================================
// Evaluation
// =============================================================================

/// Run one evaluation cycle for `symbol` and act on the signal.
pub async fn evaluate_and_trade(
    state: &AppState,
    symbol: &str,
    closes: &[f64],
    now: DateTime<Utc>,
) -> Option<SubmitOutcome> {
    match state.strategy.evaluate(symbol, closes, now.hour()) {
        Evaluation::Evaluated { signal, snapshots } => {
            state.record_signal(
                symbol,
                SignalRecord {
                    signal,
                    indicators: snapshots.current,
                    at: now,
                },
            );
            act_on_signal(state, symbol, signal, now).await
        }
        Evaluation::OutsideHours { .. } | Evaluation::InsufficientData { .. } => None,
    }
}

/// Size and submit a trade for a fired signal.
pub async fn act_on_signal(
    state: &AppState,
    symbol: &str,
    signal: Signal,
    now: DateTime<Utc>,
) -> Option<SubmitOutcome> {
    let direction = signal.direction()?;
    let stake = state
        .risk
        .compute_stake(state.balance(), state.risk.risk_percent());
    info!(symbol, %signal, %direction, stake, "signal fired");

    let outcome = state.tracker.submit(symbol, direction, stake, now).await;
    info!(symbol, outcome = %outcome, "submission result");
    state.increment_version();
    Some(outcome)
}

// =============================================================================
// Keepalive
// =============================================================================

/// Ping the venue every `interval` until shutdown.
pub async fn run_keepalive(state: Arc<AppState>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "keepalive running");
    while state.shutdown.sleep(interval).await {
        match state.connection.heartbeat().await {
            Ok(true) => debug!("keepalive ping sent"),
            Ok(false) => debug!("keepalive skipped, connection not ready"),
            Err(e) => warn!(error = %e, "keepalive ping failed"),
        }
    }
    info!("keepalive stopped");
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::fixture::{session, test_config, TestSession};
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    /// `n` one-minute bars with a gently oscillating close.
    fn history(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| {
                let close = 100.0 + (i as f64 * 0.7).sin();
                json!({"epoch": 60 * i as i64, "open": close, "high": close + 0.5,
                       "low": close - 0.5, "close": close})
            })
            .collect()
    }

    async fn drain(s: &TestSession, now: DateTime<Utc>) {
        loop {
            let next = tokio::time::timeout(
                Duration::from_millis(100),
                s.state.connection.next_message(),
            )
            .await;
            match next {
                Ok(Ok(Some(inbound))) => handle_message(&s.state, inbound, now).await.unwrap(),
                _ => return,
            }
        }
    }

    #[tokio::test]
    async fn startup_subscribes_balance_and_every_instrument() {
        let s = session(test_config());
        s.venue.set_balance(750.0);
        start(&s.state).await.unwrap();

        assert_eq!(s.state.balance(), 750.0);
        assert_eq!(s.venue.received_with("balance").len(), 1);
        let history = s.venue.received_with("ticks_history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["ticks_history"], "R_100");
        assert_eq!(history[1]["granularity"], 60);
        assert_eq!(history[1]["count"], 100);
        assert_eq!(s.state.connection.subscription_count(), 3);
    }

    #[tokio::test]
    async fn startup_with_rejected_token_is_fatal() {
        let s = session(test_config());
        s.venue.set_reject_auth(true);
        let err = start(&s.state).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn history_fills_buffer_and_records_evaluation() {
        let s = session(test_config());
        s.venue.set_history(history(40));
        start(&s.state).await.unwrap();
        drain(&s, noon()).await;

        assert_eq!(s.state.candle_buffer.count("R_100"), 40);
        assert_eq!(s.state.candle_buffer.count("R_10"), 40);
        let record = s.state.last_signal("R_100").unwrap();
        assert_eq!(record.at, noon());
        assert!((record.indicators.close - s.state.candle_buffer.last_close("R_100").unwrap()).abs() < 1e-12);
    }

    #[tokio::test]
    async fn short_history_skips_evaluation() {
        let s = session(test_config());
        s.venue.set_history(history(10));
        start(&s.state).await.unwrap();
        drain(&s, noon()).await;

        assert_eq!(s.state.candle_buffer.count("R_100"), 10);
        assert!(s.state.last_signal("R_100").is_none());
    }

    #[tokio::test]
    async fn outside_hours_skips_evaluation() {
        let s = session(test_config());
        s.venue.set_history(history(40));
        start(&s.state).await.unwrap();
        drain(&s, Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap()).await;

        assert_eq!(s.state.candle_buffer.count("R_100"), 40);
        assert!(s.state.last_signal("R_100").is_none());
    }

    #[tokio::test]
    async fn new_bar_evaluates_closed_candles_only() {
        let s = session(test_config());
        s.venue.set_history(history(30));
        start(&s.state).await.unwrap();
        drain(&s, Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap()).await;
        assert!(s.state.last_signal("R_100").is_none());

        // Revision of the live bar: no evaluation.
        s.venue.push(json!({"msg_type": "ohlc", "ohlc": {"symbol": "R_100",
            "open_time": 60 * 29, "open": "100", "high": "101", "low": "99", "close": "100.9"}}));
        drain(&s, noon()).await;
        assert!(s.state.last_signal("R_100").is_none());

        // A new bar closes bar 29; the evaluation sees it as the last close.
        s.venue.push(json!({"msg_type": "ohlc", "ohlc": {"symbol": "R_100",
            "open_time": 60 * 30, "open": "55", "high": "55", "low": "55", "close": "55"}}));
        drain(&s, noon()).await;

        assert_eq!(s.state.candle_buffer.count("R_100"), 31);
        let record = s.state.last_signal("R_100").unwrap();
        assert!((record.indicators.close - 100.9).abs() < 1e-12);
    }

    #[tokio::test]
    async fn buy_signal_submits_sized_call() {
        let s = session(test_config());
        s.venue.set_balance(500.0);
        start(&s.state).await.unwrap();
        drain(&s, noon()).await;

        let outcome = act_on_signal(&s.state, "R_100", Signal::Buy, noon()).await;
        assert!(matches!(outcome, Some(SubmitOutcome::Submitted(_))));
        let buys = s.venue.received_with("buy");
        assert_eq!(buys.len(), 1);
        assert_eq!(buys[0]["price"], 10.0);
        assert_eq!(buys[0]["parameters"]["contract_type"], "CALL");
        assert_eq!(buys[0]["parameters"]["symbol"], "R_100");
    }

    #[tokio::test]
    async fn no_signal_submits_nothing() {
        let s = session(test_config());
        start(&s.state).await.unwrap();
        assert!(act_on_signal(&s.state, "R_100", Signal::None, noon()).await.is_none());
        assert!(s.venue.received_with("buy").is_empty());
    }

    #[tokio::test]
    async fn full_trade_flows_through_dispatch() {
        let s = session(test_config());
        start(&s.state).await.unwrap();
        drain(&s, noon()).await;

        act_on_signal(&s.state, "R_10", Signal::Sell, noon()).await;
        drain(&s, noon()).await;

        let active = s.state.tracker.active_trades();
        assert_eq!(active.len(), 1);
        let contract_id = active[0].contract_id.unwrap();
        let monitor = s
            .state
            .connection
            .subscriptions()
            .into_iter()
            .find(|(_, r)| matches!(r, Request::ContractMonitor { .. }))
            .map(|(id, _)| id)
            .unwrap();

        s.venue.push(json!({
            "msg_type": "proposal_open_contract",
            "subscription": {"id": monitor},
            "proposal_open_contract": {"contract_id": contract_id, "is_sold": 1,
                                       "buy_price": 10.0, "sell_price": 0.0}
        }));
        drain(&s, noon()).await;

        assert!(s.state.tracker.active_trades().is_empty());
        assert_eq!(s.log.results(), vec!["PENDING", "LOSS"]);
        let snap = s.state.build_snapshot(noon());
        assert_eq!(snap.session.losses, 1);
        assert_eq!(snap.session.profit_today, -10.0);
    }

    #[tokio::test]
    async fn buy_rejection_through_dispatch_fails_trade() {
        let s = session(test_config());
        s.venue.set_buy_error("ContractBuyValidationError", "Trading is not offered");
        start(&s.state).await.unwrap();
        drain(&s, noon()).await;

        act_on_signal(&s.state, "R_100", Signal::Buy, noon()).await;
        drain(&s, noon()).await;

        assert!(s.state.tracker.active_trades().is_empty());
        assert_eq!(s.log.results(), vec!["PENDING", "FAILED"]);
    }

    #[tokio::test]
    async fn non_buy_errors_are_recorded() {
        let s = session(test_config());
        start(&s.state).await.unwrap();
        drain(&s, noon()).await;

        s.venue.push(json!({"msg_type": "ticks_history",
            "error": {"code": "MarketIsClosed", "message": "closed"}}));
        drain(&s, noon()).await;
        let errors = s.state.recent_errors.read();
        assert!(errors.iter().any(|e| e.message.contains("MarketIsClosed")));
    }

    #[tokio::test]
    async fn keepalive_stops_on_shutdown() {
        let s = session(test_config());
        start(&s.state).await.unwrap();

        let task = tokio::spawn(run_keepalive(s.state.clone(), Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        s.state.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(!s.venue.received_with("ping").is_empty());
    }

    #[tokio::test]
    async fn dispatch_ends_on_shutdown() {
        let s = session(test_config());
        start(&s.state).await.unwrap();

        let task = tokio::spawn(run_dispatch(s.state.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        s.state.shutdown.trigger();
        let out = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(out.is_ok());
    }
}
