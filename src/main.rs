// =============================================================================
// Deriv Sentinel: Main Entry Point
// =============================================================================
//
// Startup order: config -> trade log -> session -> connect + subscribe ->
// dispatch, keepalive, REST API and console tasks.  Everything stops on
// Ctrl+C, `quit`, the shutdown endpoint or an unrecoverable connection loss.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod commands;
mod connection;
mod engine;
mod error;
mod indicators;
mod market_data;
mod risk;
mod runtime_config;
mod shutdown;
mod strategy;
mod trade_log;
mod trade_tracker;
mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::connection::{ConnectionManager, ConnectionSettings, WsConnector};
use crate::runtime_config::RuntimeConfig;
use crate::shutdown::ShutdownSignal;
use crate::trade_log::CsvTradeLog;

/// Automated binary-options trader for a Deriv-style WebSocket venue.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (created with defaults when missing).
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// Trade log path, overriding `tradeLogPath` from the config.
    #[arg(long)]
    log: Option<PathBuf>,

    /// Force paper trading regardless of `enableTrading`.
    #[arg(long, default_value_t = false)]
    paper: bool,

    /// Write the default configuration file and exit.
    #[arg(long, default_value_t = false)]
    setup: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if args.setup {
        RuntimeConfig::default()
            .save(&args.config)
            .context("failed to write default config")?;
        info!(path = %args.config.display(), "default config written, edit the token and restart");
        return Ok(());
    }

    info!("Deriv Sentinel starting up");

    let mut config = RuntimeConfig::load_or_create(&args.config)?;
    if let Ok(token) = std::env::var("DERIV_API_TOKEN") {
        if !token.trim().is_empty() {
            config.token = token.trim().to_string();
        }
    }
    if args.paper {
        warn!("--paper given, live submission disabled");
        config.enable_trading = false;
    }
    config.validate().context("invalid configuration")?;

    info!(
        symbols = ?config.symbols,
        enable_trading = config.enable_trading,
        cooldown_seconds = config.cooldown_seconds,
        risk_percent = config.risk_percent,
        "configuration ready"
    );

    // ── 2. Trade log ─────────────────────────────────────────────────────
    let log_path = args
        .log
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.trade_log_path));
    let trade_log = Arc::new(CsvTradeLog::open(&log_path).context("failed to open trade log")?);
    info!(path = %trade_log.path().display(), "trade log ready");

    // ── 3. Build shared state ────────────────────────────────────────────
    let shutdown = ShutdownSignal::new();
    let connection = Arc::new(ConnectionManager::new(
        Arc::new(WsConnector::new(config.endpoint.clone())),
        ConnectionSettings::new(config.token.clone()),
        shutdown.clone(),
    ));
    let state = Arc::new(AppState::new(
        config,
        args.config.clone(),
        connection,
        trade_log,
        shutdown.clone(),
    ));

    // ── 4. Connect, authorize, subscribe ─────────────────────────────────
    engine::start(&state).await.context("engine startup failed")?;

    // ── 5. Dispatch loop ─────────────────────────────────────────────────
    let dispatch = tokio::spawn(engine::run_dispatch(state.clone()));

    // ── 6. Keepalive ─────────────────────────────────────────────────────
    let keepalive = tokio::spawn(engine::run_keepalive(
        state.clone(),
        engine::KEEPALIVE_INTERVAL,
    ));

    // ── 7. REST API ──────────────────────────────────────────────────────
    let bind_addr =
        std::env::var("ENGINE_BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3001".into());
    let api_state = state.clone();
    let api_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %bind_addr, error = %e, "failed to bind API server, continuing without it");
                return;
            }
        };
        info!(addr = %bind_addr, "API server listening");
        let app = api::rest::router(api_state);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { api_shutdown.wait().await })
            .await
        {
            error!(error = %e, "API server failed");
        }
    });

    // ── 8. Operator console ──────────────────────────────────────────────
    tokio::spawn(commands::run_console(
        state.clone(),
        commands::spawn_stdin_reader(),
    ));

    info!("all subsystems running, type `help` or press Ctrl+C to stop");

    // ── 9. Graceful shutdown ─────────────────────────────────────────────
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl+C")?;
            warn!("Ctrl+C received, stopping gracefully");
        }
        _ = shutdown.wait() => {
            warn!("shutdown requested, stopping gracefully");
        }
    }
    shutdown.trigger();

    let outcome = dispatch.await.context("dispatch task panicked")?;
    let _ = keepalive.await;
    state.connection.close().await;

    let stats = state.risk.stats();
    info!(
        trades = stats.trades_submitted,
        wins = stats.wins,
        losses = stats.losses,
        profit = stats.profit_today,
        open_trades = state.tracker.active_count(),
        "Deriv Sentinel shut down complete"
    );

    outcome.context("connection to the venue could not be kept")
}
