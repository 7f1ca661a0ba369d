// =============================================================================
// Operator console: line commands read from stdin
// =============================================================================
//
//   status   print the session summary
//   toggle   flip live trading on/off (persisted to the config file)
//   quit     cooperative shutdown
//   help     list commands
// =============================================================================

use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::app_state::{AppState, StatusSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Toggle,
    Quit,
    Help,
    Empty,
    Unknown(String),
}

/// Parse one input line.  Case and surrounding whitespace are ignored.
pub fn parse_command(line: &str) -> Command {
    let word = line.trim().to_ascii_lowercase();
    match word.as_str() {
        "" => Command::Empty,
        "status" | "s" => Command::Status,
        "toggle" | "t" => Command::Toggle,
        "quit" | "q" | "exit" => Command::Quit,
        "help" | "h" | "?" => Command::Help,
        _ => Command::Unknown(word),
    }
}

const HELP: &str = "commands: status | toggle | quit | help";

/// Apply `command` to the session and return the text to show the operator.
pub fn execute(state: &AppState, command: &Command, now: DateTime<Utc>) -> Option<String> {
    match command {
        Command::Empty => None,
        Command::Status => Some(render_status(&state.build_snapshot(now))),
        Command::Toggle => {
            let enabled = state.toggle_trading();
            Some(format!(
                "trading {}",
                if enabled { "ENABLED" } else { "DISABLED (paper)" }
            ))
        }
        Command::Quit => {
            info!("shutdown requested from console");
            state.shutdown.trigger();
            Some("shutting down...".to_string())
        }
        Command::Help => Some(HELP.to_string()),
        Command::Unknown(word) => Some(format!("unknown command {word:?}; {HELP}")),
    }
}

/// Human-readable session summary.
pub fn render_status(s: &StatusSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "── Engine status ─────────────────────────────────");
    let _ = writeln!(
        out,
        "Connection:    {}{}, {} subscriptions, {} reconnects",
        s.connection,
        s.loginid
            .as_deref()
            .map(|id| format!(" ({id})"))
            .unwrap_or_default(),
        s.subscriptions,
        s.reconnects
    );
    let _ = writeln!(out, "Balance:       {:.2} {}", s.balance, s.currency);
    let _ = writeln!(out, "Profit today:  {:+.2}", s.session.profit_today);
    let _ = writeln!(
        out,
        "Trades:        {} submitted, {} won, {} lost, {} failed",
        s.session.trades_submitted, s.session.wins, s.session.losses, s.session.failed
    );
    let _ = writeln!(out, "Win rate:      {:.1}%", s.win_rate);
    let _ = writeln!(
        out,
        "Trading:       {} (hours {:02}-{:02} UTC, {})",
        if s.trading_enabled { "ENABLED" } else { "DISABLED" },
        s.trading_hours.start_hour_utc,
        s.trading_hours.end_hour_utc,
        if s.trading_hours.open_now { "open now" } else { "closed now" }
    );
    let _ = writeln!(out, "Cooldown:      {}s", s.cooldown_remaining_secs);
    let _ = writeln!(out, "Active trades: {}", s.active_trades.len());
    for t in &s.active_trades {
        let _ = writeln!(
            out,
            "  #{} {} {} {:.2} {}{}",
            t.correlation_id,
            t.symbol,
            t.direction,
            t.stake,
            t.status,
            t.contract_id
                .map(|c| format!(" contract {c}"))
                .unwrap_or_default()
        );
    }
    for sym in &s.symbols {
        let _ = writeln!(
            out,
            "  {:<8} {:>3} candles  last {}  signal {}",
            sym.symbol,
            sym.candles,
            sym.last_close
                .map(|c| format!("{c:.4}"))
                .unwrap_or_else(|| "-".into()),
            sym.last_signal
                .map(|r| r.signal.to_string())
                .unwrap_or_else(|| "-".into())
        );
    }
    out
}

/// Forward stdin lines from a plain thread.  A blocking read cannot be
/// cancelled, so it must not live on the runtime's blocking pool.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = std::thread::Builder::new()
        .name("stdin-console".into())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        debug!(error = %e, "console reader thread not started");
    }
    rx
}

/// Apply commands from `lines` until quit, end of input or shutdown.
pub async fn run_console(state: Arc<AppState>, mut lines: mpsc::UnboundedReceiver<String>) {
    println!("{HELP}");
    loop {
        let line = tokio::select! {
            line = lines.recv() => line,
            _ = state.shutdown.wait() => break,
        };
        let Some(line) = line else {
            info!("console input closed");
            break;
        };
        let command = parse_command(&line);
        if let Some(text) = execute(&state, &command, Utc::now()) {
            println!("{text}");
        }
        if command == Command::Quit {
            break;
        }
    }
}
