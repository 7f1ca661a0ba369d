// =============================================================================
// Engine Error Taxonomy
// =============================================================================
//
// Every fallible engine operation returns `EngineResult<T>`.  The variants map
// one-to-one onto the recovery policy:
//
//   Connection        : transient, triggers the bounded reconnect loop.
//   Authorization     : fatal (bad or revoked credential).
//   Protocol          : drop the single message, keep the connection.
//   TradeRejected     : the trade is recorded as FAILED, never retried.
//   InsufficientData  : skip the evaluation cycle.
//   Config            : fatal before startup.
// =============================================================================

use thiserror::Error;

use crate::types::TradeStatus;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Transport closed, unreachable, or the reconnect budget ran out.
    #[error("connection error: {0}")]
    Connection(String),

    /// The venue refused the credential or never answered the handshake.
    #[error("authorization error: {0}")]
    Authorization(String),

    /// Malformed or unexpected inbound message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The venue declined an order.
    #[error("trade rejected: {0}")]
    TradeRejected(String),

    #[error("insufficient data: have {have} candles, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("illegal trade transition {from} -> {to}")]
    InvalidTransition { from: TradeStatus, to: TradeStatus },

    #[error("trade log error: {0}")]
    TradeLog(String),
}

impl EngineError {
    /// Errors after which the process must stop when they escape the dispatch
    /// loop.  A `Connection` error only escapes once the reconnect budget is
    /// spent.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Authorization(_) | Self::Config(_)
        )
    }

    /// Errors the reconnect loop is allowed to retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for EngineError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(e.to_string())
    }
}

impl From<csv::Error> for EngineError {
    fn from(e: csv::Error) -> Self {
        Self::TradeLog(e.to_string())
    }
}
