// =============================================================================
// Venue wire protocol: outbound requests and the closed set of inbound kinds
// =============================================================================
//
// Every frame is a JSON object.  Inbound frames carry `msg_type`, optionally
// `req_id` (echo of ours), `subscription.id` and `echo_req`.  A frame with an
// `error` object is a failed reply to the request named by `msg_type`.
//
// Numeric fields arrive either as JSON numbers or as decimal strings
// depending on the stream, so every numeric read accepts both.
// =============================================================================

use serde::Serialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{EngineError, EngineResult};
use crate::market_data::Candle;
use crate::types::Direction;

// =============================================================================
// Outbound
// =============================================================================

/// A request the engine can send.  The `req_id` is attached at send time so
/// the same value can be replayed verbatim after a reconnect.
#[derive(Clone, PartialEq)]
pub enum Request {
    Authorize {
        token: String,
    },
    /// Balance snapshot plus a subscription to balance changes.
    Balance,
    /// Candle history plus a subscription to live `ohlc` updates.
    CandleHistory {
        symbol: String,
        granularity: u32,
        count: usize,
    },
    Buy {
        symbol: String,
        direction: Direction,
        stake: f64,
        currency: String,
        duration_minutes: u32,
    },
    /// Subscription to status updates of one open contract.
    ContractMonitor {
        contract_id: u64,
    },
    Ping,
    Forget {
        subscription_id: String,
    },
}

impl Request {
    /// Serialise with the given correlation id.
    pub fn to_json(&self, req_id: u64) -> Value {
        match self {
            Self::Authorize { token } => json!({
                "authorize": token,
                "req_id": req_id,
            }),
            Self::Balance => json!({
                "balance": 1,
                "subscribe": 1,
                "req_id": req_id,
            }),
            Self::CandleHistory {
                symbol,
                granularity,
                count,
            } => json!({
                "ticks_history": symbol,
                "adjust_start_time": 1,
                "count": count,
                "end": "latest",
                "granularity": granularity,
                "style": "candles",
                "subscribe": 1,
                "req_id": req_id,
            }),
            Self::Buy {
                symbol,
                direction,
                stake,
                currency,
                duration_minutes,
            } => json!({
                "buy": 1,
                "price": stake,
                "parameters": {
                    "amount": stake,
                    "basis": "stake",
                    "contract_type": direction.as_str(),
                    "currency": currency,
                    "duration": duration_minutes,
                    "duration_unit": "m",
                    "symbol": symbol,
                },
                "req_id": req_id,
            }),
            Self::ContractMonitor { contract_id } => json!({
                "proposal_open_contract": 1,
                "contract_id": contract_id,
                "subscribe": 1,
                "req_id": req_id,
            }),
            Self::Ping => json!({
                "ping": 1,
                "req_id": req_id,
            }),
            Self::Forget { subscription_id } => json!({
                "forget": subscription_id,
                "req_id": req_id,
            }),
        }
    }

    /// `msg_type` the venue uses for the reply.
    pub fn reply_kind(&self) -> &'static str {
        match self {
            Self::Authorize { .. } => "authorize",
            Self::Balance => "balance",
            Self::CandleHistory { .. } => "candles",
            Self::Buy { .. } => "buy",
            Self::ContractMonitor { .. } => "proposal_open_contract",
            Self::Ping => "ping",
            Self::Forget { .. } => "forget",
        }
    }
}

/// Never print the credential.
impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authorize { .. } => f
                .debug_struct("Authorize")
                .field("token", &"***")
                .finish(),
            Self::Balance => f.write_str("Balance"),
            Self::CandleHistory {
                symbol,
                granularity,
                count,
            } => f
                .debug_struct("CandleHistory")
                .field("symbol", symbol)
                .field("granularity", granularity)
                .field("count", count)
                .finish(),
            Self::Buy {
                symbol,
                direction,
                stake,
                ..
            } => f
                .debug_struct("Buy")
                .field("symbol", symbol)
                .field("direction", direction)
                .field("stake", stake)
                .finish(),
            Self::ContractMonitor { contract_id } => f
                .debug_struct("ContractMonitor")
                .field("contract_id", contract_id)
                .finish(),
            Self::Ping => f.write_str("Ping"),
            Self::Forget { subscription_id } => f
                .debug_struct("Forget")
                .field("subscription_id", subscription_id)
                .finish(),
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountInfo {
    pub loginid: String,
    pub currency: String,
    pub balance: f64,
}

/// State of an open contract as pushed by the monitor subscription.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContractStatus {
    pub contract_id: u64,
    pub is_sold: bool,
    pub buy_price: f64,
    pub sell_price: f64,
}

/// Closed set of message kinds the engine understands.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Authorize(AccountInfo),
    Balance {
        balance: f64,
        currency: String,
    },
    Candles {
        symbol: String,
        candles: Vec<Candle>,
    },
    Ohlc {
        symbol: String,
        candle: Candle,
    },
    Buy {
        contract_id: u64,
        buy_price: f64,
    },
    /// `None` for the empty object the venue sends when nothing is open.
    ContractUpdate(Option<ContractStatus>),
    Pong,
    Forget {
        removed: bool,
    },
    /// Failed reply to the request named by `msg_type`.
    Error {
        msg_type: String,
        code: String,
        message: String,
    },
}

impl InboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authorize(_) => "authorize",
            Self::Balance { .. } => "balance",
            Self::Candles { .. } => "candles",
            Self::Ohlc { .. } => "ohlc",
            Self::Buy { .. } => "buy",
            Self::ContractUpdate(_) => "proposal_open_contract",
            Self::Pong => "ping",
            Self::Forget { .. } => "forget",
            Self::Error { .. } => "error",
        }
    }
}

/// A parsed frame with its routing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Inbound {
    pub req_id: Option<u64>,
    pub subscription_id: Option<String>,
    pub message: InboundMessage,
}

impl Inbound {
    pub fn is_error(&self) -> bool {
        matches!(self.message, InboundMessage::Error { .. })
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse one text frame.  Malformed JSON, missing fields and unknown
/// `msg_type` values are all `EngineError::Protocol`.
pub fn parse_inbound(text: &str) -> EngineResult<Inbound> {
    let root: Value = serde_json::from_str(text)?;
    if !root.is_object() {
        return Err(EngineError::Protocol("frame is not a JSON object".into()));
    }

    let msg_type = root
        .get("msg_type")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Protocol("missing msg_type".into()))?;

    let req_id = root.get("req_id").and_then(Value::as_u64);
    let subscription_id = root
        .get("subscription")
        .and_then(|s| s.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let message = match root.get("error") {
        Some(err) if !err.is_null() => InboundMessage::Error {
            msg_type: msg_type.to_string(),
            code: err
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("UnknownError")
                .to_string(),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        _ => parse_body(msg_type, &root)?,
    };

    Ok(Inbound {
        req_id,
        subscription_id,
        message,
    })
}

fn parse_body(msg_type: &str, root: &Value) -> EngineResult<InboundMessage> {
    match msg_type {
        "authorize" => {
            let body = object(root, "authorize")?;
            Ok(InboundMessage::Authorize(AccountInfo {
                loginid: str_field(body, "loginid").unwrap_or_default(),
                currency: str_field(body, "currency").unwrap_or_default(),
                balance: number(body, "balance")?,
            }))
        }
        "balance" => {
            let body = object(root, "balance")?;
            Ok(InboundMessage::Balance {
                balance: number(body, "balance")?,
                currency: str_field(body, "currency").unwrap_or_default(),
            })
        }
        "candles" => {
            let symbol = root
                .get("echo_req")
                .and_then(|e| str_field(e, "ticks_history"))
                .ok_or_else(|| EngineError::Protocol("candles without echo_req.ticks_history".into()))?;
            let rows = root
                .get("candles")
                .and_then(Value::as_array)
                .ok_or_else(|| EngineError::Protocol("candles is not an array".into()))?;
            // Malformed rows are dropped; the rest of the window is still usable.
            let candles: Vec<Candle> = rows
                .iter()
                .filter_map(|row| match parse_candle(row, "epoch") {
                    Ok(candle) => Some(candle),
                    Err(e) => {
                        warn!(symbol = %symbol, error = %e, "dropping malformed candle row");
                        None
                    }
                })
                .collect();
            Ok(InboundMessage::Candles { symbol, candles })
        }
        "ohlc" => {
            let body = object(root, "ohlc")?;
            let symbol = str_field(body, "symbol")
                .ok_or_else(|| EngineError::Protocol("ohlc without symbol".into()))?;
            Ok(InboundMessage::Ohlc {
                symbol,
                candle: parse_candle(body, "open_time")?,
            })
        }
        "buy" => {
            let body = object(root, "buy")?;
            Ok(InboundMessage::Buy {
                contract_id: integer(body, "contract_id")?,
                buy_price: number(body, "buy_price")?,
            })
        }
        "proposal_open_contract" => {
            let body = object(root, "proposal_open_contract")?;
            if body.as_object().map_or(true, |o| o.is_empty()) {
                return Ok(InboundMessage::ContractUpdate(None));
            }
            Ok(InboundMessage::ContractUpdate(Some(ContractStatus {
                contract_id: integer(body, "contract_id")?,
                is_sold: optional_number(body, "is_sold").unwrap_or(0.0) != 0.0,
                buy_price: optional_number(body, "buy_price").unwrap_or(0.0),
                sell_price: optional_number(body, "sell_price").unwrap_or(0.0),
            })))
        }
        "ping" => Ok(InboundMessage::Pong),
        "forget" => Ok(InboundMessage::Forget {
            removed: optional_number(root, "forget").unwrap_or(0.0) != 0.0,
        }),
        other => Err(EngineError::Protocol(format!("unknown msg_type {other:?}"))),
    }
}

fn parse_candle(v: &Value, time_key: &str) -> EngineResult<Candle> {
    Ok(Candle {
        open_time: integer(v, time_key)? as i64,
        open: number(v, "open")?,
        high: number(v, "high")?,
        low: number(v, "low")?,
        close: number(v, "close")?,
    })
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn object<'a>(root: &'a Value, key: &str) -> EngineResult<&'a Value> {
    root.get(key)
        .filter(|v| v.is_object())
        .ok_or_else(|| EngineError::Protocol(format!("missing object {key}")))
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Number or decimal string.
fn optional_number(v: &Value, key: &str) -> Option<f64> {
    match v.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn number(v: &Value, key: &str) -> EngineResult<f64> {
    optional_number(v, key)
        .filter(|x| x.is_finite())
        .ok_or_else(|| EngineError::Protocol(format!("missing or non-numeric field {key}")))
}

fn integer(v: &Value, key: &str) -> EngineResult<u64> {
    let parsed = match v.get(key) {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| EngineError::Protocol(format!("missing or non-integer field {key}")))
}
