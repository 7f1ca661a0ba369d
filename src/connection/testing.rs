// In-memory venue for connection, tracker and engine tests.
//
// Replies to every request kind the engine sends, hands out a fresh
// subscription id per subscribe, and can refuse connections, reject the
// token, break writes or drop the link on demand.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::transport::{Connector, TransportPair, TransportSink, TransportStream};
use crate::error::{EngineError, EngineResult};

#[derive(Default)]
struct VenueState {
    connects: usize,
    refuse_connects: usize,
    reject_auth: bool,
    silent_auth: bool,
    buy_error: Option<(String, String)>,
    balance: f64,
    history: Vec<Value>,
    next_sub: u64,
    next_contract: u64,
    received: Vec<Value>,
    live_conn: Option<usize>,
    writes_broken: bool,
    client_tx: Option<mpsc::UnboundedSender<String>>,
}

#[derive(Clone)]
pub struct MockVenue {
    inner: Arc<Mutex<VenueState>>,
}

impl MockVenue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VenueState {
                balance: 10_000.0,
                next_contract: 1000,
                ..VenueState::default()
            })),
        }
    }

    // ── scripting ─────────────────────────────────────────────────────────

    pub fn set_reject_auth(&self, reject: bool) {
        self.inner.lock().reject_auth = reject;
    }

    pub fn set_silent_auth(&self, silent: bool) {
        self.inner.lock().silent_auth = silent;
    }

    pub fn set_buy_error(&self, code: &str, message: &str) {
        self.inner.lock().buy_error = Some((code.into(), message.into()));
    }

    pub fn set_balance(&self, balance: f64) {
        self.inner.lock().balance = balance;
    }

    /// Candle rows returned by every `ticks_history` request.
    pub fn set_history(&self, rows: Vec<Value>) {
        self.inner.lock().history = rows;
    }

    pub fn refuse_next_connects(&self, n: usize) {
        self.inner.lock().refuse_connects = n;
    }

    /// Close the current link: the reader sees end-of-stream and writes fail.
    pub fn drop_connection(&self) {
        let mut s = self.inner.lock();
        s.live_conn = None;
        s.client_tx = None;
    }

    /// Writes fail while the reader stays open.
    pub fn break_writes(&self) {
        self.inner.lock().writes_broken = true;
    }

    pub fn push(&self, frame: Value) {
        self.push_raw(&frame.to_string());
    }

    pub fn push_raw(&self, text: &str) {
        if let Some(tx) = &self.inner.lock().client_tx {
            let _ = tx.send(text.to_string());
        }
    }

    // ── inspection ────────────────────────────────────────────────────────

    pub fn connects(&self) -> usize {
        self.inner.lock().connects
    }

    pub fn received(&self) -> Vec<Value> {
        self.inner.lock().received.clone()
    }

    /// Received requests that carry `key`.
    pub fn received_with(&self, key: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|v| v.get(key).is_some())
            .collect()
    }

    pub fn subscription_requests(&self) -> usize {
        self.received_with("subscribe").len()
    }

    fn handle(&self, conn: usize, text: &str) -> EngineResult<()> {
        let mut s = self.inner.lock();
        if s.live_conn != Some(conn) || s.writes_broken {
            return Err(EngineError::Connection("broken pipe".into()));
        }
        let req: Value = serde_json::from_str(text)?;
        s.received.push(req.clone());
        let req_id = req["req_id"].clone();

        let reply = if req.get("authorize").is_some() {
            if s.silent_auth {
                None
            } else if s.reject_auth {
                Some(json!({
                    "msg_type": "authorize", "req_id": req_id,
                    "error": {"code": "InvalidToken", "message": "The token is invalid."}
                }))
            } else {
                Some(json!({
                    "msg_type": "authorize", "req_id": req_id,
                    "authorize": {"loginid": "VRTC100", "currency": "USD", "balance": s.balance}
                }))
            }
        } else if req.get("balance").is_some() {
            let sub = new_sub(&mut *s);
            Some(json!({
                "msg_type": "balance", "req_id": req_id, "subscription": sub,
                "balance": {"balance": s.balance, "currency": "USD"}
            }))
        } else if let Some(symbol) = req.get("ticks_history").cloned() {
            let sub = new_sub(&mut *s);
            Some(json!({
                "msg_type": "candles", "req_id": req_id, "subscription": sub,
                "echo_req": {"ticks_history": symbol},
                "candles": s.history.clone()
            }))
        } else if req.get("buy").is_some() {
            match s.buy_error.clone() {
                Some((code, message)) => Some(json!({
                    "msg_type": "buy", "req_id": req_id,
                    "error": {"code": code, "message": message}
                })),
                None => {
                    s.next_contract += 1;
                    Some(json!({
                        "msg_type": "buy", "req_id": req_id,
                        "buy": {"contract_id": s.next_contract, "buy_price": req["price"].clone()}
                    }))
                }
            }
        } else if req.get("proposal_open_contract").is_some() {
            let sub = new_sub(&mut *s);
            Some(json!({
                "msg_type": "proposal_open_contract", "req_id": req_id, "subscription": sub,
                "proposal_open_contract": {"contract_id": req["contract_id"].clone(), "is_sold": 0}
            }))
        } else if req.get("ping").is_some() {
            Some(json!({"msg_type": "ping", "req_id": req_id, "ping": "pong"}))
        } else if req.get("forget").is_some() {
            Some(json!({"msg_type": "forget", "req_id": req_id, "forget": 1}))
        } else {
            None
        };

        if let (Some(reply), Some(tx)) = (reply, &s.client_tx) {
            let _ = tx.send(reply.to_string());
        }
        Ok(())
    }
}

impl Default for MockVenue {
    fn default() -> Self {
        Self::new()
    }
}

fn new_sub(s: &mut VenueState) -> Value {
    s.next_sub += 1;
    json!({ "id": format!("sub-{}", s.next_sub) })
}

#[async_trait]
impl Connector for MockVenue {
    async fn connect(&self) -> EngineResult<TransportPair> {
        let mut s = self.inner.lock();
        s.connects += 1;
        if s.refuse_connects > 0 {
            s.refuse_connects -= 1;
            return Err(EngineError::Connection("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = s.connects;
        s.live_conn = Some(conn);
        s.writes_broken = false;
        s.client_tx = Some(tx);
        let sink: Box<dyn TransportSink> = Box::new(MockSink {
            venue: self.clone(),
            conn,
        });
        let stream: Box<dyn TransportStream> = Box::new(MockStream { rx });
        Ok((sink, stream))
    }
}

struct MockSink {
    venue: MockVenue,
    conn: usize,
}

#[async_trait]
impl TransportSink for MockSink {
    async fn send_text(&mut self, text: String) -> EngineResult<()> {
        self.venue.handle(self.conn, &text)
    }

    async fn close(&mut self) -> EngineResult<()> {
        let mut s = self.venue.inner.lock();
        if s.live_conn == Some(self.conn) {
            s.live_conn = None;
            s.client_tx = None;
        }
        Ok(())
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl TransportStream for MockStream {
    async fn next_text(&mut self) -> EngineResult<Option<String>> {
        Ok(self.rx.recv().await)
    }
}
