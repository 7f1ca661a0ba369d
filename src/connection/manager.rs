// =============================================================================
// Resilient Connection Manager
// =============================================================================
//
// Owns the single venue connection:
//
//   connect()      transport + authorize handshake  (Connecting -> Authorizing -> Ready)
//   send()         sequential request/reply, paired by req_id
//   send_tracked() fire-and-forget, the caller correlates the reply by req_id
//   subscribe()    send() + record subscription.id -> request in the registry
//   next_message() inbound dispatch feed; drives recovery on transport loss
//   recover()      bounded exponential backoff, re-authorize, replay registry
//
// Locking: `state`, `registry`, `backlog` and `account` are parking_lot locks
// and are never held across an await.  The transport halves sit behind async
// mutexes because every read and write is itself a suspension point.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::protocol::{parse_inbound, AccountInfo, Inbound, InboundMessage, Request};
use super::registry::SubscriptionRegistry;
use super::transport::{Connector, TransportSink, TransportStream};
use crate::error::{EngineError, EngineResult};
use crate::shutdown::ShutdownSignal;
use crate::types::ConnectionState;

// =============================================================================
// Settings
// =============================================================================

/// Reconnect budget: `max_attempts` tries, sleeping `base_delay * 2^(n-1)`
/// before try `n`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    /// Delay before 1-based attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp)
    }
}

#[derive(Clone)]
pub struct ConnectionSettings {
    pub token: String,
    pub backoff: BackoffPolicy,
    pub auth_timeout: Duration,
    pub request_timeout: Duration,
}

impl ConnectionSettings {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            backoff: BackoffPolicy::default(),
            auth_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("token", &"***")
            .field("backoff", &self.backoff)
            .field("auth_timeout", &self.auth_timeout)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    settings: ConnectionSettings,
    state: RwLock<ConnectionState>,
    registry: Mutex<SubscriptionRegistry>,
    sink: AsyncMutex<Option<Box<dyn TransportSink>>>,
    stream: AsyncMutex<Option<Box<dyn TransportStream>>>,
    /// Frames that arrived while a sequential exchange waited for its reply.
    backlog: Mutex<VecDeque<Inbound>>,
    recovery: AsyncMutex<()>,
    next_req_id: AtomicU64,
    reconnects: AtomicU64,
    wake: Notify,
    shutdown: ShutdownSignal,
    account: RwLock<Option<AccountInfo>>,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        settings: ConnectionSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            connector,
            settings,
            state: RwLock::new(ConnectionState::Disconnected),
            registry: Mutex::new(SubscriptionRegistry::new()),
            sink: AsyncMutex::new(None),
            stream: AsyncMutex::new(None),
            backlog: Mutex::new(VecDeque::new()),
            recovery: AsyncMutex::new(()),
            next_req_id: AtomicU64::new(1),
            reconnects: AtomicU64::new(0),
            wake: Notify::new(),
            shutdown,
            account: RwLock::new(None),
        }
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    pub fn account(&self) -> Option<AccountInfo> {
        self.account.read().clone()
    }

    pub fn subscriptions(&self) -> Vec<(String, Request)> {
        self.registry.lock().entries()
    }

    pub fn subscription_count(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Fresh correlation id for an outbound message.
    pub fn allocate_req_id(&self) -> u64 {
        self.next_req_id.fetch_add(1, Ordering::Relaxed)
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write();
        if *state != next {
            debug!(from = %*state, to = %next, "connection state change");
            *state = next;
        }
    }

    fn ensure_ready(&self) -> EngineResult<()> {
        match self.state() {
            ConnectionState::Ready => Ok(()),
            other => Err(EngineError::Connection(format!(
                "connection not ready (state {other})"
            ))),
        }
    }

    // -------------------------------------------------------------------------
    // Connect / authorize
    // -------------------------------------------------------------------------

    /// Open the transport and authorize.  Any failure leaves the manager
    /// `Disconnected`; a refused or unanswered handshake is an
    /// `Authorization` error.
    pub async fn connect(&self) -> EngineResult<AccountInfo> {
        self.set_state(ConnectionState::Connecting);
        let (sink, stream) = match self.connector.connect().await {
            Ok(pair) => pair,
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);

        self.set_state(ConnectionState::Authorizing);
        let auth = Request::Authorize {
            token: self.settings.token.clone(),
        };
        let reply = match self.exchange(&auth, self.settings.auth_timeout).await {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                self.teardown().await;
                return Err(EngineError::Authorization(format!(
                    "no authorize reply within {:?}",
                    self.settings.auth_timeout
                )));
            }
            Err(e) => {
                self.teardown().await;
                return Err(e);
            }
        };

        match reply.message {
            InboundMessage::Authorize(info) => {
                info!(
                    loginid = %info.loginid,
                    currency = %info.currency,
                    balance = info.balance,
                    "authorized"
                );
                *self.account.write() = Some(info.clone());
                self.set_state(ConnectionState::Ready);
                Ok(info)
            }
            InboundMessage::Error { code, message, .. } => {
                self.teardown().await;
                Err(EngineError::Authorization(format!("{code}: {message}")))
            }
            other => {
                self.teardown().await;
                Err(EngineError::Authorization(format!(
                    "unexpected {} reply to authorize",
                    other.kind()
                )))
            }
        }
    }

    /// Drop both transport halves and mark the connection down.
    async fn teardown(&self) {
        self.sink.lock().await.take();
        self.stream.lock().await.take();
        self.set_state(ConnectionState::Disconnected);
    }

    // -------------------------------------------------------------------------
    // Low-level I/O
    // -------------------------------------------------------------------------

    async fn write_frame(&self, text: String) -> EngineResult<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| EngineError::Connection("transport not open".into()))?;
        sink.send_text(text).await
    }

    /// Send `request` with a fresh id and wait up to `timeout` for the frame
    /// echoing that id.  Other frames are parked in the backlog in arrival
    /// order.  `Ok(None)` means the wait timed out.
    async fn exchange(&self, request: &Request, timeout: Duration) -> EngineResult<Option<Inbound>> {
        let req_id = self.allocate_req_id();
        self.write_frame(request.to_json(req_id).to_string()).await?;

        let deadline = Instant::now() + timeout;
        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| EngineError::Connection("transport not open".into()))?;

        loop {
            let frame = match tokio::time::timeout_at(deadline, stream.next_text()).await {
                Err(_) => return Ok(None),
                Ok(frame) => frame?,
            };
            let Some(text) = frame else {
                return Err(EngineError::Connection(format!(
                    "connection closed while awaiting {} reply",
                    request.reply_kind()
                )));
            };
            match parse_inbound(&text) {
                Ok(msg) if msg.req_id == Some(req_id) => return Ok(Some(msg)),
                Ok(msg) => self.backlog.lock().push_back(msg),
                Err(e) => warn!(error = %e, "dropping malformed frame"),
            }
        }
    }

    // -------------------------------------------------------------------------
    // Request APIs
    // -------------------------------------------------------------------------

    /// Sequential request/reply.  On a transport failure the connection is
    /// recovered and the request retried once.
    pub async fn send(&self, request: Request) -> EngineResult<Inbound> {
        self.ensure_ready()?;
        let timeout = self.settings.request_timeout;
        let timed_out = || {
            EngineError::Connection(format!(
                "no {} reply within {timeout:?}",
                request.reply_kind()
            ))
        };

        match self.exchange(&request, timeout).await {
            Ok(Some(reply)) => Ok(reply),
            Ok(None) => Err(timed_out()),
            Err(e) if e.is_transient() => {
                warn!(error = %e, ?request, "send failed, recovering before one retry");
                self.mark_disconnected("send failed");
                self.recover().await?;
                self.ensure_ready()?;
                self.exchange(&request, timeout).await?.ok_or_else(timed_out)
            }
            Err(e) => Err(e),
        }
    }

    /// Fire-and-forget send under a caller-allocated `req_id`.  A write
    /// failure marks the connection down and wakes the dispatch loop.
    pub async fn send_tracked(&self, req_id: u64, request: &Request) -> EngineResult<()> {
        self.ensure_ready()?;
        if let Err(e) = self.write_frame(request.to_json(req_id).to_string()).await {
            self.mark_disconnected("tracked send failed");
            return Err(e);
        }
        Ok(())
    }

    /// Subscribe sequentially and record the subscription for replay.  The
    /// initial reply (e.g. the candle snapshot) is queued for dispatch.
    pub async fn subscribe(&self, request: Request) -> EngineResult<String> {
        let reply = self.send(request.clone()).await?;
        if let InboundMessage::Error {
            msg_type,
            code,
            message,
        } = &reply.message
        {
            return Err(EngineError::Protocol(format!(
                "{msg_type} subscription rejected: {code}: {message}"
            )));
        }
        let id = reply.subscription_id.clone().ok_or_else(|| {
            EngineError::Protocol(format!(
                "{} reply carries no subscription id",
                reply.message.kind()
            ))
        })?;
        self.registry.lock().insert(id.clone(), request);
        self.backlog.lock().push_back(reply);
        Ok(id)
    }

    /// Fire-and-forget subscription.  The id is recorded when the reply
    /// passes through [`Self::next_message`].  A request that could not be
    /// written stays pending and is replayed after the reconnect.
    pub async fn subscribe_tracked(&self, request: Request) -> EngineResult<u64> {
        self.ensure_ready()?;
        let req_id = self.allocate_req_id();
        self.registry.lock().track_pending(req_id, request.clone());
        if let Err(e) = self.write_frame(request.to_json(req_id).to_string()).await {
            self.mark_disconnected("tracked subscribe failed");
            return Err(e);
        }
        Ok(req_id)
    }

    /// Drop a subscription locally and ask the venue to stop the stream.
    pub async fn forget(&self, subscription_id: &str) -> EngineResult<()> {
        if self.registry.lock().remove(subscription_id).is_none() {
            debug!(subscription_id, "forget for unknown subscription");
        }
        if !self.is_ready() {
            return Ok(());
        }
        let req_id = self.allocate_req_id();
        self.send_tracked(
            req_id,
            &Request::Forget {
                subscription_id: subscription_id.to_string(),
            },
        )
        .await
    }

    /// Keepalive ping.  Returns `Ok(false)` when skipped because the
    /// connection is not ready.
    pub async fn heartbeat(&self) -> EngineResult<bool> {
        if !self.is_ready() {
            return Ok(false);
        }
        let req_id = self.allocate_req_id();
        self.send_tracked(req_id, &Request::Ping).await?;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Inbound dispatch feed
    // -------------------------------------------------------------------------

    /// Mark the connection lost and wake [`Self::next_message`], which owns
    /// recovery.
    pub fn mark_disconnected(&self, reason: &str) {
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, ConnectionState::Disconnected)
        };
        if previous != ConnectionState::Disconnected {
            warn!(reason, from = %previous, "connection lost");
        }
        self.wake.notify_one();
    }

    /// Next inbound message in arrival order.  Returns `Ok(None)` once
    /// shutdown is signalled, and a fatal error when recovery gives up.
    /// Malformed frames are logged and skipped.
    pub async fn next_message(&self) -> EngineResult<Option<Inbound>> {
        loop {
            if self.shutdown.is_triggered() {
                return Ok(None);
            }
            let parked = self.backlog.lock().pop_front();
            if let Some(msg) = parked {
                self.observe(&msg);
                return Ok(Some(msg));
            }
            if !self.is_ready() {
                self.recover().await?;
                continue;
            }

            let frame = {
                let mut guard = self.stream.lock().await;
                match guard.as_mut() {
                    Some(stream) => tokio::select! {
                        frame = stream.next_text() => Some(frame),
                        _ = self.wake.notified() => None,
                        _ = self.shutdown.wait() => return Ok(None),
                    },
                    None => Some(Err(EngineError::Connection("transport missing".into()))),
                }
            };

            match frame {
                // Woken by the keepalive or a failed send; re-check state.
                None => continue,
                Some(Ok(Some(text))) => match parse_inbound(&text) {
                    Ok(msg) => {
                        self.observe(&msg);
                        return Ok(Some(msg));
                    }
                    Err(e) => warn!(error = %e, "dropping malformed frame"),
                },
                Some(Ok(None)) => self.mark_disconnected("closed by venue"),
                Some(Err(e)) => {
                    let reason = e.to_string();
                    self.mark_disconnected(&reason);
                }
            }
        }
    }

    /// Bookkeeping for fire-and-forget subscriptions.
    fn observe(&self, msg: &Inbound) {
        let Some(req_id) = msg.req_id else { return };
        let mut registry = self.registry.lock();
        if msg.is_error() {
            if registry.drop_pending(req_id).is_some() {
                warn!(req_id, "tracked subscription rejected");
            }
        } else if let Some(sub_id) = &msg.subscription_id {
            registry.resolve_pending(req_id, sub_id);
        }
    }

    // -------------------------------------------------------------------------
    // Recovery
    // -------------------------------------------------------------------------

    /// Reconnect with bounded exponential backoff and replay every recorded
    /// subscription.  Returns the number of replayed requests.
    ///
    /// Gives up with a `Connection` error once the attempt budget is spent;
    /// an `Authorization` error ends recovery immediately.  Shutdown during
    /// a backoff sleep returns `Ok(0)` with the manager still disconnected.
    pub async fn recover(&self) -> EngineResult<usize> {
        let _guard = self.recovery.lock().await;
        if self.is_ready() {
            return Ok(0);
        }
        self.teardown().await;

        let policy = self.settings.backoff;
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=policy.max_attempts {
            let delay = policy.delay(attempt);
            info!(
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "reconnect scheduled"
            );
            if !self.shutdown.sleep(delay).await {
                info!("shutdown requested, abandoning reconnect");
                return Ok(0);
            }

            match self.connect().await {
                Ok(_) => match self.replay().await {
                    Ok(replayed) => {
                        self.reconnects.fetch_add(1, Ordering::Relaxed);
                        info!(attempt, replayed, "reconnected");
                        return Ok(replayed);
                    }
                    Err(e) if e.is_transient() => {
                        warn!(attempt, error = %e, "replay interrupted");
                        self.teardown().await;
                        last_error = e.to_string();
                    }
                    Err(e) => return Err(e),
                },
                Err(e @ EngineError::Authorization(_)) => {
                    error!(attempt, error = %e, "authorization failed during reconnect");
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        error!(attempts = policy.max_attempts, "reconnect budget exhausted");
        Err(EngineError::Connection(format!(
            "reconnect failed after {} attempts: {last_error}",
            policy.max_attempts
        )))
    }

    /// Re-send every recorded subscription request and rekey entries the
    /// venue renumbered.  Replies are queued for dispatch.
    async fn replay(&self) -> EngineResult<usize> {
        let (entries, pending) = {
            let registry = self.registry.lock();
            (registry.entries(), registry.pending_entries())
        };
        if entries.is_empty() && pending.is_empty() {
            return Ok(0);
        }
        info!(
            subscriptions = entries.len(),
            pending = pending.len(),
            "replaying subscriptions"
        );

        let timeout = self.settings.request_timeout;
        let mut replayed = 0;

        for (old_id, request) in entries {
            let reply = self.exchange(&request, timeout).await?;
            replayed += 1;
            let Some(reply) = reply else {
                warn!(subscription_id = %old_id, ?request, "no reply to replayed subscription");
                continue;
            };
            if let InboundMessage::Error { code, message, .. } = &reply.message {
                warn!(subscription_id = %old_id, code = %code, message = %message, "replay rejected");
                continue;
            }
            if let Some(new_id) = reply.subscription_id.clone() {
                self.registry.lock().rekey(&old_id, new_id);
            }
            self.backlog.lock().push_back(reply);
        }

        for (req_id, request) in pending {
            let reply = self.exchange(&request, timeout).await?;
            replayed += 1;
            match reply {
                Some(reply) if !reply.is_error() => {
                    if let Some(new_id) = &reply.subscription_id {
                        self.registry.lock().resolve_pending(req_id, new_id);
                    }
                    self.backlog.lock().push_back(reply);
                }
                _ => {
                    warn!(req_id, ?request, "pending subscription could not be restored");
                    self.registry.lock().drop_pending(req_id);
                }
            }
        }

        Ok(replayed)
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Close the transport.  Safe to call more than once.
    pub async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "error while closing transport");
            }
        }
        if let Ok(mut stream) = self.stream.try_lock() {
            stream.take();
        }
        self.set_state(ConnectionState::Disconnected);
        info!("connection closed");
    }
}
