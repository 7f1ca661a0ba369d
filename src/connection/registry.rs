// =============================================================================
// Subscription Registry
// =============================================================================
//
// Maps every live venue subscription id to the request that created it, so
// the whole set can be re-sent after a reconnect.  The venue hands out fresh
// ids for replayed requests; `rekey` moves the entry in place.
//
// Fire-and-forget subscriptions are parked under their `req_id` until the
// echoed reply reveals the subscription id.
// =============================================================================

use std::collections::HashMap;

use tracing::debug;

use super::protocol::Request;

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    active: HashMap<String, Request>,
    pending: HashMap<u64, Request>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, subscription_id: impl Into<String>, request: Request) {
        let id = subscription_id.into();
        debug!(subscription_id = %id, ?request, "subscription recorded");
        self.active.insert(id, request);
    }

    /// Move the entry `old` to `new`.  Returns `false` when `old` is unknown.
    pub fn rekey(&mut self, old: &str, new: impl Into<String>) -> bool {
        let new = new.into();
        if old == new {
            return self.active.contains_key(old);
        }
        match self.active.remove(old) {
            Some(request) => {
                debug!(old, new = %new, "subscription rekeyed");
                self.active.insert(new, request);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, subscription_id: &str) -> Option<Request> {
        self.active.remove(subscription_id)
    }

    pub fn contains(&self, subscription_id: &str) -> bool {
        self.active.contains_key(subscription_id)
    }

    /// Snapshot of `(id, request)` pairs, ordered by id for stable replay.
    pub fn entries(&self) -> Vec<(String, Request)> {
        let mut entries: Vec<(String, Request)> = self
            .active
            .iter()
            .map(|(id, req)| (id.clone(), req.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    // -------------------------------------------------------------------------
    // Fire-and-forget subscriptions awaiting their id
    // -------------------------------------------------------------------------

    pub fn track_pending(&mut self, req_id: u64, request: Request) {
        self.pending.insert(req_id, request);
    }

    /// Promote a pending subscription once its reply arrived.
    pub fn resolve_pending(&mut self, req_id: u64, subscription_id: &str) -> bool {
        match self.pending.remove(&req_id) {
            Some(request) => {
                self.insert(subscription_id, request);
                true
            }
            None => false,
        }
    }

    pub fn drop_pending(&mut self, req_id: u64) -> Option<Request> {
        self.pending.remove(&req_id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Requests still waiting for an id, ordered by `req_id`.
    pub fn pending_entries(&self) -> Vec<(u64, Request)> {
        let mut entries: Vec<(u64, Request)> = self
            .pending
            .iter()
            .map(|(id, req)| (*id, req.clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles(symbol: &str) -> Request {
        Request::CandleHistory {
            symbol: symbol.into(),
            granularity: 60,
            count: 100,
        }
    }

    #[test]
    fn rekey_moves_request() {
        let mut reg = SubscriptionRegistry::new();
        reg.insert("a", candles("R_100"));
        assert!(reg.rekey("a", "b"));
        assert!(!reg.contains("a"));
        assert_eq!(reg.remove("b"), Some(candles("R_100")));
        assert!(reg.is_empty());
    }

    #[test]
    fn rekey_unknown_is_noop() {
        let mut reg = SubscriptionRegistry::new();
        reg.insert("a", Request::Balance);
        assert!(!reg.rekey("zzz", "b"));
        assert_eq!(reg.len(), 1);
        assert!(reg.rekey("a", "a"));
    }

    #[test]
    fn pending_promoted_on_reply() {
        let mut reg = SubscriptionRegistry::new();
        reg.track_pending(17, Request::ContractMonitor { contract_id: 9 });
        assert_eq!(reg.pending_len(), 1);
        assert!(reg.resolve_pending(17, "poc-1"));
        assert!(!reg.resolve_pending(17, "poc-1"));
        assert_eq!(reg.pending_len(), 0);
        assert!(reg.contains("poc-1"));
    }

    #[test]
    fn entries_sorted_by_id() {
        let mut reg = SubscriptionRegistry::new();
        reg.insert("c", candles("R_25"));
        reg.insert("a", candles("R_10"));
        reg.insert("b", Request::Balance);
        let ids: Vec<String> = reg.entries().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
