//! Multiplexes every update kind over the single upstream connection.

use crate::{
    ProtocolError, SubscriptionError,
    rpc::{Inbound, Request, subscription_id},
};
use alloy::primitives::TxHash;
use explorer_realtime_types::{
    GasPrice, Header, KindSet, MempoolStats, ScheduledTransaction, Update, UpdateKind,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use tracing::{debug, trace};

/// Per-kind upstream subscription state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum Slot {
    #[default]
    Idle,
    Pending {
        request: u64,
    },
    Active {
        id: String,
    },
    /// The node refused this kind. Retried on the next connection.
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingRequest {
    Subscribe(UpdateKind),
    Unsubscribe,
}

/// The result of dispatching an inbound frame.
#[derive(Debug)]
pub(crate) enum Dispatched {
    /// A notification for a live subscription.
    Update(Update),
    /// The node confirmed a subscription.
    Subscribed(UpdateKind),
    /// The node refused a subscription.
    Rejected(SubscriptionError),
    /// The node answered an unsubscribe.
    Unsubscribed,
    /// The frame was dropped.
    Ignored(&'static str),
}

/// Tracks provider subscription ids for each kind, and routes notifications
/// to their kind.
///
/// Requests are queued in an outbox, and written to the socket by the
/// caller.
#[derive(Debug, Default)]
pub(crate) struct Multiplexer {
    next_request: u64,
    pending: HashMap<u64, PendingRequest>,
    by_id: HashMap<String, UpdateKind>,
    slots: HashMap<UpdateKind, Slot>,
    demanded: KindSet,
    online: bool,
    outbox: Vec<String>,
}

impl Multiplexer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn slot(&self, kind: UpdateKind) -> &Slot {
        static IDLE: Slot = Slot::Idle;
        self.slots.get(&kind).unwrap_or(&IDLE)
    }

    fn request(&mut self, method: &str, param: &str, pending: PendingRequest) -> u64 {
        let id = self.next_request;
        self.next_request += 1;
        self.outbox.push(Request::new(id, method, [param]).to_frame());
        self.pending.insert(id, pending);
        id
    }

    fn unsubscribe(&mut self, id: &str) {
        debug!(target: "explorer::realtime::mux", id, "unsubscribing");
        self.by_id.remove(id);
        self.request("eth_unsubscribe", id, PendingRequest::Unsubscribe);
    }

    /// Subscribe to `kind` unless a subscription is live, pending, or was
    /// refused on this connection.
    pub(crate) fn ensure(&mut self, kind: UpdateKind) {
        let Some(topic) = kind.topic() else { return };
        self.demanded.insert(kind);
        if !self.online || *self.slot(kind) != Slot::Idle {
            return;
        }
        debug!(target: "explorer::realtime::mux", %kind, topic, "subscribing");
        let request = self.request("eth_subscribe", topic, PendingRequest::Subscribe(kind));
        self.slots.insert(kind, Slot::Pending { request });
    }

    /// Drop the subscription for `kind`. A pending subscribe is
    /// unsubscribed once its id arrives.
    pub(crate) fn release(&mut self, kind: UpdateKind) {
        self.demanded.remove(kind);
        match self.slot(kind).clone() {
            Slot::Active { id } => {
                self.slots.remove(&kind);
                self.unsubscribe(&id);
            }
            Slot::Rejected => {
                self.slots.remove(&kind);
            }
            Slot::Idle | Slot::Pending { .. } => {}
        }
    }

    /// Bring upstream subscriptions in line with the demanded kinds.
    pub(crate) fn reconcile(&mut self, demanded: KindSet) {
        for kind in UpdateKind::SUBSCRIBABLE {
            if demanded.contains(kind) {
                self.ensure(kind);
            } else if self.demanded.contains(kind) || *self.slot(kind) != Slot::Idle {
                self.release(kind);
            }
        }
    }

    /// Kinds with subscriber interest.
    pub(crate) const fn demanded(&self) -> KindSet {
        self.demanded
    }

    /// Start a new connection epoch and resubscribe every demanded kind.
    pub(crate) fn on_open(&mut self) {
        self.reset();
        self.online = true;
        for kind in self.demanded.iter().collect::<Vec<_>>() {
            self.ensure(kind);
        }
    }

    /// The connection was lost. All provider ids are now stale.
    pub(crate) fn on_close(&mut self) {
        self.reset();
        self.online = false;
    }

    fn reset(&mut self) {
        self.pending.clear();
        self.by_id.clear();
        self.slots.clear();
        self.outbox.clear();
    }

    /// True once every demanded kind is active, or refused, on the current
    /// connection.
    pub(crate) fn is_resumed(&self) -> bool {
        self.online
            && self
                .demanded
                .iter()
                .all(|kind| matches!(self.slot(kind), Slot::Active { .. } | Slot::Rejected))
    }

    /// Requests waiting to be written.
    pub(crate) fn take_outbox(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outbox)
    }

    /// Classify and route an inbound text frame.
    pub(crate) fn dispatch(&mut self, text: &str) -> Result<Dispatched, ProtocolError> {
        match Inbound::parse(text)? {
            Inbound::Notification { subscription, result } => {
                let Some(&kind) = self.by_id.get(&subscription) else {
                    trace!(target: "explorer::realtime::mux", %subscription, "stale subscription id");
                    return Ok(Dispatched::Ignored("unknown subscription id"));
                };
                decode_payload(kind, result).map(Dispatched::Update)
            }
            Inbound::Response { id, result } => match self.pending.remove(&id) {
                None => Ok(Dispatched::Ignored("unknown request id")),
                Some(PendingRequest::Unsubscribe) => Ok(Dispatched::Unsubscribed),
                Some(PendingRequest::Subscribe(kind)) => self.on_subscribed(kind, id, result),
            },
        }
    }

    fn on_subscribed(
        &mut self,
        kind: UpdateKind,
        request: u64,
        result: Result<Value, crate::rpc::ErrorObject>,
    ) -> Result<Dispatched, ProtocolError> {
        let current = *self.slot(kind) == Slot::Pending { request };

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                if current {
                    self.slots.insert(kind, Slot::Rejected);
                }
                return Ok(Dispatched::Rejected(SubscriptionError {
                    kind,
                    code: err.code,
                    message: err.message,
                }));
            }
        };

        let id = match subscription_id(value) {
            Ok(id) => id,
            Err(err) => {
                if current {
                    self.slots.insert(kind, Slot::Rejected);
                }
                return Err(err);
            }
        };

        if current && self.demanded.contains(kind) {
            debug!(target: "explorer::realtime::mux", %kind, %id, "subscribed");
            self.by_id.insert(id.clone(), kind);
            self.slots.insert(kind, Slot::Active { id });
            return Ok(Dispatched::Subscribed(kind));
        }

        if current {
            self.slots.remove(&kind);
        }
        self.unsubscribe(&id);
        Ok(Dispatched::Ignored("subscription no longer demanded"))
    }
}

fn decode<T: DeserializeOwned>(kind: UpdateKind, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|err| ProtocolError::payload(kind, err))
}

/// Decode a notification payload for `kind`.
pub(crate) fn decode_payload(kind: UpdateKind, value: Value) -> Result<Update, ProtocolError> {
    let update = match kind {
        UpdateKind::NewBlock => Update::NewBlock(Arc::new(decode::<Header>(kind, value)?)),
        UpdateKind::NewPendingTransaction => {
            // Some nodes send full transaction objects instead of hashes.
            let hash = match value {
                Value::Object(mut obj) => obj.remove("hash").unwrap_or(Value::Null),
                other => other,
            };
            Update::NewPendingTransaction(decode::<TxHash>(kind, hash)?)
        }
        UpdateKind::MempoolUpdate => Update::MempoolUpdate(decode::<MempoolStats>(kind, value)?),
        UpdateKind::ScheduledUpdate => {
            Update::ScheduledUpdate(Arc::new(decode::<ScheduledTransaction>(kind, value)?))
        }
        UpdateKind::GasPriceUpdate => Update::GasPriceUpdate(decode::<GasPrice>(kind, value)?),
        UpdateKind::ConnectionStatus => return Err(ProtocolError::UnexpectedShape),
    };
    Ok(update)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn sent(mux: &mut Multiplexer) -> Vec<Value> {
        mux.take_outbox().iter().map(|frame| serde_json::from_str(frame).unwrap()).collect()
    }

    fn ack(id: &Value, result: Value) -> String {
        json!({ "jsonrpc": "2.0", "id": id, "result": result }).to_string()
    }

    fn notification(subscription: &str, result: Value) -> String {
        json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": { "subscription": subscription, "result": result },
        })
        .to_string()
    }

    fn online() -> Multiplexer {
        let mut mux = Multiplexer::new();
        mux.on_open();
        mux
    }

    #[test]
    fn ensure_is_idempotent() {
        let mut mux = online();
        mux.ensure(UpdateKind::MempoolUpdate);
        mux.ensure(UpdateKind::MempoolUpdate);

        let sent = sent(&mut mux);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["method"], "eth_subscribe");
        assert_eq!(sent[0]["params"], json!(["mempoolStatus"]));

        let dispatched = mux.dispatch(&ack(&sent[0]["id"], json!("0x1"))).unwrap();
        assert!(matches!(dispatched, Dispatched::Subscribed(UpdateKind::MempoolUpdate)));
        assert!(mux.is_resumed());

        mux.ensure(UpdateKind::MempoolUpdate);
        assert!(mux.take_outbox().is_empty());
    }

    #[test]
    fn routes_notifications_by_id() {
        let mut mux = online();
        mux.ensure(UpdateKind::MempoolUpdate);
        let sent = sent(&mut mux);
        mux.dispatch(&ack(&sent[0]["id"], json!("0xabc"))).unwrap();

        let frame = notification("0xabc", json!({ "pending": "0x5", "queued": "0x2" }));
        match mux.dispatch(&frame).unwrap() {
            Dispatched::Update(Update::MempoolUpdate(stats)) => {
                assert_eq!(stats, MempoolStats { pending: 5, queued: 2 });
            }
            other => panic!("unexpected {other:?}"),
        }

        let stale = notification("0xdead", json!({ "pending": "0x1", "queued": "0x1" }));
        assert!(matches!(mux.dispatch(&stale).unwrap(), Dispatched::Ignored(_)));
    }

    #[test]
    fn release_unsubscribes() {
        let mut mux = online();
        mux.ensure(UpdateKind::GasPriceUpdate);
        let sent_frames = sent(&mut mux);
        mux.dispatch(&ack(&sent_frames[0]["id"], json!("0x7"))).unwrap();

        mux.release(UpdateKind::GasPriceUpdate);
        let unsub = sent(&mut mux);
        assert_eq!(unsub[0]["method"], "eth_unsubscribe");
        assert_eq!(unsub[0]["params"], json!(["0x7"]));

        let dispatched = mux.dispatch(&ack(&unsub[0]["id"], json!(true))).unwrap();
        assert!(matches!(dispatched, Dispatched::Unsubscribed));

        let late = notification("0x7", json!({ "gasPrice": "0x1", "blockNumber": "0x1" }));
        assert!(matches!(mux.dispatch(&late).unwrap(), Dispatched::Ignored(_)));
    }

    #[test]
    fn release_while_pending_unsubscribes_on_ack() {
        let mut mux = online();
        mux.ensure(UpdateKind::NewBlock);
        let sub = sent(&mut mux);
        mux.release(UpdateKind::NewBlock);
        assert!(mux.take_outbox().is_empty());

        let dispatched = mux.dispatch(&ack(&sub[0]["id"], json!("0x9"))).unwrap();
        assert!(matches!(dispatched, Dispatched::Ignored(_)));
        let unsub = sent(&mut mux);
        assert_eq!(unsub[0]["method"], "eth_unsubscribe");
        assert_eq!(unsub[0]["params"], json!(["0x9"]));
    }

    #[test]
    fn rejection_counts_as_resumed() {
        let mut mux = online();
        mux.ensure(UpdateKind::ScheduledUpdate);
        let sub = sent(&mut mux);
        let frame = json!({
            "jsonrpc": "2.0",
            "id": sub[0]["id"],
            "error": { "code": -32602, "message": "unknown topic" },
        })
        .to_string();

        match mux.dispatch(&frame).unwrap() {
            Dispatched::Rejected(err) => {
                assert_eq!(err.kind, UpdateKind::ScheduledUpdate);
                assert_eq!(err.code, -32602);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(mux.is_resumed());

        // Not retried until the next connection.
        mux.ensure(UpdateKind::ScheduledUpdate);
        assert!(mux.take_outbox().is_empty());
        mux.on_close();
        mux.on_open();
        assert_eq!(sent(&mut mux)[0]["params"], json!(["scheduledTransactions"]));
    }

    #[test]
    fn reopen_resubscribes_demanded() {
        let mut mux = Multiplexer::new();
        mux.reconcile(KindSet::only(UpdateKind::NewBlock).with(UpdateKind::MempoolUpdate));
        assert!(mux.take_outbox().is_empty());
        assert!(!mux.is_resumed());

        mux.on_open();
        let sub = sent(&mut mux);
        assert_eq!(sub.len(), 2);
        for (frame, id) in sub.iter().zip(["0x1", "0x2"]) {
            mux.dispatch(&ack(&frame["id"], json!(id))).unwrap();
        }
        assert!(mux.is_resumed());

        mux.on_close();
        assert!(!mux.is_resumed());
        let stale = notification("0x1", json!({}));
        mux.on_open();
        assert!(matches!(mux.dispatch(&stale).unwrap(), Dispatched::Ignored(_)));
        assert_eq!(sent(&mut mux).len(), 2);
    }

    #[test]
    fn pending_tx_payloads() {
        let hash = TxHash::repeat_byte(0x11);
        let update = decode_payload(UpdateKind::NewPendingTransaction, json!(hash)).unwrap();
        assert!(matches!(update, Update::NewPendingTransaction(h) if h == hash));

        let update =
            decode_payload(UpdateKind::NewPendingTransaction, json!({ "hash": hash, "nonce": "0x1" }))
                .unwrap();
        assert!(matches!(update, Update::NewPendingTransaction(h) if h == hash));

        assert!(matches!(
            decode_payload(UpdateKind::NewPendingTransaction, json!(42)),
            Err(ProtocolError::Payload { kind: UpdateKind::NewPendingTransaction, .. })
        ));
    }

    #[test]
    fn malformed_frames_are_errors() {
        let mut mux = online();
        assert!(mux.dispatch("{").is_err());
        assert!(matches!(mux.dispatch(&ack(&json!(99), json!("0x1"))).unwrap(), Dispatched::Ignored(_)));
    }
}
