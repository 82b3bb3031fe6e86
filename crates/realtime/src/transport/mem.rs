use crate::{
    TransportError, TransportResult,
    transport::{Connection, Connector, Message},
};
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::mpsc;

/// In-memory connector. Each [`Connector::connect`] call hands a fresh
/// [`MemSession`] to the paired [`MemNode`], which plays the node's side of
/// the connection.
///
/// Pings are answered with pongs unless built with
/// [`MemConnector::without_pong`].
#[derive(Debug, Clone)]
pub struct MemConnector {
    sessions: mpsc::UnboundedSender<MemSession>,
    refuse: Arc<AtomicUsize>,
    auto_pong: bool,
}

impl MemConnector {
    /// Create a connector and its node.
    pub fn new() -> (Self, MemNode) {
        let (sessions, rx) = mpsc::unbounded_channel();
        let refuse = Arc::new(AtomicUsize::new(0));
        (
            Self { sessions, refuse: refuse.clone(), auto_pong: true },
            MemNode { sessions: rx, refuse },
        )
    }

    /// Create a connector whose node never answers pings.
    pub fn without_pong() -> (Self, MemNode) {
        let (mut connector, node) = Self::new();
        connector.auto_pong = false;
        (connector, node)
    }
}

impl Connector for MemConnector {
    fn connect(&self) -> BoxFuture<'static, TransportResult<Connection>> {
        let this = self.clone();
        Box::pin(async move {
            let refused = this
                .refuse
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if refused {
                return Err(TransportError::Refused("refused by node".into()));
            }

            let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
            let (inbound_tx, inbound) = mpsc::unbounded_channel();
            let (forward, from_client) = mpsc::unbounded_channel();

            let session = MemSession { from_client, to_client: inbound_tx.clone() };
            this.sessions
                .send(session)
                .map_err(|_| TransportError::Refused("node is gone".into()))?;

            let auto_pong = this.auto_pong;
            tokio::spawn(async move {
                while let Some(msg) = outbound_rx.recv().await {
                    if forward.is_closed() {
                        break;
                    }
                    match msg {
                        Message::Ping(payload) if auto_pong => {
                            let _ = inbound_tx.send(Ok(Message::Pong(payload)));
                        }
                        Message::Ping(_) => {}
                        msg => {
                            if forward.send(msg).is_err() {
                                break;
                            }
                        }
                    }
                }
            });

            Ok(Connection::new(outbound, inbound))
        })
    }
}

/// The node side of a [`MemConnector`].
#[derive(Debug)]
pub struct MemNode {
    sessions: mpsc::UnboundedReceiver<MemSession>,
    refuse: Arc<AtomicUsize>,
}

impl MemNode {
    /// Wait for the next connection. `None` once the connector is dropped.
    pub async fn accept(&mut self) -> Option<MemSession> {
        self.sessions.recv().await
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }
}

/// One connection, seen from the node.
#[derive(Debug)]
pub struct MemSession {
    from_client: mpsc::UnboundedReceiver<Message>,
    to_client: mpsc::UnboundedSender<TransportResult<Message>>,
}

impl MemSession {
    /// Next message sent by the client. Pings are not included.
    pub async fn recv(&mut self) -> Option<Message> {
        self.from_client.recv().await
    }

    /// Next JSON-RPC request sent by the client. Non-text messages are
    /// skipped.
    pub async fn recv_request(&mut self) -> Option<Value> {
        while let Some(msg) = self.recv().await {
            if let Message::Text(text) = msg {
                return serde_json::from_str(text.as_str()).ok();
            }
        }
        None
    }

    /// Answer the next request if it is `eth_subscribe`, returning its
    /// topic. The subscription is given the provided id.
    pub async fn answer_subscribe(&mut self, subscription: &str) -> Option<String> {
        let request = self.recv_request().await?;
        if request["method"] != "eth_subscribe" {
            return None;
        }
        let topic = request["params"][0].as_str()?.to_owned();
        self.respond(&request["id"], subscription);
        Some(topic)
    }

    /// Send a successful response.
    pub fn respond(&self, id: &Value, result: impl Serialize) -> bool {
        self.send_json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
    }

    /// Send an error response.
    pub fn respond_error(&self, id: &Value, code: i64, message: &str) -> bool {
        self.send_json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message },
        }))
    }

    /// Send an `eth_subscription` notification.
    pub fn notify(&self, subscription: &str, result: impl Serialize) -> bool {
        self.send_json(json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": { "subscription": subscription, "result": result },
        }))
    }

    /// Send a raw text frame.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.to_client.send(Ok(Message::text(text.into()))).is_ok()
    }

    /// Fail the connection with an error.
    pub fn fail(&self, err: TransportError) -> bool {
        self.to_client.send(Err(err)).is_ok()
    }

    /// Close the connection.
    pub fn close(self) {
        let _ = self.to_client.send(Ok(Message::Close(None)));
    }

    fn send_json(&self, value: Value) -> bool {
        self.send_text(value.to_string())
    }
}
