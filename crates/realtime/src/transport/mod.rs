//! Upstream transport.
//!
//! The manager talks to its node through a [`Connection`]: a pair of
//! channels carrying WebSocket [`Message`]s. A [`Connector`] produces a new
//! connection for every attempt. Two connectors ship with this crate:
//!
//! - [`WsConnector`] dials a real node with `tokio-tungstenite`.
//! - [`MemConnector`] hands each connection to an in-process [`MemNode`],
//!   which scripts the node side. Useful for tests and embedding.
//!
//! Reconnects, backoff and heartbeats are handled by the manager and are
//! independent of the connector.

mod backoff;
pub(crate) use backoff::Backoff;

mod mem;
pub use mem::{MemConnector, MemNode, MemSession};

mod poll;
pub(crate) use poll::Poller;

mod socket;
pub(crate) use socket::Transport;

mod ws;
pub use ws::WsConnector;

use crate::{TransportError, TransportResult};
use explorer_realtime_types::ConnectionState;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

pub use tokio_tungstenite::tungstenite::Message;

/// Produces upstream connections.
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection.
    fn connect(&self) -> BoxFuture<'static, TransportResult<Connection>>;
}

/// A live upstream connection.
///
/// Dropping the connection closes it.
#[derive(Debug)]
pub struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    inbound: mpsc::UnboundedReceiver<TransportResult<Message>>,
}

impl Connection {
    /// Create a connection from its outbound and inbound halves.
    pub const fn new(
        outbound: mpsc::UnboundedSender<Message>,
        inbound: mpsc::UnboundedReceiver<TransportResult<Message>>,
    ) -> Self {
        Self { outbound, inbound }
    }

    /// Queue a message. Returns `false` if the connection is closed.
    pub fn send(&self, msg: Message) -> bool {
        self.outbound.send(msg).is_ok()
    }

    /// Receive the next message. `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<TransportResult<Message>> {
        self.inbound.recv().await
    }
}

/// Event emitted by the upstream link.
#[derive(Debug)]
pub(crate) enum LinkEvent {
    /// A connection was established.
    Opened,
    /// A text frame arrived.
    Frame(String),
    /// The connection was lost, or an attempt failed.
    Lost(TransportError),
    /// Polling interval elapsed.
    Tick,
}

/// The manager's upstream link: a WebSocket transport, or HTTP polling when
/// no WebSocket endpoint is configured.
#[derive(Debug)]
pub(crate) enum Link {
    Socket(Transport),
    Polling(Poller),
}

impl Link {
    /// Current connection state.
    pub(crate) const fn state(&self) -> ConnectionState {
        match self {
            Self::Socket(transport) => transport.state(),
            Self::Polling(poller) => poller.state(),
        }
    }

    /// True if this link polls over HTTP.
    pub(crate) const fn is_polling(&self) -> bool {
        matches!(self, Self::Polling(_))
    }

    /// Begin connecting. No-op if already started.
    pub(crate) fn start(&mut self) {
        match self {
            Self::Socket(transport) => transport.start(),
            Self::Polling(poller) => poller.start(),
        }
    }

    /// Stop the link. No reconnects follow.
    pub(crate) fn stop(&mut self) {
        match self {
            Self::Socket(transport) => transport.stop(),
            Self::Polling(poller) => poller.stop(),
        }
    }

    /// Send a text frame. Returns `false` if there is no open socket.
    pub(crate) fn send(&mut self, text: String) -> bool {
        match self {
            Self::Socket(transport) => transport.send(text),
            Self::Polling(_) => false,
        }
    }

    /// Wait for the next event. Cancel safe.
    pub(crate) async fn next_event(&mut self) -> LinkEvent {
        match self {
            Self::Socket(transport) => transport.next_event().await,
            Self::Polling(poller) => poller.next_event().await,
        }
    }
}
