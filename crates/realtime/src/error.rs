use explorer_realtime_types::UpdateKind;
use std::{sync::Arc, time::Duration};

/// Result using [`TransportError`] as the default error type.
pub type TransportResult<T, E = TransportError> = std::result::Result<T, E>;

/// Result of a one-shot refresh.
pub type RefreshResult<T = Vec<explorer_realtime_types::Update>> =
    std::result::Result<T, RefreshError>;

/// Socket-level errors. Handled by the reconnect loop, never returned to
/// callers; the latest one is visible in the connection status.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint refused the connection.
    #[error("connection refused: {0}")]
    Refused(String),
    /// The connection closed.
    #[error("connection closed: {0}")]
    Closed(String),
    /// Connecting took too long.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    /// No traffic arrived after a heartbeat ping.
    #[error("no traffic within {0:?} of heartbeat ping")]
    HeartbeatTimeout(Duration),
    /// WebSocket protocol or I/O error.
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl TransportError {
    /// Connection closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::Closed(reason.into())
    }

    /// True if the error was raised by the heartbeat rather than the socket.
    pub const fn is_heartbeat(&self) -> bool {
        matches!(self, Self::HeartbeatTimeout(_))
    }
}

/// A single inbound frame could not be understood. The frame is dropped;
/// the connection stays up.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    /// The frame is JSON, but neither a response nor a notification.
    #[error("frame is neither a response nor a subscription notification")]
    UnexpectedShape,
    /// The provider subscription id is neither a string nor a number.
    #[error("unsupported subscription id: {0}")]
    SubscriptionId(serde_json::Value),
    /// The notification payload does not match its kind.
    #[error("bad {kind} payload: {source}")]
    Payload {
        /// The kind the payload was routed to.
        kind: UpdateKind,
        /// The decoding error.
        source: serde_json::Error,
    },
    /// A binary frame that is not UTF-8.
    #[error("binary frame is not utf-8")]
    Binary,
}

impl ProtocolError {
    /// Payload decoding error.
    pub const fn payload(kind: UpdateKind, source: serde_json::Error) -> Self {
        Self::Payload { kind, source }
    }
}

/// The node rejected an `eth_subscribe` request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("node rejected {kind} subscription ({code}): {message}")]
pub struct SubscriptionError {
    /// The rejected kind.
    pub kind: UpdateKind,
    /// JSON-RPC error code.
    pub code: i64,
    /// JSON-RPC error message.
    pub message: String,
}

/// A subscriber's handler failed. Isolated to that subscriber and that
/// update.
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    /// The handler returned an error.
    #[error("handler for {id} failed: {error}")]
    Handler {
        /// Subscriber id.
        id: String,
        /// The handler's error.
        error: eyre::Report,
    },
    /// The handler panicked.
    #[error("handler for {id} panicked: {message}")]
    Panicked {
        /// Subscriber id.
        id: String,
        /// The panic payload, if it was a string.
        message: String,
    },
}

/// A one-shot refresh failed. Returned only to the callers of that refresh.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    /// HTTP request failed.
    #[error(transparent)]
    Http(Arc<reqwest::Error>),
    /// The node returned a JSON-RPC error.
    #[error("rpc error ({code}): {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },
    /// The response could not be decoded.
    #[error("bad refresh response: {0}")]
    Decode(Arc<serde_json::Error>),
    /// The node returned `null`.
    #[error("node returned no data for {0}")]
    Empty(UpdateKind),
    /// The kind has no one-shot fetch.
    #[error("{0} cannot be refreshed")]
    Unsupported(UpdateKind),
    /// The manager shut down before the refresh completed.
    #[error("realtime manager is not running")]
    Stopped,
}

impl From<reqwest::Error> for RefreshError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for RefreshError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(Arc::new(err))
    }
}

/// Any error the realtime manager produces.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Protocol error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Subscription error.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    /// Subscriber error.
    #[error(transparent)]
    Subscriber(#[from] SubscriberError),
    /// Refresh error.
    #[error(transparent)]
    Refresh(#[from] RefreshError),
}

impl RealtimeError {
    /// True if the error is handled by the reconnect loop.
    pub const fn is_link(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Subscription(_))
    }

    /// True if the error only affected a single frame or subscriber.
    pub const fn is_isolated(&self) -> bool {
        matches!(self, Self::Protocol(_) | Self::Subscriber(_))
    }
}
