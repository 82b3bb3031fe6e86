use std::{fmt, time::SystemTime};

/// State of the upstream transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No connection, and none is being attempted.
    #[default]
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Connected to the upstream node.
    Connected,
    /// Connection lost; waiting to retry, or retrying.
    Reconnecting,
    /// Retries exhausted. No further attempts will be made.
    Failed,
}

impl ConnectionState {
    /// True if the transport is currently live.
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Lifecycle state of the realtime manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ManagerState {
    /// No subscriber has been registered yet.
    #[default]
    Uninitialized,
    /// First connection and subscriptions in progress.
    Initializing,
    /// Connected, and every demanded kind is subscribed.
    Ready,
    /// Upstream link lost. Cached data is still served.
    Degraded,
    /// Shut down. No further updates will be produced.
    ShuttingDown,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::ShuttingDown => "shutting_down",
        };
        f.write_str(s)
    }
}

/// Snapshot of the manager's view of its upstream link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Transport state.
    pub state: ConnectionState,
    /// Manager lifecycle state.
    pub manager: ManagerState,
    /// The most recent transport or subscription error, if any.
    pub last_error: Option<String>,
    /// When the last upstream update was accepted.
    pub last_update_at: Option<SystemTime>,
}

impl ConnectionStatus {
    /// True if cached data may be stale because the link is down.
    pub const fn is_degraded(&self) -> bool {
        matches!(self.manager, ManagerState::Degraded)
    }
}
