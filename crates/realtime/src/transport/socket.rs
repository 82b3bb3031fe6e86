use crate::{
    ProtocolError, TransportError, TransportResult, metrics,
    transport::{Backoff, Connection, Connector, LinkEvent, Message},
    utils::deadline,
};
use explorer_realtime_config::RealtimeConfig;
use explorer_realtime_types::ConnectionState;
use futures_util::future::BoxFuture;
use std::{fmt, sync::Arc, time::Duration};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

enum Phase {
    Idle,
    Waiting { until: Instant },
    Connecting(BoxFuture<'static, TransportResult<Connection>>),
    Open { conn: Connection, last_traffic: Instant, ping_sent: Option<Instant> },
    Failed,
}

impl fmt::Debug for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Waiting { until } => f.debug_struct("Waiting").field("until", until).finish(),
            Self::Connecting(_) => f.write_str("Connecting"),
            Self::Open { last_traffic, ping_sent, .. } => f
                .debug_struct("Open")
                .field("last_traffic", last_traffic)
                .field("ping_sent", ping_sent)
                .finish(),
            Self::Failed => f.write_str("Failed"),
        }
    }
}

/// Outcome of one wait on an open connection.
enum Step {
    Frame(String),
    Lost(TransportError),
    Continue,
}

/// WebSocket transport with reconnect, backoff and heartbeat.
pub(crate) struct Transport {
    connector: Arc<dyn Connector>,
    backoff: Backoff,
    max_reconnects: Option<u32>,
    connect_timeout: Duration,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,

    state: ConnectionState,
    attempt: u32,
    phase: Phase,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.state)
            .field("attempt", &self.attempt)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Create a new transport. It stays idle until [`Self::start`].
    pub(crate) fn new(connector: Arc<dyn Connector>, config: &RealtimeConfig) -> Self {
        Self {
            connector,
            backoff: Backoff::new(config.backoff_base(), config.backoff_cap()),
            max_reconnects: config.max_reconnects(),
            connect_timeout: config.connect_timeout(),
            heartbeat_interval: config.heartbeat_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            state: ConnectionState::Disconnected,
            attempt: 0,
            phase: Phase::Idle,
        }
    }

    pub(crate) const fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn start(&mut self) {
        if matches!(self.phase, Phase::Idle) {
            self.state = ConnectionState::Connecting;
            self.phase = Phase::Connecting(self.connect());
        }
    }

    pub(crate) fn stop(&mut self) {
        self.phase = Phase::Idle;
        self.state = ConnectionState::Disconnected;
        self.attempt = 0;
    }

    /// Send a text frame on the open connection.
    pub(crate) fn send(&mut self, text: String) -> bool {
        match &self.phase {
            Phase::Open { conn, .. } => conn.send(Message::text(text)),
            _ => false,
        }
    }

    fn connect(&self) -> BoxFuture<'static, TransportResult<Connection>> {
        let fut = self.connector.connect();
        let timeout = self.connect_timeout;
        Box::pin(async move {
            tokio::time::timeout(timeout, fut)
                .await
                .map_err(|_| TransportError::ConnectTimeout(timeout))?
        })
    }

    /// Record a lost connection or failed attempt, and schedule the next
    /// attempt.
    fn lose(&mut self, err: TransportError) -> LinkEvent {
        if self.max_reconnects.is_some_and(|max| self.attempt >= max) {
            warn!(target: "explorer::realtime::transport", %err, attempts = self.attempt, "giving up on upstream");
            self.state = ConnectionState::Failed;
            self.phase = Phase::Failed;
            return LinkEvent::Lost(err);
        }

        let delay = self.backoff.delay(self.attempt);
        self.attempt += 1;
        self.state = ConnectionState::Reconnecting;
        self.phase = Phase::Waiting { until: deadline(Instant::now(), delay) };
        metrics::inc_reconnects();
        warn!(
            target: "explorer::realtime::transport",
            %err,
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            "upstream lost, reconnecting"
        );
        LinkEvent::Lost(err)
    }

    /// Wait for the next event. Cancel safe: every pending future lives in
    /// `self`, and is resumed by the next call.
    pub(crate) async fn next_event(&mut self) -> LinkEvent {
        loop {
            let step = match &mut self.phase {
                Phase::Idle | Phase::Failed => std::future::pending::<Step>().await,
                Phase::Waiting { until } => {
                    sleep_until(*until).await;
                    self.phase = Phase::Connecting(self.connect());
                    continue;
                }
                Phase::Connecting(fut) => match fut.await {
                    Ok(conn) => {
                        let now = Instant::now();
                        self.phase = Phase::Open { conn, last_traffic: now, ping_sent: None };
                        self.state = ConnectionState::Connected;
                        self.attempt = 0;
                        info!(target: "explorer::realtime::transport", "upstream connected");
                        return LinkEvent::Opened;
                    }
                    Err(err) => Step::Lost(err),
                },
                Phase::Open { conn, last_traffic, ping_sent } => {
                    let wake_at = match ping_sent {
                        Some(at) => deadline(*at, self.heartbeat_timeout),
                        None => deadline(*last_traffic, self.heartbeat_interval),
                    };

                    tokio::select! {
                        msg = conn.recv() => match msg {
                            Some(Ok(msg)) => {
                                *last_traffic = Instant::now();
                                *ping_sent = None;
                                read_message(msg)
                            }
                            Some(Err(err)) => Step::Lost(err),
                            None => Step::Lost(TransportError::closed("stream ended")),
                        },
                        _ = sleep_until(wake_at) => {
                            if ping_sent.is_some() {
                                Step::Lost(TransportError::HeartbeatTimeout(self.heartbeat_timeout))
                            } else if conn.send(Message::Ping(Default::default())) {
                                debug!(target: "explorer::realtime::transport", "heartbeat ping");
                                *ping_sent = Some(Instant::now());
                                Step::Continue
                            } else {
                                Step::Lost(TransportError::closed("writer stopped"))
                            }
                        }
                    }
                }
            };

            match step {
                Step::Frame(text) => return LinkEvent::Frame(text),
                Step::Lost(err) => return self.lose(err),
                Step::Continue => {}
            }
        }
    }
}

fn read_message(msg: Message) -> Step {
    match msg {
        Message::Text(text) => Step::Frame(text.as_str().to_owned()),
        Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Step::Frame(text),
            Err(_) => {
                metrics::inc_frames_dropped("binary");
                warn!(target: "explorer::realtime::transport", err = %ProtocolError::Binary, "dropping frame");
                Step::Continue
            }
        },
        Message::Close(frame) => {
            let reason = frame
                .map(|frame| format!("{} {}", u16::from(frame.code), frame.reason.as_str()))
                .unwrap_or_else(|| "no close frame".to_string());
            Step::Lost(TransportError::closed(reason))
        }
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Step::Continue,
    }
}
