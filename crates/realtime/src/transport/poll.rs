use crate::transport::LinkEvent;
use explorer_realtime_types::ConnectionState;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior, interval};

/// HTTP polling link. Ticks every `poll_interval`; the manager refreshes
/// each demanded kind on every tick and reports the outcome back through
/// [`Poller::record`].
#[derive(Debug)]
pub(crate) struct Poller {
    period: Duration,
    ticker: Option<Interval>,
    state: ConnectionState,
}

impl Poller {
    pub(crate) const fn new(period: Duration) -> Self {
        Self { period, ticker: None, state: ConnectionState::Disconnected }
    }

    pub(crate) const fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) fn start(&mut self) {
        if self.ticker.is_none() {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.ticker = Some(ticker);
            self.state = ConnectionState::Connecting;
        }
    }

    pub(crate) fn stop(&mut self) {
        self.ticker = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Record the outcome of a poll.
    pub(crate) fn record(&mut self, ok: bool) {
        if self.ticker.is_none() {
            return;
        }
        self.state = if ok { ConnectionState::Connected } else { ConnectionState::Reconnecting };
    }

    /// Wait for the next tick. The first tick fires immediately.
    pub(crate) async fn next_event(&mut self) -> LinkEvent {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
                LinkEvent::Tick
            }
            None => std::future::pending().await,
        }
    }
}
