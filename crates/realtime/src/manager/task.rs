use crate::{
    cache::StateCache,
    fanout::Registry,
    manager::{
        ManagerInst,
        refresh::{RefreshDone, RefreshTracker},
    },
    metrics,
    mux::{Dispatched, Multiplexer},
    transport::{Link, LinkEvent},
};
use explorer_realtime_types::{ConnectionState, ConnectionStatus, ManagerState, Update};
use std::time::SystemTime;
use tokio::{
    sync::{mpsc, watch},
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The manager's actor. Owns the upstream link, the multiplexer, the caches
/// and the subscriber registry; every mutation of them happens here.
#[derive(Debug)]
pub(crate) struct RealtimeTask {
    link: Link,
    mux: Multiplexer,
    cache: StateCache,
    registry: Registry,
    refresh: RefreshTracker,

    manager: ManagerState,
    last_error: Option<String>,
    last_update_at: Option<SystemTime>,
    /// Last `(state, manager)` pair announced to subscribers.
    announced: (ConnectionState, ManagerState),
    status: watch::Sender<ConnectionStatus>,

    inst: mpsc::UnboundedReceiver<ManagerInst>,
    cancel: CancellationToken,
    stopped: CancellationToken,
}

impl RealtimeTask {
    pub(crate) fn new(
        link: Link,
        cache: StateCache,
        refresh: RefreshTracker,
        status: watch::Sender<ConnectionStatus>,
        inst: mpsc::UnboundedReceiver<ManagerInst>,
        cancel: CancellationToken,
        stopped: CancellationToken,
    ) -> Self {
        let announced = (link.state(), ManagerState::Uninitialized);
        Self {
            link,
            mux: Multiplexer::new(),
            cache,
            registry: Registry::new(),
            refresh,
            manager: ManagerState::Uninitialized,
            last_error: None,
            last_update_at: None,
            announced,
            status,
            inst,
            cancel,
            stopped,
        }
    }

    /// Run until shutdown, or until every manager handle is dropped.
    #[instrument(skip_all, name = "realtime_manager")]
    pub(crate) async fn run(mut self) {
        info!(target: "explorer::realtime", polling = self.link.is_polling(), "realtime manager started");
        loop {
            let flush_at = self.registry.next_deadline();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                inst = self.inst.recv() => match inst {
                    Some(inst) => self.handle_inst(inst),
                    None => break,
                },
                event = self.link.next_event() => self.handle_link(event),
                Some(done) = self.refresh.next_done() => self.handle_refresh(done),
                _ = sleep_until_opt(flush_at) => self.registry.flush_due(Instant::now()),
            }
            self.settle();
        }
        self.close();
    }

    fn handle_inst(&mut self, inst: ManagerInst) {
        match inst {
            ManagerInst::Subscribe { token, id, handler, options, active } => {
                let interest = options.interest();
                if !self.registry.register(token, id.clone(), handler, options, active) {
                    trace!(target: "explorer::realtime", %id, "subscriber gone before registration");
                    return;
                }
                debug!(target: "explorer::realtime", %id, ?interest, "subscriber registered");
                if self.manager == ManagerState::Uninitialized {
                    self.manager = ManagerState::Initializing;
                    self.link.start();
                }
            }
            ManagerInst::Unsubscribe { token } => {
                if self.registry.remove(token) {
                    debug!(target: "explorer::realtime", token, remaining = self.registry.len(), "subscriber removed");
                }
            }
            ManagerInst::Refresh { kind, resp } => self.refresh.request(kind, Some(resp)),
        }
    }

    fn handle_link(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened => self.mux.on_open(),
            LinkEvent::Frame(text) => {
                metrics::inc_frames_received();
                self.handle_frame(&text);
            }
            LinkEvent::Lost(err) => {
                self.mux.on_close();
                self.last_error = Some(err.to_string());
            }
            LinkEvent::Tick => {
                let mut polled = false;
                for kind in self.registry.demanded().iter().filter(|kind| kind.is_refreshable()) {
                    self.refresh.request(kind, None);
                    polled = true;
                }
                // Nothing to fetch, so nothing can fail.
                if let (false, Link::Polling(poller)) = (polled, &mut self.link) {
                    poller.record(true);
                }
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        match self.mux.dispatch(text) {
            Ok(Dispatched::Update(update)) => self.accept(update),
            Ok(Dispatched::Subscribed(kind)) => {
                trace!(target: "explorer::realtime", %kind, "subscription active");
            }
            Ok(Dispatched::Rejected(err)) => {
                warn!(target: "explorer::realtime", %err, "subscription rejected");
                self.last_error = Some(err.to_string());
            }
            Ok(Dispatched::Unsubscribed) => {}
            Ok(Dispatched::Ignored(reason)) => {
                metrics::inc_frames_dropped(reason);
                debug!(target: "explorer::realtime", reason, "frame ignored");
            }
            Err(err) => {
                metrics::inc_frames_dropped("malformed");
                warn!(target: "explorer::realtime", %err, "dropping frame");
            }
        }
    }

    fn handle_refresh(&mut self, done: RefreshDone) {
        let RefreshDone { kind, result } = done;
        let waiters = self.refresh.finish(kind);

        if let Link::Polling(poller) = &mut self.link {
            poller.record(result.is_ok());
        }

        match &result {
            Ok(updates) => {
                debug!(target: "explorer::realtime", %kind, count = updates.len(), "refresh complete");
                for update in updates {
                    self.accept(update.clone());
                }
            }
            Err(err) => {
                warn!(target: "explorer::realtime", %kind, %err, "refresh failed");
                if self.link.is_polling() {
                    self.last_error = Some(err.to_string());
                }
            }
        }

        for waiter in waiters {
            let _ = waiter.send(result.clone());
        }
    }

    /// Cache an upstream update and deliver it if it was new.
    fn accept(&mut self, update: Update) {
        if self.cache.insert(&update) {
            self.last_update_at = Some(SystemTime::now());
            self.registry.deliver(&update, Instant::now());
        }
    }

    /// Bring upstream subscriptions in line with subscriber interest, flush
    /// queued requests, and advance the lifecycle.
    fn settle(&mut self) {
        if self.manager != ManagerState::Uninitialized {
            self.mux.reconcile(self.registry.demanded());
        }
        for frame in self.mux.take_outbox() {
            if !self.link.send(frame) {
                trace!(target: "explorer::realtime", "request not sent, link down");
            }
        }

        let connected = self.link.state().is_connected();
        self.manager = match self.manager {
            ManagerState::Initializing | ManagerState::Degraded
                if connected && (self.link.is_polling() || self.mux.is_resumed()) =>
            {
                info!(target: "explorer::realtime", "realtime manager ready");
                ManagerState::Ready
            }
            ManagerState::Ready if !connected => {
                warn!(target: "explorer::realtime", state = %self.link.state(), "realtime manager degraded");
                ManagerState::Degraded
            }
            other => other,
        };

        self.publish_status();
    }

    /// Publish the status, and announce state transitions to subscribers.
    fn publish_status(&mut self) {
        let status = ConnectionStatus {
            state: self.link.state(),
            manager: self.manager,
            last_error: self.last_error.clone(),
            last_update_at: self.last_update_at,
        };

        let pair = (status.state, status.manager);
        if pair != self.announced {
            self.announced = pair;
            self.registry.deliver(&Update::ConnectionStatus(status.clone()), Instant::now());
        }

        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    pub(crate) fn close(&mut self) {
        info!(target: "explorer::realtime", "realtime manager shutting down");
        self.manager = ManagerState::ShuttingDown;
        self.link.stop();
        self.mux.on_close();
        self.publish_status();
        self.registry.clear();
        self.refresh.close();
        self.stopped.cancel();
    }
}
