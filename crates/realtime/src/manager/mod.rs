mod builder;
pub use builder::{BuilderError, RealtimeManagerBuilder};

mod refresh;
use refresh::RefreshTracker;

mod task;
use task::RealtimeTask;

use crate::{
    CacheSnapshot, RefreshError, RefreshResult, SubscribeOptions, UpdateHandler,
    cache::StateCache,
    rpc::RpcClient,
    transport::{Connector, Link, Poller, Transport},
};
use alloy::primitives::TxHash;
use explorer_realtime_config::RealtimeConfig;
use explorer_realtime_types::{
    ConnectionStatus, GasPrice, Header, MempoolStats, ScheduledTransaction, UpdateKind,
};
use std::{
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Instructions for the manager task.
pub(crate) enum ManagerInst {
    Subscribe {
        token: u64,
        id: String,
        handler: Box<dyn UpdateHandler>,
        options: SubscribeOptions,
        active: Arc<AtomicBool>,
    },
    Unsubscribe {
        token: u64,
    },
    Refresh {
        kind: UpdateKind,
        resp: oneshot::Sender<RefreshResult>,
    },
}

impl fmt::Debug for ManagerInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subscribe { token, id, options, .. } => f
                .debug_struct("Subscribe")
                .field("token", token)
                .field("id", id)
                .field("options", options)
                .finish_non_exhaustive(),
            Self::Unsubscribe { token } => {
                f.debug_struct("Unsubscribe").field("token", token).finish()
            }
            Self::Refresh { kind, .. } => {
                f.debug_struct("Refresh").field("kind", kind).finish_non_exhaustive()
            }
        }
    }
}

struct Inner {
    config: RealtimeConfig,
    sender: mpsc::UnboundedSender<ManagerInst>,
    task: Mutex<Option<RealtimeTask>>,
    status: watch::Receiver<ConnectionStatus>,
    cache: watch::Receiver<CacheSnapshot>,
    next_token: AtomicU64,
    cancel: CancellationToken,
    stopped: CancellationToken,
}

/// Handle to the realtime manager.
///
/// Cheap to clone; every clone refers to the same connection, caches and
/// subscribers. The background task is spawned by the first
/// [`Self::subscribe`] or [`Self::force_refresh`], and runs until
/// [`Self::shutdown`] or until every handle is dropped.
#[derive(Clone)]
pub struct RealtimeManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for RealtimeManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeManager")
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

impl RealtimeManager {
    /// Create a builder.
    pub fn builder() -> RealtimeManagerBuilder {
        RealtimeManagerBuilder::default()
    }

    pub(crate) fn new(
        config: RealtimeConfig,
        connector: Option<Arc<dyn Connector>>,
        client: reqwest::Client,
        http_url: Url,
    ) -> Self {
        let link = match connector {
            Some(connector) => Link::Socket(Transport::new(connector, &config)),
            None => Link::Polling(Poller::new(config.poll_interval())),
        };
        let cache = StateCache::new(&config);
        let refresh =
            RefreshTracker::new(RpcClient::new(client, http_url, config.scheduled_method()));
        let (status_tx, status) = watch::channel(ConnectionStatus::default());
        let (sender, inst) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let stopped = CancellationToken::new();

        let cache_rx = cache.subscribe();
        let task = RealtimeTask::new(
            link,
            cache,
            refresh,
            status_tx,
            inst,
            cancel.clone(),
            stopped.clone(),
        );

        Self {
            inner: Arc::new(Inner {
                config,
                sender,
                task: Mutex::new(Some(task)),
                status,
                cache: cache_rx,
                next_token: AtomicU64::new(1),
                cancel,
                stopped,
            }),
        }
    }

    /// Spawn the task if it has not been spawned.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    fn ensure_started(&self) {
        let task = self.inner.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            tokio::spawn(task.run());
        }
    }

    /// The configuration the manager was built with.
    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }

    /// Register a subscriber.
    ///
    /// `handler` receives every accepted update in the subscriber's
    /// interest, on the manager task. Registering an `id` that is already
    /// live replaces the earlier subscriber. Callable from inside a handler.
    ///
    /// The subscriber stays registered until the returned [`Subscription`]
    /// is dropped or [`Subscription::unsubscribe`] is called.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn subscribe(
        &self,
        id: impl Into<String>,
        handler: impl UpdateHandler,
        options: SubscribeOptions,
    ) -> Subscription {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(!self.inner.cancel.is_cancelled()));

        let inst = ManagerInst::Subscribe {
            token,
            id: id.into(),
            handler: Box::new(handler),
            options: options.with_defaults(&self.inner.config),
            active: active.clone(),
        };
        if self.inner.sender.send(inst).is_err() {
            active.store(false, Ordering::Release);
        } else {
            self.ensure_started();
        }

        Subscription { token, active, sender: self.inner.sender.downgrade() }
    }

    /// Fetch the current value of `kind` over HTTP, cache it, and deliver it
    /// to subscribers. Concurrent calls for the same kind share one request.
    ///
    /// Returns the fetched updates, including any the cache already held.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub async fn force_refresh(&self, kind: UpdateKind) -> RefreshResult {
        if !kind.is_refreshable() {
            return Err(RefreshError::Unsupported(kind));
        }
        if self.inner.cancel.is_cancelled() {
            return Err(RefreshError::Stopped);
        }

        let (resp, rx) = oneshot::channel();
        self.inner
            .sender
            .send(ManagerInst::Refresh { kind, resp })
            .map_err(|_| RefreshError::Stopped)?;
        self.ensure_started();

        rx.await.map_err(|_| RefreshError::Stopped)?
    }

    /// The current connection status. Never blocks.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Watch the connection status.
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.clone()
    }

    /// The current cache contents.
    pub fn snapshot(&self) -> CacheSnapshot {
        self.inner.cache.borrow().clone()
    }

    /// Watch the cache contents.
    pub fn watch_cache(&self) -> watch::Receiver<CacheSnapshot> {
        self.inner.cache.clone()
    }

    /// Recent block headers, newest first.
    pub fn cached_blocks(&self) -> Arc<[Arc<Header>]> {
        self.inner.cache.borrow().blocks().clone()
    }

    /// Recent scheduled transactions, newest first.
    pub fn cached_scheduled_transactions(&self) -> Arc<[Arc<ScheduledTransaction>]> {
        self.inner.cache.borrow().scheduled_transactions().clone()
    }

    /// Recent pending transaction hashes, newest first.
    pub fn cached_pending_transactions(&self) -> Arc<[TxHash]> {
        self.inner.cache.borrow().pending_transactions().clone()
    }

    /// The latest mempool counters.
    pub fn cached_mempool_stats(&self) -> Option<MempoolStats> {
        self.inner.cache.borrow().mempool_stats()
    }

    /// The latest gas price.
    pub fn cached_gas_price(&self) -> Option<GasPrice> {
        self.inner.cache.borrow().gas_price()
    }

    /// Stop the manager. Subscribers are removed, the connection is closed,
    /// and pending refreshes fail with [`RefreshError::Stopped`]. Cached
    /// data stays readable. Idempotent.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();

        // Never spawned: close in place.
        let task = self.inner.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut task) = task {
            task.close();
        }
    }

    /// True once the manager has shut down.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.is_cancelled()
    }

    /// Wait for the manager to finish shutting down.
    pub async fn stopped(&self) {
        self.inner.stopped.cancelled().await
    }
}

/// A registered subscriber. Dropping it unsubscribes.
///
/// Unsubscribing takes effect immediately, including from inside a handler:
/// no further updates are delivered to the subscriber, though one already
/// being handled runs to completion.
#[derive(Debug)]
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    token: u64,
    active: Arc<AtomicBool>,
    sender: mpsc::WeakUnboundedSender<ManagerInst>,
}

impl Subscription {
    /// True until unsubscribed, replaced, or the manager shuts down.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Unsubscribe. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {
        self.release();
    }

    fn release(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            if let Some(sender) = self.sender.upgrade() {
                let _ = sender.send(ManagerInst::Unsubscribe { token: self.token });
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
