//! Delivery of updates to registered subscribers.

use crate::{SubscriberError, metrics, utils::deadline};
use explorer_realtime_config::RealtimeConfig;
use explorer_realtime_types::{KindSet, Update, UpdateKind};
use std::{
    any::Any,
    collections::{BTreeMap, btree_map::Entry as MapEntry},
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::time::Instant;
use tracing::{trace, warn};

/// Receives updates.
///
/// Handlers run on the manager task, one update at a time. Errors and panics
/// are logged and do not affect other subscribers or later updates.
///
/// Implemented for any `FnMut(&Update) -> eyre::Result<()>`.
pub trait UpdateHandler: Send + 'static {
    /// Handle one update.
    fn on_update(&mut self, update: &Update) -> eyre::Result<()>;
}

impl<F> UpdateHandler for F
where
    F: FnMut(&Update) -> eyre::Result<()> + Send + 'static,
{
    fn on_update(&mut self, update: &Update) -> eyre::Result<()> {
        self(update)
    }
}

/// Options for [`RealtimeManager::subscribe`].
///
/// [`RealtimeManager::subscribe`]: crate::RealtimeManager::subscribe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    interest: Option<KindSet>,
    throttle: BTreeMap<UpdateKind, Duration>,
}

impl SubscribeOptions {
    /// Options receiving every kind, unthrottled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `kind` to the subscriber's interest.
    pub fn with_kind(mut self, kind: UpdateKind) -> Self {
        self.interest.get_or_insert(KindSet::EMPTY).insert(kind);
        self
    }

    /// Replace the subscriber's interest.
    pub const fn with_interest(mut self, interest: KindSet) -> Self {
        self.interest = Some(interest);
        self
    }

    /// Deliver `kind` at most once per `window`. A zero window disables
    /// throttling for that kind.
    pub fn with_throttle(mut self, kind: UpdateKind, window: Duration) -> Self {
        self.throttle.insert(kind, window);
        self
    }

    /// Kinds delivered to the subscriber.
    pub fn interest(&self) -> KindSet {
        self.interest.unwrap_or(KindSet::ALL)
    }

    /// Throttle window for `kind`, if any.
    pub fn throttle(&self, kind: UpdateKind) -> Option<Duration> {
        self.throttle.get(&kind).copied().filter(|window| !window.is_zero())
    }

    /// Fill in configured default throttles for kinds without one.
    pub(crate) fn with_defaults(mut self, config: &RealtimeConfig) -> Self {
        for kind in UpdateKind::ALL {
            if let (MapEntry::Vacant(entry), Some(window)) =
                (self.throttle.entry(kind), config.default_throttle(kind))
            {
                entry.insert(window);
            }
        }
        self
    }
}

/// An open throttle window. `pending` is delivered when it closes.
#[derive(Debug)]
struct Window {
    closes_at: Instant,
    pending: Update,
}

struct Subscriber {
    id: String,
    handler: Box<dyn UpdateHandler>,
    options: SubscribeOptions,
    windows: BTreeMap<UpdateKind, Window>,
    active: Arc<AtomicBool>,
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("options", &self.options)
            .field("windows", &self.windows)
            .finish_non_exhaustive()
    }
}

impl Subscriber {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn call(&mut self, update: &Update) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.handler.on_update(update)));
        let err = match result {
            Ok(Ok(())) => {
                metrics::inc_updates_delivered(update.kind());
                return;
            }
            Ok(Err(error)) => SubscriberError::Handler { id: self.id.clone(), error },
            Err(payload) => {
                SubscriberError::Panicked { id: self.id.clone(), message: panic_message(&*payload) }
            }
        };
        metrics::inc_subscriber_failures();
        warn!(target: "explorer::realtime::fanout", kind = %update.kind(), %err, "subscriber failed");
    }

    fn offer(&mut self, update: &Update, now: Instant) {
        let kind = update.kind();
        let Some(window) = self.options.throttle(kind) else {
            self.call(update);
            return;
        };
        match self.windows.entry(kind) {
            MapEntry::Occupied(mut open) => open.get_mut().pending = update.clone(),
            MapEntry::Vacant(entry) => {
                let closes_at = deadline(now, window);
                entry.insert(Window { closes_at, pending: update.clone() });
            }
        }
    }

    fn flush(&mut self, now: Instant) {
        let due: Vec<UpdateKind> = self
            .windows
            .iter()
            .filter(|(_, window)| window.closes_at <= now)
            .map(|(kind, _)| *kind)
            .collect();
        for kind in due {
            if !self.is_active() {
                return;
            }
            if let Some(window) = self.windows.remove(&kind) {
                self.call(&window.pending);
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Registered subscribers, keyed by registration token.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    subscribers: BTreeMap<u64, Subscriber>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. A live subscriber with the same id is
    /// replaced. Returns false if the subscriber was already unsubscribed.
    pub(crate) fn register(
        &mut self,
        token: u64,
        id: String,
        handler: Box<dyn UpdateHandler>,
        options: SubscribeOptions,
        active: Arc<AtomicBool>,
    ) -> bool {
        if let Some(old) = self.subscribers.iter().find(|(_, sub)| sub.id == id).map(|(t, _)| *t) {
            trace!(target: "explorer::realtime::fanout", %id, "replacing subscriber");
            self.remove(old);
        }
        if !active.load(Ordering::Acquire) {
            return false;
        }
        self.subscribers
            .insert(token, Subscriber { id, handler, options, windows: BTreeMap::new(), active });
        true
    }

    /// Remove a subscriber. Idempotent.
    pub(crate) fn remove(&mut self, token: u64) -> bool {
        match self.subscribers.remove(&token) {
            Some(sub) => {
                sub.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Remove every subscriber.
    pub(crate) fn clear(&mut self) {
        for (_, sub) in std::mem::take(&mut self.subscribers) {
            sub.active.store(false, Ordering::Release);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.values().filter(|sub| sub.is_active()).count()
    }

    /// Union of the interests of active subscribers.
    pub(crate) fn demanded(&self) -> KindSet {
        self.subscribers
            .values()
            .filter(|sub| sub.is_active())
            .fold(KindSet::EMPTY, |acc, sub| acc.union(sub.options.interest()))
    }

    /// Deliver an update to every interested subscriber, or park it in their
    /// throttle window.
    pub(crate) fn deliver(&mut self, update: &Update, now: Instant) {
        let kind = update.kind();
        for sub in self.subscribers.values_mut() {
            // Checked per subscriber, as earlier handlers may unsubscribe
            // later ones.
            if sub.is_active() && sub.options.interest().contains(kind) {
                sub.offer(update, now);
            }
        }
    }

    /// Deliver throttled updates whose window has closed.
    pub(crate) fn flush_due(&mut self, now: Instant) {
        for sub in self.subscribers.values_mut() {
            if sub.is_active() {
                sub.flush(now);
            }
        }
    }

    /// When the next throttle window closes.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.subscribers
            .values()
            .filter(|sub| sub.is_active())
            .flat_map(|sub| sub.windows.values().map(|window| window.closes_at))
            .min()
    }
}
