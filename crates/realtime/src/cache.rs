//! Bounded caches of recent upstream state.

use alloy::primitives::TxHash;
use explorer_realtime_config::RealtimeConfig;
use explorer_realtime_types::{GasPrice, Header, MempoolStats, ScheduledTransaction, Update};
use std::{collections::VecDeque, sync::Arc};
use tokio::sync::watch;
use tracing::trace;

/// Fixed-capacity buffer, newest first. Pushing past capacity evicts the
/// oldest item.
#[derive(Debug, Clone)]
pub(crate) struct RecentBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RecentBuffer<T> {
    /// Create a buffer. Capacity is at least 1.
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { items: VecDeque::with_capacity(capacity), capacity }
    }

    pub(crate) fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub(crate) fn push_front(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_back();
        }
        self.items.push_front(item);
    }

    pub(crate) fn replace_front(&mut self, item: T) {
        match self.items.front_mut() {
            Some(front) => *front = item,
            None => self.items.push_front(item),
        }
    }

    pub(crate) fn position(&self, f: impl FnMut(&T) -> bool) -> Option<usize> {
        self.items.iter().position(f)
    }

    pub(crate) fn remove(&mut self, index: usize) -> Option<T> {
        self.items.remove(index)
    }

    pub(crate) fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }
}

impl<T: Clone> RecentBuffer<T> {
    fn to_shared(&self) -> Arc<[T]> {
        self.items.iter().cloned().collect()
    }
}

/// An immutable view of the caches. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    blocks: Arc<[Arc<Header>]>,
    pending: Arc<[TxHash]>,
    scheduled: Arc<[Arc<ScheduledTransaction>]>,
    mempool: Option<MempoolStats>,
    gas_price: Option<GasPrice>,
}

impl Default for CacheSnapshot {
    fn default() -> Self {
        Self {
            blocks: Arc::from(Vec::new()),
            pending: Arc::from(Vec::new()),
            scheduled: Arc::from(Vec::new()),
            mempool: None,
            gas_price: None,
        }
    }
}

impl CacheSnapshot {
    /// Recent block headers, newest first.
    pub fn blocks(&self) -> &Arc<[Arc<Header>]> {
        &self.blocks
    }

    /// The newest block header.
    pub fn latest_block(&self) -> Option<&Arc<Header>> {
        self.blocks.first()
    }

    /// Recent pending transaction hashes, newest first.
    pub fn pending_transactions(&self) -> &Arc<[TxHash]> {
        &self.pending
    }

    /// Recent scheduled transactions, newest first.
    pub fn scheduled_transactions(&self) -> &Arc<[Arc<ScheduledTransaction>]> {
        &self.scheduled
    }

    /// The latest mempool counters.
    pub const fn mempool_stats(&self) -> Option<MempoolStats> {
        self.mempool
    }

    /// The latest gas price.
    pub const fn gas_price(&self) -> Option<GasPrice> {
        self.gas_price
    }
}

/// The manager's caches. Mutated only by the manager task; readers observe
/// [`CacheSnapshot`]s through a watch channel. Singleton kinds live only in
/// the snapshot.
#[derive(Debug)]
pub(crate) struct StateCache {
    blocks: RecentBuffer<Arc<Header>>,
    pending: RecentBuffer<TxHash>,
    scheduled: RecentBuffer<Arc<ScheduledTransaction>>,
    snapshot: watch::Sender<CacheSnapshot>,
}

impl StateCache {
    pub(crate) fn new(config: &RealtimeConfig) -> Self {
        Self {
            blocks: RecentBuffer::new(config.block_cache_size()),
            pending: RecentBuffer::new(config.pending_cache_size()),
            scheduled: RecentBuffer::new(config.scheduled_cache_size()),
            snapshot: watch::Sender::new(CacheSnapshot::default()),
        }
    }

    /// Watch published snapshots.
    pub(crate) fn subscribe(&self) -> watch::Receiver<CacheSnapshot> {
        self.snapshot.subscribe()
    }

    /// Insert an update. Returns `false` if it was stale or a duplicate, in
    /// which case it must not be delivered.
    pub(crate) fn insert(&mut self, update: &Update) -> bool {
        let accepted = match update {
            Update::NewBlock(header) => self.insert_block(header),
            Update::NewPendingTransaction(hash) => self.insert_pending(*hash),
            Update::ScheduledUpdate(tx) => self.insert_scheduled(tx),
            Update::MempoolUpdate(stats) => {
                self.snapshot.send_modify(|snap| snap.mempool = Some(*stats));
                true
            }
            Update::GasPriceUpdate(price) => {
                self.snapshot.send_modify(|snap| snap.gas_price = Some(*price));
                true
            }
            Update::ConnectionStatus(_) => true,
        };
        if !accepted {
            trace!(target: "explorer::realtime::cache", kind = %update.kind(), "stale update");
        }
        accepted
    }

    fn insert_block(&mut self, header: &Arc<Header>) -> bool {
        let head = self.blocks.front().map(|head| (head.inner.number, head.hash));
        match head {
            Some((number, _)) if header.inner.number < number => return false,
            Some((number, hash)) if header.inner.number == number => {
                if header.hash == hash {
                    return false;
                }
                self.blocks.replace_front(header.clone());
            }
            _ => self.blocks.push_front(header.clone()),
        }
        let blocks = self.blocks.to_shared();
        self.snapshot.send_modify(|snap| snap.blocks = blocks);
        true
    }

    fn insert_pending(&mut self, hash: TxHash) -> bool {
        if self.pending.position(|h| *h == hash).is_some() {
            return false;
        }
        self.pending.push_front(hash);
        let pending = self.pending.to_shared();
        self.snapshot.send_modify(|snap| snap.pending = pending);
        true
    }

    fn insert_scheduled(&mut self, tx: &Arc<ScheduledTransaction>) -> bool {
        if let Some(index) = self.scheduled.position(|cached| cached.hash == tx.hash) {
            if self.scheduled.get(index).is_some_and(|cached| **cached == **tx) {
                return false;
            }
            self.scheduled.remove(index);
        }
        self.scheduled.push_front(tx.clone());
        let scheduled = self.scheduled.to_shared();
        self.snapshot.send_modify(|snap| snap.scheduled = scheduled);
        true
    }
}
