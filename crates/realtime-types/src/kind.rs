//! Logical subscription kinds and interest sets.

use core::fmt;

/// The different kinds of realtime updates a subscriber can be interested
/// in.
///
/// The first five are logical subscriptions backed by an `eth_subscribe`
/// topic on the upstream node. [`UpdateKind::ConnectionStatus`] is synthetic:
/// the manager emits it on every connection state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UpdateKind {
    /// New block headers.
    NewBlock,
    /// Hashes of newly seen pending transactions.
    NewPendingTransaction,
    /// Mempool counter snapshots.
    MempoolUpdate,
    /// Scheduled-transaction pool updates.
    ScheduledUpdate,
    /// Gas price updates.
    GasPriceUpdate,
    /// Synthetic connection status updates.
    ConnectionStatus,
}

impl UpdateKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::NewBlock,
        Self::NewPendingTransaction,
        Self::MempoolUpdate,
        Self::ScheduledUpdate,
        Self::GasPriceUpdate,
        Self::ConnectionStatus,
    ];

    /// The kinds backed by an upstream subscription.
    pub const SUBSCRIBABLE: [Self; 5] = [
        Self::NewBlock,
        Self::NewPendingTransaction,
        Self::MempoolUpdate,
        Self::ScheduledUpdate,
        Self::GasPriceUpdate,
    ];

    /// The `eth_subscribe` topic for this kind, if it has one.
    pub const fn topic(&self) -> Option<&'static str> {
        match self {
            Self::NewBlock => Some("newHeads"),
            Self::NewPendingTransaction => Some("newPendingTransactions"),
            Self::MempoolUpdate => Some("mempoolStatus"),
            Self::ScheduledUpdate => Some("scheduledTransactions"),
            Self::GasPriceUpdate => Some("gasPrice"),
            Self::ConnectionStatus => None,
        }
    }

    /// True if this kind is backed by an upstream subscription.
    pub const fn is_subscribable(&self) -> bool {
        self.topic().is_some()
    }

    /// True if this kind can be fetched with a one-shot HTTP call.
    pub const fn is_refreshable(&self) -> bool {
        matches!(
            self,
            Self::NewBlock | Self::MempoolUpdate | Self::ScheduledUpdate | Self::GasPriceUpdate
        )
    }

    const fn bit(&self) -> u8 {
        1 << (*self as u8)
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NewBlock => "new_block",
            Self::NewPendingTransaction => "new_pending_transaction",
            Self::MempoolUpdate => "mempool_update",
            Self::ScheduledUpdate => "scheduled_update",
            Self::GasPriceUpdate => "gas_price_update",
            Self::ConnectionStatus => "connection_status",
        };
        f.write_str(s)
    }
}

/// A set of [`UpdateKind`]s, used as a subscriber interest filter.
///
/// ```
/// use explorer_realtime_types::{KindSet, UpdateKind};
///
/// let set: KindSet = [UpdateKind::NewBlock, UpdateKind::GasPriceUpdate].into_iter().collect();
/// assert!(set.contains(UpdateKind::NewBlock));
/// assert!(!set.contains(UpdateKind::MempoolUpdate));
/// assert_eq!(set.len(), 2);
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct KindSet(u8);

impl KindSet {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Every kind, including [`UpdateKind::ConnectionStatus`].
    pub const ALL: Self = Self(0b11_1111);

    /// The set containing only `kind`.
    pub const fn only(kind: UpdateKind) -> Self {
        Self(kind.bit())
    }

    /// Add a kind to the set.
    pub const fn with(self, kind: UpdateKind) -> Self {
        Self(self.0 | kind.bit())
    }

    /// Insert a kind. Returns true if it was not already present.
    pub const fn insert(&mut self, kind: UpdateKind) -> bool {
        let had = self.contains(kind);
        self.0 |= kind.bit();
        !had
    }

    /// Remove a kind. Returns true if it was present.
    pub const fn remove(&mut self, kind: UpdateKind) -> bool {
        let had = self.contains(kind);
        self.0 &= !kind.bit();
        had
    }

    /// True if the set contains `kind`.
    pub const fn contains(&self, kind: UpdateKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Union of two sets.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// True if the set is empty.
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Number of kinds in the set.
    pub const fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterate over the kinds in the set, in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = UpdateKind> + '_ {
        UpdateKind::ALL.into_iter().filter(|kind| self.contains(*kind))
    }
}

impl fmt::Debug for KindSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl From<UpdateKind> for KindSet {
    fn from(kind: UpdateKind) -> Self {
        Self::only(kind)
    }
}

impl FromIterator<UpdateKind> for KindSet {
    fn from_iter<T: IntoIterator<Item = UpdateKind>>(iter: T) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl Extend<UpdateKind> for KindSet {
    fn extend<T: IntoIterator<Item = UpdateKind>>(&mut self, iter: T) {
        for kind in iter {
            self.insert(kind);
        }
    }
}
