//! Realtime updates and their payloads.

use crate::{ConnectionStatus, UpdateKind};
use alloy::{
    primitives::{Address, B256, TxHash},
    rpc::types::Header,
    serde::OtherFields,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Mempool counters, as reported by `txpool_status` or a mempool
/// subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolStats {
    /// Transactions ready for inclusion.
    #[serde(with = "alloy::serde::quantity")]
    pub pending: u64,
    /// Transactions waiting on a nonce gap or fee.
    #[serde(with = "alloy::serde::quantity")]
    pub queued: u64,
}

impl MempoolStats {
    /// Total number of transactions in the pool.
    pub const fn total(&self) -> u64 {
        self.pending.saturating_add(self.queued)
    }
}

/// A record from the node's scheduled-transaction pool.
///
/// Only `hash` is required. The well-known fields are typed; anything else
/// the node sends is kept in [`ScheduledTransaction::other`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTransaction {
    /// Transaction hash. Used as the cache key.
    pub hash: TxHash,
    /// Sender.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    /// Recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,
    /// Block at which the transaction becomes executable.
    #[serde(default, with = "alloy::serde::quantity::opt", skip_serializing_if = "Option::is_none")]
    pub execute_at: Option<u64>,
    /// Status string reported by the node (e.g. `scheduled`, `executed`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Remaining fields.
    #[serde(flatten)]
    pub other: OtherFields,
}

/// Gas price at a given block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPrice {
    /// Gas price in wei.
    #[serde(with = "alloy::serde::quantity")]
    pub gas_price: u128,
    /// Block the price was observed at.
    #[serde(with = "alloy::serde::quantity")]
    pub block_number: u64,
}

/// One realtime update. Immutable once built; cloning is cheap.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// A new block header.
    NewBlock(Arc<Header>),
    /// A newly seen pending transaction.
    NewPendingTransaction(TxHash),
    /// A mempool counter snapshot.
    MempoolUpdate(MempoolStats),
    /// A scheduled-transaction record.
    ScheduledUpdate(Arc<ScheduledTransaction>),
    /// A gas price observation.
    GasPriceUpdate(GasPrice),
    /// The manager's connection status changed.
    ConnectionStatus(ConnectionStatus),
}

impl Update {
    /// The kind of this update.
    pub const fn kind(&self) -> UpdateKind {
        match self {
            Self::NewBlock(_) => UpdateKind::NewBlock,
            Self::NewPendingTransaction(_) => UpdateKind::NewPendingTransaction,
            Self::MempoolUpdate(_) => UpdateKind::MempoolUpdate,
            Self::ScheduledUpdate(_) => UpdateKind::ScheduledUpdate,
            Self::GasPriceUpdate(_) => UpdateKind::GasPriceUpdate,
            Self::ConnectionStatus(_) => UpdateKind::ConnectionStatus,
        }
    }

    /// The block number this update refers to, if any.
    pub fn block_number(&self) -> Option<u64> {
        match self {
            Self::NewBlock(header) => Some(header.inner.number),
            Self::GasPriceUpdate(price) => Some(price.block_number),
            Self::ScheduledUpdate(tx) => tx.execute_at,
            _ => None,
        }
    }

    /// The block hash or transaction hash identifying this update, if any.
    pub fn key(&self) -> Option<B256> {
        match self {
            Self::NewBlock(header) => Some(header.hash),
            Self::NewPendingTransaction(hash) => Some(*hash),
            Self::ScheduledUpdate(tx) => Some(tx.hash),
            _ => None,
        }
    }

    /// Fallible cast to a block header.
    pub fn as_block(&self) -> Option<&Header> {
        match self {
            Self::NewBlock(header) => Some(header.as_ref()),
            _ => None,
        }
    }

    /// Fallible cast to mempool stats.
    pub const fn as_mempool(&self) -> Option<&MempoolStats> {
        match self {
            Self::MempoolUpdate(stats) => Some(stats),
            _ => None,
        }
    }

    /// Fallible cast to a connection status.
    pub const fn as_status(&self) -> Option<&ConnectionStatus> {
        match self {
            Self::ConnectionStatus(status) => Some(status),
            _ => None,
        }
    }
}

impl From<Header> for Update {
    fn from(header: Header) -> Self {
        Self::NewBlock(Arc::new(header))
    }
}

impl From<MempoolStats> for Update {
    fn from(stats: MempoolStats) -> Self {
        Self::MempoolUpdate(stats)
    }
}

impl From<ScheduledTransaction> for Update {
    fn from(tx: ScheduledTransaction) -> Self {
        Self::ScheduledUpdate(Arc::new(tx))
    }
}

impl From<GasPrice> for Update {
    fn from(price: GasPrice) -> Self {
        Self::GasPriceUpdate(price)
    }
}

impl From<ConnectionStatus> for Update {
    fn from(status: ConnectionStatus) -> Self {
        Self::ConnectionStatus(status)
    }
}
