use crate::{RefreshError, RefreshResult, metrics, rpc::RpcClient};
use explorer_realtime_types::{KindSet, UpdateKind};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// A finished fetch.
#[derive(Debug)]
pub(crate) struct RefreshDone {
    pub(crate) kind: UpdateKind,
    pub(crate) result: RefreshResult,
}

/// Coalesces one-shot fetches: at most one request per kind is in flight,
/// and every caller waiting on that kind receives its result.
#[derive(Debug)]
pub(crate) struct RefreshTracker {
    client: RpcClient,
    in_flight: KindSet,
    waiters: HashMap<UpdateKind, Vec<oneshot::Sender<RefreshResult>>>,
    done_tx: mpsc::UnboundedSender<RefreshDone>,
    done: mpsc::UnboundedReceiver<RefreshDone>,
}

impl RefreshTracker {
    pub(crate) fn new(client: RpcClient) -> Self {
        let (done_tx, done) = mpsc::unbounded_channel();
        Self { client, in_flight: KindSet::EMPTY, waiters: HashMap::new(), done_tx, done }
    }

    /// Request a fetch of `kind`. Joins the in-flight fetch if there is
    /// one.
    pub(crate) fn request(&mut self, kind: UpdateKind, waiter: Option<oneshot::Sender<RefreshResult>>) {
        if !kind.is_refreshable() {
            if let Some(waiter) = waiter {
                let _ = waiter.send(Err(RefreshError::Unsupported(kind)));
            }
            return;
        }

        if let Some(waiter) = waiter {
            self.waiters.entry(kind).or_default().push(waiter);
        }

        if !self.in_flight.insert(kind) {
            debug!(target: "explorer::realtime::refresh", %kind, "joining in-flight refresh");
            return;
        }

        metrics::inc_refreshes(kind);
        let client = self.client.clone();
        let done = self.done_tx.clone();
        tokio::spawn(async move {
            let result = client.fetch(kind).await;
            let _ = done.send(RefreshDone { kind, result });
        });
    }

    /// Wait for the next finished fetch. Cancel safe.
    pub(crate) async fn next_done(&mut self) -> Option<RefreshDone> {
        self.done.recv().await
    }

    /// Mark a fetch finished, and take its waiters.
    pub(crate) fn finish(&mut self, kind: UpdateKind) -> Vec<oneshot::Sender<RefreshResult>> {
        self.in_flight.remove(kind);
        self.waiters.remove(&kind).unwrap_or_default()
    }

    /// Drop every waiter. They observe [`RefreshError::Stopped`].
    pub(crate) fn close(&mut self) {
        self.waiters.clear();
        self.in_flight = KindSet::EMPTY;
        self.done.close();
    }
}
