//! The per-pair book worker: a single task owning one order book.
//!
//! The worker is the only mutator of its book. Events arrive over a
//! channel paired with an ack; each is applied synchronously (no await
//! while the book is mid-mutation), then the worker yields. Snapshots are
//! taken between events, every `snapshots_interval` applications and at
//! shutdown, persisting `last_applied_offset` atomically with the book
//! state.

use super::snapshots::SnapshotStore;
use crate::assets::{Address, AssetPair};
use crate::book::{BookError, BookSnapshot, OrderBook, TradeExecuted};
use crate::ledger::AddressLedger;
use crate::queue::{Offset, QueueEvent, SequencedEvent};
use crate::rules::MatchingRules;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Capacity of a worker's event channel.
const WORKER_QUEUE_CAP: usize = 512;

pub(crate) enum WorkerMsg {
    /// Apply one sequenced event; reply with the worker's
    /// `last_applied_offset` afterwards.
    Apply(SequencedEvent, oneshot::Sender<Offset>),
    /// Liveness probe; reply with `last_applied_offset`.
    Ping(oneshot::Sender<Offset>),
    /// Final snapshot and terminate.
    Stop(oneshot::Sender<()>),
}

/// Handle to a running book worker.
#[derive(Clone)]
pub struct WorkerHandle {
    pair: AssetPair,
    tx: mpsc::Sender<WorkerMsg>,
    book: Arc<OrderBook>,
}

impl WorkerHandle {
    /// The pair this worker owns.
    #[must_use]
    pub fn pair(&self) -> AssetPair {
        self.pair
    }

    /// Read-only access to the worker's book. The worker remains the only
    /// mutator; this is for market-status and validation reads.
    #[must_use]
    pub fn book(&self) -> &Arc<OrderBook> {
        &self.book
    }

    pub(crate) async fn apply(&self, event: SequencedEvent) -> Option<oneshot::Receiver<Offset>> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send(WorkerMsg::Apply(event, ack_tx)).await.ok()?;
        Some(ack_rx)
    }

    pub(crate) async fn ping(&self) -> Option<oneshot::Receiver<Offset>> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send(WorkerMsg::Ping(ack_tx)).await.ok()?;
        Some(ack_rx)
    }

    pub(crate) async fn stop(&self) -> Option<oneshot::Receiver<()>> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx.send(WorkerMsg::Stop(ack_tx)).await.ok()?;
        Some(ack_rx)
    }
}

pub(crate) struct WorkerDeps {
    pub ledger: Arc<AddressLedger>,
    pub rules: Arc<MatchingRules>,
    pub store: Arc<dyn SnapshotStore>,
    pub trades: broadcast::Sender<TradeExecuted>,
    pub snapshots_interval: u64,
    pub admin: Option<Address>,
}

/// Spawn a worker for `pair`, restoring from `snapshot` when given.
pub(crate) fn spawn_worker(
    pair: AssetPair,
    snapshot: Option<BookSnapshot>,
    deps: WorkerDeps,
) -> WorkerHandle {
    let (last_applied, book) = match &snapshot {
        Some(snapshot) => (snapshot.offset, Arc::new(OrderBook::restore(snapshot))),
        None => (-1, Arc::new(OrderBook::new(pair))),
    };
    info!(%pair, restored_offset = last_applied, "book worker starting");

    let (tx, mut rx) = mpsc::channel(WORKER_QUEUE_CAP);
    let handle = WorkerHandle {
        pair,
        tx,
        book: book.clone(),
    };

    tokio::spawn(async move {
        let mut worker = BookWorker {
            pair,
            book,
            deps,
            last_applied,
            events_since_snapshot: 0,
        };
        while let Some(msg) = rx.recv().await {
            match msg {
                WorkerMsg::Apply(event, ack) => {
                    worker.apply(event).await;
                    let _ = ack.send(worker.last_applied);
                }
                WorkerMsg::Ping(ack) => {
                    let _ = ack.send(worker.last_applied);
                }
                WorkerMsg::Stop(ack) => {
                    worker.final_snapshot().await;
                    let _ = ack.send(());
                    break;
                }
            }
        }
        info!(%pair, "book worker stopped");
    });

    handle
}

struct BookWorker {
    pair: AssetPair,
    book: Arc<OrderBook>,
    deps: WorkerDeps,
    last_applied: Offset,
    events_since_snapshot: u64,
}

impl BookWorker {
    async fn apply(&mut self, event: SequencedEvent) {
        // At-least-once delivery: everything at or below the restored
        // offset was already applied before the snapshot was taken.
        if event.offset <= self.last_applied {
            debug!(pair = %self.pair, offset = event.offset, "skipping replayed event");
            return;
        }

        // The book mutation below is synchronous; the only awaits in this
        // worker happen after the book is at rest.
        match event.event {
            QueueEvent::Placed(ref order) => self.apply_placed(order, &event),
            QueueEvent::Canceled {
                order_id,
                requestor,
                ..
            } => self.apply_cancel(order_id, requestor, &event),
            QueueEvent::OrderBookDeleted { .. } => self.apply_delete(&event),
        }

        self.last_applied = event.offset;
        self.events_since_snapshot += 1;
        if self.events_since_snapshot >= self.deps.snapshots_interval {
            self.persist_snapshot().await;
        }
    }

    fn apply_placed(&self, order: &crate::order::Order, event: &SequencedEvent) {
        if order.pair != self.pair {
            warn!(pair = %self.pair, got = %order.pair, "misrouted order skipped");
            return;
        }
        let tick = self.deps.rules.tick_size(&self.pair, event.offset);
        match self
            .book
            .apply_placed(order, event.offset, event.timestamp, tick)
        {
            Ok(outcome) => {
                self.deps.ledger.order_added(order, event.offset);
                for trade in &outcome.trades {
                    self.deps.ledger.trade_executed(trade);
                    // Settlement runs downstream; a send with no receiver
                    // just means nobody subscribed yet.
                    let _ = self.deps.trades.send(*trade);
                }
            }
            Err(err) => {
                // The event is committed; re-application would fail the
                // same way. Log and move on.
                warn!(pair = %self.pair, offset = event.offset, %err, "placed event rejected");
            }
        }
    }

    fn apply_cancel(
        &self,
        order_id: crate::order::OrderId,
        requestor: Address,
        event: &SequencedEvent,
    ) {
        match self
            .book
            .apply_cancel(&order_id, &requestor, self.deps.admin.as_ref())
        {
            Ok(outcome) => {
                self.deps
                    .ledger
                    .order_canceled(&outcome.owner, order_id, event.offset);
            }
            Err(BookError::AlreadyTerminal { .. }) => {
                // Cancel idempotence: the second cancel changes nothing.
                debug!(pair = %self.pair, order = %order_id, "cancel of terminal order ignored");
            }
            Err(err) => {
                warn!(pair = %self.pair, order = %order_id, %err, "cancel rejected");
            }
        }
    }

    fn apply_delete(&self, event: &SequencedEvent) {
        for outcome in self.book.apply_delete() {
            self.deps
                .ledger
                .order_canceled(&outcome.owner, outcome.order_id, event.offset);
        }
    }

    async fn persist_snapshot(&mut self) {
        let snapshot = self.book.snapshot(self.last_applied);
        match self.deps.store.save(&snapshot).await {
            Ok(()) => self.events_since_snapshot = 0,
            Err(err) => {
                // Keep the counter so the next event retries the save.
                error!(pair = %self.pair, %err, "snapshot persistence failed");
            }
        }
    }

    async fn final_snapshot(&mut self) {
        if self.last_applied >= 0 {
            self.persist_snapshot().await;
        }
    }
}
