//! The matcher orchestrator: owns the pair-to-worker map, routes events,
//! and gates service readiness.
//!
//! One orchestrator per process. It is the only consumer of the event log;
//! workers are the only mutators of their books; the ledger is updated by
//! workers after each book mutation. The status machine is one-way:
//! `Starting -> Working -> Stopping`.

mod snapshots;
mod worker;

pub use snapshots::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore, SnapshotStoreError};
pub use worker::WorkerHandle;

use crate::assets::{Address, AssetPair};
use crate::book::{MarketStatus, TradeExecuted};
use crate::ledger::AddressLedger;
use crate::order::{Order, OrderId, OrderStatus};
use crate::queue::{EventLog, Offset, QueueError, QueueEvent, SequencedEvent};
use crate::rules::{MatchingRules, RuleSchedule};
use crate::settings::MatcherSettings;
use crate::validator::{MarketFlags, ValidationError, Validator};
use crossbeam::atomic::AtomicCell;
use dashmap::DashMap;
use either::Either;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};
use worker::{WorkerDeps, spawn_worker};

/// Capacity of the trade broadcast channel feeding settlement.
const TRADE_CHANNEL_CAP: usize = 4_096;

/// The engine's lifecycle state. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Restoring snapshots and catching up with the log.
    Starting,
    /// Serving requests.
    Working,
    /// Draining; no new requests accepted.
    Stopping,
}

/// Tombstone for a deleted order book.
#[derive(Debug, Clone, Copy)]
pub struct Disabled;

/// Orchestrator-level failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The request arrived outside `Working`.
    #[error("matcher is {status:?}; request refused")]
    NotReady {
        /// The status at the time of the request.
        status: ServiceStatus,
    },

    /// The order failed validation; never written to the log.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The event log failed.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// The snapshot store failed.
    #[error(transparent)]
    Snapshots(#[from] SnapshotStoreError),

    /// A startup gate was not passed in time. Fatal.
    #[error("startup deadline exceeded while {0}")]
    StartupTimeout(&'static str),

    /// The pair's book was deleted; no further orders are accepted for it.
    #[error("order book for {0} is disabled")]
    BookDisabled(AssetPair),
}

/// The matcher orchestrator.
pub struct MatcherOrchestrator {
    settings: Arc<MatcherSettings>,
    log: Arc<dyn EventLog>,
    store: Arc<dyn SnapshotStore>,
    validator: Arc<Validator>,
    ledger: Arc<AddressLedger>,
    rules: Arc<MatchingRules>,
    books: DashMap<AssetPair, Either<WorkerHandle, Disabled>>,
    status: AtomicCell<ServiceStatus>,
    last_processed: AtomicI64,
    processed_tx: watch::Sender<Offset>,
    trades: broadcast::Sender<TradeExecuted>,
}

impl MatcherOrchestrator {
    /// Wire the orchestrator over its collaborators. Call
    /// [`Self::start`] before submitting anything.
    #[must_use]
    pub fn new(
        settings: Arc<MatcherSettings>,
        log: Arc<dyn EventLog>,
        store: Arc<dyn SnapshotStore>,
        validator: Arc<Validator>,
    ) -> Arc<Self> {
        let ledger = Arc::new(AddressLedger::new(settings.order_history_capacity));
        let rules = Arc::new(build_rules(&settings));
        let (trades, _) = broadcast::channel(TRADE_CHANNEL_CAP);
        let (processed_tx, _) = watch::channel(-1);

        let orchestrator = Arc::new(Self {
            settings,
            log: log.clone(),
            store,
            validator,
            ledger: ledger.clone(),
            rules,
            books: DashMap::new(),
            status: AtomicCell::new(ServiceStatus::Starting),
            last_processed: AtomicI64::new(-1),
            processed_tx,
            trades,
        });

        // The ledger's auto-cancel cascade enqueues through the log like
        // any other cancellation; the callback shape keeps the ledger from
        // ever referencing workers.
        ledger.set_cancel_hook(Arc::new(move |pair, order_id, owner| {
            let log = log.clone();
            tokio::spawn(async move {
                if let Err(err) = log
                    .append(QueueEvent::Canceled {
                        pair,
                        order_id,
                        requestor: owner,
                    })
                    .await
                {
                    error!(%pair, order = %order_id, %err, "auto-cancel enqueue failed");
                }
            });
        }));

        orchestrator
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        self.status.load()
    }

    /// The per-address ledger projection.
    #[must_use]
    pub fn ledger(&self) -> &Arc<AddressLedger> {
        &self.ledger
    }

    /// Subscribe to executed trades, for the settlement collaborator.
    /// Trades are emitted once per successful application and keyed by
    /// `(order id, counter id, offset)` for downstream deduplication.
    #[must_use]
    pub fn subscribe_trades(&self) -> broadcast::Receiver<TradeExecuted> {
        self.trades.subscribe()
    }

    /// Restore snapshots, catch up with the log, and go `Working`.
    ///
    /// Takes an owned `Arc` for the consumer task it spawns; callers keep
    /// their own clone: `orchestrator.clone().start().await`.
    ///
    /// # Errors
    ///
    /// [`EngineError::StartupTimeout`] when a startup gate is missed;
    /// store and log failures are fatal here too.
    pub async fn start(self: Arc<Self>) -> Result<(), EngineError> {
        if self.status.load() != ServiceStatus::Starting {
            return Err(EngineError::NotReady {
                status: self.status.load(),
            });
        }

        let restore_deadline = self.settings.snapshots_loading_timeout();
        let restored = tokio::time::timeout(restore_deadline, self.restore_workers())
            .await
            .map_err(|_| EngineError::StartupTimeout("loading snapshots"))??;

        // Replay must reach back to the oldest snapshot so every book sees
        // its missing suffix; the committed marker only helps the remote
        // consumer resume (max semantics are the transport's).
        let start_from = restored.iter().copied().min().unwrap_or(
            self.store.load_committed().await?.unwrap_or(-1),
        ) + 1;
        let end = self.log.end_offset().await?;
        info!(start_from, end, "consuming event log");

        let mut batches = self.log.tail(start_from).await?;
        let consumer = self.clone();
        tokio::spawn(async move {
            while let Some(batch) = batches.recv().await {
                consumer.process_batch(batch).await;
            }
            info!("event consumer finished");
        });

        // Catch-up gate: wait until everything that existed at startup is
        // applied.
        if end >= start_from {
            let mut processed = self.processed_tx.subscribe();
            let catch_up = async {
                while *processed.borrow_and_update() < end {
                    if processed.changed().await.is_err() {
                        break;
                    }
                }
            };
            tokio::time::timeout(self.settings.start_events_processing_timeout(), catch_up)
                .await
                .map_err(|_| EngineError::StartupTimeout("processing the event backlog"))?;
        }

        self.status.store(ServiceStatus::Working);
        info!("matcher is working; downstream schedules released");
        Ok(())
    }

    async fn restore_workers(&self) -> Result<Vec<Offset>, EngineError> {
        let mut pairs = self.store.known_pairs().await?;
        for configured in &self.settings.startup_pairs {
            if let Some(pair) = configured.pair()
                && !pairs.contains(&pair)
            {
                pairs.push(pair);
            }
        }

        let mut offsets = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let snapshot = self.store.load(&pair).await?;
            if let Some(snapshot) = &snapshot {
                offsets.push(snapshot.offset);
            }
            let handle = spawn_worker(pair, snapshot, self.worker_deps());
            self.books.insert(pair, Either::Left(handle));
        }
        Ok(offsets)
    }

    fn worker_deps(&self) -> WorkerDeps {
        WorkerDeps {
            ledger: self.ledger.clone(),
            rules: self.rules.clone(),
            store: self.store.clone(),
            trades: self.trades.clone(),
            snapshots_interval: self.settings.snapshots_interval.max(1),
            admin: self.settings.admin_address,
        }
    }

    async fn process_batch(&self, batch: Vec<SequencedEvent>) {
        let Some(last) = batch.last().map(|e| e.offset) else {
            return;
        };
        for event in batch {
            self.route_event(event).await;
        }
        self.ping_all().await;

        self.last_processed.store(last, Ordering::Release);
        let _ = self.processed_tx.send(last);
        if let Err(err) = self.log.commit(last).await {
            warn!(%err, offset = last, "commit of processed offset failed");
        }
    }

    async fn route_event(&self, event: SequencedEvent) {
        let pair = event.event.pair();
        let is_delete = matches!(event.event, QueueEvent::OrderBookDeleted { .. });

        let handle = {
            let slot = self.books.entry(pair).or_insert_with(|| {
                debug!(%pair, "creating book on demand");
                Either::Left(spawn_worker(pair, None, self.worker_deps()))
            });
            match slot.value() {
                Either::Left(handle) => handle.clone(),
                Either::Right(Disabled) => {
                    warn!(%pair, offset = event.offset, "event for disabled book dropped");
                    return;
                }
            }
        };

        let offset = event.offset;
        match handle.apply(event).await {
            Some(ack) => {
                let deadline = self.settings.process_consumed_timeout();
                match tokio::time::timeout(deadline, ack).await {
                    Ok(Ok(applied)) => debug!(%pair, offset, applied, "event processed"),
                    Ok(Err(_)) | Err(_) => {
                        // The event is committed; the worker either died or
                        // is slow. Processing continues, replay covers us.
                        warn!(%pair, offset, "no processing ack from worker");
                    }
                }
            }
            None => warn!(%pair, offset, "worker channel closed"),
        }

        if is_delete {
            self.books.insert(pair, Either::Right(Disabled));
            if let Err(err) = self.store.remove(&pair).await {
                warn!(%pair, %err, "snapshot removal after book delete failed");
            }
        }
    }

    /// Confirm every worker has applied its share of the last batch.
    async fn ping_all(&self) {
        let handles: Vec<WorkerHandle> = self
            .books
            .iter()
            .filter_map(|slot| slot.value().as_ref().left().cloned())
            .collect();
        if handles.is_empty() {
            return;
        }

        let probe = async {
            for handle in &handles {
                if let Some(ack) = handle.ping().await {
                    let _ = ack.await;
                }
            }
        };
        if tokio::time::timeout(self.settings.ping_all_timeout(), probe)
            .await
            .is_err()
        {
            warn!("ping-all timed out; continuing");
        }
    }

    fn ensure_working(&self) -> Result<(), EngineError> {
        let status = self.status.load();
        if status != ServiceStatus::Working {
            return Err(EngineError::NotReady { status });
        }
        Ok(())
    }

    /// Validate an order and, if admissible, append it to the log.
    ///
    /// Returns the assigned `(offset, timestamp)`; the book mutation
    /// happens asynchronously when the consumer reaches the event.
    pub async fn place_order(&self, order: Order) -> Result<(Offset, u64), EngineError> {
        self.ensure_working()?;
        let pair = order.pair;

        let (market, would_self_trade) = match self.books.get(&pair).map(|s| s.value().clone()) {
            Some(Either::Left(handle)) => {
                let book = handle.book();
                let tick = self
                    .rules
                    .tick_size(&pair, self.last_processed.load(Ordering::Acquire) + 1);
                let quantized =
                    crate::book::quantize_price(order.price, tick, order.side).unwrap_or(order.price);
                (
                    book.market_status(),
                    book.would_self_trade(&order.owner, order.side, quantized),
                )
            }
            Some(Either::Right(Disabled)) => return Err(EngineError::BookDisabled(pair)),
            None => (MarketStatus::default(), false),
        };

        let next_offset = self.last_processed.load(Ordering::Acquire) + 1;
        let tick = self.rules.tick_size(&pair, next_offset);
        self.validator.validate_sync(
            &order,
            &market,
            tick,
            crate::utils::current_time_millis(),
            would_self_trade,
        )?;

        let async_checks = self.validator.validate_async(&order, &self.ledger);
        tokio::time::timeout(self.settings.validation_timeout(), async_checks)
            .await
            .map_err(|_| {
                EngineError::Validation(ValidationError::ChainUnavailable(
                    "validation timed out".to_string(),
                ))
            })??;

        Ok(self.log.append(QueueEvent::Placed(order)).await?)
    }

    /// Append a cancellation request for a resting order.
    pub async fn cancel_order(
        &self,
        pair: AssetPair,
        order_id: OrderId,
        requestor: Address,
    ) -> Result<(Offset, u64), EngineError> {
        self.ensure_working()?;
        if self
            .validator
            .market_flags(&pair)
            .contains(MarketFlags::CANCELLING_DISABLED)
        {
            return Err(EngineError::Validation(ValidationError::MarketStatusMismatch));
        }
        Ok(self
            .log
            .append(QueueEvent::Canceled {
                pair,
                order_id,
                requestor,
            })
            .await?)
    }

    /// Append a book deletion. All resting orders are auto-cancelled when
    /// the event is applied.
    pub async fn delete_order_book(&self, pair: AssetPair) -> Result<(Offset, u64), EngineError> {
        self.ensure_working()?;
        Ok(self.log.append(QueueEvent::OrderBookDeleted { pair }).await?)
    }

    /// Best bid/ask and last trade for `pair`.
    #[must_use]
    pub fn market_status(&self, pair: &AssetPair) -> MarketStatus {
        match self.books.get(pair).map(|s| s.value().clone()) {
            Some(Either::Left(handle)) => handle.book().market_status(),
            _ => MarketStatus::default(),
        }
    }

    /// The engine's view of an order, combining the live book with the
    /// ledger's history.
    #[must_use]
    pub fn order_status(&self, pair: &AssetPair, owner: &Address, order_id: &OrderId) -> OrderStatus {
        if let Some(Either::Left(handle)) = self.books.get(pair).map(|s| s.value().clone()) {
            let status = handle.book().status_of(order_id);
            if status != OrderStatus::NotFound {
                return status;
            }
        }
        self.ledger.order_status(owner, order_id)
    }

    /// The highest offset every routed worker has acknowledged.
    #[must_use]
    pub fn last_processed_offset(&self) -> Offset {
        self.last_processed.load(Ordering::Acquire)
    }

    /// Drain and stop: refuse new requests, close the log, snapshot every
    /// book.
    ///
    /// Workers that miss the graceful deadline are abandoned; the next
    /// startup replays from their last good snapshot.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        let before = self.status.swap(ServiceStatus::Stopping);
        if before == ServiceStatus::Stopping {
            return Ok(());
        }
        info!("matcher stopping");

        self.log.close().await?;

        let handles: Vec<WorkerHandle> = self
            .books
            .iter()
            .filter_map(|slot| slot.value().as_ref().left().cloned())
            .collect();
        let drain = async {
            for handle in handles {
                if let Some(done) = handle.stop().await {
                    let _ = done.await;
                }
            }
        };
        if tokio::time::timeout(self.settings.graceful_stop_timeout(), drain)
            .await
            .is_err()
        {
            warn!("graceful stop deadline exceeded; final snapshots incomplete");
        }

        self.store
            .save_committed(self.last_processed.load(Ordering::Acquire))
            .await?;
        info!("matcher stopped");
        Ok(())
    }
}

fn build_rules(settings: &MatcherSettings) -> MatchingRules {
    let mut schedules = HashMap::new();
    for configured in &settings.matching_rules {
        let Some(pair) = configured.pair() else {
            warn!("ignoring matching rules for a degenerate pair");
            continue;
        };
        schedules.insert(pair, RuleSchedule::new(configured.rules.clone()));
    }
    MatchingRules::new(schedules)
}
