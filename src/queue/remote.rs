//! Distributed event log: a backpressured producer and a batching consumer
//! layered over a single-partition [`Broker`] transport.
//!
//! The broker itself (a Kafka-like service) lives outside this crate; only
//! its contract is real here. The layers around it are not: the producer is
//! a bounded buffered queue that sheds load to the caller when full and
//! retries transient publish failures with bounded exponential backoff, and
//! the consumer polls in batches on a 10 ms window, resuming from the last
//! committed offset across restarts.

use super::{EventBatch, EventLog, Offset, QueueError, QueueEvent, SequencedEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc, oneshot};
use tracing::{error, info, warn};

/// The single-partition transport contract.
///
/// Offsets are assigned by the broker, monotonic and gap-free within the
/// partition. `key` is the sharding key (the pair bytes); a single
/// partition means it only matters to the broker's bookkeeping.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish a payload; resolves with the assigned `(offset, timestamp)`
    /// once the broker acknowledged it. Failed publishes must not leave
    /// phantom offsets visible to consumers.
    async fn publish(&self, key: Vec<u8>, payload: Vec<u8>) -> Result<(Offset, u64), QueueError>;

    /// Fetch up to `max` records starting at `from` (inclusive), in offset
    /// order. An empty result means the consumer caught up.
    async fn fetch(
        &self,
        from: Offset,
        max: usize,
    ) -> Result<Vec<(Offset, u64, Vec<u8>)>, QueueError>;

    /// The offset of the last record, `-1` when the partition is empty.
    async fn end_offset(&self) -> Result<Offset, QueueError>;
}

/// Bounded exponential backoff with jitter for transient transport errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// First retry delay.
    pub min_backoff: Duration,
    /// Upper bound on the delay.
    pub max_backoff: Duration,
    /// Multiplicative jitter, e.g. `0.2` for ±20 %.
    pub random_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(10),
            random_factor: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .min_backoff
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(self.max_backoff);
        let jitter = 1.0 + rand::thread_rng().gen_range(-self.random_factor..=self.random_factor);
        base.mul_f64(jitter.max(0.0))
    }
}

/// Producer-side tuning.
#[derive(Debug, Clone, Copy)]
pub struct ProducerSettings {
    /// Capacity of the buffered queue; a full buffer rejects the append
    /// with [`QueueError::CapacityExceeded`].
    pub buffer_capacity: usize,
    /// Retry policy for transient publish failures.
    pub retry: RetryPolicy,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            retry: RetryPolicy::default(),
        }
    }
}

/// The consumer's batching window.
const CONSUME_WINDOW: Duration = Duration::from_millis(10);

type PendingAppend = (QueueEvent, oneshot::Sender<Result<(Offset, u64), QueueError>>);

/// The distributed event log implementation.
pub struct RemoteEventLog {
    broker: Arc<dyn Broker>,
    producer_tx: mpsc::Sender<PendingAppend>,
    committed: AtomicI64,
    consumer_batch_size: usize,
    closed: Arc<AtomicBool>,
}

impl RemoteEventLog {
    /// Start the producer loop over `broker`.
    ///
    /// `start_offset` is the durable `last_processed_offset` loaded by the
    /// host; consumption resumes from `max(start_offset, committed) + 1`.
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        producer: ProducerSettings,
        consumer_batch_size: usize,
        start_offset: Offset,
    ) -> Self {
        let (producer_tx, mut producer_rx) = mpsc::channel::<PendingAppend>(producer.buffer_capacity);
        let closed = Arc::new(AtomicBool::new(false));

        let producer_broker = broker.clone();
        let retry = producer.retry;
        let producer_closed = closed.clone();
        tokio::spawn(async move {
            while let Some((event, ack)) = producer_rx.recv().await {
                if producer_closed.load(Ordering::Acquire) {
                    let _ = ack.send(Err(QueueError::Closed));
                    continue;
                }
                let key = event.shard_key();
                let payload = event.to_bytes();
                let mut attempt = 0u32;
                let result = loop {
                    match producer_broker.publish(key.clone(), payload.clone()).await {
                        Ok(assigned) => break Ok(assigned),
                        Err(QueueError::Transient(reason)) => {
                            let delay = retry.delay(attempt);
                            warn!(%reason, attempt, ?delay, "transient publish failure, backing off");
                            attempt = attempt.saturating_add(1);
                            tokio::time::sleep(delay).await;
                        }
                        Err(other) => break Err(other),
                    }
                };
                let _ = ack.send(result);
            }
        });

        Self {
            broker,
            producer_tx,
            committed: AtomicI64::new(start_offset),
            consumer_batch_size,
            closed,
        }
    }
}

#[async_trait]
impl EventLog for RemoteEventLog {
    async fn append(&self, event: QueueEvent) -> Result<(Offset, u64), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.producer_tx
            .try_send((event, ack_tx))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => QueueError::CapacityExceeded,
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
            })?;
        ack_rx.await.map_err(|_| QueueError::Closed)?
    }

    async fn tail(&self, from_offset: Offset) -> Result<mpsc::Receiver<EventBatch>, QueueError> {
        let (tx, rx) = mpsc::channel(16);
        let broker = self.broker.clone();
        let closed = self.closed.clone();
        let batch_size = self.consumer_batch_size;
        let retry = RetryPolicy::default();
        let mut next = from_offset.max(self.committed.load(Ordering::Acquire) + 1).max(0);

        tokio::spawn(async move {
            let mut attempt = 0u32;
            loop {
                if closed.load(Ordering::Acquire) {
                    break;
                }
                let records = match broker.fetch(next, batch_size).await {
                    Ok(records) => {
                        attempt = 0;
                        records
                    }
                    Err(QueueError::Transient(reason)) => {
                        let delay = retry.delay(attempt);
                        warn!(%reason, attempt, ?delay, "transient fetch failure, backing off");
                        attempt = attempt.saturating_add(1);
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    Err(err) => {
                        error!(%err, "event consumer failed");
                        break;
                    }
                };
                if records.is_empty() {
                    tokio::time::sleep(CONSUME_WINDOW).await;
                    continue;
                }
                if records[0].0 < next {
                    // A broker restart handed back offsets we already
                    // consumed past. Replaying them would fork history.
                    error!(
                        consumed = next - 1,
                        found = records[0].0,
                        "log offset rewind detected, stopping consumer"
                    );
                    break;
                }

                let mut batch = Vec::with_capacity(records.len());
                let mut poisoned = false;
                for (offset, timestamp, payload) in records {
                    match QueueEvent::from_bytes(&payload) {
                        Ok(event) => batch.push(SequencedEvent {
                            offset,
                            timestamp,
                            event,
                        }),
                        Err(err) => {
                            // The entry is committed and will decode the
                            // same way forever; skip it rather than stall
                            // the partition.
                            error!(offset, %err, "skipping undecodable event");
                            next = next.max(offset + 1);
                            poisoned = true;
                        }
                    }
                }
                if let Some(last) = batch.last() {
                    next = last.offset + 1;
                } else if !poisoned {
                    continue;
                }
                if !batch.is_empty() && tx.send(batch).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn end_offset(&self) -> Result<Offset, QueueError> {
        self.broker.end_offset().await
    }

    async fn commit(&self, offset: Offset) -> Result<(), QueueError> {
        self.committed.fetch_max(offset, Ordering::AcqRel);
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::Release);
        info!("remote event log closed");
        Ok(())
    }
}

/// A process-local broker for tests and single-node setups: the same
/// contract, no network.
#[derive(Default)]
pub struct InMemoryBroker {
    records: Mutex<Vec<(u64, Vec<u8>, Vec<u8>)>>,
    notify: Notify,
    /// Number of upcoming publishes to fail with a transient error.
    transient_failures: AtomicU32,
}

impl InMemoryBroker {
    /// An empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` publishes fail with a transient error, to
    /// exercise producer retry paths.
    pub fn inject_transient_failures(&self, count: u32) {
        self.transient_failures.store(count, Ordering::Release);
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, key: Vec<u8>, payload: Vec<u8>) -> Result<(Offset, u64), QueueError> {
        if self
            .transient_failures
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(QueueError::Transient("injected broker failure".into()));
        }
        let timestamp = crate::utils::current_time_millis();
        let offset = {
            let mut records = self.records.lock();
            records.push((timestamp, key, payload));
            (records.len() - 1) as Offset
        };
        self.notify.notify_waiters();
        Ok((offset, timestamp))
    }

    async fn fetch(
        &self,
        from: Offset,
        max: usize,
    ) -> Result<Vec<(Offset, u64, Vec<u8>)>, QueueError> {
        let records = self.records.lock();
        let start = from.max(0) as usize;
        Ok(records
            .iter()
            .enumerate()
            .skip(start)
            .take(max)
            .map(|(i, (ts, _key, payload))| (i as Offset, *ts, payload.clone()))
            .collect())
    }

    async fn end_offset(&self) -> Result<Offset, QueueError> {
        Ok(self.records.lock().len() as Offset - 1)
    }
}
