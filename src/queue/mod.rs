//! The append-only event queue that sequences every mutating operation.
//!
//! All state changes flow through a totally ordered log of [`QueueEvent`]s.
//! Two interchangeable implementations exist: [`LocalEventLog`] persists
//! events to memory-mapped segment files in one process, and
//! [`RemoteEventLog`] layers a backpressured producer and a batching
//! consumer over a [`Broker`] transport contract.
//!
//! # Wire format
//!
//! One event = a tag byte followed by a type-specific payload:
//!
//! ```text
//! 1  Placed           [order bytes]
//! 2  Canceled         [pair bytes][32B order id][32B requestor]
//! 3  OrderBookDeleted [pair bytes]
//! ```
//!
//! The sharding key for the distributed transport is the pair's bytes, so
//! a single partition preserves per-pair ordering by construction.

mod local;
mod remote;

pub use local::LocalEventLog;
pub use remote::{Broker, InMemoryBroker, ProducerSettings, RemoteEventLog, RetryPolicy};

use crate::assets::{Address, AssetPair, HASH_LEN};
use crate::order::{Order, OrderCodecError, OrderId};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;

/// Position of an event in the log. `-1` denotes the empty log's end.
pub type Offset = i64;

/// Wire tag for [`QueueEvent::Placed`].
pub const TAG_PLACED: u8 = 1;
/// Wire tag for [`QueueEvent::Canceled`].
pub const TAG_CANCELED: u8 = 2;
/// Wire tag for [`QueueEvent::OrderBookDeleted`].
pub const TAG_BOOK_DELETED: u8 = 3;

/// A state-changing command, as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    /// A validated order enters its pair's book.
    Placed(Order),
    /// A cancellation request for a resting order.
    Canceled {
        /// The book the order rests in.
        pair: AssetPair,
        /// The order to remove.
        order_id: OrderId,
        /// Who asked — the owner, or the exchange administrator.
        requestor: Address,
    },
    /// The whole book for a pair is withdrawn from trading.
    OrderBookDeleted {
        /// The pair being delisted.
        pair: AssetPair,
    },
}

impl QueueEvent {
    /// The pair this event must be routed to.
    #[must_use]
    pub fn pair(&self) -> AssetPair {
        match self {
            QueueEvent::Placed(order) => order.pair,
            QueueEvent::Canceled { pair, .. } => *pair,
            QueueEvent::OrderBookDeleted { pair } => *pair,
        }
    }

    /// The sharding key for the distributed transport.
    #[must_use]
    pub fn shard_key(&self) -> Vec<u8> {
        self.pair().to_bytes()
    }

    /// Encode to the wire format.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        match self {
            QueueEvent::Placed(order) => {
                out.push(TAG_PLACED);
                out.extend_from_slice(&order.to_bytes());
            }
            QueueEvent::Canceled {
                pair,
                order_id,
                requestor,
            } => {
                out.push(TAG_CANCELED);
                out.extend_from_slice(&pair.to_bytes());
                out.extend_from_slice(&order_id.0);
                out.extend_from_slice(&requestor.0);
            }
            QueueEvent::OrderBookDeleted { pair } => {
                out.push(TAG_BOOK_DELETED);
                out.extend_from_slice(&pair.to_bytes());
            }
        }
        out
    }

    /// Decode from the wire format, consuming the whole buffer.
    pub fn from_bytes(buf: &[u8]) -> Result<QueueEvent, EventCodecError> {
        let tag = *buf.first().ok_or(EventCodecError::Empty)?;
        let body = &buf[1..];
        let mut pos = 0usize;
        let event = match tag {
            TAG_PLACED => {
                let order = Order::read_bytes(body, &mut pos)?;
                QueueEvent::Placed(order)
            }
            TAG_CANCELED => {
                let pair =
                    AssetPair::read_bytes(body, &mut pos).ok_or(EventCodecError::Malformed)?;
                let order_id = OrderId(take_hash(body, &mut pos)?);
                let requestor = Address(take_hash(body, &mut pos)?);
                QueueEvent::Canceled {
                    pair,
                    order_id,
                    requestor,
                }
            }
            TAG_BOOK_DELETED => {
                let pair =
                    AssetPair::read_bytes(body, &mut pos).ok_or(EventCodecError::Malformed)?;
                QueueEvent::OrderBookDeleted { pair }
            }
            other => return Err(EventCodecError::UnknownTag(other)),
        };
        if pos != body.len() {
            return Err(EventCodecError::Malformed);
        }
        Ok(event)
    }
}

fn take_hash(buf: &[u8], pos: &mut usize) -> Result<[u8; HASH_LEN], EventCodecError> {
    let end = pos.checked_add(HASH_LEN).ok_or(EventCodecError::Malformed)?;
    let bytes: [u8; HASH_LEN] = buf
        .get(*pos..end)
        .ok_or(EventCodecError::Malformed)?
        .try_into()
        .map_err(|_| EventCodecError::Malformed)?;
    *pos = end;
    Ok(bytes)
}

/// Event wire-format failures.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum EventCodecError {
    /// The buffer was empty.
    #[error("empty event bytes")]
    Empty,
    /// The tag byte is not a known event type.
    #[error("unknown event tag {0}")]
    UnknownTag(u8),
    /// The payload did not decode cleanly.
    #[error("malformed event payload")]
    Malformed,
    /// The embedded order failed structural decoding.
    #[error(transparent)]
    Order(#[from] OrderCodecError),
}

/// An event after the log assigned its position and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencedEvent {
    /// Monotonic position in the log.
    pub offset: Offset,
    /// Log-local wall-clock timestamp, milliseconds since epoch.
    pub timestamp: u64,
    /// The command itself.
    pub event: QueueEvent,
}

/// A consecutive run of sequenced events, oldest first, no gaps.
pub type EventBatch = Vec<SequencedEvent>;

/// Failures of the event log and its transports.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QueueError {
    /// An I/O failure while reading or writing the backing storage.
    #[error("event log storage error{}: {message}", path_suffix(.path))]
    Storage {
        /// Description of the underlying failure.
        message: String,
        /// The file involved, if known.
        path: Option<PathBuf>,
    },

    /// A stored entry failed its CRC32 integrity check.
    #[error("corrupt event at offset {offset}: expected CRC {expected_crc:#010x}, got {actual_crc:#010x}")]
    Corrupt {
        /// Offset of the damaged entry.
        offset: Offset,
        /// CRC stored alongside the entry.
        expected_crc: u32,
        /// CRC computed over the entry bytes.
        actual_crc: u32,
    },

    /// A stored payload failed to decode.
    #[error("undecodable event at offset {offset}: {source}")]
    Codec {
        /// Offset of the undecodable entry.
        offset: Offset,
        /// The codec failure.
        source: EventCodecError,
    },

    /// The producer buffer is full; the caller must retry or shed load.
    #[error("event producer buffer full")]
    CapacityExceeded,

    /// The log was closed; no further appends are accepted.
    #[error("event log closed")]
    Closed,

    /// The broker reported an offset lower than one already consumed.
    #[error("log offset rewind detected: consumed up to {consumed}, broker restarted at {found}")]
    OffsetRewind {
        /// Highest offset already consumed.
        consumed: Offset,
        /// The conflicting offset the transport produced.
        found: Offset,
    },

    /// A transient transport failure; retried with backoff by the caller.
    #[error("transient event transport error: {0}")]
    Transient(String),
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" at {}", p.display()),
        None => String::new(),
    }
}

/// The ordered, durable, replayable command queue.
///
/// `append` linearizes concurrent writers; consumers receive batches in
/// offset order with no gaps and at-least-once delivery. Downstream
/// idempotence is the orchestrator's job.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append an event. Resolves only after the event is durable, with the
    /// assigned `(offset, timestamp)`.
    async fn append(&self, event: QueueEvent) -> Result<(Offset, u64), QueueError>;

    /// Stream batches starting at `from_offset` (inclusive). The channel
    /// yields every event at least once, in offset order, until the log is
    /// closed.
    async fn tail(&self, from_offset: Offset) -> Result<mpsc::Receiver<EventBatch>, QueueError>;

    /// The offset of the last appended event, `-1` when empty.
    async fn end_offset(&self) -> Result<Offset, QueueError>;

    /// Record that everything up to `offset` has been applied. Consumed by
    /// implementations that resume from a committed position; a no-op
    /// otherwise.
    async fn commit(&self, _offset: Offset) -> Result<(), QueueError> {
        Ok(())
    }

    /// Stop accepting appends and terminate open tails.
    async fn close(&self) -> Result<(), QueueError>;
}
