//! Book snapshots: a stable binary layout plus a checksum envelope.
//!
//! A snapshot captures one pair's book at a specific log offset. The
//! binary layout (big-endian):
//!
//! ```text
//! [4B magic "DEXS"][2B version][8B offset][pair bytes]
//! [last trade: 1B flag (+8B price, 8B amount, 1B side)]
//! [bid side][ask side]
//! side     = [4B level count] level*
//! level    = [8B price][4B entry count] entry*
//! entry    = [32B order id][32B owner][8B amount][8B fee]
//!            [8B remaining amount][8B remaining fee]
//! ```
//!
//! For at-rest storage the payload is wrapped in a JSON envelope carrying
//! a SHA-256 checksum, so corruption is detected before replay starts.

use super::book::{LastTrade, OrderBook};
use super::level::{BookEntry, PriceLevel};
use crate::assets::{Address, AssetPair, HASH_LEN};
use crate::order::{OrderId, Side};
use crate::queue::Offset;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

/// Leading magic of every snapshot payload.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"DEXS";

/// Current snapshot payload version.
pub const SNAPSHOT_VERSION: u16 = 2;

/// One side of a snapshot: `(price, FIFO entries)` per level, prices
/// ascending.
pub type SnapshotSide = Vec<(u64, Vec<BookEntry>)>;

/// A pair's book state at a specific log offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSnapshot {
    /// The pair this snapshot belongs to.
    pub pair: AssetPair,
    /// The last event offset applied before the snapshot was taken.
    pub offset: Offset,
    /// The last trade printed before the snapshot, if any.
    pub last_trade: Option<LastTrade>,
    /// Bid levels, prices ascending.
    pub bids: SnapshotSide,
    /// Ask levels, prices ascending.
    pub asks: SnapshotSide,
}

/// Snapshot encode/decode and integrity failures.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SnapshotError {
    /// The payload ended early.
    #[error("snapshot bytes truncated")]
    Truncated,
    /// The payload does not start with [`SNAPSHOT_MAGIC`].
    #[error("bad snapshot magic")]
    BadMagic,
    /// The payload's version is not [`SNAPSHOT_VERSION`].
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u16),
    /// A field held an impossible value.
    #[error("malformed snapshot field: {0}")]
    Malformed(&'static str),
    /// The envelope checksum does not match the payload.
    #[error("snapshot checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch {
        /// Checksum stored in the envelope.
        expected: String,
        /// Checksum computed from the payload.
        actual: String,
    },
    /// The JSON envelope could not be read or written.
    #[error("snapshot envelope error: {0}")]
    Envelope(String),
}

impl BookSnapshot {
    /// Encode to the stable binary layout.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&SNAPSHOT_MAGIC);
        out.extend_from_slice(&SNAPSHOT_VERSION.to_be_bytes());
        out.extend_from_slice(&(self.offset as u64).to_be_bytes());
        out.extend_from_slice(&self.pair.to_bytes());
        match self.last_trade {
            None => out.push(0),
            Some(lt) => {
                out.push(1);
                out.extend_from_slice(&lt.price.to_be_bytes());
                out.extend_from_slice(&lt.amount.to_be_bytes());
                out.push(lt.side as u8);
            }
        }
        for side in [&self.bids, &self.asks] {
            out.extend_from_slice(&(side.len() as u32).to_be_bytes());
            for (price, entries) in side {
                out.extend_from_slice(&price.to_be_bytes());
                out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
                for e in entries {
                    out.extend_from_slice(&e.order_id.0);
                    out.extend_from_slice(&e.owner.0);
                    out.extend_from_slice(&e.amount.to_be_bytes());
                    out.extend_from_slice(&e.fee.to_be_bytes());
                    out.extend_from_slice(&e.remaining_amount.to_be_bytes());
                    out.extend_from_slice(&e.remaining_fee.to_be_bytes());
                }
            }
        }
        out
    }

    /// Decode from the stable binary layout.
    pub fn from_bytes(buf: &[u8]) -> Result<BookSnapshot, SnapshotError> {
        let mut pos = 0usize;
        if take(buf, &mut pos, 4)? != SNAPSHOT_MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let version = u16::from_be_bytes(take_array(buf, &mut pos)?);
        if version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        let offset = u64::from_be_bytes(take_array(buf, &mut pos)?) as Offset;
        let pair =
            AssetPair::read_bytes(buf, &mut pos).ok_or(SnapshotError::Malformed("pair"))?;
        let last_trade = match take_u8(buf, &mut pos)? {
            0 => None,
            1 => {
                let price = u64::from_be_bytes(take_array(buf, &mut pos)?);
                let amount = u64::from_be_bytes(take_array(buf, &mut pos)?);
                let side = match take_u8(buf, &mut pos)? {
                    0 => Side::Buy,
                    1 => Side::Sell,
                    _ => return Err(SnapshotError::Malformed("last trade side")),
                };
                Some(LastTrade {
                    price,
                    amount,
                    side,
                })
            }
            _ => return Err(SnapshotError::Malformed("last trade flag")),
        };

        let mut sides = Vec::with_capacity(2);
        for _ in 0..2 {
            let level_count = u32::from_be_bytes(take_array(buf, &mut pos)?) as usize;
            let mut levels = Vec::with_capacity(level_count.min(4096));
            for _ in 0..level_count {
                let price = u64::from_be_bytes(take_array(buf, &mut pos)?);
                let entry_count = u32::from_be_bytes(take_array(buf, &mut pos)?) as usize;
                let mut entries = Vec::with_capacity(entry_count.min(4096));
                for _ in 0..entry_count {
                    let order_id = OrderId(take_hash(buf, &mut pos)?);
                    let owner = Address(take_hash(buf, &mut pos)?);
                    let amount = u64::from_be_bytes(take_array(buf, &mut pos)?);
                    let fee = u64::from_be_bytes(take_array(buf, &mut pos)?);
                    let remaining_amount = u64::from_be_bytes(take_array(buf, &mut pos)?);
                    let remaining_fee = u64::from_be_bytes(take_array(buf, &mut pos)?);
                    if remaining_amount > amount || remaining_fee > fee {
                        return Err(SnapshotError::Malformed("entry remaining exceeds total"));
                    }
                    entries.push(BookEntry {
                        order_id,
                        owner,
                        amount,
                        fee,
                        remaining_amount,
                        remaining_fee,
                    });
                }
                levels.push((price, entries));
            }
            sides.push(levels);
        }
        let asks = sides.pop().unwrap_or_default();
        let bids = sides.pop().unwrap_or_default();
        if pos != buf.len() {
            return Err(SnapshotError::Malformed("trailing bytes"));
        }

        Ok(BookSnapshot {
            pair,
            offset,
            last_trade,
            bids,
            asks,
        })
    }
}

fn take<'a>(buf: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], SnapshotError> {
    let end = pos.checked_add(len).ok_or(SnapshotError::Truncated)?;
    let slice = buf.get(*pos..end).ok_or(SnapshotError::Truncated)?;
    *pos = end;
    Ok(slice)
}

fn take_u8(buf: &[u8], pos: &mut usize) -> Result<u8, SnapshotError> {
    Ok(take(buf, pos, 1)?[0])
}

fn take_array<const N: usize>(buf: &[u8], pos: &mut usize) -> Result<[u8; N], SnapshotError> {
    take(buf, pos, N)?
        .try_into()
        .map_err(|_| SnapshotError::Truncated)
}

fn take_hash(buf: &[u8], pos: &mut usize) -> Result<[u8; HASH_LEN], SnapshotError> {
    take_array::<HASH_LEN>(buf, pos)
}

/// JSON envelope wrapping a snapshot payload with an integrity checksum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotPackage {
    /// Envelope schema version.
    pub version: u32,
    /// Hex-encoded binary snapshot payload.
    pub payload: String,
    /// Hex-encoded SHA-256 of the payload bytes.
    pub checksum: String,
}

/// Envelope schema version for [`SnapshotPackage`].
pub const SNAPSHOT_PACKAGE_VERSION: u32 = 1;

impl SnapshotPackage {
    /// Wrap a snapshot, computing its checksum.
    #[must_use]
    pub fn new(snapshot: &BookSnapshot) -> Self {
        let payload = snapshot.to_bytes();
        let checksum = hex::encode(Sha256::digest(&payload));
        Self {
            version: SNAPSHOT_PACKAGE_VERSION,
            payload: hex::encode(payload),
            checksum,
        }
    }

    /// Serialize the envelope to JSON.
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string(self).map_err(|e| SnapshotError::Envelope(e.to_string()))
    }

    /// Deserialize an envelope from JSON.
    pub fn from_json(data: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(data).map_err(|e| SnapshotError::Envelope(e.to_string()))
    }

    /// Verify the checksum and decode the payload.
    pub fn into_snapshot(self) -> Result<BookSnapshot, SnapshotError> {
        let payload =
            hex::decode(&self.payload).map_err(|e| SnapshotError::Envelope(e.to_string()))?;
        let actual = hex::encode(Sha256::digest(&payload));
        if actual != self.checksum {
            return Err(SnapshotError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        BookSnapshot::from_bytes(&payload)
    }
}

impl OrderBook {
    /// Capture the book's state as of `offset`.
    #[must_use]
    pub fn snapshot(&self, offset: Offset) -> BookSnapshot {
        let collect = |side: Side| -> SnapshotSide {
            self.side_levels(side)
                .iter()
                .map(|e| (*e.key(), e.value().entries()))
                .collect()
        };
        BookSnapshot {
            pair: *self.pair(),
            offset,
            last_trade: self.last_trade.load(),
            bids: collect(Side::Buy),
            asks: collect(Side::Sell),
        }
    }

    /// Rebuild a book from a snapshot. The order and owner indices are
    /// regenerated from the level contents; nothing else is trusted.
    #[must_use]
    pub fn restore(snapshot: &BookSnapshot) -> OrderBook {
        let book = OrderBook::new(snapshot.pair);
        book.last_trade.store(snapshot.last_trade);
        for (side, levels) in [(Side::Buy, &snapshot.bids), (Side::Sell, &snapshot.asks)] {
            for (price, entries) in levels {
                let level = Arc::new(PriceLevel::new(*price));
                for entry in entries {
                    level.push_back(*entry);
                    book.order_locations.insert(entry.order_id, (*price, side));
                    book.owner_orders
                        .entry(entry.owner)
                        .or_default()
                        .push(entry.order_id);
                }
                if !level.is_empty() {
                    book.side_levels(side).insert(*price, level);
                }
            }
        }
        book
    }
}
