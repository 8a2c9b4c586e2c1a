//! Per-pair order books: price levels, matching, snapshots.

mod book;
mod error;
mod level;
mod matching;
mod snapshot;

pub use book::{LastTrade, MarketStatus, OrderBook};
pub use error::BookError;
pub use level::{BookEntry, PriceLevel};
pub use matching::{
    CancelOutcome, CancelReason, PlaceOutcome, TradeExecuted, crosses, quantize_price,
};
pub use snapshot::{
    BookSnapshot, SNAPSHOT_MAGIC, SNAPSHOT_PACKAGE_VERSION, SNAPSHOT_VERSION, SnapshotError,
    SnapshotPackage, SnapshotSide,
};
