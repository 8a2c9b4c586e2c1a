//! The per-pair order book: price levels on each side plus lookup indices.
//!
//! One book is owned and mutated by exactly one worker. The concurrent
//! containers exist for the read side only: the validator and market-data
//! queries read best bid/ask and statuses without stopping the worker.

use super::error::BookError;
use super::level::{BookEntry, PriceLevel};
use crate::assets::{Address, AssetPair};
use crate::order::{OrderId, OrderStatus, Side};
use crossbeam::atomic::AtomicCell;
use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// How many terminal order statuses a book remembers for cancel
/// idempotence before evicting the oldest.
const TERMINAL_MEMORY_CAP: usize = 16_384;

/// The last trade printed on a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastTrade {
    /// Execution price.
    pub price: u64,
    /// Executed amount.
    pub amount: u64,
    /// The taker's side.
    pub side: Side,
}

/// Best bid/ask and last trade for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarketStatus {
    /// The most recent trade, if the pair has traded.
    pub last_trade: Option<LastTrade>,
    /// Highest resting bid price.
    pub best_bid: Option<u64>,
    /// Lowest resting ask price.
    pub best_ask: Option<u64>,
}

/// Bounded memory of terminal order statuses, backing cancel idempotence.
struct TerminalMemory {
    statuses: DashMap<OrderId, OrderStatus>,
    eviction: Mutex<VecDeque<OrderId>>,
    cap: usize,
}

impl TerminalMemory {
    fn new(cap: usize) -> Self {
        Self {
            statuses: DashMap::new(),
            eviction: Mutex::new(VecDeque::new()),
            cap,
        }
    }

    fn record(&self, order_id: OrderId, status: OrderStatus) {
        let mut eviction = self.eviction.lock();
        if self.statuses.insert(order_id, status).is_none() {
            eviction.push_back(order_id);
            if eviction.len() > self.cap
                && let Some(evicted) = eviction.pop_front()
            {
                self.statuses.remove(&evicted);
            }
        }
    }

    fn get(&self, order_id: &OrderId) -> Option<OrderStatus> {
        self.statuses.get(order_id).map(|s| *s)
    }
}

/// A price-time priority order book for one asset pair.
pub struct OrderBook {
    pair: AssetPair,
    /// Bid levels keyed by price; the best bid is the last key.
    pub(super) bids: SkipMap<u64, Arc<PriceLevel>>,
    /// Ask levels keyed by price; the best ask is the first key.
    pub(super) asks: SkipMap<u64, Arc<PriceLevel>>,
    /// `order id -> (price, side)` for O(log N) cancellation.
    pub(super) order_locations: DashMap<OrderId, (u64, Side)>,
    /// `owner -> order ids` for self-trade scans and owner queries.
    pub(super) owner_orders: DashMap<Address, Vec<OrderId>>,
    pub(super) last_trade: AtomicCell<Option<LastTrade>>,
    terminal: TerminalMemory,
}

impl OrderBook {
    /// Create an empty book for `pair`.
    #[must_use]
    pub fn new(pair: AssetPair) -> Self {
        Self {
            pair,
            bids: SkipMap::new(),
            asks: SkipMap::new(),
            order_locations: DashMap::new(),
            owner_orders: DashMap::new(),
            last_trade: AtomicCell::new(None),
            terminal: TerminalMemory::new(TERMINAL_MEMORY_CAP),
        }
    }

    /// The pair this book trades.
    #[must_use]
    #[inline]
    pub fn pair(&self) -> &AssetPair {
        &self.pair
    }

    /// Highest resting bid price.
    #[must_use]
    pub fn best_bid(&self) -> Option<u64> {
        self.bids.iter().next_back().map(|e| *e.key())
    }

    /// Lowest resting ask price.
    #[must_use]
    pub fn best_ask(&self) -> Option<u64> {
        self.asks.iter().next().map(|e| *e.key())
    }

    /// Best bid/ask and the last trade.
    #[must_use]
    pub fn market_status(&self) -> MarketStatus {
        MarketStatus {
            last_trade: self.last_trade.load(),
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
        }
    }

    /// Number of resting orders across both sides.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.order_locations.len()
    }

    /// `true` when no order rests on either side.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order_locations.is_empty()
    }

    /// The level map for `side`.
    pub(super) fn side_levels(&self, side: Side) -> &SkipMap<u64, Arc<PriceLevel>> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    /// Insert a resting entry at `price` on `side`, creating the level on
    /// demand and indexing the order.
    pub(super) fn insert_entry(&self, side: Side, price: u64, entry: BookEntry) {
        let levels = self.side_levels(side);
        let level = levels
            .get_or_insert_with(price, || Arc::new(PriceLevel::new(price)))
            .value()
            .clone();
        level.push_back(entry);
        self.order_locations.insert(entry.order_id, (price, side));
        self.owner_orders
            .entry(entry.owner)
            .or_default()
            .push(entry.order_id);
    }

    /// Drop an order from both indices.
    pub(super) fn unindex(&self, order_id: &OrderId, owner: &Address) {
        self.order_locations.remove(order_id);
        if let Some(mut ids) = self.owner_orders.get_mut(owner) {
            ids.retain(|id| id != order_id);
            let now_empty = ids.is_empty();
            drop(ids);
            if now_empty {
                self.owner_orders.remove_if(owner, |_, ids| ids.is_empty());
            }
        }
    }

    /// Remember a terminal status for idempotent cancels and status queries.
    pub(super) fn record_terminal(&self, order_id: OrderId, status: OrderStatus) {
        self.terminal.record(order_id, status);
    }

    /// Find the live entry for an order, if it rests in the book.
    #[must_use]
    pub fn entry_of(&self, order_id: &OrderId) -> Option<BookEntry> {
        let (price, side) = *self.order_locations.get(order_id)?;
        let level = self.side_levels(side).get(&price)?.value().clone();
        level
            .entries()
            .into_iter()
            .find(|e| e.order_id == *order_id)
    }

    /// The engine's view of an order's status.
    #[must_use]
    pub fn status_of(&self, order_id: &OrderId) -> OrderStatus {
        if let Some(entry) = self.entry_of(order_id) {
            return if entry.filled_amount() == 0 {
                OrderStatus::Accepted
            } else {
                OrderStatus::PartiallyFilled {
                    filled_amount: entry.filled_amount(),
                    filled_fee: entry.filled_fee(),
                }
            };
        }
        self.terminal
            .get(order_id)
            .unwrap_or(OrderStatus::NotFound)
    }

    /// Whether `owner` has any resting order on `side` that an incoming
    /// order at `price` would execute against.
    #[must_use]
    pub fn would_self_trade(&self, owner: &Address, incoming_side: Side, price: u64) -> bool {
        let opposite = self.side_levels(incoming_side.opposite());
        match incoming_side {
            Side::Buy => opposite
                .range(..=price)
                .any(|e| e.value().has_order_from(owner)),
            Side::Sell => opposite
                .range(price..)
                .any(|e| e.value().has_order_from(owner)),
        }
    }

    /// Resting order ids for `owner`, oldest first.
    #[must_use]
    pub fn orders_of(&self, owner: &Address) -> Vec<OrderId> {
        self.owner_orders
            .get(owner)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Check the book-at-rest invariant: best bid strictly below best ask.
    #[must_use]
    pub fn is_uncrossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid < ask,
            _ => true,
        }
    }
}

/// Builds an error for a cancel attempt on an order this book has no live
/// entry for: terminal orders report their final status, unknown orders
/// report `OrderNotFound`.
impl OrderBook {
    pub(super) fn missing_order_error(&self, order_id: &OrderId) -> BookError {
        match self.terminal.get(order_id) {
            Some(status) => BookError::AlreadyTerminal {
                order_id: *order_id,
                status,
            },
            None => BookError::OrderNotFound(*order_id),
        }
    }
}
