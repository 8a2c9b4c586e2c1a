//! A single price level: a FIFO queue of resting orders at one price.
//!
//! The level keeps an aggregate quantity so depth queries never walk the
//! queue. Mutation happens on the owning worker only; the lock exists for
//! concurrent read-side snapshots and is uncontended in the common case.

use crate::assets::Address;
use crate::order::OrderId;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// A resting order's state inside a price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookEntry {
    /// The resting order's id.
    pub order_id: OrderId,
    /// The resting order's owner, for cancellation authority and ledger
    /// accounting.
    pub owner: Address,
    /// Original order amount, the denominator of pro-rata fee math.
    pub amount: u64,
    /// Original order fee.
    pub fee: u64,
    /// Amount still unexecuted.
    pub remaining_amount: u64,
    /// Fee still unconsumed.
    pub remaining_fee: u64,
}

impl BookEntry {
    /// Amount executed so far.
    #[must_use]
    #[inline]
    pub fn filled_amount(&self) -> u64 {
        self.amount - self.remaining_amount
    }

    /// Fee consumed so far.
    #[must_use]
    #[inline]
    pub fn filled_fee(&self) -> u64 {
        self.fee - self.remaining_fee
    }
}

/// One price level of the book.
pub struct PriceLevel {
    price: u64,
    entries: RwLock<VecDeque<BookEntry>>,
    total_amount: AtomicU64,
}

impl PriceLevel {
    /// Create an empty level at `price`.
    #[must_use]
    pub fn new(price: u64) -> Self {
        Self {
            price,
            entries: RwLock::new(VecDeque::new()),
            total_amount: AtomicU64::new(0),
        }
    }

    /// The level's price.
    #[must_use]
    #[inline]
    pub fn price(&self) -> u64 {
        self.price
    }

    /// Total unexecuted amount resting at this level.
    #[must_use]
    #[inline]
    pub fn total_amount(&self) -> u64 {
        self.total_amount.load(Ordering::Acquire)
    }

    /// Number of resting orders at this level.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.entries.read().len()
    }

    /// `true` when no orders rest here.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Append an entry at the back of the FIFO.
    pub fn push_back(&self, entry: BookEntry) {
        self.total_amount
            .fetch_add(entry.remaining_amount, Ordering::AcqRel);
        self.entries.write().push_back(entry);
    }

    /// Put an entry back at the head of the FIFO. Used when a partially
    /// filled counter retains its time priority.
    pub fn push_front(&self, entry: BookEntry) {
        self.total_amount
            .fetch_add(entry.remaining_amount, Ordering::AcqRel);
        self.entries.write().push_front(entry);
    }

    /// Pop the head of the FIFO.
    pub fn pop_front(&self) -> Option<BookEntry> {
        let entry = self.entries.write().pop_front()?;
        self.total_amount
            .fetch_sub(entry.remaining_amount, Ordering::AcqRel);
        Some(entry)
    }

    /// Remove one entry by order id, preserving the order of the rest.
    pub fn remove(&self, order_id: &OrderId) -> Option<BookEntry> {
        let mut entries = self.entries.write();
        let idx = entries.iter().position(|e| e.order_id == *order_id)?;
        let entry = entries.remove(idx)?;
        self.total_amount
            .fetch_sub(entry.remaining_amount, Ordering::AcqRel);
        Some(entry)
    }

    /// Copy of the head entry, if any.
    #[must_use]
    pub fn peek_front(&self) -> Option<BookEntry> {
        self.entries.read().front().copied()
    }

    /// FIFO-ordered copy of every entry, for snapshots and scans.
    #[must_use]
    pub fn entries(&self) -> Vec<BookEntry> {
        self.entries.read().iter().copied().collect()
    }

    /// `true` when any resting entry belongs to `owner`.
    #[must_use]
    pub fn has_order_from(&self, owner: &Address) -> bool {
        self.entries.read().iter().any(|e| e.owner == *owner)
    }

    /// Drain every entry, leaving the level empty.
    pub fn drain(&self) -> Vec<BookEntry> {
        let mut entries = self.entries.write();
        self.total_amount.store(0, Ordering::Release);
        entries.drain(..).collect()
    }
}
