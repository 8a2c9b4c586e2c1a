//! The matching engine: tick quantization, the price-time match loop,
//! cancellation, and the book-delete cascade.
//!
//! All mutation entry points take the event's `offset` and `timestamp` so
//! every emitted trade is keyed by `(taker id, maker id, offset)` —
//! deterministic under replay, deduplicable downstream.

use super::book::{LastTrade, OrderBook};
use super::error::BookError;
use super::level::BookEntry;
use crate::assets::{Address, AssetPair};
use crate::order::{Order, OrderId, OrderStatus, Side};
use crate::queue::Offset;
use crate::utils::mul_div_ceil;
use tracing::{debug, trace};

/// A single execution between an incoming (taker) and resting (maker)
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeExecuted {
    /// The pair the trade printed on.
    pub pair: AssetPair,
    /// The incoming order.
    pub taker_order_id: OrderId,
    /// The resting order.
    pub maker_order_id: OrderId,
    /// Owner of the incoming order.
    pub taker_owner: Address,
    /// Owner of the resting order.
    pub maker_owner: Address,
    /// The incoming order's side.
    pub taker_side: Side,
    /// Executed amount, amount-asset units.
    pub amount: u64,
    /// Execution price — always the resting order's price.
    pub price: u64,
    /// Pro-rata fee consumed from the taker.
    pub taker_fee: u64,
    /// Pro-rata fee consumed from the maker.
    pub maker_fee: u64,
    /// Offset of the event that produced this trade.
    pub offset: Offset,
    /// Log-local timestamp of that event.
    pub timestamp: u64,
}

impl TradeExecuted {
    /// The downstream deduplication key.
    #[must_use]
    pub fn dedup_key(&self) -> (OrderId, OrderId, Offset) {
        (self.taker_order_id, self.maker_order_id, self.offset)
    }
}

/// Result of applying a `Placed` event.
#[derive(Debug, Clone)]
pub struct PlaceOutcome {
    /// The placed order's id.
    pub order_id: OrderId,
    /// The quantized price the order was matched and/or rested at.
    pub price: u64,
    /// Trades produced by the match loop, in execution order.
    pub trades: Vec<TradeExecuted>,
    /// The order's status once the book came to rest.
    pub status: OrderStatus,
}

/// Why an order left the book without filling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The owner (or administrator) asked for it.
    Requested,
    /// The whole book was deleted.
    BookDeleted,
}

/// Result of removing a resting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelOutcome {
    /// The cancelled order.
    pub order_id: OrderId,
    /// Its owner.
    pub owner: Address,
    /// Amount executed before cancellation.
    pub filled_amount: u64,
    /// Fee consumed before cancellation.
    pub filled_fee: u64,
    /// Amount released back to the owner.
    pub remaining_amount: u64,
    /// Fee released back to the owner.
    pub remaining_fee: u64,
    /// Why the order was removed.
    pub reason: CancelReason,
}

/// Quantize `price` to the active tick: buys round down, sells round up.
pub fn quantize_price(price: u64, tick_size: u64, side: Side) -> Result<u64, BookError> {
    let tick = tick_size.max(1);
    let quantized = match side {
        Side::Buy => price - price % tick,
        Side::Sell => match price.checked_next_multiple_of(tick) {
            Some(p) => p,
            None => return Err(BookError::InvalidPrice { price, tick_size }),
        },
    };
    if quantized == 0 {
        return Err(BookError::InvalidPrice { price, tick_size });
    }
    Ok(quantized)
}

/// `true` when an incoming order at `incoming_price` executes against the
/// opposite top at `top_price`.
#[must_use]
#[inline]
pub fn crosses(incoming_price: u64, top_price: u64, incoming_side: Side) -> bool {
    match incoming_side {
        Side::Buy => incoming_price >= top_price,
        Side::Sell => incoming_price <= top_price,
    }
}

impl OrderBook {
    /// Apply a `Placed` event: quantize, run the match loop, rest the
    /// remainder.
    ///
    /// # Errors
    ///
    /// [`BookError::DuplicateOrder`] if the id is already known to the
    /// book, [`BookError::InvalidPrice`] if quantization leaves no price.
    pub fn apply_placed(
        &self,
        order: &Order,
        offset: Offset,
        timestamp: u64,
        tick_size: u64,
    ) -> Result<PlaceOutcome, BookError> {
        let order_id = order.id();
        if self.order_locations.contains_key(&order_id)
            || self.status_of(&order_id).is_terminal()
        {
            return Err(BookError::DuplicateOrder(order_id));
        }
        let price = quantize_price(order.price, tick_size, order.side)?;

        let mut remaining_amount = order.amount;
        let mut remaining_fee = order.fee;
        let mut trades = Vec::new();
        let opposite = self.side_levels(order.side.opposite());

        while remaining_amount > 0 {
            // Opposite best: lowest ask for an incoming buy, highest bid
            // for an incoming sell.
            let top = match order.side {
                Side::Buy => opposite.iter().next(),
                Side::Sell => opposite.iter().next_back(),
            };
            let Some(top) = top else { break };
            let top_price = *top.key();
            if !crosses(price, top_price, order.side) {
                break;
            }
            let level = top.value().clone();

            let Some(mut counter) = level.pop_front() else {
                // Empty level left behind by a previous pop; drop it.
                opposite.remove(&top_price);
                continue;
            };

            let exec_amount = remaining_amount.min(counter.remaining_amount);
            let taker_fee =
                mul_div_ceil(order.fee, exec_amount, order.amount).min(remaining_fee);
            let maker_fee =
                mul_div_ceil(counter.fee, exec_amount, counter.amount).min(counter.remaining_fee);

            remaining_amount -= exec_amount;
            remaining_fee -= taker_fee;
            counter.remaining_amount -= exec_amount;
            counter.remaining_fee -= maker_fee;

            trades.push(TradeExecuted {
                pair: *self.pair(),
                taker_order_id: order_id,
                maker_order_id: counter.order_id,
                taker_owner: order.owner,
                maker_owner: counter.owner,
                taker_side: order.side,
                amount: exec_amount,
                price: top_price,
                taker_fee,
                maker_fee,
                offset,
                timestamp,
            });
            trace!(
                pair = %self.pair(),
                taker = %order_id,
                maker = %counter.order_id,
                amount = exec_amount,
                price = top_price,
                "trade executed"
            );
            self.last_trade.store(Some(LastTrade {
                price: top_price,
                amount: exec_amount,
                side: order.side,
            }));

            if counter.remaining_amount == 0 {
                self.record_terminal(
                    counter.order_id,
                    OrderStatus::Filled {
                        filled_amount: counter.amount,
                        filled_fee: counter.fee - counter.remaining_fee,
                    },
                );
                self.unindex(&counter.order_id, &counter.owner);
            } else {
                // A partial fill never costs the resting order its place
                // at the head of the queue.
                level.push_front(counter);
            }

            if level.is_empty() {
                opposite.remove(&top_price);
            }
        }

        let status = if remaining_amount == 0 {
            let filled_fee = order.fee - remaining_fee;
            let status = OrderStatus::Filled {
                filled_amount: order.amount,
                filled_fee,
            };
            self.record_terminal(order_id, status);
            status
        } else {
            self.insert_entry(
                order.side,
                price,
                BookEntry {
                    order_id,
                    owner: order.owner,
                    amount: order.amount,
                    fee: order.fee,
                    remaining_amount,
                    remaining_fee,
                },
            );
            if remaining_amount < order.amount {
                OrderStatus::PartiallyFilled {
                    filled_amount: order.amount - remaining_amount,
                    filled_fee: order.fee - remaining_fee,
                }
            } else {
                OrderStatus::Accepted
            }
        };

        debug!(
            pair = %self.pair(),
            order = %order_id,
            trades = trades.len(),
            ?status,
            "placed order applied"
        );
        Ok(PlaceOutcome {
            order_id,
            price,
            trades,
            status,
        })
    }

    /// Apply a `Canceled` event.
    ///
    /// `admin` is the configured exchange administrator, allowed to cancel
    /// anyone's order.
    ///
    /// # Errors
    ///
    /// [`BookError::AlreadyTerminal`] for a second cancel (idempotence),
    /// [`BookError::OrderNotFound`] for an unknown id,
    /// [`BookError::Unauthorized`] when the requestor is neither owner nor
    /// administrator.
    pub fn apply_cancel(
        &self,
        order_id: &OrderId,
        requestor: &Address,
        admin: Option<&Address>,
    ) -> Result<CancelOutcome, BookError> {
        let Some(location) = self.order_locations.get(order_id).map(|l| *l) else {
            return Err(self.missing_order_error(order_id));
        };
        let (price, side) = location;
        let Some(level_entry) = self.side_levels(side).get(&price) else {
            return Err(self.missing_order_error(order_id));
        };
        let level = level_entry.value().clone();

        // Authority check before mutation: peek the entry first.
        let Some(entry) = level
            .entries()
            .into_iter()
            .find(|e| e.order_id == *order_id)
        else {
            return Err(self.missing_order_error(order_id));
        };
        if entry.owner != *requestor && admin != Some(requestor) {
            return Err(BookError::Unauthorized {
                order_id: *order_id,
                requestor: *requestor,
            });
        }

        let Some(entry) = level.remove(order_id) else {
            return Err(self.missing_order_error(order_id));
        };
        if level.is_empty() {
            self.side_levels(side).remove(&price);
        }
        self.unindex(order_id, &entry.owner);
        let status = OrderStatus::Cancelled {
            filled_amount: entry.filled_amount(),
            filled_fee: entry.filled_fee(),
        };
        self.record_terminal(*order_id, status);
        debug!(pair = %self.pair(), order = %order_id, "order cancelled");

        Ok(CancelOutcome {
            order_id: *order_id,
            owner: entry.owner,
            filled_amount: entry.filled_amount(),
            filled_fee: entry.filled_fee(),
            remaining_amount: entry.remaining_amount,
            remaining_fee: entry.remaining_fee,
            reason: CancelReason::Requested,
        })
    }

    /// Apply an `OrderBookDeleted` event: auto-cancel every resting order,
    /// leaving the book empty.
    pub fn apply_delete(&self) -> Vec<CancelOutcome> {
        let mut outcomes = Vec::with_capacity(self.order_count());
        for side in [Side::Buy, Side::Sell] {
            let levels = self.side_levels(side);
            // Collect prices first; SkipMap iteration tolerates removal
            // but the two-phase form keeps the sweep obvious.
            let prices: Vec<u64> = levels.iter().map(|e| *e.key()).collect();
            for price in prices {
                let Some(level_entry) = levels.get(&price) else {
                    continue;
                };
                let level = level_entry.value().clone();
                for entry in level.drain() {
                    self.unindex(&entry.order_id, &entry.owner);
                    let status = OrderStatus::Cancelled {
                        filled_amount: entry.filled_amount(),
                        filled_fee: entry.filled_fee(),
                    };
                    self.record_terminal(entry.order_id, status);
                    outcomes.push(CancelOutcome {
                        order_id: entry.order_id,
                        owner: entry.owner,
                        filled_amount: entry.filled_amount(),
                        filled_fee: entry.filled_fee(),
                        remaining_amount: entry.remaining_amount,
                        remaining_fee: entry.remaining_fee,
                        reason: CancelReason::BookDeleted,
                    });
                }
                levels.remove(&price);
            }
        }
        debug!(pair = %self.pair(), cancelled = outcomes.len(), "book deleted");
        outcomes
    }
}
