//! Book-level matching behavior: crossing, priority, cancellation, and
//! the structural invariants.

use crate::common::{order, pair, trader};
use dexmatch::book::quantize_price;
use dexmatch::prelude::*;
use proptest::prelude::*;
use std::collections::HashMap;

#[test]
fn simple_cross_executes_at_resting_price() {
    let book = OrderBook::new(pair());
    let a = trader(1);
    let b = trader(2);

    let resting_sell = order(a, Side::Sell, 500_000, 2_000, 0);
    let resting_buy = order(b, Side::Buy, 300_000, 2_000, 1);
    book.apply_placed(&resting_sell, 0, 10, 1).unwrap();
    book.apply_placed(&resting_buy, 1, 11, 1).unwrap();

    let incoming = order(b, Side::Buy, 800_000, 1_000, 2);
    let outcome = book.apply_placed(&incoming, 2, 12, 1).unwrap();

    assert_eq!(outcome.trades.len(), 1);
    let trade = outcome.trades[0];
    assert_eq!(trade.amount, 1_000);
    assert_eq!(trade.price, 500_000, "the resting order sets the price");
    assert_eq!(trade.maker_order_id, resting_sell.id());
    assert_eq!(trade.taker_order_id, incoming.id());
    assert_eq!(
        outcome.status,
        OrderStatus::Filled {
            filled_amount: 1_000,
            filled_fee: 300_000
        }
    );

    // Book afterwards: sell(1000, 500000); buy(2000, 300000).
    assert_eq!(book.best_ask(), Some(500_000));
    assert_eq!(book.best_bid(), Some(300_000));
    let ask_entry = book.entry_of(&resting_sell.id()).unwrap();
    assert_eq!(ask_entry.remaining_amount, 1_000);
    let bid_entry = book.entry_of(&resting_buy.id()).unwrap();
    assert_eq!(bid_entry.remaining_amount, 2_000);
    assert!(book.is_uncrossed());

    let market = book.market_status();
    assert_eq!(
        market.last_trade,
        Some(LastTrade {
            price: 500_000,
            amount: 1_000,
            side: Side::Buy,
        })
    );
}

#[test]
fn price_time_priority_consumes_the_older_order() {
    let book = OrderBook::new(pair());
    let first = order(trader(1), Side::Sell, 500_000, 1_000, 0);
    let second = order(trader(2), Side::Sell, 500_000, 1_000, 1);
    book.apply_placed(&first, 0, 10, 1).unwrap();
    book.apply_placed(&second, 1, 11, 1).unwrap();

    let incoming = order(trader(3), Side::Buy, 500_000, 1_000, 2);
    let outcome = book.apply_placed(&incoming, 2, 12, 1).unwrap();

    assert_eq!(outcome.trades.len(), 1);
    assert_eq!(outcome.trades[0].maker_order_id, first.id());
    // The second order is intact and now at the head of the level.
    assert_eq!(book.status_of(&first.id()), OrderStatus::Filled {
        filled_amount: 1_000,
        filled_fee: 300_000,
    });
    let survivor = book.entry_of(&second.id()).unwrap();
    assert_eq!(survivor.remaining_amount, 1_000);
}

#[test]
fn partial_fill_keeps_resting_priority() {
    let book = OrderBook::new(pair());
    let resting = order(trader(1), Side::Sell, 500_000, 2_000, 0);
    book.apply_placed(&resting, 0, 10, 1).unwrap();

    let incoming = order(trader(2), Side::Buy, 500_000, 1_000, 1);
    let outcome = book.apply_placed(&incoming, 1, 11, 1).unwrap();
    assert_eq!(outcome.trades.len(), 1);
    assert_eq!(outcome.trades[0].amount, 1_000);

    let entry = book.entry_of(&resting.id()).unwrap();
    assert_eq!(entry.remaining_amount, 1_000);
    assert_eq!(
        book.status_of(&resting.id()),
        OrderStatus::PartiallyFilled {
            filled_amount: 1_000,
            filled_fee: 150_000,
        }
    );

    // A later same-price sell queues behind the partially filled one.
    let late = order(trader(3), Side::Sell, 500_000, 500, 2);
    book.apply_placed(&late, 2, 12, 1).unwrap();
    let sweep = order(trader(4), Side::Buy, 500_000, 1_000, 3);
    let outcome = book.apply_placed(&sweep, 3, 13, 1).unwrap();
    assert_eq!(outcome.trades[0].maker_order_id, resting.id());
}

#[test]
fn incoming_fee_prorates_across_partial_fills() {
    let book = OrderBook::new(pair());
    book.apply_placed(&order(trader(1), Side::Sell, 400_000, 300, 0), 0, 10, 1)
        .unwrap();
    book.apply_placed(&order(trader(2), Side::Sell, 500_000, 700, 1), 1, 11, 1)
        .unwrap();

    // Fee 300000 over amount 1000, split 300/700.
    let incoming = order(trader(3), Side::Buy, 500_000, 1_000, 2);
    let outcome = book.apply_placed(&incoming, 2, 12, 1).unwrap();
    assert_eq!(outcome.trades.len(), 2);
    assert_eq!(outcome.trades[0].taker_fee, 90_000);
    assert_eq!(outcome.trades[1].taker_fee, 210_000);
    let total: u64 = outcome.trades.iter().map(|t| t.taker_fee).sum();
    assert_eq!(total, incoming.fee, "fee sums to the whole on a full fill");
}

#[test]
fn tick_quantization_rounds_toward_the_passive_side() {
    assert_eq!(quantize_price(500_050, 100, Side::Buy).unwrap(), 500_000);
    assert_eq!(quantize_price(500_050, 100, Side::Sell).unwrap(), 500_100);
    assert_eq!(quantize_price(500_000, 100, Side::Buy).unwrap(), 500_000);
    // A buy below one tick quantizes to nothing.
    assert!(matches!(
        quantize_price(99, 100, Side::Buy),
        Err(BookError::InvalidPrice { .. })
    ));

    let book = OrderBook::new(pair());
    let coarse = order(trader(1), Side::Buy, 500_050, 1_000, 0);
    let outcome = book.apply_placed(&coarse, 0, 10, 100).unwrap();
    assert_eq!(outcome.price, 500_000);
    assert_eq!(book.best_bid(), Some(500_000));
}

#[test]
fn cancel_requires_authority_and_is_idempotent() {
    let book = OrderBook::new(pair());
    let owner = trader(1);
    let admin = trader(9);
    let resting = order(owner, Side::Sell, 500_000, 1_000, 0);
    let order_id = resting.id();
    book.apply_placed(&resting, 0, 10, 1).unwrap();

    // A stranger may not cancel.
    assert!(matches!(
        book.apply_cancel(&order_id, &trader(2), Some(&admin)),
        Err(BookError::Unauthorized { .. })
    ));

    let outcome = book.apply_cancel(&order_id, &owner, Some(&admin)).unwrap();
    assert_eq!(outcome.remaining_amount, 1_000);
    assert_eq!(
        book.status_of(&order_id),
        OrderStatus::Cancelled {
            filled_amount: 0,
            filled_fee: 0
        }
    );

    // Second cancel: terminal, unchanged state.
    assert!(matches!(
        book.apply_cancel(&order_id, &owner, Some(&admin)),
        Err(BookError::AlreadyTerminal { .. })
    ));
    // Unknown order: plain not-found.
    assert!(matches!(
        book.apply_cancel(&OrderId([42u8; 32]), &owner, Some(&admin)),
        Err(BookError::OrderNotFound(_))
    ));
}

#[test]
fn admin_may_cancel_other_owners_orders() {
    let book = OrderBook::new(pair());
    let admin = trader(9);
    let resting = order(trader(1), Side::Sell, 500_000, 1_000, 0);
    book.apply_placed(&resting, 0, 10, 1).unwrap();
    book.apply_cancel(&resting.id(), &admin, Some(&admin)).unwrap();
    assert!(book.is_empty());
}

#[test]
fn duplicate_ids_are_rejected() {
    let book = OrderBook::new(pair());
    let resting = order(trader(1), Side::Sell, 500_000, 1_000, 0);
    book.apply_placed(&resting, 0, 10, 1).unwrap();
    assert!(matches!(
        book.apply_placed(&resting, 1, 11, 1),
        Err(BookError::DuplicateOrder(_))
    ));

    // Also after the order went terminal.
    book.apply_cancel(&resting.id(), &trader(1), None).unwrap();
    assert!(matches!(
        book.apply_placed(&resting, 2, 12, 1),
        Err(BookError::DuplicateOrder(_))
    ));
}

#[test]
fn book_delete_cancels_everything() {
    let book = OrderBook::new(pair());
    let sell = order(trader(1), Side::Sell, 500_000, 1_000, 0);
    let buy = order(trader(2), Side::Buy, 300_000, 2_000, 1);
    book.apply_placed(&sell, 0, 10, 1).unwrap();
    book.apply_placed(&buy, 1, 11, 1).unwrap();

    let outcomes = book.apply_delete();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.reason == CancelReason::BookDeleted));
    assert!(book.is_empty());
    assert_eq!(book.best_bid(), None);
    assert_eq!(book.best_ask(), None);
    assert!(book.status_of(&sell.id()).is_terminal());
    assert!(book.status_of(&buy.id()).is_terminal());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Random order streams keep the book uncrossed, conserve executed
    /// quantity, and never over-consume fees.
    #[test]
    fn matching_laws_hold(
        orders in prop::collection::vec(
            (any::<bool>(), 1u64..=40, 1u64..=1_000, 1u8..=20),
            1..60,
        )
    ) {
        let book = OrderBook::new(pair());
        let mut placed: HashMap<OrderId, Order> = HashMap::new();
        let mut executed: HashMap<OrderId, u64> = HashMap::new();
        let mut fees: HashMap<OrderId, u64> = HashMap::new();

        for (i, (is_buy, price_ticks, amount, owner_tag)) in orders.iter().enumerate() {
            let side = if *is_buy { Side::Buy } else { Side::Sell };
            let o = order(trader(*owner_tag), side, price_ticks * 10_000, *amount, i as u64);
            let outcome = book.apply_placed(&o, i as i64, i as u64, 1).unwrap();
            placed.insert(o.id(), o);

            for trade in &outcome.trades {
                *executed.entry(trade.taker_order_id).or_default() += trade.amount;
                *executed.entry(trade.maker_order_id).or_default() += trade.amount;
                *fees.entry(trade.taker_order_id).or_default() += trade.taker_fee;
                *fees.entry(trade.maker_order_id).or_default() += trade.maker_fee;
            }

            // Invariant 1: the book at rest never crosses.
            prop_assert!(book.is_uncrossed());
        }

        for (id, o) in &placed {
            let done = executed.get(id).copied().unwrap_or(0);
            let fee_spent = fees.get(id).copied().unwrap_or(0);
            // Match conservation: executed never exceeds the order amount,
            // and agrees with the book's remaining view.
            prop_assert!(done <= o.amount);
            if let Some(entry) = book.entry_of(id) {
                prop_assert_eq!(entry.remaining_amount, o.amount - done);
            }
            // Fee pro-rata bound, with equality on a complete fill.
            prop_assert!(fee_spent <= o.fee);
            if done == o.amount {
                prop_assert_eq!(fee_spent, o.fee);
            }
        }
    }
}
