//! Address-ledger accounting: reservations, fills, releases, and the
//! auto-cancel cascade.

use crate::common::{amount_asset, order, pair, trader};
use dexmatch::ledger::AddressLedger;
use dexmatch::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;

fn trade(
    taker: &Order,
    maker: &Order,
    amount: u64,
    price: u64,
    taker_fee: u64,
    maker_fee: u64,
    offset: i64,
) -> TradeExecuted {
    TradeExecuted {
        pair: pair(),
        taker_order_id: taker.id(),
        maker_order_id: maker.id(),
        taker_owner: taker.owner,
        maker_owner: maker.owner,
        taker_side: taker.side,
        amount,
        price,
        taker_fee,
        maker_fee,
        offset,
        timestamp: 1_000 + offset as u64,
    }
}

#[test]
fn placement_reserves_spend_plus_fee() {
    let ledger = AddressLedger::default();
    let b = trader(2);

    // Buy of 10^11 units at 500000: spends 5 * 10^8 of the price asset,
    // fee 300000 in the same (native) asset.
    let buy = order(b, Side::Buy, 500_000, 100_000_000_000, 0);
    ledger.order_added(&buy, 0);
    assert_eq!(ledger.reserved(&b, &Asset::Native), 500_300_000);
    assert_eq!(ledger.reserved(&b, &amount_asset()), 0);

    // A sell reserves the amount asset and the fee separately.
    let a = trader(1);
    let sell = order(a, Side::Sell, 500_000, 2_000, 1);
    ledger.order_added(&sell, 1);
    assert_eq!(ledger.reserved(&a, &amount_asset()), 2_000);
    assert_eq!(ledger.reserved(&a, &Asset::Native), 300_000);
}

#[test]
fn fills_consume_and_terminal_orders_release() {
    let ledger = AddressLedger::default();
    let a = trader(1);
    let b = trader(2);

    let sell = order(a, Side::Sell, 500_000, 200_000_000_000, 0);
    let buy = order(b, Side::Buy, 800_000, 100_000_000_000, 1);
    ledger.order_added(&sell, 0);
    ledger.order_added(&buy, 1);

    // Buy reserved at its own price: 8 * 10^8 + fee.
    assert_eq!(ledger.reserved(&b, &Asset::Native), 800_300_000);

    // Execution at the resting price, full fill of the buy. The taker
    // pays 5 * 10^8; the 3 * 10^8 locked above the execution price is
    // released when the order retires.
    let t = trade(&buy, &sell, 100_000_000_000, 500_000, 300_000, 150_000, 2);
    ledger.trade_executed(&t);

    assert_eq!(ledger.reserved(&b, &Asset::Native), 0);
    assert_eq!(
        ledger.order_status(&b, &buy.id()),
        OrderStatus::Filled {
            filled_amount: 100_000_000_000,
            filled_fee: 300_000
        }
    );

    // The seller's side is half consumed.
    assert_eq!(ledger.reserved(&a, &amount_asset()), 100_000_000_000);
    assert_eq!(ledger.reserved(&a, &Asset::Native), 150_000);
    assert_eq!(
        ledger.order_status(&a, &sell.id()),
        OrderStatus::PartiallyFilled {
            filled_amount: 100_000_000_000,
            filled_fee: 150_000
        }
    );

    // Cancelling the remainder releases everything.
    ledger.order_canceled(&a, sell.id(), 3);
    assert_eq!(ledger.reserved(&a, &amount_asset()), 0);
    assert_eq!(ledger.reserved(&a, &Asset::Native), 0);
    assert_eq!(
        ledger.order_status(&a, &sell.id()),
        OrderStatus::Cancelled {
            filled_amount: 100_000_000_000,
            filled_fee: 150_000
        }
    );
}

#[test]
fn event_application_is_at_most_once() {
    let ledger = AddressLedger::default();
    let a = trader(1);
    let b = trader(2);
    let sell = order(a, Side::Sell, 500_000, 2_000, 0);
    let buy = order(b, Side::Buy, 500_000, 1_000, 1);

    ledger.order_added(&sell, 0);
    ledger.order_added(&sell, 0);
    assert_eq!(ledger.reserved(&a, &amount_asset()), 2_000);

    ledger.order_added(&buy, 1);
    let t = trade(&buy, &sell, 1_000, 500_000, 300_000, 150_000, 2);
    ledger.trade_executed(&t);
    let after_first = ledger.reserved(&a, &amount_asset());
    ledger.trade_executed(&t);
    assert_eq!(ledger.reserved(&a, &amount_asset()), after_first);

    ledger.order_canceled(&a, sell.id(), 3);
    let history_len = ledger.order_history(&a).len();
    ledger.order_canceled(&a, sell.id(), 3);
    assert_eq!(ledger.order_history(&a).len(), history_len);
}

#[test]
fn history_is_capped_with_fifo_eviction() {
    let ledger = AddressLedger::new(2);
    let a = trader(1);
    for i in 0..4 {
        let o = order(a, Side::Sell, 500_000, 1_000, i);
        ledger.order_added(&o, i as i64);
        ledger.order_canceled(&a, o.id(), 100 + i as i64);
    }
    let history = ledger.order_history(&a);
    assert_eq!(history.len(), 2);
    // The two youngest survive.
    assert_eq!(history[0].placed_offset, 2);
    assert_eq!(history[1].placed_offset, 3);
}

#[test]
fn balance_drop_cancels_youngest_orders_first() {
    let ledger = AddressLedger::default();
    let requested: Arc<Mutex<Vec<OrderId>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = requested.clone();
    ledger.set_cancel_hook(Arc::new(move |_pair, order_id, _owner| {
        sink.lock().push(order_id);
    }));

    let a = trader(1);
    // Three sells locking 1000, 2000, 3000 of the amount asset.
    let oldest = order(a, Side::Sell, 500_000, 1_000, 0);
    let middle = order(a, Side::Sell, 500_000, 2_000, 1);
    let youngest = order(a, Side::Sell, 500_000, 3_000, 2);
    ledger.order_added(&oldest, 0);
    ledger.order_added(&middle, 1);
    ledger.order_added(&youngest, 2);
    assert_eq!(ledger.reserved(&a, &amount_asset()), 6_000);

    // Spendable drops to 2500: releasing the youngest (3000) leaves 3000
    // reserved, still above; the middle goes too, leaving 1000.
    ledger.balance_changed(&a, amount_asset(), 2_500);
    let calls = requested.lock().clone();
    assert_eq!(calls, vec![youngest.id(), middle.id()]);

    // A balance covering the reservation requests nothing.
    requested.lock().clear();
    ledger.balance_changed(&a, amount_asset(), 6_000);
    assert!(requested.lock().is_empty());

    // The cascade never mutates local state by itself.
    assert_eq!(ledger.reserved(&a, &amount_asset()), 6_000);
}

#[test]
fn reservation_safety_totals_across_addresses() {
    let ledger = AddressLedger::default();
    let mut total = 0u128;
    for tag in 1..=5u8 {
        let o = order(trader(tag), Side::Sell, 500_000, 1_000 * tag as u64, tag as u64);
        ledger.order_added(&o, tag as i64);
        total += 1_000 * tag as u128;
    }
    assert_eq!(ledger.total_reserved(&amount_asset()), total);
}
