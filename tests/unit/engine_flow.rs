//! End-to-end orchestrator flows over a real local event log.

use crate::common::{amount_asset, live_order, pair, trader};
use dexmatch::prelude::*;
use std::sync::Arc;
use std::time::Duration;

async fn wait_for<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn validator(settings: &Arc<MatcherSettings>) -> Arc<Validator> {
    Arc::new(Validator::new(
        settings.clone(),
        Arc::new(MockChainClient::new()),
        Arc::new(AcceptAllSignatures),
    ))
}

fn build(
    settings: MatcherSettings,
    log: Arc<dyn EventLog>,
    store: Arc<dyn SnapshotStore>,
) -> Arc<MatcherOrchestrator> {
    let settings = Arc::new(settings);
    let v = validator(&settings);
    MatcherOrchestrator::new(settings, log, store, v)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lifecycle_gates_requests_and_matches_orders() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(LocalEventLog::open(dir.path()).unwrap());
    let matcher = build(
        MatcherSettings::default(),
        log,
        Arc::new(MemorySnapshotStore::new()),
    );

    // Requests in Starting are refused with a dedicated error.
    assert_eq!(matcher.status(), ServiceStatus::Starting);
    let premature = live_order(trader(1), Side::Sell, 500_000, 2_000, 0);
    assert!(matches!(
        matcher.place_order(premature).await,
        Err(EngineError::NotReady { .. })
    ));

    matcher.clone().start().await.unwrap();
    assert_eq!(matcher.status(), ServiceStatus::Working);
    let mut trades = matcher.subscribe_trades();

    let a = trader(1);
    let b = trader(2);
    let resting_sell = live_order(a, Side::Sell, 500_000, 2_000, 1);
    let resting_buy = live_order(b, Side::Buy, 300_000, 2_000, 2);
    let incoming = live_order(b, Side::Buy, 800_000, 1_000, 3);
    let incoming_id = incoming.id();

    matcher.place_order(resting_sell.clone()).await.unwrap();
    matcher.place_order(resting_buy.clone()).await.unwrap();
    matcher.place_order(incoming.clone()).await.unwrap();

    let trade = tokio::time::timeout(Duration::from_secs(5), trades.recv())
        .await
        .expect("no trade emitted")
        .unwrap();
    assert_eq!(trade.amount, 1_000);
    assert_eq!(trade.price, 500_000);
    assert_eq!(trade.taker_order_id, incoming_id);
    assert_eq!(trade.maker_order_id, resting_sell.id());

    wait_for(|| matcher.order_status(&pair(), &b, &incoming_id).is_terminal()).await;
    assert_eq!(
        matcher.order_status(&pair(), &b, &incoming_id),
        OrderStatus::Filled {
            filled_amount: 1_000,
            filled_fee: 300_000
        }
    );

    let market = matcher.market_status(&pair());
    assert_eq!(market.best_ask, Some(500_000));
    assert_eq!(market.best_bid, Some(300_000));
    assert_eq!(market.last_trade.unwrap().price, 500_000);

    // Reservations after the cross, under the price-constant spend rule:
    // B keeps the resting buy's spend (2000 * 300000 / 10^8 = 6) plus its
    // 300000 fee; the filled incoming buy released everything, price
    // improvement included.
    wait_for(|| matcher.ledger().reserved(&b, &Asset::Native) == 300_006).await;
    assert_eq!(matcher.ledger().reserved(&a, &amount_asset()), 1_000);
    assert_eq!(matcher.ledger().reserved(&a, &Asset::Native), 150_000);

    matcher.shutdown().await.unwrap();
    assert_eq!(matcher.status(), ServiceStatus::Stopping);
    let late = live_order(a, Side::Sell, 500_000, 1_000, 9);
    assert!(matches!(
        matcher.place_order(late).await,
        Err(EngineError::NotReady { .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_flows_through_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(LocalEventLog::open(dir.path()).unwrap());
    let matcher = build(
        MatcherSettings::default(),
        log,
        Arc::new(MemorySnapshotStore::new()),
    );
    matcher.clone().start().await.unwrap();

    let a = trader(1);
    let resting = live_order(a, Side::Sell, 500_000, 2_000, 0);
    let resting_id = resting.id();
    matcher.place_order(resting).await.unwrap();
    wait_for(|| matcher.market_status(&pair()).best_ask == Some(500_000)).await;

    matcher.cancel_order(pair(), resting_id, a).await.unwrap();
    wait_for(|| matcher.order_status(&pair(), &a, &resting_id).is_terminal()).await;
    assert_eq!(
        matcher.order_status(&pair(), &a, &resting_id),
        OrderStatus::Cancelled {
            filled_amount: 0,
            filled_fee: 0
        }
    );
    assert_eq!(matcher.ledger().reserved(&a, &amount_asset()), 0);
    matcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crash_replay_rebuilds_the_book_from_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let a = trader(1);
    let b = trader(2);
    let o1 = live_order(a, Side::Sell, 500_000, 1_000, 0);
    let o2 = live_order(b, Side::Buy, 300_000, 1_000, 1);
    let o1_id = o1.id();
    let o2_id = o2.id();

    {
        let log = Arc::new(LocalEventLog::open(dir.path()).unwrap());
        let matcher = build(
            MatcherSettings::default(),
            log,
            Arc::new(MemorySnapshotStore::new()),
        );
        matcher.clone().start().await.unwrap();
        matcher.place_order(o1).await.unwrap();
        matcher.place_order(o2).await.unwrap();
        matcher.cancel_order(pair(), o1_id, a).await.unwrap();
        wait_for(|| matcher.order_status(&pair(), &a, &o1_id).is_terminal()).await;
        // Crash: no shutdown, no snapshot.
    }

    let log = Arc::new(LocalEventLog::open(dir.path()).unwrap());
    let end = log.end_offset().await.unwrap();
    let matcher = build(
        MatcherSettings::default(),
        log,
        Arc::new(MemorySnapshotStore::new()),
    );
    matcher.clone().start().await.unwrap();

    // After replay from the empty snapshot: only O2 rests, Accepted; the
    // consumer reached the log's end.
    assert_eq!(
        matcher.order_status(&pair(), &b, &o2_id),
        OrderStatus::Accepted
    );
    assert!(matcher.order_status(&pair(), &a, &o1_id).is_terminal());
    let market = matcher.market_status(&pair());
    assert_eq!(market.best_bid, Some(300_000));
    assert_eq!(market.best_ask, None);
    assert_eq!(matcher.last_processed_offset(), end);
    matcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn graceful_restart_resumes_from_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SnapshotStore> = Arc::new(MemorySnapshotStore::new());
    let settings = MatcherSettings {
        snapshots_interval: 1,
        ..MatcherSettings::default()
    };
    let a = trader(1);
    let resting = live_order(a, Side::Sell, 500_000, 2_000, 0);
    let resting_id = resting.id();

    {
        let log = Arc::new(LocalEventLog::open(dir.path()).unwrap());
        let matcher = build(settings.clone(), log, store.clone());
        matcher.clone().start().await.unwrap();
        matcher.place_order(resting).await.unwrap();
        wait_for(|| matcher.market_status(&pair()).best_ask == Some(500_000)).await;
        matcher.shutdown().await.unwrap();
    }

    let log = Arc::new(LocalEventLog::open(dir.path()).unwrap());
    let matcher = build(settings, log, store);
    matcher.clone().start().await.unwrap();
    assert_eq!(matcher.market_status(&pair()).best_ask, Some(500_000));
    assert_eq!(
        matcher.order_status(&pair(), &a, &resting_id),
        OrderStatus::Accepted
    );
    matcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn balance_drop_auto_cancels_through_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(LocalEventLog::open(dir.path()).unwrap());
    let matcher = build(
        MatcherSettings::default(),
        log,
        Arc::new(MemorySnapshotStore::new()),
    );
    matcher.clone().start().await.unwrap();

    let b = trader(2);
    let resting = live_order(b, Side::Sell, 500_000, 1_000, 0);
    let resting_id = resting.id();
    matcher.place_order(resting).await.unwrap();
    wait_for(|| matcher.ledger().reserved(&b, &amount_asset()) == 1_000).await;

    // The external balance feed reports the seller can no longer cover
    // the reservation; the cascade enqueues a cancel through the log.
    matcher.ledger().balance_changed(&b, amount_asset(), 0);
    wait_for(|| matcher.order_status(&pair(), &b, &resting_id).is_terminal()).await;
    assert_eq!(matcher.ledger().reserved(&b, &amount_asset()), 0);
    matcher.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deleted_books_cancel_everything_and_refuse_new_orders() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(LocalEventLog::open(dir.path()).unwrap());
    let matcher = build(
        MatcherSettings::default(),
        log,
        Arc::new(MemorySnapshotStore::new()),
    );
    matcher.clone().start().await.unwrap();

    let a = trader(1);
    let resting = live_order(a, Side::Sell, 500_000, 1_000, 0);
    let resting_id = resting.id();
    matcher.place_order(resting).await.unwrap();
    wait_for(|| matcher.market_status(&pair()).best_ask == Some(500_000)).await;

    matcher.delete_order_book(pair()).await.unwrap();
    wait_for(|| matcher.order_status(&pair(), &a, &resting_id).is_terminal()).await;
    assert_eq!(matcher.ledger().reserved(&a, &amount_asset()), 0);

    // The tombstone lands just after the delete's ack; retry until the
    // next placement bounces off it.
    let refused = tokio::time::timeout(Duration::from_secs(5), async {
        let mut nonce = 1;
        loop {
            let late = live_order(a, Side::Sell, 500_000, 1_000, nonce);
            match matcher.place_order(late).await {
                Err(EngineError::BookDisabled(_)) => break true,
                Ok(_) | Err(_) => {
                    nonce += 1;
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    })
    .await
    .expect("book never reported disabled");
    assert!(refused);
    matcher.shutdown().await.unwrap();
}
