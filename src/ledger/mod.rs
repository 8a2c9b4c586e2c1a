//! Per-address accounting: reserved balances, active orders, terminal
//! history, and the auto-cancel cascade.
//!
//! The ledger is a projection of the event log plus external balance
//! notifications; it is never snapshotted and is rebuilt by replay. Each
//! address is guarded by its own lock, uncontended because a single
//! consumer drives all updates. Application is at-most-once, keyed by
//! `(order id, counter id, offset)`.

use crate::assets::{Address, Asset, AssetPair};
use crate::book::TradeExecuted;
use crate::order::{Order, OrderId, OrderStatus, PRICE_CONSTANT, Side};
use crate::queue::Offset;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Default cap on terminal orders remembered per address.
pub const DEFAULT_HISTORY_CAP: usize = 100;

/// Cap on remembered application keys per address.
const SEEN_CAP: usize = 8_192;

/// Callback fired by the auto-cancel cascade. The implementation must
/// enqueue a `Canceled` event into the log; the cascade never mutates the
/// book or the ledger directly.
pub type CancelHook = Arc<dyn Fn(AssetPair, OrderId, Address) + Send + Sync>;

/// A tracked order inside an address's state.
#[derive(Debug, Clone)]
pub struct OrderInfo {
    /// The order's id.
    pub order_id: OrderId,
    /// The order's pair.
    pub pair: AssetPair,
    /// Buy or sell.
    pub side: Side,
    /// Limit price.
    pub price: u64,
    /// Original amount.
    pub amount: u64,
    /// Original fee.
    pub fee: u64,
    /// The fee's asset.
    pub fee_asset: Asset,
    /// Amount still unexecuted.
    pub remaining_amount: u64,
    /// Fee still unconsumed.
    pub remaining_fee: u64,
    /// Offset of the `Placed` event that created the order.
    pub placed_offset: Offset,
    /// Current status.
    pub status: OrderStatus,
    /// Per-asset reservation still held for this order.
    reserved: Vec<(Asset, u128)>,
}

impl OrderInfo {
    /// `true` when `asset` still has a reservation for this order.
    fn reserves(&self, asset: &Asset) -> bool {
        self.reserved.iter().any(|(a, v)| a == asset && *v > 0)
    }

    fn reserved_total(&self, asset: &Asset) -> u128 {
        self.reserved
            .iter()
            .filter(|(a, _)| a == asset)
            .map(|(_, v)| v)
            .sum()
    }
}

#[derive(Default)]
struct AddressState {
    reserved: HashMap<Asset, u128>,
    active: HashMap<OrderId, OrderInfo>,
    history: VecDeque<OrderInfo>,
    seen: HashSet<(OrderId, OrderId, Offset)>,
    seen_order: VecDeque<(OrderId, OrderId, Offset)>,
}

impl AddressState {
    /// Record an application key; `false` when the event was applied
    /// before.
    fn first_application(&mut self, key: (OrderId, OrderId, Offset)) -> bool {
        if !self.seen.insert(key) {
            return false;
        }
        self.seen_order.push_back(key);
        if self.seen_order.len() > SEEN_CAP
            && let Some(evicted) = self.seen_order.pop_front()
        {
            self.seen.remove(&evicted);
        }
        true
    }

    fn add_reserved(&mut self, asset: Asset, value: u128) {
        if value > 0 {
            *self.reserved.entry(asset).or_insert(0) += value;
        }
    }

    fn sub_reserved(&mut self, owner: &Address, asset: Asset, value: u128) {
        if value == 0 {
            return;
        }
        match self.reserved.get_mut(&asset) {
            Some(held) if *held >= value => {
                *held -= value;
                if *held == 0 {
                    self.reserved.remove(&asset);
                }
            }
            held => {
                // Reservation safety says this cannot happen; clamping to
                // zero keeps the invariant `reserved >= 0` while the warn
                // flags the accounting bug.
                warn!(%owner, %asset, release = value, held = ?held, "reservation underflow clamped");
                self.reserved.remove(&asset);
            }
        }
    }

    fn retire(&mut self, mut info: OrderInfo, status: OrderStatus, owner: &Address, cap: usize) {
        for (asset, value) in std::mem::take(&mut info.reserved) {
            self.sub_reserved(owner, asset, value);
        }
        info.status = status;
        self.history.push_back(info);
        if self.history.len() > cap {
            self.history.pop_front();
        }
    }
}

/// The per-trader reserved-balance and order-status ledger.
pub struct AddressLedger {
    accounts: DashMap<Address, Arc<Mutex<AddressState>>>,
    history_cap: usize,
    cancel_hook: Mutex<Option<CancelHook>>,
}

impl Default for AddressLedger {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

impl AddressLedger {
    /// Create a ledger keeping up to `history_cap` terminal orders per
    /// address.
    #[must_use]
    pub fn new(history_cap: usize) -> Self {
        Self {
            accounts: DashMap::new(),
            history_cap,
            cancel_hook: Mutex::new(None),
        }
    }

    /// Install the auto-cancel hook. Workers own the book, the ledger only
    /// asks for cancellations through the log; the hook breaks what would
    /// otherwise be a reference cycle.
    pub fn set_cancel_hook(&self, hook: CancelHook) {
        *self.cancel_hook.lock() = Some(hook);
    }

    fn account(&self, owner: &Address) -> Arc<Mutex<AddressState>> {
        self.accounts.entry(*owner).or_default().clone()
    }

    /// The reservation an order locks at placement:
    /// `{spent asset -> spend, fee asset -> fee}`, merged when they
    /// coincide.
    #[must_use]
    pub fn reservation_for(order: &Order) -> Vec<(Asset, u128)> {
        let spend = match order.side {
            Side::Buy => order.price_asset_value(order.amount),
            Side::Sell => order.amount as u128,
        };
        let spent_asset = order.spent_asset();
        if spent_asset == order.fee_asset {
            vec![(spent_asset, spend + order.fee as u128)]
        } else {
            vec![(spent_asset, spend), (order.fee_asset, order.fee as u128)]
        }
    }

    /// Apply a placed order: lock its reservation and start tracking it.
    pub fn order_added(&self, order: &Order, offset: Offset) {
        let order_id = order.id();
        let account = self.account(&order.owner);
        let mut state = account.lock();
        if !state.first_application((order_id, order_id, offset)) {
            return;
        }
        let reserved = Self::reservation_for(order);
        for (asset, value) in &reserved {
            state.add_reserved(*asset, *value);
        }
        state.active.insert(
            order_id,
            OrderInfo {
                order_id,
                pair: order.pair,
                side: order.side,
                price: order.price,
                amount: order.amount,
                fee: order.fee,
                fee_asset: order.fee_asset,
                remaining_amount: order.amount,
                remaining_fee: order.fee,
                placed_offset: offset,
                status: OrderStatus::Accepted,
                reserved,
            },
        );
        debug!(owner = %order.owner, order = %order_id, offset, "order reserved");
    }

    /// Apply one executed trade to both involved addresses.
    pub fn trade_executed(&self, trade: &TradeExecuted) {
        self.apply_fill(
            &trade.taker_owner,
            trade.taker_order_id,
            trade.maker_order_id,
            trade.taker_side,
            trade,
            trade.taker_fee,
        );
        self.apply_fill(
            &trade.maker_owner,
            trade.maker_order_id,
            trade.taker_order_id,
            trade.taker_side.opposite(),
            trade,
            trade.maker_fee,
        );
    }

    fn apply_fill(
        &self,
        owner: &Address,
        order_id: OrderId,
        counter_id: OrderId,
        side: Side,
        trade: &TradeExecuted,
        fee_consumed: u64,
    ) {
        let account = self.account(owner);
        let mut state = account.lock();
        if !state.first_application((order_id, counter_id, trade.offset)) {
            return;
        }
        let Some(mut info) = state.active.remove(&order_id) else {
            warn!(%owner, order = %order_id, "fill for unknown order ignored");
            return;
        };

        let spend_consumed = match side {
            Side::Buy => price_value(trade.amount, trade.price),
            Side::Sell => trade.amount as u128,
        };
        let spend_asset = match side {
            Side::Buy => info.pair.price_asset,
            Side::Sell => info.pair.amount_asset,
        };

        info.remaining_amount = info.remaining_amount.saturating_sub(trade.amount);
        info.remaining_fee = info.remaining_fee.saturating_sub(fee_consumed);
        consume_order_reservation(&mut info.reserved, spend_asset, spend_consumed);
        consume_order_reservation(&mut info.reserved, info.fee_asset, fee_consumed as u128);
        state.sub_reserved(owner, spend_asset, spend_consumed);
        state.sub_reserved(owner, info.fee_asset, fee_consumed as u128);

        let filled_amount = info.amount - info.remaining_amount;
        let filled_fee = info.fee - info.remaining_fee;
        if info.remaining_amount == 0 {
            // Price improvement can leave part of a buy's reservation
            // unconsumed; retiring the order releases it.
            state.retire(
                info,
                OrderStatus::Filled {
                    filled_amount,
                    filled_fee,
                },
                owner,
                self.history_cap,
            );
        } else {
            info.status = OrderStatus::PartiallyFilled {
                filled_amount,
                filled_fee,
            };
            state.active.insert(order_id, info);
        }
    }

    /// Apply a cancellation: release the remaining reservation and move
    /// the order to history.
    pub fn order_canceled(&self, owner: &Address, order_id: OrderId, offset: Offset) {
        let account = self.account(owner);
        let mut state = account.lock();
        if !state.first_application((order_id, OrderId([0u8; 32]), offset)) {
            return;
        }
        let Some(info) = state.active.remove(&order_id) else {
            return;
        };
        let filled_amount = info.amount - info.remaining_amount;
        let filled_fee = info.fee - info.remaining_fee;
        state.retire(
            info,
            OrderStatus::Cancelled {
                filled_amount,
                filled_fee,
            },
            owner,
            self.history_cap,
        );
        debug!(%owner, order = %order_id, offset, "order reservation released");
    }

    /// External notification that `owner`'s spendable balance of `asset`
    /// changed.
    ///
    /// When the new balance no longer covers the reservation, the youngest
    /// orders locking this asset are cancelled (LIFO by placement) until it
    /// does. Cancellations go through the hook into the log, never applied
    /// locally; a repeated notification before they land may re-request the
    /// same orders, which the book's cancel idempotence absorbs.
    pub fn balance_changed(&self, owner: &Address, asset: Asset, new_spendable: u128) {
        let hook = self.cancel_hook.lock().clone();
        let account = self.account(owner);
        let state = account.lock();

        let reserved = state.reserved.get(&asset).copied().unwrap_or(0);
        if reserved <= new_spendable {
            return;
        }

        let mut victims: Vec<&OrderInfo> =
            state.active.values().filter(|o| o.reserves(&asset)).collect();
        victims.sort_by_key(|o| std::cmp::Reverse(o.placed_offset));

        let mut projected = reserved;
        for info in victims {
            if projected <= new_spendable {
                break;
            }
            projected = projected.saturating_sub(info.reserved_total(&asset));
            debug!(%owner, order = %info.order_id, %asset, "auto-cancel requested");
            if let Some(hook) = &hook {
                hook(info.pair, info.order_id, *owner);
            } else {
                warn!(%owner, order = %info.order_id, "auto-cancel dropped: no hook installed");
            }
        }
    }

    /// Reserved balance of `asset` for `owner`.
    #[must_use]
    pub fn reserved(&self, owner: &Address, asset: &Asset) -> u128 {
        self.accounts
            .get(owner)
            .map(|a| a.lock().reserved.get(asset).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// All reserved balances for `owner`.
    #[must_use]
    pub fn reserved_balances(&self, owner: &Address) -> HashMap<Asset, u128> {
        self.accounts
            .get(owner)
            .map(|a| a.lock().reserved.clone())
            .unwrap_or_default()
    }

    /// Active (non-terminal) orders for `owner`.
    #[must_use]
    pub fn active_orders(&self, owner: &Address) -> Vec<OrderInfo> {
        self.accounts
            .get(owner)
            .map(|a| {
                let mut orders: Vec<OrderInfo> = a.lock().active.values().cloned().collect();
                orders.sort_by_key(|o| o.placed_offset);
                orders
            })
            .unwrap_or_default()
    }

    /// The ledger's view of one order's status.
    #[must_use]
    pub fn order_status(&self, owner: &Address, order_id: &OrderId) -> OrderStatus {
        let Some(account) = self.accounts.get(owner) else {
            return OrderStatus::NotFound;
        };
        let state = account.lock();
        if let Some(info) = state.active.get(order_id) {
            return info.status;
        }
        state
            .history
            .iter()
            .rev()
            .find(|o| o.order_id == *order_id)
            .map(|o| o.status)
            .unwrap_or(OrderStatus::NotFound)
    }

    /// Terminal orders for `owner`, oldest first.
    #[must_use]
    pub fn order_history(&self, owner: &Address) -> Vec<OrderInfo> {
        self.accounts
            .get(owner)
            .map(|a| a.lock().history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Sum of every address's reservation of `asset`. Used by the
    /// reservation-safety invariant checks.
    #[must_use]
    pub fn total_reserved(&self, asset: &Asset) -> u128 {
        self.accounts
            .iter()
            .map(|entry| entry.value().lock().reserved.get(asset).copied().unwrap_or(0))
            .sum()
    }
}

/// `amount * price / PRICE_CONSTANT` in u128.
fn price_value(amount: u64, price: u64) -> u128 {
    (amount as u128) * (price as u128) / (PRICE_CONSTANT as u128)
}

fn consume_order_reservation(reserved: &mut [(Asset, u128)], asset: Asset, value: u128) {
    if value == 0 {
        return;
    }
    let mut left = value;
    for (a, held) in reserved.iter_mut() {
        if *a == asset {
            let take = left.min(*held);
            *held -= take;
            left -= take;
            if left == 0 {
                return;
            }
        }
    }
}
