//! Shared fixtures for the integration suite.

use dexmatch::prelude::*;
use dexmatch::order::MAX_ORDER_LIFETIME_MS;

/// The amount asset used across the suite.
pub fn amount_asset() -> Asset {
    Asset::Issued([7u8; 32])
}

/// The standard test pair: an issued amount asset priced in the native
/// asset.
pub fn pair() -> AssetPair {
    AssetPair::new(amount_asset(), Asset::Native).unwrap()
}

/// A deterministic trader address.
pub fn trader(tag: u8) -> Address {
    Address([tag; 32])
}

/// Build a v3 order. `nonce` lands in the timestamp so otherwise-equal
/// orders get distinct ids.
pub fn order(owner: Address, side: Side, price: u64, amount: u64, nonce: u64) -> Order {
    let timestamp = 1_700_000_000_000 + nonce;
    Order {
        version: 3,
        owner,
        matcher: Address([0xEE; 32]),
        pair: pair(),
        side,
        price,
        amount,
        timestamp,
        expiration: timestamp + MAX_ORDER_LIFETIME_MS / 2,
        fee: 300_000,
        fee_asset: Asset::Native,
        signature: Signature::zero(),
    }
}

/// An order freshly timestamped so validator expiry checks pass.
pub fn live_order(owner: Address, side: Side, price: u64, amount: u64, nonce: u64) -> Order {
    let now = current_time_millis();
    let mut order = order(owner, side, price, amount, nonce);
    order.timestamp = now + nonce;
    order.expiration = now + 3_600_000;
    order
}
