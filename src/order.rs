//! Signed limit orders and their stable binary format.
//!
//! The byte layout is stable across order versions 1–3 and is what the
//! order id commits to: `id = blake2b256(unsigned_payload)`, where the
//! unsigned payload is every field except the trailing signature.
//!
//! Layout (big-endian integers):
//!
//! ```text
//! [1B version][32B sender key][32B matcher key]
//! [amount asset: 1B flag (+32B id)][price asset: 1B flag (+32B id)]
//! [1B order type][8B price][8B amount][8B timestamp][8B expiration][8B fee]
//! [version 3 only: fee asset flag (+32B id)]
//! [64B signature]
//! ```

use crate::assets::{Address, Asset, AssetPair, HASH_LEN};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

type Blake2b256 = Blake2b<U32>;

/// Maximum distance between an order's creation and its expiration.
pub const MAX_ORDER_LIFETIME_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Length of the detached signature trailing every order.
pub const SIGNATURE_LEN: usize = 64;

/// Order versions this engine admits at the codec level. The validator
/// narrows this further through `allowed_order_versions`.
pub const KNOWN_ORDER_VERSIONS: [u8; 3] = [1, 2, 3];

/// Which side of the book an order rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Side {
    /// Bid: buys the amount asset, spends the price asset.
    Buy = 0,
    /// Ask: sells the amount asset, receives the price asset.
    Sell = 1,
}

impl Side {
    /// The opposite side of the book.
    #[must_use]
    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// A 32-byte order identifier, derived from the order's unsigned payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub [u8; HASH_LEN]);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A detached 64-byte signature over the unsigned payload.
///
/// Verification is delegated to the host's crypto collaborator; the engine
/// only carries the bytes through.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; SIGNATURE_LEN]);

impl Signature {
    /// The all-zero signature, useful in tests.
    #[must_use]
    pub fn zero() -> Self {
        Signature([0u8; SIGNATURE_LEN])
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(self.0))
    }
}

/// An immutable signed limit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Binary format version, 1..=3. Version 3 adds `fee_asset`.
    pub version: u8,
    /// The order owner's 32-byte public key.
    pub owner: Address,
    /// The exchange's 32-byte public key the order was addressed to.
    pub matcher: Address,
    /// The book this order belongs to.
    pub pair: AssetPair,
    /// Buy or sell.
    pub side: Side,
    /// Limit price in price-asset units per [`PRICE_CONSTANT`] amount-asset
    /// units. Strictly positive, at most `i64::MAX`.
    pub price: u64,
    /// Order quantity in amount-asset units. Strictly positive.
    pub amount: u64,
    /// Client-assigned creation time, milliseconds since epoch.
    pub timestamp: u64,
    /// Expiration time, milliseconds since epoch.
    pub expiration: u64,
    /// Fee offered to the exchange, in `fee_asset` units. Strictly positive.
    pub fee: u64,
    /// The asset the fee is denominated in. Versions 1 and 2 always pay in
    /// the native asset.
    pub fee_asset: Asset,
    /// Detached signature over the unsigned payload.
    pub signature: Signature,
}

/// Prices are quoted per this many amount-asset units.
pub const PRICE_CONSTANT: u64 = 100_000_000;

impl Order {
    /// The order id: blake2b-256 of the unsigned payload.
    #[must_use]
    pub fn id(&self) -> OrderId {
        let mut hasher = Blake2b256::new();
        hasher.update(self.to_sign_bytes());
        OrderId(hasher.finalize().into())
    }

    /// Serialize the unsigned payload (everything except the signature).
    #[must_use]
    pub fn to_sign_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256);
        out.push(self.version);
        out.extend_from_slice(&self.owner.0);
        out.extend_from_slice(&self.matcher.0);
        self.pair.amount_asset.write_bytes(&mut out);
        self.pair.price_asset.write_bytes(&mut out);
        out.push(self.side as u8);
        out.extend_from_slice(&(self.price as i64).to_be_bytes());
        out.extend_from_slice(&self.amount.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.expiration.to_be_bytes());
        out.extend_from_slice(&self.fee.to_be_bytes());
        if self.version >= 3 {
            self.fee_asset.write_bytes(&mut out);
        }
        out
    }

    /// Serialize the full order, signature included.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.to_sign_bytes();
        out.extend_from_slice(&self.signature.0);
        out
    }

    /// Decode an order from `buf` starting at `*pos`, advancing `*pos`.
    ///
    /// Structural checks only (field ranges, version shape); policy checks
    /// such as expiry and tick size belong to the validator.
    pub fn read_bytes(buf: &[u8], pos: &mut usize) -> Result<Order, OrderCodecError> {
        let version = take_u8(buf, pos)?;
        if !KNOWN_ORDER_VERSIONS.contains(&version) {
            return Err(OrderCodecError::UnknownVersion(version));
        }
        let owner = Address(take_hash(buf, pos)?);
        let matcher = Address(take_hash(buf, pos)?);
        let amount_asset =
            Asset::read_bytes(buf, pos).ok_or(OrderCodecError::MalformedAssetId)?;
        let price_asset =
            Asset::read_bytes(buf, pos).ok_or(OrderCodecError::MalformedAssetId)?;
        let pair =
            AssetPair::new(amount_asset, price_asset).ok_or(OrderCodecError::DegeneratePair)?;
        let side = match take_u8(buf, pos)? {
            0 => Side::Buy,
            1 => Side::Sell,
            other => return Err(OrderCodecError::UnknownOrderType(other)),
        };
        let raw_price = i64::from_be_bytes(take_8(buf, pos)?);
        if raw_price <= 0 {
            return Err(OrderCodecError::NonPositiveField("price"));
        }
        let price = raw_price as u64;
        let amount = u64::from_be_bytes(take_8(buf, pos)?);
        if amount == 0 {
            return Err(OrderCodecError::NonPositiveField("amount"));
        }
        let timestamp = u64::from_be_bytes(take_8(buf, pos)?);
        let expiration = u64::from_be_bytes(take_8(buf, pos)?);
        if timestamp > expiration {
            return Err(OrderCodecError::TimestampAfterExpiration);
        }
        let fee = u64::from_be_bytes(take_8(buf, pos)?);
        if fee == 0 {
            return Err(OrderCodecError::NonPositiveField("fee"));
        }
        let fee_asset = if version >= 3 {
            Asset::read_bytes(buf, pos).ok_or(OrderCodecError::MalformedAssetId)?
        } else {
            Asset::Native
        };
        // amount * price must fit a 128-bit accumulator; with both fields
        // <= i64::MAX the product always does, so only the per-field range
        // checks above are needed.
        let sig_end = pos
            .checked_add(SIGNATURE_LEN)
            .ok_or(OrderCodecError::Truncated)?;
        let signature: [u8; SIGNATURE_LEN] = buf
            .get(*pos..sig_end)
            .ok_or(OrderCodecError::Truncated)?
            .try_into()
            .map_err(|_| OrderCodecError::Truncated)?;
        *pos = sig_end;

        Ok(Order {
            version,
            owner,
            matcher,
            pair,
            side,
            price,
            amount,
            timestamp,
            expiration,
            fee,
            fee_asset,
            signature: Signature(signature),
        })
    }

    /// Decode an order occupying the whole of `buf`.
    pub fn from_bytes(buf: &[u8]) -> Result<Order, OrderCodecError> {
        let mut pos = 0;
        let order = Order::read_bytes(buf, &mut pos)?;
        if pos != buf.len() {
            return Err(OrderCodecError::TrailingBytes(buf.len() - pos));
        }
        Ok(order)
    }

    /// The asset this order spends (excluding the fee).
    #[must_use]
    pub fn spent_asset(&self) -> Asset {
        match self.side {
            Side::Buy => self.pair.price_asset,
            Side::Sell => self.pair.amount_asset,
        }
    }

    /// The asset this order receives.
    #[must_use]
    pub fn received_asset(&self) -> Asset {
        match self.side {
            Side::Buy => self.pair.amount_asset,
            Side::Sell => self.pair.price_asset,
        }
    }

    /// Price-asset value of `amount` units at this order's price.
    ///
    /// Prices are per [`PRICE_CONSTANT`] amount-asset units, so the spend
    /// for a buy is `amount * price / PRICE_CONSTANT`.
    #[must_use]
    pub fn price_asset_value(&self, amount: u64) -> u128 {
        (amount as u128) * (self.price as u128) / (PRICE_CONSTANT as u128)
    }
}

fn take_u8(buf: &[u8], pos: &mut usize) -> Result<u8, OrderCodecError> {
    let b = *buf.get(*pos).ok_or(OrderCodecError::Truncated)?;
    *pos += 1;
    Ok(b)
}

fn take_8(buf: &[u8], pos: &mut usize) -> Result<[u8; 8], OrderCodecError> {
    let end = pos.checked_add(8).ok_or(OrderCodecError::Truncated)?;
    let bytes: [u8; 8] = buf
        .get(*pos..end)
        .ok_or(OrderCodecError::Truncated)?
        .try_into()
        .map_err(|_| OrderCodecError::Truncated)?;
    *pos = end;
    Ok(bytes)
}

fn take_hash(buf: &[u8], pos: &mut usize) -> Result<[u8; HASH_LEN], OrderCodecError> {
    let end = pos.checked_add(HASH_LEN).ok_or(OrderCodecError::Truncated)?;
    let bytes: [u8; HASH_LEN] = buf
        .get(*pos..end)
        .ok_or(OrderCodecError::Truncated)?
        .try_into()
        .map_err(|_| OrderCodecError::Truncated)?;
    *pos = end;
    Ok(bytes)
}

/// Structural decoding failures for the order binary format.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum OrderCodecError {
    /// The buffer ended before the field being read.
    #[error("order bytes truncated")]
    Truncated,
    /// The version byte is outside 1..=3.
    #[error("unknown order version {0}")]
    UnknownVersion(u8),
    /// An asset flag byte was neither 0 nor 1.
    #[error("malformed asset id")]
    MalformedAssetId,
    /// The amount and price assets are the same.
    #[error("amount asset equals price asset")]
    DegeneratePair,
    /// The order-type byte was neither buy nor sell.
    #[error("unknown order type {0}")]
    UnknownOrderType(u8),
    /// A field that must be strictly positive was zero or negative.
    #[error("non-positive {0}")]
    NonPositiveField(&'static str),
    /// `timestamp > expiration`.
    #[error("timestamp after expiration")]
    TimestampAfterExpiration,
    /// `from_bytes` found bytes after the signature.
    #[error("{0} trailing bytes after order")]
    TrailingBytes(usize),
}

/// The lifecycle status of an order as seen by the engine.
///
/// Transitions are monotonic: `Accepted -> PartiallyFilled -> Filled`
/// or `-> Cancelled`; `NotFound` never follows any other state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Resting in the book, no fills yet.
    Accepted,
    /// Resting with some quantity executed.
    PartiallyFilled {
        /// Amount-asset units executed so far.
        filled_amount: u64,
        /// Fee units consumed so far.
        filled_fee: u64,
    },
    /// Fully executed; terminal.
    Filled {
        /// Total amount executed (equals the order amount).
        filled_amount: u64,
        /// Total fee consumed.
        filled_fee: u64,
    },
    /// Removed before full execution; terminal.
    Cancelled {
        /// Amount executed before cancellation.
        filled_amount: u64,
        /// Fee consumed before cancellation.
        filled_fee: u64,
    },
    /// The engine has no record of the order.
    NotFound,
}

impl OrderStatus {
    /// `true` for `Filled` and `Cancelled`.
    #[must_use]
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Filled { .. } | OrderStatus::Cancelled { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_order(version: u8) -> Order {
        let pair = AssetPair::new(Asset::Issued([7u8; HASH_LEN]), Asset::Native).unwrap();
        Order {
            version,
            owner: Address([1u8; HASH_LEN]),
            matcher: Address([2u8; HASH_LEN]),
            pair,
            side: Side::Buy,
            price: 500_000,
            amount: 1_000,
            timestamp: 1_700_000_000_000,
            expiration: 1_700_000_500_000,
            fee: 300_000,
            fee_asset: Asset::Native,
            signature: Signature::zero(),
        }
    }

    #[test]
    fn codec_round_trip_all_versions() {
        for version in KNOWN_ORDER_VERSIONS {
            let order = sample_order(version);
            let decoded = Order::from_bytes(&order.to_bytes()).unwrap();
            assert_eq!(decoded, order, "version {version}");
        }
    }

    #[test]
    fn v3_carries_fee_asset() {
        let mut order = sample_order(3);
        order.fee_asset = Asset::Issued([9u8; HASH_LEN]);
        let decoded = Order::from_bytes(&order.to_bytes()).unwrap();
        assert_eq!(decoded.fee_asset, order.fee_asset);
        // v1 encoding has no fee-asset slot, so the field never survives.
        let v1 = sample_order(1);
        assert_eq!(
            v1.to_bytes().len() + 1,
            sample_order(3).to_bytes().len(),
            "v3 native fee asset adds exactly the flag byte"
        );
    }

    #[test]
    fn id_commits_to_unsigned_payload_only() {
        let order = sample_order(2);
        let mut resigned = order.clone();
        resigned.signature = Signature([5u8; SIGNATURE_LEN]);
        assert_eq!(order.id(), resigned.id());

        let mut repriced = order.clone();
        repriced.price += 1;
        assert_ne!(order.id(), repriced.id());
    }

    #[test]
    fn rejects_malformed_fields() {
        let order = sample_order(2);
        let mut bytes = order.to_bytes();
        bytes[0] = 9;
        assert_eq!(
            Order::from_bytes(&bytes),
            Err(OrderCodecError::UnknownVersion(9))
        );

        let mut zero_amount = sample_order(2);
        zero_amount.amount = 0;
        assert!(matches!(
            Order::from_bytes(&zero_amount.to_bytes()),
            Err(OrderCodecError::NonPositiveField("amount"))
        ));

        let mut truncated = order.to_bytes();
        truncated.truncate(truncated.len() - 1);
        assert_eq!(
            Order::from_bytes(&truncated),
            Err(OrderCodecError::Truncated)
        );
    }

    #[test]
    fn status_terminality() {
        assert!(!OrderStatus::Accepted.is_terminal());
        assert!(
            OrderStatus::Filled {
                filled_amount: 1,
                filled_fee: 1
            }
            .is_terminal()
        );
        assert!(
            OrderStatus::Cancelled {
                filled_amount: 0,
                filled_fee: 0
            }
            .is_terminal()
        );
        assert!(!OrderStatus::NotFound.is_terminal());
    }

    #[test]
    fn spent_and_received_assets() {
        let buy = sample_order(2);
        assert_eq!(buy.spent_asset(), buy.pair.price_asset);
        assert_eq!(buy.received_asset(), buy.pair.amount_asset);
        let mut sell = sample_order(2);
        sell.side = Side::Sell;
        assert_eq!(sell.spent_asset(), sell.pair.amount_asset);
        assert_eq!(sell.received_asset(), sell.pair.price_asset);
    }

    #[test]
    fn price_asset_value_uses_price_constant() {
        let order = sample_order(2);
        // 1000 units at price 500_000 per 10^8 units.
        assert_eq!(order.price_asset_value(1_000), 5);
        let mut big = sample_order(2);
        big.price = 500_000;
        big.amount = 100_000_000_000; // 1000 "whole" units of 10^8
        assert_eq!(big.price_asset_value(big.amount), 500_000_000);
    }
}
