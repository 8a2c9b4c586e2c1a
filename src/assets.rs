//! Assets, asset pairs, and trader addresses.
//!
//! An [`Asset`] is either the chain's native asset or an issued asset
//! identified by a 32-byte content hash. A canonical byte ordering exists on
//! assets: the native asset sorts before all issued assets, and issued
//! assets sort by unsigned lexicographic byte comparison. The ordering is
//! what makes [`AssetPair`] orientation deterministic across nodes.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Length in bytes of issued-asset ids, order ids, and addresses.
pub const HASH_LEN: usize = 32;

/// An asset tradable on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Asset {
    /// The chain's native asset. Has no id bytes of its own.
    Native,
    /// An issued asset, identified by the 32-byte hash of its issue
    /// transaction.
    Issued([u8; HASH_LEN]),
}

impl Asset {
    /// Wire encoding: a presence flag byte, followed by the 32-byte id for
    /// issued assets. The native asset encodes as the single byte `0`.
    pub fn write_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Asset::Native => out.push(0),
            Asset::Issued(id) => {
                out.push(1);
                out.extend_from_slice(id);
            }
        }
    }

    /// Decode an asset from `buf` starting at `*pos`, advancing `*pos`.
    pub fn read_bytes(buf: &[u8], pos: &mut usize) -> Option<Asset> {
        let flag = *buf.get(*pos)?;
        *pos += 1;
        match flag {
            0 => Some(Asset::Native),
            1 => {
                let end = pos.checked_add(HASH_LEN)?;
                let id: [u8; HASH_LEN] = buf.get(*pos..end)?.try_into().ok()?;
                *pos = end;
                Some(Asset::Issued(id))
            }
            _ => None,
        }
    }

    /// Canonical ordering: native first, then issued ids compared as
    /// unsigned byte strings. `derive(Ord)` on the enum already produces
    /// exactly this order; the named method keeps call sites explicit.
    #[must_use]
    pub fn canonical_cmp(&self, other: &Asset) -> Ordering {
        self.cmp(other)
    }

    /// `true` for [`Asset::Native`].
    #[must_use]
    #[inline]
    pub fn is_native(&self) -> bool {
        matches!(self, Asset::Native)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => write!(f, "NATIVE"),
            Asset::Issued(id) => write!(f, "{}", hex::encode(id)),
        }
    }
}

/// An ordered pair of distinct assets; the identity of one order book.
///
/// `amount_asset` is the asset being bought or sold; `price_asset` is the
/// asset prices are quoted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetPair {
    /// The asset whose quantity the order's `amount` counts.
    pub amount_asset: Asset,
    /// The asset the order's `price` is denominated in.
    pub price_asset: Asset,
}

impl AssetPair {
    /// Build a pair, rejecting `amount == price`.
    pub fn new(amount_asset: Asset, price_asset: Asset) -> Option<Self> {
        if amount_asset == price_asset {
            return None;
        }
        Some(Self {
            amount_asset,
            price_asset,
        })
    }

    /// Wire encoding of the pair: amount asset then price asset, each as a
    /// flag + optional 32-byte id. This byte string is also the sharding
    /// key for the distributed event log.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + 2 * HASH_LEN);
        self.amount_asset.write_bytes(&mut out);
        self.price_asset.write_bytes(&mut out);
        out
    }

    /// Decode a pair from `buf` at `*pos`, advancing `*pos`.
    pub fn read_bytes(buf: &[u8], pos: &mut usize) -> Option<AssetPair> {
        let amount_asset = Asset::read_bytes(buf, pos)?;
        let price_asset = Asset::read_bytes(buf, pos)?;
        AssetPair::new(amount_asset, price_asset)
    }

    /// Whether this pair is in canonical orientation under the configured
    /// price-asset overlay.
    ///
    /// The overlay is an ordered list of preferred price assets: the first
    /// of the two assets found in the list becomes the price asset. When
    /// neither is listed, canonical byte ordering decides — the smaller
    /// asset is the price asset, so `price_asset < amount_asset`.
    #[must_use]
    pub fn is_canonical(&self, price_assets: &[Asset]) -> bool {
        let amount_rank = price_assets.iter().position(|a| *a == self.amount_asset);
        let price_rank = price_assets.iter().position(|a| *a == self.price_asset);
        match (amount_rank, price_rank) {
            (Some(a), Some(p)) => p < a,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => self.price_asset.canonical_cmp(&self.amount_asset) == Ordering::Less,
        }
    }

    /// The pair with its assets swapped.
    #[must_use]
    pub fn flipped(&self) -> AssetPair {
        AssetPair {
            amount_asset: self.price_asset,
            price_asset: self.amount_asset,
        }
    }

    /// `true` when `asset` is one of the two legs.
    #[must_use]
    pub fn contains(&self, asset: &Asset) -> bool {
        self.amount_asset == *asset || self.price_asset == *asset
    }
}

impl fmt::Display for AssetPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.amount_asset, self.price_asset)
    }
}

/// A trader's account address (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(pub [u8; HASH_LEN]);

impl Address {
    /// The all-zero address, used as the anonymous placeholder in tests.
    #[must_use]
    pub fn zero() -> Self {
        Address([0u8; HASH_LEN])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
