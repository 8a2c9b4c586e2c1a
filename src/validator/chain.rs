//! The blockchain-client contract and the shared asset-metadata cache.
//!
//! Balance lookups, asset metadata, and script evaluation live in an
//! external node; only the contract is defined here. [`MockChainClient`]
//! implements it in-process for tests and single-node experiments.

use crate::assets::{Address, Asset};
use crate::order::Order;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

/// Metadata the engine needs about an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetMeta {
    /// Issuer-assigned display name.
    pub name: String,
    /// Decimal places of the asset's minor unit.
    pub decimals: u8,
    /// Whether a script guards transfers of this asset.
    pub has_script: bool,
}

/// Decimals of the native asset.
pub const NATIVE_DECIMALS: u8 = 8;

impl AssetMeta {
    /// The native asset's fixed metadata.
    #[must_use]
    pub fn native() -> Self {
        Self {
            name: "NATIVE".to_string(),
            decimals: NATIVE_DECIMALS,
            has_script: false,
        }
    }
}

/// Failures talking to the blockchain node.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChainError {
    /// The node did not answer in time; transient, retried by the caller.
    #[error("blockchain client timeout")]
    Timeout,
    /// Any other node failure.
    #[error("blockchain client error: {0}")]
    Other(String),
}

/// Read-only view of the settlement chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Metadata for `asset`, `None` when the chain does not know it.
    async fn asset_meta(&self, asset: &Asset) -> Result<Option<AssetMeta>, ChainError>;

    /// `owner`'s spendable (unreserved, unleased) balance of `asset`.
    async fn spendable_balance(&self, owner: &Address, asset: &Asset)
    -> Result<u128, ChainError>;

    /// Whether the asset's script rejects trading `order`.
    async fn asset_script_denies(&self, asset: &Asset, order: &Order)
    -> Result<bool, ChainError>;

    /// Whether the matcher account's script rejects `order`.
    async fn matcher_script_denies(&self, order: &Order) -> Result<bool, ChainError>;
}

/// Shared-read cache of asset metadata.
///
/// Entries are immutable once inserted; concurrent first lookups of the
/// same asset may fetch twice, with the loser's insert discarded, so
/// readers always observe a single stable value.
#[derive(Default)]
pub struct AssetMetaCache {
    entries: DashMap<Asset, Arc<AssetMeta>>,
}

impl AssetMetaCache {
    /// An empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached metadata, if this asset was resolved before.
    #[must_use]
    pub fn get(&self, asset: &Asset) -> Option<Arc<AssetMeta>> {
        if asset.is_native() {
            return Some(Arc::new(AssetMeta::native()));
        }
        self.entries.get(asset).map(|e| e.value().clone())
    }

    /// Resolve metadata through `chain`, caching the answer.
    pub async fn get_or_fetch(
        &self,
        chain: &dyn ChainClient,
        asset: &Asset,
    ) -> Result<Option<Arc<AssetMeta>>, ChainError> {
        if let Some(hit) = self.get(asset) {
            return Ok(Some(hit));
        }
        let Some(meta) = chain.asset_meta(asset).await? else {
            return Ok(None);
        };
        let entry = self
            .entries
            .entry(*asset)
            .or_insert_with(|| Arc::new(meta))
            .clone();
        Ok(Some(entry))
    }
}

/// In-process [`ChainClient`] for tests: every asset is known with eight
/// decimals and every balance is unlimited until told otherwise.
#[derive(Default)]
pub struct MockChainClient {
    balances: DashMap<(Address, Asset), u128>,
    assets: DashMap<Asset, AssetMeta>,
    unknown_assets: DashMap<Asset, ()>,
    denying_asset_scripts: DashMap<Asset, ()>,
    matcher_script_denies: std::sync::atomic::AtomicBool,
}

impl MockChainClient {
    /// A permissive client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fix `owner`'s spendable balance of `asset`.
    pub fn set_balance(&self, owner: Address, asset: Asset, balance: u128) {
        self.balances.insert((owner, asset), balance);
    }

    /// Register explicit metadata for `asset`.
    pub fn register_asset(&self, asset: Asset, meta: AssetMeta) {
        self.unknown_assets.remove(&asset);
        self.assets.insert(asset, meta);
    }

    /// Make `asset` unknown to the chain.
    pub fn forget_asset(&self, asset: Asset) {
        self.assets.remove(&asset);
        self.unknown_assets.insert(asset, ());
    }

    /// Make `asset`'s script reject every order.
    pub fn deny_asset_script(&self, asset: Asset) {
        self.denying_asset_scripts.insert(asset, ());
    }

    /// Make the matcher account's script reject every order.
    pub fn deny_matcher_script(&self, deny: bool) {
        self.matcher_script_denies
            .store(deny, std::sync::atomic::Ordering::Release);
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn asset_meta(&self, asset: &Asset) -> Result<Option<AssetMeta>, ChainError> {
        if asset.is_native() {
            return Ok(Some(AssetMeta::native()));
        }
        if self.unknown_assets.contains_key(asset) {
            return Ok(None);
        }
        Ok(Some(self.assets.get(asset).map(|m| m.clone()).unwrap_or(
            AssetMeta {
                name: format!("asset-{asset}"),
                decimals: 8,
                has_script: self.denying_asset_scripts.contains_key(asset),
            },
        )))
    }

    async fn spendable_balance(
        &self,
        owner: &Address,
        asset: &Asset,
    ) -> Result<u128, ChainError> {
        Ok(self
            .balances
            .get(&(*owner, *asset))
            .map(|b| *b)
            .unwrap_or(u128::MAX))
    }

    async fn asset_script_denies(
        &self,
        asset: &Asset,
        _order: &Order,
    ) -> Result<bool, ChainError> {
        Ok(self.denying_asset_scripts.contains_key(asset))
    }

    async fn matcher_script_denies(&self, _order: &Order) -> Result<bool, ChainError> {
        Ok(self
            .matcher_script_denies
            .load(std::sync::atomic::Ordering::Acquire))
    }
}
