//! Pre-admission order validation.
//!
//! The validator gates every order before it reaches the event log. The
//! synchronous pass is pure policy over in-memory state (settings, best
//! bid/ask, tick); the asynchronous pass consults the blockchain client
//! for asset existence, scripts, and balances. Once an order is appended,
//! no further validation happens — application is unconditional.

mod chain;
mod error;

pub use chain::{
    AssetMeta, AssetMetaCache, ChainClient, ChainError, MockChainClient, NATIVE_DECIMALS,
};
pub use error::{ErrorPayload, ValidationError};

use crate::assets::{Asset, AssetPair};
use crate::book::MarketStatus;
use crate::ledger::AddressLedger;
use crate::order::{MAX_ORDER_LIFETIME_MS, Order, PRICE_CONSTANT, Side};
use crate::settings::{FeeAssetType, MatcherSettings, OrderFeeSettings};
use bitflags::bitflags;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// How far in the future an order's timestamp may run ahead of the
/// validator's clock.
pub const CLOCK_SKEW_TOLERANCE_MS: u64 = 60_000;

bitflags! {
    /// Per-pair kill switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MarketFlags: u8 {
        /// New orders are refused.
        const PLACING_DISABLED = 1;
        /// Cancellations are refused.
        const CANCELLING_DISABLED = 1 << 1;
    }
}

/// Verifies order signatures. The cryptographic primitive lives with the
/// host; the engine only needs the verdict.
pub trait SignatureVerifier: Send + Sync {
    /// `true` when `order.signature` verifies against `order.owner`.
    fn verify(&self, order: &Order) -> bool;
}

/// A verifier that trusts everything. For tests and trusted front-ends
/// that verify upstream.
pub struct AcceptAllSignatures;

impl SignatureVerifier for AcceptAllSignatures {
    fn verify(&self, _order: &Order) -> bool {
        true
    }
}

/// The order validator.
pub struct Validator {
    settings: Arc<MatcherSettings>,
    chain: Arc<dyn ChainClient>,
    signatures: Arc<dyn SignatureVerifier>,
    meta_cache: AssetMetaCache,
    market_flags: DashMap<AssetPair, MarketFlags>,
}

impl Validator {
    /// Build a validator over the given collaborators.
    #[must_use]
    pub fn new(
        settings: Arc<MatcherSettings>,
        chain: Arc<dyn ChainClient>,
        signatures: Arc<dyn SignatureVerifier>,
    ) -> Self {
        Self {
            settings,
            chain,
            signatures,
            meta_cache: AssetMetaCache::new(),
            market_flags: DashMap::new(),
        }
    }

    /// Raise or clear kill switches for a pair.
    pub fn set_market_flags(&self, pair: AssetPair, flags: MarketFlags) {
        if flags.is_empty() {
            self.market_flags.remove(&pair);
        } else {
            self.market_flags.insert(pair, flags);
        }
    }

    /// The active kill switches for a pair.
    #[must_use]
    pub fn market_flags(&self, pair: &AssetPair) -> MarketFlags {
        self.market_flags.get(pair).map(|f| *f).unwrap_or_default()
    }

    /// The shared asset-metadata cache.
    #[must_use]
    pub fn meta_cache(&self) -> &AssetMetaCache {
        &self.meta_cache
    }

    /// The synchronous admission gate.
    ///
    /// `market` is the pair's current best bid/ask, `tick_size` the rule
    /// active at the log's head, `would_self_trade` the book's answer for
    /// this order's owner and quantized price.
    pub fn validate_sync(
        &self,
        order: &Order,
        market: &MarketStatus,
        tick_size: u64,
        now_ms: u64,
        would_self_trade: bool,
    ) -> Result<(), ValidationError> {
        if !self.signatures.verify(order) {
            return Err(ValidationError::InvalidSignature);
        }

        if order.expiration <= now_ms
            || order.timestamp > now_ms + CLOCK_SKEW_TOLERANCE_MS
        {
            return Err(ValidationError::OrderOutdated {
                expiration: order.expiration,
                now: now_ms,
            });
        }
        if order.expiration.saturating_sub(now_ms) > MAX_ORDER_LIFETIME_MS {
            return Err(ValidationError::OrderLifetimeExceeded {
                max_lifetime_ms: MAX_ORDER_LIFETIME_MS,
            });
        }

        for asset in [order.pair.amount_asset, order.pair.price_asset] {
            if self.settings.blacklisted_assets.contains(&asset) {
                return Err(ValidationError::AssetPairIsDenylisted { asset });
            }
        }
        if !order.pair.is_canonical(&self.settings.price_assets) {
            return Err(ValidationError::AssetPairReversed {
                expected_price_asset: order.pair.amount_asset,
            });
        }

        if self.settings.blacklisted_addresses.contains(&order.owner) {
            return Err(ValidationError::AddressIsBlacklisted {
                address: order.owner,
            });
        }

        if !self.settings.allowed_order_versions.contains(&order.version) {
            return Err(ValidationError::OrderVersionDenied {
                version: order.version,
                allowed: self.settings.allowed_order_versions.clone(),
            });
        }

        let allowed_fee_assets = self.allowed_fee_assets(order);
        if !allowed_fee_assets.contains(&order.fee_asset) {
            return Err(ValidationError::UnexpectedFeeAsset {
                fee_asset: order.fee_asset,
                allowed: allowed_fee_assets,
            });
        }

        let required_fee = self.required_fee(order);
        if order.fee < required_fee {
            return Err(ValidationError::FeeNotEnough {
                fee: order.fee,
                required: required_fee,
                fee_asset: order.fee_asset,
            });
        }

        if tick_size > 1 && order.price % tick_size != 0 {
            return Err(ValidationError::PriceTickIsInvalid {
                price: order.price,
                tick_size,
            });
        }

        if self.settings.max_price_deviations.enable {
            self.check_price_deviation(order, market)?;
            self.check_fee_deviation(order, market)?;
        }

        if self
            .market_flags(&order.pair)
            .contains(MarketFlags::PLACING_DISABLED)
        {
            return Err(ValidationError::MarketStatusMismatch);
        }

        if !self.settings.allow_self_trades && would_self_trade {
            return Err(ValidationError::SelfTrade);
        }

        Ok(())
    }

    /// The asynchronous admission gate: asset existence and names, script
    /// verdicts, and balance coverage. Runs after [`Self::validate_sync`]
    /// and before the log append.
    pub async fn validate_async(
        &self,
        order: &Order,
        ledger: &AddressLedger,
    ) -> Result<(), ValidationError> {
        let mut assets = vec![order.pair.amount_asset, order.pair.price_asset];
        if !assets.contains(&order.fee_asset) {
            assets.push(order.fee_asset);
        }

        for asset in &assets {
            let meta = self
                .meta_cache
                .get_or_fetch(self.chain.as_ref(), asset)
                .await
                .map_err(chain_unavailable)?
                .ok_or(ValidationError::AssetNotFound { asset: *asset })?;

            let name = meta.name.to_lowercase();
            if self
                .settings
                .blacklisted_names
                .iter()
                .any(|banned| !banned.is_empty() && name.contains(&banned.to_lowercase()))
            {
                return Err(ValidationError::AssetPairIsDenylisted { asset: *asset });
            }

            if meta.has_script
                && !asset.is_native()
                && self
                    .chain
                    .asset_script_denies(asset, order)
                    .await
                    .map_err(chain_unavailable)?
            {
                return Err(ValidationError::OrderAssetScriptDenied { asset: *asset });
            }
        }

        if self
            .chain
            .matcher_script_denies(order)
            .await
            .map_err(chain_unavailable)?
        {
            return Err(ValidationError::MatcherAccountScriptDenied);
        }

        for (asset, required) in AddressLedger::reservation_for(order) {
            let available = self
                .chain
                .spendable_balance(&order.owner, &asset)
                .await
                .map_err(chain_unavailable)?;
            let already_reserved = ledger.reserved(&order.owner, &asset);
            let total_required = already_reserved.saturating_add(required);
            if available < total_required {
                return Err(ValidationError::BalanceNotEnough {
                    asset,
                    required: total_required,
                    available,
                });
            }
        }

        debug!(order = %order.id(), "order passed validation");
        Ok(())
    }

    /// Fee assets the policy accepts for this order.
    fn allowed_fee_assets(&self, order: &Order) -> Vec<Asset> {
        match &self.settings.order_fee {
            OrderFeeSettings::Fixed { asset, .. } => vec![*asset],
            OrderFeeSettings::Percent { asset_type, .. } => {
                vec![fee_value_asset(order, *asset_type)]
            }
        }
    }

    /// The minimum fee for this order under the active policy, in the
    /// order's fee asset.
    #[must_use]
    pub fn required_fee(&self, order: &Order) -> u64 {
        match &self.settings.order_fee {
            OrderFeeSettings::Fixed { min_fee, .. } => *min_fee,
            OrderFeeSettings::Percent {
                asset_type,
                min_fee,
            } => {
                let value_asset = fee_value_asset(order, *asset_type);
                let value = order_value_units(order, *asset_type);
                let value_decimals = self.decimals_of(&value_asset);
                let fee_decimals = self.decimals_of(&order.fee_asset);
                percent_fee(value, *min_fee, value_decimals, fee_decimals)
            }
        }
    }

    fn decimals_of(&self, asset: &Asset) -> u8 {
        self.meta_cache
            .get(asset)
            .map(|m| m.decimals)
            .unwrap_or(NATIVE_DECIMALS)
    }

    fn check_price_deviation(
        &self,
        order: &Order,
        market: &MarketStatus,
    ) -> Result<(), ValidationError> {
        let dev = self.settings.max_price_deviations;
        let (lower_percent, upper_percent) = match order.side {
            Side::Buy => (100u32.saturating_sub(dev.profit), 100 + dev.loss),
            Side::Sell => (100u32.saturating_sub(dev.loss), 100 + dev.profit),
        };

        let reject = || ValidationError::DeviantOrderPrice {
            side: order.side,
            price: order.price,
            lower_percent,
            upper_percent,
            best_bid: market.best_bid,
            best_ask: market.best_ask,
        };

        if let Some(best_bid) = market.best_bid {
            let lower = (best_bid as u128) * (lower_percent as u128) / 100;
            if (order.price as u128) < lower {
                return Err(reject());
            }
        }
        if let Some(best_ask) = market.best_ask {
            let upper = (best_ask as u128) * (upper_percent as u128) / 100;
            if (order.price as u128) > upper {
                return Err(reject());
            }
        }
        Ok(())
    }

    fn check_fee_deviation(
        &self,
        order: &Order,
        market: &MarketStatus,
    ) -> Result<(), ValidationError> {
        let OrderFeeSettings::Percent { min_fee, .. } = &self.settings.order_fee else {
            return Ok(());
        };
        let best_ref = match order.side {
            Side::Buy => market.best_ask,
            Side::Sell => market.best_bid,
        };
        let Some(best_ref) = best_ref else {
            return Ok(());
        };

        let dev = self.settings.max_price_deviations.fee.min(100);
        let fs_ppm = percent_to_ppm(*min_fee);
        // required = fs * (1 - dev) * best_ref * amount / PRICE_CONSTANT,
        // in integer arithmetic: x * fs_ppm * (100 - dev) / (1e6 * 100).
        let notional = (order.amount as u128) * (best_ref as u128) / (PRICE_CONSTANT as u128);
        let required = notional
            .checked_mul(fs_ppm)
            .and_then(|v| v.checked_mul((100 - dev) as u128))
            .map(|v| v.div_ceil(1_000_000 * 100))
            .unwrap_or(u128::MAX);
        let required = u64::try_from(required).unwrap_or(u64::MAX);

        if order.fee < required {
            return Err(ValidationError::DeviantOrderMatcherFee {
                side: order.side,
                fee: order.fee,
                required,
            });
        }
        Ok(())
    }
}

fn chain_unavailable(err: ChainError) -> ValidationError {
    ValidationError::ChainUnavailable(err.to_string())
}

/// The asset a percent-mode fee is denominated in for this order.
fn fee_value_asset(order: &Order, asset_type: FeeAssetType) -> Asset {
    match asset_type {
        FeeAssetType::Amount => order.pair.amount_asset,
        FeeAssetType::Price => order.pair.price_asset,
        FeeAssetType::Spending => order.spent_asset(),
        FeeAssetType::Receiving => order.received_asset(),
    }
}

/// The order's value measured in the fee-relevant asset's units.
fn order_value_units(order: &Order, asset_type: FeeAssetType) -> u128 {
    let amount_leg = order.amount as u128;
    let price_leg = order.price_asset_value(order.amount);
    match asset_type {
        FeeAssetType::Amount => amount_leg,
        FeeAssetType::Price => price_leg,
        FeeAssetType::Spending => match order.side {
            Side::Buy => price_leg,
            Side::Sell => amount_leg,
        },
        FeeAssetType::Receiving => match order.side {
            Side::Buy => amount_leg,
            Side::Sell => price_leg,
        },
    }
}

/// A percent expressed in parts-per-million of the whole, e.g. `0.1 %`
/// becomes `1000`.
fn percent_to_ppm(percent: f64) -> u128 {
    (percent * 10_000.0).round().max(0.0) as u128
}

/// `ceil(value * fs% )` rescaled between asset decimals, floored at one
/// minimum unit of the fee asset.
fn percent_fee(value: u128, min_fee_percent: f64, value_decimals: u8, fee_decimals: u8) -> u64 {
    let fs_ppm = percent_to_ppm(min_fee_percent);
    let scaled = value.checked_mul(fs_ppm).unwrap_or(u128::MAX);
    let rescaled = if fee_decimals >= value_decimals {
        scaled.checked_mul(10u128.pow((fee_decimals - value_decimals) as u32))
    } else {
        Some(scaled / 10u128.pow((value_decimals - fee_decimals) as u32))
    }
    .unwrap_or(u128::MAX);
    let required = rescaled.div_ceil(1_000_000).max(1);
    u64::try_from(required).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{Address, HASH_LEN};
    use crate::order::Signature;
    use crate::settings::DeviationSettings;
    use crate::utils::current_time_millis;

    fn pair() -> AssetPair {
        AssetPair::new(Asset::Issued([7u8; HASH_LEN]), Asset::Native).unwrap()
    }

    fn order(side: Side, price: u64, amount: u64, fee: u64) -> Order {
        let now = current_time_millis();
        Order {
            version: 3,
            owner: Address([1u8; HASH_LEN]),
            matcher: Address([2u8; HASH_LEN]),
            pair: pair(),
            side,
            price,
            amount,
            timestamp: now,
            expiration: now + 60_000,
            fee,
            fee_asset: Asset::Native,
            signature: Signature::zero(),
        }
    }

    fn validator(settings: MatcherSettings) -> Validator {
        Validator::new(
            Arc::new(settings),
            Arc::new(MockChainClient::new()),
            Arc::new(AcceptAllSignatures),
        )
    }

    fn deviation_settings() -> MatcherSettings {
        MatcherSettings {
            max_price_deviations: DeviationSettings {
                enable: true,
                profit: 70,
                loss: 60,
                fee: 40,
            },
            order_fee: OrderFeeSettings::Percent {
                asset_type: FeeAssetType::Price,
                min_fee: 0.1,
            },
            ..MatcherSettings::default()
        }
    }

    #[test]
    fn accepts_plain_order() {
        let v = validator(MatcherSettings::default());
        let order = order(Side::Buy, 500_000, 1_000, 300_000);
        let market = MarketStatus::default();
        v.validate_sync(&order, &market, 1, current_time_millis(), false)
            .unwrap();
    }

    #[test]
    fn rejects_outdated_and_overlong_orders() {
        let v = validator(MatcherSettings::default());
        let now = current_time_millis();

        let mut expired = order(Side::Buy, 500_000, 1_000, 300_000);
        expired.expiration = now - 1;
        expired.timestamp = expired.expiration;
        assert!(matches!(
            v.validate_sync(&expired, &MarketStatus::default(), 1, now, false),
            Err(ValidationError::OrderOutdated { .. })
        ));

        let mut eternal = order(Side::Buy, 500_000, 1_000, 300_000);
        eternal.expiration = now + MAX_ORDER_LIFETIME_MS + 10_000;
        assert!(matches!(
            v.validate_sync(&eternal, &MarketStatus::default(), 1, now, false),
            Err(ValidationError::OrderLifetimeExceeded { .. })
        ));
    }

    #[test]
    fn rejects_denied_version_and_blacklists() {
        let mut settings = MatcherSettings::default();
        settings.allowed_order_versions = vec![3];
        settings.blacklisted_addresses.insert(Address([9u8; 32]));
        let v = validator(settings);
        let now = current_time_millis();

        let mut v1 = order(Side::Buy, 500_000, 1_000, 300_000);
        v1.version = 1;
        assert!(matches!(
            v.validate_sync(&v1, &MarketStatus::default(), 1, now, false),
            Err(ValidationError::OrderVersionDenied { .. })
        ));

        let mut banned = order(Side::Buy, 500_000, 1_000, 300_000);
        banned.owner = Address([9u8; 32]);
        assert!(matches!(
            v.validate_sync(&banned, &MarketStatus::default(), 1, now, false),
            Err(ValidationError::AddressIsBlacklisted { .. })
        ));
    }

    #[test]
    fn rejects_reversed_pair() {
        let v = validator(MatcherSettings::default());
        let now = current_time_millis();
        let mut reversed = order(Side::Buy, 500_000, 1_000, 300_000);
        reversed.pair = reversed.pair.flipped();
        assert!(matches!(
            v.validate_sync(&reversed, &MarketStatus::default(), 1, now, false),
            Err(ValidationError::AssetPairReversed { .. })
        ));
    }

    #[test]
    fn rejects_misaligned_tick() {
        let v = validator(MatcherSettings::default());
        let now = current_time_millis();
        let misaligned = order(Side::Buy, 500_050, 1_000, 300_000);
        assert!(matches!(
            v.validate_sync(&misaligned, &MarketStatus::default(), 100, now, false),
            Err(ValidationError::PriceTickIsInvalid { tick_size: 100, .. })
        ));
        v.validate_sync(&misaligned, &MarketStatus::default(), 1, now, false)
            .unwrap();
    }

    #[test]
    fn buy_below_deviation_floor_is_rejected_with_pinned_code() {
        let mut settings = deviation_settings();
        // Keep the fee policy out of the way for the price scenario.
        settings.order_fee = OrderFeeSettings::Fixed {
            asset: Asset::Native,
            min_fee: 1,
        };
        let v = validator(settings);
        let market = MarketStatus {
            last_trade: None,
            best_bid: Some(300_000),
            best_ask: None,
        };
        let low_buy = order(Side::Buy, 89_999, 1_000, 300_000);
        let err = v
            .validate_sync(&low_buy, &market, 1, current_time_millis(), false)
            .unwrap_err();
        assert_eq!(err.code(), 9441295);
        let message = err.to_string();
        assert!(message.contains("30 %"), "{message}");
        assert!(message.contains("160 %"), "{message}");

        // At the bound exactly, the order passes.
        let at_floor = order(Side::Buy, 90_000, 1_000, 300_000);
        v.validate_sync(&at_floor, &market, 1, current_time_millis(), false)
            .unwrap();
    }

    #[test]
    fn fee_below_deviated_minimum_is_rejected_with_pinned_code() {
        let v = validator(deviation_settings());
        let market = MarketStatus {
            last_trade: None,
            best_bid: None,
            best_ask: Some(600_000),
        };
        // 1000 whole units of 10^8: the deviated fee floor is
        // 0.1 % * 60 % * 600000 * 10^11 / 10^8 = 360000. The order's own
        // price stays low so the plain percent minimum (which uses the
        // order price, not the best ask) is already satisfied.
        let amount = 100_000_000_000;
        let cheap = order(Side::Buy, 300_000, amount, 359_999);
        let err = v
            .validate_sync(&cheap, &market, 1, current_time_millis(), false)
            .unwrap_err();
        assert_eq!(err.code(), 9441551);
        assert!(matches!(
            err,
            ValidationError::DeviantOrderMatcherFee {
                required: 360_000,
                ..
            }
        ));

        let exact = order(Side::Buy, 300_000, amount, 360_000);
        v.validate_sync(&exact, &market, 1, current_time_millis(), false)
            .unwrap();
    }

    #[test]
    fn empty_sides_do_not_constrain() {
        let mut settings = deviation_settings();
        settings.order_fee = OrderFeeSettings::Fixed {
            asset: Asset::Native,
            min_fee: 1,
        };
        let v = validator(settings);
        let empty = MarketStatus::default();
        let wild = order(Side::Buy, 1, 1_000, 300_000);
        v.validate_sync(&wild, &empty, 1, current_time_millis(), false)
            .unwrap();
    }

    #[test]
    fn percent_mode_constrains_fee_asset_and_minimum() {
        let settings = MatcherSettings {
            order_fee: OrderFeeSettings::Percent {
                asset_type: FeeAssetType::Price,
                min_fee: 0.1,
            },
            ..MatcherSettings::default()
        };
        let v = validator(settings);
        let now = current_time_millis();

        // Fee asset must be the price asset (native here).
        let mut wrong_asset = order(Side::Buy, 500_000, 100_000_000_000, 300_000);
        wrong_asset.fee_asset = Asset::Issued([7u8; HASH_LEN]);
        assert!(matches!(
            v.validate_sync(&wrong_asset, &MarketStatus::default(), 1, now, false),
            Err(ValidationError::UnexpectedFeeAsset { .. })
        ));

        // Required = 0.1 % of (10^11 * 500000 / 10^8) = 500000.
        let cheap = order(Side::Buy, 500_000, 100_000_000_000, 499_999);
        assert!(matches!(
            v.validate_sync(&cheap, &MarketStatus::default(), 1, now, false),
            Err(ValidationError::FeeNotEnough {
                required: 500_000,
                ..
            })
        ));
        let paid = order(Side::Buy, 500_000, 100_000_000_000, 500_000);
        v.validate_sync(&paid, &MarketStatus::default(), 1, now, false)
            .unwrap();
    }

    #[test]
    fn market_flags_gate_placement() {
        let v = validator(MatcherSettings::default());
        let now = current_time_millis();
        let good = order(Side::Buy, 500_000, 1_000, 300_000);
        v.set_market_flags(pair(), MarketFlags::PLACING_DISABLED);
        assert!(matches!(
            v.validate_sync(&good, &MarketStatus::default(), 1, now, false),
            Err(ValidationError::MarketStatusMismatch)
        ));
        v.set_market_flags(pair(), MarketFlags::empty());
        v.validate_sync(&good, &MarketStatus::default(), 1, now, false)
            .unwrap();
    }

    #[test]
    fn self_trade_rejected_only_when_disallowed() {
        let mut settings = MatcherSettings::default();
        settings.allow_self_trades = false;
        let v = validator(settings);
        let now = current_time_millis();
        let o = order(Side::Buy, 500_000, 1_000, 300_000);
        assert!(matches!(
            v.validate_sync(&o, &MarketStatus::default(), 1, now, true),
            Err(ValidationError::SelfTrade)
        ));
        v.validate_sync(&o, &MarketStatus::default(), 1, now, false)
            .unwrap();
    }

    #[tokio::test]
    async fn async_checks_catch_unknown_assets_scripts_and_balances() {
        let chain = Arc::new(MockChainClient::new());
        let settings = Arc::new(MatcherSettings::default());
        let v = Validator::new(settings, chain.clone(), Arc::new(AcceptAllSignatures));
        let ledger = AddressLedger::default();
        let o = order(Side::Buy, 500_000, 100_000_000_000, 300_000);

        v.validate_async(&o, &ledger).await.unwrap();

        chain.forget_asset(o.pair.amount_asset);
        assert!(matches!(
            v.validate_async(&o, &ledger).await,
            Err(ValidationError::AssetNotFound { .. })
        ));
        chain.register_asset(
            o.pair.amount_asset,
            AssetMeta {
                name: "widget".into(),
                decimals: 8,
                has_script: false,
            },
        );
        v.validate_async(&o, &ledger).await.unwrap();

        chain.deny_asset_script(o.pair.amount_asset);
        chain.register_asset(
            o.pair.amount_asset,
            AssetMeta {
                name: "widget".into(),
                decimals: 8,
                has_script: true,
            },
        );
        assert!(matches!(
            v.validate_async(&o, &ledger).await,
            Err(ValidationError::OrderAssetScriptDenied { .. })
        ));
    }

    #[tokio::test]
    async fn async_balance_check_counts_existing_reservations() {
        let chain = Arc::new(MockChainClient::new());
        let settings = Arc::new(MatcherSettings::default());
        let v = Validator::new(settings, chain.clone(), Arc::new(AcceptAllSignatures));
        let ledger = AddressLedger::default();

        // Buy of 10^11 at 500000 spends 5*10^8 price asset + 300000 fee,
        // both native here.
        let o = order(Side::Buy, 500_000, 100_000_000_000, 300_000);
        chain.set_balance(o.owner, Asset::Native, 500_300_000);
        v.validate_async(&o, &ledger).await.unwrap();

        chain.set_balance(o.owner, Asset::Native, 500_299_999);
        assert!(matches!(
            v.validate_async(&o, &ledger).await,
            Err(ValidationError::BalanceNotEnough { .. })
        ));
    }

    #[tokio::test]
    async fn banned_asset_names_reject_the_pair() {
        let chain = Arc::new(MockChainClient::new());
        let settings = MatcherSettings {
            blacklisted_names: vec!["scam".to_string()],
            ..MatcherSettings::default()
        };
        let v = Validator::new(Arc::new(settings), chain.clone(), Arc::new(AcceptAllSignatures));
        let ledger = AddressLedger::default();
        let o = order(Side::Buy, 500_000, 1_000, 300_000);

        chain.register_asset(
            o.pair.amount_asset,
            AssetMeta {
                name: "TotallyNotAScamCoin".into(),
                decimals: 8,
                has_script: false,
            },
        );
        assert!(matches!(
            v.validate_async(&o, &ledger).await,
            Err(ValidationError::AssetPairIsDenylisted { .. })
        ));
    }
}
