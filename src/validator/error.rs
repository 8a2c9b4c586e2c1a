//! Validation failures with stable numeric codes.
//!
//! Every rejection is presentable as `(code, message, params)`. The codes
//! are stable identifiers clients dispatch on; changing one is a breaking
//! API change even though the Rust enum is `#[non_exhaustive]`.

use crate::assets::{Address, Asset};
use crate::order::Side;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// An order rejected before admission to the event log.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ValidationError {
    /// The signature does not verify against the owner key.
    #[error("order signature verification failed")]
    InvalidSignature,

    /// Expired, or timestamped too far in the future.
    #[error("order is outdated: expiration {expiration}, now {now}")]
    OrderOutdated {
        /// The order's expiration, ms.
        expiration: u64,
        /// The validator's clock, ms.
        now: u64,
    },

    /// `expiration - now` exceeds the maximum order lifetime.
    #[error("order lifetime exceeds the allowed maximum of {max_lifetime_ms} ms")]
    OrderLifetimeExceeded {
        /// The configured maximum lifetime, ms.
        max_lifetime_ms: u64,
    },

    /// One of the pair's assets (or its name) is denylisted.
    #[error("asset pair is not allowed: {asset}")]
    AssetPairIsDenylisted {
        /// The offending asset.
        asset: Asset,
    },

    /// The pair's orientation contradicts the canonical ordering.
    #[error("asset pair is reversed; the price asset must be {expected_price_asset}")]
    AssetPairReversed {
        /// The asset that should quote prices for this pair.
        expected_price_asset: Asset,
    },

    /// The order owner is denylisted.
    #[error("address {address} is blacklisted")]
    AddressIsBlacklisted {
        /// The denylisted owner.
        address: Address,
    },

    /// The order's version is not admissible.
    #[error("order version {version} is denied; allowed versions: {allowed:?}")]
    OrderVersionDenied {
        /// The submitted version.
        version: u8,
        /// The configured allow-list.
        allowed: Vec<u8>,
    },

    /// The fee asset is not accepted for this pair.
    #[error("unexpected matcher fee asset {fee_asset}; required one of {allowed:?}")]
    UnexpectedFeeAsset {
        /// The submitted fee asset.
        fee_asset: Asset,
        /// Fee assets the policy accepts for this order.
        allowed: Vec<Asset>,
    },

    /// The fee is below the configured minimum.
    #[error("order fee {fee} is less than the required {required}")]
    FeeNotEnough {
        /// The submitted fee.
        fee: u64,
        /// The policy's minimum for this order.
        required: u64,
        /// The asset both figures are denominated in.
        fee_asset: Asset,
    },

    /// The price is not aligned to the active tick.
    #[error("invalid price {price}: must be a multiple of the tick size {tick_size}")]
    PriceTickIsInvalid {
        /// The submitted price.
        price: u64,
        /// The tick active at the current offset.
        tick_size: u64,
    },

    /// The price is outside the deviation bounds around best bid/ask.
    #[error(
        "The {side} order's price {price} is out of deviation bounds. It should meet the \
         following matcher's requirements: {lower_percent} % of best bid price <= order \
         price <= {upper_percent} % of best ask price"
    )]
    DeviantOrderPrice {
        /// The order's side.
        side: Side,
        /// The submitted price.
        price: u64,
        /// Lower bound as percent of best bid.
        lower_percent: u32,
        /// Upper bound as percent of best ask.
        upper_percent: u32,
        /// Best bid at validation time.
        best_bid: Option<u64>,
        /// Best ask at validation time.
        best_ask: Option<u64>,
    },

    /// The fee is below the deviated percent-mode minimum.
    #[error(
        "The {side} order's matcher fee {fee} is out of deviation bounds. It should meet \
         the following matcher's requirements: matcher fee >= {required}"
    )]
    DeviantOrderMatcherFee {
        /// The order's side.
        side: Side,
        /// The submitted fee.
        fee: u64,
        /// The deviated minimum fee.
        required: u64,
    },

    /// Trading on the pair is administratively halted.
    #[error("market is unavailable for this operation")]
    MarketStatusMismatch,

    /// The order would execute against its owner's own resting order.
    #[error("order would match against an own resting order")]
    SelfTrade,

    /// An asset of the pair (or the fee asset) is unknown to the chain.
    #[error("asset {asset} not found")]
    AssetNotFound {
        /// The unknown asset.
        asset: Asset,
    },

    /// The asset's script rejected the order.
    #[error("the script of asset {asset} rejected the order")]
    OrderAssetScriptDenied {
        /// The scripted asset.
        asset: Asset,
    },

    /// The matcher account's script rejected the order.
    #[error("the matcher account script rejected the order")]
    MatcherAccountScriptDenied,

    /// The owner's spendable balance does not cover the order.
    #[error(
        "balance of {asset} is not enough: required {required}, available {available}"
    )]
    BalanceNotEnough {
        /// The short asset.
        asset: Asset,
        /// Reservation the order needs, existing reservations included.
        required: u128,
        /// The owner's spendable balance.
        available: u128,
    },

    /// The blockchain client could not answer in time. Transient.
    #[error("validation is unavailable: {0}")]
    ChainUnavailable(String),
}

impl ValidationError {
    /// The stable numeric identifier of this failure class.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            ValidationError::InvalidSignature => 9440512,
            ValidationError::OrderOutdated { .. } => 9439746,
            ValidationError::OrderLifetimeExceeded { .. } => 9439748,
            ValidationError::AssetPairIsDenylisted { .. } => 11538180,
            ValidationError::AssetPairReversed { .. } => 9440514,
            ValidationError::AddressIsBlacklisted { .. } => 3148033,
            ValidationError::OrderVersionDenied { .. } => 9439747,
            ValidationError::UnexpectedFeeAsset { .. } => 9441540,
            ValidationError::FeeNotEnough { .. } => 9441542,
            ValidationError::PriceTickIsInvalid { .. } => 9441026,
            ValidationError::DeviantOrderPrice { .. } => 9441295,
            ValidationError::DeviantOrderMatcherFee { .. } => 9441551,
            ValidationError::MarketStatusMismatch => 9440516,
            ValidationError::SelfTrade => 9441286,
            ValidationError::AssetNotFound { .. } => 11534345,
            ValidationError::OrderAssetScriptDenied { .. } => 11536130,
            ValidationError::MatcherAccountScriptDenied => 3147523,
            ValidationError::BalanceNotEnough { .. } => 3148040,
            ValidationError::ChainUnavailable(_) => 3145729,
        }
    }

    /// `true` when retrying later could succeed without changing the
    /// order.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, ValidationError::ChainUnavailable(_))
    }

    /// Structured parameters for machine consumption.
    #[must_use]
    pub fn params(&self) -> serde_json::Value {
        match self {
            ValidationError::OrderOutdated { expiration, now } => {
                json!({ "expiration": expiration, "now": now })
            }
            ValidationError::OrderLifetimeExceeded { max_lifetime_ms } => {
                json!({ "maxLifetimeMs": max_lifetime_ms })
            }
            ValidationError::AssetPairIsDenylisted { asset }
            | ValidationError::AssetNotFound { asset }
            | ValidationError::OrderAssetScriptDenied { asset } => {
                json!({ "asset": asset.to_string() })
            }
            ValidationError::AssetPairReversed {
                expected_price_asset,
            } => json!({ "expectedPriceAsset": expected_price_asset.to_string() }),
            ValidationError::AddressIsBlacklisted { address } => {
                json!({ "address": address.to_string() })
            }
            ValidationError::OrderVersionDenied { version, allowed } => {
                json!({ "version": version, "allowed": allowed })
            }
            ValidationError::UnexpectedFeeAsset { fee_asset, allowed } => json!({
                "feeAsset": fee_asset.to_string(),
                "allowed": allowed.iter().map(|a| a.to_string()).collect::<Vec<_>>(),
            }),
            ValidationError::FeeNotEnough {
                fee,
                required,
                fee_asset,
            } => json!({
                "fee": fee,
                "required": required,
                "feeAsset": fee_asset.to_string(),
            }),
            ValidationError::PriceTickIsInvalid { price, tick_size } => {
                json!({ "price": price, "tickSize": tick_size })
            }
            ValidationError::DeviantOrderPrice {
                side,
                price,
                lower_percent,
                upper_percent,
                best_bid,
                best_ask,
            } => json!({
                "side": side.to_string(),
                "price": price,
                "lowerPercent": lower_percent,
                "upperPercent": upper_percent,
                "bestBid": best_bid,
                "bestAsk": best_ask,
            }),
            ValidationError::DeviantOrderMatcherFee {
                side,
                fee,
                required,
            } => json!({ "side": side.to_string(), "fee": fee, "required": required }),
            ValidationError::BalanceNotEnough {
                asset,
                required,
                available,
            } => json!({
                "asset": asset.to_string(),
                "required": required.to_string(),
                "available": available.to_string(),
            }),
            _ => json!({}),
        }
    }

    /// The full `(code, message, params)` payload.
    #[must_use]
    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code(),
            message: self.to_string(),
            params: self.params(),
        }
    }
}

/// The user-visible shape of a rejection.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ErrorPayload {
    /// Stable numeric identifier.
    pub code: u32,
    /// Human-readable description.
    pub message: String,
    /// Structured parameters.
    pub params: serde_json::Value,
}
