//! Hierarchical engine configuration.
//!
//! The tree deserializes from any layered source; [`MatcherSettings::load`]
//! wires the `config` crate with an optional file plus `DEXMATCH__`-prefixed
//! environment overrides. Every field has a default so an empty source
//! yields a working single-node setup.

use crate::assets::{Address, Asset, AssetPair};
use crate::rules::MatchingRule;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Which event-log implementation the engine runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum QueueKind {
    /// Single-process log on local durable storage.
    #[default]
    Local,
    /// Single-partition distributed log behind a broker.
    Remote,
}

/// Local event-log tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct LocalQueueSettings {
    /// Directory holding the segment files.
    pub dir: PathBuf,
    /// Segment file size in bytes.
    pub segment_size: usize,
    /// Events per tail batch.
    pub batch_size: usize,
}

impl Default for LocalQueueSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/events"),
            segment_size: 64 * 1024 * 1024,
            batch_size: 256,
        }
    }
}

/// Distributed event-log tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RemoteQueueSettings {
    /// Producer buffer capacity; a full buffer rejects the append.
    pub buffer_capacity: usize,
    /// Consumer batch size (`groupedWithin` bound).
    pub consumer_batch_size: usize,
    /// First retry delay for transient transport failures, milliseconds.
    pub min_backoff_ms: u64,
    /// Retry delay ceiling, milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RemoteQueueSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024,
            consumer_batch_size: 256,
            min_backoff_ms: 50,
            max_backoff_ms: 10_000,
        }
    }
}

/// Event-log selection and per-kind tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EventsQueueSettings {
    /// Which implementation to run.
    #[serde(rename = "type")]
    pub kind: QueueKind,
    /// Settings for [`QueueKind::Local`].
    pub local: LocalQueueSettings,
    /// Settings for [`QueueKind::Remote`].
    pub remote: RemoteQueueSettings,
}

/// Which of an order's legs a percent-mode fee is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FeeAssetType {
    /// The pair's amount asset.
    #[default]
    Amount,
    /// The pair's price asset.
    Price,
    /// Whatever asset the order spends.
    Spending,
    /// Whatever asset the order receives.
    Receiving,
}

/// The exchange's fee policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case", rename_all_fields = "kebab-case")]
pub enum OrderFeeSettings {
    /// A flat minimum fee in a fixed asset.
    Fixed {
        /// The only accepted fee asset.
        asset: Asset,
        /// Minimum fee in that asset's units.
        min_fee: u64,
    },
    /// A percentage of the order's value.
    Percent {
        /// Which leg the percentage applies to; also determines the
        /// accepted fee asset.
        asset_type: FeeAssetType,
        /// Minimum fee in percent of the order value, e.g. `0.1`.
        min_fee: f64,
    },
}

impl Default for OrderFeeSettings {
    fn default() -> Self {
        OrderFeeSettings::Fixed {
            asset: Asset::Native,
            min_fee: 300_000,
        }
    }
}

/// Price and fee deviation policy relative to the market's best prices.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DeviationSettings {
    /// Master switch; disabled skips all deviation checks.
    pub enable: bool,
    /// Allowed distance below the profitable bound, percent.
    pub profit: u32,
    /// Allowed distance beyond the losing bound, percent.
    pub loss: u32,
    /// Allowed fee discount relative to the percent-mode minimum, percent.
    pub fee: u32,
}

impl Default for DeviationSettings {
    fn default() -> Self {
        Self {
            enable: false,
            profit: 100,
            loss: 100,
            fee: 100,
        }
    }
}

/// Matching-rule schedule for one pair, as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PairRulesSettings {
    /// The pair the schedule applies to.
    pub amount_asset: Asset,
    /// The pair's price asset.
    pub price_asset: Asset,
    /// The `(from_offset, tick_size)` records.
    pub rules: Vec<MatchingRule>,
}

impl PairRulesSettings {
    /// The configured pair, when well-formed.
    #[must_use]
    pub fn pair(&self) -> Option<AssetPair> {
        AssetPair::new(self.amount_asset, self.price_asset)
    }
}

/// The engine's full configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct MatcherSettings {
    /// Event-log selection and tuning.
    pub events_queue: EventsQueueSettings,
    /// Events between automatic snapshots of a book.
    pub snapshots_interval: u64,
    /// Startup gate: maximum time to restore all snapshots, milliseconds.
    pub snapshots_loading_timeout_ms: u64,
    /// Startup gate: maximum time to catch up with the log, milliseconds.
    pub start_events_processing_timeout_ms: u64,
    /// Per-batch worker acknowledgment deadline, milliseconds.
    pub process_consumed_timeout_ms: u64,
    /// Per-address operation deadline, milliseconds.
    pub actor_response_timeout_ms: u64,
    /// Soft shutdown deadline, milliseconds. Default five minutes.
    pub graceful_stop_timeout_ms: u64,
    /// Fee policy.
    pub order_fee: OrderFeeSettings,
    /// Deviation policy.
    pub max_price_deviations: DeviationSettings,
    /// Admissible order versions.
    pub allowed_order_versions: Vec<u8>,
    /// Canonical price-asset ordering overlay: the first asset of a pair
    /// found in this list becomes the price asset.
    pub price_assets: Vec<Asset>,
    /// Assets refused outright.
    pub blacklisted_assets: HashSet<Asset>,
    /// Addresses refused outright.
    pub blacklisted_addresses: HashSet<Address>,
    /// Substrings banned from issued-asset names.
    pub blacklisted_names: Vec<String>,
    /// The exchange administrator, allowed to cancel any order.
    pub admin_address: Option<Address>,
    /// Whether an order may execute against its owner's own resting
    /// orders.
    pub allow_self_trades: bool,
    /// Terminal orders remembered per address.
    pub order_history_capacity: usize,
    /// Tick schedules per pair.
    pub matching_rules: Vec<PairRulesSettings>,
    /// Pairs whose books are created eagerly at startup.
    pub startup_pairs: Vec<PairRulesSettings>,
}

impl Default for MatcherSettings {
    fn default() -> Self {
        Self {
            events_queue: EventsQueueSettings::default(),
            snapshots_interval: 1_000,
            snapshots_loading_timeout_ms: 300_000,
            start_events_processing_timeout_ms: 300_000,
            process_consumed_timeout_ms: 5_000,
            actor_response_timeout_ms: 5_000,
            graceful_stop_timeout_ms: 300_000,
            order_fee: OrderFeeSettings::default(),
            max_price_deviations: DeviationSettings::default(),
            allowed_order_versions: vec![1, 2, 3],
            price_assets: Vec::new(),
            blacklisted_assets: HashSet::new(),
            blacklisted_addresses: HashSet::new(),
            blacklisted_names: Vec::new(),
            admin_address: None,
            allow_self_trades: true,
            order_history_capacity: 100,
            matching_rules: Vec::new(),
            startup_pairs: Vec::new(),
        }
    }
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The layered sources could not be read or merged.
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),
}

impl MatcherSettings {
    /// Load settings from an optional file layered under `DEXMATCH__`
    /// environment overrides.
    pub fn load(path: Option<&str>) -> Result<Self, SettingsError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let cfg = builder
            .add_source(config::Environment::with_prefix("DEXMATCH").separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Synchronous validator timeout: one tenth below the per-address
    /// deadline so the caller sees the validator's answer, not a raw
    /// timeout.
    #[must_use]
    pub fn validation_timeout(&self) -> Duration {
        let ms = self.actor_response_timeout_ms;
        Duration::from_millis(ms - ms / 10)
    }

    /// The worker acknowledgment deadline.
    #[must_use]
    pub fn process_consumed_timeout(&self) -> Duration {
        Duration::from_millis(self.process_consumed_timeout_ms)
    }

    /// The ping-all deadline: twice the per-batch deadline.
    #[must_use]
    pub fn ping_all_timeout(&self) -> Duration {
        Duration::from_millis(self.process_consumed_timeout_ms.saturating_mul(2))
    }

    /// Startup snapshot-restore deadline.
    #[must_use]
    pub fn snapshots_loading_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshots_loading_timeout_ms)
    }

    /// Startup catch-up deadline.
    #[must_use]
    pub fn start_events_processing_timeout(&self) -> Duration {
        Duration::from_millis(self.start_events_processing_timeout_ms)
    }

    /// Soft shutdown deadline.
    #[must_use]
    pub fn graceful_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_stop_timeout_ms)
    }
}
