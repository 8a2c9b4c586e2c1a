//! # DEX Matching Engine Core
//!
//! The authoritative matching core of a decentralized exchange: signed
//! limit orders are validated under configurable policy, sequenced through
//! an append-only event log, matched in per-pair price-time priority order
//! books, and accounted against per-trader reserved balances. The engine
//! is the source of truth for book state; executed trades stream out to a
//! settlement collaborator that broadcasts them to the chain.
//!
//! ## Architecture
//!
//! - **Event log** ([`queue`]): every mutating operation is an event with
//!   a monotonic offset. A memory-mapped local log and a broker-backed
//!   distributed log are contractually interchangeable; replaying a log
//!   prefix always reproduces the same books.
//! - **Orchestrator** ([`engine`]): the only log consumer. Owns the
//!   pair-to-worker map, routes each event to its pair's worker, awaits
//!   processing acks, and gates readiness through the one-way status
//!   machine `Starting -> Working -> Stopping`.
//! - **Workers** ([`engine`]): one task per pair, the only mutator of that
//!   pair's book. Events apply synchronously; snapshots persist the book
//!   together with its `last_applied_offset`.
//! - **Order books** ([`book`]): price levels on concurrent ordered maps,
//!   FIFO within a level, tick-quantized prices, pro-rata fees. A resting
//!   order never loses queue priority to a partial fill.
//! - **Validator** ([`validator`]): the pre-admission gate. Synchronous
//!   policy checks (expiry, denylists, fees, ticks, deviation bounds),
//!   then asynchronous blockchain-client checks (assets, scripts,
//!   balances). Rejections carry stable numeric codes and never reach the
//!   log.
//! - **Address ledger** ([`ledger`]): per-trader reserved balances and
//!   order history, rebuilt by replay, with an auto-cancel cascade when an
//!   external balance drops below the reservation.
//!
//! ## Concurrency model
//!
//! Parallel overall, single-threaded per entity: one worker per pair, one
//! lock per address, one consumer per log. Books are readable concurrently
//! (best bid/ask, market status) while their worker mutates them.
//!
//! ## Example
//!
//! ```no_run
//! use dexmatch::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Arc::new(MatcherSettings::default());
//! let log = Arc::new(LocalEventLog::open("data/events")?);
//! let store = Arc::new(FileSnapshotStore::open("data/snapshots")?);
//! let validator = Arc::new(Validator::new(
//!     settings.clone(),
//!     Arc::new(MockChainClient::new()),
//!     Arc::new(AcceptAllSignatures),
//! ));
//!
//! let matcher = MatcherOrchestrator::new(settings, log, store, validator);
//! matcher.clone().start().await?;
//!
//! let mut trades = matcher.subscribe_trades();
//! # Ok(())
//! # }
//! ```

pub mod assets;
pub mod book;
pub mod engine;
pub mod ledger;
pub mod order;
pub mod prelude;
pub mod queue;
pub mod rules;
pub mod settings;
pub mod validator;

mod utils;

pub use assets::{Address, Asset, AssetPair};
pub use book::{
    BookEntry, BookError, BookSnapshot, CancelOutcome, CancelReason, LastTrade, MarketStatus,
    OrderBook, PlaceOutcome, SnapshotPackage, TradeExecuted,
};
pub use engine::{
    Disabled, EngineError, FileSnapshotStore, MatcherOrchestrator, MemorySnapshotStore,
    ServiceStatus, SnapshotStore, SnapshotStoreError, WorkerHandle,
};
pub use ledger::{AddressLedger, OrderInfo};
pub use order::{Order, OrderId, OrderStatus, Side, Signature};
pub use queue::{
    Broker, EventLog, InMemoryBroker, LocalEventLog, Offset, QueueError, QueueEvent,
    RemoteEventLog, SequencedEvent,
};
pub use rules::{MatchingRule, MatchingRules, RuleSchedule};
pub use settings::{MatcherSettings, OrderFeeSettings, QueueKind};
pub use utils::current_time_millis;
pub use validator::{
    AcceptAllSignatures, ChainClient, ErrorPayload, MarketFlags, MockChainClient,
    SignatureVerifier, ValidationError, Validator,
};
