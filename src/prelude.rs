//! Prelude module that re-exports commonly used types and traits.
//!
//! ```rust
//! use dexmatch::prelude::*;
//! ```

// Identity and order model
pub use crate::assets::{Address, Asset, AssetPair};
pub use crate::order::{Order, OrderId, OrderStatus, Side, Signature};

// Order book types
pub use crate::book::{
    BookEntry, BookError, BookSnapshot, CancelReason, LastTrade, MarketStatus, OrderBook,
    TradeExecuted,
};

// Event log
pub use crate::queue::{
    Broker, EventLog, InMemoryBroker, LocalEventLog, Offset, QueueError, QueueEvent,
    RemoteEventLog, SequencedEvent,
};

// Engine
pub use crate::engine::{
    EngineError, FileSnapshotStore, MatcherOrchestrator, MemorySnapshotStore, ServiceStatus,
    SnapshotStore,
};

// Ledger and validation
pub use crate::ledger::{AddressLedger, OrderInfo};
pub use crate::validator::{
    AcceptAllSignatures, ChainClient, MarketFlags, MockChainClient, SignatureVerifier,
    ValidationError, Validator,
};

// Configuration
pub use crate::rules::{MatchingRule, MatchingRules};
pub use crate::settings::{MatcherSettings, OrderFeeSettings, QueueKind};

// Utility functions
pub use crate::utils::current_time_millis;
