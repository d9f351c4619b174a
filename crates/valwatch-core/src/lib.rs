//! valwatch-core — validator liveness tracking and alerting for Cosmos SDK chains.
//!
//! # Architecture
//!
//! ```text
//! StreamSupervisor (valwatch-rpc) ──BlockCommitEvent──▶ TrackingEngine
//!                                                         ├── ValidatorRegistry  (identity cache, tx mutations)
//!                                                         ├── alert::observe     (history window, streak, escalation)
//!                                                         ├── Broadcaster        (fire-and-forget fan-out)
//!                                                         ├── ReportingScheduler (interval reports)
//!                                                         └── Store              (memory / SQLite)
//! ```

pub mod address;
pub mod alert;
pub mod chain;
pub mod config;
pub mod error;
pub mod history;
pub mod notify;
pub mod registry;
pub mod report;
pub mod store;
pub mod subscription;
pub mod tracking;
pub mod types;

pub use alert::{Observation, ALERT_LEVELS};
pub use chain::ChainClient;
pub use config::TrackerConfig;
pub use error::WatchError;
pub use history::{calculate_uptime, BlocksHistory, HistoryEntry};
pub use notify::{Broadcaster, Notifier};
pub use registry::{ValidatorMutation, ValidatorRegistry};
pub use report::{ReportingScheduler, ValidatorReport};
pub use store::{BlockStore, MemoryStore, Store, SubscriptionStore, ValidatorStore};
pub use subscription::Subscriptions;
pub use tracking::{BlockOutcome, SlashingWindow, TrackingEngine};
pub use types::{
    BlockCommitEvent, BlockRecord, ConsensusPubKey, Precommit, SlashingParams, StakingPool,
    Subscriber, TxResult, ValidatorInfo, ValidatorRecord, ValidatorSubscription,
};
