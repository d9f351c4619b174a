//! Persistence traits for subscriptions, validator records and block records.
//!
//! Every operation touches a single key. There are no cross-key
//! transactions: concurrent writers to the same key resolve as
//! last-write-wins, and records are always fully replaced, never merged.
//!
//! Implementations: [`MemoryStore`] here, `SqliteStore` in `valwatch-storage`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::WatchError;
use crate::types::{BlockRecord, Subscriber, TrackingUpdate, ValidatorRecord, ValidatorSubscription};

/// Validator → subscribers and tracking state.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn find_subscription(
        &self,
        operator: &str,
    ) -> Result<Option<ValidatorSubscription>, WatchError>;

    async fn all_subscriptions(&self) -> Result<Vec<ValidatorSubscription>, WatchError>;

    /// Insert a new subscription. Fails if one already exists for the operator.
    async fn insert_subscription(&self, sub: ValidatorSubscription) -> Result<(), WatchError>;

    /// Replace the tracking fields of an existing subscription.
    async fn update_tracking(&self, operator: &str, update: TrackingUpdate) -> Result<(), WatchError>;

    /// Replace the subscriber list of an existing subscription.
    async fn set_subscribers(
        &self,
        operator: &str,
        subscribers: Vec<Subscriber>,
    ) -> Result<(), WatchError>;

    async fn delete_subscription(&self, operator: &str) -> Result<(), WatchError>;
}

/// Validator identity cache.
#[async_trait]
pub trait ValidatorStore: Send + Sync {
    async fn find_validator(&self, operator: &str) -> Result<Option<ValidatorRecord>, WatchError>;

    async fn find_validator_by_hex(
        &self,
        hex_address: &str,
    ) -> Result<Option<ValidatorRecord>, WatchError>;

    async fn all_validators(&self) -> Result<Vec<ValidatorRecord>, WatchError>;

    /// Insert or fully replace the record keyed by its operator address.
    async fn upsert_validator(&self, record: ValidatorRecord) -> Result<(), WatchError>;

    /// Set the jailed flag. Returns `true` only if the stored value changed.
    async fn set_jailed(&self, operator: &str, jailed: bool) -> Result<bool, WatchError>;
}

/// Bounded FIFO of recent blocks.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Insert `record`, evicting the oldest records beyond `limit`.
    async fn insert_block(&self, record: BlockRecord, limit: usize) -> Result<(), WatchError>;

    /// All retained records, oldest first.
    async fn blocks(&self) -> Result<Vec<BlockRecord>, WatchError>;
}

/// Convenience bound for backends implementing all three stores.
pub trait Store: SubscriptionStore + ValidatorStore + BlockStore {}

impl<T: SubscriptionStore + ValidatorStore + BlockStore> Store for T {}

// ─── In-memory store ──────────────────────────────────────────────────────────

/// In-memory store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryStore {
    subscriptions: Mutex<HashMap<String, ValidatorSubscription>>,
    validators: Mutex<HashMap<String, ValidatorRecord>>,
    blocks: Mutex<VecDeque<BlockRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> WatchError {
    WatchError::Storage("memory store lock poisoned".into())
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn find_subscription(
        &self,
        operator: &str,
    ) -> Result<Option<ValidatorSubscription>, WatchError> {
        Ok(self.subscriptions.lock().map_err(poisoned)?.get(operator).cloned())
    }

    async fn all_subscriptions(&self) -> Result<Vec<ValidatorSubscription>, WatchError> {
        let mut subs: Vec<_> = self
            .subscriptions
            .lock()
            .map_err(poisoned)?
            .values()
            .cloned()
            .collect();
        subs.sort_by(|a, b| a.operator_address.cmp(&b.operator_address));
        Ok(subs)
    }

    async fn insert_subscription(&self, sub: ValidatorSubscription) -> Result<(), WatchError> {
        let mut map = self.subscriptions.lock().map_err(poisoned)?;
        if map.contains_key(&sub.operator_address) {
            return Err(WatchError::Storage(format!(
                "subscription for {} already exists",
                sub.operator_address
            )));
        }
        map.insert(sub.operator_address.clone(), sub);
        Ok(())
    }

    async fn update_tracking(&self, operator: &str, update: TrackingUpdate) -> Result<(), WatchError> {
        let mut map = self.subscriptions.lock().map_err(poisoned)?;
        let sub = map
            .get_mut(operator)
            .ok_or_else(|| WatchError::NotFound(format!("subscription {operator}")))?;
        sub.consecutive_counter = update.consecutive_counter;
        sub.alert_level = update.alert_level;
        sub.last_missed_block = update.last_missed_block;
        sub.blocks_history = update.blocks_history;
        sub.updated_at = chrono::Utc::now().timestamp();
        Ok(())
    }

    async fn set_subscribers(
        &self,
        operator: &str,
        subscribers: Vec<Subscriber>,
    ) -> Result<(), WatchError> {
        let mut map = self.subscriptions.lock().map_err(poisoned)?;
        let sub = map
            .get_mut(operator)
            .ok_or_else(|| WatchError::NotFound(format!("subscription {operator}")))?;
        sub.subscribers = subscribers;
        sub.updated_at = chrono::Utc::now().timestamp();
        Ok(())
    }

    async fn delete_subscription(&self, operator: &str) -> Result<(), WatchError> {
        self.subscriptions.lock().map_err(poisoned)?.remove(operator);
        Ok(())
    }
}

#[async_trait]
impl ValidatorStore for MemoryStore {
    async fn find_validator(&self, operator: &str) -> Result<Option<ValidatorRecord>, WatchError> {
        Ok(self.validators.lock().map_err(poisoned)?.get(operator).cloned())
    }

    async fn find_validator_by_hex(
        &self,
        hex_address: &str,
    ) -> Result<Option<ValidatorRecord>, WatchError> {
        Ok(self
            .validators
            .lock()
            .map_err(poisoned)?
            .values()
            .find(|v| v.hex_address.eq_ignore_ascii_case(hex_address))
            .cloned())
    }

    async fn all_validators(&self) -> Result<Vec<ValidatorRecord>, WatchError> {
        let mut records: Vec<_> = self
            .validators
            .lock()
            .map_err(poisoned)?
            .values()
            .cloned()
            .collect();
        records.sort_by(|a, b| a.operator_address.cmp(&b.operator_address));
        Ok(records)
    }

    async fn upsert_validator(&self, record: ValidatorRecord) -> Result<(), WatchError> {
        self.validators
            .lock()
            .map_err(poisoned)?
            .insert(record.operator_address.clone(), record);
        Ok(())
    }

    async fn set_jailed(&self, operator: &str, jailed: bool) -> Result<bool, WatchError> {
        let mut map = self.validators.lock().map_err(poisoned)?;
        let record = map
            .get_mut(operator)
            .ok_or_else(|| WatchError::NotFound(format!("validator {operator}")))?;
        if record.jailed == jailed {
            return Ok(false);
        }
        record.jailed = jailed;
        Ok(true)
    }
}

#[async_trait]
impl BlockStore for MemoryStore {
    async fn insert_block(&self, record: BlockRecord, limit: usize) -> Result<(), WatchError> {
        let mut blocks = self.blocks.lock().map_err(poisoned)?;
        blocks.push_back(record);
        while blocks.len() > limit {
            blocks.pop_front();
        }
        Ok(())
    }

    async fn blocks(&self) -> Result<Vec<BlockRecord>, WatchError> {
        Ok(self.blocks.lock().map_err(poisoned)?.iter().cloned().collect())
    }
}
