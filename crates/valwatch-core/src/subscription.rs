//! Subscribe / unsubscribe operations used by front ends.

use std::sync::Arc;

use crate::address;
use crate::error::WatchError;
use crate::registry::ValidatorRegistry;
use crate::store::Store;
use crate::types::{Subscriber, ValidatorSubscription};

pub struct Subscriptions {
    registry: Arc<ValidatorRegistry>,
    store: Arc<dyn Store>,
    track_all_validators: bool,
}

impl Subscriptions {
    pub fn new(registry: Arc<ValidatorRegistry>, store: Arc<dyn Store>, track_all_validators: bool) -> Self {
        Self {
            registry,
            store,
            track_all_validators,
        }
    }

    /// Add `target` to the subscribers of `operator`.
    ///
    /// The validator is refreshed from the chain first; jailed validators
    /// are rejected. Subscribing twice is a no-op.
    pub async fn subscribe(&self, operator: &str, target: &str) -> Result<ValidatorSubscription, WatchError> {
        if !address::is_operator_address(operator, self.registry.account_prefix()) {
            return Err(WatchError::InvalidAddress(operator.to_string()));
        }
        let record = self.registry.refresh_one(operator).await?;
        if record.jailed {
            return Err(WatchError::Rejected(format!(
                "{} is jailed right now",
                record.display_name()
            )));
        }
        self.registry.ensure_subscription(operator).await?;

        let mut sub = self
            .store
            .find_subscription(operator)
            .await?
            .ok_or_else(|| WatchError::NotFound(format!("subscription {operator}")))?;
        if sub.add_subscriber(Subscriber::new(target)) {
            self.store
                .set_subscribers(operator, sub.subscribers.clone())
                .await?;
            tracing::info!(validator = %operator, recipient = target, "subscriber added");
        }
        Ok(sub)
    }

    /// Remove `target` from the subscribers of `operator`.
    ///
    /// When the list becomes empty and only subscribed validators are
    /// tracked, the subscription record is deleted.
    pub async fn unsubscribe(&self, operator: &str, target: &str) -> Result<(), WatchError> {
        let Some(mut sub) = self.store.find_subscription(operator).await? else {
            return Err(WatchError::NotFound(format!("subscription {operator}")));
        };
        if !sub.remove_subscriber(target) {
            return Err(WatchError::NotFound(format!("{target} is not subscribed to {operator}")));
        }
        if sub.subscribers.is_empty() && !self.track_all_validators {
            self.store.delete_subscription(operator).await?;
        } else {
            self.store.set_subscribers(operator, sub.subscribers).await?;
        }
        tracing::info!(validator = %operator, recipient = target, "subscriber removed");
        Ok(())
    }

    /// Operators `target` is subscribed to.
    pub async fn subscriptions_of(&self, target: &str) -> Result<Vec<String>, WatchError> {
        Ok(self
            .store
            .all_subscriptions()
            .await?
            .into_iter()
            .filter(|s| s.subscribers.iter().any(|x| x.target == target))
            .map(|s| s.operator_address)
            .collect())
    }
}
