//! Alert delivery.
//!
//! A [`Notifier`] delivers one text message to one opaque target. The
//! [`Broadcaster`] fans a message out to a subscriber list, one detached task
//! per subscriber; failures are logged and never retried.

use std::sync::Arc;

use async_trait::async_trait;

use crate::alert::severity_marker;
use crate::error::WatchError;
use crate::types::{Subscriber, ValidatorRecord};

/// A sink for formatted text messages.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn deliver(&self, target: &str, text: &str) -> Result<(), WatchError>;

    /// Short name for log lines.
    fn name(&self) -> &str {
        "notifier"
    }
}

/// Fire-and-forget fan-out over a [`Notifier`].
#[derive(Clone)]
pub struct Broadcaster {
    notifier: Arc<dyn Notifier>,
}

impl Broadcaster {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Spawn one delivery per subscriber and return immediately.
    pub fn broadcast(&self, subscribers: &[Subscriber], text: impl Into<String>) {
        let text: Arc<str> = Arc::from(text.into());
        for subscriber in subscribers {
            let notifier = Arc::clone(&self.notifier);
            let target = subscriber.target.clone();
            let text = Arc::clone(&text);
            tokio::spawn(async move {
                if let Err(e) = notifier.deliver(&target, &text).await {
                    tracing::warn!(
                        notifier = notifier.name(),
                        recipient = %target,
                        error = %e,
                        "notification delivery failed"
                    );
                }
            });
        }
    }
}

// ─── Message formatting ──────────────────────────────────────────────────────

pub fn missed_blocks_message(
    validator: &ValidatorRecord,
    counter: u64,
    height: u64,
    level: u32,
) -> String {
    format!(
        "{} Alert: {} has missed {} consecutive block{} (latest at height {}).\nOperator: {}",
        severity_marker(level),
        validator.display_name(),
        counter,
        if counter == 1 { "" } else { "s" },
        height,
        validator.operator_address,
    )
}

pub fn jailed_message(validator: &ValidatorRecord, height: u64) -> String {
    format!(
        "⛔ {} has been jailed (detected at height {}).\nOperator: {}",
        validator.display_name(),
        height,
        validator.operator_address,
    )
}

pub fn unjailed_message(validator: &ValidatorRecord, height: u64) -> String {
    format!(
        "✅ {} was unjailed at height {} and is tracked again.",
        validator.display_name(),
        height,
    )
}
