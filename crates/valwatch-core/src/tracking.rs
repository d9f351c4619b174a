//! Tracking engine: the per-block attendance and alerting state machine.
//!
//! For every block the engine:
//! 1. records the block (proposer, tx count) in the FIFO block store;
//! 2. spawns a transaction scan for validator mutations;
//! 3. updates every tracked validator concurrently through a bounded worker
//!    pool, waiting for all of them before taking the next block so each
//!    validator's history stays in height order;
//! 4. triggers the report pass and slashing-window refresh when due.
//!
//! Per validator: `ATTENDING → MISSING(1) → MISSING(k+1) → … → JAILED`, with
//! any attended block returning to `ATTENDING`. Jailed validators keep
//! accumulating history but their streak is frozen.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;

use crate::alert::{self, Observation};
use crate::chain::ChainClient;
use crate::config::TrackerConfig;
use crate::error::WatchError;
use crate::notify::{self, Broadcaster, Notifier};
use crate::registry::{ValidatorMutation, ValidatorRegistry};
use crate::report::ReportingScheduler;
use crate::store::Store;
use crate::types::{BlockCommitEvent, TrackingUpdate, ValidatorRecord, ValidatorSubscription};

/// The current slashing window, shared between the engine and refresh tasks.
#[derive(Debug, Clone)]
pub struct SlashingWindow(Arc<AtomicU64>);

impl SlashingWindow {
    pub fn new(window: f64) -> Self {
        Self(Arc::new(AtomicU64::new(window.max(2.0).to_bits())))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, window: f64) {
        self.0.store(window.max(2.0).to_bits(), Ordering::Relaxed);
    }
}

/// Counters for one processed block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockOutcome {
    pub updated: usize,
    pub missed: usize,
    pub notified: usize,
    pub failed: usize,
}

pub struct TrackingEngine {
    config: TrackerConfig,
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn Store>,
    registry: Arc<ValidatorRegistry>,
    broadcaster: Broadcaster,
    reports: Arc<ReportingScheduler>,
    slashing_window: SlashingWindow,
    workers: Arc<Semaphore>,
    /// Operators with a jailed recheck in flight.
    jail_checks: Mutex<HashSet<String>>,
    last_height: AtomicU64,
}

impl TrackingEngine {
    pub fn new(
        config: TrackerConfig,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn Store>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let registry = Arc::new(ValidatorRegistry::new(
            Arc::clone(&chain),
            Arc::clone(&store),
            config.account_prefix.clone(),
        ));
        let broadcaster = Broadcaster::new(notifier);
        let reports = Arc::new(ReportingScheduler::new(
            config.report_interval,
            Arc::clone(&chain),
            Arc::clone(&store),
            broadcaster.clone(),
        ));
        Self {
            slashing_window: SlashingWindow::new(config.initial_slashing_window),
            workers: Arc::new(Semaphore::new(config.max_concurrent_updates.max(1))),
            config,
            chain,
            store,
            registry,
            broadcaster,
            reports,
            jail_checks: Mutex::new(HashSet::new()),
            last_height: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> Arc<ValidatorRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn slashing_window(&self) -> SlashingWindow {
        self.slashing_window.clone()
    }

    /// Height of the last processed block (0 before the first).
    pub fn last_height(&self) -> u64 {
        self.last_height.load(Ordering::Relaxed)
    }

    /// Fetch the slashing parameters and update the escalation scale.
    pub async fn refresh_slashing_window(&self) -> Result<f64, WatchError> {
        let params = self.chain.slashing_params().await?;
        let window = params.slashing_window();
        let previous = self.slashing_window.get();
        self.slashing_window.set(window);
        if (previous - window).abs() > f64::EPSILON {
            tracing::info!(
                signed_blocks_window = params.signed_blocks_window,
                min_signed_per_window = params.min_signed_per_window,
                window,
                "slashing window updated"
            );
        }
        Ok(window)
    }

    /// Consume block events until the sender side closes.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<BlockCommitEvent>) {
        if let Err(e) = self.refresh_slashing_window().await {
            tracing::warn!(
                error = %e,
                window = self.slashing_window.get(),
                "slashing parameters unavailable, using configured window"
            );
        }
        while let Some(event) = events.recv().await {
            self.handle_block(event).await;
        }
        tracing::info!(last_height = self.last_height(), "block event stream closed");
    }

    /// Per-block entry point.
    pub async fn handle_block(self: &Arc<Self>, event: BlockCommitEvent) -> BlockOutcome {
        let height = event.height;
        let previous = self.last_height.load(Ordering::Relaxed);
        if height <= previous {
            tracing::debug!(height, previous, "ignoring stale block");
            return BlockOutcome::default();
        }
        self.last_height.store(height, Ordering::Relaxed);
        tracing::debug!(height, precommits = event.precommits.len(), txs = event.tx_count, "processing block");

        self.spawn_block_record(&event);
        if event.tx_count > 0 {
            self.spawn_tx_scan(height);
        }
        if height % self.config.slashing_refresh_interval.max(1) == 0 {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = this.refresh_slashing_window().await {
                    tracing::warn!(height, error = %e, "slashing window refresh failed");
                }
            });
        }
        self.reports.maybe_trigger(height);

        self.update_validators(Arc::new(event)).await
    }

    fn spawn_block_record(&self, event: &BlockCommitEvent) {
        let store = Arc::clone(&self.store);
        let record = event.to_record();
        let limit = self.config.blockchain_history_limit;
        tokio::spawn(async move {
            let height = record.height;
            if let Err(e) = store.insert_block(record, limit).await {
                tracing::warn!(height, error = %e, "failed to record block");
            }
        });
    }

    fn spawn_tx_scan(self: &Arc<Self>, height: u64) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.registry.scan_block_txs(height).await {
                Ok(applied) => {
                    for (mutation, record) in applied {
                        if let ValidatorMutation::Unjailed(op) = &mutation {
                            if record.jailed {
                                continue;
                            }
                            if let Err(e) = this.announce_unjail(&record, height).await {
                                tracing::warn!(height, validator = %op, error = %e, "unjail notice not sent");
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!(height, error = %e, "transaction scan failed"),
            }
        });
    }

    async fn update_validators(self: &Arc<Self>, event: Arc<BlockCommitEvent>) -> BlockOutcome {
        let height = event.height;
        let subs = match self.store.all_subscriptions().await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::warn!(height, error = %e, "cannot load subscriptions, skipping block");
                return BlockOutcome::default();
            }
        };

        let timeout = Duration::from_millis(self.config.update_timeout_ms);
        let mut tasks = JoinSet::new();
        for sub in subs
            .into_iter()
            .filter(|s| self.config.track_all_validators || s.has_subscribers())
        {
            let permit = match Arc::clone(&self.workers).acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            let this = Arc::clone(self);
            let event = Arc::clone(&event);
            tasks.spawn(async move {
                let operator = sub.operator_address.clone();
                let result = tokio::time::timeout(timeout, this.update_validator(sub, &event))
                    .await
                    .unwrap_or_else(|_| {
                        Err(WatchError::Timeout {
                            ms: timeout.as_millis() as u64,
                        })
                    });
                drop(permit);
                (operator, result)
            });
        }

        let mut outcome = BlockOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Observation::Stale))) => {}
                Ok((_, Ok(obs))) => {
                    outcome.updated += 1;
                    if matches!(obs, Observation::Missed { .. }) {
                        outcome.missed += 1;
                    }
                    if obs.should_notify() {
                        outcome.notified += 1;
                    }
                }
                Ok((operator, Err(e))) => {
                    outcome.failed += 1;
                    tracing::warn!(height, validator = %operator, error = %e, "validator update failed");
                }
                Err(e) => {
                    outcome.failed += 1;
                    tracing::error!(height, error = %e, "validator update task panicked");
                }
            }
        }
        tracing::debug!(
            height,
            updated = outcome.updated,
            missed = outcome.missed,
            notified = outcome.notified,
            failed = outcome.failed,
            "block processed"
        );
        outcome
    }

    /// Attendance, streak and persistence for one validator at one height.
    async fn update_validator(
        self: &Arc<Self>,
        sub: ValidatorSubscription,
        event: &BlockCommitEvent,
    ) -> Result<Observation, WatchError> {
        let operator = sub.operator_address;
        // Re-read so a concurrent streak reset or subscriber change is not lost.
        let Some(mut sub) = self.store.find_subscription(&operator).await? else {
            return Ok(Observation::Stale);
        };
        let Some(record) = self.store.find_validator(&operator).await? else {
            tracing::warn!(validator = %operator, "no validator record, refreshing");
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                if let Err(e) = registry.refresh_one(&operator).await {
                    tracing::warn!(validator = %operator, error = %e, "validator refresh failed");
                }
            });
            return Ok(Observation::Stale);
        };

        let found = event.signed_by(&record.hex_address);
        let observation = alert::observe(
            &mut sub,
            event.height,
            found,
            record.jailed,
            self.slashing_window.get(),
            self.config.history_window,
        );
        if observation == Observation::Stale {
            return Ok(observation);
        }

        if let Observation::Missed { counter, level, notify: fire } = observation {
            tracing::debug!(height = event.height, validator = %operator, counter, level, "missed block");
            if fire {
                tracing::info!(
                    height = event.height,
                    validator = %operator,
                    counter,
                    level,
                    subscribers = sub.subscribers.len(),
                    "missed-blocks alert"
                );
                self.broadcaster.broadcast(
                    &sub.subscribers,
                    notify::missed_blocks_message(&record, counter, event.height, level),
                );
                self.spawn_jail_check(&operator, event.height);
            }
        }

        self.store
            .update_tracking(&operator, TrackingUpdate::from(&sub))
            .await?;
        Ok(observation)
    }

    /// Tell the subscribers of an unjailed validator that tracking resumed.
    /// Returns the number of subscribers notified.
    pub async fn announce_unjail(&self, record: &ValidatorRecord, height: u64) -> Result<usize, WatchError> {
        let subscribers = self
            .store
            .find_subscription(&record.operator_address)
            .await?
            .map(|s| s.subscribers)
            .unwrap_or_default();
        self.broadcaster
            .broadcast(&subscribers, notify::unjailed_message(record, height));
        Ok(subscribers.len())
    }

    /// Re-fetch the validator and announce a jailing once per transition.
    fn spawn_jail_check(self: &Arc<Self>, operator: &str, height: u64) {
        {
            let Ok(mut inflight) = self.jail_checks.lock() else {
                return;
            };
            if !inflight.insert(operator.to_string()) {
                return;
            }
        }
        let this = Arc::clone(self);
        let operator = operator.to_string();
        tokio::spawn(async move {
            if let Err(e) = this.check_jailed(&operator, height).await {
                tracing::warn!(validator = %operator, error = %e, "jailed check failed");
            }
            if let Ok(mut inflight) = this.jail_checks.lock() {
                inflight.remove(&operator);
            }
        });
    }

    /// Returns `true` if a jailed notification was sent.
    pub async fn check_jailed(&self, operator: &str, height: u64) -> Result<bool, WatchError> {
        let info = self.chain.validator(operator, None).await?;
        if !info.jailed || !self.registry.mark_jailed(operator).await? {
            return Ok(false);
        }
        let record = self
            .store
            .find_validator(operator)
            .await?
            .ok_or_else(|| WatchError::NotFound(format!("validator {operator}")))?;
        let subscribers = self
            .store
            .find_subscription(operator)
            .await?
            .map(|s| s.subscribers)
            .unwrap_or_default();
        tracing::warn!(validator = %operator, height, "validator jailed");
        self.broadcaster
            .broadcast(&subscribers, notify::jailed_message(&record, height));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slashing_window_roundtrips_f64() {
        let w = SlashingWindow::new(50.0);
        assert_eq!(w.get(), 50.0);
        w.set(9_500.5);
        assert_eq!(w.get(), 9_500.5);
        w.set(0.3);
        assert_eq!(w.get(), 2.0);
    }
}
