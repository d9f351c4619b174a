//! Periodic per-validator reports.
//!
//! Every time the observed height crosses a multiple of the report interval,
//! each subscribed validator gets a summary comparing its state at
//! `height - interval` with its state at `height`. Reports run on detached
//! tasks, one per validator, so a failing validator never aborts the others
//! and the streaming path never waits on them.

use std::fmt::Write as _;
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;

use crate::chain::ChainClient;
use crate::error::WatchError;
use crate::history::{calculate_uptime, proposal_share};
use crate::notify::Broadcaster;
use crate::store::Store;
use crate::types::{BlockRecord, ValidatorSubscription};

/// Base-unit tokens per display token.
const TOKEN_SCALE: f64 = 1_000_000.0;

/// A metric observed at the start and end of a reporting window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delta {
    pub before: f64,
    pub after: f64,
}

impl Delta {
    pub fn new(before: f64, after: f64) -> Self {
        Self { before, after }
    }

    pub fn change(&self) -> f64 {
        self.after - self.before
    }

    fn line(&self, label: &str, unit: &str) -> String {
        format!(
            "{label}: {:.2}{unit} → {:.2}{unit} ({:+.2})",
            self.before,
            self.after,
            self.change()
        )
    }
}

/// Snapshot diff for one validator.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorReport {
    pub operator_address: String,
    pub moniker: String,
    pub from_height: u64,
    pub to_height: u64,
    /// Percent.
    pub commission_rate: Delta,
    /// Percent.
    pub max_commission_rate: Delta,
    /// Percent of bonded stake.
    pub voting_power: Delta,
    /// Display tokens.
    pub tokens: Delta,
    pub uptime: f64,
    pub proposed_blocks: usize,
    pub retained_blocks: usize,
    pub proposal_share: f64,
}

impl ValidatorReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "📊 Report for {} ({}), blocks {}..{}",
            self.moniker, self.operator_address, self.from_height, self.to_height
        );
        let _ = writeln!(out, "{}", self.commission_rate.line("Commission rate", "%"));
        let _ = writeln!(out, "{}", self.max_commission_rate.line("Max commission rate", "%"));
        let _ = writeln!(out, "{}", self.voting_power.line("Voting power", "%"));
        let _ = writeln!(out, "{}", self.tokens.line("Total tokens", ""));
        let _ = writeln!(out, "Uptime: {:.2}%", self.uptime);
        let _ = write!(
            out,
            "Proposed blocks: {} of {} ({:.2}%)",
            self.proposed_blocks, self.retained_blocks, self.proposal_share
        );
        out
    }
}

pub struct ReportingScheduler {
    interval: u64,
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn Store>,
    broadcaster: Broadcaster,
    /// `height / interval` of the last trigger; `None` until the first block.
    last_bucket: Mutex<Option<u64>>,
}

impl ReportingScheduler {
    pub fn new(
        interval: u64,
        chain: Arc<dyn ChainClient>,
        store: Arc<dyn Store>,
        broadcaster: Broadcaster,
    ) -> Self {
        Self {
            interval: interval.max(1),
            chain,
            store,
            broadcaster,
            last_bucket: Mutex::new(None),
        }
    }

    /// Returns `true` if `height` crosses into a new interval. The first
    /// observed height only sets the baseline.
    pub fn crosses(&self, height: u64) -> bool {
        let bucket = height / self.interval;
        let Ok(mut last) = self.last_bucket.lock() else {
            return false;
        };
        match *last {
            None => {
                *last = Some(bucket);
                false
            }
            Some(prev) if bucket > prev => {
                *last = Some(bucket);
                true
            }
            Some(_) => false,
        }
    }

    /// Spawn a report pass if `height` crosses an interval boundary.
    pub fn maybe_trigger(self: &Arc<Self>, height: u64) -> bool {
        if !self.crosses(height) {
            return false;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            match this.run(height).await {
                Ok(sent) => tracing::info!(height, sent, "report pass finished"),
                Err(e) => tracing::warn!(height, error = %e, "report pass aborted"),
            }
        });
        true
    }

    /// Build and deliver reports for every subscribed validator.
    /// Returns the number of validators reported.
    pub async fn run(&self, height: u64) -> Result<usize, WatchError> {
        let subs: Vec<ValidatorSubscription> = self
            .store
            .all_subscriptions()
            .await?
            .into_iter()
            .filter(ValidatorSubscription::has_subscribers)
            .collect();
        let blocks: Arc<[BlockRecord]> = self.store.blocks().await?.into();
        tracing::info!(height, validators = subs.len(), blocks = blocks.len(), "starting report pass");

        let mut tasks = JoinSet::new();
        for sub in subs {
            let chain = Arc::clone(&self.chain);
            let store = Arc::clone(&self.store);
            let blocks = Arc::clone(&blocks);
            let interval = self.interval;
            tasks.spawn(async move {
                let result = build_report(chain.as_ref(), store.as_ref(), &sub, &blocks, height, interval).await;
                (sub, result)
            });
        }

        let mut sent = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((sub, Ok(report))) => {
                    self.broadcaster.broadcast(&sub.subscribers, report.render());
                    sent += 1;
                }
                Ok((sub, Err(e))) => {
                    tracing::warn!(validator = %sub.operator_address, error = %e, "report failed");
                }
                Err(e) => tracing::error!(error = %e, "report task panicked"),
            }
        }
        Ok(sent)
    }
}

/// Compare one validator between `height - interval` and `height`.
pub async fn build_report(
    chain: &dyn ChainClient,
    store: &dyn Store,
    sub: &ValidatorSubscription,
    blocks: &[BlockRecord],
    height: u64,
    interval: u64,
) -> Result<ValidatorReport, WatchError> {
    let operator = sub.operator_address.as_str();
    let record = store
        .find_validator(operator)
        .await?
        .ok_or_else(|| WatchError::NotFound(format!("validator {operator}")))?;
    let from = height.saturating_sub(interval).max(1);

    let (before, after, pool_before, pool_after) = futures::try_join!(
        chain.validator(operator, Some(from)),
        chain.validator(operator, Some(height)),
        chain.staking_pool(Some(from)),
        chain.staking_pool(Some(height)),
    )?;

    let proposed_blocks = blocks
        .iter()
        .filter(|b| b.proposer_address.eq_ignore_ascii_case(&record.hex_address))
        .count();

    Ok(ValidatorReport {
        operator_address: operator.to_string(),
        moniker: record.display_name().to_string(),
        from_height: from,
        to_height: height,
        commission_rate: Delta::new(before.commission.rate * 100.0, after.commission.rate * 100.0),
        max_commission_rate: Delta::new(
            before.commission.max_rate * 100.0,
            after.commission.max_rate * 100.0,
        ),
        voting_power: Delta::new(
            pool_before.voting_power_pct(before.tokens),
            pool_after.voting_power_pct(after.tokens),
        ),
        tokens: Delta::new(
            before.tokens as f64 / TOKEN_SCALE,
            after.tokens as f64 / TOKEN_SCALE,
        ),
        uptime: calculate_uptime(&sub.blocks_history),
        proposed_blocks,
        retained_blocks: blocks.len(),
        proposal_share: proposal_share(blocks, &record.hex_address),
    })
}
