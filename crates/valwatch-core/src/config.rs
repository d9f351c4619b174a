//! Tracking engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::WatchError;

/// Configuration for the tracking engine, registry and reporting scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Bech32 account prefix of the chain (e.g. `"cosmos"`).
    #[serde(default = "default_account_prefix")]
    pub account_prefix: String,
    /// Attendance entries kept per validator.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// Track every known validator instead of only subscribed ones.
    #[serde(default)]
    pub track_all_validators: bool,
    /// Blocks between reports.
    #[serde(default = "default_report_interval")]
    pub report_interval: u64,
    /// Block records retained for proposal-share reporting.
    #[serde(default = "default_blockchain_history_limit")]
    pub blockchain_history_limit: usize,
    /// Blocks between slashing-parameter refreshes.
    #[serde(default = "default_slashing_refresh_interval")]
    pub slashing_refresh_interval: u64,
    /// Slashing window used until the first successful refresh.
    #[serde(default = "default_slashing_window")]
    pub initial_slashing_window: f64,
    /// Per-validator updates running at once for a single block.
    #[serde(default = "default_max_concurrent_updates")]
    pub max_concurrent_updates: usize,
    /// Upper bound for one validator's update (store reads + write).
    #[serde(default = "default_update_timeout_ms")]
    pub update_timeout_ms: u64,
}

fn default_account_prefix() -> String {
    "cosmos".into()
}
fn default_history_window() -> usize {
    1_000
}
fn default_report_interval() -> u64 {
    10_000
}
fn default_blockchain_history_limit() -> usize {
    10_000
}
fn default_slashing_refresh_interval() -> u64 {
    1_000
}
fn default_slashing_window() -> f64 {
    5_000.0
}
fn default_max_concurrent_updates() -> usize {
    64
}
fn default_update_timeout_ms() -> u64 {
    10_000
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            account_prefix: default_account_prefix(),
            history_window: default_history_window(),
            track_all_validators: false,
            report_interval: default_report_interval(),
            blockchain_history_limit: default_blockchain_history_limit(),
            slashing_refresh_interval: default_slashing_refresh_interval(),
            initial_slashing_window: default_slashing_window(),
            max_concurrent_updates: default_max_concurrent_updates(),
            update_timeout_ms: default_update_timeout_ms(),
        }
    }
}

impl TrackerConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), WatchError> {
        if self.history_window == 0 {
            return Err(WatchError::Config("history_window must be > 0".into()));
        }
        if self.report_interval == 0 {
            return Err(WatchError::Config("report_interval must be > 0".into()));
        }
        if self.slashing_refresh_interval == 0 {
            return Err(WatchError::Config("slashing_refresh_interval must be > 0".into()));
        }
        if self.max_concurrent_updates == 0 {
            return Err(WatchError::Config("max_concurrent_updates must be > 0".into()));
        }
        if self.initial_slashing_window < 2.0 {
            return Err(WatchError::Config("initial_slashing_window must be >= 2".into()));
        }
        if self.account_prefix.is_empty() {
            return Err(WatchError::Config("account_prefix must not be empty".into()));
        }
        Ok(())
    }
}
