//! Application configuration, loaded from a JSON file.
//!
//! ```json
//! {
//!   "chain":   { "lcd_url": "http://localhost:1317", "rpc_url": "http://localhost:26657" },
//!   "stream":  { "primary_url": "ws://localhost:26657/websocket", "backup_url": "ws://backup:26657/websocket" },
//!   "tracker": { "account_prefix": "cosmos", "track_all_validators": false },
//!   "storage": { "path": "./valwatch.db" },
//!   "notifier": { "webhook_url": "http://localhost:8080/alerts" },
//!   "log":     { "level": "info", "json": false }
//! }
//! ```
//! Every section and field is optional.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use valwatch_core::TrackerConfig;
use valwatch_rpc::{HttpClientConfig, StreamConfig};

use crate::logging::LogConfig;

/// Storage path that selects the in-memory store.
pub const MEMORY_STORE: &str = ":memory:";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_lcd_url")]
    pub lcd_url: String,
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default)]
    pub http: HttpClientConfig,
}

fn default_lcd_url() -> String {
    "http://localhost:1317".into()
}

fn default_rpc_url() -> String {
    "http://localhost:26657".into()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            lcd_url: default_lcd_url(),
            rpc_url: default_rpc_url(),
            http: HttpClientConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file path or URL; `":memory:"` for a non-persistent store.
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_path() -> String {
    "valwatch.db".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// POST `{"target", "text"}` here. Alerts are only logged when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_webhook_timeout_ms() -> u64 {
    10_000
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_ms: default_webhook_timeout_ms(),
        }
    }
}

impl AppConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(text).context("invalid configuration JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.tracker.validate()?;
        if self.stream.primary_url.is_empty() {
            anyhow::bail!("stream.primary_url must not be empty");
        }
        if self.stream.queue_capacity == 0 {
            anyhow::bail!("stream.queue_capacity must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_uses_defaults() {
        let cfg = AppConfig::from_json("{}").unwrap();
        assert_eq!(cfg.chain.lcd_url, "http://localhost:1317");
        assert_eq!(cfg.stream.watchdog_interval_secs, 120);
        assert_eq!(cfg.stream.reconnect_initial_ms, 500);
        assert_eq!(cfg.tracker.account_prefix, "cosmos");
        assert_eq!(cfg.storage.path, "valwatch.db");
        assert!(cfg.notifier.webhook_url.is_none());
        assert_eq!(cfg.log.level, "info");
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let cfg = AppConfig::from_json(
            r#"{
                "chain": { "lcd_url": "https://lcd.example.com" },
                "stream": { "primary_url": "ws://a:26657/websocket", "backup_url": "ws://b:26657/websocket" },
                "tracker": { "account_prefix": "persistence", "track_all_validators": true },
                "storage": { "path": ":memory:" }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.chain.rpc_url, "http://localhost:26657");
        assert_eq!(cfg.stream.backup_url.as_deref(), Some("ws://b:26657/websocket"));
        assert_eq!(cfg.stream.queue_capacity, 256);
        assert!(cfg.tracker.track_all_validators);
        assert_eq!(cfg.tracker.history_window, 1_000);
        assert_eq!(cfg.storage.path, MEMORY_STORE);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(AppConfig::from_json(r#"{ "stream": { "queue_capacity": 0 } }"#).is_err());
        assert!(AppConfig::from_json("[1, 2]").is_err());
    }
}
