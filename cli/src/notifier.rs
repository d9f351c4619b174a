//! Notification sinks shipped with the binary.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use valwatch_core::{Notifier, WatchError};

/// Writes every alert to the log. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, target: &str, text: &str) -> Result<(), WatchError> {
        tracing::info!(recipient = %target, "{text}");
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    target: &'a str,
    text: &'a str,
}

/// POSTs `{"target", "text"}` as JSON to a fixed URL.
pub struct WebhookNotifier {
    url: String,
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout_ms: u64) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            url: url.into(),
            http,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, target: &str, text: &str) -> Result<(), WatchError> {
        let fail = |reason: String| WatchError::Notify {
            target: target.to_string(),
            reason,
        };
        let resp = self
            .http
            .post(&self.url)
            .json(&WebhookPayload { target, text })
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(fail(format!("HTTP {status}: {body}")));
        }
        tracing::debug!(recipient = %target, url = %self.url, "webhook delivered");
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
