//! LCD + Tendermint RPC client backed by `reqwest`.
//!
//! Transient failures (connection errors, non-2xx, timeouts) are retried with
//! exponential backoff. An `error` envelope from the node is a per-call
//! failure and is returned immediately.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use valwatch_core::{
    BlockCommitEvent, ChainClient, SlashingParams, StakingPool, TxResult, ValidatorInfo,
    WatchError,
};

use crate::backoff::RetryConfig;
use crate::decode;
use crate::error::TransportError;

/// Transactions requested per `/tx_search` page.
const TX_PAGE_SIZE: u32 = 100;

/// Configuration for `CosmosHttpClient`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpClientConfig {
    pub retry: RetryConfig,
    pub request_timeout_ms: u64,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout_ms: 30_000,
        }
    }
}

/// Read-only client for a Cosmos SDK node.
///
/// `lcd_url` serves the legacy REST routes (`/staking/...`, `/slashing/...`);
/// `rpc_url` serves Tendermint RPC (`/block`, `/tx_search`, `/status`).
pub struct CosmosHttpClient {
    lcd_url: String,
    rpc_url: String,
    http: reqwest::Client,
    retry: RetryConfig,
    request_timeout: Duration,
}

impl CosmosHttpClient {
    pub fn new(
        lcd_url: impl Into<String>,
        rpc_url: impl Into<String>,
        config: HttpClientConfig,
    ) -> Result<Self, TransportError> {
        let request_timeout = Duration::from_millis(config.request_timeout_ms);
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            lcd_url: trim_base(lcd_url.into()),
            rpc_url: trim_base(rpc_url.into()),
            http,
            retry: config.retry,
            request_timeout,
        })
    }

    pub fn lcd_url(&self) -> &str {
        &self.lcd_url
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn get_once(&self, url: &str) -> Result<Value, TransportError> {
        let resp = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    ms: self.request_timeout.as_millis() as u64,
                }
            } else {
                TransportError::Http(e.to_string())
            }
        })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        if !status.is_success() {
            // LCD reports unknown validators and future heights as 4xx/5xx
            // with an `error` body; those are per-call answers, not outages.
            if let Ok(value) = serde_json::from_str::<Value>(&body) {
                if value.get("error").map_or(false, |e| !e.is_null()) {
                    return Ok(value);
                }
            }
            return Err(TransportError::Http(format!(
                "HTTP {}: {body}",
                status.as_u16()
            )));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// GET with retries for transient errors.
    async fn get(&self, url: &str) -> Result<Value, TransportError> {
        let mut backoff = self.retry.backoff();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.get_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt <= self.retry.max_retries => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        url = %url,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    tracing::error!(attempt, error = %e, url = %url, "max retries exceeded");
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn lcd(&self, path: &str) -> Result<Value, TransportError> {
        let body = self.get(&format!("{}{path}", self.lcd_url)).await?;
        decode::lcd_result(body)
    }

    async fn rpc(&self, path: &str) -> Result<Value, TransportError> {
        let body = self.get(&format!("{}{path}", self.rpc_url)).await?;
        decode::rpc_result(body)
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn at_height(path: String, height: Option<u64>) -> String {
    match height {
        Some(h) => format!("{path}?height={h}"),
        None => path,
    }
}

#[async_trait]
impl ChainClient for CosmosHttpClient {
    async fn validators(&self) -> Result<Vec<ValidatorInfo>, WatchError> {
        let result = self.lcd("/staking/validators").await?;
        Ok(decode::validator_list(&result)?)
    }

    async fn validator(
        &self,
        operator: &str,
        height: Option<u64>,
    ) -> Result<ValidatorInfo, WatchError> {
        let path = at_height(format!("/staking/validators/{operator}"), height);
        let result = self.lcd(&path).await?;
        Ok(decode::validator_info(&result)?)
    }

    async fn staking_pool(&self, height: Option<u64>) -> Result<StakingPool, WatchError> {
        let result = self.lcd(&at_height("/staking/pool".into(), height)).await?;
        Ok(decode::staking_pool(&result)?)
    }

    async fn block(&self, height: u64) -> Result<BlockCommitEvent, WatchError> {
        let result = self.rpc(&format!("/block?height={height}")).await?;
        let block = result
            .get("block")
            .ok_or_else(|| TransportError::malformed("block result without block"))?;
        Ok(decode::block_event(block)?)
    }

    async fn slashing_params(&self) -> Result<SlashingParams, WatchError> {
        let result = self.lcd("/slashing/parameters").await?;
        Ok(decode::slashing_params(&result)?)
    }

    async fn block_txs(&self, height: u64) -> Result<Vec<TxResult>, WatchError> {
        let result = self
            .rpc(&format!(
                "/tx_search?query=\"tx.height={height}\"&per_page={TX_PAGE_SIZE}"
            ))
            .await?;
        Ok(decode::tx_search(&result)?)
    }

    async fn latest_height(&self) -> Result<u64, WatchError> {
        let result = self.rpc("/status").await?;
        Ok(decode::status_height(&result)?)
    }
}
