//! Shared fixtures: a scripted chain client, a recording notifier and a
//! store that can be told to fail.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bech32::{ToBase32, Variant};

use valwatch_core::address;
use valwatch_core::types::{Commission, Description, TrackingUpdate};
use valwatch_core::{
    BlockCommitEvent, BlockRecord, BlockStore, ChainClient, ConsensusPubKey, MemoryStore,
    Notifier, Precommit, SlashingParams, StakingPool, Store, Subscriber, SubscriptionStore,
    TrackerConfig, TrackingEngine, TxResult, ValidatorInfo, ValidatorRecord, ValidatorStore,
    ValidatorSubscription, WatchError,
};

// ─── Validators ───────────────────────────────────────────────────────────────

pub struct TestValidator {
    pub operator: String,
    pub hex: String,
    pub info: ValidatorInfo,
}

/// A validator with deterministic keys derived from `seed`.
pub fn validator(seed: u8, moniker: &str) -> TestValidator {
    let operator = bech32::encode("cosmosvaloper", [seed; 20].to_base32(), Variant::Bech32).unwrap();
    let key = STANDARD.encode([seed; 32]);
    let pubkey = ConsensusPubKey::Ed25519Base64(key);
    let hex = address::hex_address(&pubkey).unwrap();
    let info = ValidatorInfo {
        operator_address: operator.clone(),
        consensus_pubkey: pubkey,
        jailed: false,
        status: 3,
        tokens: 1_000_000_000,
        description: Description {
            moniker: moniker.into(),
            ..Default::default()
        },
        commission: Commission {
            rate: 0.05,
            max_rate: 0.2,
            max_change_rate: 0.01,
        },
    };
    TestValidator { operator, hex, info }
}

// ─── Mock chain ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockChain {
    pub validators: Mutex<HashMap<String, ValidatorInfo>>,
    /// Per-height overrides used by reports.
    pub at_height: Mutex<HashMap<(String, u64), ValidatorInfo>>,
    pub pool: Mutex<StakingPool>,
    pub slashing: Mutex<Option<SlashingParams>>,
    pub txs: Mutex<HashMap<u64, Vec<TxResult>>>,
    /// Operators whose queries fail.
    pub failing: Mutex<HashSet<String>>,
    pub validator_calls: Mutex<Vec<String>>,
}

impl MockChain {
    pub fn new() -> Self {
        let chain = Self::default();
        *chain.pool.lock().unwrap() = StakingPool {
            bonded_tokens: 10_000_000_000,
            not_bonded_tokens: 0,
        };
        chain
    }

    pub fn with_window(self, signed_blocks_window: u64, min_signed_per_window: f64) -> Self {
        *self.slashing.lock().unwrap() = Some(SlashingParams {
            signed_blocks_window,
            min_signed_per_window,
        });
        self
    }

    pub fn add(&self, v: &TestValidator) {
        self.validators
            .lock()
            .unwrap()
            .insert(v.operator.clone(), v.info.clone());
    }

    pub fn set_jailed(&self, operator: &str, jailed: bool) {
        if let Some(info) = self.validators.lock().unwrap().get_mut(operator) {
            info.jailed = jailed;
        }
    }

    pub fn fail(&self, operator: &str) {
        self.failing.lock().unwrap().insert(operator.to_string());
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn validators(&self) -> Result<Vec<ValidatorInfo>, WatchError> {
        Ok(self.validators.lock().unwrap().values().cloned().collect())
    }

    async fn validator(&self, operator: &str, height: Option<u64>) -> Result<ValidatorInfo, WatchError> {
        self.validator_calls.lock().unwrap().push(operator.to_string());
        if self.failing.lock().unwrap().contains(operator) {
            return Err(WatchError::Chain(format!("HTTP 500: {operator}")));
        }
        if let Some(h) = height {
            if let Some(info) = self.at_height.lock().unwrap().get(&(operator.to_string(), h)) {
                return Ok(info.clone());
            }
        }
        self.validators
            .lock()
            .unwrap()
            .get(operator)
            .cloned()
            .ok_or_else(|| WatchError::Chain(format!("validator does not exist: {operator}")))
    }

    async fn staking_pool(&self, _height: Option<u64>) -> Result<StakingPool, WatchError> {
        Ok(*self.pool.lock().unwrap())
    }

    async fn block(&self, height: u64) -> Result<BlockCommitEvent, WatchError> {
        Err(WatchError::Chain(format!("no block {height}")))
    }

    async fn slashing_params(&self) -> Result<SlashingParams, WatchError> {
        self.slashing
            .lock()
            .unwrap()
            .ok_or_else(|| WatchError::Chain("slashing params unavailable".into()))
    }

    async fn block_txs(&self, height: u64) -> Result<Vec<TxResult>, WatchError> {
        Ok(self.txs.lock().unwrap().get(&height).cloned().unwrap_or_default())
    }

    async fn latest_height(&self) -> Result<u64, WatchError> {
        Ok(0)
    }
}

// ─── Recording notifier ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, text)| text.contains(needle))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn deliver(&self, target: &str, text: &str) -> Result<(), WatchError> {
        self.sent
            .lock()
            .unwrap()
            .push((target.to_string(), text.to_string()));
        Ok(())
    }
}

// ─── Harness ──────────────────────────────────────────────────────────────────

pub struct Harness {
    pub chain: Arc<MockChain>,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub engine: Arc<TrackingEngine>,
}

pub fn harness(chain: MockChain, config: TrackerConfig) -> Harness {
    let chain = Arc::new(chain);
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = Arc::new(TrackingEngine::new(
        config,
        chain.clone() as Arc<dyn ChainClient>,
        store.clone() as Arc<dyn Store>,
        notifier.clone() as Arc<dyn Notifier>,
    ));
    Harness {
        chain,
        store,
        notifier,
        engine,
    }
}

/// A block whose commit contains exactly `signers`.
pub fn block(height: u64, signers: &[&str]) -> BlockCommitEvent {
    BlockCommitEvent {
        height,
        proposer_address: signers.first().map(|s| s.to_string()).unwrap_or_default(),
        tx_count: 0,
        precommits: signers
            .iter()
            .map(|s| Precommit {
                validator_address: s.to_string(),
                present: true,
            })
            .collect(),
    }
}

/// Poll `cond` for up to one second.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

/// Let spawned fire-and-forget tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ─── Failing store ────────────────────────────────────────────────────────────

/// A [`MemoryStore`] whose subscription reads or tracking writes fail for
/// selected operators.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub failing_reads: Mutex<HashSet<String>>,
    pub failing_updates: Mutex<HashSet<String>>,
}

impl FlakyStore {
    pub fn fail_updates(&self, operator: &str) {
        self.failing_updates.lock().unwrap().insert(operator.to_string());
    }

    pub fn fail_reads(&self, operator: &str) {
        self.failing_reads.lock().unwrap().insert(operator.to_string());
    }

    pub fn heal(&self) {
        self.failing_reads.lock().unwrap().clear();
        self.failing_updates.lock().unwrap().clear();
    }
}

#[async_trait]
impl SubscriptionStore for FlakyStore {
    async fn find_subscription(&self, operator: &str) -> Result<Option<ValidatorSubscription>, WatchError> {
        if self.failing_reads.lock().unwrap().contains(operator) {
            return Err(WatchError::Storage(format!("cannot read {operator}")));
        }
        self.inner.find_subscription(operator).await
    }

    async fn all_subscriptions(&self) -> Result<Vec<ValidatorSubscription>, WatchError> {
        self.inner.all_subscriptions().await
    }

    async fn insert_subscription(&self, sub: ValidatorSubscription) -> Result<(), WatchError> {
        self.inner.insert_subscription(sub).await
    }

    async fn update_tracking(&self, operator: &str, update: TrackingUpdate) -> Result<(), WatchError> {
        if self.failing_updates.lock().unwrap().contains(operator) {
            return Err(WatchError::Storage(format!("disk full while writing {operator}")));
        }
        self.inner.update_tracking(operator, update).await
    }

    async fn set_subscribers(&self, operator: &str, subscribers: Vec<Subscriber>) -> Result<(), WatchError> {
        self.inner.set_subscribers(operator, subscribers).await
    }

    async fn delete_subscription(&self, operator: &str) -> Result<(), WatchError> {
        self.inner.delete_subscription(operator).await
    }
}

#[async_trait]
impl ValidatorStore for FlakyStore {
    async fn find_validator(&self, operator: &str) -> Result<Option<ValidatorRecord>, WatchError> {
        self.inner.find_validator(operator).await
    }

    async fn find_validator_by_hex(&self, hex_address: &str) -> Result<Option<ValidatorRecord>, WatchError> {
        self.inner.find_validator_by_hex(hex_address).await
    }

    async fn all_validators(&self) -> Result<Vec<ValidatorRecord>, WatchError> {
        self.inner.all_validators().await
    }

    async fn upsert_validator(&self, record: ValidatorRecord) -> Result<(), WatchError> {
        self.inner.upsert_validator(record).await
    }

    async fn set_jailed(&self, operator: &str, jailed: bool) -> Result<bool, WatchError> {
        self.inner.set_jailed(operator, jailed).await
    }
}

#[async_trait]
impl BlockStore for FlakyStore {
    async fn insert_block(&self, record: BlockRecord, limit: usize) -> Result<(), WatchError> {
        self.inner.insert_block(record, limit).await
    }

    async fn blocks(&self) -> Result<Vec<BlockRecord>, WatchError> {
        self.inner.blocks().await
    }
}

/// An engine over an arbitrary store, alerts going to `notifier`.
pub fn engine_over(
    chain: Arc<MockChain>,
    store: Arc<dyn Store>,
    notifier: Arc<RecordingNotifier>,
    config: TrackerConfig,
) -> Arc<TrackingEngine> {
    Arc::new(TrackingEngine::new(
        config,
        chain as Arc<dyn ChainClient>,
        store,
        notifier as Arc<dyn Notifier>,
    ))
}
