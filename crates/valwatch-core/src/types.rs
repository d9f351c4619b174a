//! Shared types for the tracking pipeline.

use serde::{Deserialize, Serialize};

use crate::history::BlocksHistory;

// ─── Subscriber ───────────────────────────────────────────────────────────────

/// An opaque delivery target (chat id, channel id, webhook route).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscriber {
    pub target: String,
}

impl Subscriber {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

// ─── ValidatorSubscription ────────────────────────────────────────────────────

/// Per-validator tracking state and subscriber list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorSubscription {
    /// Operator address (`...valoper1...`), unique key.
    pub operator_address: String,
    /// Consecutive missed blocks in the current streak.
    pub consecutive_counter: u64,
    /// Escalation level, always ≥ 1.
    pub alert_level: u32,
    /// Height of the most recent miss (0 = never).
    pub last_missed_block: u64,
    /// Sliding window of recent attendance.
    pub blocks_history: BlocksHistory,
    pub subscribers: Vec<Subscriber>,
    /// Unix timestamp of the last write.
    pub updated_at: i64,
}

impl ValidatorSubscription {
    /// A fresh subscription with no history and no subscribers.
    pub fn new(operator_address: impl Into<String>) -> Self {
        Self {
            operator_address: operator_address.into(),
            consecutive_counter: 0,
            alert_level: 1,
            last_missed_block: 0,
            blocks_history: BlocksHistory::default(),
            subscribers: Vec::new(),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Adds `subscriber` unless a subscriber with the same target exists.
    /// Returns `true` if it was added.
    pub fn add_subscriber(&mut self, subscriber: Subscriber) -> bool {
        if self.subscribers.iter().any(|s| s.target == subscriber.target) {
            return false;
        }
        self.subscribers.push(subscriber);
        true
    }

    /// Removes the subscriber with `target`. Returns `true` if one was removed.
    pub fn remove_subscriber(&mut self, target: &str) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.target != target);
        self.subscribers.len() != before
    }

    /// Clears the miss streak (attended block or unjail).
    pub fn reset_streak(&mut self) {
        self.consecutive_counter = 0;
        self.alert_level = 1;
    }

    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }
}

/// The tracking fields written back after each block (set semantics).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingUpdate {
    pub consecutive_counter: u64,
    pub alert_level: u32,
    pub last_missed_block: u64,
    pub blocks_history: BlocksHistory,
}

impl From<&ValidatorSubscription> for TrackingUpdate {
    fn from(sub: &ValidatorSubscription) -> Self {
        Self {
            consecutive_counter: sub.consecutive_counter,
            alert_level: sub.alert_level,
            last_missed_block: sub.last_missed_block,
            blocks_history: sub.blocks_history.clone(),
        }
    }
}

// ─── ValidatorRecord ──────────────────────────────────────────────────────────

/// Display metadata published by a validator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    #[serde(default)]
    pub moniker: String,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub details: String,
}

/// Identity cache for a validator, written only by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub operator_address: String,
    /// Upper-case hex consensus address, as it appears in commit signatures.
    pub hex_address: String,
    /// Account address owning the operator (self-delegation address).
    pub self_delegation_address: String,
    /// Consensus public key as reported by the chain.
    pub consensus_pubkey: String,
    pub jailed: bool,
    pub description: Description,
}

impl ValidatorRecord {
    /// The moniker, or the operator address when the moniker is blank.
    pub fn display_name(&self) -> &str {
        if self.description.moniker.trim().is_empty() {
            &self.operator_address
        } else {
            &self.description.moniker
        }
    }
}

// ─── Blocks ───────────────────────────────────────────────────────────────────

/// Auxiliary per-block record kept for proposal-share reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub height: u64,
    /// Upper-case hex consensus address of the proposer.
    pub proposer_address: String,
    pub tx_count: u32,
}

/// One entry of a block's last-commit list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Precommit {
    /// Hex consensus address of the signer.
    pub validator_address: String,
    /// `false` for nil/absent votes.
    pub present: bool,
}

/// A decoded new-block event. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCommitEvent {
    pub height: u64,
    pub proposer_address: String,
    pub tx_count: u32,
    pub precommits: Vec<Precommit>,
}

impl BlockCommitEvent {
    /// Returns `true` if `hex_address` has a present entry in the commit list.
    pub fn signed_by(&self, hex_address: &str) -> bool {
        self.precommits
            .iter()
            .any(|p| p.present && p.validator_address.eq_ignore_ascii_case(hex_address))
    }

    pub fn to_record(&self) -> BlockRecord {
        BlockRecord {
            height: self.height,
            proposer_address: self.proposer_address.to_uppercase(),
            tx_count: self.tx_count,
        }
    }
}

// ─── Chain snapshots ──────────────────────────────────────────────────────────

/// Consensus public key in either of the encodings chains have used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusPubKey {
    /// Amino-prefixed bech32 (`cosmosvalconspub1...`).
    Bech32(String),
    /// Raw ed25519 key bytes, base64-encoded.
    Ed25519Base64(String),
}

impl std::fmt::Display for ConsensusPubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bech32(s) | Self::Ed25519Base64(s) => write!(f, "{s}"),
        }
    }
}

/// Commission settings of a validator, as fractions (0.1 = 10%).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Commission {
    pub rate: f64,
    pub max_rate: f64,
    pub max_change_rate: f64,
}

/// A validator as reported by the chain at some height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorInfo {
    pub operator_address: String,
    pub consensus_pubkey: ConsensusPubKey,
    pub jailed: bool,
    pub status: u8,
    pub tokens: u128,
    pub description: Description,
    pub commission: Commission,
}

/// Staking pool totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakingPool {
    pub bonded_tokens: u128,
    pub not_bonded_tokens: u128,
}

impl StakingPool {
    /// Share of bonded stake held by `tokens`, in percent.
    pub fn voting_power_pct(&self, tokens: u128) -> f64 {
        if self.bonded_tokens == 0 {
            return 0.0;
        }
        tokens as f64 / self.bonded_tokens as f64 * 100.0
    }
}

/// Slashing module parameters relevant to downtime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlashingParams {
    pub signed_blocks_window: u64,
    pub min_signed_per_window: f64,
}

impl SlashingParams {
    /// Escalation scale: `signed_blocks_window × min_signed_per_window`,
    /// never below 2 so that `ln(W)` stays positive.
    pub fn slashing_window(&self) -> f64 {
        (self.signed_blocks_window as f64 * self.min_signed_per_window).max(2.0)
    }
}

// ─── Transactions ─────────────────────────────────────────────────────────────

/// An ABCI event emitted by a transaction message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbciEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

impl AbciEvent {
    /// First value of attribute `key`.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

/// Events emitted by one message of a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLog {
    #[serde(default)]
    pub msg_index: u32,
    #[serde(default)]
    pub events: Vec<AbciEvent>,
}

impl MessageLog {
    /// First event of type `kind`.
    pub fn event(&self, kind: &str) -> Option<&AbciEvent> {
        self.events.iter().find(|e| e.kind == kind)
    }
}

/// A transaction included in a block, reduced to what the registry scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxResult {
    pub hash: String,
    /// ABCI code 0.
    pub success: bool,
    pub logs: Vec<MessageLog>,
}
