//! Validator registry: keeps the validator identity cache in sync with the
//! chain and reacts to validator-mutating transactions.

use std::sync::Arc;

use crate::address;
use crate::chain::ChainClient;
use crate::error::WatchError;
use crate::store::Store;
use crate::types::{ConsensusPubKey, TrackingUpdate, TxResult, ValidatorInfo, ValidatorRecord, ValidatorSubscription};

/// A validator change observed in a block's transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatorMutation {
    Created(String),
    Edited(String),
    Unjailed(String),
}

impl ValidatorMutation {
    pub fn operator(&self) -> &str {
        match self {
            Self::Created(op) | Self::Edited(op) | Self::Unjailed(op) => op,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Create,
    Edit,
    Unjail,
}

/// Message actions the registry reacts to, in both the legacy short form and
/// the protobuf type-URL form.
fn classify_action(action: &str) -> Option<Action> {
    match action.rsplit('.').next().unwrap_or(action) {
        "create_validator" | "MsgCreateValidator" => Some(Action::Create),
        "edit_validator" | "MsgEditValidator" => Some(Action::Edit),
        "unjail" | "MsgUnjail" => Some(Action::Unjail),
        _ => None,
    }
}

/// Extract validator mutations from successful transactions.
///
/// The acting validator is the `sender` of the message event. Senders given
/// as account addresses are re-encoded under `<prefix>valoper`. For
/// `create_validator` the `validator` attribute of the `create_validator`
/// event takes precedence.
pub fn mutations_from_txs(txs: &[TxResult], account_prefix: &str) -> Vec<ValidatorMutation> {
    let operator_hrp = format!("{account_prefix}valoper");
    let mut out: Vec<ValidatorMutation> = Vec::new();

    for tx in txs.iter().filter(|tx| tx.success) {
        for log in &tx.logs {
            let Some(message) = log.event("message") else {
                continue;
            };
            let Some(action) = message
                .attributes
                .iter()
                .filter(|a| a.key == "action")
                .find_map(|a| classify_action(&a.value))
            else {
                continue;
            };

            let created_validator = log
                .event("create_validator")
                .and_then(|e| e.attribute("validator"))
                .map(str::to_string);
            let sender = message
                .attributes
                .iter()
                .filter(|a| a.key == "sender")
                .map(|a| a.value.as_str())
                .find(|s| s.starts_with(&operator_hrp))
                .map(str::to_string)
                .or_else(|| {
                    message
                        .attribute("sender")
                        .and_then(|s| to_operator(s, &operator_hrp))
                });

            let mutation = match action {
                Action::Create => created_validator.or(sender).map(ValidatorMutation::Created),
                Action::Edit => sender.map(ValidatorMutation::Edited),
                Action::Unjail => sender.map(ValidatorMutation::Unjailed),
            };
            let Some(mutation) = mutation else {
                tracing::debug!(tx = %tx.hash, "validator message without resolvable operator");
                continue;
            };
            if !out.contains(&mutation) {
                out.push(mutation);
            }
        }
    }
    out
}

fn to_operator(sender: &str, operator_hrp: &str) -> Option<String> {
    if sender.starts_with(operator_hrp) {
        return Some(sender.to_string());
    }
    address::reencode(sender, operator_hrp).ok()
}

/// Owns writes to the validator store.
pub struct ValidatorRegistry {
    chain: Arc<dyn ChainClient>,
    store: Arc<dyn Store>,
    account_prefix: String,
}

impl ValidatorRegistry {
    pub fn new(chain: Arc<dyn ChainClient>, store: Arc<dyn Store>, account_prefix: impl Into<String>) -> Self {
        Self {
            chain,
            store,
            account_prefix: account_prefix.into(),
        }
    }

    pub fn account_prefix(&self) -> &str {
        &self.account_prefix
    }

    /// Build the cached record for a chain validator.
    pub fn record_from_info(&self, info: &ValidatorInfo) -> Result<ValidatorRecord, WatchError> {
        let hex_address = address::hex_address(&info.consensus_pubkey)?;
        let self_delegation_address =
            address::self_delegation_address(&info.operator_address, &self.account_prefix)?;
        let consensus_pubkey = match &info.consensus_pubkey {
            ConsensusPubKey::Bech32(s) | ConsensusPubKey::Ed25519Base64(s) => s.clone(),
        };
        Ok(ValidatorRecord {
            operator_address: info.operator_address.clone(),
            hex_address,
            self_delegation_address,
            consensus_pubkey,
            jailed: info.jailed,
            description: info.description.clone(),
        })
    }

    /// Fetch the full validator set and upsert every record.
    ///
    /// Validators whose keys cannot be decoded are skipped; a store failure
    /// aborts the refresh. Returns the number of records written.
    pub async fn refresh_all(&self) -> Result<usize, WatchError> {
        let validators = self.chain.validators().await?;
        let mut written = 0;
        for info in &validators {
            let record = match self.record_from_info(info) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(validator = %info.operator_address, error = %e, "skipping validator");
                    continue;
                }
            };
            self.store.upsert_validator(record).await?;
            written += 1;
        }
        tracing::info!(fetched = validators.len(), written, "validator set refreshed");
        Ok(written)
    }

    /// Re-fetch and upsert a single validator.
    pub async fn refresh_one(&self, operator: &str) -> Result<ValidatorRecord, WatchError> {
        let info = self.chain.validator(operator, None).await?;
        let record = self.record_from_info(&info)?;
        self.store.upsert_validator(record.clone()).await?;
        tracing::debug!(validator = %operator, jailed = record.jailed, "validator refreshed");
        Ok(record)
    }

    /// Create an empty subscription for `operator` unless one exists.
    /// Returns `true` if a subscription was created.
    pub async fn ensure_subscription(&self, operator: &str) -> Result<bool, WatchError> {
        if self.store.find_subscription(operator).await?.is_some() {
            return Ok(false);
        }
        match self
            .store
            .insert_subscription(ValidatorSubscription::new(operator))
            .await
        {
            Ok(()) => Ok(true),
            Err(e) => {
                // Lost a race with a concurrent creator.
                if self.store.find_subscription(operator).await?.is_some() {
                    tracing::debug!(validator = %operator, error = %e, "subscription already created");
                    Ok(false)
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Refresh all validators and make sure each has a subscription record.
    pub async fn bootstrap(&self) -> Result<usize, WatchError> {
        self.refresh_all().await?;
        let mut created = 0;
        for record in self.store.all_validators().await? {
            if self.ensure_subscription(&record.operator_address).await? {
                created += 1;
            }
        }
        tracing::info!(created, "subscriptions initialised");
        Ok(created)
    }

    /// Persist `jailed = true`. Returns `true` only on the transition.
    pub async fn mark_jailed(&self, operator: &str) -> Result<bool, WatchError> {
        self.store.set_jailed(operator, true).await
    }

    /// Apply one observed mutation. Returns the refreshed record.
    pub async fn apply(&self, mutation: &ValidatorMutation) -> Result<ValidatorRecord, WatchError> {
        let operator = mutation.operator();
        let record = self.refresh_one(operator).await?;
        match mutation {
            ValidatorMutation::Created(_) => {
                self.ensure_subscription(operator).await?;
                tracing::info!(validator = %operator, "new validator registered");
            }
            ValidatorMutation::Unjailed(_) if !record.jailed => {
                self.reset_streak(operator).await?;
                tracing::info!(validator = %operator, "validator unjailed, streak reset");
            }
            _ => {}
        }
        Ok(record)
    }

    /// Clear counter, alert level and last miss, keeping the history.
    async fn reset_streak(&self, operator: &str) -> Result<(), WatchError> {
        let Some(mut sub) = self.store.find_subscription(operator).await? else {
            return Ok(());
        };
        sub.reset_streak();
        sub.last_missed_block = 0;
        self.store
            .update_tracking(operator, TrackingUpdate::from(&sub))
            .await
    }

    /// Fetch the transactions at `height` and apply every validator mutation.
    ///
    /// Each mutation is isolated: a failing refresh is logged and the
    /// remaining mutations are still applied.
    pub async fn scan_block_txs(
        &self,
        height: u64,
    ) -> Result<Vec<(ValidatorMutation, ValidatorRecord)>, WatchError> {
        let txs = self.chain.block_txs(height).await?;
        let mut applied = Vec::new();
        for mutation in mutations_from_txs(&txs, &self.account_prefix) {
            match self.apply(&mutation).await {
                Ok(record) => applied.push((mutation, record)),
                Err(e) => {
                    tracing::warn!(height, ?mutation, error = %e, "validator mutation not applied");
                }
            }
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AbciEvent, EventAttribute, MessageLog};

    fn event(kind: &str, attrs: &[(&str, &str)]) -> AbciEvent {
        AbciEvent {
            kind: kind.into(),
            attributes: attrs
                .iter()
                .map(|(k, v)| EventAttribute {
                    key: k.to_string(),
                    value: v.to_string(),
                })
                .collect(),
        }
    }

    fn tx(success: bool, events: Vec<AbciEvent>) -> TxResult {
        TxResult {
            hash: "ABC".into(),
            success,
            logs: vec![MessageLog { msg_index: 0, events }],
        }
    }

    const VALOPER: &str = "cosmosvaloper1v3jkvemgd94xkmrddehhqutjwd682anhddhc5r";
    const ACCOUNT: &str = "cosmos1v3jkvemgd94xkmrddehhqutjwd682anhgerdcs";

    #[test]
    fn edit_and_unjail_use_sender() {
        let txs = vec![
            tx(true, vec![event("message", &[("action", "edit_validator"), ("sender", VALOPER)])]),
            tx(true, vec![event("message", &[("action", "unjail"), ("module", "slashing"), ("sender", VALOPER)])]),
        ];
        assert_eq!(
            mutations_from_txs(&txs, "cosmos"),
            vec![
                ValidatorMutation::Edited(VALOPER.into()),
                ValidatorMutation::Unjailed(VALOPER.into())
            ]
        );
    }

    #[test]
    fn failed_and_unrelated_txs_ignored() {
        let txs = vec![
            tx(false, vec![event("message", &[("action", "unjail"), ("sender", VALOPER)])]),
            tx(true, vec![event("message", &[("action", "send"), ("sender", ACCOUNT)])]),
        ];
        assert!(mutations_from_txs(&txs, "cosmos").is_empty());
    }

    #[test]
    fn create_prefers_validator_attribute() {
        let txs = vec![tx(
            true,
            vec![
                event("create_validator", &[("validator", VALOPER), ("amount", "1000")]),
                event("message", &[("action", "create_validator"), ("sender", "cosmos1other")]),
            ],
        )];
        assert_eq!(
            mutations_from_txs(&txs, "cosmos"),
            vec![ValidatorMutation::Created(VALOPER.into())]
        );
    }

    #[test]
    fn account_sender_is_reencoded() {
        let txs = vec![tx(
            true,
            vec![event(
                "message",
                &[("action", "/cosmos.slashing.v1beta1.MsgUnjail"), ("sender", ACCOUNT)],
            )],
        )];
        assert_eq!(
            mutations_from_txs(&txs, "cosmos"),
            vec![ValidatorMutation::Unjailed(VALOPER.into())]
        );
    }

    #[test]
    fn duplicate_mutations_collapse() {
        let ev = || vec![event("message", &[("action", "edit_validator"), ("sender", VALOPER)])];
        let txs = vec![tx(true, ev()), tx(true, ev())];
        assert_eq!(mutations_from_txs(&txs, "cosmos").len(), 1);
    }
}
