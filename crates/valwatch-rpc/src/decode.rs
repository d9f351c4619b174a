//! Decoding of node payloads into core types.
//!
//! Cosmos nodes serialise most integers as strings and have changed several
//! shapes across releases, so every decoder here accepts both the legacy and
//! the newer form.

use serde_json::Value;

use valwatch_core::types::{Commission, Description, MessageLog};
use valwatch_core::{
    BlockCommitEvent, ConsensusPubKey, Precommit, SlashingParams, StakingPool, TxResult,
    ValidatorInfo,
};

use crate::error::TransportError;

/// `block_id_flag` value of an absent vote.
const BLOCK_ID_FLAG_ABSENT: u64 = 1;

/// A decoded WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// Subscription acknowledgement (`result: {}`).
    Ack,
    NewBlock(BlockCommitEvent),
}

// ─── Envelopes ────────────────────────────────────────────────────────────────

/// Unwrap a JSON-RPC body into its `result`.
pub fn rpc_result(mut body: Value) -> Result<Value, TransportError> {
    if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
        return Err(rpc_error(err));
    }
    match body.get_mut("result").map(Value::take) {
        Some(result) => Ok(result),
        None => Err(TransportError::malformed("JSON-RPC body without result")),
    }
}

/// Unwrap an LCD body. Legacy endpoints wrap payloads in `{height, result}`
/// and report failures in an `error` field.
pub fn lcd_result(mut body: Value) -> Result<Value, TransportError> {
    if let Some(err) = body.get("error").filter(|e| !e.is_null()) {
        return Err(rpc_error(err));
    }
    match body.get_mut("result").map(Value::take) {
        Some(result) => Ok(result),
        None => Ok(body),
    }
}

fn rpc_error(err: &Value) -> TransportError {
    match err {
        Value::String(message) => TransportError::Rpc {
            code: 0,
            message: message.clone(),
        },
        obj => {
            let code = obj.get("code").and_then(Value::as_i64).unwrap_or(0);
            let message = obj.get("message").and_then(Value::as_str).unwrap_or_default();
            let data = obj.get("data").and_then(Value::as_str).unwrap_or_default();
            let message = match (message.is_empty(), data.is_empty()) {
                (_, true) => message.to_string(),
                (true, false) => data.to_string(),
                (false, false) => format!("{message}: {data}"),
            };
            TransportError::Rpc { code, message }
        }
    }
}

// ─── Scalars ──────────────────────────────────────────────────────────────────

fn as_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_u128(v: &Value) -> Option<u128> {
    match v {
        Value::Number(n) => n.as_u64().map(u128::from),
        // Some endpoints render integer token amounts as decimals.
        Value::String(s) => s.split('.').next().and_then(|i| i.parse().ok()),
        _ => None,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn field<'a>(v: &'a Value, name: &str) -> Result<&'a Value, TransportError> {
    v.get(name)
        .filter(|f| !f.is_null())
        .ok_or_else(|| TransportError::malformed(format!("missing field `{name}`")))
}

fn u64_field(v: &Value, name: &str) -> Result<u64, TransportError> {
    as_u64(field(v, name)?)
        .ok_or_else(|| TransportError::malformed(format!("`{name}` is not an integer")))
}

fn str_field(v: &Value, name: &str) -> String {
    v.get(name).and_then(Value::as_str).unwrap_or_default().to_string()
}

// ─── Blocks ───────────────────────────────────────────────────────────────────

/// Decode a WebSocket text frame from a `tm.event='NewBlock'` subscription.
pub fn stream_message(text: &str) -> Result<StreamMessage, TransportError> {
    let value: Value = serde_json::from_str(text)?;
    let result = rpc_result(value)?;
    if result.as_object().map_or(false, |o| o.is_empty()) {
        return Ok(StreamMessage::Ack);
    }
    let block = result
        .pointer("/data/value/block")
        .ok_or_else(|| TransportError::malformed("event without data.value.block"))?;
    Ok(StreamMessage::NewBlock(block_event(block)?))
}

/// Decode a block object (`header`, `data`, `last_commit`).
pub fn block_event(block: &Value) -> Result<BlockCommitEvent, TransportError> {
    let header = field(block, "header")?;
    let height = u64_field(header, "height")?;
    let proposer_address = str_field(header, "proposer_address");
    let tx_count = block
        .pointer("/data/txs")
        .and_then(Value::as_array)
        .map_or(0, |txs| txs.len() as u32);
    let precommits = block
        .get("last_commit")
        .map(precommits)
        .unwrap_or_default();
    Ok(BlockCommitEvent {
        height,
        proposer_address,
        tx_count,
        precommits,
    })
}

/// Extract votes from either commit form.
///
/// Legacy commits list `precommits` with `null` for absent validators; newer
/// ones list `signatures` where absence is an empty address or
/// `block_id_flag == 1`.
pub fn precommits(last_commit: &Value) -> Vec<Precommit> {
    if let Some(list) = last_commit.get("precommits").and_then(Value::as_array) {
        return list
            .iter()
            .filter(|p| !p.is_null())
            .map(|p| Precommit {
                validator_address: str_field(p, "validator_address"),
                present: true,
            })
            .collect();
    }
    let Some(list) = last_commit.get("signatures").and_then(Value::as_array) else {
        return Vec::new();
    };
    list.iter()
        .map(|s| {
            let validator_address = str_field(s, "validator_address");
            let absent = validator_address.is_empty()
                || match s.get("block_id_flag") {
                    Some(Value::String(flag)) => flag == "BLOCK_ID_FLAG_ABSENT",
                    Some(flag) => as_u64(flag) == Some(BLOCK_ID_FLAG_ABSENT),
                    None => false,
                };
            Precommit {
                validator_address,
                present: !absent,
            }
        })
        .collect()
}

/// Latest height from a `/status` result.
pub fn status_height(result: &Value) -> Result<u64, TransportError> {
    let info = result
        .get("sync_info")
        .ok_or_else(|| TransportError::malformed("status without sync_info"))?;
    u64_field(info, "latest_block_height")
}

// ─── Transactions ─────────────────────────────────────────────────────────────

/// Decode a `/tx_search` result.
pub fn tx_search(result: &Value) -> Result<Vec<TxResult>, TransportError> {
    let txs = result
        .get("txs")
        .and_then(Value::as_array)
        .ok_or_else(|| TransportError::malformed("tx_search without txs"))?;
    Ok(txs.iter().map(tx_result).collect())
}

fn tx_result(tx: &Value) -> TxResult {
    let result = tx.get("tx_result").unwrap_or(&Value::Null);
    let code = result.get("code").and_then(as_u64).unwrap_or(0);
    let raw_log = result.get("log").and_then(Value::as_str).unwrap_or_default();
    // Failed txs carry a plain-text log.
    let mut logs: Vec<MessageLog> = serde_json::from_str(raw_log).unwrap_or_default();
    if logs.is_empty() {
        if let Some(events) = result.get("events") {
            if let Ok(events) = serde_json::from_value(events.clone()) {
                logs.push(MessageLog { msg_index: 0, events });
            }
        }
    }
    TxResult {
        hash: str_field(tx, "hash"),
        success: code == 0,
        logs,
    }
}

// ─── Staking / slashing ───────────────────────────────────────────────────────

/// Decode one LCD validator object.
pub fn validator_info(v: &Value) -> Result<ValidatorInfo, TransportError> {
    let operator_address = str_field(v, "operator_address");
    if operator_address.is_empty() {
        return Err(TransportError::malformed("validator without operator_address"));
    }
    let consensus_pubkey = match field(v, "consensus_pubkey")? {
        Value::String(s) => ConsensusPubKey::Bech32(s.clone()),
        obj => {
            let key = obj
                .get("key")
                .or_else(|| obj.get("value"))
                .and_then(Value::as_str)
                .ok_or_else(|| TransportError::malformed("consensus_pubkey without key"))?;
            ConsensusPubKey::Ed25519Base64(key.to_string())
        }
    };
    let status = match v.get("status") {
        Some(Value::String(s)) => match s.as_str() {
            "BOND_STATUS_UNBONDED" => 1,
            "BOND_STATUS_UNBONDING" => 2,
            "BOND_STATUS_BONDED" => 3,
            other => other.parse().unwrap_or(0),
        },
        Some(n) => as_u64(n).unwrap_or(0) as u8,
        None => 0,
    };
    let description: Description = v
        .get("description")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();

    Ok(ValidatorInfo {
        operator_address,
        consensus_pubkey,
        jailed: v.get("jailed").and_then(Value::as_bool).unwrap_or(false),
        status,
        tokens: v.get("tokens").and_then(as_u128).unwrap_or(0),
        description,
        commission: commission(v.get("commission").unwrap_or(&Value::Null)),
    })
}

fn commission(v: &Value) -> Commission {
    let rates = v.get("commission_rates").unwrap_or(v);
    let rate = |name: &str| rates.get(name).and_then(as_f64).unwrap_or(0.0);
    Commission {
        rate: rate("rate"),
        max_rate: rate("max_rate"),
        max_change_rate: rate("max_change_rate"),
    }
}

/// Decode `/staking/validators` (array) into infos.
pub fn validator_list(result: &Value) -> Result<Vec<ValidatorInfo>, TransportError> {
    let list = result
        .as_array()
        .or_else(|| result.get("validators").and_then(Value::as_array))
        .ok_or_else(|| TransportError::malformed("validator list is not an array"))?;
    let mut out = Vec::with_capacity(list.len());
    for v in list {
        match validator_info(v) {
            Ok(info) => out.push(info),
            Err(e) => tracing::warn!(error = %e, "skipping undecodable validator"),
        }
    }
    Ok(out)
}

pub fn staking_pool(result: &Value) -> Result<StakingPool, TransportError> {
    let pool = result.get("pool").unwrap_or(result);
    let tokens = |name: &str| -> Result<u128, TransportError> {
        as_u128(field(pool, name)?)
            .ok_or_else(|| TransportError::malformed(format!("`{name}` is not an amount")))
    };
    Ok(StakingPool {
        bonded_tokens: tokens("bonded_tokens")?,
        not_bonded_tokens: tokens("not_bonded_tokens")?,
    })
}

pub fn slashing_params(result: &Value) -> Result<SlashingParams, TransportError> {
    let params = result.get("params").unwrap_or(result);
    let min_signed_per_window = as_f64(field(params, "min_signed_per_window")?)
        .ok_or_else(|| TransportError::malformed("`min_signed_per_window` is not a decimal"))?;
    Ok(SlashingParams {
        signed_blocks_window: u64_field(params, "signed_blocks_window")?,
        min_signed_per_window,
    })
}
