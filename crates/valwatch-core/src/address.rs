//! Address derivations for Cosmos SDK validators.
//!
//! Commit signatures identify validators by a 20-byte hex consensus address:
//! the first 20 bytes of `sha256(ed25519_pubkey)`, upper-case. Older LCD
//! versions report the consensus key as an amino-prefixed bech32 string,
//! newer ones as a typed base64 key.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bech32::{FromBase32, Variant};
use sha2::{Digest, Sha256};

use crate::error::WatchError;
use crate::types::ConsensusPubKey;

/// Amino registration prefix of `tendermint/PubKeyEd25519` plus length byte.
const AMINO_ED25519_PREFIX: [u8; 5] = [0x16, 0x24, 0xDE, 0x64, 0x20];

const ED25519_KEY_LEN: usize = 32;

/// Derive the upper-case hex consensus address for `pubkey`.
pub fn hex_address(pubkey: &ConsensusPubKey) -> Result<String, WatchError> {
    let key = match pubkey {
        ConsensusPubKey::Bech32(s) => bech32_pubkey_bytes(s)?,
        ConsensusPubKey::Ed25519Base64(s) => STANDARD
            .decode(s.trim())
            .map_err(|e| WatchError::InvalidAddress(format!("base64 consensus key: {e}")))?,
    };
    if key.len() != ED25519_KEY_LEN {
        return Err(WatchError::InvalidAddress(format!(
            "expected a {ED25519_KEY_LEN}-byte ed25519 key, got {} bytes",
            key.len()
        )));
    }
    let digest = Sha256::digest(&key);
    Ok(hex::encode_upper(&digest[..20]))
}

/// Decode a bech32 consensus pubkey and strip the amino prefix if present.
fn bech32_pubkey_bytes(s: &str) -> Result<Vec<u8>, WatchError> {
    let (_, bytes) = decode(s)?;
    if bytes.starts_with(&AMINO_ED25519_PREFIX) {
        Ok(bytes[AMINO_ED25519_PREFIX.len()..].to_vec())
    } else {
        Ok(bytes)
    }
}

fn decode(s: &str) -> Result<(String, Vec<u8>), WatchError> {
    let (hrp, words, _variant) =
        bech32::decode(s).map_err(|e| WatchError::InvalidAddress(format!("{s}: {e}")))?;
    let bytes = Vec::<u8>::from_base32(&words)
        .map_err(|e| WatchError::InvalidAddress(format!("{s}: {e}")))?;
    Ok((hrp, bytes))
}

/// Re-encode an operator address (`<prefix>valoper1...`) under the account
/// prefix, giving the validator's self-delegation address.
pub fn self_delegation_address(operator: &str, account_prefix: &str) -> Result<String, WatchError> {
    reencode(operator, account_prefix)
}

/// Re-encode the payload of bech32 `addr` under human-readable part `hrp`.
pub fn reencode(addr: &str, hrp: &str) -> Result<String, WatchError> {
    let (_, words, _) =
        bech32::decode(addr).map_err(|e| WatchError::InvalidAddress(format!("{addr}: {e}")))?;
    bech32::encode(hrp, words, Variant::Bech32)
        .map_err(|e| WatchError::InvalidAddress(format!("{addr}: {e}")))
}

/// Returns `true` if `addr` is a well-formed operator address for `account_prefix`.
pub fn is_operator_address(addr: &str, account_prefix: &str) -> bool {
    let hrp = format!("{account_prefix}valoper");
    let well_formed = addr.len() == hrp.len() + 1 + 38
        && addr.starts_with(&format!("{hrp}1"))
        && addr
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    if !well_formed {
        return false;
    }
    matches!(decode(addr), Ok((ref h, ref bytes)) if *h == hrp && bytes.len() == 20)
}
