// SPDX-License-Identifier: Apache-2.0

//! Personal-message (EIP-191) signature recovery

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use ledger_eth_app::eip712::keccak256;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("signature is not valid hex")]
    InvalidHex,
    #[error("signature must be 65 bytes, got {0}")]
    InvalidLength(usize),
    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),
    #[error("signature does not recover to a public key")]
    Unrecoverable,
}

/// `keccak256("\x19Ethereum Signed Message:\n" || len(message) || message)`
pub fn hash_personal_message(message: &[u8]) -> [u8; 32] {
    let mut data = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    data.extend_from_slice(message);
    keccak256(&data)
}

/// Lowercase `0x` address of an uncompressed secp256k1 key
pub fn address_of(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Recover the address that produced `signature` (65 bytes, `r || s || v`) over `message`
pub fn recover_address(message: &str, signature: &str) -> Result<String, RecoveryError> {
    let trimmed = signature.trim();
    let bytes = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))
        .map_err(|_| RecoveryError::InvalidHex)?;
    if bytes.len() != 65 {
        return Err(RecoveryError::InvalidLength(bytes.len()));
    }

    let v = bytes[64];
    let parity = match v {
        27 | 28 => v - 27,
        0 | 1 => v,
        other => return Err(RecoveryError::InvalidRecoveryId(other)),
    };

    let mut sig = Signature::from_slice(&bytes[..64]).map_err(|_| RecoveryError::Unrecoverable)?;
    let mut recovery_id =
        RecoveryId::from_byte(parity).ok_or(RecoveryError::InvalidRecoveryId(v))?;

    // a high-s signature recovers the same key as its low-s twin with flipped parity
    if let Some(normalized) = sig.normalize_s() {
        sig = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let hash = hash_personal_message(message.as_bytes());
    let key = VerifyingKey::recover_from_prehash(&hash, &sig, recovery_id)
        .map_err(|_| RecoveryError::Unrecoverable)?;
    Ok(address_of(&key))
}

/// True iff `signature` is a personal signature of exactly `message` by `expected_address`.
/// Never fails: malformed input is simply `false`.
pub fn verify(message: &str, signature: &str, expected_address: &str) -> bool {
    match recover_address(message, signature) {
        Ok(recovered) => recovered.eq_ignore_ascii_case(expected_address.trim()),
        Err(_) => false,
    }
}
