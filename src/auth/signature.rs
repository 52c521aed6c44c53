// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet signature verification.
//!
//! Wallet clients disagree on what they sign: some hash the raw message,
//! others wrap it in the personal-sign header
//! (`"\x19Ethereum Signed Message:\n" + len + message`). Both are tried.

use alloy::primitives::{eip191_hash_message, keccak256, Address, B256};
use k256::ecdsa::{signature::hazmat::PrehashVerifier, RecoveryId, Signature, VerifyingKey};

use crate::models::WalletAddress;

/// Length of an `r || s || v` signature.
const SIGNATURE_LEN: usize = 65;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature is not valid hex: {0}")]
    Decode(String),

    #[error("signature must be {SIGNATURE_LEN} bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid recovery byte: {0}")]
    InvalidRecoveryId(u8),

    #[error("public key recovery failed: {0}")]
    Recovery(String),
}

/// Message hashing convention used by the signing wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageEncoding {
    /// `keccak256(message)`
    Raw,
    /// `keccak256("\x19Ethereum Signed Message:\n" + len + message)`
    PersonalSign,
}

impl MessageEncoding {
    pub const ALL: [MessageEncoding; 2] = [MessageEncoding::Raw, MessageEncoding::PersonalSign];

    pub fn hash(self, message: &[u8]) -> B256 {
        match self {
            MessageEncoding::Raw => keccak256(message),
            MessageEncoding::PersonalSign => eip191_hash_message(message),
        }
    }
}

/// Map the trailing byte to the canonical 0/1 recovery id.
///
/// Accepts the 27/28 form produced by most wallets and the 0/1 form some
/// hardware wallets emit.
pub fn normalize_recovery_byte(v: u8) -> Result<u8, SignatureError> {
    match v {
        27 | 28 => Ok(v - 27),
        0 | 1 => Ok(v),
        other => Err(SignatureError::InvalidRecoveryId(other)),
    }
}

/// Check that `signature_hex` over `message` was produced by `claimed`.
///
/// Returns `Ok(false)` for a well-formed signature that belongs to another
/// key or another message. Returns an error for malformed input, or when
/// public key recovery fails under every encoding.
pub fn verify_signature(
    signature_hex: &str,
    message: &[u8],
    claimed: &WalletAddress,
) -> Result<bool, SignatureError> {
    let bytes = alloy::hex::decode(signature_hex.trim())
        .map_err(|e| SignatureError::Decode(e.to_string()))?;
    if bytes.len() != SIGNATURE_LEN {
        return Err(SignatureError::InvalidLength(bytes.len()));
    }

    let v = normalize_recovery_byte(bytes[64])?;
    let recovery_id = RecoveryId::from_byte(v).ok_or(SignatureError::InvalidRecoveryId(v))?;
    let signature = Signature::from_slice(&bytes[..64])
        .map_err(|e| SignatureError::Recovery(e.to_string()))?;

    let claimed = claimed.address();
    let mut first_error = None;
    let mut recovered = false;
    for encoding in MessageEncoding::ALL {
        let hash = encoding.hash(message);
        match verify_prehash(&hash, &signature, recovery_id, claimed) {
            Ok(true) => {
                tracing::debug!(?encoding, address = %claimed, "Signature verified");
                return Ok(true);
            }
            Ok(false) => recovered = true,
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if !recovered => Err(e),
        _ => Ok(false),
    }
}

fn verify_prehash(
    hash: &B256,
    signature: &Signature,
    recovery_id: RecoveryId,
    claimed: Address,
) -> Result<bool, SignatureError> {
    let key = VerifyingKey::recover_from_prehash(hash.as_slice(), signature, recovery_id)
        .map_err(|e| SignatureError::Recovery(e.to_string()))?;

    if Address::from_public_key(&key) != claimed {
        return Ok(false);
    }

    Ok(key.verify_prehash(hash.as_slice(), signature).is_ok())
}
