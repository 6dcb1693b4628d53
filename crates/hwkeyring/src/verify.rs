//! Address normalization and signer checks.

use crate::errors::{KeyringError, KeyringResult};
use alloy::primitives::{Address, Signature, B256};
use k256::ecdsa::VerifyingKey;
use std::str::FromStr as _;

pub fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

pub fn add_hex_prefix(s: &str) -> String {
    if s.starts_with("0x") {
        s.to_owned()
    } else {
        format!("0x{s}")
    }
}

pub fn parse_address(s: &str) -> KeyringResult<Address> {
    let t = s.trim();
    let with_prefix = add_hex_prefix(strip_hex_prefix(t));
    Address::from_str(&with_prefix).map_err(|e| KeyringError::InvalidAddress(format!("{t}: {e}")))
}

/// EIP-55 checksummed form of any-case `s`.
pub fn to_checksum(s: &str) -> KeyringResult<String> {
    Ok(parse_address(s)?.to_checksum(None))
}

/// Address for a SEC1 public key (compressed, uncompressed, or raw 64-byte x||y).
pub fn address_from_public_key(public_key_hex: &str) -> KeyringResult<Address> {
    let mut bytes = hex::decode(strip_hex_prefix(public_key_hex.trim()))
        .map_err(|e| KeyringError::InvalidPublicKey(e.to_string()))?;
    if bytes.len() == 64 {
        bytes.insert(0, 0x04);
    }
    let vk = VerifyingKey::from_sec1_bytes(&bytes)
        .map_err(|e| KeyringError::InvalidPublicKey(e.to_string()))?;
    Ok(Address::from_public_key(&vk))
}

/// Both sides are checksum-normalized before the comparison, so case differences in the inputs
/// never matter but any byte difference does.
pub fn verify(expected: &str, recovered: &str) -> KeyringResult<()> {
    let expected = to_checksum(expected)?;
    let recovered = to_checksum(recovered)?;
    if expected == recovered {
        Ok(())
    } else {
        Err(KeyringError::SignatureAddressMismatch {
            expected,
            recovered,
        })
    }
}

pub fn parse_signature(signature_hex: &str) -> KeyringResult<Signature> {
    let bytes = hex::decode(strip_hex_prefix(signature_hex.trim()))
        .map_err(|e| KeyringError::InvalidSignature(e.to_string()))?;
    Signature::from_raw(&bytes).map_err(|e| KeyringError::InvalidSignature(e.to_string()))
}

pub fn recover_from_prehash(signature: &Signature, hash: &B256) -> KeyringResult<Address> {
    signature
        .recover_address_from_prehash(hash)
        .map_err(|e| KeyringError::InvalidSignature(e.to_string()))
}
