//! `eth_signTypedData` (EIP-712), versions 3 and 4.

use super::{check_signer, PendingSignRequest, SignKind, SignStage};
use crate::{
    device::{SignTypedDataRequest, SigningDevice},
    errors::{KeyringError, KeyringResult},
    registry::Account,
    verify::add_hex_prefix,
};
use alloy::{
    dyn_abi::TypedData,
    primitives::{keccak256, B256},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use tracing::info;

const TOP_LEVEL_KEYS: [&str; 4] = ["types", "primaryType", "domain", "message"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypedDataVersion {
    V3,
    #[default]
    V4,
}

impl TypedDataVersion {
    pub const fn v4_compat(self) -> bool {
        matches!(self, Self::V4)
    }
}

impl FromStr for TypedDataVersion {
    type Err = KeyringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "v3" => Ok(Self::V3),
            "v4" => Ok(Self::V4),
            other => Err(KeyringError::InvalidTypedData(format!(
                "unsupported typed data version: {other}"
            ))),
        }
    }
}

/// Keeps only the fields that take part in hashing.
pub fn sanitize(data: &Value) -> KeyringResult<Value> {
    let obj = data
        .as_object()
        .ok_or_else(|| KeyringError::InvalidTypedData("expected a JSON object".to_owned()))?;
    let out: Map<String, Value> = TOP_LEVEL_KEYS
        .iter()
        .filter_map(|k| obj.get(*k).map(|v| ((*k).to_owned(), v.clone())))
        .collect();
    Ok(Value::Object(out))
}

/// `(domain separator, message struct hash)` for `data`.
pub fn hashes(data: &Value, version: TypedDataVersion) -> KeyringResult<(B256, B256)> {
    let sanitized = sanitize(data)?;
    if version == TypedDataVersion::V3 {
        return super::typed_data_v3::hashes(&sanitized);
    }
    let typed: TypedData = serde_json::from_value(sanitized)
        .map_err(|e| KeyringError::InvalidTypedData(e.to_string()))?;
    let domain_hash = typed.domain.hash_struct();
    let message_hash = typed
        .hash_struct()
        .map_err(|e| KeyringError::InvalidTypedData(e.to_string()))?;
    Ok((domain_hash, message_hash))
}

/// `keccak256(0x19 || 0x01 || domain || message)`.
pub fn signing_digest(domain_hash: &B256, message_hash: &B256) -> B256 {
    let mut preimage = Vec::with_capacity(66);
    preimage.extend_from_slice(&[0x19, 0x01]);
    preimage.extend_from_slice(domain_hash.as_slice());
    preimage.extend_from_slice(message_hash.as_slice());
    keccak256(preimage)
}

pub async fn sign<D: SigningDevice>(
    device: &D,
    account: &Account,
    address: &str,
    data: &Value,
    version: TypedDataVersion,
) -> KeyringResult<String> {
    let mut req = PendingSignRequest::build(SignKind::TypedData, address, account)?;
    let expected = req.address.clone();
    let (domain_hash, message_hash) = req.check(hashes(data, version), SignStage::Normalized)?;

    let response = device
        .sign_typed_data(SignTypedDataRequest {
            path: req.derivation_path.to_owned(),
            passphrase_state: req.passphrase_state.map(str::to_owned),
            use_empty_passphrase: req.use_empty_passphrase(),
            data: data.clone(),
            domain_hash: hex::encode(domain_hash),
            message_hash: hex::encode(message_hash),
            v4_compat: version.v4_compat(),
        })
        .await
        .map_err(KeyringError::from);
    let response = req.check(response, SignStage::DeviceResponded)?;

    let digest = signing_digest(&domain_hash, &message_hash);
    req.check(check_signer(&expected, &response, &digest), SignStage::Verified)?;
    req.advance(SignStage::Complete);
    info!(address = %expected, ?version, "typed data signed");
    Ok(add_hex_prefix(&response.signature))
}
