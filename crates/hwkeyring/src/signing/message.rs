//! `personal_sign` (EIP-191 version 0x45).

use super::{check_signer, PendingSignRequest, SignKind, SignStage};
use crate::{
    device::{SignMessageRequest, SigningDevice},
    errors::{KeyringError, KeyringResult},
    registry::Account,
    verify::{add_hex_prefix, strip_hex_prefix},
};
use alloy::primitives::eip191_hash_message;
use tracing::info;

/// Bytes that get signed for `message`.
///
/// The message is hex, with or without a `0x` prefix. Input that does not decode as hex is
/// signed as its UTF-8 text.
pub fn message_bytes(message: &str) -> Vec<u8> {
    hex::decode(strip_hex_prefix(message)).unwrap_or_else(|_| message.as_bytes().to_vec())
}

pub async fn sign<D: SigningDevice>(
    device: &D,
    account: &Account,
    address: &str,
    message: &str,
) -> KeyringResult<String> {
    let mut req = PendingSignRequest::build(SignKind::Message, address, account)?;
    let expected = req.address.clone();
    let bytes = message_bytes(message);
    req.advance(SignStage::Normalized);

    let response = device
        .sign_message(SignMessageRequest {
            path: req.derivation_path.to_owned(),
            passphrase_state: req.passphrase_state.map(str::to_owned),
            use_empty_passphrase: req.use_empty_passphrase(),
            message_hex: hex::encode(&bytes),
        })
        .await
        .map_err(KeyringError::from);
    let response = req.check(response, SignStage::DeviceResponded)?;

    let digest = eip191_hash_message(&bytes);
    req.check(check_signer(&expected, &response, &digest), SignStage::Verified)?;
    req.advance(SignStage::Complete);
    info!(address = %expected, len = bytes.len(), "message signed");
    Ok(add_hex_prefix(&response.signature))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_raw_bytes_with_or_without_prefix() {
        assert_eq!(message_bytes("0xdeadbeef"), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(message_bytes("deadbeef"), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(message_bytes("0XDEADBEEF"), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(message_bytes("0x"), Vec::<u8>::new());
    }

    #[test]
    fn non_hex_is_text() {
        assert_eq!(message_bytes("hello"), b"hello".to_vec());
        assert_eq!(message_bytes("0xnot hex"), b"0xnot hex".to_vec());
        assert_eq!(message_bytes("abc"), b"abc".to_vec());
    }
}
