//! Signing protocols run against the device.
//!
//! Every protocol follows the same life cycle: the request is built from the account metadata,
//! normalized into the device format, sent, and the response is checked against the requested
//! address before anything is handed back. A failure at any stage discards the response.

pub mod message;
pub mod transaction;
pub mod typed_data;
mod typed_data_v3;

pub use transaction::{KeyringTransaction, LegacySignature, LegacyTransaction, ModernTransaction};
pub use typed_data::TypedDataVersion;

use crate::{
    device::{is_empty_passphrase, MessageSignature},
    errors::{KeyringError, KeyringResult},
    registry::Account,
    verify::{parse_signature, recover_from_prehash, to_checksum, verify},
};
use alloy::primitives::B256;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignKind {
    Transaction,
    Message,
    TypedData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignStage {
    Built,
    Normalized,
    DeviceResponded,
    Verified,
    Complete,
    Failed,
}

/// One in-flight signing call. Borrowed from the registry, never persisted.
#[derive(Debug)]
pub struct PendingSignRequest<'a> {
    pub kind: SignKind,
    /// Checksummed form of the requested address.
    pub address: String,
    pub derivation_path: &'a str,
    pub passphrase_state: Option<&'a str>,
    stage: SignStage,
}

impl<'a> PendingSignRequest<'a> {
    pub fn build(kind: SignKind, address: &str, account: &'a Account) -> KeyringResult<Self> {
        Ok(Self {
            kind,
            address: to_checksum(address)?,
            derivation_path: &account.derivation_path,
            passphrase_state: account.passphrase_state.as_deref(),
            stage: SignStage::Built,
        })
    }

    pub const fn stage(&self) -> SignStage {
        self.stage
    }

    pub fn use_empty_passphrase(&self) -> bool {
        is_empty_passphrase(self.passphrase_state)
    }

    pub fn advance(&mut self, next: SignStage) {
        debug!(kind = ?self.kind, from = ?self.stage, to = ?next, "sign request");
        self.stage = next;
    }

    /// Runs `step`; on error the request is marked failed and the error is returned as-is.
    pub fn check<T>(&mut self, step: KeyringResult<T>, next: SignStage) -> KeyringResult<T> {
        match step {
            Ok(v) => {
                self.advance(next);
                Ok(v)
            }
            Err(e) => {
                if matches!(e, KeyringError::SignatureAddressMismatch { .. }) {
                    warn!(kind = ?self.kind, address = %self.address, "signer mismatch; discarding signature");
                }
                self.stage = SignStage::Failed;
                Err(e)
            }
        }
    }
}

/// Both the address the device reports and the address recovered from the signature over
/// `digest` must equal `expected`.
pub(crate) fn check_signer(
    expected: &str,
    response: &MessageSignature,
    digest: &B256,
) -> KeyringResult<()> {
    verify(expected, &response.address)?;
    let signature = parse_signature(&response.signature)?;
    let recovered = recover_from_prehash(&signature, digest)?;
    verify(expected, &recovered.to_checksum(None))
}
