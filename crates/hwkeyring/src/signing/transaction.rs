//! Transaction signing.
//!
//! Callers hand in one of two shapes. [`LegacyTransaction`] is a plain mutable record that gets
//! its signature written in place. [`ModernTransaction`] wraps an unsigned consensus transaction
//! bound to a chain context; signing it yields a new value and leaves the input untouched.

use super::{PendingSignRequest, SignKind, SignStage};
use crate::{
    device::{DeviceTransaction, SignTransactionRequest, SigningDevice, TransactionSignature},
    errors::{KeyringError, KeyringResult},
    registry::Account,
    verify::{recover_from_prehash, strip_hex_prefix, verify},
};
use alloy::{
    consensus::{SignableTransaction as _, TxEnvelope, TxLegacy, TypedTransaction},
    primitives::{Address, Bytes, Signature, TxKind, U256},
};
use tracing::info;

fn quantity<T: std::fmt::LowerHex>(v: T) -> String {
    format!("0x{v:x}")
}

fn hex_bytes(b: &Bytes) -> String {
    format!("0x{}", hex::encode(b))
}

fn hex_address(a: Address) -> String {
    format!("0x{}", hex::encode(a))
}

fn kind_to_hex(kind: TxKind) -> Option<String> {
    match kind {
        TxKind::Call(a) => Some(hex_address(a)),
        TxKind::Create => None,
    }
}

fn bad_signature(what: &str, e: impl std::fmt::Display) -> KeyringError {
    KeyringError::InvalidSignature(format!("{what}: {e}"))
}

/// Raw `(v, r, s)` as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacySignature {
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

impl LegacySignature {
    pub fn from_device(sig: &TransactionSignature) -> KeyringResult<Self> {
        let v = strip_hex_prefix(sig.v.trim());
        if v.is_empty() {
            return Err(bad_signature("v", "empty"));
        }
        Ok(Self {
            v: u64::from_str_radix(v, 16).map_err(|e| bad_signature("v", e))?,
            r: U256::from_str_radix(strip_hex_prefix(sig.r.trim()), 16)
                .map_err(|e| bad_signature("r", e))?,
            s: U256::from_str_radix(strip_hex_prefix(sig.s.trim()), 16)
                .map_err(|e| bad_signature("s", e))?,
        })
    }

    /// y-parity, plus the chain id when `v` carries one (EIP-155).
    pub fn decode(&self) -> KeyringResult<(Signature, Option<u64>)> {
        let (parity, chain) = match self.v {
            0 | 1 => (self.v == 1, None),
            27 | 28 => (self.v == 28, None),
            v if v >= 35 => ((v - 35) % 2 == 1, Some((v - 35) / 2)),
            v => return Err(bad_signature("v", format!("unexpected value {v}"))),
        };
        Ok((Signature::new(self.r, self.s, parity), chain))
    }

    /// The signature, provided `v` is valid for `chain_id`. With `eip155` set, `v` must carry
    /// the chain; otherwise a bare parity is accepted too.
    pub fn for_chain(&self, chain_id: u64, eip155: bool) -> KeyringResult<Signature> {
        let (sig, chain) = self.decode()?;
        match chain {
            Some(c) if c == chain_id => Ok(sig),
            None if !eip155 => Ok(sig),
            Some(c) => Err(bad_signature(
                "v",
                format!("signs for chain {c}, expected {chain_id}"),
            )),
            None => Err(bad_signature(
                "v",
                format!("{} carries no chain id, expected {chain_id}", self.v),
            )),
        }
    }
}

fn envelope_signer(envelope: &TxEnvelope) -> KeyringResult<Address> {
    let (sig, hash) = match envelope {
        TxEnvelope::Legacy(s) => (s.signature(), s.signature_hash()),
        TxEnvelope::Eip2930(s) => (s.signature(), s.signature_hash()),
        TxEnvelope::Eip1559(s) => (s.signature(), s.signature_hash()),
        other => {
            return Err(KeyringError::InvalidTransaction(format!(
                "unsupported transaction type {:?}",
                other.tx_type()
            )))
        }
    };
    recover_from_prehash(sig, &hash)
}

/// Mutable legacy transaction. Signing writes `signature` in place.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub data: Bytes,
    pub signature: Option<LegacySignature>,
    chain_id: u64,
}

impl LegacyTransaction {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            ..Self::default()
        }
    }

    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn to_device(&self) -> DeviceTransaction {
        DeviceTransaction {
            to: self.to.map(hex_address),
            value: quantity(self.value),
            data: hex_bytes(&self.data),
            chain_id: self.chain_id,
            nonce: quantity(self.nonce),
            gas_limit: quantity(self.gas_limit),
            gas_price: Some(quantity(self.gas_price)),
            ..DeviceTransaction::default()
        }
    }

    fn unsigned(&self, chain_id: Option<u64>) -> TxLegacy {
        TxLegacy {
            chain_id,
            nonce: self.nonce,
            gas_price: self.gas_price,
            gas_limit: self.gas_limit,
            to: self.to.map_or(TxKind::Create, TxKind::Call),
            value: self.value,
            input: self.data.clone(),
        }
    }

    pub fn sender(&self) -> KeyringResult<Address> {
        let parts = self
            .signature
            .ok_or_else(|| bad_signature("transaction", "not signed"))?;
        let sig = parts.for_chain(self.chain_id, true)?;
        recover_from_prehash(&sig, &self.unsigned(Some(self.chain_id)).signature_hash())
    }
}

/// Immutable typed transaction bound to the chain it will be broadcast on.
///
/// `chain_id` is authoritative: whatever chain id the inner transaction carries is replaced by
/// it when the device request is built and when the signed copy is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModernTransaction {
    tx: TypedTransaction,
    chain_id: u64,
    frozen: bool,
    signature: Option<LegacySignature>,
}

impl ModernTransaction {
    /// Frozen by default.
    pub fn new(tx: impl Into<TypedTransaction>, chain_id: u64) -> Self {
        Self {
            tx: tx.into(),
            chain_id,
            frozen: true,
            signature: None,
        }
    }

    #[must_use]
    pub const fn unfrozen(mut self) -> Self {
        self.frozen = false;
        self
    }

    pub const fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub const fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub const fn transaction(&self) -> &TypedTransaction {
        &self.tx
    }

    pub fn transaction_mut(&mut self) -> KeyringResult<&mut TypedTransaction> {
        if self.frozen {
            return Err(KeyringError::InvalidTransaction(
                "transaction is frozen".to_owned(),
            ));
        }
        Ok(&mut self.tx)
    }

    pub const fn signature(&self) -> Option<&LegacySignature> {
        self.signature.as_ref()
    }

    fn unsupported(&self) -> KeyringError {
        KeyringError::InvalidTransaction(format!(
            "unsupported transaction type {:?}",
            self.tx.tx_type()
        ))
    }

    fn to_device(&self) -> KeyringResult<DeviceTransaction> {
        let chain_id = self.chain_id;
        match &self.tx {
            TypedTransaction::Legacy(t) => Ok(DeviceTransaction {
                to: kind_to_hex(t.to),
                value: quantity(t.value),
                data: hex_bytes(&t.input),
                chain_id,
                nonce: quantity(t.nonce),
                gas_limit: quantity(t.gas_limit),
                gas_price: Some(quantity(t.gas_price)),
                ..DeviceTransaction::default()
            }),
            TypedTransaction::Eip2930(t) => Ok(DeviceTransaction {
                to: kind_to_hex(t.to),
                value: quantity(t.value),
                data: hex_bytes(&t.input),
                chain_id,
                nonce: quantity(t.nonce),
                gas_limit: quantity(t.gas_limit),
                gas_price: Some(quantity(t.gas_price)),
                access_list: Some(t.access_list.clone()),
                ..DeviceTransaction::default()
            }),
            TypedTransaction::Eip1559(t) => Ok(DeviceTransaction {
                to: kind_to_hex(t.to),
                value: quantity(t.value),
                data: hex_bytes(&t.input),
                chain_id,
                nonce: quantity(t.nonce),
                gas_limit: quantity(t.gas_limit),
                max_fee_per_gas: Some(quantity(t.max_fee_per_gas)),
                max_priority_fee_per_gas: Some(quantity(t.max_priority_fee_per_gas)),
                access_list: Some(t.access_list.clone()),
                ..DeviceTransaction::default()
            }),
            _ => Err(self.unsupported()),
        }
    }

    /// New value carrying `sig`, the chain context and the same frozen flag.
    fn with_signature(&self, sig: LegacySignature) -> KeyringResult<Self> {
        let eip155 = matches!(self.tx, TypedTransaction::Legacy(_));
        sig.for_chain(self.chain_id, eip155)?;
        let mut tx = self.tx.clone();
        match &mut tx {
            TypedTransaction::Legacy(t) => t.chain_id = Some(self.chain_id),
            TypedTransaction::Eip2930(t) => t.chain_id = self.chain_id,
            TypedTransaction::Eip1559(t) => t.chain_id = self.chain_id,
            _ => return Err(self.unsupported()),
        }
        Ok(Self {
            tx,
            chain_id: self.chain_id,
            frozen: self.frozen,
            signature: Some(sig),
        })
    }

    /// Signer of the envelope this value encodes to.
    pub fn sender(&self) -> KeyringResult<Address> {
        envelope_signer(&self.envelope()?)
    }

    /// Signed envelope, ready for EIP-2718 encoding.
    pub fn envelope(&self) -> KeyringResult<TxEnvelope> {
        let parts = self
            .signature
            .ok_or_else(|| bad_signature("transaction", "not signed"))?;
        let eip155 = matches!(self.tx, TypedTransaction::Legacy(_));
        let sig = parts.for_chain(self.chain_id, eip155)?;
        match self.tx.clone() {
            TypedTransaction::Legacy(t) => Ok(TxEnvelope::Legacy(t.into_signed(sig))),
            TypedTransaction::Eip2930(t) => Ok(TxEnvelope::Eip2930(t.into_signed(sig))),
            TypedTransaction::Eip1559(t) => Ok(TxEnvelope::Eip1559(t.into_signed(sig))),
            _ => Err(self.unsupported()),
        }
    }
}

/// A transaction in either representation. The variant is fixed when the value is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyringTransaction {
    Legacy(LegacyTransaction),
    Modern(ModernTransaction),
}

impl From<LegacyTransaction> for KeyringTransaction {
    fn from(tx: LegacyTransaction) -> Self {
        Self::Legacy(tx)
    }
}

impl From<ModernTransaction> for KeyringTransaction {
    fn from(tx: ModernTransaction) -> Self {
        Self::Modern(tx)
    }
}

impl KeyringTransaction {
    pub const fn chain_id(&self) -> u64 {
        match self {
            Self::Legacy(t) => t.chain_id(),
            Self::Modern(t) => t.chain_id(),
        }
    }

    pub const fn is_signed(&self) -> bool {
        match self {
            Self::Legacy(t) => t.signature.is_some(),
            Self::Modern(t) => t.signature.is_some(),
        }
    }

    pub fn to_device_request(&self) -> KeyringResult<DeviceTransaction> {
        match self {
            Self::Legacy(t) => Ok(t.to_device()),
            Self::Modern(t) => t.to_device(),
        }
    }

    /// Legacy values are updated in place and handed back; modern values are rebuilt.
    pub fn apply_signature(self, sig: &TransactionSignature) -> KeyringResult<Self> {
        let parts = LegacySignature::from_device(sig)?;
        match self {
            Self::Legacy(mut t) => {
                parts.for_chain(t.chain_id, true)?;
                t.signature = Some(parts);
                Ok(Self::Legacy(t))
            }
            Self::Modern(t) => Ok(Self::Modern(t.with_signature(parts)?)),
        }
    }

    pub fn sender(&self) -> KeyringResult<Address> {
        match self {
            Self::Legacy(t) => t.sender(),
            Self::Modern(t) => t.sender(),
        }
    }
}

pub async fn sign<D: SigningDevice>(
    device: &D,
    account: &Account,
    address: &str,
    tx: KeyringTransaction,
) -> KeyringResult<KeyringTransaction> {
    let mut req = PendingSignRequest::build(SignKind::Transaction, address, account)?;
    let expected = req.address.clone();
    let transaction = req.check(tx.to_device_request(), SignStage::Normalized)?;

    let response = device
        .sign_transaction(SignTransactionRequest {
            path: req.derivation_path.to_owned(),
            passphrase_state: req.passphrase_state.map(str::to_owned),
            use_empty_passphrase: req.use_empty_passphrase(),
            transaction,
        })
        .await
        .map_err(KeyringError::from);
    let response = req.check(response, SignStage::DeviceResponded)?;
    let signed = req.check(tx.apply_signature(&response), SignStage::DeviceResponded)?;

    let checked = signed
        .sender()
        .and_then(|sender| verify(&expected, &sender.to_checksum(None)));
    req.check(checked, SignStage::Verified)?;
    req.advance(SignStage::Complete);
    info!(address = %expected, chain_id = signed.chain_id(), "transaction signed");
    Ok(signed)
}
