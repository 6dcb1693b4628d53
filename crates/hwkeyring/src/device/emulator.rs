//! Software stand-in for a hardware wallet, backed by a BIP-39 mnemonic.
//!
//! Keys are derived on every call and never leave this module. A non-empty passphrase state
//! token unlocks the matching hidden wallet by acting as the BIP-39 password.

use super::{
    ConnectSettings, DeviceFailure, DeviceResult, DeviceTransaction, EventBus, MessageSignature,
    PublicKeyBatchRequest, PublicKeyEntry, SignMessageRequest, SignTransactionRequest,
    SignTypedDataRequest, SigningDevice, TransactionSignature, TransportKind, UiEvent,
};
use crate::verify::strip_hex_prefix;
use alloy::{
    consensus::{SignableTransaction, TxEip1559, TxEip2930, TxLegacy},
    primitives::{keccak256, Address, Bytes, Signature, TxKind, B256, U256},
    signers::{
        local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner},
        SignerSync as _,
    },
};
use bip39::{Language, Mnemonic};
use eyre::Context as _;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    str::FromStr as _,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::debug;
use zeroize::Zeroizing;

pub const EMULATOR_MODEL: &str = "emulator";

#[derive(Debug, Default)]
struct EmulatorState {
    initialized: bool,
    transport: TransportKind,
    passphrase_state: Option<String>,
    ui: Option<EventBus>,
    fail_next: Option<DeviceFailure>,
    calls: BTreeMap<&'static str, usize>,
    last_typed_data: Option<Value>,
}

pub struct EmulatorDevice {
    phrase: Zeroizing<String>,
    state: Mutex<EmulatorState>,
}

impl std::fmt::Debug for EmulatorDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatorDevice").finish_non_exhaustive()
    }
}

impl EmulatorDevice {
    pub fn new(phrase: &str) -> eyre::Result<Self> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase.trim())
            .context("parse emulator mnemonic")?;
        Ok(Self {
            phrase: Zeroizing::new(mnemonic.to_string()),
            state: Mutex::new(EmulatorState::default()),
        })
    }

    #[must_use]
    pub fn with_passphrase_state(self, token: Option<String>) -> Self {
        self.set_passphrase_state(token);
        self
    }

    /// Simulates the user entering a different passphrase on the device.
    pub fn set_passphrase_state(&self, token: Option<String>) {
        self.lock().passphrase_state = token;
    }

    /// The next device call fails with `failure` instead of running.
    pub fn fail_next(&self, failure: DeviceFailure) {
        self.lock().fail_next = Some(failure);
    }

    /// How many times `op` (the trait method name) was invoked.
    pub fn call_count(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    /// Payload of the most recent typed-data request, as the device would display it.
    pub fn last_typed_data(&self) -> Option<Value> {
        self.lock().last_typed_data.clone()
    }

    pub fn transport(&self) -> TransportKind {
        self.lock().transport
    }

    fn lock(&self) -> MutexGuard<'_, EmulatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin(&self, op: &'static str) -> DeviceResult<()> {
        let mut st = self.lock();
        *st.calls.entry(op).or_insert(0) += 1;
        if !st.initialized {
            return Err(DeviceFailure::not_initialized());
        }
        if let Some(f) = st.fail_next.take() {
            return Err(f);
        }
        Ok(())
    }

    fn signer(
        &self,
        path: &str,
        passphrase_state: Option<&str>,
        use_empty_passphrase: bool,
    ) -> DeviceResult<PrivateKeySigner> {
        let mut builder = MnemonicBuilder::<English>::default()
            .phrase(self.phrase.as_str())
            .derivation_path(path)
            .map_err(|e| DeviceFailure::new(format!("invalid path {path}: {e}"), None))?;
        if !use_empty_passphrase {
            if let Some(p) = passphrase_state.filter(|p| !p.is_empty()) {
                builder = builder.password(p);
            }
        }
        builder
            .build()
            .map_err(|e| DeviceFailure::new(format!("derive key: {e}"), None))
    }
}

fn bad_request(what: &str, e: impl std::fmt::Display) -> DeviceFailure {
    DeviceFailure::new(format!("invalid {what}: {e}"), None)
}

fn parse_quantity(what: &str, s: &str) -> DeviceResult<U256> {
    let t = strip_hex_prefix(s.trim());
    if t.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(t, 16).map_err(|e| bad_request(what, e))
}

fn parse_u64(what: &str, s: &str) -> DeviceResult<u64> {
    u64::try_from(parse_quantity(what, s)?).map_err(|e| bad_request(what, e))
}

fn parse_u128(what: &str, s: &str) -> DeviceResult<u128> {
    u128::try_from(parse_quantity(what, s)?).map_err(|e| bad_request(what, e))
}

fn parse_kind(to: Option<&str>) -> DeviceResult<TxKind> {
    match to.map(|t| strip_hex_prefix(t.trim())) {
        None | Some("") => Ok(TxKind::Create),
        Some(t) => Address::from_str(t)
            .map(TxKind::Call)
            .map_err(|e| bad_request("to", e)),
    }
}

fn parse_data(s: &str) -> DeviceResult<Bytes> {
    hex::decode(strip_hex_prefix(s.trim()))
        .map(Bytes::from)
        .map_err(|e| bad_request("data", e))
}

fn even_hex(n: u64) -> String {
    let s = format!("{n:x}");
    if s.len() % 2 == 1 {
        format!("0{s}")
    } else {
        s
    }
}

fn components(sig: &Signature, v: u64) -> TransactionSignature {
    TransactionSignature {
        v: even_hex(v),
        r: hex::encode(sig.r().to_be_bytes::<32>()),
        s: hex::encode(sig.s().to_be_bytes::<32>()),
    }
}

fn sign_with<T: SignableTransaction<Signature>>(
    signer: &PrivateKeySigner,
    tx: &T,
) -> DeviceResult<Signature> {
    signer
        .sign_hash_sync(&tx.signature_hash())
        .map_err(|e| DeviceFailure::new(format!("sign: {e}"), None))
}

/// Rebuilds the consensus transaction the request describes and signs it. The transaction type
/// is inferred from which fee fields are present.
fn sign_device_transaction(
    signer: &PrivateKeySigner,
    t: &DeviceTransaction,
) -> DeviceResult<TransactionSignature> {
    let to = parse_kind(t.to.as_deref())?;
    let value = parse_quantity("value", &t.value)?;
    let input = parse_data(&t.data)?;
    let nonce = parse_u64("nonce", &t.nonce)?;
    let gas_limit = parse_u64("gasLimit", &t.gas_limit)?;

    if let Some(max_fee) = t.max_fee_per_gas.as_deref() {
        let tx = TxEip1559 {
            chain_id: t.chain_id,
            nonce,
            gas_limit,
            max_fee_per_gas: parse_u128("maxFeePerGas", max_fee)?,
            max_priority_fee_per_gas: parse_u128(
                "maxPriorityFeePerGas",
                t.max_priority_fee_per_gas.as_deref().unwrap_or("0x0"),
            )?,
            to,
            value,
            access_list: t.access_list.clone().unwrap_or_default(),
            input,
        };
        let sig = sign_with(signer, &tx)?;
        return Ok(components(&sig, u64::from(sig.v())));
    }

    let gas_price = parse_u128("gasPrice", t.gas_price.as_deref().unwrap_or("0x0"))?;
    if let Some(access_list) = t.access_list.clone() {
        let tx = TxEip2930 {
            chain_id: t.chain_id,
            nonce,
            gas_price,
            gas_limit,
            to,
            value,
            access_list,
            input,
        };
        let sig = sign_with(signer, &tx)?;
        return Ok(components(&sig, u64::from(sig.v())));
    }

    let tx = TxLegacy {
        chain_id: Some(t.chain_id),
        nonce,
        gas_price,
        gas_limit,
        to,
        value,
        input,
    };
    let sig = sign_with(signer, &tx)?;
    // EIP-155
    let v = t
        .chain_id
        .saturating_mul(2)
        .saturating_add(35)
        .saturating_add(u64::from(sig.v()));
    Ok(components(&sig, v))
}

fn parse_hash(what: &str, s: &str) -> DeviceResult<B256> {
    B256::from_str(strip_hex_prefix(s.trim())).map_err(|e| bad_request(what, e))
}

impl SigningDevice for EmulatorDevice {
    async fn init(&self, settings: &ConnectSettings) -> DeviceResult<()> {
        let mut st = self.lock();
        *st.calls.entry("init").or_insert(0) += 1;
        if st.initialized {
            return Ok(());
        }
        st.initialized = true;
        st.transport = settings.env;
        if let Some(bus) = &st.ui {
            bus.publish(UiEvent::Device {
                payload: serde_json::json!({ "type": "device-connect", "model": EMULATOR_MODEL }),
            });
        }
        debug!(transport = ?settings.env, "emulator initialized");
        Ok(())
    }

    async fn destroy(&self) {
        self.lock().initialized = false;
    }

    async fn dispose(&self) {
        let mut st = self.lock();
        st.initialized = false;
        st.fail_next = None;
    }

    fn model(&self) -> Option<String> {
        Some(EMULATOR_MODEL.to_owned())
    }

    fn attach_ui_events(&self, bus: EventBus) {
        self.lock().ui = Some(bus);
    }

    fn detach_ui_events(&self) {
        self.lock().ui = None;
    }

    async fn switch_transport(&self, kind: TransportKind) -> DeviceResult<()> {
        let mut st = self.lock();
        if st.initialized {
            st.transport = kind;
        }
        Ok(())
    }

    async fn derive_public_keys(
        &self,
        req: PublicKeyBatchRequest,
    ) -> DeviceResult<Vec<PublicKeyEntry>> {
        self.begin("derive_public_keys")?;
        req.bundle
            .iter()
            .map(|item| -> DeviceResult<PublicKeyEntry> {
                let signer = self.signer(
                    &item.path,
                    req.passphrase_state.as_deref(),
                    req.use_empty_passphrase,
                )?;
                let point = signer.credential().verifying_key().to_encoded_point(true);
                Ok(PublicKeyEntry {
                    public_key: Some(hex::encode(point.as_bytes())),
                })
            })
            .collect()
    }

    async fn sign_transaction(
        &self,
        req: SignTransactionRequest,
    ) -> DeviceResult<TransactionSignature> {
        self.begin("sign_transaction")?;
        let signer = self.signer(
            &req.path,
            req.passphrase_state.as_deref(),
            req.use_empty_passphrase,
        )?;
        sign_device_transaction(&signer, &req.transaction)
    }

    async fn sign_message(&self, req: SignMessageRequest) -> DeviceResult<MessageSignature> {
        self.begin("sign_message")?;
        let signer = self.signer(
            &req.path,
            req.passphrase_state.as_deref(),
            req.use_empty_passphrase,
        )?;
        let message = hex::decode(strip_hex_prefix(&req.message_hex))
            .map_err(|e| bad_request("messageHex", e))?;
        let sig = signer
            .sign_message_sync(&message)
            .map_err(|e| DeviceFailure::new(format!("sign message: {e}"), None))?;
        Ok(MessageSignature {
            address: signer.address().to_checksum(None),
            signature: hex::encode(sig.as_bytes()),
        })
    }

    async fn sign_typed_data(&self, req: SignTypedDataRequest) -> DeviceResult<MessageSignature> {
        self.begin("sign_typed_data")?;
        let signer = self.signer(
            &req.path,
            req.passphrase_state.as_deref(),
            req.use_empty_passphrase,
        )?;
        self.lock().last_typed_data = Some(req.data.clone());
        let domain = parse_hash("domainHash", &req.domain_hash)?;
        let message = parse_hash("messageHash", &req.message_hash)?;

        let mut preimage = Vec::with_capacity(66);
        preimage.extend_from_slice(&[0x19, 0x01]);
        preimage.extend_from_slice(domain.as_slice());
        preimage.extend_from_slice(message.as_slice());
        let sig = signer
            .sign_hash_sync(&keccak256(preimage))
            .map_err(|e| DeviceFailure::new(format!("sign typed data: {e}"), None))?;
        Ok(MessageSignature {
            address: signer.address().to_checksum(None),
            signature: hex::encode(sig.as_bytes()),
        })
    }

    async fn get_passphrase_state(&self) -> DeviceResult<Option<String>> {
        self.begin("get_passphrase_state")?;
        Ok(self.lock().passphrase_state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceErrorCode, PublicKeyRequest};
    use crate::verify::address_from_public_key;

    const PHRASE: &str = "test test test test test test test test test test test junk";
    // First account of the phrase above at m/44'/60'/0'/0/0.
    const ADDR0: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

    fn batch(paths: &[&str], passphrase_state: Option<&str>) -> PublicKeyBatchRequest {
        PublicKeyBatchRequest {
            bundle: paths
                .iter()
                .map(|p| PublicKeyRequest {
                    path: (*p).to_owned(),
                    show_on_device: false,
                })
                .collect(),
            passphrase_state: passphrase_state.map(str::to_owned),
            use_empty_passphrase: passphrase_state.is_none(),
        }
    }

    async fn ready() -> eyre::Result<EmulatorDevice> {
        let d = EmulatorDevice::new(PHRASE)?;
        d.init(&ConnectSettings::default()).await?;
        Ok(d)
    }

    #[tokio::test]
    async fn rejects_calls_before_init() -> eyre::Result<()> {
        let d = EmulatorDevice::new(PHRASE)?;
        let err = d
            .derive_public_keys(batch(&["m/44'/60'/0'/0/0"], None))
            .await
            .err();
        assert_eq!(err, Some(DeviceFailure::not_initialized()));
        Ok(())
    }

    #[tokio::test]
    async fn derives_known_first_account() -> eyre::Result<()> {
        let d = ready().await?;
        let keys = d
            .derive_public_keys(batch(&["m/44'/60'/0'/0/0", "m/44'/60'/0'/0/1"], None))
            .await?;
        assert_eq!(keys.len(), 2);
        let pk = keys
            .first()
            .and_then(|k| k.public_key.clone())
            .ok_or_else(|| eyre::eyre!("missing key"))?;
        assert_eq!(address_from_public_key(&pk)?.to_checksum(None), ADDR0);
        Ok(())
    }

    #[tokio::test]
    async fn passphrase_selects_a_different_wallet() -> eyre::Result<()> {
        let d = ready().await?;
        let plain = d
            .derive_public_keys(batch(&["m/44'/60'/0'/0/0"], None))
            .await?;
        let hidden = d
            .derive_public_keys(batch(&["m/44'/60'/0'/0/0"], Some("secret")))
            .await?;
        assert_ne!(plain, hidden);
        Ok(())
    }

    #[tokio::test]
    async fn injected_failure_is_returned_once() -> eyre::Result<()> {
        let d = ready().await?;
        d.fail_next(DeviceFailure::new(
            "busy",
            Some(DeviceErrorCode::DeviceBusy),
        ));
        assert!(d.get_passphrase_state().await.is_err());
        assert!(d.get_passphrase_state().await.is_ok());
        assert_eq!(d.call_count("get_passphrase_state"), 2);
        Ok(())
    }

    #[tokio::test]
    async fn init_is_idempotent_and_switch_requires_session() -> eyre::Result<()> {
        let d = EmulatorDevice::new(PHRASE)?;
        d.switch_transport(TransportKind::Webusb).await?;
        assert_eq!(d.transport(), TransportKind::Emulator);

        d.init(&ConnectSettings::default()).await?;
        d.init(&ConnectSettings::default()).await?;
        d.switch_transport(TransportKind::Bridge).await?;
        assert_eq!(d.transport(), TransportKind::Bridge);
        Ok(())
    }

    #[test]
    fn legacy_v_is_eip155() -> eyre::Result<()> {
        let signer: PrivateKeySigner =
            "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80".parse()?;
        let t = DeviceTransaction {
            to: Some("0x70997970c51812dc3a010c7d01b50e0d17dc79c8".to_owned()),
            value: "0x1".to_owned(),
            data: "0x".to_owned(),
            chain_id: 1,
            nonce: "0x0".to_owned(),
            gas_limit: "0x5208".to_owned(),
            gas_price: Some("0x3b9aca00".to_owned()),
            ..Default::default()
        };
        let sig = sign_device_transaction(&signer, &t)?;
        assert!(sig.v == "25" || sig.v == "26", "v = {}", sig.v);
        assert_eq!(sig.r.len(), 64);
        Ok(())
    }
}
