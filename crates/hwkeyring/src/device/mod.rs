//! Boundary to the hardware signing device.
//!
//! The device owns all key material. Only derivation paths, passphrase state tokens and
//! already-normalized requests cross this boundary; the keyring validates everything that comes
//! back. Transport (USB, bridge daemon, emulator) is the implementor's concern.

pub mod emulator;
mod events;

pub use events::{EventBus, UiEvent};

use crate::errors::UNKNOWN_ERROR;
use alloy::eips::eip2930::AccessList;
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

/// Error codes reported by the vendor SDK. Unlisted codes are carried through as `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", from = "i64")]
pub enum DeviceErrorCode {
    DeviceNotFound,
    NotAllowedInBootloaderMode,
    DeviceBusy,
    FirmwareUpgradeRequired,
    FirmwareForceUpdate,
    WebDeviceNotFoundOrNeedsPermission,
    BridgeNotInstalled,
    NotInitialized,
    Other(i64),
}

impl DeviceErrorCode {
    /// Conditions the user has to resolve on the device or host before any call can succeed.
    /// These are re-broadcast as [`UiEvent::Blocked`].
    pub const fn is_blocking(self) -> bool {
        matches!(
            self,
            Self::WebDeviceNotFoundOrNeedsPermission
                | Self::BridgeNotInstalled
                | Self::FirmwareForceUpdate
                | Self::NotAllowedInBootloaderMode
                | Self::FirmwareUpgradeRequired
        )
    }
}

impl From<DeviceErrorCode> for i64 {
    fn from(c: DeviceErrorCode) -> Self {
        match c {
            DeviceErrorCode::DeviceNotFound => 105,
            DeviceErrorCode::NotAllowedInBootloaderMode => 116,
            DeviceErrorCode::DeviceBusy => 117,
            DeviceErrorCode::FirmwareUpgradeRequired => 407,
            DeviceErrorCode::FirmwareForceUpdate => 414,
            DeviceErrorCode::WebDeviceNotFoundOrNeedsPermission => 708,
            DeviceErrorCode::BridgeNotInstalled => 712,
            DeviceErrorCode::NotInitialized => 800,
            DeviceErrorCode::Other(n) => n,
        }
    }
}

impl From<i64> for DeviceErrorCode {
    fn from(n: i64) -> Self {
        match n {
            105 => Self::DeviceNotFound,
            116 => Self::NotAllowedInBootloaderMode,
            117 => Self::DeviceBusy,
            407 => Self::FirmwareUpgradeRequired,
            414 => Self::FirmwareForceUpdate,
            708 => Self::WebDeviceNotFoundOrNeedsPermission,
            712 => Self::BridgeNotInstalled,
            800 => Self::NotInitialized,
            other => Self::Other(other),
        }
    }
}

/// Structured failure reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct DeviceFailure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<DeviceErrorCode>,
}

impl DeviceFailure {
    pub fn new(message: impl Into<String>, code: Option<DeviceErrorCode>) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    pub fn not_initialized() -> Self {
        Self::new("SDK not initialized", Some(DeviceErrorCode::NotInitialized))
    }

    pub fn is_not_initialized(&self) -> bool {
        self.code == Some(DeviceErrorCode::NotInitialized)
    }

    pub fn is_blocking(&self) -> bool {
        self.code.is_some_and(DeviceErrorCode::is_blocking)
    }

    pub fn message_or_default(&self) -> &str {
        let m = self.message.trim();
        if m.is_empty() {
            UNKNOWN_ERROR
        } else {
            m
        }
    }
}

pub type DeviceResult<T> = Result<T, DeviceFailure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Webusb,
    Bridge,
    #[default]
    Emulator,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectSettings {
    pub debug: bool,
    pub fetch_config: bool,
    pub env: TransportKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyRequest {
    pub path: String,
    pub show_on_device: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyBatchRequest {
    pub bundle: Vec<PublicKeyRequest>,
    pub passphrase_state: Option<String>,
    pub use_empty_passphrase: bool,
}

/// One entry of a batched public key response. `public_key` is SEC1 hex (compressed or not);
/// `None` means the device skipped the entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyEntry {
    pub public_key: Option<String>,
}

/// Device-facing transaction. Every quantity is a `0x`-prefixed hex string; the chain id is a
/// plain number taken from the keyring's chain context.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTransaction {
    /// `None` for contract creation.
    pub to: Option<String>,
    pub value: String,
    pub data: String,
    pub chain_id: u64,
    pub nonce: String,
    pub gas_limit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_fee_per_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_priority_fee_per_gas: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_list: Option<AccessList>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionRequest {
    pub path: String,
    pub passphrase_state: Option<String>,
    pub use_empty_passphrase: bool,
    pub transaction: DeviceTransaction,
}

/// Raw signature components as returned by the device (hex, prefix optional).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSignature {
    pub v: String,
    pub r: String,
    pub s: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignMessageRequest {
    pub path: String,
    pub passphrase_state: Option<String>,
    pub use_empty_passphrase: bool,
    pub message_hex: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTypedDataRequest {
    pub path: String,
    pub passphrase_state: Option<String>,
    pub use_empty_passphrase: bool,
    pub data: serde_json::Value,
    pub domain_hash: String,
    pub message_hash: String,
    pub v4_compat: bool,
}

/// Signature plus the address the device claims to have signed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSignature {
    pub address: String,
    pub signature: String,
}

/// A hardware signing device. Calls are issued strictly one at a time by the keyring.
pub trait SigningDevice: Send + Sync {
    /// Connect to the device. Calling it again on an initialized device is a no-op.
    fn init(&self, settings: &ConnectSettings) -> impl Future<Output = DeviceResult<()>> + Send;

    /// Drop the SDK session; later calls fail with `NotInitialized` until `init` runs again.
    fn destroy(&self) -> impl Future<Output = ()> + Send;

    /// Release transport resources.
    fn dispose(&self) -> impl Future<Output = ()> + Send;

    fn model(&self) -> Option<String>;

    /// Route device UI events (PIN prompts, firmware notices, ...) into `bus`.
    fn attach_ui_events(&self, bus: EventBus);

    fn detach_ui_events(&self);

    fn switch_transport(&self, kind: TransportKind)
        -> impl Future<Output = DeviceResult<()>> + Send;

    fn derive_public_keys(
        &self,
        req: PublicKeyBatchRequest,
    ) -> impl Future<Output = DeviceResult<Vec<PublicKeyEntry>>> + Send;

    fn sign_transaction(
        &self,
        req: SignTransactionRequest,
    ) -> impl Future<Output = DeviceResult<TransactionSignature>> + Send;

    fn sign_message(
        &self,
        req: SignMessageRequest,
    ) -> impl Future<Output = DeviceResult<MessageSignature>> + Send;

    fn sign_typed_data(
        &self,
        req: SignTypedDataRequest,
    ) -> impl Future<Output = DeviceResult<MessageSignature>> + Send;

    fn get_passphrase_state(&self) -> impl Future<Output = DeviceResult<Option<String>>> + Send;
}

/// Absent, null and empty tokens all mean "standard wallet, no passphrase".
pub fn is_empty_passphrase(state: Option<&str>) -> bool {
    state.is_none_or(str::is_empty)
}
