use crate::device::DeviceFailure;
use thiserror::Error;

/// Message used whenever the device fails without saying why.
pub const UNKNOWN_ERROR: &str = "Unknown error";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyringError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("{message}")]
    DeviceRejected {
        message: String,
        code: Option<i64>,
    },

    #[error("device returned {returned} public keys for {requested} paths")]
    BatchSizeMismatch { requested: usize, returned: usize },

    #[error("device returned no public key for batch entry {index}")]
    MissingBatchEntry { index: usize },

    #[error("Unknown address")]
    UnknownAddress(String),

    #[error("Address {0} not found in this keyring")]
    AddressNotFound(String),

    #[error("signature doesn't match the right address (expected {expected}, recovered {recovered})")]
    SignatureAddressMismatch { expected: String, recovered: String },

    #[error("Not supported on this device")]
    UnsupportedOperation,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid typed data: {0}")]
    InvalidTypedData(String),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("invalid account range: {0}")]
    InvalidRange(String),
}

impl KeyringError {
    pub fn rejected(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::DeviceRejected {
            message: if message.trim().is_empty() {
                UNKNOWN_ERROR.to_owned()
            } else {
                message
            },
            code: None,
        }
    }

    /// True when the error came from the device rather than from local validation.
    pub const fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::DeviceUnavailable(_)
                | Self::DeviceRejected { .. }
                | Self::BatchSizeMismatch { .. }
                | Self::MissingBatchEntry { .. }
        )
    }
}

impl From<DeviceFailure> for KeyringError {
    fn from(f: DeviceFailure) -> Self {
        if f.is_not_initialized() {
            return Self::DeviceUnavailable(f.message_or_default().to_owned());
        }
        Self::DeviceRejected {
            message: f.message_or_default().to_owned(),
            code: f.code.map(i64::from),
        }
    }
}

pub type KeyringResult<T> = Result<T, KeyringError>;
