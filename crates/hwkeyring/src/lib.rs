//! Keyring controller for hardware signing devices.
//!
//! Accounts are derived on the device and cached locally; every signature the device returns is
//! checked against the address it was requested for before it reaches the caller.

pub mod config;
pub mod device;
pub mod errors;
pub mod fsutil;
pub mod hdpath;
pub mod keyring;
pub mod paging;
pub mod passphrase;
pub mod paths;
pub mod registry;
pub mod signing;
pub mod snapshot;
pub mod store;
pub mod verify;

pub use device::{SigningDevice, TransportKind, UiEvent};
pub use errors::{KeyringError, KeyringResult};
pub use keyring::{KeyringController, KEYRING_TYPE};
pub use signing::{KeyringTransaction, TypedDataVersion};
