use crate::{device::TransportKind, hdpath::DEFAULT_BASE_PATH, paging::DEFAULT_PAGE_SIZE};
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHAIN_ID: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyringConfig {
    /// HD path template or custom base path used for new accounts.
    pub base_path: String,
    /// Accounts shown per discovery page.
    pub page_size: u32,
    /// Chain context for transactions built by the CLI.
    pub chain_id: u64,
    /// Ask the device for its passphrase state before deriving accounts.
    pub passphrase_enabled: bool,
    pub transport: TransportKind,
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_owned(),
            page_size: DEFAULT_PAGE_SIZE,
            chain_id: DEFAULT_CHAIN_ID,
            passphrase_enabled: false,
            transport: TransportKind::default(),
        }
    }
}
