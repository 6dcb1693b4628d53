//! Persisted keyring state.
//!
//! The on-disk shape is camelCase JSON so that snapshots stay readable by wallet front-ends:
//!
//! ```json
//! { "basePath": "m/44'/60'/0'/0", "accounts": ["0x…"],
//!   "accountDetails": { "0x…": { "index": 0, "derivationPath": "m/44'/60'/0'/0/0" } },
//!   "page": 1 }
//! ```

use crate::{hdpath::DEFAULT_BASE_PATH, registry::Account};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountDetail {
    pub index: u32,
    pub derivation_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase_state: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeyringSnapshot {
    pub base_path: String,
    pub accounts: Vec<String>,
    pub account_details: BTreeMap<String, AccountDetail>,
    pub page: u32,
}

impl Default for KeyringSnapshot {
    fn default() -> Self {
        Self {
            base_path: DEFAULT_BASE_PATH.to_owned(),
            accounts: Vec::new(),
            account_details: BTreeMap::new(),
            page: 0,
        }
    }
}

impl KeyringSnapshot {
    /// Flattens the detail map back into [`Account`] records.
    pub fn account_records(&self) -> impl Iterator<Item = Account> + '_ {
        self.account_details.iter().map(|(address, d)| Account {
            address: address.clone(),
            index: d.index,
            derivation_path: d.derivation_path.clone(),
            passphrase_state: d.passphrase_state.clone(),
        })
    }
}

impl From<&Account> for AccountDetail {
    fn from(a: &Account) -> Self {
        Self {
            index: a.index,
            derivation_path: a.derivation_path.clone(),
            passphrase_state: a.passphrase_state.clone(),
        }
    }
}
