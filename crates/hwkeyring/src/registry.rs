use crate::{
    errors::{KeyringError, KeyringResult},
    verify::to_checksum,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A derived account. Only `passphrase_state` is ever refreshed after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    pub index: u32,
    pub derivation_path: String,
    pub passphrase_state: Option<String>,
}

/// Ordered set of discovered addresses plus derivation metadata keyed by checksummed address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountRegistry {
    accounts: Vec<String>,
    details: BTreeMap<String, Account>,
}

impl AccountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn addresses(&self) -> &[String] {
        &self.accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn details(&self) -> impl Iterator<Item = &Account> {
        self.details.values()
    }

    pub fn contains(&self, checksummed: &str) -> bool {
        self.accounts.iter().any(|a| a == checksummed)
    }

    /// Records a freshly derived account. `account.address` must already be checksummed.
    ///
    /// Metadata is kept from the first sighting; returns true when the address was appended.
    pub fn record(&mut self, account: Account) -> bool {
        let appended = if self.contains(&account.address) {
            false
        } else {
            self.accounts.push(account.address.clone());
            true
        };
        self.details
            .entry(account.address.clone())
            .or_insert(account);
        appended
    }

    /// Metadata for `address` in any letter case.
    pub fn get(&self, address: &str) -> KeyringResult<&Account> {
        let key = to_checksum(address)?;
        self.details
            .get(&key)
            .ok_or(KeyringError::UnknownAddress(key))
    }

    /// Removes `address` (case-insensitive) and its metadata. Leaves the registry untouched when
    /// the address is not held.
    pub fn remove(&mut self, address: &str) -> KeyringResult<()> {
        let needle = address.trim().to_lowercase();
        if !self.accounts.iter().any(|a| a.to_lowercase() == needle) {
            return Err(KeyringError::AddressNotFound(address.to_owned()));
        }
        let key = to_checksum(address)?;
        self.accounts.retain(|a| a.to_lowercase() != needle);
        self.details.remove(&key);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.accounts.clear();
        self.details.clear();
    }

    /// Rebuilds a registry from persisted parts, normalizing every address to checksum form.
    ///
    /// Duplicate addresses collapse to their first position. Addresses without metadata cannot be
    /// signed for and are dropped; they come back on the next `add_accounts`.
    pub fn restore(
        accounts: &[String],
        details: impl IntoIterator<Item = Account>,
    ) -> KeyringResult<Self> {
        let mut by_key = BTreeMap::new();
        for mut d in details {
            d.address = to_checksum(&d.address)?;
            by_key.entry(d.address.clone()).or_insert(d);
        }

        let mut out = Self::new();
        for a in accounts {
            let key = to_checksum(a)?;
            match by_key.get(&key) {
                Some(d) => {
                    out.record(d.clone());
                }
                None => {
                    tracing::warn!(address = %key, "dropping persisted account without derivation details");
                }
            }
        }
        // Details for unlisted addresses are kept.
        for (k, d) in by_key {
            out.details.entry(k).or_insert(d);
        }
        Ok(out)
    }

    /// Every listed address is unique and has metadata under its checksummed key.
    pub fn is_consistent(&self) -> bool {
        let mut seen = std::collections::BTreeSet::new();
        self.accounts.iter().all(|a| {
            let key = to_checksum(a).unwrap_or_default();
            seen.insert(key.clone()) && self.details.contains_key(&key)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
    const B: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    fn acct(address: &str, index: u32) -> Account {
        Account {
            address: address.to_owned(),
            index,
            derivation_path: format!("m/44'/60'/0'/0/{index}"),
            passphrase_state: None,
        }
    }

    #[test]
    fn record_dedups_and_keeps_first_metadata() {
        let mut r = AccountRegistry::new();
        assert!(r.record(acct(A, 0)));
        assert!(r.record(acct(B, 1)));
        assert!(!r.record(acct(A, 9)));

        assert_eq!(r.addresses(), [A.to_owned(), B.to_owned()]);
        assert_eq!(r.get(A).map(|d| d.index).ok(), Some(0));
        assert!(r.is_consistent());
    }

    #[test]
    fn lookup_is_case_insensitive() -> eyre::Result<()> {
        let mut r = AccountRegistry::new();
        r.record(acct(A, 0));
        assert_eq!(r.get(&A.to_lowercase())?.address, A);
        assert!(matches!(
            r.get(B),
            Err(KeyringError::UnknownAddress(_))
        ));
        Ok(())
    }

    #[test]
    fn remove_matches_any_case_and_drops_metadata() -> eyre::Result<()> {
        let mut r = AccountRegistry::new();
        r.record(acct(A, 0));
        r.record(acct(B, 1));

        r.remove(&A.to_lowercase())?;
        assert_eq!(r.addresses(), [B.to_owned()]);
        assert!(r.get(A).is_err());
        assert!(r.is_consistent());
        Ok(())
    }

    #[test]
    fn removing_unknown_address_leaves_state_alone() {
        let mut r = AccountRegistry::new();
        r.record(acct(A, 0));
        let before = r.clone();

        let err = r.remove(B).err();
        assert!(matches!(err, Some(KeyringError::AddressNotFound(_))));
        assert_eq!(r, before);
    }

    #[test]
    fn restore_normalizes_keys_and_drops_orphans() -> eyre::Result<()> {
        let accounts = vec![A.to_lowercase(), A.to_owned(), B.to_owned()];
        let details = vec![acct(&A.to_lowercase(), 0)];
        let r = AccountRegistry::restore(&accounts, details)?;

        assert_eq!(r.addresses(), [A.to_owned()]);
        assert_eq!(r.get(A)?.address, A);
        assert!(r.is_consistent());
        Ok(())
    }
}
