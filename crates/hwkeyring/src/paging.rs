use crate::{
    device::{is_empty_passphrase, PublicKeyBatchRequest, PublicKeyRequest, SigningDevice},
    errors::{KeyringError, KeyringResult},
    hdpath,
    verify::address_from_public_key,
};
use alloy::primitives::U256;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_PAGE_SIZE: u32 = 5;

/// One row of an account-discovery page. Balances are filled in by whoever renders the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageEntry {
    pub address: String,
    pub balance: Option<U256>,
    pub index: u32,
}

/// 1-based cursor over the derivable address space. A freshly restored cursor may sit at 0; the
/// next move clamps it back to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    page: u32,
    page_size: u32,
}

impl Default for PageCursor {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl PageCursor {
    pub const fn new(page_size: u32) -> Self {
        Self {
            page: 0,
            page_size: if page_size == 0 { 1 } else { page_size },
        }
    }

    #[must_use]
    pub const fn at(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub const fn page(&self) -> u32 {
        self.page
    }

    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn set(&mut self, page: u32) {
        self.page = page;
    }

    /// Moves by `delta` pages, never below page 1.
    pub fn step(&mut self, delta: i64) -> u32 {
        let next = i64::from(self.page).saturating_add(delta);
        self.page = u32::try_from(next.max(1)).unwrap_or(u32::MAX);
        self.page
    }

    /// Index range `[from, to)` covered by the current page.
    pub fn range(&self) -> (u32, u32) {
        let page = self.page.max(1);
        let from = (page - 1).saturating_mul(self.page_size);
        (from, from.saturating_add(self.page_size))
    }
}

/// Derives checksummed addresses for `paths` with a single batched device request.
pub async fn derive_addresses<D: SigningDevice>(
    device: &D,
    paths: &[String],
    passphrase_state: Option<&str>,
) -> KeyringResult<Vec<String>> {
    let req = PublicKeyBatchRequest {
        bundle: paths
            .iter()
            .map(|path| PublicKeyRequest {
                path: path.clone(),
                show_on_device: false,
            })
            .collect(),
        passphrase_state: passphrase_state.map(str::to_owned),
        use_empty_passphrase: is_empty_passphrase(passphrase_state),
    };
    debug!(count = paths.len(), "requesting batched public keys");
    let entries = device.derive_public_keys(req).await?;

    if entries.len() != paths.len() {
        return Err(KeyringError::BatchSizeMismatch {
            requested: paths.len(),
            returned: entries.len(),
        });
    }
    entries
        .iter()
        .enumerate()
        .map(|(index, e)| -> KeyringResult<String> {
            let pk = e
                .public_key
                .as_deref()
                .filter(|pk| !pk.is_empty())
                .ok_or(KeyringError::MissingBatchEntry { index })?;
            Ok(address_from_public_key(pk)?.to_checksum(None))
        })
        .collect()
}

/// Loads the page the cursor currently points at.
pub async fn load_page<D: SigningDevice>(
    device: &D,
    base_path: &str,
    cursor: &PageCursor,
    passphrase_state: Option<&str>,
) -> KeyringResult<Vec<PageEntry>> {
    let (from, to) = cursor.range();
    let paths = hdpath::derive_range(base_path, from, to);
    let addresses = derive_addresses(device, &paths, passphrase_state).await?;
    Ok((from..to)
        .zip(addresses)
        .map(|(index, address)| PageEntry {
            address,
            balance: None,
            index,
        })
        .collect())
}
