//! The keyring controller: account discovery, the account list and signing, all backed by one
//! hardware device.
//!
//! The controller owns its state exclusively. Every mutating operation takes `&mut self`, so two
//! of them can never run concurrently on the same instance; signing only reads state and takes
//! `&self`. A failed operation leaves the account list and metadata as they were.

use crate::{
    device::{
        ConnectSettings, DeviceErrorCode, EventBus, SigningDevice, TransportKind, UiEvent,
    },
    errors::{KeyringError, KeyringResult},
    hdpath,
    paging::{self, PageCursor, PageEntry, DEFAULT_PAGE_SIZE},
    passphrase::PassphraseStateCache,
    registry::{Account, AccountRegistry},
    signing::{self, KeyringTransaction, TypedDataVersion},
    snapshot::{AccountDetail, KeyringSnapshot},
};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub const KEYRING_TYPE: &str = "OneKey Hardware";

#[derive(Debug)]
pub struct KeyringController<D> {
    device: D,
    base_path: String,
    unlock_index: u32,
    registry: AccountRegistry,
    cursor: PageCursor,
    passphrase: PassphraseStateCache,
    events: EventBus,
}

impl<D: SigningDevice> KeyringController<D> {
    pub fn new(device: D) -> Self {
        Self::with_page_size(device, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(device: D, page_size: u32) -> Self {
        Self {
            device,
            base_path: hdpath::DEFAULT_BASE_PATH.to_owned(),
            unlock_index: 0,
            registry: AccountRegistry::new(),
            cursor: PageCursor::new(page_size),
            passphrase: PassphraseStateCache::new(),
            events: EventBus::new(),
        }
    }

    pub const fn device(&self) -> &D {
        &self.device
    }

    pub const fn name(&self) -> &'static str {
        KEYRING_TYPE
    }

    pub fn model(&self) -> Option<String> {
        self.device.model()
    }

    /// Keys never leave the device, so there is nothing to unlock locally.
    pub const fn is_unlocked(&self) -> bool {
        true
    }

    pub const fn unlock(&self) -> &'static str {
        "already unlocked"
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.events.subscribe()
    }

    /// Publishes blocking device conditions on the event bus before handing the error back.
    fn observe<T>(&self, result: KeyringResult<T>) -> KeyringResult<T> {
        if let Err(KeyringError::DeviceRejected {
            message,
            code: Some(code),
        }) = &result
        {
            let code = DeviceErrorCode::from(*code);
            if code.is_blocking() {
                warn!(?code, %message, "device blocked");
                self.events.publish(UiEvent::Blocked {
                    code,
                    message: message.clone(),
                });
            }
        }
        result
    }

    pub async fn init(&mut self, settings: &ConnectSettings) -> KeyringResult<()> {
        self.device.attach_ui_events(self.events.clone());
        let result = self.device.init(settings).await.map_err(KeyringError::from);
        self.observe(result)?;
        info!(model = ?self.device.model(), "device initialized");
        Ok(())
    }

    pub async fn destroy(&mut self) {
        self.device.detach_ui_events();
        self.device.destroy().await;
        self.device.dispose().await;
        debug!("device released");
    }

    pub async fn update_transport(&self, kind: TransportKind) -> KeyringResult<()> {
        let result = self
            .device
            .switch_transport(kind)
            .await
            .map_err(KeyringError::from);
        self.observe(result)
    }

    pub fn serialize(&self) -> KeyringSnapshot {
        KeyringSnapshot {
            base_path: self.base_path.clone(),
            accounts: self.registry.addresses().to_vec(),
            account_details: self
                .registry
                .details()
                .map(|a| (a.address.clone(), AccountDetail::from(a)))
                .collect(),
            page: self.cursor.page(),
        }
    }

    /// Replaces the persisted part of the state. The passphrase cache and unlock index are left
    /// alone.
    pub fn deserialize(&mut self, snapshot: KeyringSnapshot) -> KeyringResult<()> {
        let registry = AccountRegistry::restore(&snapshot.accounts, snapshot.account_records())?;
        self.registry = registry;
        self.base_path = snapshot.base_path;
        self.cursor.set(snapshot.page);
        debug!(accounts = self.registry.len(), page = snapshot.page, "keyring restored");
        Ok(())
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn set_base_path(&mut self, base_path: impl Into<String>) {
        self.base_path = base_path.into();
    }

    pub const fn unlock_index(&self) -> u32 {
        self.unlock_index
    }

    pub fn set_unlock_index(&mut self, index: u32) {
        self.unlock_index = index;
    }

    pub const fn page(&self) -> u32 {
        self.cursor.page()
    }

    pub fn accounts(&self) -> &[String] {
        self.registry.addresses()
    }

    pub fn account_details(&self, address: &str) -> KeyringResult<&Account> {
        self.registry.get(address)
    }

    pub fn enable_passphrase_support(&mut self) {
        self.passphrase.enable();
    }

    pub fn request_passphrase_reset(&mut self) {
        self.passphrase.invalidate();
    }

    async fn passphrase_state(&mut self) -> KeyringResult<Option<String>> {
        let resolved = self.passphrase.resolve(&self.device).await;
        self.observe(resolved)
    }

    /// Derives `count` accounts starting at the unlock index and returns the ones not held yet.
    pub async fn add_accounts(&mut self, count: u32) -> KeyringResult<Vec<String>> {
        let from = self.unlock_index;
        let to = from.checked_add(count).ok_or_else(|| {
            KeyringError::InvalidRange(format!("{count} accounts from index {from} overflow"))
        })?;
        let passphrase_state = self.passphrase_state().await?;
        let paths = hdpath::derive_range(&self.base_path, from, to);
        let derived =
            paging::derive_addresses(&self.device, &paths, passphrase_state.as_deref()).await;
        let addresses = self.observe(derived)?;

        let mut added = Vec::new();
        for ((index, derivation_path), address) in (from..to).zip(paths).zip(addresses) {
            let account = Account {
                address: address.clone(),
                index,
                derivation_path,
                passphrase_state: passphrase_state.clone(),
            };
            if self.registry.record(account) {
                added.push(address);
            }
        }
        self.cursor.set(1);
        info!(requested = count, added = added.len(), from, "accounts added");
        Ok(added)
    }

    pub fn remove_account(&mut self, address: &str) -> KeyringResult<()> {
        self.registry.remove(address)?;
        info!(%address, "account removed");
        Ok(())
    }

    /// Private keys stay on the device.
    pub fn export_account(&self, _address: &str) -> KeyringResult<String> {
        Err(KeyringError::UnsupportedOperation)
    }

    /// Drops every account and resets the cursor, unlock index and passphrase state.
    pub fn forget_device(&mut self) {
        self.registry.clear();
        self.cursor.set(0);
        self.unlock_index = 0;
        self.passphrase.clear();
        info!("device forgotten");
    }

    /// Loads the page `cursor` points at and commits the cursor only when the load succeeds.
    async fn load(&mut self, cursor: PageCursor) -> KeyringResult<Vec<PageEntry>> {
        let passphrase_state = self.passphrase_state().await?;
        let page =
            paging::load_page(&self.device, &self.base_path, &cursor, passphrase_state.as_deref())
                .await;
        let page = self.observe(page)?;
        self.cursor = cursor;
        Ok(page)
    }

    pub async fn first_page(&mut self) -> KeyringResult<Vec<PageEntry>> {
        self.load(self.cursor.at(1)).await
    }

    pub async fn next_page(&mut self) -> KeyringResult<Vec<PageEntry>> {
        let mut cursor = self.cursor;
        cursor.step(1);
        self.load(cursor).await
    }

    pub async fn previous_page(&mut self) -> KeyringResult<Vec<PageEntry>> {
        let mut cursor = self.cursor;
        cursor.step(-1);
        self.load(cursor).await
    }

    pub async fn sign_transaction(
        &self,
        address: &str,
        tx: KeyringTransaction,
    ) -> KeyringResult<KeyringTransaction> {
        let account = self.registry.get(address)?;
        let signed = signing::transaction::sign(&self.device, account, address, tx).await;
        self.observe(signed)
    }

    pub async fn sign_message(&self, address: &str, message: &str) -> KeyringResult<String> {
        self.sign_personal_message(address, message).await
    }

    pub async fn sign_personal_message(
        &self,
        address: &str,
        message: &str,
    ) -> KeyringResult<String> {
        let account = self.registry.get(address)?;
        let signed = signing::message::sign(&self.device, account, address, message).await;
        self.observe(signed)
    }

    pub async fn sign_typed_data(
        &self,
        address: &str,
        data: &Value,
        version: TypedDataVersion,
    ) -> KeyringResult<String> {
        let account = self.registry.get(address)?;
        let signed =
            signing::typed_data::sign(&self.device, account, address, data, version).await;
        self.observe(signed)
    }
}
