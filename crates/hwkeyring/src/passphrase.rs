use crate::{
    device::{is_empty_passphrase, SigningDevice},
    errors::KeyringResult,
};
use tracing::debug;

/// Process-local cache of the device's passphrase state token.
///
/// The token identifies which (hidden) wallet the device is currently unlocked into. Fetching it
/// may prompt the user on the device, so it is requested at most once until invalidated.
#[derive(Debug, Default, Clone)]
pub struct PassphraseStateCache {
    enabled: bool,
    needs_reset: bool,
    token: Option<String>,
}

impl PassphraseStateCache {
    pub const fn new() -> Self {
        Self {
            enabled: false,
            needs_reset: false,
            token: None,
        }
    }

    pub fn with_token(token: Option<String>) -> Self {
        Self {
            token,
            ..Self::new()
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Make the next [`resolve`](Self::resolve) go back to the device.
    pub fn invalidate(&mut self) {
        self.needs_reset = true;
    }

    pub fn cached(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn clear(&mut self) {
        self.token = None;
        self.needs_reset = false;
    }

    pub async fn resolve<D: SigningDevice>(&mut self, device: &D) -> KeyringResult<Option<String>> {
        if !self.enabled {
            return Ok(None);
        }
        if self.needs_reset {
            self.token = None;
            self.needs_reset = false;
        }
        if !is_empty_passphrase(self.token.as_deref()) {
            debug!("passphrase state cache hit");
            return Ok(self.token.clone());
        }

        debug!("passphrase state cache miss; asking device");
        let token = device.get_passphrase_state().await?;
        self.token.clone_from(&token);
        Ok(token)
    }
}
