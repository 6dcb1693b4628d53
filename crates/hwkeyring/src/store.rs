use crate::{config::KeyringConfig, paths::KeyringPaths, snapshot::KeyringSnapshot};
use eyre::Context as _;
use std::{fs, path::PathBuf};
use tracing::debug;

fn is_truthy_env(v: &str) -> bool {
    matches!(v, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

fn apply_env_overrides(cfg: &mut KeyringConfig) {
    /// If an env var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("HWKEYRING_BASE_PATH", |v| {
        v.clone_into(&mut cfg.base_path);
    });
    apply_env("HWKEYRING_CHAIN_ID", |v| {
        if let Ok(n) = v.parse::<u64>() {
            cfg.chain_id = n;
        }
    });
    apply_env("HWKEYRING_PASSPHRASE", |v| {
        cfg.passphrase_enabled = is_truthy_env(v);
    });
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(paths: &KeyringPaths) -> Self {
        Self {
            path: paths.config_file(),
        }
    }

    /// Environment overrides apply to the returned value but are never written back.
    pub fn load_or_init_default(&self) -> eyre::Result<KeyringConfig> {
        let mut cfg = if self.path.exists() {
            let s = fs::read_to_string(&self.path).context("read config.toml")?;
            toml::from_str(&s).context("parse config.toml")?
        } else {
            let cfg = KeyringConfig::default();
            self.save(&cfg)?;
            cfg
        };
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &KeyringConfig) -> eyre::Result<()> {
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        crate::fsutil::write_atomic_private(&self.path, s.as_bytes()).context("write config.toml")
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(paths: &KeyringPaths) -> Self {
        Self {
            path: paths.snapshot_file(),
        }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> eyre::Result<KeyringSnapshot> {
        if !self.exists() {
            debug!(path = %self.path.display(), "no snapshot yet");
            return Ok(KeyringSnapshot::default());
        }
        let s = fs::read_to_string(&self.path).context("read keyring.json")?;
        serde_json::from_str(&s).context("parse keyring.json")
    }

    pub fn save(&self, snapshot: &KeyringSnapshot) -> eyre::Result<()> {
        let s = serde_json::to_string_pretty(snapshot).context("serialize keyring.json")?;
        crate::fsutil::write_atomic_private(&self.path, s.as_bytes()).context("write keyring.json")
    }
}
