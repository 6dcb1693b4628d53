//! HD path policy: maps an account index to a concrete derivation path.
//!
//! Template selection is an exact string comparison against the configured base path. A base
//! path that differs from a known template in any way (trailing slash, case, spacing) is treated
//! as a custom path and gets `/{index}` appended verbatim.

/// Ledger Live: the index varies the hardened account level.
pub const LEDGER_LIVE_TEMPLATE: &str = "m/44'/60'/x'/0/0";
/// Ledger legacy (MEW/MyCrypto style).
pub const LEDGER_LEGACY_TEMPLATE: &str = "m/44'/60'/0'/x";
/// Standard BIP44 with an explicit `x` placeholder.
pub const BIP44_TEMPLATE: &str = "m/44'/60'/0'/0/x";
/// Standard BIP44 written as the parent path. Also the default base path.
pub const BIP44_BASE: &str = "m/44'/60'/0'/0";

pub const DEFAULT_BASE_PATH: &str = BIP44_BASE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPolicy {
    LedgerLive,
    LedgerLegacy,
    Bip44,
    Custom,
}

impl PathPolicy {
    pub fn for_base_path(base_path: &str) -> Self {
        if base_path == LEDGER_LIVE_TEMPLATE {
            Self::LedgerLive
        } else if base_path == LEDGER_LEGACY_TEMPLATE {
            Self::LedgerLegacy
        } else if base_path == BIP44_TEMPLATE || base_path == BIP44_BASE {
            Self::Bip44
        } else {
            Self::Custom
        }
    }
}

/// Derivation path for `index` under `base_path`.
pub fn derive(base_path: &str, index: u32) -> String {
    match PathPolicy::for_base_path(base_path) {
        PathPolicy::LedgerLive => format!("m/44'/60'/{index}'/0/0"),
        PathPolicy::LedgerLegacy => format!("m/44'/60'/0'/{index}"),
        PathPolicy::Bip44 => format!("m/44'/60'/0'/0/{index}"),
        PathPolicy::Custom => format!("{base_path}/{index}"),
    }
}

/// Paths for the half-open index range `[from, to)`.
pub fn derive_range(base_path: &str, from: u32, to: u32) -> Vec<String> {
    (from..to).map(|i| derive(base_path, i)).collect()
}
