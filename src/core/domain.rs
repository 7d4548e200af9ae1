use crate::core::errors::WalletError;
use crate::security::vault::VaultBlob;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use tracing::warn;
use zeroize::Zeroize;

/// Network the wallet operates on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    pub fn is_mainnet(self) -> bool {
        matches!(self, Network::Mainnet)
    }

    pub fn to_bitcoin(self) -> bitcoin::Network {
        match self {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
            Network::Regtest => bitcoin::Network::Regtest,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        f.write_str(name)
    }
}

/// Chains whose keys hang off the same seed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Bitcoin,
    Stacks,
    Rootstock,
}

impl Chain {
    pub const ALL: [Chain; 3] = [Chain::Bitcoin, Chain::Stacks, Chain::Rootstock];
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Chain::Bitcoin => "bitcoin",
            Chain::Stacks => "stacks",
            Chain::Rootstock => "rootstock",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletType {
    #[default]
    Single,
    Multisig,
    Hot,
}

/// Public per-chain addresses derived once from the seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SovereignRoots {
    pub network: Network,
    pub bitcoin: String,
    pub stacks: String,
    pub rootstock: String,
}

impl SovereignRoots {
    pub fn address(&self, chain: Chain) -> &str {
        match chain {
            Chain::Bitcoin => &self.bitcoin,
            Chain::Stacks => &self.stacks,
            Chain::Rootstock => &self.rootstock,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quorum {
    pub required: u8,
    pub total: u8,
}

/// Non-secret wallet record. `mnemonic` and `passphrase` only appear when reading
/// state written before seed vaults existed; they are stripped on first unlock.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(rename = "type", default)]
    pub wallet_type: WalletType,
    #[serde(default)]
    pub roots: Option<SovereignRoots>,
    #[serde(default)]
    pub seed_vault: Option<VaultBlob>,
    #[serde(default)]
    pub quorum: Option<Quorum>,
    #[serde(default)]
    pub signers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mnemonic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

impl WalletConfig {
    pub fn has_plaintext_secret(&self) -> bool {
        self.mnemonic.is_some() || self.passphrase.is_some()
    }

    /// Zeroes and removes any plaintext mnemonic/passphrase. Returns whether anything was removed.
    pub fn strip_secrets(&mut self) -> bool {
        let mut stripped = false;
        for slot in [&mut self.mnemonic, &mut self.passphrase] {
            if let Some(mut secret) = slot.take() {
                secret.zeroize();
                stripped = true;
            }
        }
        stripped
    }
}

impl fmt::Debug for WalletConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletConfig")
            .field("wallet_type", &self.wallet_type)
            .field("roots", &self.roots)
            .field("has_seed_vault", &self.seed_vault.is_some())
            .field("quorum", &self.quorum)
            .field("signers", &self.signers.len())
            .field("plaintext_secret", &self.has_plaintext_secret())
            .finish()
    }
}

/// Lightning backend the UI may talk to. Closed set: unknown variants never deserialize.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LnBackendConfig {
    #[default]
    None,
    Lnd { endpoint: String, macaroon: String },
}

impl LnBackendConfig {
    pub fn lnd(endpoint: impl Into<String>, macaroon: impl Into<String>) -> Result<Self, WalletError> {
        let endpoint = endpoint.into();
        let macaroon = macaroon.into();
        if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
            return Err(WalletError::ValidationError(format!(
                "LND endpoint must be an http(s) URL: {}",
                endpoint
            )));
        }
        if macaroon.trim().is_empty() {
            return Err(WalletError::ValidationError("LND macaroon is empty".into()));
        }
        Ok(LnBackendConfig::Lnd { endpoint, macaroon })
    }

    /// Backends that cannot be used are persisted as `None`.
    pub fn sanitized(&self) -> LnBackendConfig {
        match self {
            LnBackendConfig::None => LnBackendConfig::None,
            LnBackendConfig::Lnd { endpoint, macaroon } => {
                Self::lnd(endpoint.clone(), macaroon.clone()).unwrap_or(LnBackendConfig::None)
            }
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            LnBackendConfig::None => None,
            LnBackendConfig::Lnd { endpoint, .. } => Some(endpoint),
        }
    }
}

impl fmt::Debug for LnBackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LnBackendConfig::None => f.write_str("None"),
            LnBackendConfig::Lnd { endpoint, .. } => {
                f.debug_struct("Lnd").field("endpoint", endpoint).finish_non_exhaustive()
            }
        }
    }
}

fn lenient_ln_backend<'de, D>(deserializer: D) -> Result<LnBackendConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    match serde_json::from_value::<LnBackendConfig>(raw) {
        Ok(config) => Ok(config),
        Err(e) => {
            warn!(error = %e, "unsupported lightning backend in stored state, falling back to none");
            Ok(LnBackendConfig::None)
        }
    }
}

/// User-facing security settings carried in the encrypted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecuritySettings {
    #[serde(default = "SecuritySettings::default_auto_lock_minutes")]
    pub auto_lock_minutes: u64,
    #[serde(default)]
    pub biometric_unlock: bool,
}

impl SecuritySettings {
    fn default_auto_lock_minutes() -> u64 { 5 }
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self { auto_lock_minutes: Self::default_auto_lock_minutes(), biometric_unlock: false }
    }
}

/// Everything the host application persists. `ui` is opaque presentation state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub wallet_config: Option<WalletConfig>,
    #[serde(default, deserialize_with = "lenient_ln_backend")]
    pub ln_backend: LnBackendConfig,
    #[serde(default)]
    pub security: SecuritySettings,
    #[serde(default)]
    pub privacy_mode: bool,
    #[serde(default)]
    pub ui: serde_json::Value,
}
