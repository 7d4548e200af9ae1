//! BIP32 per-chain key derivation
//!
//! One seed, one canonical path per chain:
//! - Bitcoin native segwit: m/84'/0'/0'/0/0 (coin type 1' off mainnet)
//! - Stacks: m/44'/5757'/0'/0/0
//! - Rootstock / EVM: m/44'/60'/0'/0/0
//!
//! Changing any of these paths moves every user's funds to different addresses, so
//! roots are derived once and cached in the wallet configuration.

use crate::blockchain::bitcoin::address::BitcoinAddress;
use crate::blockchain::{rootstock, stacks};
use crate::core::domain::{Chain, Network, SovereignRoots};
use crate::core::errors::WalletError;
use crate::core::seed::Seed;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv};
use bitcoin::secp256k1::ecdsa::RecoverableSignature;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use zeroize::Zeroizing;

/// Canonical derivation paths
pub mod paths {
    pub const BITCOIN: &str = "m/84'/0'/0'/0/0";
    pub const BITCOIN_TESTNET: &str = "m/84'/1'/0'/0/0";
    pub const STACKS: &str = "m/44'/5757'/0'/0/0";
    pub const ROOTSTOCK: &str = "m/44'/60'/0'/0/0";
}

/// A derived signing key. The secret never leaves this struct except as a
/// short-lived `SecretKey` that is erased right after signing.
pub struct KeyMaterial {
    chain: Chain,
    path: DerivationPath,
    secret: Zeroizing<[u8; 32]>,
    public_key: PublicKey,
}

impl KeyMaterial {
    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn path(&self) -> &DerivationPath {
        &self.path
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn address(&self, network: Network) -> Result<String, WalletError> {
        KeyDerivation::address_for(self.chain, &self.public_key, network)
    }

    /// RFC6979 deterministic, low-S recoverable signature over a 32-byte digest.
    pub fn sign_digest(&self, digest: &[u8; 32]) -> Result<RecoverableSignature, WalletError> {
        let secp = Secp256k1::signing_only();
        let mut secret_key = SecretKey::from_slice(&self.secret[..])
            .map_err(|e| WalletError::DerivationError(format!("invalid derived key: {}", e)))?;
        let message = Message::from_digest(*digest);
        let signature = secp.sign_ecdsa_recoverable(&message, &secret_key);
        secret_key.non_secure_erase();
        Ok(signature)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("chain", &self.chain)
            .field("path", &self.path.to_string())
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

pub struct KeyDerivation;

impl KeyDerivation {
    pub fn path_str(chain: Chain, network: Network) -> &'static str {
        match (chain, network) {
            (Chain::Bitcoin, Network::Mainnet) => paths::BITCOIN,
            (Chain::Bitcoin, _) => paths::BITCOIN_TESTNET,
            (Chain::Stacks, _) => paths::STACKS,
            (Chain::Rootstock, _) => paths::ROOTSTOCK,
        }
    }

    pub fn path_for(chain: Chain, network: Network) -> Result<DerivationPath, WalletError> {
        Self::parse_path(Self::path_str(chain, network))
    }

    pub fn parse_path(path: &str) -> Result<DerivationPath, WalletError> {
        DerivationPath::from_str(path)
            .map_err(|e| WalletError::DerivationError(format!("invalid path {}: {}", path, e)))
    }

    /// Derives one address per chain on mainnet.
    pub fn derive_roots(seed: &Seed) -> Result<SovereignRoots, WalletError> {
        Self::derive_roots_for(seed, Network::Mainnet)
    }

    pub fn derive_roots_for(seed: &Seed, network: Network) -> Result<SovereignRoots, WalletError> {
        let bitcoin = Self::derive_chain_key(seed, Chain::Bitcoin, network)?.address(network)?;
        let stacks = Self::derive_chain_key(seed, Chain::Stacks, network)?.address(network)?;
        let rootstock = Self::derive_chain_key(seed, Chain::Rootstock, network)?.address(network)?;
        Ok(SovereignRoots { network, bitcoin, stacks, rootstock })
    }

    pub fn derive_chain_key(
        seed: &Seed,
        chain: Chain,
        network: Network,
    ) -> Result<KeyMaterial, WalletError> {
        let path = Self::path_for(chain, network)?;
        Self::derive_at_path(seed, chain, path)
    }

    /// Intermediate extended keys are erased on every return path.
    pub fn derive_at_path(
        seed: &Seed,
        chain: Chain,
        path: DerivationPath,
    ) -> Result<KeyMaterial, WalletError> {
        let secp = Secp256k1::new();
        let mut master = Xpriv::new_master(bitcoin::Network::Bitcoin, seed.as_bytes())
            .map_err(|e| WalletError::DerivationError(format!("master key: {}", e)))?;
        let derived = master.derive_priv(&secp, &path);
        master.private_key.non_secure_erase();

        let mut child = derived
            .map_err(|e| WalletError::DerivationError(format!("derive {}: {}", path, e)))?;
        let secret = Zeroizing::new(child.private_key.secret_bytes());
        let public_key = child.private_key.public_key(&secp);
        child.private_key.non_secure_erase();

        debug!(%chain, path = %path, "derived chain key");
        Ok(KeyMaterial { chain, path, secret, public_key })
    }

    /// Chain owning a BIP44-style path, from its coin type.
    pub fn chain_for_path(path: &DerivationPath) -> Result<Chain, WalletError> {
        let coin_type = path
            .into_iter()
            .nth(1)
            .ok_or_else(|| WalletError::DerivationError(format!("path {} has no coin type", path)))?;
        match coin_type {
            ChildNumber::Hardened { index: 0 | 1 } => Ok(Chain::Bitcoin),
            ChildNumber::Hardened { index: 5757 } => Ok(Chain::Stacks),
            ChildNumber::Hardened { index: 60 } => Ok(Chain::Rootstock),
            other => Err(WalletError::DerivationError(format!("unsupported coin type {}", other))),
        }
    }

    pub fn address_for(chain: Chain, public_key: &PublicKey, network: Network) -> Result<String, WalletError> {
        match chain {
            Chain::Bitcoin => BitcoinAddress::p2wpkh(public_key, network),
            Chain::Stacks => Ok(stacks::address_from_public_key(public_key, network)),
            Chain::Rootstock => Ok(rootstock::address_from_public_key(public_key)),
        }
    }
}
