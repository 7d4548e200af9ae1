//! PIN key derivation.
//!
//! Vault keys come from a 4-8 digit PIN, so the derivation has to be memory-hard:
//! current vaults use Argon2id, the legacy format used PBKDF2-HMAC-SHA256.

use crate::core::config::KdfConfig;
use crate::core::errors::WalletError;
use argon2::{Algorithm, Argon2, Params, Version};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const MIN_SALT_LEN: usize = 8;

// Upper bounds accepted from a stored vault, so a tampered blob cannot request absurd work.
const MAX_MEMORY_KIB: u32 = 1 << 20;
const MAX_ITERATIONS: u32 = 16;
const MAX_PARALLELISM: u32 = 8;

/// Argon2id cost recorded next to the ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argon2Params {
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Argon2Params {
    pub fn from_config(config: &KdfConfig) -> Self {
        Self { m_cost: config.memory_kib, t_cost: config.iterations, p_cost: config.parallelism }
    }

    fn within_bounds(&self) -> bool {
        self.m_cost <= MAX_MEMORY_KIB
            && (1..=MAX_ITERATIONS).contains(&self.t_cost)
            && (1..=MAX_PARALLELISM).contains(&self.p_cost)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfAlgorithm {
    Argon2id(Argon2Params),
    Pbkdf2 { iterations: u32 },
}

pub struct PinKdf {
    algorithm: KdfAlgorithm,
}

impl PinKdf {
    pub fn new(algorithm: KdfAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn argon2id(params: Argon2Params) -> Self {
        Self::new(KdfAlgorithm::Argon2id(params))
    }

    pub fn legacy(config: &KdfConfig) -> Self {
        Self::new(KdfAlgorithm::Pbkdf2 { iterations: config.legacy_pbkdf2_iterations })
    }

    pub fn algorithm(&self) -> KdfAlgorithm {
        self.algorithm
    }

    pub fn derive_key(&self, pin: &[u8], salt: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>, WalletError> {
        if salt.len() < MIN_SALT_LEN {
            return Err(WalletError::DerivationError(format!(
                "salt must be at least {} bytes",
                MIN_SALT_LEN
            )));
        }

        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        match self.algorithm {
            KdfAlgorithm::Argon2id(params) => {
                if !params.within_bounds() {
                    return Err(WalletError::DerivationError("argon2 parameters out of range".into()));
                }
                debug!(m_cost = params.m_cost, t_cost = params.t_cost, "deriving argon2id key");
                let argon_params =
                    Params::new(params.m_cost, params.t_cost, params.p_cost, Some(KEY_LEN))
                        .map_err(|e| WalletError::DerivationError(format!("argon2 params: {}", e)))?;
                Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params)
                    .hash_password_into(pin, salt, &mut key[..])
                    .map_err(|e| WalletError::DerivationError(format!("argon2: {}", e)))?;
            }
            KdfAlgorithm::Pbkdf2 { iterations } => {
                debug!(iterations, "deriving legacy pbkdf2 key");
                pbkdf2_hmac::<Sha256>(pin, salt, iterations, &mut key[..]);
            }
        }
        Ok(key)
    }

    pub fn generate_salt() -> [u8; SALT_LEN] {
        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        salt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> Argon2Params {
        Argon2Params { m_cost: 256, t_cost: 1, p_cost: 1 }
    }

    #[test]
    fn test_argon2id_is_deterministic_per_salt() {
        let kdf = PinKdf::argon2id(cheap());
        let a = kdf.derive_key(b"1234", b"saltsaltsalt").unwrap();
        let b = kdf.derive_key(b"1234", b"saltsaltsalt").unwrap();
        let c = kdf.derive_key(b"1234", b"othersaltsalt").unwrap();
        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
    }

    #[test]
    fn test_algorithms_disagree() {
        let config = KdfConfig { legacy_pbkdf2_iterations: 1000, ..KdfConfig::default() };
        let modern = PinKdf::argon2id(cheap()).derive_key(b"1234", b"saltsalt").unwrap();
        let legacy = PinKdf::legacy(&config).derive_key(b"1234", b"saltsalt").unwrap();
        assert_ne!(*modern, *legacy);
    }

    #[test]
    fn test_short_salt_rejected() {
        let err = PinKdf::argon2id(cheap()).derive_key(b"1234", b"short").unwrap_err();
        assert!(matches!(err, WalletError::DerivationError(_)));
    }

    #[test]
    fn test_out_of_range_params_rejected() {
        let params = Argon2Params { m_cost: u32::MAX, t_cost: 1, p_cost: 1 };
        assert!(PinKdf::argon2id(params).derive_key(b"1234", b"saltsalt").is_err());
    }
}
