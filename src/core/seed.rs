//! Mnemonic handling (BIP-39) and seed bytes.

use crate::core::errors::WalletError;
use bip39::{Language, Mnemonic};
use rand::{CryptoRng, RngCore};
use std::fmt;
use tracing::debug;
use zeroize::{Zeroize, Zeroizing};

pub const SUPPORTED_WORD_COUNTS: [usize; 5] = [12, 15, 18, 21, 24];

/// BIP-32 accepts 128..=512 bit seeds.
const MIN_SEED_LEN: usize = 16;
const MAX_SEED_LEN: usize = 64;

/// Root key material. Zeroized on drop and never printed.
pub struct Seed(Zeroizing<Vec<u8>>);

impl Seed {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WalletError> {
        if !(MIN_SEED_LEN..=MAX_SEED_LEN).contains(&bytes.len()) {
            return Err(WalletError::DerivationError(format!(
                "seed must be {}-{} bytes, got {}",
                MIN_SEED_LEN,
                MAX_SEED_LEN,
                bytes.len()
            )));
        }
        Ok(Seed(Zeroizing::new(bytes.to_vec())))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed({} bytes)", self.0.len())
    }
}

pub struct SeedCodec;

impl SeedCodec {
    /// Fresh mnemonic from the OS CSPRNG.
    pub fn generate(word_count: usize) -> Result<Mnemonic, WalletError> {
        Self::generate_with(&mut rand::rngs::OsRng, word_count)
    }

    /// Fresh mnemonic from an injected CSPRNG.
    pub fn generate_with<R>(rng: &mut R, word_count: usize) -> Result<Mnemonic, WalletError>
    where
        R: RngCore + CryptoRng,
    {
        if !SUPPORTED_WORD_COUNTS.contains(&word_count) {
            return Err(WalletError::ValidationError(format!(
                "unsupported word count {}",
                word_count
            )));
        }
        let mut entropy = Zeroizing::new(vec![0u8; word_count / 3 * 4]);
        rng.fill_bytes(&mut entropy);
        let mnemonic = Mnemonic::from_entropy_in(Language::English, &entropy)
            .map_err(|e| WalletError::InternalError(format!("mnemonic from entropy: {}", e)))?;
        debug!(word_count, "generated mnemonic");
        Ok(mnemonic)
    }

    /// Wordlist + checksum validation. Whitespace and case are normalised first.
    pub fn parse(phrase: &str) -> Result<Mnemonic, WalletError> {
        let normalized = Zeroizing::new(
            phrase.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" "),
        );
        Mnemonic::parse_in(Language::English, normalized.as_str())
            .map_err(|e| WalletError::ValidationError(format!("invalid mnemonic: {}", e)))
    }

    pub fn validate(phrase: &str) -> bool {
        Self::parse(phrase).is_ok()
    }

    pub fn to_seed(mnemonic: &Mnemonic, passphrase: &str) -> Seed {
        let mut raw = mnemonic.to_seed(passphrase);
        let seed = Seed(Zeroizing::new(raw.to_vec()));
        raw.zeroize();
        seed
    }

    pub fn phrase_to_seed(phrase: &str, passphrase: &str) -> Result<Seed, WalletError> {
        let mnemonic = Self::parse(phrase)?;
        Ok(Self::to_seed(&mnemonic, passphrase))
    }
}
