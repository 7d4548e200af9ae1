//! PIN-sealed vault blobs.
//!
//! Current blobs (`version: 2`) use Argon2id + AES-256-GCM with fixed associated data.
//! Blobs without a `version` field are the legacy PBKDF2 format; they still open, and the
//! caller is expected to re-seal them with [`VaultCodec::encrypt`].

use crate::core::config::KdfConfig;
use crate::core::errors::WalletError;
use crate::crypto::kdf::{Argon2Params, PinKdf, KEY_LEN, SALT_LEN};
use crate::security::secret::SecretVec;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

pub const VAULT_VERSION: u8 = 2;
pub const PIN_MIN_LEN: usize = 4;
pub const PIN_MAX_LEN: usize = 8;

const NONCE_LEN: usize = 12;
const VAULT_AAD: &[u8] = b"sovereign-enclave/vault/v2";

/// Persisted vault: `{version, salt, nonce, ciphertext}` (base64 fields).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultBlob {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,
    pub salt: String,
    pub nonce: String,
    pub ciphertext: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf: Option<Argon2Params>,
}

impl VaultBlob {
    pub fn is_legacy(&self) -> bool {
        self.version.is_none()
    }

    pub fn to_json(&self) -> Result<String, WalletError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Unparseable blobs are indistinguishable from a wrong PIN.
    pub fn from_json(raw: &str) -> Result<Self, WalletError> {
        serde_json::from_str(raw).map_err(|_| WalletError::DecryptionError)
    }

    /// Stable short identifier, used as the native signer's vault reference.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.ciphertext.as_bytes());
        hex::encode(&digest[..8])
    }
}

impl fmt::Debug for VaultBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultBlob")
            .field("version", &self.version)
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// PINs are 4-8 ASCII digits.
pub fn validate_pin(pin: &str) -> Result<(), WalletError> {
    let len_ok = (PIN_MIN_LEN..=PIN_MAX_LEN).contains(&pin.len());
    if !len_ok || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WalletError::ValidationError(format!(
            "PIN must be {}-{} digits",
            PIN_MIN_LEN, PIN_MAX_LEN
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct VaultCodec {
    config: KdfConfig,
}

impl VaultCodec {
    pub fn new(config: KdfConfig) -> Self {
        Self { config }
    }

    pub fn encrypt(&self, plaintext: &[u8], pin: &str) -> Result<VaultBlob, WalletError> {
        validate_pin(pin)?;
        let params = Argon2Params::from_config(&self.config);
        let salt = PinKdf::generate_salt();
        let key = PinKdf::argon2id(params).derive_key(pin.as_bytes(), &salt)?;
        let (nonce, ciphertext) = seal(&key, plaintext, VAULT_AAD)?;

        Ok(VaultBlob {
            version: Some(VAULT_VERSION),
            salt: B64.encode(salt),
            nonce: B64.encode(nonce),
            ciphertext: B64.encode(ciphertext),
            kdf: Some(params),
        })
    }

    /// Produces the pre-v2 format. Only needed to exercise migration.
    pub fn encrypt_legacy(&self, plaintext: &[u8], pin: &str) -> Result<VaultBlob, WalletError> {
        validate_pin(pin)?;
        let salt = PinKdf::generate_salt();
        let key = PinKdf::legacy(&self.config).derive_key(pin.as_bytes(), &salt)?;
        let (nonce, ciphertext) = seal(&key, plaintext, &[])?;

        Ok(VaultBlob {
            version: None,
            salt: B64.encode(salt),
            nonce: B64.encode(nonce),
            ciphertext: B64.encode(ciphertext),
            kdf: None,
        })
    }

    pub fn decrypt(&self, blob: &VaultBlob, pin: &str) -> Result<SecretVec, WalletError> {
        validate_pin(pin)?;

        let (kdf, aad): (PinKdf, &[u8]) = match blob.version {
            None => (PinKdf::legacy(&self.config), &[]),
            Some(VAULT_VERSION) => {
                let params = blob.kdf.unwrap_or_else(|| Argon2Params::from_config(&self.config));
                (PinKdf::argon2id(params), VAULT_AAD)
            }
            Some(_) => return Err(WalletError::DecryptionError),
        };

        let salt = B64.decode(&blob.salt).map_err(|_| WalletError::DecryptionError)?;
        let nonce = B64.decode(&blob.nonce).map_err(|_| WalletError::DecryptionError)?;
        let ciphertext = B64.decode(&blob.ciphertext).map_err(|_| WalletError::DecryptionError)?;
        if salt.len() != SALT_LEN || nonce.len() != NONCE_LEN {
            return Err(WalletError::DecryptionError);
        }

        let key = kdf.derive_key(pin.as_bytes(), &salt).map_err(|_| WalletError::DecryptionError)?;
        open(&key, &nonce, &ciphertext, aad)
    }
}

fn seal(
    key: &Zeroizing<[u8; KEY_LEN]>,
    plaintext: &[u8],
    aad: &[u8],
) -> Result<([u8; NONCE_LEN], Vec<u8>), WalletError> {
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|_| WalletError::InternalError("Invalid key length".to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    #[allow(deprecated)]
    let nonce = aes_gcm::aead::Nonce::<Aes256Gcm>::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, Payload { msg: plaintext, aad })
        .map_err(|_| WalletError::InternalError("vault encryption failed".to_string()))?;
    Ok((nonce_bytes, ciphertext))
}

fn open(
    key: &Zeroizing<[u8; KEY_LEN]>,
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<SecretVec, WalletError> {
    let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|_| WalletError::DecryptionError)?;
    #[allow(deprecated)]
    let nonce = aes_gcm::aead::Nonce::<Aes256Gcm>::from_slice(nonce);

    let plaintext = cipher
        .decrypt(nonce, Payload { msg: ciphertext, aad })
        .map_err(|_| WalletError::DecryptionError)?;
    Ok(Zeroizing::new(plaintext))
}
