//! Software stand-in for a platform secure element.

use super::{NativeSignRequest, NativeSignature, NativeSigner};
use crate::core::config::KdfConfig;
use crate::core::derivation::KeyDerivation;
use crate::core::errors::WalletError;
use crate::core::seed::Seed;
use crate::security::secret::SessionPin;
use crate::security::vault::{VaultBlob, VaultCodec};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct CachedSession {
    vault_id: String,
    seed: Seed,
    expires_at: Instant,
}

/// Holds the decrypted seed only in its own session cache, bounded by a TTL.
pub struct SoftwareSecureElement {
    codec: VaultCodec,
    session_ttl: Duration,
    session: Mutex<Option<CachedSession>>,
    deny: AtomicBool,
    latency: Mutex<Duration>,
    sign_calls: AtomicUsize,
    pin_sign_calls: AtomicUsize,
    sessions_cleared: AtomicUsize,
}

impl SoftwareSecureElement {
    pub fn new(kdf: KdfConfig, session_ttl: Duration) -> Self {
        Self {
            codec: VaultCodec::new(kdf),
            session_ttl,
            session: Mutex::new(None),
            deny: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            sign_calls: AtomicUsize::new(0),
            pin_sign_calls: AtomicUsize::new(0),
            sessions_cleared: AtomicUsize::new(0),
        }
    }

    /// Simulates the user rejecting every prompt.
    pub fn set_deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    /// Simulated per-call latency.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    /// Sign calls that carried an explicit PIN.
    pub fn pin_sign_calls(&self) -> usize {
        self.pin_sign_calls.load(Ordering::SeqCst)
    }

    pub fn sessions_cleared(&self) -> usize {
        self.sessions_cleared.load(Ordering::SeqCst)
    }

    pub fn has_session(&self) -> bool {
        matches!(&*self.session.lock(), Some(s) if Instant::now() < s.expires_at)
    }

    async fn open_vault(&self, vault: &VaultBlob, pin: &SessionPin) -> Result<Seed, WalletError> {
        let codec = self.codec.clone();
        let vault = vault.clone();
        let pin = pin.clone();
        let plaintext = tokio::task::spawn_blocking(move || codec.decrypt(&vault, pin.expose()))
            .await
            .map_err(|e| WalletError::InternalError(format!("vault task: {}", e)))??;
        Seed::from_bytes(&plaintext)
    }

    fn cache(&self, vault: &VaultBlob, seed: Seed) {
        *self.session.lock() = Some(CachedSession {
            vault_id: vault.fingerprint(),
            seed,
            expires_at: Instant::now() + self.session_ttl,
        });
    }

    fn sign_with_seed(seed: &Seed, request: &NativeSignRequest) -> Result<NativeSignature, WalletError> {
        let path = KeyDerivation::parse_path(&request.path)?;
        let chain = KeyDerivation::chain_for_path(&path)?;
        let key = KeyDerivation::derive_at_path(seed, chain, path)?;
        let (recovery_id, signature) = key.sign_digest(&request.message_hash)?.serialize_compact();
        Ok(NativeSignature {
            signature,
            recovery_id: recovery_id.to_i32() as u8,
            public_key: *key.public_key(),
        })
    }
}

#[async_trait]
impl NativeSigner for SoftwareSecureElement {
    async fn sign(&self, request: NativeSignRequest) -> Result<NativeSignature, WalletError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.deny.load(Ordering::SeqCst) {
            info!("native signing denied by user");
            return Err(WalletError::SigningDenied("user rejected the signing prompt".into()));
        }

        match &request.pin {
            Some(pin) => {
                self.pin_sign_calls.fetch_add(1, Ordering::SeqCst);
                let seed = self.open_vault(&request.vault, pin).await?;
                let signature = Self::sign_with_seed(&seed, &request)?;
                self.cache(&request.vault, seed);
                debug!(path = %request.path, "signed with explicit PIN");
                Ok(signature)
            }
            None => {
                let guard = self.session.lock();
                match &*guard {
                    Some(s) if Instant::now() < s.expires_at && s.vault_id == request.vault.fingerprint() => {
                        debug!(path = %request.path, "signed from session cache");
                        Self::sign_with_seed(&s.seed, &request)
                    }
                    _ => Err(WalletError::NativeCacheExpired("no cached session key".into())),
                }
            }
        }
    }

    async fn unlock_session(&self, vault: &VaultBlob, pin: &SessionPin) -> Result<(), WalletError> {
        let seed = self.open_vault(vault, pin).await?;
        self.cache(vault, seed);
        debug!(vault = %vault.fingerprint(), "native session opened");
        Ok(())
    }

    async fn clear_session(&self) -> Result<(), WalletError> {
        if self.session.lock().take().is_some() {
            debug!("native session cleared");
        } else {
            warn!("native session clear requested with no active session");
        }
        self.sessions_cleared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
