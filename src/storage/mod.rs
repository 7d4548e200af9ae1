//! Platform secure-storage capability
//!
//! Values are opaque strings (the enclave only ever stores vault JSON and the lock
//! policy record). Two software implementations ship with the crate:
//! [`MemorySecureStorage`] simulates a platform keystore including biometric gating,
//! [`FileSecureStorage`] is the software-only fallback used when no platform
//! capability exists.

use crate::core::errors::WalletError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessOptions {
    pub require_biometric: bool,
}

impl AccessOptions {
    pub fn biometric() -> Self {
        Self { require_biometric: true }
    }
}

#[async_trait]
pub trait SecureStorage: Send + Sync {
    async fn has(&self, key: &str) -> Result<bool, WalletError>;

    /// `Ok(None)` when the key is absent.
    async fn get(&self, key: &str, options: AccessOptions) -> Result<Option<String>, WalletError>;

    async fn set(&self, key: &str, value: &str, options: AccessOptions) -> Result<(), WalletError>;

    async fn remove(&self, key: &str) -> Result<(), WalletError>;

    /// Prompts the platform biometric. `Ok(false)` on user failure or cancel.
    async fn authenticate_biometric(&self) -> Result<bool, WalletError>;

    /// Drops any biometric session the platform holds.
    async fn clear_session(&self) -> Result<(), WalletError>;

    fn is_hardware_backed(&self) -> bool;

    fn biometric_available(&self) -> bool;
}

struct Entry {
    value: String,
    require_biometric: bool,
}

/// In-process keystore with a simulated biometric sensor.
pub struct MemorySecureStorage {
    entries: Mutex<HashMap<String, Entry>>,
    hardware_backed: bool,
    biometric_enrolled: bool,
    biometric_approves: AtomicBool,
    biometric_session: Mutex<Option<Instant>>,
    biometric_ttl: Duration,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
    reads: AtomicUsize,
}

impl Default for MemorySecureStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySecureStorage {
    /// Software-only, no biometric sensor.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            hardware_backed: false,
            biometric_enrolled: false,
            biometric_approves: AtomicBool::new(true),
            biometric_session: Mutex::new(None),
            biometric_ttl: Duration::from_secs(300),
            fail_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    /// Behaves like a hardware keystore with an enrolled biometric.
    pub fn with_biometrics(session_ttl: Duration) -> Self {
        Self { hardware_backed: true, biometric_enrolled: true, biometric_ttl: session_ttl, ..Self::new() }
    }

    /// Outcome of the next biometric prompts.
    pub fn set_biometric_outcome(&self, approve: bool) {
        self.biometric_approves.store(approve, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `set` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of `get` calls, hits or misses.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Raw stored value, bypassing biometric gating.
    pub fn peek(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).map(|e| e.value.clone())
    }

    fn biometric_session_valid(&self) -> bool {
        matches!(*self.biometric_session.lock(), Some(expiry) if Instant::now() < expiry)
    }
}

#[async_trait]
impl SecureStorage for MemorySecureStorage {
    async fn has(&self, key: &str) -> Result<bool, WalletError> {
        Ok(self.entries.lock().contains_key(key))
    }

    async fn get(&self, key: &str, options: AccessOptions) -> Result<Option<String>, WalletError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let entries = self.entries.lock();
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        if (options.require_biometric || entry.require_biometric) && !self.biometric_session_valid() {
            return Err(WalletError::NotAuthorized("biometric authentication required".into()));
        }
        Ok(Some(entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, options: AccessOptions) -> Result<(), WalletError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(WalletError::StorageError(format!("write to {} failed", key)));
        }
        let require_biometric = options.require_biometric && self.biometric_enrolled;
        self.entries.lock().insert(key.to_string(), Entry { value: value.to_string(), require_biometric });
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(key, len = value.len(), "stored value");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), WalletError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn authenticate_biometric(&self) -> Result<bool, WalletError> {
        if !self.biometric_enrolled {
            warn!("biometric requested but no sensor is enrolled");
            return Ok(false);
        }
        if !self.biometric_approves.load(Ordering::SeqCst) {
            info!("biometric authentication failed");
            return Ok(false);
        }
        *self.biometric_session.lock() = Some(Instant::now() + self.biometric_ttl);
        Ok(true)
    }

    async fn clear_session(&self) -> Result<(), WalletError> {
        *self.biometric_session.lock() = None;
        Ok(())
    }

    fn is_hardware_backed(&self) -> bool {
        self.hardware_backed
    }

    fn biometric_available(&self) -> bool {
        self.biometric_enrolled
    }
}

/// One file per key under a directory, written atomically (temp file + rename).
/// Biometric gating is unavailable; `require_biometric` is ignored.
pub struct FileSecureStorage {
    dir: PathBuf,
}

impl FileSecureStorage {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, WalletError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        info!(dir = %dir.display(), "opened file-backed secure storage");
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, WalletError> {
        let valid = !key.is_empty()
            && key.len() <= 128
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(WalletError::ValidationError(format!("invalid storage key {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl SecureStorage for FileSecureStorage {
    async fn has(&self, key: &str) -> Result<bool, WalletError> {
        Ok(tokio::fs::try_exists(self.path_for(key)?).await?)
    }

    async fn get(&self, key: &str, _options: AccessOptions) -> Result<Option<String>, WalletError> {
        match tokio::fs::read_to_string(self.path_for(key)?).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str, options: AccessOptions) -> Result<(), WalletError> {
        if options.require_biometric {
            debug!(key, "biometric gating unavailable, storing software-only");
        }
        let path = self.path_for(key)?;
        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, value.as_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), WalletError> {
        match tokio::fs::remove_file(self.path_for(key)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn authenticate_biometric(&self) -> Result<bool, WalletError> {
        Ok(false)
    }

    async fn clear_session(&self) -> Result<(), WalletError> {
        Ok(())
    }

    fn is_hardware_backed(&self) -> bool {
        false
    }

    fn biometric_available(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_round_trip() {
        let storage = MemorySecureStorage::new();
        assert!(!storage.has("k").await.unwrap());
        assert_eq!(storage.get("k", AccessOptions::default()).await.unwrap(), None);
        storage.set("k", "v", AccessOptions::default()).await.unwrap();
        assert_eq!(storage.get("k", AccessOptions::default()).await.unwrap().as_deref(), Some("v"));
        storage.remove("k").await.unwrap();
        assert!(!storage.has("k").await.unwrap());
        assert!(!storage.is_hardware_backed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_biometric_gate_and_session_expiry() {
        let storage = MemorySecureStorage::with_biometrics(Duration::from_secs(60));
        storage.set("seed", "blob", AccessOptions::biometric()).await.unwrap();

        assert!(matches!(
            storage.get("seed", AccessOptions::default()).await,
            Err(WalletError::NotAuthorized(_))
        ));

        storage.set_biometric_outcome(false);
        assert!(!storage.authenticate_biometric().await.unwrap());

        storage.set_biometric_outcome(true);
        assert!(storage.authenticate_biometric().await.unwrap());
        assert!(storage.get("seed", AccessOptions::default()).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(storage.get("seed", AccessOptions::default()).await.is_err());

        storage.authenticate_biometric().await.unwrap();
        storage.clear_session().await.unwrap();
        assert!(storage.get("seed", AccessOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_write_failures_are_storage_errors() {
        let storage = MemorySecureStorage::new();
        storage.set_fail_writes(true);
        assert!(matches!(
            storage.set("k", "v", AccessOptions::default()).await,
            Err(WalletError::StorageError(_))
        ));
        assert_eq!(storage.write_count(), 0);
    }

    #[tokio::test]
    async fn test_file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSecureStorage::open(dir.path().join("vault")).await.unwrap();
        storage.set("enclave_state", "{\"a\":1}", AccessOptions::biometric()).await.unwrap();
        assert!(storage.has("enclave_state").await.unwrap());
        assert_eq!(
            storage.get("enclave_state", AccessOptions::default()).await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        storage.set("enclave_state", "{\"a\":2}", AccessOptions::default()).await.unwrap();
        assert_eq!(
            storage.get("enclave_state", AccessOptions::default()).await.unwrap().as_deref(),
            Some("{\"a\":2}")
        );
        storage.remove("enclave_state").await.unwrap();
        storage.remove("enclave_state").await.unwrap();
        assert_eq!(storage.get("enclave_state", AccessOptions::default()).await.unwrap(), None);
        assert!(!storage.authenticate_biometric().await.unwrap());
    }

    #[tokio::test]
    async fn test_file_storage_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileSecureStorage::open(dir.path()).await.unwrap();
        for key in ["../escape", "", ".hidden", "a/b"] {
            assert!(matches!(storage.has(key).await, Err(WalletError::ValidationError(_))));
        }
    }
}
