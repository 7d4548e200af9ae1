// tests/common/mod.rs
// Shared fixtures for the integration suites

#![allow(dead_code)]

use sovereign_enclave::auth::{EnclaveAccessController, EnclaveDeps};
use sovereign_enclave::blockchain::bitcoin::utxo::Utxo;
use sovereign_enclave::core::config::{EnclaveConfig, KdfConfig};
use sovereign_enclave::events::EventBus;
use sovereign_enclave::hardware::{NativeSigner, SoftwareSecureElement};
use sovereign_enclave::signing::SigningDispatcher;
use sovereign_enclave::storage::MemorySecureStorage;
use std::sync::Arc;
use std::time::Duration;

pub const ABANDON: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
pub const ABANDON_BTC: &str = "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu";
pub const DEST: &str = "bc1qxy2kgdygjrsqtzq2n0yrf2493p83kkfjhx0wlh";
pub const PIN: &str = "1234";

/// Argon2 at the library minimum so tests stay fast.
pub fn cheap_kdf() -> KdfConfig {
    KdfConfig { memory_kib: 256, iterations: 1, parallelism: 1, legacy_pbkdf2_iterations: 1000 }
}

pub fn test_config() -> EnclaveConfig {
    let mut config = EnclaveConfig::default();
    config.kdf = cheap_kdf();
    config.security.pin_attempt_delay_ms = 10;
    config.security.max_pin_attempts = 3;
    config.security.lockout_secs = 60;
    config.security.auto_lock_minutes = 5;
    config.persistence.debounce_ms = 50;
    config.persistence.max_delay_ms = 200;
    config.native.timeout_ms = 5_000;
    config
}

pub fn utxos(n: usize, amount: u64) -> Vec<Utxo> {
    (0..n).map(|i| Utxo::new(format!("{:064x}", i + 1), i as u32, amount, ABANDON_BTC)).collect()
}

pub struct Harness {
    pub config: EnclaveConfig,
    pub storage: Arc<MemorySecureStorage>,
    pub element: Option<Arc<SoftwareSecureElement>>,
    pub events: EventBus,
    pub controller: Arc<EnclaveAccessController>,
    pub dispatcher: SigningDispatcher,
}

impl Harness {
    /// Web-only signing.
    pub async fn web(storage: Arc<MemorySecureStorage>) -> Self {
        Self::open(test_config(), storage, None).await
    }

    /// Native signing through a software secure element.
    pub async fn native(storage: Arc<MemorySecureStorage>) -> Self {
        let config = test_config();
        let element = Arc::new(SoftwareSecureElement::new(config.kdf.clone(), Duration::from_secs(600)));
        Self::open(config, storage, Some(element)).await
    }

    pub async fn open(
        config: EnclaveConfig,
        storage: Arc<MemorySecureStorage>,
        element: Option<Arc<SoftwareSecureElement>>,
    ) -> Self {
        let native = element.clone().map(|e| e as Arc<dyn NativeSigner>);
        let events = EventBus::default();
        let controller = EnclaveAccessController::open(EnclaveDeps {
            config: config.clone(),
            storage: storage.clone(),
            native: native.clone(),
            events: events.clone(),
        })
        .await
        .expect("open controller");
        let dispatcher = SigningDispatcher::new(controller.clone(), native, &config);
        Self { config, storage, element, events, controller, dispatcher }
    }

    /// Fresh storage, onboarded with the abandon mnemonic and `PIN`.
    pub async fn onboarded_web() -> Self {
        let h = Self::web(Arc::new(MemorySecureStorage::new())).await;
        h.controller
            .create_vault(ABANDON, "", PIN, sovereign_enclave::core::domain::Network::Mainnet)
            .await
            .expect("create vault");
        h
    }

    pub async fn onboarded_native() -> Self {
        let h = Self::native(Arc::new(MemorySecureStorage::new())).await;
        h.controller
            .create_vault(ABANDON, "", PIN, sovereign_enclave::core::domain::Network::Mainnet)
            .await
            .expect("create vault");
        h
    }
}
