//! Enclave access controller
//!
//! Owns the lock/unlock state machine:
//!
//! ```text
//! NoVault --create_vault--> Unlocked
//! Locked --begin_unlock--> BiometricPending --authenticate_biometric--> PinEntry
//! Locked --begin_unlock--> PinEntry (biometric not required)
//! PinEntry --unlock--> Unlocking --> Unlocked
//! Unlocked --lock / auto-lock / background--> Locked
//! ```
//!
//! A duress PIN unlocks into a default, empty state that is never persisted. The
//! caller sees exactly the same result and events as a normal unlock.

use crate::auth::lockout::{LockoutConfig, PinAttemptTracker};
use crate::auth::session::EnclaveSession;
use crate::core::config::EnclaveConfig;
use crate::core::derivation::KeyDerivation;
use crate::core::domain::{AppState, Network, SecuritySettings, SovereignRoots, WalletConfig};
use crate::core::errors::WalletError;
use crate::core::seed::SeedCodec;
use crate::crypto::kdf::{Argon2Params, PinKdf, KEY_LEN};
use crate::events::{EnclaveEvent, EventBus, LockReason};
use crate::hardware::NativeSigner;
use crate::persistence::StatePersistence;
use crate::security::secret::SessionPin;
use crate::security::vault::{validate_pin, VaultBlob, VaultCodec};
use crate::storage::{AccessOptions, SecureStorage};
use crate::tools::async_support::{AsyncExecutor, TimeoutConfig};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use parking_lot::Mutex;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Weak};
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const POLICY_VERSION: u8 = 1;
const NO_VAULT: &str = "no vault, onboarding required";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnclavePhase {
    NoVault,
    Locked,
    BiometricPending,
    PinEntry,
    Unlocking,
    Unlocked,
}

/// Argon2id digest of the duress PIN. When no duress PIN is set a random decoy is
/// stored instead, so the record always has the same shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DuressVerifier {
    salt: String,
    digest: String,
    kdf: Argon2Params,
}

impl DuressVerifier {
    fn derive(pin: &str, kdf: Argon2Params) -> Result<Self, WalletError> {
        let salt = PinKdf::generate_salt();
        let digest = PinKdf::argon2id(kdf).derive_key(pin.as_bytes(), &salt)?;
        Ok(Self { salt: B64.encode(salt), digest: B64.encode(&digest[..]), kdf })
    }

    fn decoy(kdf: Argon2Params) -> Self {
        let salt = PinKdf::generate_salt();
        let mut digest = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut digest);
        Self { salt: B64.encode(salt), digest: B64.encode(digest), kdf }
    }

    /// Always runs the full KDF.
    fn matches(&self, pin: &str) -> bool {
        let (Ok(salt), Ok(expected)) = (B64.decode(&self.salt), B64.decode(&self.digest)) else {
            return false;
        };
        match PinKdf::argon2id(self.kdf).derive_key(pin.as_bytes(), &salt) {
            Ok(candidate) => bool::from(candidate[..].ct_eq(&expected[..])),
            Err(_) => false,
        }
    }
}

/// Non-secret lock policy, readable before unlock.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockPolicy {
    version: u8,
    biometric_required: bool,
    duress: DuressVerifier,
}

impl LockPolicy {
    fn fresh(kdf: Argon2Params) -> Self {
        Self { version: POLICY_VERSION, biometric_required: false, duress: DuressVerifier::decoy(kdf) }
    }
}

/// What the signing dispatcher needs from an unlocked session.
#[derive(Debug, Clone)]
pub struct SigningContext {
    pub network: Network,
    pub seed_vault: Option<VaultBlob>,
    pub pin: Option<SessionPin>,
}

struct ControllerState {
    phase: EnclavePhase,
    vault_exists: bool,
    policy: LockPolicy,
    tracker: PinAttemptTracker,
    biometric_ok: bool,
    session: Option<EnclaveSession>,
    app_state: Option<AppState>,
    watchdog: Option<CancellationToken>,
    /// Bumped by every lock so an unlock racing a lock cannot resurrect the session.
    epoch: u64,
    /// Set by a reset from a decoy session. The real vault stays in storage but the
    /// controller presents `NoVault` until the real PIN opens it again.
    concealed: bool,
}

impl ControllerState {
    fn resting_phase(&self) -> EnclavePhase {
        if self.vault_exists && !self.concealed {
            EnclavePhase::Locked
        } else {
            EnclavePhase::NoVault
        }
    }
}

/// Puts an abandoned unlock back to rest. Commit and the explicit error paths move the
/// phase on first, so this only acts while the phase is still `Unlocking`.
struct UnlockAttempt<'a> {
    state: &'a Mutex<ControllerState>,
}

impl Drop for UnlockAttempt<'_> {
    fn drop(&mut self) {
        let mut st = self.state.lock();
        if st.phase == EnclavePhase::Unlocking {
            st.phase = st.resting_phase();
            st.biometric_ok = false;
            debug!("unlock attempt abandoned");
        }
    }
}

/// Collaborators injected at construction.
pub struct EnclaveDeps {
    pub config: EnclaveConfig,
    pub storage: Arc<dyn SecureStorage>,
    pub native: Option<Arc<dyn NativeSigner>>,
    pub events: EventBus,
}

pub struct EnclaveAccessController {
    this: Weak<EnclaveAccessController>,
    config: EnclaveConfig,
    codec: VaultCodec,
    storage: Arc<dyn SecureStorage>,
    native: Option<Arc<dyn NativeSigner>>,
    events: EventBus,
    persistence: StatePersistence,
    state: Mutex<ControllerState>,
    unlock_gate: tokio::sync::Mutex<()>,
}

impl EnclaveAccessController {
    /// Reads the lock policy and starts in `Locked` if a vault exists, else `NoVault`.
    pub async fn open(deps: EnclaveDeps) -> Result<Arc<Self>, WalletError> {
        deps.config.validate()?;
        let codec = VaultCodec::new(deps.config.kdf.clone());
        let persistence = StatePersistence::start(
            deps.storage.clone(),
            codec.clone(),
            deps.config.persistence.clone(),
            deps.events.clone(),
        );

        let vault_exists = persistence.has_state().await?;
        let kdf = Argon2Params::from_config(&deps.config.kdf);
        let policy = match deps.storage.get(&deps.config.persistence.policy_key, AccessOptions::default()).await? {
            Some(raw) => serde_json::from_str::<LockPolicy>(&raw)?,
            None => LockPolicy::fresh(kdf),
        };
        let phase = if vault_exists { EnclavePhase::Locked } else { EnclavePhase::NoVault };
        info!(?phase, hardware_backed = deps.storage.is_hardware_backed(), native = deps.native.is_some(), "enclave opened");

        let tracker = PinAttemptTracker::new(LockoutConfig::from_security(&deps.config.security));
        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config: deps.config,
            codec,
            storage: deps.storage,
            native: deps.native,
            events: deps.events,
            persistence,
            state: Mutex::new(ControllerState {
                phase,
                vault_exists,
                policy,
                tracker,
                biometric_ok: false,
                session: None,
                app_state: None,
                watchdog: None,
                epoch: 0,
                concealed: false,
            }),
            unlock_gate: tokio::sync::Mutex::new(()),
        }))
    }

    pub fn phase(&self) -> EnclavePhase {
        self.state.lock().phase
    }

    pub fn is_unlocked(&self) -> bool {
        self.phase() == EnclavePhase::Unlocked
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn biometric_required(&self) -> bool {
        self.state.lock().policy.biometric_required
    }

    /// Onboarding: seals the seed, derives and caches the roots, persists the first
    /// state and leaves the enclave unlocked.
    pub async fn create_vault(
        &self,
        mnemonic: &str,
        passphrase: &str,
        pin: &str,
        network: Network,
    ) -> Result<SovereignRoots, WalletError> {
        let _gate = self.unlock_gate.lock().await;
        let concealed = {
            let st = self.state.lock();
            if st.phase != EnclavePhase::NoVault {
                return Err(WalletError::ValidationError("a vault already exists".into()));
            }
            st.concealed
        };
        validate_pin(pin)?;
        let seed = SeedCodec::phrase_to_seed(mnemonic, passphrase)?;
        let roots = KeyDerivation::derive_roots_for(&seed, network)?;

        let pin = SessionPin::new(pin);
        let seed_bytes = zeroize::Zeroizing::new(seed.as_bytes().to_vec());
        drop(seed);
        let seed_vault = self.seal(seed_bytes, pin.clone()).await?;

        let state = AppState {
            network,
            wallet_config: Some(WalletConfig {
                roots: Some(roots.clone()),
                seed_vault: Some(seed_vault.clone()),
                ..Default::default()
            }),
            security: SecuritySettings {
                auto_lock_minutes: self.config.security.auto_lock_minutes,
                biometric_unlock: false,
            },
            ..Default::default()
        };

        if concealed {
            // onboarding over a concealed vault is a decoy session: memory only
            let epoch = self.state.lock().epoch;
            self.commit_unlock(epoch, state, None, false)?;
        } else {
            let policy = LockPolicy::fresh(Argon2Params::from_config(&self.config.kdf));
            self.write_policy(&policy).await?;
            self.persistence.persist_now(state.clone(), pin.clone()).await?;

            let epoch = {
                let mut st = self.state.lock();
                st.policy = policy;
                st.vault_exists = true;
                st.epoch
            };
            self.open_native_session(&seed_vault, &pin).await;
            self.commit_unlock(epoch, state, Some(pin), false)?;
        }

        info!(fingerprint = %seed_vault.fingerprint(), %network, "vault created");
        self.events.publish(EnclaveEvent::VaultCreated { fingerprint: seed_vault.fingerprint() });
        Ok(roots)
    }

    /// Starts an unlock prompt: biometric first when required, otherwise PIN entry.
    pub fn begin_unlock(&self) -> Result<EnclavePhase, WalletError> {
        let mut st = self.state.lock();
        match st.phase {
            EnclavePhase::NoVault => Err(WalletError::NotAuthorized(NO_VAULT.into())),
            EnclavePhase::Locked | EnclavePhase::BiometricPending | EnclavePhase::PinEntry => {
                st.phase = if st.policy.biometric_required && !st.biometric_ok {
                    EnclavePhase::BiometricPending
                } else {
                    EnclavePhase::PinEntry
                };
                Ok(st.phase)
            }
            phase => Ok(phase),
        }
    }

    /// A failed or cancelled biometric returns `Ok(false)` and does not count as a PIN attempt.
    pub async fn authenticate_biometric(&self) -> Result<bool, WalletError> {
        if self.phase() != EnclavePhase::BiometricPending {
            return Err(WalletError::ValidationError("no biometric prompt is pending".into()));
        }
        let approved = self.storage.authenticate_biometric().await?;
        let mut st = self.state.lock();
        if st.phase != EnclavePhase::BiometricPending {
            return Ok(false);
        }
        if approved {
            st.biometric_ok = true;
            st.phase = EnclavePhase::PinEntry;
        }
        debug!(approved, "biometric gate");
        Ok(approved)
    }

    /// Abandons a pending prompt without side effects. An unlock still in flight is
    /// discarded when it tries to commit.
    pub fn cancel_prompt(&self) -> EnclavePhase {
        let mut st = self.state.lock();
        let phase = st.phase;
        match phase {
            EnclavePhase::BiometricPending | EnclavePhase::PinEntry => {}
            EnclavePhase::Unlocking => st.epoch = st.epoch.wrapping_add(1),
            _ => return phase,
        }
        st.phase = st.resting_phase();
        st.biometric_ok = false;
        st.phase
    }

    /// Concurrent calls serialize; a caller that finds the enclave already unlocked
    /// returns immediately.
    pub async fn unlock(&self, pin: &str) -> Result<(), WalletError> {
        let _gate = self.unlock_gate.lock().await;

        let (epoch, duress, delay, biometric_ok) = {
            let mut st = self.state.lock();
            match st.phase {
                EnclavePhase::Unlocked => return Ok(()),
                EnclavePhase::NoVault if !st.concealed => return Err(WalletError::NotAuthorized(NO_VAULT.into())),
                _ => {}
            }
            if st.policy.biometric_required && !st.biometric_ok {
                if st.concealed {
                    return Err(WalletError::NotAuthorized(NO_VAULT.into()));
                }
                st.phase = EnclavePhase::BiometricPending;
                return Err(WalletError::NotAuthorized("biometric authentication required".into()));
            }
            validate_pin(pin)?;
            st.tracker.check()?;
            st.phase = EnclavePhase::Unlocking;
            (st.epoch, st.policy.duress.clone(), st.tracker.attempt_delay(), st.biometric_ok)
        };
        let _attempt = UnlockAttempt { state: &self.state };

        tokio::time::sleep(delay).await;
        let pin = SessionPin::new(pin);

        let is_duress = {
            let pin = pin.clone();
            tokio::task::spawn_blocking(move || duress.matches(pin.expose()))
                .await
                .map_err(|e| WalletError::InternalError(format!("duress check: {}", e)))?
        };
        if is_duress {
            self.spend_unlock_cost(&pin).await;
            self.state.lock().tracker.record_success();
            return self.commit_unlock(epoch, AppState::default(), None, biometric_ok);
        }

        let options = AccessOptions { require_biometric: self.biometric_required() };
        let loaded = match self.persistence.load(&pin, options).await {
            Ok(Some(loaded)) => loaded,
            Ok(None) => {
                let mut st = self.state.lock();
                st.vault_exists = false;
                st.concealed = false;
                st.phase = EnclavePhase::NoVault;
                return Err(WalletError::NotAuthorized(NO_VAULT.into()));
            }
            Err(WalletError::DecryptionError) => return Err(self.record_wrong_pin()),
            Err(e) => {
                let mut st = self.state.lock();
                st.phase = st.resting_phase();
                return Err(e);
            }
        };

        let mut state = loaded.state;
        let migrated = match self.migrate_wallet_secrets(&mut state, &pin).await {
            Ok(migrated) => migrated,
            Err(e) => {
                let mut st = self.state.lock();
                st.phase = st.resting_phase();
                return Err(e);
            }
        };
        self.state.lock().tracker.record_success();

        if loaded.legacy || migrated {
            match self.persistence.persist_now(state.clone(), pin.clone()).await {
                Ok(fingerprint) => {
                    info!(legacy = loaded.legacy, migrated, "vault re-sealed in current format");
                    self.events.publish(EnclaveEvent::VaultUpgraded { fingerprint });
                }
                Err(e) => warn!(error = %e, "vault upgrade write failed, will retry on next change"),
            }
        }

        if let Some(seed_vault) = state.wallet_config.as_ref().and_then(|c| c.seed_vault.clone()) {
            self.open_native_session(&seed_vault, &pin).await;
        }
        self.commit_unlock(epoch, state, Some(pin), biometric_ok)
    }

    /// Invalidates the session from any phase. Idempotent.
    pub async fn lock(&self) {
        self.lock_with(LockReason::Manual).await;
    }

    /// Resets the auto-lock timer.
    pub fn record_activity(&self) {
        if let Some(session) = self.state.lock().session.as_mut() {
            session.touch();
        }
    }

    pub async fn app_backgrounded(&self) {
        if self.config.security.lock_on_background {
            self.lock_with(LockReason::Background).await;
        }
    }

    /// Sets or clears the duress PIN. It must differ from the unlock PIN.
    pub async fn set_duress_pin(&self, duress_pin: Option<&str>) -> Result<(), WalletError> {
        let session_pin = self.require_unlocked(|s| s.pin().cloned())?;
        let Some(session_pin) = session_pin else {
            // decoy session: accept silently, change nothing
            return Ok(());
        };
        let kdf = Argon2Params::from_config(&self.config.kdf);
        let verifier = match duress_pin {
            Some(duress) => {
                validate_pin(duress)?;
                if bool::from(duress.as_bytes().ct_eq(session_pin.expose().as_bytes())) {
                    return Err(WalletError::ValidationError("duress PIN must differ from the unlock PIN".into()));
                }
                let duress = duress.to_string();
                tokio::task::spawn_blocking(move || DuressVerifier::derive(&duress, kdf))
                    .await
                    .map_err(|e| WalletError::InternalError(format!("duress derive: {}", e)))??
            }
            None => DuressVerifier::decoy(kdf),
        };

        let mut policy = self.state.lock().policy.clone();
        policy.duress = verifier;
        self.write_policy(&policy).await?;
        self.state.lock().policy = policy;
        self.record_activity();
        info!(enabled = duress_pin.is_some(), "duress PIN updated");
        Ok(())
    }

    pub async fn set_biometric_required(&self, required: bool) -> Result<(), WalletError> {
        let is_real = self.require_unlocked(|s| s.pin().is_some())?;
        if required && !self.storage.biometric_available() {
            return Err(WalletError::ValidationError("biometric authentication is not available".into()));
        }
        if is_real {
            let mut policy = self.state.lock().policy.clone();
            policy.biometric_required = required;
            self.write_policy(&policy).await?;
            self.state.lock().policy = policy;
        }
        self.update_state(|state| state.security.biometric_unlock = required)
    }

    /// Applies `update` to the unlocked state and schedules a debounced write.
    pub fn update_state<F>(&self, update: F) -> Result<(), WalletError>
    where
        F: FnOnce(&mut AppState),
    {
        let (snapshot, pin) = {
            let mut st = self.state.lock();
            if st.phase != EnclavePhase::Unlocked {
                return Err(WalletError::NotAuthorized("enclave is locked".into()));
            }
            let Some(state) = st.app_state.as_mut() else {
                return Err(WalletError::NotAuthorized("enclave is locked".into()));
            };
            update(state);
            let snapshot = state.clone();
            let session = st.session.as_mut();
            let pin = session.and_then(|s| {
                s.touch();
                s.pin().cloned()
            });
            (snapshot, pin)
        };
        match pin {
            Some(pin) => self.persistence.schedule(snapshot, pin),
            None => Ok(()),
        }
    }

    pub fn app_state(&self) -> Result<AppState, WalletError> {
        self.require_unlocked(|_| ())?;
        self.state
            .lock()
            .app_state
            .clone()
            .ok_or_else(|| WalletError::NotAuthorized("enclave is locked".into()))
    }

    pub fn wallet_config(&self) -> Result<Option<WalletConfig>, WalletError> {
        Ok(self.app_state()?.wallet_config)
    }

    /// Session material for one signing call. Counts as activity.
    pub fn signing_context(&self) -> Result<SigningContext, WalletError> {
        let mut st = self.state.lock();
        if st.phase != EnclavePhase::Unlocked {
            return Err(WalletError::NotAuthorized("enclave is locked".into()));
        }
        let Some(session) = st.session.as_mut() else {
            return Err(WalletError::NotAuthorized("no active session".into()));
        };
        if session.is_expired() {
            return Err(WalletError::NotAuthorized("session expired".into()));
        }
        session.touch();
        let pin = session.pin().cloned();
        let state = st.app_state.as_ref();
        Ok(SigningContext {
            network: state.map(|s| s.network).unwrap_or_default(),
            seed_vault: state.and_then(|s| s.wallet_config.as_ref()).and_then(|c| c.seed_vault.clone()),
            pin,
        })
    }

    /// Destroys the vault, the persisted state and the lock policy.
    ///
    /// From a decoy session nothing is deleted: the controller only presents `NoVault`
    /// and the real PIN still opens the sealed vault.
    pub async fn reset_wallet(&self) -> Result<(), WalletError> {
        let is_real = self.require_unlocked(|s| s.pin().is_some())?;
        self.lock_with(LockReason::Reset).await;
        if is_real {
            self.persistence.clear().await?;
            self.storage.remove(&self.config.persistence.policy_key).await?;
        }
        {
            let mut st = self.state.lock();
            if is_real {
                st.vault_exists = false;
                st.concealed = false;
                st.policy = LockPolicy::fresh(Argon2Params::from_config(&self.config.kdf));
            } else {
                st.concealed = true;
            }
            st.phase = EnclavePhase::NoVault;
            st.tracker.record_success();
        }
        warn!("wallet reset, vault destroyed");
        self.events.publish(EnclaveEvent::VaultReset);
        Ok(())
    }

    /// Locks, flushes pending state and stops background work.
    pub async fn teardown(&self) {
        self.lock_with(LockReason::Manual).await;
        self.persistence.shutdown().await;
        debug!("enclave torn down");
    }

    fn require_unlocked<T>(&self, read: impl FnOnce(&EnclaveSession) -> T) -> Result<T, WalletError> {
        let st = self.state.lock();
        match (&st.phase, st.session.as_ref()) {
            (EnclavePhase::Unlocked, Some(session)) => Ok(read(session)),
            _ => Err(WalletError::NotAuthorized("enclave is locked".into())),
        }
    }

    fn record_wrong_pin(&self) -> WalletError {
        let mut st = self.state.lock();
        let outcome = st.tracker.record_failure();
        if st.concealed {
            st.phase = EnclavePhase::NoVault;
            return match outcome {
                Ok(_) => WalletError::NotAuthorized(NO_VAULT.into()),
                Err(limited) => limited,
            };
        }
        match outcome {
            Ok(remaining) => {
                st.phase = EnclavePhase::PinEntry;
                info!(remaining, "wrong PIN");
                WalletError::DecryptionError
            }
            Err(limited) => {
                st.phase = EnclavePhase::Locked;
                st.biometric_ok = false;
                limited
            }
        }
    }

    /// Moves a plaintext mnemonic into a seed vault and re-seals a legacy seed vault.
    /// Returns whether the state changed.
    async fn migrate_wallet_secrets(&self, state: &mut AppState, pin: &SessionPin) -> Result<bool, WalletError> {
        let Some(config) = state.wallet_config.as_mut() else {
            return Ok(false);
        };
        let mut changed = false;

        if config.seed_vault.is_none() {
            if let Some(mnemonic) = config.mnemonic.as_deref() {
                let seed = SeedCodec::phrase_to_seed(mnemonic, config.passphrase.as_deref().unwrap_or(""))?;
                let seed_bytes = zeroize::Zeroizing::new(seed.as_bytes().to_vec());
                config.seed_vault = Some(self.seal(seed_bytes, pin.clone()).await?);
                info!("migrated plaintext mnemonic into a seed vault");
                changed = true;
            }
        } else if let Some(vault) = config.seed_vault.clone().filter(VaultBlob::is_legacy) {
            let codec = self.codec.clone();
            let opened_pin = pin.clone();
            let seed_bytes = tokio::task::spawn_blocking(move || codec.decrypt(&vault, opened_pin.expose()))
                .await
                .map_err(|e| WalletError::InternalError(format!("seed vault task: {}", e)))??;
            config.seed_vault = Some(self.seal(seed_bytes, pin.clone()).await?);
            changed = true;
        }

        if config.strip_secrets() {
            changed = true;
        }
        Ok(changed)
    }

    /// Runs the decrypts a real unlock would: the stored state, then the seed vault
    /// the native signer opens. Outcomes are discarded and never logged.
    async fn spend_unlock_cost(&self, pin: &SessionPin) {
        let options = AccessOptions { require_biometric: self.biometric_required() };
        let _ = self.persistence.load(pin, options).await;
        if self.native.is_some() {
            let kdf = Argon2Params::from_config(&self.config.kdf);
            let pin = pin.clone();
            let _ = tokio::task::spawn_blocking(move || {
                PinKdf::argon2id(kdf).derive_key(pin.expose().as_bytes(), &PinKdf::generate_salt())
            })
            .await;
        }
    }

    async fn seal(&self, plaintext: zeroize::Zeroizing<Vec<u8>>, pin: SessionPin) -> Result<VaultBlob, WalletError> {
        let codec = self.codec.clone();
        tokio::task::spawn_blocking(move || codec.encrypt(&plaintext, pin.expose()))
            .await
            .map_err(|e| WalletError::InternalError(format!("seal task: {}", e)))?
    }

    async fn write_policy(&self, policy: &LockPolicy) -> Result<(), WalletError> {
        let raw = serde_json::to_string(policy)?;
        self.storage
            .set(&self.config.persistence.policy_key, &raw, AccessOptions::default())
            .await
    }

    /// Best effort; a failure only costs the fast path.
    async fn open_native_session(&self, seed_vault: &VaultBlob, pin: &SessionPin) {
        let Some(native) = self.native.as_ref() else {
            return;
        };
        let timeout = TimeoutConfig::new(
            Duration::from_millis(self.config.native.timeout_ms),
            "native unlock_session",
        );
        if let Err(e) = AsyncExecutor::execute_with_timeout(native.unlock_session(seed_vault, pin), timeout).await {
            warn!(error = %e, "failed to open native session cache");
        }
    }

    fn commit_unlock(
        &self,
        epoch: u64,
        state: AppState,
        pin: Option<SessionPin>,
        biometric_satisfied: bool,
    ) -> Result<(), WalletError> {
        let idle = Duration::from_secs(state.security.auto_lock_minutes.max(1).saturating_mul(60));
        let token = CancellationToken::new();
        {
            let mut st = self.state.lock();
            if st.epoch != epoch {
                st.phase = st.resting_phase();
                return Err(WalletError::NotAuthorized("unlock interrupted by lock".into()));
            }
            if pin.is_some() {
                st.concealed = false;
            }
            st.session = Some(EnclaveSession::new(pin, idle, biometric_satisfied));
            st.app_state = Some(state);
            st.phase = EnclavePhase::Unlocked;
            st.biometric_ok = false;
            if let Some(previous) = st.watchdog.replace(token.clone()) {
                previous.cancel();
            }
        }
        self.spawn_watchdog(token);
        info!(auto_lock_secs = idle.as_secs(), "enclave unlocked");
        self.events.publish(EnclaveEvent::Unlocked);
        Ok(())
    }

    fn spawn_watchdog(&self, token: CancellationToken) {
        let this = self.this.clone();
        tokio::spawn(async move {
            loop {
                let deadline = {
                    let Some(controller) = this.upgrade() else { return };
                    let st = controller.state.lock();
                    match st.session.as_ref() {
                        Some(session) => session.expires_at(),
                        None => return,
                    }
                };
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep_until(deadline) => {}
                }
                let Some(controller) = this.upgrade() else { return };
                let expired = controller.state.lock().session.as_ref().map_or(true, EnclaveSession::is_expired);
                if expired {
                    info!("idle timeout reached, auto-locking");
                    controller.lock_with(LockReason::AutoLock).await;
                    return;
                }
            }
        });
    }

    async fn lock_with(&self, reason: LockReason) {
        let had_session = {
            let mut st = self.state.lock();
            st.epoch = st.epoch.wrapping_add(1);
            if let Some(token) = st.watchdog.take() {
                token.cancel();
            }
            let had_session = st.session.take().is_some();
            st.app_state = None;
            st.biometric_ok = false;
            st.phase = st.resting_phase();
            had_session
        };

        // The pending write already holds its own copy of the state and PIN.
        self.persistence.request_flush();
        if let Err(e) = self.storage.clear_session().await {
            warn!(error = %e, "failed to clear platform session");
        }
        if let Some(native) = self.native.as_ref() {
            if let Err(e) = native.clear_session().await {
                warn!(error = %e, "failed to clear native session cache");
            }
        }

        if had_session {
            info!(?reason, "enclave locked");
            self.events.publish(EnclaveEvent::Locked { reason });
        }
    }
}
