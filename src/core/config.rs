use crate::core::errors::WalletError;
use crate::tools::async_support::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Lock / unlock policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityConfig {
    /// Idle minutes before the session auto-locks
    #[serde(default = "SecurityConfig::default_auto_lock_minutes")]
    pub auto_lock_minutes: u64,

    /// Lock as soon as the host app is backgrounded
    #[serde(default = "SecurityConfig::default_lock_on_background")]
    pub lock_on_background: bool,

    /// Friction delay applied to every PIN attempt (milliseconds)
    #[serde(default = "SecurityConfig::default_pin_attempt_delay_ms")]
    pub pin_attempt_delay_ms: u64,

    /// Consecutive wrong PINs before attempts are refused
    #[serde(default = "SecurityConfig::default_max_pin_attempts")]
    pub max_pin_attempts: u32,

    /// Refusal window after too many wrong PINs (seconds)
    #[serde(default = "SecurityConfig::default_lockout_secs")]
    pub lockout_secs: u64,

    /// How long a biometric confirmation stays valid (seconds)
    #[serde(default = "SecurityConfig::default_biometric_session_secs")]
    pub biometric_session_secs: u64,
}

impl SecurityConfig {
    fn default_auto_lock_minutes() -> u64 { 5 }
    fn default_lock_on_background() -> bool { true }
    fn default_pin_attempt_delay_ms() -> u64 { 500 }
    fn default_max_pin_attempts() -> u32 { 5 }
    fn default_lockout_secs() -> u64 { 300 }
    fn default_biometric_session_secs() -> u64 { 300 }

    pub fn auto_lock_after(&self) -> Duration {
        Duration::from_secs(self.auto_lock_minutes.saturating_mul(60))
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            auto_lock_minutes: Self::default_auto_lock_minutes(),
            lock_on_background: Self::default_lock_on_background(),
            pin_attempt_delay_ms: Self::default_pin_attempt_delay_ms(),
            max_pin_attempts: Self::default_max_pin_attempts(),
            lockout_secs: Self::default_lockout_secs(),
            biometric_session_secs: Self::default_biometric_session_secs(),
        }
    }
}

/// PIN key-derivation cost
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KdfConfig {
    /// Argon2id memory cost (KiB)
    #[serde(default = "KdfConfig::default_memory_kib")]
    pub memory_kib: u32,

    /// Argon2id passes
    #[serde(default = "KdfConfig::default_iterations")]
    pub iterations: u32,

    /// Argon2id lanes
    #[serde(default = "KdfConfig::default_parallelism")]
    pub parallelism: u32,

    /// PBKDF2 iteration count used by the legacy vault format
    #[serde(default = "KdfConfig::default_legacy_pbkdf2_iterations")]
    pub legacy_pbkdf2_iterations: u32,
}

impl KdfConfig {
    fn default_memory_kib() -> u32 { 19_456 }
    fn default_iterations() -> u32 { 2 }
    fn default_parallelism() -> u32 { 1 }
    fn default_legacy_pbkdf2_iterations() -> u32 { 100_000 }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            memory_kib: Self::default_memory_kib(),
            iterations: Self::default_iterations(),
            parallelism: Self::default_parallelism(),
            legacy_pbkdf2_iterations: Self::default_legacy_pbkdf2_iterations(),
        }
    }
}

/// Debounced state persistence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistenceConfig {
    #[serde(default = "PersistenceConfig::default_debounce_ms")]
    pub debounce_ms: u64,

    /// Upper bound on how long a burst of changes can postpone a write
    #[serde(default = "PersistenceConfig::default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "PersistenceConfig::default_state_key")]
    pub state_key: String,

    #[serde(default = "PersistenceConfig::default_policy_key")]
    pub policy_key: String,
}

impl PersistenceConfig {
    fn default_debounce_ms() -> u64 { 1000 }
    fn default_max_delay_ms() -> u64 { 5000 }
    fn default_state_key() -> String { "enclave_state".to_string() }
    fn default_policy_key() -> String { "enclave_policy".to_string() }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::default_debounce_ms(),
            max_delay_ms: Self::default_max_delay_ms(),
            state_key: Self::default_state_key(),
            policy_key: Self::default_policy_key(),
        }
    }
}

/// Balance / UTXO / fee provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(default = "ProviderConfig::default_base_url")]
    pub base_url: String,

    /// Per-attempt timeout (milliseconds)
    #[serde(default = "ProviderConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "ProviderConfig::default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "ProviderConfig::default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "ProviderConfig::default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl ProviderConfig {
    fn default_base_url() -> String { "https://mempool.space/api".to_string() }
    fn default_timeout_ms() -> u64 { 10_000 }
    fn default_max_attempts() -> usize { 3 }
    fn default_initial_backoff_ms() -> u64 { 250 }
    fn default_max_backoff_ms() -> u64 { 5_000 }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            timeout_ms: Self::default_timeout_ms(),
            max_attempts: Self::default_max_attempts(),
            initial_backoff_ms: Self::default_initial_backoff_ms(),
            max_backoff_ms: Self::default_max_backoff_ms(),
        }
    }
}

/// Native secure element calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NativeConfig {
    #[serde(default = "NativeConfig::default_timeout_ms")]
    pub timeout_ms: u64,

    /// Only timeouts are retried; denial and cache expiry never are
    #[serde(default = "NativeConfig::default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "NativeConfig::default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl NativeConfig {
    fn default_timeout_ms() -> u64 { 30_000 }
    fn default_max_attempts() -> usize { 2 }
    fn default_initial_backoff_ms() -> u64 { 200 }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_millis(self.timeout_ms),
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl Default for NativeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout_ms(),
            max_attempts: Self::default_max_attempts(),
            initial_backoff_ms: Self::default_initial_backoff_ms(),
        }
    }
}

/// enclave配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EnclaveConfig {
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub kdf: KdfConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub native: NativeConfig,
}

impl EnclaveConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, WalletError> {
        let config: EnclaveConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            WalletError::ConfigError(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Non-sensitive overrides from the environment.
    pub fn apply_env_overrides(mut self) -> Result<Self, WalletError> {
        if let Ok(v) = std::env::var("ENCLAVE_AUTO_LOCK_MINUTES") {
            self.security.auto_lock_minutes = v.parse().map_err(|_| {
                WalletError::ConfigError(format!("ENCLAVE_AUTO_LOCK_MINUTES is not a number: {}", v))
            })?;
        }
        if let Ok(url) = std::env::var("ENCLAVE_PROVIDER_URL") {
            self.provider.base_url = url;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.security.auto_lock_minutes == 0 {
            return Err(WalletError::ConfigError("auto_lock_minutes must be > 0".into()));
        }
        for (name, timeout_ms, attempts) in [
            ("provider", self.provider.timeout_ms, self.provider.max_attempts),
            ("native", self.native.timeout_ms, self.native.max_attempts),
        ] {
            if timeout_ms == 0 || attempts == 0 {
                return Err(WalletError::ConfigError(format!(
                    "{}: timeout_ms and max_attempts must be > 0",
                    name
                )));
            }
        }
        // argon2 crate minimums
        if self.kdf.memory_kib < 8 * self.kdf.parallelism.max(1)
            || self.kdf.iterations == 0
            || self.kdf.parallelism == 0
        {
            return Err(WalletError::ConfigError("argon2 parameters below minimum".into()));
        }
        if self.kdf.legacy_pbkdf2_iterations == 0 {
            return Err(WalletError::ConfigError("legacy_pbkdf2_iterations must be > 0".into()));
        }
        Ok(())
    }
}
