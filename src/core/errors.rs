use std::fmt;

/// Custom error type for enclave operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Bad mnemonic, address, amount, PIN format or request shape. User-correctable.
    ValidationError(String),
    /// The selected inputs cannot cover amount + fee.
    InsufficientFunds(String),
    /// No unlocked session, or the session is missing its vault/PIN.
    NotAuthorized(String),
    /// Vault could not be opened. Deliberately carries no cause.
    DecryptionError,
    /// The native signer's session cache is gone; recoverable once with an explicit PIN.
    NativeCacheExpired(String),
    /// The user rejected a native signing prompt.
    SigningDenied(String),
    /// Network errors.
    NetworkError(String),
    /// Timeout errors.
    TimeoutError(String),
    /// Corrupt seed or derivation path.
    DerivationError(String),
    /// Storage-related errors.
    StorageError(String),
    /// Serialization/deserialization errors.
    SerializationError(String),
    /// Configuration-related errors.
    ConfigError(String),
    /// Signing failed errors.
    SigningFailed(String),
    /// Too many wrong PIN attempts.
    RateLimited { retry_after_secs: u64 },
    /// Internal errors.
    InternalError(String),
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            WalletError::InsufficientFunds(msg) => write!(f, "Insufficient funds: {}", msg),
            WalletError::NotAuthorized(msg) => write!(f, "Not authorized: {}", msg),
            WalletError::DecryptionError => write!(f, "Decryption error: unable to open vault"),
            WalletError::NativeCacheExpired(msg) => {
                write!(f, "Native session cache expired: {}", msg)
            }
            WalletError::SigningDenied(msg) => write!(f, "Signing denied: {}", msg),
            WalletError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            WalletError::TimeoutError(msg) => write!(f, "Timeout error: {}", msg),
            WalletError::DerivationError(msg) => write!(f, "Key derivation error: {}", msg),
            WalletError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            WalletError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            WalletError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            WalletError::SigningFailed(msg) => write!(f, "Signing failed: {}", msg),
            WalletError::RateLimited { retry_after_secs } => {
                write!(f, "Too many attempts, retry in {}s", retry_after_secs)
            }
            WalletError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

impl WalletError {
    /// 判断是否为关键error
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            WalletError::DecryptionError
                | WalletError::DerivationError(_)
                | WalletError::SigningDenied(_)
        )
    }

    /// 判断是否为可重试error
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalletError::NetworkError(_) | WalletError::TimeoutError(_))
    }

    /// Only an expired native session may be retried, and only with an explicit PIN.
    pub fn is_pin_recoverable(&self) -> bool {
        matches!(self, WalletError::NativeCacheExpired(_))
    }
}

impl From<std::io::Error> for WalletError {
    fn from(err: std::io::Error) -> Self {
        WalletError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(err: serde_json::Error) -> Self {
        WalletError::SerializationError(err.to_string())
    }
}

impl From<toml::de::Error> for WalletError {
    fn from(err: toml::de::Error) -> Self {
        WalletError::ConfigError(err.to_string())
    }
}
