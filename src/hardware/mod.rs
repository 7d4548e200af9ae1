//! 硬件签名模块
//!
//! Platform secure-element capability. Only signatures and public keys cross this
//! boundary; key material stays inside the implementation.

mod simulated;

pub use simulated::SoftwareSecureElement;

use crate::core::domain::Network;
use crate::core::errors::WalletError;
use crate::security::secret::SessionPin;
use crate::security::vault::VaultBlob;
use async_trait::async_trait;
use bitcoin::secp256k1::PublicKey;
use std::fmt;

/// One digest to sign.
#[derive(Clone)]
pub struct NativeSignRequest {
    /// Sealed seed vault. Platform elements resolve their key alias from
    /// [`VaultBlob::fingerprint`].
    pub vault: VaultBlob,
    /// `None` means "use the cached session key".
    pub pin: Option<SessionPin>,
    pub path: String,
    pub message_hash: [u8; 32],
    pub network: Network,
}

impl fmt::Debug for NativeSignRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeSignRequest")
            .field("vault", &self.vault.fingerprint())
            .field("pin", &self.pin.as_ref().map(|_| "***"))
            .field("path", &self.path)
            .field("message_hash", &hex::encode(self.message_hash))
            .field("network", &self.network)
            .finish()
    }
}

/// Compact recoverable signature as returned by the element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeSignature {
    /// r || s
    pub signature: [u8; 64],
    pub recovery_id: u8,
    pub public_key: PublicKey,
}

#[async_trait]
pub trait NativeSigner: Send + Sync {
    /// Errors: `NativeCacheExpired` when `pin` is `None` and no session is cached,
    /// `SigningDenied` when the user rejects the prompt.
    async fn sign(&self, request: NativeSignRequest) -> Result<NativeSignature, WalletError>;

    /// Opens the element's session cache for `vault`.
    async fn unlock_session(&self, vault: &VaultBlob, pin: &SessionPin) -> Result<(), WalletError>;

    async fn clear_session(&self) -> Result<(), WalletError>;

    fn is_available(&self) -> bool {
        true
    }
}
