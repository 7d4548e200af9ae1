//! Small helpers and aliases for secret buffers that must be zeroized on drop.
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Common alias for secret byte buffers which will be zeroed when dropped.
pub type SecretVec = Zeroizing<Vec<u8>>;

/// Session PIN shared between the access controller, persistence and the signer.
/// Zeroized when the last holder drops it.
#[derive(Clone)]
pub struct SessionPin(Arc<SecretString>);

impl SessionPin {
    pub fn new(pin: &str) -> Self {
        Self(Arc::new(SecretString::new(pin.to_owned())))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SessionPin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionPin(***)")
    }
}
