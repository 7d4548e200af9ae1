// src/security/mod.rs
//! Secret handling and the PIN-sealed vault.

pub mod secret;
pub mod vault;

// Secret buffer alias re-export
pub use secret::{SecretVec, SessionPin};
pub use vault::{validate_pin, VaultBlob, VaultCodec};
