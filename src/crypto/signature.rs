//! Canonical signature encodings, one per chain.
//!
//! | chain     | bytes                                  |
//! |-----------|----------------------------------------|
//! | bitcoin   | DER, low-S                             |
//! | stacks    | 65 bytes: recovery id, r, s (VRS)      |
//! | rootstock | 65 bytes: r, s, v (v = 27 + recovery id) |
//!
//! Both execution paths run their output through here, so a web signature and a
//! native signature over the same digest are byte-identical.

use crate::core::domain::Chain;
use crate::core::errors::WalletError;
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, RecoveryId, Signature};
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureEncoding {
    Der,
    StacksVrs,
    EvmRsv,
}

impl SignatureEncoding {
    pub fn for_chain(chain: Chain) -> Self {
        match chain {
            Chain::Bitcoin => SignatureEncoding::Der,
            Chain::Stacks => SignatureEncoding::StacksVrs,
            Chain::Rootstock => SignatureEncoding::EvmRsv,
        }
    }
}

/// Ensure ECDSA signature uses low-S value (s <= n/2) to avoid malleability.
pub fn ensure_low_s(signature: &Signature) -> Signature {
    let mut normalized = *signature;
    normalized.normalize_s();
    normalized
}

pub fn encode(chain: Chain, signature: &RecoverableSignature) -> Vec<u8> {
    let (recovery_id, compact) = signature.serialize_compact();
    let v = recovery_id.to_i32() as u8;
    match SignatureEncoding::for_chain(chain) {
        SignatureEncoding::Der => ensure_low_s(&signature.to_standard()).serialize_der().to_vec(),
        SignatureEncoding::StacksVrs => {
            let mut out = Vec::with_capacity(65);
            out.push(v);
            out.extend_from_slice(&compact);
            out
        }
        SignatureEncoding::EvmRsv => {
            let mut out = Vec::with_capacity(65);
            out.extend_from_slice(&compact);
            out.push(27 + v);
            out
        }
    }
}

/// Rebuilds a recoverable signature from the 64-byte compact form a native signer returns.
pub fn from_compact(compact: &[u8], recovery_id: u8) -> Result<RecoverableSignature, WalletError> {
    let recovery_id = RecoveryId::from_i32(recovery_id as i32)
        .map_err(|e| WalletError::SigningFailed(format!("bad recovery id: {}", e)))?;
    RecoverableSignature::from_compact(compact, recovery_id)
        .map_err(|e| WalletError::SigningFailed(format!("bad compact signature: {}", e)))
}

/// Fails closed if the signature does not recover to `expected`.
pub fn verify_recovers_to(
    digest: &[u8; 32],
    signature: &RecoverableSignature,
    expected: &PublicKey,
) -> Result<(), WalletError> {
    let secp = Secp256k1::verification_only();
    let recovered = secp
        .recover_ecdsa(&Message::from_digest(*digest), signature)
        .map_err(|e| WalletError::SigningFailed(format!("signature does not recover: {}", e)))?;
    if &recovered != expected {
        return Err(WalletError::SigningFailed("signature made by an unexpected key".into()));
    }
    Ok(())
}
