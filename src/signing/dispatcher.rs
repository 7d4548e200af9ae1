//! 签名分发器
//!
//! Two mutually exclusive paths:
//! - native: the platform secure element signs. A cache-only attempt (no PIN) is
//!   tried first; on `NativeCacheExpired` it is repeated exactly once with the
//!   session PIN. Only signatures and public keys cross the boundary.
//! - web: the seed vault is decrypted in process, the chain key derived, and both
//!   are zeroized on drop, on the error path as much as on success.
//!
//! Both paths encode through `crypto::signature::encode`, so they produce the same bytes.

use super::request::{SignPayload, SignRequest, SignResult};
use crate::auth::enclave_access::{EnclaveAccessController, SigningContext};
use crate::blockchain::bitcoin::psbt::{FinalizedTx, TransactionBuilder};
use crate::core::config::EnclaveConfig;
use crate::core::derivation::{KeyDerivation, KeyMaterial};
use crate::core::domain::Chain;
use crate::core::errors::WalletError;
use crate::core::seed::Seed;
use crate::crypto::signature;
use crate::hardware::{NativeSignRequest, NativeSignature, NativeSigner};
use crate::security::secret::SessionPin;
use crate::security::vault::{VaultBlob, VaultCodec};
use crate::tools::async_support::{AsyncExecutor, RetryPolicy};
use bitcoin::secp256k1::ecdsa::RecoverableSignature;
use bitcoin::secp256k1::PublicKey;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Which path served a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningPath {
    Native,
    Web,
}

pub struct SigningDispatcher {
    access: Arc<EnclaveAccessController>,
    native: Option<Arc<dyn NativeSigner>>,
    codec: VaultCodec,
    native_policy: RetryPolicy,
}

impl SigningDispatcher {
    pub fn new(
        access: Arc<EnclaveAccessController>,
        native: Option<Arc<dyn NativeSigner>>,
        config: &EnclaveConfig,
    ) -> Self {
        Self {
            access,
            native,
            codec: VaultCodec::new(config.kdf.clone()),
            native_policy: config.native.retry_policy(),
        }
    }

    pub fn preferred_path(&self) -> SigningPath {
        match &self.native {
            Some(native) if native.is_available() => SigningPath::Native,
            _ => SigningPath::Web,
        }
    }

    pub async fn sign(&self, request: SignRequest) -> Result<SignResult, WalletError> {
        request.validate()?;
        let ctx = self.access.signing_context()?;
        let vault = ctx
            .seed_vault
            .clone()
            .ok_or_else(|| WalletError::NotAuthorized("no seed vault in session".into()))?;
        let pin = ctx
            .pin
            .clone()
            .ok_or_else(|| WalletError::NotAuthorized("session cannot sign".into()))?;

        let request_id = Uuid::new_v4();
        let path = self.preferred_path();
        info!(%request_id, chain = %request.chain, kind = ?request.kind, ?path, "signing request");

        let result = match path {
            SigningPath::Native => self.sign_native(&request, &ctx, &vault, &pin, request_id).await,
            SigningPath::Web => self.sign_web(&request, &ctx, &vault, &pin).await,
        };
        match &result {
            Ok(res) => {
                self.access.record_activity();
                info!(%request_id, broadcast_ready = res.broadcast_ready_hex.is_some(), "signing complete");
            }
            Err(e) => warn!(%request_id, error = %e, "signing failed"),
        }
        result
    }

    async fn sign_native(
        &self,
        request: &SignRequest,
        ctx: &SigningContext,
        vault: &VaultBlob,
        pin: &SessionPin,
        request_id: Uuid,
    ) -> Result<SignResult, WalletError> {
        let Some(native) = self.native.clone() else {
            return Err(WalletError::InternalError("native signer not configured".into()));
        };
        let path = KeyDerivation::path_str(request.chain, ctx.network).to_string();
        let base = NativeSignRequest {
            vault: vault.clone(),
            pin: None,
            path,
            message_hash: [0u8; 32],
            network: ctx.network,
        };

        if let SignPayload::Psbt { psbt_base64 } = &request.payload {
            let psbt = TransactionBuilder::decode(psbt_base64)?;
            let sighashes = TransactionBuilder::input_sighashes(&psbt)?;
            let mut signatures = Vec::with_capacity(sighashes.len());
            let mut public_key: Option<PublicKey> = None;

            // In input order; finalization consumes an ordered list.
            for (index, sighash) in sighashes.iter().enumerate() {
                let native_sig = self.native_sign(&native, &base, *sighash, pin).await?;
                let recoverable = signature::from_compact(&native_sig.signature, native_sig.recovery_id)?;
                match public_key {
                    None => public_key = Some(native_sig.public_key),
                    Some(pk) if pk != native_sig.public_key => {
                        return Err(WalletError::SigningFailed(format!(
                            "input {} signed by a different key",
                            index
                        )))
                    }
                    Some(_) => {}
                }
                debug!(%request_id, index, "input signed");
                signatures.push(recoverable.to_standard());
            }

            let public_key = public_key.ok_or_else(|| WalletError::ValidationError("psbt has no inputs".into()))?;
            let tx = TransactionBuilder::finalize_with_signatures(&psbt, &signatures, &public_key)?;
            let first = signature::ensure_low_s(&signatures[0]).serialize_der();
            return Ok(transaction_result(hex::encode(first), &public_key, &tx));
        }

        let digest = request.message_digest()?;
        let native_sig = self.native_sign(&native, &base, digest, pin).await?;
        let recoverable = signature::from_compact(&native_sig.signature, native_sig.recovery_id)?;
        signature::verify_recovers_to(&digest, &recoverable, &native_sig.public_key)?;
        Ok(message_result(request.chain, &recoverable, &native_sig.public_key))
    }

    /// Cache-only attempt, then at most one attempt with the PIN.
    async fn native_sign(
        &self,
        native: &Arc<dyn NativeSigner>,
        base: &NativeSignRequest,
        message_hash: [u8; 32],
        pin: &SessionPin,
    ) -> Result<NativeSignature, WalletError> {
        let mut fast = base.clone();
        fast.message_hash = message_hash;
        match self.call_native(native, fast.clone()).await {
            Err(e) if e.is_pin_recoverable() => {
                debug!("native session cache expired, retrying with PIN");
                let slow = NativeSignRequest { pin: Some(pin.clone()), ..fast };
                self.call_native(native, slow).await
            }
            other => other,
        }
    }

    async fn call_native(
        &self,
        native: &Arc<dyn NativeSigner>,
        request: NativeSignRequest,
    ) -> Result<NativeSignature, WalletError> {
        AsyncExecutor::retry("native sign", &self.native_policy, || {
            let native = native.clone();
            let request = request.clone();
            async move { native.sign(request).await }
        })
        .await
    }

    async fn sign_web(
        &self,
        request: &SignRequest,
        ctx: &SigningContext,
        vault: &VaultBlob,
        pin: &SessionPin,
    ) -> Result<SignResult, WalletError> {
        let key = self.derive_web_key(request.chain, ctx, vault, pin).await?;

        if let SignPayload::Psbt { psbt_base64 } = &request.payload {
            let psbt = TransactionBuilder::decode(psbt_base64)?;
            let tx = TransactionBuilder::sign_with_key(&psbt, &key)?;
            let first = tx
                .input
                .first()
                .and_then(|input| input.witness.nth(0))
                .map(|sig| hex::encode(&sig[..sig.len().saturating_sub(1)]))
                .unwrap_or_default();
            return Ok(transaction_result(first, key.public_key(), &tx));
        }

        let digest = request.message_digest()?;
        let recoverable = key.sign_digest(&digest)?;
        signature::verify_recovers_to(&digest, &recoverable, key.public_key())?;
        Ok(message_result(request.chain, &recoverable, key.public_key()))
    }

    /// The decrypted seed lives only inside this function.
    async fn derive_web_key(
        &self,
        chain: Chain,
        ctx: &SigningContext,
        vault: &VaultBlob,
        pin: &SessionPin,
    ) -> Result<KeyMaterial, WalletError> {
        let codec = self.codec.clone();
        let vault = vault.clone();
        let pin = pin.clone();
        let network = ctx.network;
        tokio::task::spawn_blocking(move || {
            let plaintext = codec.decrypt(&vault, pin.expose())?;
            let seed = Seed::from_bytes(&plaintext)?;
            KeyDerivation::derive_chain_key(&seed, chain, network)
        })
        .await
        .map_err(|e| WalletError::InternalError(format!("web signing task: {}", e)))?
    }
}

fn message_result(chain: Chain, signature: &RecoverableSignature, public_key: &PublicKey) -> SignResult {
    SignResult {
        signature: hex::encode(signature::encode(chain, signature)),
        public_key: hex::encode(public_key.serialize()),
        broadcast_ready_hex: None,
        txid: None,
        timestamp: chrono::Utc::now().timestamp_millis(),
    }
}

fn transaction_result(signature: String, public_key: &PublicKey, tx: &bitcoin::Transaction) -> SignResult {
    let finalized = FinalizedTx::from_transaction(tx);
    SignResult {
        signature,
        public_key: hex::encode(public_key.serialize()),
        broadcast_ready_hex: Some(finalized.hex),
        txid: Some(finalized.txid),
        timestamp: chrono::Utc::now().timestamp_millis(),
    }
}
