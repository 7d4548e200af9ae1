//! Unsigned transaction (PSBT) construction, per-input sighashes and finalization.
//!
//! Fee model: `vbytes = max(10 + 68 * inputs + 31 * outputs, 110)`, fee = floor(vbytes * rate).
//! The estimate always counts a change output, even when the change later turns out
//! to be dust and is left to the miner.

use super::address::BitcoinAddress;
use super::utxo::Utxo;
use crate::blockchain::stacks;
use crate::core::derivation::KeyMaterial;
use crate::core::domain::Network;
use crate::core::errors::WalletError;
use crate::crypto::signature::ensure_low_s;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use bitcoin::absolute::LockTime;
use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::opcodes::all::OP_RETURN;
use bitcoin::psbt::Psbt;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::ecdsa::Signature;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{Amount, PubkeyHash, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Change below this is not worth an output.
pub const DUST_THRESHOLD: u64 = 546;

const BASE_VBYTES: u64 = 10;
const INPUT_VBYTES: u64 = 68;
const OUTPUT_VBYTES: u64 = 31;
const MIN_VBYTES: u64 = 110;

pub fn estimate_vbytes(inputs: usize, outputs: usize) -> u64 {
    (BASE_VBYTES + INPUT_VBYTES * inputs as u64 + OUTPUT_VBYTES * outputs as u64).max(MIN_VBYTES)
}

/// Rounded down.
pub fn fee_for(vbytes: u64, fee_rate: f64) -> u64 {
    (vbytes as f64 * fee_rate).floor() as u64
}

#[derive(Debug, Clone)]
pub struct PsbtParams {
    pub utxos: Vec<Utxo>,
    pub destination: String,
    pub amount_sats: u64,
    pub change_address: String,
    /// sat/vbyte
    pub fee_rate: f64,
    pub rbf: bool,
    pub network: Network,
}

/// sBTC deposit: pay the peg-in address and tag the Stacks recipient in an OP_RETURN.
#[derive(Debug, Clone)]
pub struct PegInParams {
    pub utxos: Vec<Utxo>,
    pub peg_in_address: String,
    pub stacks_recipient: String,
    pub amount_sats: u64,
    pub change_address: String,
    pub fee_rate: f64,
    pub network: Network,
}

/// Serializable unsigned transaction artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsignedTx {
    pub psbt_base64: String,
    pub network: Network,
    pub total_in: u64,
    pub amount_sats: u64,
    pub fee_sats: u64,
    pub change_sats: u64,
    /// false when the change was dust and went to the miner
    pub change_included: bool,
    pub vbytes: u64,
    pub input_count: usize,
    pub rbf: bool,
}

impl UnsignedTx {
    /// What the miner actually receives.
    pub fn effective_fee(&self) -> u64 {
        if self.change_included {
            self.fee_sats
        } else {
            self.fee_sats + self.change_sats
        }
    }
}

/// A fully signed transaction ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedTx {
    pub hex: String,
    pub txid: String,
}

impl FinalizedTx {
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self { hex: hex::encode(serialize(tx)), txid: tx.txid().to_string() }
    }
}

pub struct TransactionBuilder;

impl TransactionBuilder {
    pub fn build_psbt(params: &PsbtParams) -> Result<UnsignedTx, WalletError> {
        let destination = BitcoinAddress::script_pubkey(&params.destination, params.network)?;
        let recipient = TxOut { value: Amount::from_sat(params.amount_sats), script_pubkey: destination };
        Self::assemble(
            &params.utxos,
            vec![recipient],
            2,
            params.amount_sats,
            &params.change_address,
            params.fee_rate,
            params.rbf,
            params.network,
        )
    }

    pub fn build_peg_in(params: &PegInParams) -> Result<UnsignedTx, WalletError> {
        stacks::parse_address(&params.stacks_recipient)?;
        let peg_in = BitcoinAddress::script_pubkey(&params.peg_in_address, params.network)?;
        let data = PushBytesBuf::try_from(params.stacks_recipient.as_bytes().to_vec())
            .map_err(|e| WalletError::ValidationError(format!("OP_RETURN payload: {:?}", e)))?;
        let tag = Builder::new().push_opcode(OP_RETURN).push_slice(data).into_script();

        let outputs = vec![
            TxOut { value: Amount::from_sat(params.amount_sats), script_pubkey: peg_in },
            TxOut { value: Amount::ZERO, script_pubkey: tag },
        ];
        Self::assemble(
            &params.utxos,
            outputs,
            3,
            params.amount_sats,
            &params.change_address,
            params.fee_rate,
            false,
            params.network,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        utxos: &[Utxo],
        mut outputs: Vec<TxOut>,
        estimated_outputs: usize,
        amount_sats: u64,
        change_address: &str,
        fee_rate: f64,
        rbf: bool,
        network: Network,
    ) -> Result<UnsignedTx, WalletError> {
        if !fee_rate.is_finite() || fee_rate <= 0.0 {
            return Err(WalletError::ValidationError(format!("invalid fee rate {}", fee_rate)));
        }
        if amount_sats < DUST_THRESHOLD {
            return Err(WalletError::ValidationError(format!(
                "amount {} sat is below the dust threshold",
                amount_sats
            )));
        }
        if utxos.is_empty() {
            return Err(WalletError::InsufficientFunds("no inputs selected".to_string()));
        }
        let change_script = BitcoinAddress::script_pubkey(change_address, network)?;

        let sequence = if rbf { Sequence::ENABLE_RBF_NO_LOCKTIME } else { Sequence::MAX };
        let mut seen = HashSet::with_capacity(utxos.len());
        let mut inputs = Vec::with_capacity(utxos.len());
        let mut prevouts = Vec::with_capacity(utxos.len());
        let mut total_in: u64 = 0;

        for utxo in utxos {
            if utxo.is_frozen {
                return Err(WalletError::ValidationError(format!(
                    "UTXO {}:{} is frozen",
                    utxo.txid, utxo.vout
                )));
            }
            let outpoint = utxo.outpoint()?;
            if !seen.insert(outpoint) {
                return Err(WalletError::ValidationError(format!("duplicate input {}", outpoint)));
            }
            let script_pubkey = BitcoinAddress::script_pubkey(&utxo.address, network)?;
            if !script_pubkey.is_p2wpkh() {
                return Err(WalletError::ValidationError(format!(
                    "input {} is not a native segwit output",
                    outpoint
                )));
            }
            total_in = total_in
                .checked_add(utxo.amount)
                .ok_or_else(|| WalletError::ValidationError("input total overflows".to_string()))?;

            inputs.push(TxIn {
                previous_output: outpoint,
                script_sig: ScriptBuf::new(),
                sequence,
                witness: Witness::new(),
            });
            prevouts.push(TxOut { value: Amount::from_sat(utxo.amount), script_pubkey });
        }

        let vbytes = estimate_vbytes(utxos.len(), estimated_outputs);
        let fee_sats = fee_for(vbytes, fee_rate);
        let change = total_in as i128 - amount_sats as i128 - fee_sats as i128;
        if change < 0 {
            return Err(WalletError::InsufficientFunds(format!(
                "inputs {} sat < amount {} sat + fee {} sat",
                total_in, amount_sats, fee_sats
            )));
        }
        let change_sats = change as u64;
        let change_included = change_sats >= DUST_THRESHOLD;
        if change_included {
            outputs.push(TxOut { value: Amount::from_sat(change_sats), script_pubkey: change_script });
        } else {
            debug!(change_sats, "change below dust threshold, leaving it to the fee");
        }

        let tx = Transaction { version: Version::TWO, lock_time: LockTime::ZERO, input: inputs, output: outputs };
        let mut psbt = Psbt::from_unsigned_tx(tx)
            .map_err(|e| WalletError::InternalError(format!("psbt from unsigned tx: {}", e)))?;
        for (input, prevout) in psbt.inputs.iter_mut().zip(prevouts) {
            input.witness_utxo = Some(prevout);
        }

        info!(inputs = utxos.len(), vbytes, fee_sats, change_included, %network, "built unsigned transaction");
        Ok(UnsignedTx {
            psbt_base64: Self::encode(&psbt),
            network,
            total_in,
            amount_sats,
            fee_sats,
            change_sats,
            change_included,
            vbytes,
            input_count: utxos.len(),
            rbf,
        })
    }

    pub fn encode(psbt: &Psbt) -> String {
        B64.encode(psbt.serialize())
    }

    pub fn decode(psbt_base64: &str) -> Result<Psbt, WalletError> {
        let raw = B64
            .decode(psbt_base64.trim())
            .map_err(|e| WalletError::ValidationError(format!("psbt is not base64: {}", e)))?;
        Psbt::deserialize(&raw).map_err(|e| WalletError::ValidationError(format!("malformed psbt: {}", e)))
    }

    /// BIP-143 SIGHASH_ALL digest for every input, in input order.
    pub fn input_sighashes(psbt: &Psbt) -> Result<Vec<[u8; 32]>, WalletError> {
        let mut cache = SighashCache::new(&psbt.unsigned_tx);
        let mut hashes = Vec::with_capacity(psbt.inputs.len());

        for (index, input) in psbt.inputs.iter().enumerate() {
            let prevout = input.witness_utxo.as_ref().ok_or_else(|| {
                WalletError::ValidationError(format!("input {} has no witness utxo", index))
            })?;
            let script_code = p2wpkh_script_code(&prevout.script_pubkey, index)?;
            #[allow(deprecated)]
            let sighash = cache
                .segwit_signature_hash(index, &script_code, prevout.value, EcdsaSighashType::All)
                .map_err(|e| WalletError::SigningFailed(format!("sighash for input {}: {}", index, e)))?;
            hashes.push(sighash.to_byte_array());
        }
        Ok(hashes)
    }

    /// Builds witnesses from one signature per input (ordered by input index). Every
    /// signature is verified and `public_key` must own every input.
    pub fn finalize_with_signatures(
        psbt: &Psbt,
        signatures: &[Signature],
        public_key: &PublicKey,
    ) -> Result<Transaction, WalletError> {
        if signatures.len() != psbt.inputs.len() {
            return Err(WalletError::SigningFailed(format!(
                "expected {} signatures, got {}",
                psbt.inputs.len(),
                signatures.len()
            )));
        }

        let owner = bitcoin::PublicKey::new(*public_key)
            .wpubkey_hash()
            .map(|hash| ScriptBuf::new_p2wpkh(&hash))
            .ok_or_else(|| WalletError::SigningFailed("public key is not compressed".to_string()))?;

        let sighashes = Self::input_sighashes(psbt)?;
        let secp = Secp256k1::verification_only();
        let mut tx = psbt.unsigned_tx.clone();
        let pubkey_bytes = public_key.serialize();

        for (index, (signature, sighash)) in signatures.iter().zip(sighashes.iter()).enumerate() {
            let owned = psbt.inputs[index].witness_utxo.as_ref().map(|u| &u.script_pubkey) == Some(&owner);
            if !owned {
                return Err(WalletError::SigningFailed(format!(
                    "input {} does not belong to the signing key",
                    index
                )));
            }
            let signature = ensure_low_s(signature);
            secp.verify_ecdsa(&Message::from_digest(*sighash), &signature, public_key)
                .map_err(|e| WalletError::SigningFailed(format!("input {} signature invalid: {}", index, e)))?;

            let mut sig_bytes = signature.serialize_der().to_vec();
            sig_bytes.push(EcdsaSighashType::All as u8);
            tx.input[index].witness = Witness::from_slice(&[sig_bytes, pubkey_bytes.to_vec()]);
        }

        debug!(inputs = tx.input.len(), txid = %tx.txid(), "finalized transaction");
        Ok(tx)
    }

    /// In-process signing with a derived key.
    pub fn sign_with_key(psbt: &Psbt, key: &KeyMaterial) -> Result<Transaction, WalletError> {
        let signatures = Self::input_sighashes(psbt)?
            .iter()
            .map(|digest| key.sign_digest(digest).map(|s| s.to_standard()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::finalize_with_signatures(psbt, &signatures, key.public_key())
    }
}

/// BIP-143 script code for a P2WPKH output: the equivalent P2PKH script.
fn p2wpkh_script_code(script_pubkey: &ScriptBuf, index: usize) -> Result<ScriptBuf, WalletError> {
    if !script_pubkey.is_p2wpkh() {
        return Err(WalletError::ValidationError(format!("input {} is not p2wpkh", index)));
    }
    let hash = PubkeyHash::from_slice(&script_pubkey.as_bytes()[2..22])
        .map_err(|e| WalletError::ValidationError(format!("input {} witness program: {}", index, e)))?;
    Ok(ScriptBuf::new_p2pkh(&hash))
}
