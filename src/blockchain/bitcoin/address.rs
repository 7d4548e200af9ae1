//! Bitcoin address生成和validate
//!
//! The enclave only spends from native segwit (P2WPKH) keys, but destinations may be
//! any standard address type valid for the active network.

use crate::core::domain::Network;
use crate::core::errors::WalletError;
use bitcoin::address::{Address, NetworkChecked, Payload};
use bitcoin::consensus::encode::{serialize, VarInt};
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::PublicKey as Secp256k1PublicKey;
use bitcoin::{PublicKey as BitcoinPublicKey, ScriptBuf};
use std::str::FromStr;
use tracing::debug;

const MESSAGE_MAGIC: &[u8] = b"\x18Bitcoin Signed Message:\n";

/// Bitcoin address包装器
pub struct BitcoinAddress;

impl BitcoinAddress {
    /// from公钥生成 SegWit address (P2WPKH)
    pub fn p2wpkh(public_key: &Secp256k1PublicKey, network: Network) -> Result<String, WalletError> {
        let btc_pubkey = BitcoinPublicKey::new(*public_key);
        let address = Address::p2wpkh(&btc_pubkey, network.to_bitcoin())
            .map_err(|e| WalletError::DerivationError(format!("p2wpkh address: {}", e)))?;
        debug!(%address, "derived p2wpkh address");
        Ok(address.to_string())
    }

    /// Parses and checks the address against `network`.
    pub fn parse(address_str: &str, network: Network) -> Result<Address<NetworkChecked>, WalletError> {
        Address::from_str(address_str.trim())
            .map_err(|e| WalletError::ValidationError(format!("invalid bitcoin address: {}", e)))?
            .require_network(network.to_bitcoin())
            .map_err(|_| {
                WalletError::ValidationError(format!(
                    "address {} is not valid on {}",
                    address_str, network
                ))
            })
    }

    pub fn validate(address_str: &str, network: Network) -> bool {
        Self::parse(address_str, network).is_ok()
    }

    pub fn script_pubkey(address_str: &str, network: Network) -> Result<ScriptBuf, WalletError> {
        Ok(Self::parse(address_str, network)?.script_pubkey())
    }

    /// Spendable by this wallet: a version 0 witness program.
    pub fn is_segwit_v0(address: &Address<NetworkChecked>) -> bool {
        match address.payload() {
            Payload::WitnessProgram(program) => program.version().to_num() == 0,
            _ => false,
        }
    }

    /// `"\x18Bitcoin Signed Message:\n" || varint(len) || msg`, double SHA-256.
    pub fn message_digest(message: &[u8]) -> [u8; 32] {
        let mut engine = Vec::with_capacity(MESSAGE_MAGIC.len() + 9 + message.len());
        engine.extend_from_slice(MESSAGE_MAGIC);
        engine.extend_from_slice(&serialize(&VarInt(message.len() as u64)));
        engine.extend_from_slice(message);
        sha256d::Hash::hash(&engine).to_byte_array()
    }
}
