//! Stacks addresses (c32check) and message digests.

use crate::core::domain::Network;
use crate::core::errors::WalletError;
use bitcoin::consensus::encode::{serialize, VarInt};
use bitcoin::hashes::{hash160, sha256, sha256d, Hash};
use bitcoin::secp256k1::PublicKey;

const C32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";
const MESSAGE_MAGIC: &[u8] = b"\x17Stacks Signed Message:\n";

/// Single-sig P2PKH versions.
pub const MAINNET_SINGLE_SIG: u8 = 22;
pub const TESTNET_SINGLE_SIG: u8 = 26;

pub fn version_for(network: Network) -> u8 {
    if network.is_mainnet() {
        MAINNET_SINGLE_SIG
    } else {
        TESTNET_SINGLE_SIG
    }
}

pub fn address_from_public_key(public_key: &PublicKey, network: Network) -> String {
    let hash = hash160::Hash::hash(&public_key.serialize()).to_byte_array();
    c32_address(version_for(network), &hash)
}

/// `S` + version char + c32(hash160 || checksum).
pub fn c32_address(version: u8, hash160: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(24);
    payload.extend_from_slice(hash160);
    payload.extend_from_slice(&checksum(version, hash160));
    format!("S{}{}", C32_ALPHABET[(version & 0x1f) as usize] as char, c32_encode(&payload))
}

/// Returns `(version, hash160)` after verifying the checksum.
pub fn parse_address(address: &str) -> Result<(u8, [u8; 20]), WalletError> {
    let invalid = || WalletError::ValidationError(format!("invalid stacks address: {}", address));
    let rest = address.strip_prefix('S').ok_or_else(invalid)?;
    let mut chars = rest.chars();
    let version_char = chars.next().ok_or_else(invalid)?;
    let version = c32_value(version_char).ok_or_else(invalid)?;
    let data = c32_decode(chars.as_str()).ok_or_else(invalid)?;
    if data.len() != 24 {
        return Err(invalid());
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&data[..20]);
    if data[20..] != checksum(version, &hash) {
        return Err(invalid());
    }
    Ok((version, hash))
}

/// SHA-256 over `"\x17Stacks Signed Message:\n" || varint(len) || msg`.
pub fn message_digest(message: &[u8]) -> [u8; 32] {
    let mut buf = Vec::with_capacity(MESSAGE_MAGIC.len() + 9 + message.len());
    buf.extend_from_slice(MESSAGE_MAGIC);
    buf.extend_from_slice(&serialize(&VarInt(message.len() as u64)));
    buf.extend_from_slice(message);
    sha256::Hash::hash(&buf).to_byte_array()
}

fn checksum(version: u8, hash160: &[u8; 20]) -> [u8; 4] {
    let mut buf = Vec::with_capacity(21);
    buf.push(version);
    buf.extend_from_slice(hash160);
    let digest = sha256d::Hash::hash(&buf).to_byte_array();
    [digest[0], digest[1], digest[2], digest[3]]
}

fn c32_value(c: char) -> Option<u8> {
    let c = match c.to_ascii_uppercase() {
        'O' => '0',
        'L' | 'I' => '1',
        other => other,
    };
    C32_ALPHABET.iter().position(|&a| a as char == c).map(|p| p as u8)
}

/// Crockford-style base32, consumed from the least significant end, with leading
/// zero bytes preserved as leading `0` characters.
fn c32_encode(input: &[u8]) -> String {
    let mut result = Vec::with_capacity(input.len() * 8 / 5 + 1);
    let mut carry: u8 = 0;
    let mut carry_bits: u8 = 0;

    for &byte in input.iter().rev() {
        let low_bits_to_take = 5 - carry_bits;
        let low_bits = byte & ((1u8 << low_bits_to_take) - 1);
        result.push(C32_ALPHABET[((low_bits << carry_bits) + carry) as usize]);
        carry_bits = 8 + carry_bits - 5;
        carry = byte >> (8 - carry_bits);

        if carry_bits >= 5 {
            result.push(C32_ALPHABET[(carry & 0x1f) as usize]);
            carry_bits -= 5;
            carry >>= 5;
        }
    }
    if carry_bits > 0 {
        result.push(C32_ALPHABET[carry as usize]);
    }

    while result.last() == Some(&C32_ALPHABET[0]) {
        result.pop();
    }
    for _ in input.iter().take_while(|&&b| b == 0) {
        result.push(C32_ALPHABET[0]);
    }

    result.reverse();
    result.into_iter().map(char::from).collect()
}

fn c32_decode(input: &str) -> Option<Vec<u8>> {
    let mut result = Vec::with_capacity(input.len() * 5 / 8 + 1);
    let mut carry: u16 = 0;
    let mut carry_bits: u8 = 0;

    for c in input.chars().rev() {
        carry |= (c32_value(c)? as u16) << carry_bits;
        carry_bits += 5;
        if carry_bits >= 8 {
            result.push((carry & 0xff) as u8);
            carry_bits -= 8;
            carry >>= 8;
        }
    }
    if carry_bits > 0 {
        result.push(carry as u8);
    }

    while result.last() == Some(&0) {
        result.pop();
    }
    for _ in input.chars().take_while(|&c| c == '0') {
        result.push(0);
    }

    result.reverse();
    Some(result)
}
