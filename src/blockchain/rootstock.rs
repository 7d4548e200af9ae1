//! Rootstock (EVM) addresses and personal-message digests.

use bitcoin::secp256k1::PublicKey;
use sha3::{Digest, Keccak256};

/// EIP-55 checksummed address of the Keccak-256 hash of the uncompressed key.
pub fn address_from_public_key(public_key: &PublicKey) -> String {
    let uncompressed = public_key.serialize_uncompressed();
    let hash = Keccak256::digest(&uncompressed[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..]);
    to_checksum_address(&address)
}

pub fn to_checksum_address(address: &[u8; 20]) -> String {
    let lower = hex::encode(address);
    let hash = Keccak256::digest(lower.as_bytes());
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let shift = if i % 2 == 0 { 4 } else { 0 };
        let nibble = (hash[i / 2] >> shift) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// `0x` + 40 hex chars; mixed-case input must carry a valid EIP-55 checksum.
pub fn is_valid_address(address: &str) -> bool {
    let Some(body) = address.strip_prefix("0x") else {
        return false;
    };
    if body.len() != 40 {
        return false;
    }
    let Ok(bytes) = hex::decode(body) else {
        return false;
    };
    let all_lower = body.chars().all(|c| !c.is_ascii_uppercase());
    let all_upper = body.chars().all(|c| !c.is_ascii_lowercase());
    if all_lower || all_upper {
        return true;
    }
    let mut raw = [0u8; 20];
    raw.copy_from_slice(&bytes);
    to_checksum_address(&raw) == address
}

/// EIP-191 personal message hash.
pub fn personal_message_digest(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eip55_reference_vectors() {
        for expected in [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
        ] {
            let raw: [u8; 20] = hex::decode(&expected[2..]).unwrap().try_into().unwrap();
            assert_eq!(to_checksum_address(&raw), expected);
            assert!(is_valid_address(expected));
        }
    }

    #[test]
    fn test_bad_checksum_rejected() {
        assert!(!is_valid_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD"));
        assert!(is_valid_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"));
        assert!(!is_valid_address("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"));
        assert!(!is_valid_address("0x5aaeb6053f"));
    }

    #[test]
    fn test_personal_message_digest_prefix() {
        let mut manual = Keccak256::new();
        manual.update(b"\x19Ethereum Signed Message:\n11hello world");
        let expected: [u8; 32] = manual.finalize().into();
        assert_eq!(personal_message_digest(b"hello world"), expected);
        assert_ne!(personal_message_digest(b"hello world"), personal_message_digest(b"hello worlD"));
    }
}
