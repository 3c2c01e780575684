//! Key-header packing/parsing and message-id computation.
//!
//! Wire layout of the 160-byte key header that immediately follows the signature header:
//! `sender_constant(32) || sender_temporary(32) || receiver_constant(32) ||
//! receiver_temporary(32) || nonce(32)`.

use sha2::{Digest, Sha256};

use crate::error::{CryptoError, CryptoResult};
use crate::keys::CURVE25519_KEY_SIZE;
use crate::sign::SIGN_HEADER_SIZE;

/// Size in bytes of the key header.
pub const KEY_HEADER_SIZE: usize = CURVE25519_KEY_SIZE * 4 + 32;

/// The two curve25519 key pairs (constant + temporary/ephemeral) one side of a conversation
/// presents in the key header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPair {
    pub constant_pub_key: [u8; CURVE25519_KEY_SIZE],
    pub temporary_pub_key: [u8; CURVE25519_KEY_SIZE],
}

/// The parsed contents of a key header: sender keys, receiver keys, and the message nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedKeyHeader {
    pub sender_keys: KeyPair,
    pub receiver_keys: KeyPair,
    pub nonce: [u8; 32],
}

/// Pack a key header from sender keys, receiver keys, and a nonce.
pub fn pack_key_header(
    sender_keys: &KeyPair,
    receiver_keys: &KeyPair,
    nonce: &[u8; 32],
) -> [u8; KEY_HEADER_SIZE] {
    let mut out = [0u8; KEY_HEADER_SIZE];
    out[0..32].copy_from_slice(&sender_keys.constant_pub_key);
    out[32..64].copy_from_slice(&sender_keys.temporary_pub_key);
    out[64..96].copy_from_slice(&receiver_keys.constant_pub_key);
    out[96..128].copy_from_slice(&receiver_keys.temporary_pub_key);
    out[128..160].copy_from_slice(nonce);
    out
}

/// Parse a key header out of its 160-byte wire form.
pub fn parse_key_header(bytes: &[u8]) -> CryptoResult<ParsedKeyHeader> {
    if bytes.len() != KEY_HEADER_SIZE {
        return Err(CryptoError::BadKeyHeaderLength(bytes.len(), KEY_HEADER_SIZE));
    }
    let mut read = |range: std::ops::Range<usize>| -> [u8; CURVE25519_KEY_SIZE] {
        let mut buf = [0u8; CURVE25519_KEY_SIZE];
        buf.copy_from_slice(&bytes[range]);
        buf
    };
    let sender_constant = read(0..32);
    let sender_temporary = read(32..64);
    let receiver_constant = read(64..96);
    let receiver_temporary = read(96..128);
    let mut nonce = [0u8; 32];
    nonce.copy_from_slice(&bytes[128..160]);

    Ok(ParsedKeyHeader {
        sender_keys: KeyPair {
            constant_pub_key: sender_constant,
            temporary_pub_key: sender_temporary,
        },
        receiver_keys: KeyPair {
            constant_pub_key: receiver_constant,
            temporary_pub_key: receiver_temporary,
        },
        nonce,
    })
}

/// Compute a message's content-addressed id: `sha256(key_header || body)`, i.e. everything
/// in the envelope after the fixed-size signature header.
pub fn calc_message_id(after_sign_header: &[u8]) -> [u8; 32] {
    Sha256::digest(after_sign_header).into()
}

/// Compute a message id given the full envelope (signature header + key header + body).
pub fn calc_message_id_from_envelope(envelope: &[u8]) -> CryptoResult<[u8; 32]> {
    if envelope.len() < SIGN_HEADER_SIZE {
        return Err(CryptoError::BadLength(envelope.len(), SIGN_HEADER_SIZE));
    }
    Ok(calc_message_id(&envelope[SIGN_HEADER_SIZE..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> [u8; CURVE25519_KEY_SIZE] {
        [byte; CURVE25519_KEY_SIZE]
    }

    #[test]
    fn pack_parse_round_trip() {
        let sender = KeyPair {
            constant_pub_key: key(1),
            temporary_pub_key: key(2),
        };
        let receiver = KeyPair {
            constant_pub_key: key(3),
            temporary_pub_key: key(4),
        };
        let nonce = [9u8; 32];
        let packed = pack_key_header(&sender, &receiver, &nonce);
        let parsed = parse_key_header(&packed).expect("parses");
        assert_eq!(parsed.sender_keys, sender);
        assert_eq!(parsed.receiver_keys, receiver);
        assert_eq!(parsed.nonce, nonce);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = parse_key_header(&[0u8; 10]).unwrap_err();
        assert_eq!(err, CryptoError::BadKeyHeaderLength(10, KEY_HEADER_SIZE));
    }

    #[test]
    fn message_id_is_deterministic() {
        let body = b"hello world";
        assert_eq!(calc_message_id(body), calc_message_id(body));
    }
}
