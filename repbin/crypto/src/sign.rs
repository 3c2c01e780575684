//! Signature-header parsing and verification.
//!
//! Wire layout of the 137-byte signature header, a fixed-size prefix of every message
//! envelope: `version(1) || signer_pubkey(32) || hashcash_nonce(8) || signature(64) ||
//! message_id(32)`.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::error::{CryptoError, CryptoResult};
use crate::hashcash::{self, NONCE_SIZE};

/// Size in bytes of an ed25519 signer public key.
pub const SIGNER_PUBKEY_SIZE: usize = 32;
/// Size in bytes of the fixed signature header.
pub const SIGN_HEADER_SIZE: usize = 1 + SIGNER_PUBKEY_SIZE + NONCE_SIZE + 64 + 32;

const VERSION: u8 = 0x01;

const PUBKEY_RANGE: std::ops::Range<usize> = 1..33;
const NONCE_RANGE: std::ops::Range<usize> = 33..41;
const SIGNATURE_RANGE: std::ops::Range<usize> = 41..105;
const MSG_ID_RANGE: std::ops::Range<usize> = 105..137;

/// The fields recovered from a verified signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureDetails {
    pub msg_id: [u8; 32],
    pub public_key: [u8; SIGNER_PUBKEY_SIZE],
    pub hashcash_nonce: [u8; NONCE_SIZE],
    pub hashcash_bits: u8,
}

/// Verify a signature header: hashcash proof of work over `public_key || nonce`, then an
/// ed25519 signature by that key over the embedded message id.
pub fn verify_signature(header: &[u8], min_bits: u8) -> CryptoResult<SignatureDetails> {
    if header.len() != SIGN_HEADER_SIZE {
        return Err(CryptoError::BadLength(header.len(), SIGN_HEADER_SIZE));
    }
    if header[0] != VERSION {
        return Err(CryptoError::BadVersion(header[0]));
    }

    let mut public_key = [0u8; SIGNER_PUBKEY_SIZE];
    public_key.copy_from_slice(&header[PUBKEY_RANGE]);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&header[NONCE_RANGE]);
    let mut signature_bytes = [0u8; 64];
    signature_bytes.copy_from_slice(&header[SIGNATURE_RANGE]);
    let mut msg_id = [0u8; 32];
    msg_id.copy_from_slice(&header[MSG_ID_RANGE]);

    let (ok, bits) = hashcash::test_nonce(&public_key, &nonce, min_bits);
    if !ok {
        return Err(CryptoError::HashCashInsufficient(bits, min_bits));
    }

    let verifying_key =
        VerifyingKey::from_bytes(&public_key).map_err(|_| CryptoError::BadSignature)?;
    let signature = Signature::from_bytes(&signature_bytes);
    verifying_key
        .verify(&msg_id, &signature)
        .map_err(|_| CryptoError::BadSignature)?;

    Ok(SignatureDetails {
        msg_id,
        public_key,
        hashcash_nonce: nonce,
        hashcash_bits: bits,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashcash::compute_nonce;
    use ed25519_dalek::{Signer, SigningKey};
    use rand_core::OsRng;

    fn build_header(bits: u8, msg_id: [u8; 32]) -> (Vec<u8>, SigningKey) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = signing_key.verifying_key().to_bytes();
        let (nonce, _) = compute_nonce(&public_key, bits, 0);
        let signature = signing_key.sign(&msg_id);

        let mut header = Vec::with_capacity(SIGN_HEADER_SIZE);
        header.push(0x01);
        header.extend_from_slice(&public_key);
        header.extend_from_slice(&nonce);
        header.extend_from_slice(&signature.to_bytes());
        header.extend_from_slice(&msg_id);
        (header, signing_key)
    }

    #[test]
    fn verifies_well_formed_header() {
        let msg_id = [7u8; 32];
        let (header, signing_key) = build_header(8, msg_id);
        let details = verify_signature(&header, 8).expect("should verify");
        assert_eq!(details.msg_id, msg_id);
        assert_eq!(details.public_key, signing_key.verifying_key().to_bytes());
        assert!(details.hashcash_bits >= 8);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = verify_signature(&[0u8; 10], 8).unwrap_err();
        assert_eq!(err, CryptoError::BadLength(10, SIGN_HEADER_SIZE));
    }

    #[test]
    fn rejects_insufficient_hashcash() {
        let (header, _) = build_header(4, [1u8; 32]);
        let err = verify_signature(&header, 20).unwrap_err();
        assert!(matches!(err, CryptoError::HashCashInsufficient(_, 20)));
    }

    #[test]
    fn rejects_tampered_signature() {
        let (mut header, _) = build_header(8, [2u8; 32]);
        let last = header.len() - 1;
        header[last] ^= 0xff;
        let err = verify_signature(&header, 8).unwrap_err();
        assert!(matches!(err, CryptoError::BadSignature));
    }
}
