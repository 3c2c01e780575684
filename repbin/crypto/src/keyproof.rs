//! Peer-to-peer proof tokens: a signed `(time, recipient_pub, sender_pub)` record, optionally
//! counter-signed by the recipient to produce a bearer credential for later calls.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::{CryptoError, CryptoResult};

const PUBKEY_SIZE: usize = 32;
const SIGNATURE_SIZE: usize = 64;

/// Size in bytes of an (unsigned payload + signature) proof token.
pub const PROOF_TOKEN_SIZE: usize = 8 + PUBKEY_SIZE + PUBKEY_SIZE + SIGNATURE_SIZE;
/// Maximum base58-encoded length of a proof token.
pub const PROOF_TOKEN_MAX: usize = 186;
/// Size in bytes of a counter-signed proof token.
pub const PROOF_TOKEN_SIGNED_SIZE: usize = PROOF_TOKEN_SIZE + SIGNATURE_SIZE;
/// Maximum base58-encoded length of a counter-signed proof token.
pub const PROOF_TOKEN_SIGNED_MAX: usize = 274;

const PAYLOAD_SIZE: usize = 8 + PUBKEY_SIZE + PUBKEY_SIZE;

fn verifying_key(bytes: &[u8; PUBKEY_SIZE]) -> CryptoResult<VerifyingKey> {
    VerifyingKey::from_bytes(bytes).map_err(|_| CryptoError::BadSignature)
}

/// Build and sign a proof token: `time || recipient_pub || sender_pub || sig`.
pub fn sign_proof_token(
    time: u64,
    recipient_pub: &[u8; PUBKEY_SIZE],
    sender_pub: &[u8; PUBKEY_SIZE],
    sender_key: &SigningKey,
) -> [u8; PROOF_TOKEN_SIZE] {
    let mut payload = [0u8; PAYLOAD_SIZE];
    payload[0..8].copy_from_slice(&time.to_be_bytes());
    payload[8..40].copy_from_slice(recipient_pub);
    payload[40..72].copy_from_slice(sender_pub);

    let signature = sender_key.sign(&payload);

    let mut out = [0u8; PROOF_TOKEN_SIZE];
    out[0..PAYLOAD_SIZE].copy_from_slice(&payload);
    out[PAYLOAD_SIZE..PROOF_TOKEN_SIZE].copy_from_slice(&signature.to_bytes());
    out
}

/// Verify a proof token's signature and that it is addressed to `recipient_pub_test`.
/// Returns `(time, sender_pub)` on success.
pub fn verify_proof_token(
    token: &[u8; PROOF_TOKEN_SIZE],
    recipient_pub_test: &[u8; PUBKEY_SIZE],
) -> CryptoResult<(u64, [u8; PUBKEY_SIZE])> {
    let mut time_bytes = [0u8; 8];
    time_bytes.copy_from_slice(&token[0..8]);
    let time = u64::from_be_bytes(time_bytes);

    let mut recipient_pub = [0u8; PUBKEY_SIZE];
    recipient_pub.copy_from_slice(&token[8..40]);
    let mut sender_pub = [0u8; PUBKEY_SIZE];
    sender_pub.copy_from_slice(&token[40..72]);
    let mut signature_bytes = [0u8; SIGNATURE_SIZE];
    signature_bytes.copy_from_slice(&token[PAYLOAD_SIZE..PROOF_TOKEN_SIZE]);

    let sender_key = verifying_key(&sender_pub)?;
    let signature = Signature::from_bytes(&signature_bytes);
    sender_key
        .verify(&token[0..PAYLOAD_SIZE], &signature)
        .map_err(|_| CryptoError::BadSignature)?;

    if &recipient_pub != recipient_pub_test {
        return Err(CryptoError::WrongRecipient);
    }

    Ok((time, sender_pub))
}

/// Verify a proof token, then append a second signature (by the recipient) over the whole
/// token, producing a bearer credential the sender can present on subsequent calls.
pub fn counter_sign_token(
    token: &[u8; PROOF_TOKEN_SIZE],
    recipient_pub: &[u8; PUBKEY_SIZE],
    recipient_key: &SigningKey,
) -> CryptoResult<[u8; PROOF_TOKEN_SIGNED_SIZE]> {
    verify_proof_token(token, recipient_pub)?;

    let counter_signature = recipient_key.sign(token);

    let mut out = [0u8; PROOF_TOKEN_SIGNED_SIZE];
    out[0..PROOF_TOKEN_SIZE].copy_from_slice(token);
    out[PROOF_TOKEN_SIZE..PROOF_TOKEN_SIGNED_SIZE].copy_from_slice(&counter_signature.to_bytes());
    Ok(out)
}

/// Verify a counter-signed token: both the original sender's signature and the recipient's
/// counter-signature, and that the original sender matches `expected_sender_pub`.
/// Returns the embedded timestamp on success.
pub fn verify_counter_sig(
    signed: &[u8; PROOF_TOKEN_SIGNED_SIZE],
    expected_sender_pub: &[u8; PUBKEY_SIZE],
) -> CryptoResult<u64> {
    let mut token = [0u8; PROOF_TOKEN_SIZE];
    token.copy_from_slice(&signed[0..PROOF_TOKEN_SIZE]);

    let mut receiver_pub = [0u8; PUBKEY_SIZE];
    receiver_pub.copy_from_slice(&token[8..40]);

    let (time, sender_pub_test) = verify_proof_token(&token, &receiver_pub)?;

    let mut outer_signature_bytes = [0u8; SIGNATURE_SIZE];
    outer_signature_bytes.copy_from_slice(&signed[PROOF_TOKEN_SIZE..PROOF_TOKEN_SIGNED_SIZE]);
    let outer_signature = Signature::from_bytes(&outer_signature_bytes);
    let receiver_key = verifying_key(&receiver_pub)?;
    receiver_key
        .verify(&token, &outer_signature)
        .map_err(|_| CryptoError::BadSignature)?;

    if &sender_pub_test != expected_sender_pub {
        return Err(CryptoError::WrongSender);
    }

    Ok(time)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn counter_sign_round_trips() {
        let sender_key = SigningKey::generate(&mut OsRng);
        let recipient_key = SigningKey::generate(&mut OsRng);
        let sender_pub = sender_key.verifying_key().to_bytes();
        let recipient_pub = recipient_key.verifying_key().to_bytes();

        let token = sign_proof_token(1_700_000_000, &recipient_pub, &sender_pub, &sender_key);
        let signed = counter_sign_token(&token, &recipient_pub, &recipient_key).expect("signs");

        let time = verify_counter_sig(&signed, &sender_pub).expect("verifies");
        assert_eq!(time, 1_700_000_000);
    }

    #[test]
    fn tampering_breaks_verification() {
        let sender_key = SigningKey::generate(&mut OsRng);
        let recipient_key = SigningKey::generate(&mut OsRng);
        let sender_pub = sender_key.verifying_key().to_bytes();
        let recipient_pub = recipient_key.verifying_key().to_bytes();

        let token = sign_proof_token(1_700_000_000, &recipient_pub, &sender_pub, &sender_key);
        let mut signed =
            counter_sign_token(&token, &recipient_pub, &recipient_key).expect("signs");
        signed[0] ^= 0xff;

        assert!(verify_counter_sig(&signed, &sender_pub).is_err());
    }

    #[test]
    fn wrong_recipient_rejected() {
        let sender_key = SigningKey::generate(&mut OsRng);
        let wrong_recipient = SigningKey::generate(&mut OsRng);
        let sender_pub = sender_key.verifying_key().to_bytes();
        let recipient_pub = [0u8; PUBKEY_SIZE];

        let token = sign_proof_token(1, &recipient_pub, &sender_pub, &sender_key);
        let err = verify_proof_token(&token, &wrong_recipient.verifying_key().to_bytes())
            .unwrap_err();
        assert_eq!(err, CryptoError::WrongRecipient);
    }
}
