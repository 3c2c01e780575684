//! Ephemeral time-derived curve25519 challenge/answer, used to gate index access to
//! "hidden" recipient keys on proof of possession of the matching private key.

use sha2::{Digest, Sha256};

use crate::keys::{dh, gen_pub_key, CURVE25519_KEY_SIZE};

/// Size in bytes of a challenge (`time || ephemeral_pub`).
pub const CHALLENGE_SIZE: usize = 8 + CURVE25519_KEY_SIZE;
/// Size in bytes of an answer (`challenge || hash`).
pub const ANSWER_SIZE: usize = CHALLENGE_SIZE + 32;

fn gen_temp_key(time_bytes: &[u8; 8], secret: &[u8; CURVE25519_KEY_SIZE]) -> (
    [u8; CURVE25519_KEY_SIZE],
    [u8; CURVE25519_KEY_SIZE],
    [u8; CHALLENGE_SIZE],
) {
    let mut hash_in = [0u8; 80];
    hash_in[0..8].copy_from_slice(time_bytes);
    hash_in[8..40].copy_from_slice(secret);
    hash_in[40..48].copy_from_slice(time_bytes);
    hash_in[48..80].copy_from_slice(secret);

    let ephemeral_priv: [u8; CURVE25519_KEY_SIZE] = Sha256::digest(hash_in).into();
    let ephemeral_pub = gen_pub_key(&ephemeral_priv);

    let mut challenge = [0u8; CHALLENGE_SIZE];
    challenge[0..8].copy_from_slice(time_bytes);
    challenge[8..CHALLENGE_SIZE].copy_from_slice(&ephemeral_pub);

    (ephemeral_priv, ephemeral_pub, challenge)
}

/// Derive a time-bound ephemeral key pair and the challenge bytes to hand to a client.
pub fn gen_temp_key_time(
    time: u64,
    secret: &[u8; CURVE25519_KEY_SIZE],
) -> (
    [u8; CURVE25519_KEY_SIZE],
    [u8; CURVE25519_KEY_SIZE],
    [u8; CHALLENGE_SIZE],
) {
    gen_temp_key(&time.to_be_bytes(), secret)
}

/// Produce an answer to a challenge, proving possession of `secret` (the recipient's
/// private key) without revealing it.
pub fn answer(
    challenge: &[u8; CHALLENGE_SIZE],
    secret: &[u8; CURVE25519_KEY_SIZE],
) -> [u8; ANSWER_SIZE] {
    let mut ephemeral_pub = [0u8; CURVE25519_KEY_SIZE];
    ephemeral_pub.copy_from_slice(&challenge[8..CHALLENGE_SIZE]);
    let shared = dh(secret, &ephemeral_pub);

    let mut hash_in = Vec::with_capacity(CHALLENGE_SIZE + CURVE25519_KEY_SIZE);
    hash_in.extend_from_slice(challenge);
    hash_in.extend_from_slice(&shared);
    let digest: [u8; 32] = Sha256::digest(&hash_in).into();

    let mut out = [0u8; ANSWER_SIZE];
    out[0..CHALLENGE_SIZE].copy_from_slice(challenge);
    out[CHALLENGE_SIZE..ANSWER_SIZE].copy_from_slice(&digest);
    out
}

/// Verify an answer against the server's own secret `S` and the public key the requester
/// claims to control.
pub fn verify(
    answer: &[u8; ANSWER_SIZE],
    secret: &[u8; CURVE25519_KEY_SIZE],
    test_key: &[u8; CURVE25519_KEY_SIZE],
) -> bool {
    let mut time_bytes = [0u8; 8];
    time_bytes.copy_from_slice(&answer[0..8]);
    let in_hash = &answer[CHALLENGE_SIZE..ANSWER_SIZE];

    let (ephemeral_priv, _, out_challenge) = gen_temp_key(&time_bytes, secret);
    if out_challenge != answer[0..CHALLENGE_SIZE] {
        return false;
    }

    let shared = dh(&ephemeral_priv, test_key);
    let mut hash_in = Vec::with_capacity(CHALLENGE_SIZE + CURVE25519_KEY_SIZE);
    hash_in.extend_from_slice(&out_challenge);
    hash_in.extend_from_slice(&shared);
    let expected: [u8; 32] = Sha256::digest(&hash_in).into();

    expected.as_slice() == in_hash
}

/// Reject answers whose embedded timestamp is outside `[now - range, now + range]`.
pub fn verify_time(answer: &[u8; ANSWER_SIZE], now: i64, time_range: u64) -> bool {
    let mut time_bytes = [0u8; 8];
    time_bytes.copy_from_slice(&answer[0..8]);
    let challenge_time = u64::from_be_bytes(time_bytes) as i64;
    let range = time_range as i64;
    now + range > challenge_time && now - range < challenge_time
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::gen_random_key;

    #[test]
    fn answer_verifies_against_matching_secret() {
        let server_secret = gen_random_key();
        let recipient_priv = gen_random_key();
        let recipient_pub = gen_pub_key(&recipient_priv);

        let (_, _, challenge) = gen_temp_key_time(1_700_000_000, &server_secret);
        let ans = answer(&challenge, &recipient_priv);
        assert!(verify(&ans, &server_secret, &recipient_pub));
    }

    #[test]
    fn answer_rejects_wrong_key() {
        let server_secret = gen_random_key();
        let recipient_priv = gen_random_key();
        let wrong_pub = gen_pub_key(&gen_random_key());

        let (_, _, challenge) = gen_temp_key_time(1_700_000_000, &server_secret);
        let ans = answer(&challenge, &recipient_priv);
        assert!(!verify(&ans, &server_secret, &wrong_pub));
    }

    #[test]
    fn verify_time_bounds() {
        let server_secret = gen_random_key();
        let (_, _, challenge) = gen_temp_key_time(1_000_000, &server_secret);
        let ans = answer(&challenge, &gen_random_key());
        assert!(verify_time(&ans, 1_000_030, 60));
        assert!(!verify_time(&ans, 1_000_200, 60));
    }
}
