//! Thin wrappers around `bth_repbin_crypto::keyproof` for the two directions peer auth runs
//! in: we counter-sign tokens peers hand us on `/notify`, and we authenticate tokens peers
//! hand back to us on `/globalindex`/`/fetch`.

use ed25519_dalek::{Signature, SigningKey, Verifier, VerifyingKey};

use bth_repbin_crypto::b58;
use bth_repbin_crypto::keyproof::{
    self, PROOF_TOKEN_SIGNED_SIZE, PROOF_TOKEN_SIZE,
};

use crate::error::{PeerError, PeerResult};

/// Sign a fresh proof token addressed to `recipient_pub`, as the first leg of a notify call.
pub fn sign_proof_token(
    now: u64,
    recipient_pub: &[u8; 32],
    sender_pub: &[u8; 32],
    sender_key: &SigningKey,
) -> [u8; PROOF_TOKEN_SIZE] {
    keyproof::sign_proof_token(now, recipient_pub, sender_pub, sender_key)
}

/// Encode a proof token as the base58 string carried in the `/notify` request.
pub fn encode_token(token: &[u8]) -> String {
    b58::encode(token)
}

/// Handle an inbound `/notify`: verify the token is addressed to us, counter-sign it, and
/// return both the counter-signed bytes (stored against the peer row) and the sender's
/// public key (to check against the known-peer list before trusting it).
pub fn receive_notify(
    token_b58: &str,
    our_pub: &[u8; 32],
    our_key: &SigningKey,
) -> PeerResult<([u8; PROOF_TOKEN_SIGNED_SIZE], [u8; 32])> {
    let bytes = b58::decode(token_b58).map_err(|_| PeerError::BadResponse)?;
    if bytes.len() != PROOF_TOKEN_SIZE {
        return Err(PeerError::BadResponse);
    }
    let mut token = [0u8; PROOF_TOKEN_SIZE];
    token.copy_from_slice(&bytes);

    let (_time, sender_pub) = keyproof::verify_proof_token(&token, our_pub)?;
    let signed = keyproof::counter_sign_token(&token, our_pub, our_key)?;
    Ok((signed, sender_pub))
}

/// Authenticate a bearer token a peer presents on `/globalindex`/`/fetch`: the token must be
/// addressed to us and carry our own counter-signature (proof we issued it on a prior
/// `/notify`). Unlike `verify_counter_sig`, the original sender is not known ahead of time —
/// it is recovered from the token and handed back for the caller to check against its list
/// of known peers. Returns `(embedded_time, original_sender_pub)`.
pub fn authenticate_peer(token_b58: &str, our_pub: &[u8; 32]) -> PeerResult<(u64, [u8; 32])> {
    let bytes = b58::decode(token_b58).map_err(|_| PeerError::BadResponse)?;
    if bytes.len() != PROOF_TOKEN_SIGNED_SIZE {
        return Err(PeerError::BadResponse);
    }
    let mut token = [0u8; PROOF_TOKEN_SIZE];
    token.copy_from_slice(&bytes[0..PROOF_TOKEN_SIZE]);
    let mut outer_sig_bytes = [0u8; 64];
    outer_sig_bytes.copy_from_slice(&bytes[PROOF_TOKEN_SIZE..PROOF_TOKEN_SIGNED_SIZE]);

    let (time, sender_pub) = keyproof::verify_proof_token(&token, our_pub)?;

    let our_verifying = VerifyingKey::from_bytes(our_pub).map_err(|_| PeerError::BadResponse)?;
    let outer_sig = Signature::from_bytes(&outer_sig_bytes);
    our_verifying
        .verify(&token, &outer_sig)
        .map_err(|_| PeerError::Auth(bth_repbin_crypto::CryptoError::BadSignature))?;

    Ok((time, sender_pub))
}

/// Reject `time` unless it falls in `[now - age - skew, now + age + skew]`.
pub fn check_freshness(time: u64, now: u64, max_age: u64, max_skew: u64) -> PeerResult<()> {
    let slack = max_age + max_skew;
    let lower = now.saturating_sub(slack);
    let upper = now + slack;
    if time < lower || time > upper {
        return Err(PeerError::Stale);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn notify_then_authenticate_round_trips() {
        let peer_key = SigningKey::generate(&mut OsRng);
        let our_key = SigningKey::generate(&mut OsRng);
        let peer_pub = peer_key.verifying_key().to_bytes();
        let our_pub = our_key.verifying_key().to_bytes();

        let token = sign_proof_token(1_700_000_000, &our_pub, &peer_pub, &peer_key);
        let encoded = encode_token(&token);

        let (signed, sender_pub) = receive_notify(&encoded, &our_pub, &our_key).expect("notify accepted");
        assert_eq!(sender_pub, peer_pub);

        let bearer = encode_token(&signed);
        let (time, sender_pub2) = authenticate_peer(&bearer, &our_pub).expect("bearer accepted");
        assert_eq!(time, 1_700_000_000);
        assert_eq!(sender_pub2, peer_pub);
    }

    #[test]
    fn freshness_window_rejects_stale_timestamps() {
        assert!(check_freshness(1000, 1000, 60, 10).is_ok());
        assert!(check_freshness(1000, 2000, 60, 10).is_err());
    }
}
