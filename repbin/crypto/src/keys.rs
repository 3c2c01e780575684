//! Curve25519 key helpers: generation, Diffie-Hellman, and the `sync`/`hidden` policy bits
//! encoded in the most-significant byte of a recipient's constant public key.

use rand_core::{OsRng, RngCore};
use x25519_dalek::{PublicKey, StaticSecret};

/// Size in bytes of a curve25519 key (public or private).
pub const CURVE25519_KEY_SIZE: usize = 32;

/// Bit in `key[0]` marking a key as "hidden" (index access requires proof of possession).
const HIDDEN_BIT: u8 = 0x80;
/// Bit in `key[0]` marking a key as "sync" (messages appear in the global index).
const SYNC_BIT: u8 = 0x40;

/// Whether the recipient key's policy bits mark it hidden.
pub fn key_is_hidden(k: &[u8; CURVE25519_KEY_SIZE]) -> bool {
    k[0] & HIDDEN_BIT == HIDDEN_BIT
}

/// Whether the recipient key's policy bits mark it sync-eligible.
pub fn key_is_sync(k: &[u8; CURVE25519_KEY_SIZE]) -> bool {
    k[0] & SYNC_BIT == SYNC_BIT
}

/// Derive the public key matching a curve25519 private key.
pub fn gen_pub_key(private: &[u8; CURVE25519_KEY_SIZE]) -> [u8; CURVE25519_KEY_SIZE] {
    let secret = StaticSecret::from(*private);
    PublicKey::from(&secret).to_bytes()
}

/// Generate a uniformly random curve25519 private key.
pub fn gen_random_key() -> [u8; CURVE25519_KEY_SIZE] {
    let mut bytes = [0u8; CURVE25519_KEY_SIZE];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a long-term private key whose *public* key carries the requested policy bits.
/// Uses rejection sampling (regenerate until the derived public key's MSB matches), exactly
/// as the reference implementation does, since the policy bits are plain bits of a
/// Montgomery-form public key and cannot be forced analytically.
pub fn gen_long_term_key(hidden: bool, sync: bool) -> [u8; CURVE25519_KEY_SIZE] {
    loop {
        let candidate = gen_random_key();
        let public = gen_pub_key(&candidate);
        if key_is_hidden(&public) == hidden && key_is_sync(&public) == sync {
            return candidate;
        }
    }
}

/// Diffie-Hellman: `DH(our_priv, their_pub)`.
pub fn dh(
    private: &[u8; CURVE25519_KEY_SIZE],
    public: &[u8; CURVE25519_KEY_SIZE],
) -> [u8; CURVE25519_KEY_SIZE] {
    let secret = StaticSecret::from(*private);
    let their_public = PublicKey::from(*public);
    secret.diffie_hellman(&their_public).to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dh_is_symmetric() {
        let a_priv = gen_random_key();
        let b_priv = gen_random_key();
        let a_pub = gen_pub_key(&a_priv);
        let b_pub = gen_pub_key(&b_priv);
        assert_eq!(dh(&a_priv, &b_pub), dh(&b_priv, &a_pub));
    }

    #[test]
    fn long_term_key_carries_policy_bits() {
        let priv_key = gen_long_term_key(true, false);
        let pub_key = gen_pub_key(&priv_key);
        assert!(key_is_hidden(&pub_key));
        assert!(!key_is_sync(&pub_key));
    }
}
