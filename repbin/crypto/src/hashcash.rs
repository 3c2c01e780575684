//! Leading-zero-bit SHA-256 proof of work.
//!
//! The server only ever *verifies* a nonce someone else computed; `compute_nonce` is kept
//! around for test fixtures and the local `--version`/fixture helpers, not the hot path.

use sha2::{Digest, Sha256};

/// Size in bytes of a hashcash nonce.
pub const NONCE_SIZE: usize = 8;

/// Count the number of leading zero bits in a 32-byte digest.
pub fn bit_count(d: &[u8; 32]) -> u8 {
    let mut count = 0u8;
    for &byte in d.iter() {
        if byte == 0 {
            count += 8;
            continue;
        }
        for mask in [0x80u8, 0x40, 0x20, 0x10, 0x08, 0x04, 0x02, 0x01] {
            if byte & mask != 0 {
                break;
            }
            count += 1;
        }
        break;
    }
    count
}

fn digest(d: &[u8], nonce: &[u8; NONCE_SIZE]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(d);
    hasher.update(nonce);
    hasher.finalize().into()
}

/// Returns `(accepted, actual_bits)`. A submission is valid iff its actual bit count is
/// at least `bits` (the reference implementation computes this via `bits - 1` and a
/// strict `>` comparison, which is equivalent).
pub fn test_nonce(d: &[u8], nonce: &[u8; NONCE_SIZE], bits: u8) -> (bool, u8) {
    let threshold = bits.saturating_sub(1);
    let actual = bit_count(&digest(d, nonce));
    (actual > threshold, actual)
}

/// Decode a nonce as a little-endian u64.
pub fn nonce_to_u64(nonce: &[u8; NONCE_SIZE]) -> u64 {
    u64::from_le_bytes(*nonce)
}

/// Brute-force search for a nonce achieving at least `bits` leading zero bits, starting the
/// search counter at `start`. Used only by tests and local fixture generation.
pub fn compute_nonce(d: &[u8], bits: u8, start: u64) -> ([u8; NONCE_SIZE], u64) {
    let mut counter = start;
    loop {
        let nonce = counter.to_le_bytes();
        let (ok, _) = test_nonce(d, &nonce, bits);
        if ok {
            return (nonce, counter);
        }
        counter = counter.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_count_all_zero() {
        assert_eq!(bit_count(&[0u8; 32]), 256);
    }

    #[test]
    fn bit_count_leading_byte() {
        let mut d = [0u8; 32];
        d[0] = 0x0f; // 4 leading zero bits
        assert_eq!(bit_count(&d), 4);
    }

    #[test]
    fn bit_count_first_byte_nonzero() {
        let mut d = [0xffu8; 32];
        d[0] = 0x80;
        assert_eq!(bit_count(&d), 0);
    }

    #[test]
    fn compute_then_verify_round_trips() {
        let data = b"repbin-test-signer-key";
        let (nonce, _) = compute_nonce(data, 8, 0);
        let (ok, bits) = test_nonce(data, &nonce, 8);
        assert!(ok);
        assert!(bits >= 8);
    }

    #[test]
    fn insufficient_bits_rejected() {
        let data = b"repbin-test-signer-key";
        let (nonce, _) = compute_nonce(data, 4, 0);
        let (_, bits) = test_nonce(data, &nonce, 4);
        let (ok, _) = test_nonce(data, &nonce, bits + 4);
        assert!(!ok);
    }
}
