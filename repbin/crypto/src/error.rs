//! Error types for the crypto module.

use displaydoc::Display;
use thiserror::Error;

/// Errors surfaced by signature, hashcash, key-header and auth-token verification.
#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// sign header has unexpected length: got {0}, want {1}
    BadLength(usize, usize),
    /// sign header has an unsupported version byte: {0}
    BadVersion(u8),
    /// hashcash proof-of-work insufficient: got {0} bits, wanted at least {1}
    HashCashInsufficient(u8, u8),
    /// ed25519 signature verification failed
    BadSignature,
    /// key header has unexpected length: got {0}, want {1}
    BadKeyHeaderLength(usize, usize),
    /// proof token has unexpected length: got {0}, want {1}
    BadProofTokenLength(usize, usize),
    /// proof token is not addressed to the expected recipient
    WrongRecipient,
    /// counter-signature sender key does not match the expected sender
    WrongSender,
}

pub type CryptoResult<T> = Result<T, CryptoError>;
