// Copyright (c) 2024 Botho Foundation

//! Signature, hashcash, key-header and auth-token primitives consumed by the repbin message
//! store. Encryption, key agreement, padding and envelope handling belong to a separate
//! message-format module and are not implemented here — this crate only carries the
//! parsing/verification contracts the server core depends on.

pub mod b58;
pub mod error;
pub mod hashcash;
pub mod keyauth;
pub mod keyproof;
pub mod keys;
pub mod packet;
pub mod sign;

pub use error::{CryptoError, CryptoResult};
pub use keys::CURVE25519_KEY_SIZE;
pub use packet::{calc_message_id, calc_message_id_from_envelope, parse_key_header, KEY_HEADER_SIZE};
pub use sign::{verify_signature, SignatureDetails, SIGNER_PUBKEY_SIZE, SIGN_HEADER_SIZE};
