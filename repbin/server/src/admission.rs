// Copyright (c) 2024 Botho Foundation

//! The glue tying storage, message-store business logic, and crypto verification together
//! for an incoming post (§4.G): size check, signature/hashcash verification, key-header
//! parse, message-id match, hashcash→quota mapping, then admission.
//!
//! Operates on raw envelope bytes throughout. Base64 framing and the encrypted-body format
//! are the client-side message format's concern, not this pipeline's — see the crate-level
//! docs and DESIGN.md for why no `decode_base64` step appears here.

use bth_repbin_crypto::{keys, packet, sign};
use bth_repbin_messagestore::{MessageStore, PutOutcome};
use bth_repbin_store::{NewMessage, SignerCapability};

use crate::config::ServerConfig;
use crate::error::{HandlerError, HandlerResult};

/// Run one envelope through the full admission pipeline. `distance` is 0 for a directly
/// posted message and the peer's reported distance (or 1 greater) when re-admitting
/// something pulled in via gossip.
pub fn admit(
    message_store: &MessageStore,
    config: &ServerConfig,
    body: &[u8],
    one_time: bool,
    expire_request: i64,
    distance: i64,
) -> HandlerResult<PutOutcome> {
    if body.len() > config.max_post_size {
        return Err(HandlerError::PostTooBig);
    }
    if body.len() < config.min_post_size {
        return Err(HandlerError::PostTooSmall);
    }
    if body.len() < sign::SIGN_HEADER_SIZE + packet::KEY_HEADER_SIZE {
        return Err(HandlerError::BadParam);
    }

    let sign_header = &body[..sign::SIGN_HEADER_SIZE];
    let details = sign::verify_signature(sign_header, config.min_hashcash_bits)?;

    let key_header = &body[sign::SIGN_HEADER_SIZE..sign::SIGN_HEADER_SIZE + packet::KEY_HEADER_SIZE];
    let parsed = packet::parse_key_header(key_header)?;

    let computed_id = packet::calc_message_id_from_envelope(body)?;
    if computed_id != details.msg_id {
        return Err(HandlerError::BadMessageId);
    }

    let recipient = parsed.receiver_keys.constant_pub_key;
    let hidden = keys::key_is_hidden(&recipient);
    let sync = keys::key_is_sync(&recipient);

    let cap = quota_for_bits(details.hashcash_bits, config);
    let signer = SignerCapability {
        public_key: details.public_key,
        nonce: details.hashcash_nonce,
        bits: details.hashcash_bits as i32,
        max_messages_posted: cap.max_posted,
        max_messages_retained: cap.max_retained,
        expire_target: cap.expire_target,
    };

    let msg = NewMessage {
        message_id: details.msg_id,
        receiver_constant_pub_key: recipient,
        signer_pub: details.public_key,
        expire_request,
        distance,
        one_time,
        sync,
        hidden,
    };

    Ok(message_store.put_notify(&msg, &signer, body)?)
}

struct Quota {
    max_posted: i64,
    max_retained: i64,
    expire_target: i64,
}

/// Hashcash → quota mapping (§4.G). `verify_signature` already refused anything below the
/// floor, so `extra` here is always `>= 0`.
fn quota_for_bits(bits: u8, config: &ServerConfig) -> Quota {
    let extra = i32::from(bits) - i32::from(config.min_hashcash_bits);
    if extra < config.step_limit {
        return Quota {
            max_posted: 1,
            max_retained: 1,
            expire_target: config.min_store_time,
        };
    }
    let raise = (f64::from(extra - config.step_limit) * 1.33).exp2().ceil() as i64;
    Quota {
        max_posted: raise + 2,
        max_retained: raise + 2,
        expire_target: std::cmp::min(raise * config.min_store_time, config.max_store_time),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bth_repbin_crypto::hashcash;
    use bth_repbin_store::Store;
    use ed25519_dalek::{Signer, SigningKey};
    use rand_core::OsRng;
    use std::sync::Arc;

    fn envelope(bits: u8, recipient: [u8; 32]) -> Vec<u8> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let signer_pub = signing_key.verifying_key().to_bytes();

        let sender_keys = packet::KeyPair {
            constant_pub_key: [1u8; 32],
            temporary_pub_key: [2u8; 32],
        };
        let receiver_keys = packet::KeyPair {
            constant_pub_key: recipient,
            temporary_pub_key: [4u8; 32],
        };
        let key_header = packet::pack_key_header(&sender_keys, &receiver_keys, &[9u8; 32]);
        let body_tail = b"encrypted-body-bytes";

        let mut after_sign_header = Vec::new();
        after_sign_header.extend_from_slice(&key_header);
        after_sign_header.extend_from_slice(body_tail);
        let msg_id = packet::calc_message_id(&after_sign_header);

        let (nonce, _) = hashcash::compute_nonce(&signer_pub, bits, 0);
        let signature = signing_key.sign(&msg_id);

        let mut envelope = Vec::new();
        envelope.push(0x01);
        envelope.extend_from_slice(&signer_pub);
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&signature.to_bytes());
        envelope.extend_from_slice(&msg_id);
        envelope.extend_from_slice(&after_sign_header);
        envelope
    }

    fn config() -> ServerConfig {
        ServerConfig {
            min_hashcash_bits: 8,
            step_limit: 2,
            min_store_time: 86_400,
            max_store_time: 86_400 * 30,
            min_post_size: 1,
            max_post_size: 1 << 20,
            ..ServerConfig::default()
        }
    }

    fn open() -> MessageStore {
        let store = Store::open("sqlite", ":memory:", None, 1, 4).expect("opens");
        MessageStore::new(Arc::new(store)).0
    }

    #[test]
    fn admits_a_well_formed_envelope() {
        let ms = open();
        let cfg = config();
        let body = envelope(8, [5u8; 32]);
        let outcome = admit(&ms, &cfg, &body, false, 0, 0).expect("admits");
        assert_eq!(outcome.counter, 1);
    }

    #[test]
    fn stronger_hashcash_grants_a_bigger_quota() {
        let ms = open();
        let cfg = config();
        let body = envelope(12, [5u8; 32]);
        let outcome = admit(&ms, &cfg, &body, false, 0, 0).expect("admits");
        assert!(outcome.expire_time - outcome.post_time > cfg.min_store_time);
    }

    #[test]
    fn undersized_body_is_rejected() {
        let ms = open();
        let mut cfg = config();
        cfg.min_post_size = 10_000;
        let body = envelope(8, [5u8; 32]);
        assert!(matches!(admit(&ms, &cfg, &body, false, 0, 0), Err(HandlerError::PostTooSmall)));
    }

    #[test]
    fn tampered_message_id_is_rejected() {
        let ms = open();
        let cfg = config();
        let mut body = envelope(8, [5u8; 32]);
        let last = body.len() - 1;
        body[last] ^= 0xff;
        assert!(matches!(admit(&ms, &cfg, &body, false, 0, 0), Err(HandlerError::BadMessageId)));
    }
}
