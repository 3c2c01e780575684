//! Row types shared by every storage operation. Binary columns (keys, ids, nonces) are
//! stored as lowercase hex strings in the database and converted back to fixed-size byte
//! arrays here, matching the original driver's portability-over-both-backends choice.

/// A signer accounting row (`signer` table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerRow {
    pub id: i64,
    pub public_key: [u8; 32],
    pub nonce: [u8; 8],
    pub bits: i32,
    pub messages_posted: i64,
    pub messages_retained: i64,
    pub max_messages_posted: i64,
    pub max_messages_retained: i64,
    pub expire_target: i64,
    pub last_message_deleted: i64,
}

/// Fields needed to insert or update a signer row; distinct from [`SignerRow`] because
/// callers never set `id`/`messages_posted`/`messages_retained` directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerCapability {
    pub public_key: [u8; 32],
    pub nonce: [u8; 8],
    pub bits: i32,
    pub max_messages_posted: i64,
    pub max_messages_retained: i64,
    pub expire_target: i64,
}

/// A message row (`message` table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub id: i64,
    pub counter: i64,
    pub message_id: [u8; 32],
    pub receiver_constant_pub_key: [u8; 32],
    pub signer_pub: [u8; 32],
    pub post_time: i64,
    pub expire_time: i64,
    pub expire_request: i64,
    pub distance: i64,
    pub one_time: bool,
    pub sync: bool,
    pub hidden: bool,
}

/// Fields needed to insert a new message row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub message_id: [u8; 32],
    pub receiver_constant_pub_key: [u8; 32],
    pub signer_pub: [u8; 32],
    pub expire_request: i64,
    pub distance: i64,
    pub one_time: bool,
    pub sync: bool,
    pub hidden: bool,
}

/// A peer row (`peer` table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRow {
    pub auth_token: Vec<u8>,
    pub last_notify_send: i64,
    pub last_notify_from: i64,
    pub last_fetch: i64,
    pub error_count: i64,
    pub last_position: i64,
}

/// A message ready for expiry, selected from `message` for the sweep in `select_expired`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpireCandidate {
    pub id: i64,
    pub message_id: [u8; 32],
    pub signer_pub: [u8; 32],
}

/// A resolved blob (`messageblob` row or filesystem read).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageBlob {
    pub id: i64,
    pub message_id: [u8; 32],
    pub signer_pub: [u8; 32],
    pub one_time: bool,
    pub data: Vec<u8>,
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub(crate) fn from_hex_32(s: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    let decoded = hex::decode(s).unwrap_or_default();
    let len = decoded.len().min(32);
    out[..len].copy_from_slice(&decoded[..len]);
    out
}

pub(crate) fn from_hex_8(s: &str) -> [u8; 8] {
    let mut out = [0u8; 8];
    let decoded = hex::decode(s).unwrap_or_default();
    let len = decoded.len().min(8);
    out[..len].copy_from_slice(&decoded[..len]);
    out
}

pub(crate) fn bool_to_int(b: bool) -> i32 {
    if b {
        1
    } else {
        0
    }
}

pub(crate) fn int_to_bool(i: i32) -> bool {
    i != 0
}
