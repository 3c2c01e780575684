//! Error types for peer descriptor loading, auth, and the notify/fetch cycles.

use displaydoc::Display;
use thiserror::Error;

/// Errors surfaced by the peer subsystem.
#[derive(Debug, Display, Error)]
pub enum PeerError {
    /// peer descriptor file I/O error: {0}
    DescriptorIo(#[from] std::io::Error),
    /// peer descriptor JSON error: {0}
    DescriptorJson(#[from] serde_json::Error),
    /// peer authentication failed: {0}
    Auth(#[from] bth_repbin_crypto::CryptoError),
    /// timestamp outside the accepted freshness window
    Stale,
    /// unknown peer public key
    UnknownPeer,
    /// transport error talking to a peer: {0}
    Transport(#[from] reqwest::Error),
    /// transport error routed through the configured proxy: {0}
    Proxy(String),
    /// peer returned an error response: {0}
    PeerRejected(String),
    /// storage backend error: {0}
    Store(#[from] bth_repbin_store::StoreError),
    /// message store error: {0}
    MessageStore(#[from] bth_repbin_messagestore::MessageStoreError),
    /// malformed response body from peer
    BadResponse,
}

pub type PeerResult<T> = Result<T, PeerError>;
