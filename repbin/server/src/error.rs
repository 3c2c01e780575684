// Copyright (c) 2024 Botho Foundation

//! The handler-facing error taxonomy (§7): every variant maps to exactly one `ERROR: …`
//! wire string, collecting failures from every lower layer via `From`.

use displaydoc::Display;
use thiserror::Error;

use bth_repbin_crypto::CryptoError;
use bth_repbin_messagestore::MessageStoreError;
use bth_repbin_peer::PeerError;
use bth_repbin_store::StoreError;

/// Errors a request handler can terminate with; each carries its own wire rendering.
#[derive(Debug, Display, Error)]
pub enum HandlerError {
    /// Bad parameter
    BadParam,
    /// Authentication required
    AuthRequired,
    /// Authentication failed
    AuthFailed,
    /// Message too big
    PostTooBig,
    /// Message too small
    PostTooSmall,
    /// HashCash insufficient
    HashCashInsufficient,
    /// Bad signature
    BadSignature,
    /// Bad MessageID
    BadMessageId,
    /// Duplicate
    Duplicate,
    /// PostLimit
    PostLimit,
    /// No data
    NotFound,
    /// Unknown peer
    UnknownPeer,
    /// internal error: {0}
    Internal(String),
}

impl HandlerError {
    /// The exact `ERROR: …` line (sans trailing newline) for this failure, per §4.E/§7.
    pub fn wire_reason(&self) -> String {
        self.to_string()
    }
}

impl From<CryptoError> for HandlerError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::HashCashInsufficient(_, _) => HandlerError::HashCashInsufficient,
            CryptoError::BadSignature => HandlerError::BadSignature,
            CryptoError::BadLength(_, _) | CryptoError::BadKeyHeaderLength(_, _) | CryptoError::BadProofTokenLength(_, _) => {
                HandlerError::BadParam
            }
            CryptoError::BadVersion(_) => HandlerError::BadParam,
            CryptoError::WrongRecipient | CryptoError::WrongSender => HandlerError::AuthFailed,
        }
    }
}

impl From<StoreError> for HandlerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => HandlerError::NotFound,
            other => HandlerError::Internal(other.to_string()),
        }
    }
}

impl From<MessageStoreError> for HandlerError {
    fn from(err: MessageStoreError) -> Self {
        match err {
            MessageStoreError::Duplicate => HandlerError::Duplicate,
            MessageStoreError::PostLimit => HandlerError::PostLimit,
            MessageStoreError::NotFound => HandlerError::NotFound,
            MessageStoreError::WrongRecipient => HandlerError::AuthFailed,
            MessageStoreError::Store(inner) => inner.into(),
        }
    }
}

impl From<PeerError> for HandlerError {
    fn from(err: PeerError) -> Self {
        match err {
            PeerError::Stale => HandlerError::AuthFailed,
            PeerError::UnknownPeer => HandlerError::UnknownPeer,
            PeerError::Auth(inner) => inner.into(),
            other => HandlerError::Internal(other.to_string()),
        }
    }
}

pub type HandlerResult<T> = Result<T, HandlerError>;
