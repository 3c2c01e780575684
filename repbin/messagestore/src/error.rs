//! Error types for the message-store business layer.

use displaydoc::Display;
use thiserror::Error;

/// Errors surfaced by [`crate::MessageStore`]'s admission/fetch/expiry operations.
#[derive(Debug, Display, Error)]
pub enum MessageStoreError {
    /// message already known
    Duplicate,
    /// signer has exceeded its post or retention quota
    PostLimit,
    /// requested message does not exist
    NotFound,
    /// delete request did not match the stored recipient key
    WrongRecipient,
    /// storage backend error: {0}
    Store(#[from] bth_repbin_store::StoreError),
}

pub type MessageStoreResult<T> = Result<T, MessageStoreError>;
