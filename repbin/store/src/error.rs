//! Error types for the storage backend.

use displaydoc::Display;
use thiserror::Error;

/// Errors surfaced by the relational storage backend.
#[derive(Debug, Display, Error)]
pub enum StoreError {
    /// database error: {0}
    Database(#[from] diesel::result::Error),
    /// connection pool error: {0}
    Pool(#[from] r2d2::Error),
    /// migration error: {0}
    Migration(String),
    /// an update or insert affected zero rows
    NoModify,
    /// requested row was not found
    NotFound,
    /// blob I/O error: {0}
    Blob(#[from] std::io::Error),
    /// unsupported database driver: {0}
    UnsupportedDriver(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
