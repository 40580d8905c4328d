//! Error types for document persistence

use thiserror::Error;

use crate::traits::DocumentKey;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Document could not be encoded
    #[error("serialization error for {key}: {reason}")]
    Serialization { key: DocumentKey, reason: String },

    /// Backend refused the operation
    #[error("backend error for {key}: {reason}")]
    Backend { key: DocumentKey, reason: String },

    /// All attempts failed; carries the last error
    #[error("{operation} of {key} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        key: DocumentKey,
        operation: &'static str,
        attempts: u32,
        last: Box<StoreError>,
    },
}
