//! Error types for the group key store

use thiserror::Error;

use crate::types::FabricIndex;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the store, its storage backends and its crypto provider.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested record, index or id does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An insert at a position would duplicate an id stored elsewhere in the list.
    #[error("duplicate key id: {0}")]
    DuplicateKeyId(String),

    /// A per-fabric capacity bound was exceeded.
    #[error("invalid list length: {what} is limited to {max} entries per fabric")]
    InvalidListLength { what: &'static str, max: usize },

    /// The undefined fabric index was used where a concrete fabric is required.
    #[error("invalid fabric index {0}")]
    InvalidFabricIndex(FabricIndex),

    /// A reserved or invalid key id was used where a concrete id is required.
    #[error("invalid key id 0x{0:04x}")]
    InvalidKeyId(u16),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A structural invariant was violated (malformed record, broken list).
    #[error("internal error: {0}")]
    Internal(String),

    /// The provider was used before `init()` or after `finish()`.
    #[error("group data provider is not initialized")]
    NotInitialized,

    /// The storage backend failed for a reason other than a missing key.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Error::Internal(reason.into())
    }

    /// True for the recoverable "absent" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
