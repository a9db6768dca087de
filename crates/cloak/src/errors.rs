//! Error types for masking operations.

use std::time::Duration;
use thiserror::Error;

/// Result type for masking operations.
pub type CloakResult<T> = Result<T, CloakError>;

/// Errors that can occur while masking or unmasking text.
#[derive(Debug, Error)]
pub enum CloakError {
    /// A mapping could not be written, so the text cannot be masked safely.
    #[error("failed to store token {token}: {source}")]
    StorageWrite {
        token: String,
        #[source]
        source: StoreError,
    },

    /// Every lookup failed during unmasking; the store is unreachable.
    #[error("token store unavailable: {0}")]
    StorageUnavailable(#[source] StoreError),

    /// Every session tried minted a token that was already stored.
    #[error("no unused session found after {attempts} attempts")]
    SessionCollision { attempts: usize },

    /// A detector declared a type tag that cannot be embedded in a token.
    #[error("invalid type tag '{0}': expected uppercase letters and digits separated by '_'")]
    InvalidTypeTag(String),

    /// Regex compilation error.
    #[error("invalid regex pattern: {0}")]
    InvalidRegex(String),

    /// Unknown phone numbering region.
    #[error("unsupported phone region: {0}")]
    UnsupportedRegion(String),

    /// Encryption setup error.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal engine error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Token store specific errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage capacity exceeded.
    #[error("token store capacity exceeded ({max_entries} entries)")]
    CapacityExceeded { max_entries: usize },

    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A store call did not complete in time.
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    /// Stored data could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error from a file-backed store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal store error.
    #[error("internal store error: {0}")]
    Internal(String),
}

/// Failure inside a detector. Never escapes a masking call.
#[derive(Debug, Error)]
#[error("detector {type_tag} failed: {reason}")]
pub struct DetectionError {
    pub type_tag: String,
    pub reason: String,
}

impl DetectionError {
    pub fn new(type_tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            reason: reason.into(),
        }
    }
}
