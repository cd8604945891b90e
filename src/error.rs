//! Error types for the lockbox library.
//!
//! Wrong passphrase and corrupted ciphertext both surface as
//! [`Error::Authentication`]; callers cannot tell them apart.

use thiserror::Error;

/// Top-level error type for all lockbox operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The stored value looks like an envelope but cannot be used
    /// (unknown version/algorithm, bad field encoding, wrong lengths).
    #[error("invalid envelope: {0}")]
    Format(String),

    /// AES-GCM tag verification failed.
    #[error("decryption failed: wrong passphrase or corrupted data")]
    Authentication,

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("activity listener error: {0}")]
    Listener(String),

    #[error("storage medium error: {0}")]
    Medium(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for a failed integrity check.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication)
    }

    /// True for an unusable envelope structure.
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
