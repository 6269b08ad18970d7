//! Error types for the remote document store

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to the remote document store
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Credentials rejected or document not accessible
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The store rejected the document itself (too large, bad values)
    #[error("Invalid document: {0}")]
    InvalidArgument(String),

    /// Store unreachable or temporarily down
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// Too many writes
    #[error("Rate limited by the remote store")]
    RateLimited {
        /// Server-suggested wait, when given
        retry_after: Option<Duration>,
    },

    /// Any other error response
    #[error("Remote error ({status}): {message}")]
    Other {
        /// HTTP status code
        status: u16,
        /// Error body
        message: String,
    },

    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Response body could not be decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No API token stored. Run `vocab-drill login`
    #[error("Remote token not configured. Run `vocab-drill login` to configure")]
    TokenNotFound,

    /// Failed to access system keyring
    #[error("Failed to access keyring: {0}")]
    Keyring(String),
}
