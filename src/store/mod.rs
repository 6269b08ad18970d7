//! Local, always-available persistence
//!
//! Holds the learner's progress document between sync cycles and the
//! resumable drill sessions. Reads never fail the caller; writes do, because
//! the local store is the last line of defense against losing progress.

pub mod backend;
pub mod local;

use std::path::PathBuf;

use thiserror::Error;

pub use backend::{FsBackend, MemoryBackend, StorageBackend};
pub use local::{LocalStore, PROGRESS_KEY};

/// Errors writing to the local store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("Failed to access {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Value could not be encoded
    #[error("Failed to serialize {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Backend refused the operation
    #[error("Local storage unavailable: {0}")]
    Unavailable(String),
}
