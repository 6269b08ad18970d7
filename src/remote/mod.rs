//! Remote document store
//!
//! The remote store keeps one document per learner and is only eventually
//! consistent. Clients can read through a local cache (`fetch`) or bypass it
//! (`fetch_fresh`); writes always replace the whole document.

pub mod credentials;
pub mod error;
pub mod http;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::progress::ProgressDocument;

pub use credentials::TokenManager;
pub use error::RemoteError;
pub use http::HttpRemote;
pub use memory::MemoryRemote;

/// The per-learner record held by the remote store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RemoteDocument {
    /// Synced progress (never carries session-only fields)
    pub progress: ProgressDocument,

    /// Time of the last commit
    pub updated_at: Option<DateTime<Utc>>,

    /// Learner email, for the admin view
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Learner display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Access to the remote document store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read the learner's document, possibly from a cache
    async fn fetch(&self, user_id: &str) -> Result<Option<RemoteDocument>, RemoteError>;

    /// Read the learner's document, bypassing any cache
    async fn fetch_fresh(&self, user_id: &str) -> Result<Option<RemoteDocument>, RemoteError>;

    /// Replace the learner's document
    async fn write(&self, user_id: &str, doc: &RemoteDocument) -> Result<(), RemoteError>;
}

/// Read fresh, falling back to the cache when the fresh read fails.
///
/// Syncing from slightly stale data is better than not syncing at all.
pub async fn fetch_preferring_fresh(
    remote: &dyn RemoteStore,
    user_id: &str,
) -> Result<Option<RemoteDocument>, RemoteError> {
    match remote.fetch_fresh(user_id).await {
        Ok(doc) => Ok(doc),
        Err(e) => {
            tracing::debug!(error = %e, "Fresh read failed, falling back to cached read");
            remote.fetch(user_id).await
        }
    }
}
