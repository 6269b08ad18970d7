//! In-process remote store
//!
//! Used for guest mode and as the scripted remote in tests: failures can be
//! queued per operation and writes can be slowed down to open race windows.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::error::RemoteError;
use super::{RemoteDocument, RemoteStore};

#[derive(Default)]
struct Inner {
    documents: HashMap<String, RemoteDocument>,
    write_failures: VecDeque<RemoteError>,
    fresh_failures: VecDeque<RemoteError>,
    writes: Vec<RemoteDocument>,
    write_attempts: usize,
    fetches: usize,
}

/// Remote store held in memory
#[derive(Default)]
pub struct MemoryRemote {
    inner: Mutex<Inner>,
    write_latency: Duration,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every write by `latency`
    pub fn with_write_latency(latency: Duration) -> Self {
        Self { write_latency: latency, ..Self::default() }
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed or overwrite a learner's document
    pub fn insert(&self, user_id: &str, doc: RemoteDocument) {
        self.inner().documents.insert(user_id.to_string(), doc);
    }

    /// Current document of a learner
    pub fn document(&self, user_id: &str) -> Option<RemoteDocument> {
        self.inner().documents.get(user_id).cloned()
    }

    /// Make the next write fail with `error`
    pub fn fail_next_write(&self, error: RemoteError) {
        self.inner().write_failures.push_back(error);
    }

    /// Make the next fresh read fail with `error`
    pub fn fail_next_fresh_read(&self, error: RemoteError) {
        self.inner().fresh_failures.push_back(error);
    }

    /// Number of successful writes
    pub fn write_count(&self) -> usize {
        self.inner().writes.len()
    }

    /// Number of writes tried, failed ones included
    pub fn write_attempts(&self) -> usize {
        self.inner().write_attempts
    }

    /// Every successfully written document, oldest first
    pub fn writes(&self) -> Vec<RemoteDocument> {
        self.inner().writes.clone()
    }

    /// Number of reads of either kind
    pub fn fetch_count(&self) -> usize {
        self.inner().fetches
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn fetch(&self, user_id: &str) -> Result<Option<RemoteDocument>, RemoteError> {
        let mut inner = self.inner();
        inner.fetches += 1;
        Ok(inner.documents.get(user_id).cloned())
    }

    async fn fetch_fresh(&self, user_id: &str) -> Result<Option<RemoteDocument>, RemoteError> {
        let mut inner = self.inner();
        inner.fetches += 1;
        if let Some(error) = inner.fresh_failures.pop_front() {
            return Err(error);
        }
        Ok(inner.documents.get(user_id).cloned())
    }

    async fn write(&self, user_id: &str, doc: &RemoteDocument) -> Result<(), RemoteError> {
        if !self.write_latency.is_zero() {
            tokio::time::sleep(self.write_latency).await;
        }

        let mut inner = self.inner();
        inner.write_attempts += 1;
        if let Some(error) = inner.write_failures.pop_front() {
            return Err(error);
        }
        inner.documents.insert(user_id.to_string(), doc.clone());
        inner.writes.push(doc.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fetch_preferring_fresh;

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let remote = MemoryRemote::new();
        remote.fail_next_write(RemoteError::Unavailable("offline".into()));

        let doc = RemoteDocument::default();
        assert!(remote.write("u1", &doc).await.is_err());
        assert!(remote.write("u1", &doc).await.is_ok());
        assert_eq!(remote.write_count(), 1);
        assert_eq!(remote.write_attempts(), 2);
        assert_eq!(remote.document("u1"), Some(doc));
    }

    #[tokio::test]
    async fn fresh_read_falls_back_to_cached_read() {
        let remote = MemoryRemote::new();
        remote.insert("u1", RemoteDocument { email: Some("a@b.c".into()), ..Default::default() });
        remote.fail_next_fresh_read(RemoteError::Unavailable("offline".into()));

        let doc = fetch_preferring_fresh(&remote, "u1").await.unwrap().unwrap();
        assert_eq!(doc.email.as_deref(), Some("a@b.c"));
        assert_eq!(remote.fetch_count(), 2);
    }
}
