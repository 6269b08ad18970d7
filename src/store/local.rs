//! Progress and session persistence on top of a [`StorageBackend`]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::StoreError;
use super::backend::{MemoryBackend, StorageBackend};
use crate::progress::ProgressDocument;
use crate::session::{SessionKey, SessionState};

/// Key of the progress document
pub const PROGRESS_KEY: &str = "madinah_vocab_progress";

/// Typed access to the device's progress document and saved sessions
pub struct LocalStore {
    backend: Box<dyn StorageBackend>,
    /// Serializes read-modify-write cycles
    write_lock: Mutex<()>,
    corruption_warned: AtomicBool,
}

impl LocalStore {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            write_lock: Mutex::new(()),
            corruption_warned: AtomicBool::new(false),
        }
    }

    /// Store backed by memory only
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Load the progress document.
    ///
    /// Missing or unreadable data yields an empty document; corruption is
    /// logged once per store.
    pub fn load(&self) -> ProgressDocument {
        let mut doc: ProgressDocument = self.read_json(PROGRESS_KEY).unwrap_or_default();
        doc.heal();
        doc
    }

    /// Persist the progress document
    pub fn save(&self, doc: &ProgressDocument) -> Result<(), StoreError> {
        self.write_json(PROGRESS_KEY, doc)
    }

    /// Re-read the document, mutate it, and write it back as one step
    pub fn update<T>(&self, f: impl FnOnce(&mut ProgressDocument) -> T) -> Result<T, StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut doc = self.load();
        let result = f(&mut doc);
        self.save(&doc)?;
        Ok(result)
    }

    /// Remove the progress document entirely
    pub fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.backend.remove(PROGRESS_KEY)
    }

    /// Has a corrupt value been encountered?
    pub fn corruption_detected(&self) -> bool {
        self.corruption_warned.load(Ordering::SeqCst)
    }

    /// Saved drill session, if any
    pub fn load_session(&self, key: &SessionKey) -> Option<SessionState> {
        self.read_json(&key.storage_key())
    }

    /// Persist a drill session
    pub fn save_session(&self, key: &SessionKey, state: &SessionState) -> Result<(), StoreError> {
        self.write_json(&key.storage_key(), state)
    }

    /// Forget a drill session
    pub fn clear_session(&self, key: &SessionKey) -> Result<(), StoreError> {
        self.backend.remove(&key.storage_key())
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                self.warn_corrupt(key, &e.to_string());
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                self.warn_corrupt(key, &e.to_string());
                None
            }
        }
    }

    fn write_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let contents = serde_json::to_string(value)
            .map_err(|source| StoreError::Serialize { key: key.to_string(), source })?;
        self.backend.set(key, &contents)?;
        tracing::trace!(key, bytes = contents.len(), "local store write");
        Ok(())
    }

    fn warn_corrupt(&self, key: &str, reason: &str) {
        if !self.corruption_warned.swap(true, Ordering::SeqCst) {
            tracing::warn!(key, reason, "Unreadable local data, starting from an empty document");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::progress::DrillMode;
    use crate::session::SessionKind;

    #[test]
    fn missing_document_loads_empty() {
        let store = LocalStore::in_memory();
        assert_eq!(store.load(), ProgressDocument::default());
        assert!(!store.corruption_detected());
    }

    #[test]
    fn corrupt_document_loads_empty_and_flags_once() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set(PROGRESS_KEY, "{not json").unwrap();
        let store = LocalStore::new(backend);

        assert_eq!(store.load(), ProgressDocument::default());
        assert_eq!(store.load(), ProgressDocument::default());
        assert!(store.corruption_detected());
    }

    #[test]
    fn update_rereads_before_writing() {
        let store = LocalStore::in_memory();
        store.update(|doc| doc.record_answer("w1", DrillMode::Mixed, true, 1)).unwrap();
        store.update(|doc| doc.record_answer("w2", DrillMode::Mixed, false, 2)).unwrap();

        let doc = store.load();
        assert_eq!(doc.word("w1").correct_count, 1);
        assert_eq!(doc.word("w2").incorrect_count, 1);
        assert_eq!(doc.local_modified_at, Some(2));
    }

    #[test]
    fn save_failure_is_reported() {
        let backend = Arc::new(MemoryBackend::new());
        let store = LocalStore::new(backend.clone());
        backend.set_read_only(true);

        let result = store.update(|doc| doc.record_answer("w1", DrillMode::Mixed, true, 1));
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn sessions_are_keyed_independently() {
        let store = LocalStore::in_memory();
        let practice = SessionKey::new(1, 2, DrillMode::Mixed, SessionKind::Practice);
        let review = SessionKey::new(1, 2, DrillMode::Mixed, SessionKind::ReviewMistakes);

        let state = SessionState { question_pool_ids: vec!["w1".into()], ..Default::default() };
        store.save_session(&practice, &state).unwrap();

        assert_eq!(store.load_session(&practice), Some(state));
        assert_eq!(store.load_session(&review), None);

        store.clear_session(&practice).unwrap();
        assert_eq!(store.load_session(&practice), None);
    }

    #[test]
    fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalStore::new(crate::store::FsBackend::new(dir.path()));
            store.update(|doc| doc.record_answer("w1", DrillMode::EnglishArabic, true, 5)).unwrap();
        }
        let reopened = LocalStore::new(crate::store::FsBackend::new(dir.path()));
        assert!(reopened.load().word("w1").english_arabic_correct);
    }
}
