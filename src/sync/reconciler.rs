//! Remote reconciliation
//!
//! One attempt reads the remote document fresh, merges the local snapshot
//! into it, and writes the result back only when that would add progress.
//! The remote is never overwritten on the strength of timestamps.

use std::sync::Arc;

use chrono::Utc;

use super::SyncError;
use crate::auth::UserProfile;
use crate::progress::{ModelError, ProgressDocument, ResetScope, has_progress_gain, merge_progress};
use crate::remote::{RemoteDocument, RemoteStore, fetch_preferring_fresh};
use crate::store::{LocalStore, StoreError};

/// Result of a completed attempt
#[derive(Debug)]
pub enum AttemptOutcome {
    /// The remote document was replaced with `merged`
    Committed { merged: ProgressDocument },
    /// Local document had nothing worth sending
    SkippedEmpty,
    /// Remote already holds everything the local document has
    SkippedNoGain,
}

impl AttemptOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, AttemptOutcome::Committed { .. })
    }
}

/// Runs fetch, merge, gain check, and commit against one remote store
pub struct Reconciler {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
}

impl Reconciler {
    pub fn new(store: Arc<LocalStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self { store, remote }
    }

    /// Reconcile `local` (plus queued resets) with the learner's remote document
    pub async fn run(
        &self,
        user_id: &str,
        profile: Option<&UserProfile>,
        local: &ProgressDocument,
        resets: &[ResetScope],
    ) -> Result<AttemptOutcome, SyncError> {
        let local = local.strip_for_remote();

        // A blank document (fresh install, new device) must never reach the
        // remote, no matter what the remote currently holds.
        if resets.is_empty() && !local.has_meaningful_progress() {
            tracing::debug!(user_id, "Local document has no progress, skipping sync");
            return Ok(AttemptOutcome::SkippedEmpty);
        }

        let existing = fetch_preferring_fresh(self.remote.as_ref(), user_id).await?;
        let (mut remote, email, display_name) = match existing {
            Some(doc) => (doc.progress, doc.email, doc.display_name),
            None => (ProgressDocument::default(), None, None),
        };

        let mut reset_changed = false;
        for scope in resets {
            reset_changed |= remote.apply_reset(scope);
        }

        let merged = merge_progress(&remote, &local);
        if let Err(e) = check_merge(&merged, &remote, &local) {
            tracing::error!(user_id, error = %e, "Merge invariant violated, abandoning attempt");
            return Err(e.into());
        }

        if !reset_changed && !has_progress_gain(&merged, &remote) {
            tracing::debug!(user_id, "Remote already up to date");
            return Ok(AttemptOutcome::SkippedNoGain);
        }

        let document = RemoteDocument {
            progress: merged.clone(),
            updated_at: Some(Utc::now()),
            email: profile.and_then(|p| p.email.clone()).or(email),
            display_name: profile.and_then(|p| p.display_name.clone()).or(display_name),
        };
        self.remote.write(user_id, &document).await?;
        tracing::info!(user_id, mastered = merged.mastered_count(), "Progress synced");

        Ok(AttemptOutcome::Committed { merged })
    }

    /// Bring a committed merge back into the local store.
    ///
    /// `queued_resets` are the resets still waiting for confirmation. They were
    /// already applied locally, so they are applied to the incoming copy only:
    /// a wiped word cannot come back from the remote, and answers recorded
    /// since the reset stay.
    pub fn fold(&self, merged: &ProgressDocument, queued_resets: &[ResetScope]) -> Result<(), StoreError> {
        let mut incoming = merged.clone();
        for scope in queued_resets {
            incoming.apply_reset(scope);
        }

        self.store
            .update(|doc| *doc = merge_progress(&incoming, doc))
            .inspect_err(|e| tracing::error!(error = %e, "Synced progress could not be saved locally"))
    }
}

fn check_merge(
    merged: &ProgressDocument,
    remote: &ProgressDocument,
    local: &ProgressDocument,
) -> Result<(), ModelError> {
    merged.validate()?;
    if !merged.dominates(remote) {
        return Err(ModelError::Regression { side: "remote" });
    }
    if !merged.dominates(local) {
        return Err(ModelError::Regression { side: "local" });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::progress::DrillMode;
    use crate::remote::{MemoryRemote, RemoteError};

    struct Device {
        store: Arc<LocalStore>,
        reconciler: Reconciler,
    }

    impl Device {
        fn new(remote: &Arc<MemoryRemote>) -> Self {
            let store = Arc::new(LocalStore::in_memory());
            let reconciler = Reconciler::new(store.clone(), remote.clone());
            Self { store, reconciler }
        }

        fn answer(&self, word_id: &str, mode: DrillMode) {
            self.store.update(|doc| doc.record_answer(word_id, mode, true, 1)).unwrap();
        }

        async fn sync(&self) -> AttemptOutcome {
            let doc = self.store.load();
            let outcome = self.reconciler.run("u1", None, &doc, &[]).await.unwrap();
            if let AttemptOutcome::Committed { merged } = &outcome {
                self.reconciler.fold(merged, &[]).unwrap();
            }
            outcome
        }
    }

    fn remote_word(remote: &MemoryRemote, word_id: &str) -> crate::progress::WordProgress {
        remote.document("u1").unwrap().progress.word(word_id)
    }

    #[tokio::test]
    async fn two_devices_keep_both_flags_in_either_order() {
        for a_first in [true, false] {
            let remote = Arc::new(MemoryRemote::new());
            let a = Device::new(&remote);
            let b = Device::new(&remote);
            a.answer("w1", DrillMode::EnglishArabic);
            b.answer("w1", DrillMode::ArabicEnglish);

            if a_first {
                a.sync().await;
                b.sync().await;
            } else {
                b.sync().await;
                a.sync().await;
            }

            let word = remote_word(&remote, "w1");
            assert!(word.english_arabic_correct);
            assert!(word.arabic_english_correct);
            assert!(!word.mixed_correct);
            assert!(!word.mastered);
            assert_eq!(word.correct_count, 1);
        }
    }

    #[tokio::test]
    async fn no_gain_means_no_write() {
        let remote = Arc::new(MemoryRemote::new());
        let mut progress = ProgressDocument::default();
        for mode in DrillMode::ALL {
            progress.record_answer("w1", mode, true, 1);
        }
        remote.insert("u1", RemoteDocument { progress, ..Default::default() });

        let device = Device::new(&remote);
        device.answer("w1", DrillMode::Mixed);

        assert!(matches!(device.sync().await, AttemptOutcome::SkippedNoGain));
        assert_eq!(remote.write_count(), 0);
    }

    #[tokio::test]
    async fn fresh_device_never_touches_remote() {
        let remote = Arc::new(MemoryRemote::new());
        let mut progress = ProgressDocument::default();
        progress.record_answer("w1", DrillMode::Mixed, true, 1);
        remote.insert("u1", RemoteDocument { progress: progress.clone(), ..Default::default() });

        let device = Device::new(&remote);
        assert!(matches!(device.sync().await, AttemptOutcome::SkippedEmpty));
        assert_eq!(remote.write_count(), 0);
        assert_eq!(remote.fetch_count(), 0);
        assert_eq!(remote.document("u1").unwrap().progress, progress);
    }

    #[tokio::test]
    async fn commit_folds_remote_progress_into_local() {
        let remote = Arc::new(MemoryRemote::new());
        let mut progress = ProgressDocument::default();
        progress.record_answer("w2", DrillMode::Mixed, true, 1);
        remote.insert("u1", RemoteDocument { progress, ..Default::default() });

        let device = Device::new(&remote);
        device.answer("w1", DrillMode::Mixed);
        assert!(device.sync().await.is_committed());

        let local = device.store.load();
        assert!(local.word("w1").mixed_correct);
        assert!(local.word("w2").mixed_correct);
        // Session flag survives the fold even though the remote never sees it
        assert!(local.word("w1").session_mixed);
        assert!(!remote_word(&remote, "w1").session_mixed);
    }

    #[tokio::test]
    async fn fresh_read_failure_falls_back_to_cache() {
        let remote = Arc::new(MemoryRemote::new());
        remote.fail_next_fresh_read(RemoteError::Unavailable("offline".into()));

        let device = Device::new(&remote);
        device.answer("w1", DrillMode::Mixed);
        assert!(device.sync().await.is_committed());
        assert_eq!(remote.write_count(), 1);
    }

    #[tokio::test]
    async fn write_failure_is_returned() {
        let remote = Arc::new(MemoryRemote::new());
        remote.fail_next_write(RemoteError::PermissionDenied("rules".into()));

        let device = Device::new(&remote);
        device.answer("w1", DrillMode::Mixed);
        let doc = device.store.load();
        let result = device.reconciler.run("u1", None, &doc, &[]).await;
        assert!(matches!(result, Err(SyncError::Remote(RemoteError::PermissionDenied(_)))));
    }

    #[tokio::test]
    async fn lesson_reset_reaches_remote() {
        let remote = Arc::new(MemoryRemote::new());
        let mut progress = ProgressDocument::default();
        progress.record_answer("w1", DrillMode::Mixed, true, 1);
        progress.record_answer("w9", DrillMode::Mixed, true, 1);
        remote.insert("u1", RemoteDocument { progress, ..Default::default() });

        let device = Device::new(&remote);
        let reset = ResetScope::Lesson { book: 1, lesson: 1, word_ids: vec!["w1".into()] };
        let doc = device.store.load();
        let outcome = device.reconciler.run("u1", None, &doc, &[reset.clone()]).await.unwrap();
        let AttemptOutcome::Committed { merged } = outcome else {
            panic!("reset was not written");
        };
        device.reconciler.fold(&merged, &[reset]).unwrap();

        let stored = remote.document("u1").unwrap().progress;
        assert!(!stored.word_progress.contains_key("w1"));
        assert!(stored.word("w9").mixed_correct);
        assert!(device.store.load().word("w9").mixed_correct);
    }

    #[test]
    fn fold_keeps_answers_recorded_after_a_reset() {
        let device = Device::new(&Arc::new(MemoryRemote::new()));
        let reset = ResetScope::Lesson { book: 1, lesson: 1, word_ids: vec!["w1".into()] };
        device.answer("w1", DrillMode::EnglishArabic);

        let mut merged = ProgressDocument::default();
        merged.record_answer("w2", DrillMode::Mixed, true, 1);
        device.reconciler.fold(&merged, &[reset]).unwrap();

        let local = device.store.load();
        assert!(local.word("w1").english_arabic_correct);
        assert!(local.word("w2").mixed_correct);
    }

    #[test]
    fn fold_does_not_bring_back_words_wiped_by_a_queued_reset() {
        let device = Device::new(&Arc::new(MemoryRemote::new()));
        let reset = ResetScope::Lesson { book: 1, lesson: 1, word_ids: vec!["w1".into()] };

        // Committed by an attempt that started before the reset
        let mut merged = ProgressDocument::default();
        merged.record_answer("w1", DrillMode::Mixed, true, 1);
        device.reconciler.fold(&merged, &[reset]).unwrap();

        assert!(device.store.load().word("w1").is_untouched());
    }

    #[tokio::test]
    async fn profile_is_written_and_preserved() {
        let remote = Arc::new(MemoryRemote::new());
        remote.insert(
            "u1",
            RemoteDocument { email: Some("old@example.com".into()), ..Default::default() },
        );
        let device = Device::new(&remote);
        device.answer("w1", DrillMode::Mixed);

        let profile = UserProfile { email: None, display_name: Some("Amina".into()) };
        let doc = device.store.load();
        device.reconciler.run("u1", Some(&profile), &doc, &[]).await.unwrap();

        let stored = remote.document("u1").unwrap();
        assert_eq!(stored.email.as_deref(), Some("old@example.com"));
        assert_eq!(stored.display_name.as_deref(), Some("Amina"));
        assert!(stored.updated_at.is_some());
    }

    #[test]
    fn merge_check_rejects_lost_progress() {
        let mut local = ProgressDocument::default();
        local.record_answer("w1", DrillMode::Mixed, true, 1);
        let merged = ProgressDocument::default();

        assert!(check_merge(&merged, &ProgressDocument::default(), &local).is_err());
        assert!(check_merge(&local, &ProgressDocument::default(), &local).is_ok());
    }
}
