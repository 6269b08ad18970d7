//! Progress sync engine
//!
//! One [`SyncEngine`] per signed-in learner. It owns the local store, the
//! remote store handle, and the sync scheduler, and exposes the operations
//! the drill UI calls. Every answer is saved locally before anything else
//! happens; remote failures never reach the caller of a drill operation.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthSession;
use crate::content::{Curriculum, Lesson, VocabItem};
use crate::drill::build_question_pool;
use crate::progress::{
    BookId, DrillMode, LessonId, LessonStatus, ProgressDocument, ResetScope, WordProgress,
    merge_progress,
};
use crate::remote::{RemoteError, RemoteStore, fetch_preferring_fresh};
use crate::session::{self, DrillSession, SessionKey, SessionKind};
use crate::store::{LocalStore, StoreError};
use crate::sync::{
    AfterAttempt, Attempt, AttemptEnd, AttemptOutcome, Enqueue, FailureClass, Reconciler,
    SyncError, SyncPhase, SyncScheduler, SyncSettings,
};

/// Errors surfaced to the drill UI
#[derive(Debug, Error)]
pub enum EngineError {
    /// Progress could not be saved on this device
    #[error("Failed to save progress locally: {0}")]
    Store(#[from] StoreError),
}

/// Last remote failure, kept for the status line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub class: FailureClass,
    pub message: String,
}

/// Snapshot of the engine's sync state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    /// Initial pull done and remote writes allowed
    pub connected: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure: Option<SyncFailure>,
    /// Synced progress could not be folded back into the local store
    pub local_error: Option<String>,
    pub corruption_detected: bool,
    pub min_interval: Duration,
    pub commits: u64,
}

#[derive(Debug, Default)]
struct StatusInner {
    last_success_at: Option<DateTime<Utc>>,
    last_failure: Option<SyncFailure>,
    local_error: Option<String>,
    commits: u64,
}

struct Driver {
    scheduler: SyncScheduler,
    /// Debounce or retry timer; at most one
    timer: Option<JoinHandle<()>>,
}

impl Driver {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct Inner {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    auth: Arc<dyn AuthSession>,
    reconciler: Reconciler,
    settings: SyncSettings,
    driver: Mutex<Driver>,
    /// Number of attempts currently talking to the remote
    in_flight: watch::Sender<usize>,
    status: Mutex<StatusInner>,
    shutdown: CancellationToken,
}

/// Handle to the sync engine; cheap to clone.
///
/// Operations that schedule remote work must be called inside a Tokio runtime.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        auth: Arc<dyn AuthSession>,
        settings: SyncSettings,
    ) -> Self {
        let reconciler = Reconciler::new(store.clone(), remote.clone());
        let driver = Driver { scheduler: settings.scheduler(), timer: None };
        let (in_flight, _) = watch::channel(0);

        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                auth,
                reconciler,
                settings,
                driver: Mutex::new(driver),
                in_flight,
                status: Mutex::new(StatusInner::default()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn driver(&self) -> MutexGuard<'_, Driver> {
        self.inner.driver.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn status_inner(&self) -> MutexGuard<'_, StatusInner> {
        self.inner.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    /// Wait for auth to settle, pull the learner's remote progress into the
    /// local store, then allow remote writes.
    ///
    /// Returns false when nobody is signed in; the engine stays local-only.
    pub async fn connect(&self) -> Result<bool, EngineError> {
        self.inner.auth.settled().await;
        let Some(user_id) = self.inner.auth.current_user_id() else {
            tracing::info!("No learner signed in, progress stays on this device");
            return Ok(false);
        };

        match fetch_preferring_fresh(self.inner.remote.as_ref(), &user_id).await {
            Ok(Some(remote)) => {
                // Resets made before sign-in must not be undone by the pull
                let queued = self.driver().scheduler.queued_resets().to_vec();
                let mut incoming = remote.progress;
                for scope in &queued {
                    incoming.apply_reset(scope);
                }
                self.inner.store.update(|local| *local = merge_progress(&incoming, local))?;
                tracing::info!(user_id, "Merged remote progress into local store");
            }
            Ok(None) => tracing::debug!(user_id, "No remote progress yet"),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Initial pull failed, continuing with local progress");
                self.record_failure(&e);
            }
        }

        self.driver().scheduler.enable();
        // Anything recorded before the pull, or only ever stored locally
        self.enqueue(self.inner.store.load());
        Ok(true)
    }

    /// Stop remote writes; local saving continues
    pub fn disconnect(&self) {
        let mut driver = self.driver();
        driver.cancel_timer();
        driver.scheduler.disable();
    }

    /// Record one answer and schedule a sync
    pub fn record_answer(
        &self,
        word_id: &str,
        mode: DrillMode,
        is_correct: bool,
    ) -> Result<WordProgress, EngineError> {
        let now_ms = Utc::now().timestamp_millis();
        let (word, doc) = self.inner.store.update(|doc| {
            let word = doc.record_answer(word_id, mode, is_correct, now_ms);
            (word, doc.clone())
        })?;
        self.enqueue(doc);
        Ok(word)
    }

    pub fn word_state(&self, word_id: &str) -> WordProgress {
        self.inner.store.load().word(word_id)
    }

    pub fn lesson_state(&self, book: BookId, lesson: LessonId) -> LessonStatus {
        self.inner.store.load().lesson(book, lesson)
    }

    /// First lesson of a book is open; later ones open once the previous
    /// lesson is mastered or its final test was passed
    pub fn is_lesson_unlocked(&self, curriculum: &Curriculum, book: BookId, lesson: LessonId) -> bool {
        if lesson <= 1 {
            return true;
        }
        let Some(previous) = curriculum.lesson(book, lesson - 1) else {
            return true;
        };

        let doc = self.inner.store.load();
        let status = doc.lesson(book, previous.lesson);
        status.is_complete() || previous.word_ids().all(|id| doc.word(id).mastered)
    }

    /// Start a new drill, discarding any saved one for the same key
    pub fn start_session(
        &self,
        lesson: &Lesson,
        mode: DrillMode,
        kind: SessionKind,
    ) -> Result<DrillSession, EngineError> {
        let key = SessionKey::new(lesson.book, lesson.lesson, mode, kind);
        let doc = self.inner.store.update(|doc| {
            doc.clear_session_flags(lesson.word_ids());
            doc.last_book = Some(lesson.book);
            doc.last_lesson = Some(lesson.lesson);
            doc.last_mode = Some(mode);
            doc.clone()
        })?;

        let pool = build_question_pool(lesson, &doc, mode, kind);
        let session = DrillSession::fresh(key, lesson, &pool);
        session::checkpoint(&self.inner.store, &session)?;
        tracing::debug!(key = %key.storage_key(), questions = session.queue.len(), "Started drill");
        Ok(session)
    }

    /// Continue a saved drill, or start a new one
    pub fn resume_or_start(
        &self,
        lesson: &Lesson,
        mode: DrillMode,
        kind: SessionKind,
    ) -> Result<DrillSession, EngineError> {
        let key = SessionKey::new(lesson.book, lesson.lesson, mode, kind);
        match session::resume(&self.inner.store, &key, lesson) {
            Some(session) => {
                self.set_last_context(lesson.book, lesson.lesson, mode)?;
                tracing::debug!(key = %key.storage_key(), remaining = session.queue.len(), "Resumed drill");
                Ok(session)
            }
            None => self.start_session(lesson, mode, kind),
        }
    }

    /// Score the current question, save progress and the session, and move on.
    ///
    /// Returns the answered item.
    pub fn answer_and_advance(
        &self,
        session: &mut DrillSession,
        lesson: &Lesson,
        is_correct: bool,
    ) -> Result<Option<VocabItem>, EngineError> {
        let Some(item) = session.answer(is_correct) else {
            return Ok(None);
        };

        let now_ms = Utc::now().timestamp_millis();
        let today = today();
        let doc = self.inner.store.update(|doc| {
            doc.record_answer(&item.id, session.key.mode, is_correct, now_ms);
            if doc.mark_lesson_mastered_if_complete(lesson.book, lesson.lesson, lesson.word_ids(), &today) {
                tracing::info!(book = lesson.book, lesson = lesson.lesson, "Lesson mastered");
            }
            doc.clone()
        })?;
        session::checkpoint(&self.inner.store, session)?;
        self.enqueue(doc);
        Ok(Some(item))
    }

    /// Record a final test result for a lesson
    pub fn complete_final_test(&self, lesson: &Lesson, passed: bool) -> Result<(), EngineError> {
        let today = today();
        let doc = self.inner.store.update(|doc| {
            doc.record_final_test(lesson.book, lesson.lesson, passed, &today);
            doc.clone()
        })?;
        if passed {
            tracing::info!(book = lesson.book, lesson = lesson.lesson, "Final test passed");
            self.enqueue(doc);
        }
        Ok(())
    }

    /// Mark a mode complete for every word of a lesson
    pub fn grant_mode(&self, lesson: &Lesson, mode: DrillMode) -> Result<(), EngineError> {
        let now_ms = Utc::now().timestamp_millis();
        let doc = self.inner.store.update(|doc| {
            doc.grant_mode(lesson.word_ids(), mode);
            doc.touch(now_ms);
            doc.clone()
        })?;
        self.enqueue(doc);
        Ok(())
    }

    /// Remember where the learner was; synced along with the next progress
    pub fn set_last_context(
        &self,
        book: BookId,
        lesson: LessonId,
        mode: DrillMode,
    ) -> Result<(), EngineError> {
        self.inner.store.update(|doc| {
            doc.last_book = Some(book);
            doc.last_lesson = Some(lesson);
            doc.last_mode = Some(mode);
        })?;
        Ok(())
    }

    /// Wipe one lesson here and, on the next sync, remotely
    pub fn reset_lesson(&self, lesson: &Lesson) -> Result<(), EngineError> {
        let scope = ResetScope::Lesson {
            book: lesson.book,
            lesson: lesson.lesson,
            word_ids: lesson.word_ids().map(str::to_string).collect(),
        };
        self.reset(scope, std::slice::from_ref(lesson))
    }

    /// Wipe all progress here and, on the next sync, remotely
    pub fn reset_all(&self, curriculum: &Curriculum) -> Result<(), EngineError> {
        let lessons: Vec<Lesson> = curriculum.books.values().flatten().cloned().collect();
        self.reset(ResetScope::All, &lessons)
    }

    fn reset(&self, scope: ResetScope, lessons: &[Lesson]) -> Result<(), EngineError> {
        let now_ms = Utc::now().timestamp_millis();
        let doc = self.inner.store.update(|doc| {
            doc.apply_reset(&scope);
            doc.touch(now_ms);
            doc.clone()
        })?;

        for lesson in lessons {
            for mode in DrillMode::ALL {
                for kind in [SessionKind::Practice, SessionKind::ReviewMistakes] {
                    self.inner.store.clear_session(&SessionKey::new(lesson.book, lesson.lesson, mode, kind))?;
                }
            }
        }

        tracing::info!(?scope, "Progress reset");
        // Queued together so no attempt can pair the reset with an older document
        self.enqueue_with(doc, Some(scope));
        Ok(())
    }

    pub fn status(&self) -> SyncStatus {
        let (phase, connected, min_interval) = {
            let driver = self.driver();
            (driver.scheduler.phase(), driver.scheduler.is_enabled(), driver.scheduler.min_interval())
        };
        let status = self.status_inner();
        SyncStatus {
            phase,
            connected,
            last_success_at: status.last_success_at,
            last_failure: status.last_failure.clone(),
            local_error: status.local_error.clone(),
            corruption_detected: self.inner.store.corruption_detected(),
            min_interval,
            commits: status.commits,
        }
    }

    /// Push the latest local progress now instead of waiting for the timer.
    ///
    /// Waits (bounded) for an attempt already in flight. Returns true if the
    /// remote document was written while this call ran.
    pub async fn request_immediate_sync(&self) -> bool {
        let start_commits = self.status_inner().commits;
        {
            let mut driver = self.driver();
            if !driver.scheduler.is_enabled() {
                return false;
            }
            driver.cancel_timer();
            driver.scheduler.stage(self.inner.store.load());
        }

        let deadline = Instant::now() + self.inner.settings.flush_wait_ceiling();
        let mut in_flight = self.inner.in_flight.subscribe();
        loop {
            let idle =
                tokio::time::timeout_at(deadline, in_flight.wait_for(|n| *n == 0)).await.is_ok();
            if !idle {
                tracing::warn!("Sync attempt still running after flush wait, starting another");
            }

            let attempt = {
                let mut driver = self.driver();
                if idle { driver.scheduler.begin_attempt() } else { driver.scheduler.force_begin() }
            };
            match attempt {
                Some(attempt) => {
                    let (after, committed) = self.execute(attempt).await;
                    self.continue_after(after);
                    return committed;
                }
                None => {
                    // Another pass picked up the document; wait for it instead
                    let picked_up = self.driver().scheduler.is_in_flight();
                    if idle && picked_up {
                        continue;
                    }
                    return self.status_inner().commits > start_commits;
                }
            }
        }
    }

    /// Flush pending progress and stop all timers
    pub async fn shutdown(&self) -> bool {
        let committed = self.request_immediate_sync().await;
        self.inner.shutdown.cancel();
        self.driver().cancel_timer();
        committed
    }

    fn enqueue(&self, doc: ProgressDocument) {
        self.enqueue_with(doc, None);
    }

    fn enqueue_with(&self, doc: ProgressDocument, reset: Option<ResetScope>) {
        let mut driver = self.driver();
        if let Some(scope) = reset {
            driver.scheduler.queue_reset(scope);
        }
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        let decision = driver.scheduler.enqueue(doc, Instant::now());
        tracing::debug!(?decision, "Progress queued for sync");
        match decision {
            Enqueue::FlushNow => {
                driver.cancel_timer();
                tokio::spawn(self.clone().drive());
            }
            Enqueue::Debounce(delay) => self.schedule(&mut driver, delay),
            Enqueue::Deferred | Enqueue::Held => {}
        }
    }

    fn schedule(&self, driver: &mut Driver, delay: Duration) {
        driver.cancel_timer();
        let engine = self.clone();
        let shutdown = self.inner.shutdown.clone();
        driver.timer = Some(tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    // Run detached so cancelling the timer never cuts an attempt short
                    tokio::spawn(engine.drive());
                }
            }
        }));
    }

    fn continue_after(&self, after: AfterAttempt) {
        match after {
            AfterAttempt::FollowUp => {
                tokio::spawn(self.clone().drive());
            }
            AfterAttempt::RetryAfter(delay) => {
                tracing::debug!(delay_ms = delay.as_millis() as u64, "Retrying sync later");
                let mut driver = self.driver();
                self.schedule(&mut driver, delay);
            }
            AfterAttempt::Idle | AfterAttempt::Stale => {}
        }
    }

    /// Run attempts until the scheduler has nothing more to do right now
    async fn drive(self) {
        loop {
            let Some(attempt) = self.driver().scheduler.begin_due_attempt(Instant::now()) else {
                return;
            };
            match self.execute(attempt).await.0 {
                AfterAttempt::FollowUp => continue,
                after => {
                    self.continue_after(after);
                    return;
                }
            }
        }
    }

    /// Run one attempt and report it to the scheduler
    async fn execute(&self, attempt: Attempt) -> (AfterAttempt, bool) {
        let Some(user_id) = self.inner.auth.current_user_id() else {
            tracing::info!("Learner signed out, holding progress locally");
            let mut driver = self.driver();
            driver.scheduler.finish_attempt(attempt.ticket, AttemptEnd::Rejected, Instant::now());
            driver.scheduler.disable();
            driver.scheduler.enqueue(attempt.document, Instant::now());
            return (AfterAttempt::Idle, false);
        };

        self.inner.in_flight.send_modify(|n| *n += 1);
        let profile = self.inner.auth.profile();
        let result = self
            .inner
            .reconciler
            .run(&user_id, profile.as_ref(), &attempt.document, &attempt.resets)
            .await;

        let committed = matches!(result, Ok(AttemptOutcome::Committed { .. }));
        let end = match &result {
            Ok(AttemptOutcome::Committed { merged }) => {
                // Other devices' progress now lives locally too
                let queued = self.driver().scheduler.queued_resets().to_vec();
                let fold_error = self.inner.reconciler.fold(merged, &queued).err();

                let mut status = self.status_inner();
                status.last_success_at = Some(Utc::now());
                status.last_failure = None;
                status.local_error = fold_error.map(|e| e.to_string());
                status.commits += 1;
                AttemptEnd::Committed
            }
            Ok(_) => AttemptEnd::Skipped,
            Err(SyncError::Remote(e)) => {
                self.record_failure(e);
                AttemptEnd::Failed(e, attempt.document)
            }
            Err(SyncError::Invariant(_)) => AttemptEnd::Rejected,
        };

        let after = self.driver().scheduler.finish_attempt(attempt.ticket, end, Instant::now());
        // Only once the scheduler has seen the outcome
        self.inner.in_flight.send_modify(|n| *n = n.saturating_sub(1));
        (after, committed)
    }

    fn record_failure(&self, error: &RemoteError) {
        let class = FailureClass::of(error);
        if class.is_retryable() {
            tracing::warn!(error = %error, "Sync failed, will retry");
        } else {
            tracing::warn!(error = %error, ?class, "Sync failed, not retrying");
        }
        self.status_inner().last_failure = Some(SyncFailure { class, message: error.to_string() });
    }
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}
