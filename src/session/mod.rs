//! Resumable drill sessions
//!
//! A drill's remaining question queue and running tally are checkpointed to
//! the local store after every answer, so leaving mid-drill and coming back
//! continues where the learner stopped. Final tests are never checkpointed: a
//! failed final test restarts in full.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::content::{Lesson, VocabItem};
use crate::progress::{BookId, DrillMode, LessonId};
use crate::store::{LocalStore, StoreError};

/// What kind of drill a session is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionKind {
    #[default]
    Practice,
    ReviewMistakes,
    FinalTest,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionKind::Practice => "practice",
            SessionKind::ReviewMistakes => "review-mistakes",
            SessionKind::FinalTest => "final-test",
        })
    }
}

/// Identity of a resumable session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub book: BookId,
    pub lesson: LessonId,
    pub mode: DrillMode,
    pub kind: SessionKind,
}

impl SessionKey {
    pub fn new(book: BookId, lesson: LessonId, mode: DrillMode, kind: SessionKind) -> Self {
        Self { book, lesson, mode, kind }
    }

    /// Key used in the local store
    pub fn storage_key(&self) -> String {
        format!("session_{}_{}_{}_{}", self.book, self.lesson, self.mode, self.kind)
    }

    /// Final tests always restart from scratch
    pub fn is_resumable(&self) -> bool {
        self.kind != SessionKind::FinalTest
    }
}

/// Persisted form of a drill in progress
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionState {
    /// Remaining questions, next first
    pub question_pool_ids: Vec<String>,
    pub attempted: u32,
    pub correct: u32,
    pub incorrect: u32,
    /// Words missed during this session
    pub weak_word_ids: Vec<String>,
}

/// Running tally of a drill
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub attempted: u32,
    pub correct: u32,
    pub incorrect: u32,
}

/// A drill in memory
#[derive(Debug, Clone)]
pub struct DrillSession {
    pub key: SessionKey,
    /// Remaining questions, current first
    pub queue: VecDeque<VocabItem>,
    pub tally: Tally,
    pub weak_word_ids: Vec<String>,
    /// Restored from a checkpoint rather than started fresh
    pub resumed: bool,
}

impl DrillSession {
    /// Start a new drill over the given word ids
    pub fn fresh(key: SessionKey, lesson: &Lesson, pool_ids: &[String]) -> Self {
        Self {
            key,
            queue: Self::items_for(lesson, pool_ids),
            tally: Tally::default(),
            weak_word_ids: Vec::new(),
            resumed: false,
        }
    }

    /// Rebuild a drill from a checkpoint. Ids missing from the lesson are dropped.
    pub fn restore(key: SessionKey, lesson: &Lesson, state: &SessionState) -> Option<Self> {
        let queue = Self::items_for(lesson, &state.question_pool_ids);
        if queue.is_empty() {
            return None;
        }

        Some(Self {
            key,
            queue,
            tally: Tally {
                attempted: state.attempted,
                correct: state.correct,
                incorrect: state.incorrect,
            },
            weak_word_ids: state.weak_word_ids.clone(),
            resumed: true,
        })
    }

    fn items_for(lesson: &Lesson, ids: &[String]) -> VecDeque<VocabItem> {
        ids.iter().filter_map(|id| lesson.item(id).cloned()).collect()
    }

    /// Question currently being asked
    pub fn current(&self) -> Option<&VocabItem> {
        self.queue.front()
    }

    /// No questions left
    pub fn is_finished(&self) -> bool {
        self.queue.is_empty()
    }

    /// Score the current question and move on. Returns the answered item.
    pub fn answer(&mut self, is_correct: bool) -> Option<VocabItem> {
        let item = self.queue.pop_front()?;
        self.tally.attempted += 1;
        if is_correct {
            self.tally.correct += 1;
        } else {
            self.tally.incorrect += 1;
            if !self.weak_word_ids.contains(&item.id) {
                self.weak_word_ids.push(item.id.clone());
            }
        }
        Some(item)
    }

    /// Persisted form of the drill
    pub fn snapshot(&self) -> SessionState {
        SessionState {
            question_pool_ids: self.queue.iter().map(|item| item.id.clone()).collect(),
            attempted: self.tally.attempted,
            correct: self.tally.correct,
            incorrect: self.tally.incorrect,
            weak_word_ids: self.weak_word_ids.clone(),
        }
    }
}

/// Restore a saved drill for `key`, if one with questions left exists
pub fn resume(store: &LocalStore, key: &SessionKey, lesson: &Lesson) -> Option<DrillSession> {
    if !key.is_resumable() {
        return None;
    }
    let state = store.load_session(key)?;
    let session = DrillSession::restore(*key, lesson, &state);
    if session.is_none() {
        tracing::debug!(key = %key.storage_key(), "Saved session has no usable questions");
    }
    session
}

/// Save the drill after an answer, or clear it once the queue is empty
pub fn checkpoint(store: &LocalStore, session: &DrillSession) -> Result<(), StoreError> {
    if !session.key.is_resumable() {
        return Ok(());
    }
    if session.is_finished() {
        store.clear_session(&session.key)
    } else {
        store.save_session(&session.key, &session.snapshot())
    }
}
