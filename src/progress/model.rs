//! Progress document schema and local mutations

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Book identifier (1-based)
pub type BookId = u32;

/// Lesson identifier within a book (1-based)
pub type LessonId = u32;

/// Direction a word is drilled in
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum DrillMode {
    #[default]
    EnglishArabic,
    ArabicEnglish,
    Mixed,
}

impl DrillMode {
    /// Every mode, in the order they are usually taught
    pub const ALL: [DrillMode; 3] =
        [DrillMode::EnglishArabic, DrillMode::ArabicEnglish, DrillMode::Mixed];

    /// Wire name of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            DrillMode::EnglishArabic => "english-arabic",
            DrillMode::ArabicEnglish => "arabic-english",
            DrillMode::Mixed => "mixed",
        }
    }
}

impl fmt::Display for DrillMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DrillMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DrillMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| format!("unknown drill mode '{s}'"))
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Learning state of a single word
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WordProgress {
    /// Total correct answers
    pub correct_count: u32,

    /// Total incorrect answers
    pub incorrect_count: u32,

    /// Correct answers since the last mistake
    pub consecutive_correct: u32,

    /// Derived: true once every mode flag is set
    pub mastered: bool,

    pub english_arabic_correct: bool,
    pub arabic_english_correct: bool,
    pub mixed_correct: bool,

    /// Session-only flags. Never leave the device.
    #[serde(skip_serializing_if = "is_false")]
    pub session_english_arabic: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub session_arabic_english: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub session_mixed: bool,
}

impl WordProgress {
    /// Has the word been answered correctly in this mode at least once?
    pub fn mode_correct(&self, mode: DrillMode) -> bool {
        match mode {
            DrillMode::EnglishArabic => self.english_arabic_correct,
            DrillMode::ArabicEnglish => self.arabic_english_correct,
            DrillMode::Mixed => self.mixed_correct,
        }
    }

    /// Has the word been answered correctly in this mode during the current session?
    pub fn session_correct(&self, mode: DrillMode) -> bool {
        match mode {
            DrillMode::EnglishArabic => self.session_english_arabic,
            DrillMode::ArabicEnglish => self.session_arabic_english,
            DrillMode::Mixed => self.session_mixed,
        }
    }

    /// Set the persistent flag for a mode and re-derive mastery
    pub fn grant(&mut self, mode: DrillMode) {
        match mode {
            DrillMode::EnglishArabic => self.english_arabic_correct = true,
            DrillMode::ArabicEnglish => self.arabic_english_correct = true,
            DrillMode::Mixed => self.mixed_correct = true,
        }
        self.derive_mastery();
    }

    /// Apply one answered question
    pub fn record(&mut self, mode: DrillMode, is_correct: bool) {
        if is_correct {
            self.correct_count = self.correct_count.saturating_add(1);
            self.consecutive_correct = self.consecutive_correct.saturating_add(1);
            match mode {
                DrillMode::EnglishArabic => self.session_english_arabic = true,
                DrillMode::ArabicEnglish => self.session_arabic_english = true,
                DrillMode::Mixed => self.session_mixed = true,
            }
            self.grant(mode);
        } else {
            self.incorrect_count = self.incorrect_count.saturating_add(1);
            self.consecutive_correct = 0;
        }
    }

    /// Recompute `mastered` from the mode flags
    pub fn derive_mastery(&mut self) {
        self.mastered = DrillMode::ALL.iter().all(|mode| self.mode_correct(*mode));
    }

    /// Drop the session-only flags
    pub fn clear_session_flags(&mut self) {
        self.session_english_arabic = false;
        self.session_arabic_english = false;
        self.session_mixed = false;
    }

    /// No counters and no persistent flags set
    pub fn is_untouched(&self) -> bool {
        self.correct_count == 0
            && self.incorrect_count == 0
            && self.consecutive_correct == 0
            && !self.mastered
            && !DrillMode::ALL.iter().any(|mode| self.mode_correct(*mode))
    }
}

/// Gate state of a lesson
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LessonStatus {
    /// Every word in the lesson is mastered
    pub mastered: bool,

    /// Final test passed; unlocks the next lesson
    pub final_test_passed: bool,

    /// Date of first completion
    pub date_completed: Option<String>,
}

impl LessonStatus {
    pub fn is_complete(&self) -> bool {
        self.mastered || self.final_test_passed
    }
}

/// What a reset wipes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetScope {
    /// One lesson: its words and its status
    Lesson { book: BookId, lesson: LessonId, word_ids: Vec<String> },
    /// Everything
    All,
}

/// Errors raised by model consistency checks
#[derive(Debug, Error)]
pub enum ModelError {
    /// `mastered` disagrees with the mode flags
    #[error("word {word_id} has mastered={mastered} but its mode flags disagree")]
    MasteryMismatch { word_id: String, mastered: bool },

    /// A merge produced a document that no longer dominates one of its inputs
    #[error("merged document lost progress recorded by the {side} document")]
    Regression { side: &'static str },
}

/// Full progress snapshot of one learner
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressDocument {
    /// Per-word state (key is word id)
    pub word_progress: BTreeMap<String, WordProgress>,

    /// Per-lesson state, book id -> lesson id -> status
    pub lesson_status: BTreeMap<BookId, BTreeMap<LessonId, LessonStatus>>,

    /// Last book opened
    pub last_book: Option<BookId>,

    /// Last lesson opened
    pub last_lesson: Option<LessonId>,

    /// Last drill mode used
    pub last_mode: Option<DrillMode>,

    /// Milliseconds since epoch of the last local mutation (diagnostic only)
    pub local_modified_at: Option<i64>,
}

impl ProgressDocument {
    /// State of a word, default if never seen
    pub fn word(&self, word_id: &str) -> WordProgress {
        self.word_progress.get(word_id).cloned().unwrap_or_default()
    }

    /// Get or create a word entry
    pub fn word_mut(&mut self, word_id: &str) -> &mut WordProgress {
        self.word_progress.entry(word_id.to_string()).or_default()
    }

    /// State of a lesson, default if never seen
    pub fn lesson(&self, book: BookId, lesson: LessonId) -> LessonStatus {
        self.lesson_status.get(&book).and_then(|l| l.get(&lesson)).cloned().unwrap_or_default()
    }

    /// Get or create a lesson entry
    pub fn lesson_mut(&mut self, book: BookId, lesson: LessonId) -> &mut LessonStatus {
        self.lesson_status.entry(book).or_default().entry(lesson).or_default()
    }

    /// Stamp the local modification time
    pub fn touch(&mut self, now_ms: i64) {
        self.local_modified_at = Some(now_ms);
    }

    /// Apply an answer and return the word's new state
    pub fn record_answer(
        &mut self,
        word_id: &str,
        mode: DrillMode,
        is_correct: bool,
        now_ms: i64,
    ) -> WordProgress {
        let word = self.word_mut(word_id);
        word.record(mode, is_correct);
        let updated = word.clone();
        self.touch(now_ms);
        updated
    }

    /// Mark a lesson mastered when all of its words are. Returns true if it changed.
    pub fn mark_lesson_mastered_if_complete<'a>(
        &mut self,
        book: BookId,
        lesson: LessonId,
        word_ids: impl IntoIterator<Item = &'a str>,
        today: &str,
    ) -> bool {
        let mut any = false;
        for word_id in word_ids {
            any = true;
            if !self.word_progress.get(word_id).is_some_and(|w| w.mastered) {
                return false;
            }
        }
        if !any {
            return false;
        }

        let status = self.lesson_mut(book, lesson);
        if status.mastered {
            return false;
        }
        status.mastered = true;
        status.date_completed.get_or_insert_with(|| today.to_string());
        true
    }

    /// Record a final test result
    pub fn record_final_test(&mut self, book: BookId, lesson: LessonId, passed: bool, today: &str) {
        if !passed {
            return;
        }
        let status = self.lesson_mut(book, lesson);
        status.final_test_passed = true;
        status.date_completed.get_or_insert_with(|| today.to_string());
    }

    /// Mark a mode as completed for a set of words
    pub fn grant_mode<'a>(&mut self, word_ids: impl IntoIterator<Item = &'a str>, mode: DrillMode) {
        for word_id in word_ids {
            self.word_mut(word_id).grant(mode);
        }
    }

    /// Clear session flags for the given words
    pub fn clear_session_flags<'a>(&mut self, word_ids: impl IntoIterator<Item = &'a str>) {
        for word_id in word_ids {
            if let Some(word) = self.word_progress.get_mut(word_id) {
                word.clear_session_flags();
            }
        }
    }

    /// Recompute mastery everywhere (heals documents written under older rules)
    pub fn heal(&mut self) {
        for word in self.word_progress.values_mut() {
            word.derive_mastery();
        }
    }

    /// Copy without session flags and without untouched words
    pub fn strip_for_remote(&self) -> Self {
        let word_progress = self
            .word_progress
            .iter()
            .filter(|(_, word)| !word.is_untouched())
            .map(|(id, word)| {
                let mut word = word.clone();
                word.clear_session_flags();
                (id.clone(), word)
            })
            .collect();

        Self { word_progress, ..self.clone() }
    }

    /// Any recorded answer, flag, or completed lesson
    pub fn has_meaningful_progress(&self) -> bool {
        self.word_progress.values().any(|word| !word.is_untouched())
            || self.lesson_status.values().flat_map(|l| l.values()).any(LessonStatus::is_complete)
    }

    /// Number of mastered words
    pub fn mastered_count(&self) -> usize {
        self.word_progress.values().filter(|word| word.mastered).count()
    }

    /// Check the mastery invariant on every word
    pub fn validate(&self) -> Result<(), ModelError> {
        for (word_id, word) in &self.word_progress {
            let derived = DrillMode::ALL.iter().all(|mode| word.mode_correct(*mode));
            if word.mastered != derived {
                return Err(ModelError::MasteryMismatch {
                    word_id: word_id.clone(),
                    mastered: word.mastered,
                });
            }
        }
        Ok(())
    }

    /// Every counter at least as high and every set flag still set
    pub fn dominates(&self, other: &ProgressDocument) -> bool {
        let words = other.word_progress.iter().all(|(id, theirs)| {
            let ours = self.word(id);
            ours.correct_count >= theirs.correct_count
                && ours.incorrect_count >= theirs.incorrect_count
                && ours.consecutive_correct >= theirs.consecutive_correct
                && (ours.mastered || !theirs.mastered)
                && DrillMode::ALL
                    .iter()
                    .all(|mode| ours.mode_correct(*mode) || !theirs.mode_correct(*mode))
        });

        let lessons = other.lesson_status.iter().all(|(book, lessons)| {
            lessons.iter().all(|(lesson, theirs)| {
                let ours = self.lesson(*book, *lesson);
                (ours.mastered || !theirs.mastered)
                    && (ours.final_test_passed || !theirs.final_test_passed)
            })
        });

        words && lessons
    }

    /// Wipe the state covered by `scope`. Returns true if anything was removed.
    pub fn apply_reset(&mut self, scope: &ResetScope) -> bool {
        match scope {
            ResetScope::All => {
                let changed = !self.word_progress.is_empty() || !self.lesson_status.is_empty();
                self.word_progress.clear();
                self.lesson_status.clear();
                changed
            }
            ResetScope::Lesson { book, lesson, word_ids } => {
                let mut changed = false;
                for word_id in word_ids {
                    changed |= self.word_progress.remove(word_id).is_some();
                }
                if let Some(lessons) = self.lesson_status.get_mut(book) {
                    changed |= lessons.remove(lesson).is_some();
                }
                changed
            }
        }
    }
}
