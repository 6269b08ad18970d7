//! Question pools and answer checking for drills

use crate::content::{Lesson, VocabItem};
use crate::progress::{DrillMode, ProgressDocument};
use crate::session::SessionKind;

/// Order the lesson's words for a new drill.
///
/// Hardest words come first (most mistakes, shortest streak). When the
/// filter leaves nothing, the whole lesson is drilled again.
pub fn build_question_pool(
    lesson: &Lesson,
    doc: &ProgressDocument,
    mode: DrillMode,
    kind: SessionKind,
) -> Vec<String> {
    let mut pool: Vec<&VocabItem> = lesson
        .items
        .iter()
        .filter(|item| {
            let word = doc.word(&item.id);
            match kind {
                SessionKind::Practice => !word.mode_correct(mode),
                SessionKind::ReviewMistakes => !word.mastered && word.incorrect_count > 0,
                SessionKind::FinalTest => true,
            }
        })
        .collect();

    if pool.is_empty() {
        pool = lesson.items.iter().collect();
    }

    pool.sort_by_key(|item| {
        let word = doc.word(&item.id);
        -(i64::from(word.incorrect_count) - i64::from(word.consecutive_correct))
    });
    pool.into_iter().map(|item| item.id.clone()).collect()
}

/// Which way a single question is asked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Show English, answer in Arabic (or transliteration)
    ToArabic,
    /// Show Arabic, answer in English
    ToEnglish,
}

impl Direction {
    /// Direction for the `index`-th question in a drill; mixed mode alternates
    pub fn for_question(mode: DrillMode, index: usize) -> Self {
        match mode {
            DrillMode::EnglishArabic => Direction::ToArabic,
            DrillMode::ArabicEnglish => Direction::ToEnglish,
            DrillMode::Mixed if index % 2 == 0 => Direction::ToArabic,
            DrillMode::Mixed => Direction::ToEnglish,
        }
    }

    /// Text shown to the learner
    pub fn prompt(self, item: &VocabItem) -> String {
        match self {
            Direction::ToArabic => item.english.clone(),
            Direction::ToEnglish if item.transliteration.is_empty() => item.arabic.clone(),
            Direction::ToEnglish => format!("{} ({})", item.arabic, item.transliteration),
        }
    }

    /// Is `answer` acceptable for `item`?
    pub fn check(self, item: &VocabItem, answer: &str) -> bool {
        match self {
            Direction::ToArabic => {
                answers_match(answer, &item.arabic)
                    || (!item.transliteration.is_empty()
                        && answers_match(answer, &item.transliteration))
            }
            Direction::ToEnglish => answers_match(answer, &item.english),
        }
    }
}

/// Compare a typed answer, ignoring case, surrounding space and punctuation
pub fn answers_match(given: &str, expected: &str) -> bool {
    let given = normalize(given);
    !given.is_empty() && given == normalize(expected)
}

fn normalize(text: &str) -> String {
    text.trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '.' | ',' | ';' | ':' | '!' | '?'))
        .collect::<String>()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, english: &str) -> VocabItem {
        VocabItem {
            id: id.into(),
            english: english.into(),
            arabic: format!("ar-{id}"),
            transliteration: format!("tr-{id}"),
        }
    }

    fn lesson() -> Lesson {
        Lesson {
            book: 1,
            lesson: 1,
            lesson_label: String::new(),
            items: vec![item("w1", "book"), item("w2", "pen"), item("w3", "door")],
        }
    }

    #[test]
    fn practice_skips_words_done_in_this_mode_and_puts_hard_words_first() {
        let mut doc = ProgressDocument::default();
        doc.record_answer("w1", DrillMode::Mixed, true, 1);
        doc.record_answer("w3", DrillMode::EnglishArabic, false, 1);
        doc.record_answer("w3", DrillMode::EnglishArabic, false, 1);

        let pool = build_question_pool(&lesson(), &doc, DrillMode::Mixed, SessionKind::Practice);
        assert_eq!(pool, vec!["w3", "w2"]);
    }

    #[test]
    fn review_falls_back_to_whole_lesson() {
        let doc = ProgressDocument::default();
        let pool =
            build_question_pool(&lesson(), &doc, DrillMode::Mixed, SessionKind::ReviewMistakes);
        assert_eq!(pool, vec!["w1", "w2", "w3"]);
    }

    #[test]
    fn typed_answers_ignore_case_and_punctuation() {
        assert!(answers_match("  The Book. ", "the book"));
        assert!(!answers_match("", ""));
        assert!(!answers_match("pen", "book"));
    }

    #[test]
    fn mixed_mode_alternates_directions() {
        assert_eq!(Direction::for_question(DrillMode::Mixed, 0), Direction::ToArabic);
        assert_eq!(Direction::for_question(DrillMode::Mixed, 1), Direction::ToEnglish);

        let word = item("w1", "book");
        assert!(Direction::ToArabic.check(&word, "TR-W1"));
        assert!(Direction::ToEnglish.check(&word, "book!"));
        assert_eq!(Direction::ToEnglish.prompt(&word), "ar-w1 (tr-w1)");
    }
}
