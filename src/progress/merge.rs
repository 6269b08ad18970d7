//! Gain-based merge of progress documents
//!
//! Every field is combined with an operator that is commutative, associative
//! and idempotent (`max` for counters, `||` for flags, earliest date for
//! completions), so merging can be repeated in any order without losing
//! recorded progress.

use std::collections::BTreeMap;

use super::model::{DrillMode, LessonStatus, ProgressDocument, WordProgress};

/// Merge two documents into one that dominates both.
///
/// `local` is the side whose UI context wins when recency is unknown.
pub fn merge_progress(remote: &ProgressDocument, local: &ProgressDocument) -> ProgressDocument {
    let mut word_progress = remote.word_progress.clone();
    for (word_id, theirs) in &local.word_progress {
        let merged = match word_progress.get(word_id) {
            Some(ours) => merge_word(ours, theirs),
            None => {
                let mut word = theirs.clone();
                word.derive_mastery();
                word
            }
        };
        word_progress.insert(word_id.clone(), merged);
    }
    for word in word_progress.values_mut() {
        word.derive_mastery();
    }

    let mut lesson_status = remote.lesson_status.clone();
    for (book, lessons) in &local.lesson_status {
        let target = lesson_status.entry(*book).or_insert_with(BTreeMap::new);
        for (lesson, theirs) in lessons {
            let merged = match target.get(lesson) {
                Some(ours) => merge_lesson(ours, theirs),
                None => theirs.clone(),
            };
            target.insert(*lesson, merged);
        }
    }

    // Context follows the most recently active device, then the local side.
    let remote_is_newer = matches!(
        (remote.local_modified_at, local.local_modified_at),
        (Some(r), Some(l)) if r > l
    );
    let (primary, secondary) = if remote_is_newer { (remote, local) } else { (local, remote) };

    ProgressDocument {
        word_progress,
        lesson_status,
        last_book: primary.last_book.or(secondary.last_book),
        last_lesson: primary.last_lesson.or(secondary.last_lesson),
        last_mode: primary.last_mode.or(secondary.last_mode),
        local_modified_at: remote.local_modified_at.max(local.local_modified_at),
    }
}

fn merge_word(a: &WordProgress, b: &WordProgress) -> WordProgress {
    let mut merged = WordProgress {
        correct_count: a.correct_count.max(b.correct_count),
        incorrect_count: a.incorrect_count.max(b.incorrect_count),
        consecutive_correct: a.consecutive_correct.max(b.consecutive_correct),
        mastered: false,
        english_arabic_correct: a.english_arabic_correct || b.english_arabic_correct,
        arabic_english_correct: a.arabic_english_correct || b.arabic_english_correct,
        mixed_correct: a.mixed_correct || b.mixed_correct,
        session_english_arabic: a.session_english_arabic || b.session_english_arabic,
        session_arabic_english: a.session_arabic_english || b.session_arabic_english,
        session_mixed: a.session_mixed || b.session_mixed,
    };
    merged.derive_mastery();
    merged
}

fn merge_lesson(a: &LessonStatus, b: &LessonStatus) -> LessonStatus {
    let date_completed = match (&a.date_completed, &b.date_completed) {
        (Some(x), Some(y)) => Some(x.min(y).clone()),
        (x, y) => x.clone().or_else(|| y.clone()),
    };

    LessonStatus {
        mastered: a.mastered || b.mastered,
        final_test_passed: a.final_test_passed || b.final_test_passed,
        date_completed,
    }
}

/// Does `candidate` record anything that `baseline` does not?
pub fn has_progress_gain(candidate: &ProgressDocument, baseline: &ProgressDocument) -> bool {
    let word_gain = candidate.word_progress.iter().any(|(word_id, c)| {
        let b = baseline.word_progress.get(word_id).cloned().unwrap_or_default();
        c.correct_count > b.correct_count
            || c.incorrect_count > b.incorrect_count
            || c.consecutive_correct > b.consecutive_correct
            || (c.mastered && !b.mastered)
            || DrillMode::ALL.iter().any(|mode| c.mode_correct(*mode) && !b.mode_correct(*mode))
    });
    if word_gain {
        return true;
    }

    candidate.lesson_status.iter().any(|(book, lessons)| {
        lessons.iter().any(|(lesson, c)| {
            let b = baseline.lesson(*book, *lesson);
            (c.mastered && !b.mastered) || (c.final_test_passed && !b.final_test_passed)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn word_strategy() -> impl Strategy<Value = WordProgress> {
        (0u32..6, 0u32..6, 0u32..6, any::<[bool; 3]>(), any::<[bool; 3]>()).prop_map(
            |(correct, incorrect, streak, flags, session)| {
                let mut word = WordProgress {
                    correct_count: correct,
                    incorrect_count: incorrect,
                    consecutive_correct: streak,
                    english_arabic_correct: flags[0],
                    arabic_english_correct: flags[1],
                    mixed_correct: flags[2],
                    session_english_arabic: session[0],
                    session_arabic_english: session[1],
                    session_mixed: session[2],
                    ..Default::default()
                };
                word.derive_mastery();
                word
            },
        )
    }

    fn lesson_strategy() -> impl Strategy<Value = LessonStatus> {
        let dates = prop_oneof![
            Just(None),
            Just(Some("2024-01-05".to_string())),
            Just(Some("2024-02-11".to_string())),
        ];
        (any::<bool>(), any::<bool>(), dates).prop_map(|(mastered, passed, date)| LessonStatus {
            mastered,
            final_test_passed: passed,
            date_completed: date,
        })
    }

    fn document_strategy() -> impl Strategy<Value = ProgressDocument> {
        let words = prop::collection::btree_map("w[0-5]", word_strategy(), 0..6);
        let lessons = prop::collection::btree_map(
            1u32..3,
            prop::collection::btree_map(1u32..4, lesson_strategy(), 0..3),
            0..3,
        );
        let modes = prop::option::of(prop_oneof![
            Just(DrillMode::EnglishArabic),
            Just(DrillMode::ArabicEnglish),
            Just(DrillMode::Mixed),
        ]);
        (words, lessons, prop::option::of(1u32..3), modes, prop::option::of(0i64..4)).prop_map(
            |(word_progress, lesson_status, last_book, last_mode, local_modified_at)| {
                ProgressDocument {
                    word_progress,
                    lesson_status,
                    last_book,
                    last_lesson: last_book,
                    last_mode,
                    local_modified_at,
                }
            },
        )
    }

    proptest! {
        #[test]
        fn merge_is_commutative_on_progress(a in document_strategy(), b in document_strategy()) {
            let ab = merge_progress(&a, &b);
            let ba = merge_progress(&b, &a);
            prop_assert_eq!(&ab.word_progress, &ba.word_progress);
            prop_assert_eq!(&ab.lesson_status, &ba.lesson_status);
            prop_assert_eq!(ab.local_modified_at, ba.local_modified_at);
        }

        #[test]
        fn merge_is_idempotent(a in document_strategy(), b in document_strategy()) {
            let once = merge_progress(&a, &b);
            let twice = merge_progress(&once, &b);
            prop_assert_eq!(&twice, &once);
            prop_assert_eq!(merge_progress(&a, &a).word_progress, a.word_progress.clone());
        }

        #[test]
        fn merge_is_monotone(a in document_strategy(), b in document_strategy()) {
            let merged = merge_progress(&a, &b);
            prop_assert!(merged.dominates(&a));
            prop_assert!(merged.dominates(&b));
            prop_assert!(merged.validate().is_ok());
        }

        #[test]
        fn merged_never_gains_over_itself(a in document_strategy(), b in document_strategy()) {
            let merged = merge_progress(&a, &b);
            prop_assert!(!has_progress_gain(&merged, &merged));
            prop_assert!(!has_progress_gain(&merge_progress(&merged, &b), &merged));
        }
    }

    #[test]
    fn disjoint_mode_flags_from_two_devices_survive() {
        let mut device_a = ProgressDocument::default();
        device_a.word_mut("w1").grant(DrillMode::EnglishArabic);
        let mut device_b = ProgressDocument::default();
        device_b.word_mut("w1").grant(DrillMode::ArabicEnglish);

        let merged = merge_progress(&device_a, &device_b);
        let w1 = merged.word("w1");
        assert!(w1.english_arabic_correct);
        assert!(w1.arabic_english_correct);
        assert!(!w1.mixed_correct);
        assert!(!w1.mastered);
    }

    #[test]
    fn mastery_is_rederived_not_copied() {
        let mut stale = ProgressDocument::default();
        stale.word_mut("w1").mastered = true;

        let merged = merge_progress(&stale, &ProgressDocument::default());
        assert!(!merged.word("w1").mastered);
    }

    #[test]
    fn earliest_completion_date_wins() {
        let mut a = ProgressDocument::default();
        a.record_final_test(1, 1, true, "2024-03-01");
        let mut b = ProgressDocument::default();
        b.record_final_test(1, 1, true, "2024-01-01");
        b.record_final_test(1, 2, true, "2024-04-01");

        let merged = merge_progress(&a, &b);
        assert_eq!(merged.lesson(1, 1).date_completed.as_deref(), Some("2024-01-01"));
        assert_eq!(merged.lesson(1, 2).date_completed.as_deref(), Some("2024-04-01"));
    }

    #[test]
    fn context_prefers_newer_device_then_local() {
        let remote = ProgressDocument {
            last_book: Some(2),
            last_mode: Some(DrillMode::Mixed),
            local_modified_at: Some(200),
            ..Default::default()
        };
        let local = ProgressDocument {
            last_book: Some(1),
            local_modified_at: Some(100),
            ..Default::default()
        };
        let merged = merge_progress(&remote, &local);
        assert_eq!(merged.last_book, Some(2));
        assert_eq!(merged.local_modified_at, Some(200));

        let unknown = ProgressDocument { last_book: Some(2), ..Default::default() };
        let local = ProgressDocument { last_book: Some(1), ..Default::default() };
        assert_eq!(merge_progress(&unknown, &local).last_book, Some(1));
        assert_eq!(merge_progress(&unknown, &ProgressDocument::default()).last_book, Some(2));
    }

    #[test]
    fn gain_detects_counters_and_flags() {
        let mut baseline = ProgressDocument::default();
        baseline.record_answer("w1", DrillMode::Mixed, true, 1);

        let mut candidate = baseline.clone();
        assert!(!has_progress_gain(&candidate, &baseline));

        candidate.record_answer("w1", DrillMode::Mixed, false, 2);
        assert!(has_progress_gain(&candidate, &baseline));

        let mut lesson_only = baseline.clone();
        lesson_only.record_final_test(1, 1, true, "2024-01-01");
        assert!(has_progress_gain(&lesson_only, &baseline));
    }

    #[test]
    fn streak_reset_alone_is_not_a_gain() {
        let mut baseline = ProgressDocument::default();
        baseline.record_answer("w1", DrillMode::Mixed, true, 1);
        baseline.record_answer("w1", DrillMode::Mixed, true, 1);

        let mut candidate = ProgressDocument::default();
        candidate.word_mut("w1").mixed_correct = true;
        candidate.word_mut("w1").correct_count = 2;
        assert!(!has_progress_gain(&candidate, &baseline));
    }

    #[test]
    fn session_flags_are_not_progress() {
        let baseline = ProgressDocument::default();
        let mut candidate = ProgressDocument::default();
        candidate.word_mut("w1").session_mixed = true;
        assert!(!has_progress_gain(&candidate, &baseline));
    }
}
