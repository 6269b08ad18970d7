//! Lesson content
//!
//! Vocabulary is organized as books of numbered lessons. Each book is read
//! from a `book{N}.json` file holding an array of lessons.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::progress::{BookId, LessonId};

/// A single vocabulary entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabItem {
    /// Stable word identifier used as the progress key
    pub id: String,
    /// English gloss
    pub english: String,
    /// Arabic script
    pub arabic: String,
    /// Latin transliteration
    #[serde(default)]
    pub transliteration: String,
}

/// A lesson within a book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    /// Owning book (assigned by the loader)
    #[serde(default)]
    pub book: BookId,
    /// Lesson number (1-indexed)
    pub lesson: LessonId,
    /// Display label, e.g. "Lesson 3"
    #[serde(default)]
    pub lesson_label: String,
    /// Words taught in the lesson
    pub items: Vec<VocabItem>,
}

impl Lesson {
    /// Ids of every word in the lesson
    pub fn word_ids(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.id.as_str())
    }

    /// Find a word by id
    pub fn item(&self, word_id: &str) -> Option<&VocabItem> {
        self.items.iter().find(|item| item.id == word_id)
    }

    /// Label for display, falling back to the number
    pub fn label(&self) -> String {
        if self.lesson_label.is_empty() {
            format!("Lesson {}", self.lesson)
        } else {
            self.lesson_label.clone()
        }
    }
}

/// All loaded books
#[derive(Debug, Clone, Default)]
pub struct Curriculum {
    /// Lessons per book, in lesson order
    pub books: BTreeMap<BookId, Vec<Lesson>>,
}

impl Curriculum {
    /// Load every `book{N}.json` in a directory
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut curriculum = Self::default();
        let entries =
            fs::read_dir(dir).with_context(|| format!("Failed to read content dir {:?}", dir))?;

        for entry in entries {
            let path = entry?.path();
            let Some(book) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.strip_prefix("book"))
                .and_then(|n| n.parse::<BookId>().ok())
            else {
                continue;
            };

            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read lessons from {:?}", path))?;
            let lessons: Vec<Lesson> = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {:?}", path))?;
            curriculum.insert_book(book, lessons);
        }

        tracing::debug!(books = curriculum.books.len(), "Loaded curriculum");
        Ok(curriculum)
    }

    /// Add or replace a book
    pub fn insert_book(&mut self, book: BookId, mut lessons: Vec<Lesson>) {
        for lesson in &mut lessons {
            lesson.book = book;
        }
        lessons.sort_by_key(|l| l.lesson);
        self.books.insert(book, lessons);
    }

    /// Find a lesson
    pub fn lesson(&self, book: BookId, lesson: LessonId) -> Option<&Lesson> {
        self.books.get(&book).and_then(|lessons| lessons.iter().find(|l| l.lesson == lesson))
    }

    /// Total number of words across all books
    pub fn word_count(&self) -> usize {
        self.books.values().flatten().map(|l| l.items.len()).sum()
    }
}
