//! Learner progress model
//!
//! The [`ProgressDocument`] is the unit exchanged between the local store and
//! the remote document store. Merging is gain-based: two documents combine
//! field by field and the result never records less than either input.

pub mod merge;
pub mod model;

pub use merge::{has_progress_gain, merge_progress};
pub use model::{
    BookId, DrillMode, LessonId, LessonStatus, ModelError, ProgressDocument, ResetScope,
    WordProgress,
};
