//! vocab-drill - vocabulary drills with progress that follows the learner
//!
//! Answers are saved on the device first and synced to a remote document
//! store in the background. Syncing merges instead of overwriting, so
//! progress made on one device is never lost to another.

pub mod auth;
pub mod config;
pub mod content;
pub mod drill;
pub mod engine;
pub mod progress;
pub mod remote;
pub mod session;
pub mod store;
pub mod sync;

pub use config::Config;
pub use engine::{EngineError, SyncEngine, SyncStatus};
pub use progress::{DrillMode, ProgressDocument};
