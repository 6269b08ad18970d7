//! Progress synchronization
//!
//! The scheduler decides when to talk to the remote store, the reconciler
//! decides what to write, and the backoff controller decides how to react
//! to failures.

pub mod backoff;
pub mod reconciler;
pub mod scheduler;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::progress::ModelError;
use crate::remote::RemoteError;

pub use backoff::{Backoff, FailureClass, RetryDecision};
pub use reconciler::{AttemptOutcome, Reconciler};
pub use scheduler::{AfterAttempt, Attempt, AttemptEnd, Enqueue, SyncPhase, SyncScheduler};

/// Errors that end a sync attempt
#[derive(Debug, Error)]
pub enum SyncError {
    /// Remote store call failed
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Merge produced an inconsistent document
    #[error("Merge invariant violated: {0}")]
    Invariant(#[from] ModelError),
}

/// Timing knobs for the sync engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Quiet period before a debounced write
    pub debounce_ms: u64,

    /// Minimum gap between remote writes
    pub min_interval_ms: u64,

    /// Ceiling for the rate-limit backoff
    pub max_interval_ms: u64,

    /// Delay before retrying a transient failure
    pub transient_retry_ms: u64,

    /// How long an immediate flush waits for an attempt already in flight
    pub flush_wait_ceiling_ms: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            debounce_ms: 200,
            min_interval_ms: 500,
            max_interval_ms: 30_000,
            transient_retry_ms: 1_000,
            flush_wait_ceiling_ms: 10_000,
        }
    }
}

impl SyncSettings {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn flush_wait_ceiling(&self) -> Duration {
        Duration::from_millis(self.flush_wait_ceiling_ms)
    }

    /// Backoff controller configured from these settings
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.min_interval_ms),
            Duration::from_millis(self.max_interval_ms),
            Duration::from_millis(self.transient_retry_ms),
        )
    }

    /// Fresh scheduler configured from these settings
    pub fn scheduler(&self) -> SyncScheduler {
        SyncScheduler::new(self.debounce(), self.backoff())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_fill_in_defaults() {
        let settings: SyncSettings = serde_json::from_str(r#"{"debounce_ms":50}"#).unwrap();
        assert_eq!(settings.debounce(), Duration::from_millis(50));
        assert_eq!(settings.min_interval_ms, 500);
        assert_eq!(settings.flush_wait_ceiling(), Duration::from_secs(10));
    }

    #[test]
    fn backoff_uses_configured_interval() {
        let settings = SyncSettings { min_interval_ms: 100, ..Default::default() };
        assert_eq!(settings.backoff().min_interval(), Duration::from_millis(100));
    }
}
