//! Sync scheduling state machine
//!
//! Turns a stream of local mutations into few remote write attempts. The
//! machine is pure: callers pass in the current time and act on the returned
//! decisions (start a timer, run an attempt now, do nothing). Timers and
//! network calls live in the engine.
//!
//! ```text
//! IDLE --enqueue--> PENDING --begin--> SYNCING --finish--> IDLE
//!                      ^                  |  \
//!                      +----- retry ------+   +-- mutation mid-flight: one follow-up pass
//! ```

use std::time::Duration;

use tokio::time::Instant;

use super::backoff::{Backoff, RetryDecision};
use crate::progress::{ProgressDocument, ResetScope};
use crate::remote::RemoteError;

/// Coarse state, for status displays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Pending,
    Syncing,
}

/// What the caller should do after a mutation was enqueued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// Start an attempt right away
    FlushNow,
    /// (Re)start the timer: the debounce window, or what is left of the
    /// minimum write interval or a retry delay if that is longer
    Debounce(Duration),
    /// An attempt is in flight; it will be followed by exactly one more
    Deferred,
    /// Sync is not enabled yet; the document waits in the slot
    Held,
}

/// One remote write attempt handed to the reconciler
#[derive(Debug, Clone)]
pub struct Attempt {
    pub ticket: u64,
    pub document: ProgressDocument,
    pub resets: Vec<ResetScope>,
}

/// How an attempt ended
#[derive(Debug)]
pub enum AttemptEnd<'a> {
    /// Remote document replaced
    Committed,
    /// Nothing worth writing
    Skipped,
    /// Remote call failed; the attempted document comes back for requeueing
    Failed(&'a RemoteError, ProgressDocument),
    /// Attempt refused locally (merge invariant broken); never retried
    Rejected,
}

/// What the caller should do after an attempt finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterAttempt {
    /// Nothing left to do
    Idle,
    /// A mutation arrived mid-flight; run one more attempt now
    FollowUp,
    /// Try again after the delay
    RetryAfter(Duration),
    /// The attempt was superseded by a forced one; ignore it
    Stale,
}

/// Single-slot, single-flight sync scheduler
#[derive(Debug)]
pub struct SyncScheduler {
    enabled: bool,
    pending: Option<ProgressDocument>,
    resets: Vec<ResetScope>,
    in_flight: Option<u64>,
    in_flight_resets: usize,
    next_ticket: u64,
    follow_up: bool,
    last_success: Option<Instant>,
    /// No attempt before this point after a retryable failure
    not_before: Option<Instant>,
    debounce: Duration,
    backoff: Backoff,
}

impl SyncScheduler {
    pub fn new(debounce: Duration, backoff: Backoff) -> Self {
        Self {
            enabled: false,
            pending: None,
            resets: Vec::new(),
            in_flight: None,
            in_flight_resets: 0,
            next_ticket: 1,
            follow_up: false,
            last_success: None,
            not_before: None,
            debounce,
            backoff,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        if self.in_flight.is_some() {
            SyncPhase::Syncing
        } else if self.pending.is_some() {
            SyncPhase::Pending
        } else {
            SyncPhase::Idle
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }

    pub fn min_interval(&self) -> Duration {
        self.backoff.min_interval()
    }

    /// Resets not yet confirmed by a finished attempt, oldest first
    pub fn queued_resets(&self) -> &[ResetScope] {
        &self.resets
    }

    /// Allow remote attempts. Returns true if a held document is waiting.
    pub fn enable(&mut self) -> bool {
        self.enabled = true;
        self.pending.is_some()
    }

    /// Stop starting new attempts (sign-out)
    pub fn disable(&mut self) {
        self.enabled = false;
        self.follow_up = false;
    }

    /// Replace the pending slot without owing a follow-up pass.
    ///
    /// Used by immediate flushes, which run the write path themselves.
    pub fn stage(&mut self, doc: ProgressDocument) {
        self.pending = Some(doc);
    }

    /// Replace the pending slot with the latest local document
    pub fn enqueue(&mut self, doc: ProgressDocument, now: Instant) -> Enqueue {
        self.pending = Some(doc);

        if !self.enabled {
            return Enqueue::Held;
        }
        if self.in_flight.is_some() {
            self.follow_up = true;
            return Enqueue::Deferred;
        }

        let since_success = match self.last_success {
            Some(last) => self.backoff.min_interval().saturating_sub(now.duration_since(last)),
            None => Duration::ZERO,
        };
        let until_retry = match self.not_before {
            Some(at) => at.saturating_duration_since(now),
            None => Duration::ZERO,
        };
        let remaining = since_success.max(until_retry);
        if remaining.is_zero() {
            Enqueue::FlushNow
        } else {
            Enqueue::Debounce(remaining.max(self.debounce))
        }
    }

    /// Queue a reset to be applied to the remote document on the next attempt
    pub fn queue_reset(&mut self, scope: ResetScope) {
        self.resets.push(scope);
    }

    /// Take the pending document for an attempt, unless one is already running
    pub fn begin_attempt(&mut self) -> Option<Attempt> {
        if !self.enabled || self.in_flight.is_some() {
            return None;
        }
        let document = self.pending.take()?;

        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.in_flight = Some(ticket);
        self.in_flight_resets = self.resets.len();
        self.follow_up = false;

        Some(Attempt { ticket, document, resets: self.resets.clone() })
    }

    /// Like [`begin_attempt`](Self::begin_attempt), but nothing starts while a
    /// retry delay is still running
    pub fn begin_due_attempt(&mut self, now: Instant) -> Option<Attempt> {
        if self.not_before.is_some_and(|at| now < at) {
            return None;
        }
        self.begin_attempt()
    }

    /// Begin an attempt even if another one appears stuck in flight
    pub fn force_begin(&mut self) -> Option<Attempt> {
        if let Some(stuck) = self.in_flight.take() {
            tracing::warn!(ticket = stuck, "Superseding a sync attempt that did not finish");
        }
        self.begin_attempt()
    }

    /// Record how an attempt ended and decide what happens next
    pub fn finish_attempt(&mut self, ticket: u64, end: AttemptEnd<'_>, now: Instant) -> AfterAttempt {
        if self.in_flight != Some(ticket) {
            if matches!(end, AttemptEnd::Committed) {
                self.last_success = Some(now);
            }
            return AfterAttempt::Stale;
        }
        self.in_flight = None;
        let follow_up = std::mem::take(&mut self.follow_up);

        match end {
            AttemptEnd::Committed => {
                self.last_success = Some(now);
                self.not_before = None;
                self.backoff.on_success();
                self.resets.drain(..self.in_flight_resets);
            }
            AttemptEnd::Skipped => {
                self.resets.drain(..self.in_flight_resets);
            }
            AttemptEnd::Failed(error, document) => {
                if let RetryDecision::Requeue(delay) = self.backoff.on_failure(error) {
                    self.not_before = Some(now + delay);
                    // A newer mutation supersedes the failed document
                    self.pending.get_or_insert(document);
                    return AfterAttempt::RetryAfter(delay);
                }
            }
            AttemptEnd::Rejected => {}
        }

        if follow_up && self.enabled && self.pending.is_some() {
            AfterAttempt::FollowUp
        } else {
            AfterAttempt::Idle
        }
    }
}
