//! Failure classification and adaptive backoff

use std::time::Duration;

use crate::remote::RemoteError;

/// How a failed remote attempt should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Credentials or permissions; retrying cannot help
    Permanent,
    /// The document was rejected and would be rejected again
    InvalidPayload,
    /// Network trouble or service unavailable
    Transient,
    /// The store asked us to slow down
    RateLimited,
}

impl FailureClass {
    pub fn of(error: &RemoteError) -> Self {
        match error {
            RemoteError::PermissionDenied(_) | RemoteError::TokenNotFound | RemoteError::Keyring(_) => {
                FailureClass::Permanent
            }
            RemoteError::InvalidArgument(_) | RemoteError::Json(_) => FailureClass::InvalidPayload,
            RemoteError::RateLimited { .. } => FailureClass::RateLimited,
            RemoteError::Unavailable(_) | RemoteError::Request(_) | RemoteError::Other { .. } => {
                FailureClass::Transient
            }
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, FailureClass::Transient | FailureClass::RateLimited)
    }
}

/// What to do after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Put the document back and try again after the delay
    Requeue(Duration),
    /// Keep the failure for the learner to see; do not retry
    Surface(FailureClass),
}

/// Tracks the minimum interval between remote writes
#[derive(Debug, Clone)]
pub struct Backoff {
    base_interval: Duration,
    max_interval: Duration,
    transient_delay: Duration,
    min_interval: Duration,
}

impl Backoff {
    pub fn new(base_interval: Duration, max_interval: Duration, transient_delay: Duration) -> Self {
        Self {
            base_interval,
            max_interval: max_interval.max(base_interval),
            transient_delay,
            min_interval: base_interval,
        }
    }

    /// Current minimum gap between remote writes
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Decide how to handle a failed attempt
    pub fn on_failure(&mut self, error: &RemoteError) -> RetryDecision {
        let class = FailureClass::of(error);
        match class {
            FailureClass::Transient => RetryDecision::Requeue(self.transient_delay),
            FailureClass::RateLimited => {
                self.min_interval = (self.min_interval * 2).min(self.max_interval);
                let suggested = match error {
                    RemoteError::RateLimited { retry_after: Some(after) } => *after,
                    _ => Duration::ZERO,
                };
                tracing::warn!(
                    interval_ms = self.min_interval.as_millis() as u64,
                    "Rate limited, backing off"
                );
                RetryDecision::Requeue(self.min_interval.max(suggested))
            }
            FailureClass::Permanent | FailureClass::InvalidPayload => RetryDecision::Surface(class),
        }
    }

    /// A commit went through; return to the normal pace
    pub fn on_success(&mut self) {
        self.min_interval = self.base_interval;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30), Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_remote_errors() {
        assert_eq!(FailureClass::of(&RemoteError::PermissionDenied("x".into())), FailureClass::Permanent);
        assert_eq!(
            FailureClass::of(&RemoteError::InvalidArgument("x".into())),
            FailureClass::InvalidPayload
        );
        assert_eq!(FailureClass::of(&RemoteError::Unavailable("x".into())), FailureClass::Transient);
        assert_eq!(
            FailureClass::of(&RemoteError::Other { status: 418, message: String::new() }),
            FailureClass::Transient
        );
        assert_eq!(
            FailureClass::of(&RemoteError::RateLimited { retry_after: None }),
            FailureClass::RateLimited
        );
    }

    #[test]
    fn transient_failures_retry_after_fixed_delay() {
        let mut backoff = Backoff::default();
        let decision = backoff.on_failure(&RemoteError::Unavailable("down".into()));
        assert_eq!(decision, RetryDecision::Requeue(Duration::from_secs(1)));
        assert_eq!(backoff.min_interval(), Duration::from_millis(500));
    }

    #[test]
    fn rate_limits_double_interval_up_to_ceiling() {
        let mut backoff = Backoff::default();
        let limited = RemoteError::RateLimited { retry_after: None };

        let mut intervals = Vec::new();
        for _ in 0..8 {
            backoff.on_failure(&limited);
            intervals.push(backoff.min_interval().as_millis());
        }
        assert_eq!(intervals, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000, 30000]);

        backoff.on_success();
        assert_eq!(backoff.min_interval(), Duration::from_millis(500));
    }

    #[test]
    fn rate_limit_honours_server_hint() {
        let mut backoff = Backoff::default();
        let decision = backoff
            .on_failure(&RemoteError::RateLimited { retry_after: Some(Duration::from_secs(9)) });
        assert_eq!(decision, RetryDecision::Requeue(Duration::from_secs(9)));
    }

    #[test]
    fn permanent_failures_are_surfaced() {
        let mut backoff = Backoff::default();
        assert_eq!(
            backoff.on_failure(&RemoteError::PermissionDenied("rules".into())),
            RetryDecision::Surface(FailureClass::Permanent)
        );
        assert_eq!(
            backoff.on_failure(&RemoteError::InvalidArgument("too big".into())),
            RetryDecision::Surface(FailureClass::InvalidPayload)
        );
    }
}
