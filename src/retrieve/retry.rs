//! Retry decisions and the wait between attempts.
//!
//! A failed attempt is classified into a [`FailureType`]; the
//! [`RetryPolicy`] then decides whether another attempt is allowed and how
//! long to wait before it. Delays grow exponentially from `base_delay`,
//! are capped at `max_delay` and carry optional random jitter.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument};

use crate::FetchError;

/// Default base delay for exponential backoff.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default backoff multiplier (doubles each attempt).
const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Maximum jitter added to delays.
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Network trouble, short reads, range mismatches, gateway timeouts and
    /// statuses configured as retryable.
    Transient,
    /// Everything retrying cannot fix.
    Fatal,
}

/// Decision on whether to make another attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    Retry {
        delay: Duration,
        /// The attempt number about to be made (1-indexed).
        attempt: u32,
    },
    DoNotRetry { reason: String },
}

/// Bounded retries with exponential backoff.
///
/// ```text
/// delay = min(base_delay * multiplier^(attempt - 1), max_delay) + jitter
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f32,
    jitter: bool,
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is at least 1.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f32,
    ) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter: true,
        }
    }

    /// Builds the policy for a `tries` count (0 means unlimited) and the
    /// longest wait between attempts.
    #[must_use]
    pub fn from_tries(tries: u32, retry_wait: Duration, jitter: bool) -> Self {
        let max_attempts = if tries == 0 { u32::MAX } else { tries };
        Self::new(
            max_attempts,
            DEFAULT_BASE_DELAY.min(retry_wait),
            retry_wait,
            DEFAULT_BACKOFF_MULTIPLIER,
        )
        .with_jitter(jitter)
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Decides what follows the failure of attempt number `attempt`
    /// (1-indexed).
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Fatal {
            return RetryDecision::DoNotRetry {
                reason: "fatal failure".to_string(),
            };
        }
        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);
        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as f64;
        let multiplier = f64::from(self.backoff_multiplier);
        let exponent = f64::from(attempt.saturating_sub(1).min(64));
        let delay_ms = base_ms * multiplier.powf(exponent);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);

        let jitter = if self.jitter && !self.max_delay.is_zero() {
            Self::calculate_jitter()
        } else {
            Duration::ZERO
        };
        Duration::from_millis(capped_ms as u64) + jitter
    }

    #[allow(clippy::cast_possible_truncation)]
    fn calculate_jitter() -> Duration {
        let mut rng = rand::thread_rng();
        let jitter_ms = rng.gen_range(0..=MAX_JITTER.as_millis() as u64);
        Duration::from_millis(jitter_ms)
    }
}

/// Classifies a failure for the retry loop.
#[must_use]
pub fn classify_error(error: &FetchError) -> FailureType {
    if error.is_fatal() {
        FailureType::Fatal
    } else {
        FailureType::Transient
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_secs(1),
            Duration::from_secs(32),
            2.0,
        )
        .with_jitter(false)
    }

    #[test]
    fn test_max_attempts_minimum_is_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO, 2.0).max_attempts(), 1);
    }

    #[test]
    fn test_zero_tries_is_unlimited() {
        let policy = RetryPolicy::from_tries(0, Duration::from_secs(10), false);
        assert_eq!(policy.max_attempts(), u32::MAX);
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 1_000_000),
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = policy(10);
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(3), Duration::from_secs(4));
        assert_eq!(policy.calculate_delay(9), Duration::from_secs(32));
    }

    #[test]
    fn test_retry_wait_caps_base_delay() {
        let policy = RetryPolicy::from_tries(5, Duration::from_millis(100), false);
        assert_eq!(policy.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(policy.calculate_delay(4), Duration::from_millis(100));
        let policy = RetryPolicy::from_tries(5, Duration::ZERO, true);
        assert_eq!(policy.calculate_delay(3), Duration::ZERO);
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = policy(5).with_jitter(true);
        for _ in 0..100 {
            let delay = policy.calculate_delay(1);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_secs(1) + MAX_JITTER);
        }
    }

    #[test]
    fn test_fatal_does_not_retry() {
        let decision = policy(5).should_retry(FailureType::Fatal, 1);
        assert!(matches!(decision, RetryDecision::DoNotRetry { .. }));
    }

    #[test]
    fn test_respects_max_attempts() {
        let policy = policy(3);
        assert_eq!(
            policy.should_retry(FailureType::Transient, 1),
            RetryDecision::Retry {
                delay: Duration::from_secs(1),
                attempt: 2
            }
        );
        assert!(matches!(
            policy.should_retry(FailureType::Transient, 2),
            RetryDecision::Retry { attempt: 3, .. }
        ));
        let RetryDecision::DoNotRetry { reason } = policy.should_retry(FailureType::Transient, 3)
        else {
            panic!("expected DoNotRetry");
        };
        assert!(reason.contains("exhausted"));
    }

    #[test]
    fn test_classify_error() {
        let err = FetchError::GatewayTimeout {
            url: "http://a/".to_string(),
        };
        assert_eq!(classify_error(&err), FailureType::Transient);
        let err = FetchError::http_status("http://a/", 404, "Not Found", false);
        assert_eq!(classify_error(&err), FailureType::Fatal);
        let err = FetchError::http_status("http://a/", 503, "Unavailable", true);
        assert_eq!(classify_error(&err), FailureType::Transient);
    }
}
