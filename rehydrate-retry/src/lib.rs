//! Bounded exponential backoff for Rehydrate persistence
//!
//! Persistence retries are synchronous: the caller of a persist attempt blocks
//! while the backoff sleeps run. Retry attempt `i` (1-based) waits
//! `2^i * base_delay` before re-running the operation, and the loop gives up
//! after `max_retries` retries or on the first permanent error.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors returned by the retry loop
#[derive(Error, Debug)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("Operation '{operation}' failed after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: E,
    },
    #[error("Permanent error in '{operation}' on attempt {attempts}: {source}")]
    Permanent {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: E,
    },
    #[error("Operation '{operation}' cancelled after {attempts} attempts: {source}")]
    Cancelled {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// Number of attempts made before giving up
    pub fn attempts(&self) -> u32 {
        match self {
            Self::MaxRetriesExceeded { attempts, .. }
            | Self::Permanent { attempts, .. }
            | Self::Cancelled { attempts, .. } => *attempts,
        }
    }

    /// The error returned by the last attempt
    pub fn into_source(self) -> E {
        match self {
            Self::MaxRetriesExceeded { source, .. }
            | Self::Permanent { source, .. }
            | Self::Cancelled { source, .. } => source,
        }
    }
}

/// Result type for retry operations
pub type RetryResult<T, E> = std::result::Result<T, RetryError<E>>;

/// Trait for categorizing errors as transient or permanent
pub trait RetryableError {
    /// Returns true if the error is transient and the operation should be retried
    fn is_transient(&self) -> bool;

    /// Returns true if the error is permanent and retries should stop
    fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Retry bounds: how many retries and the time unit the exponent scales
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Deterministic doubling schedule starting at `2 * base_delay`
    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay * 2)
            .with_randomization_factor(0.0)
            .with_multiplier(2.0)
            .with_max_interval(Duration::from_secs(60 * 60))
            .with_max_elapsed_time(None)
            .build()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(100))
    }
}

/// A retry loop for a named operation
pub struct Retry<'a> {
    operation: &'static str,
    policy: RetryPolicy,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> Retry<'a> {
    pub fn new(operation: &'static str, policy: RetryPolicy) -> Self {
        Self {
            operation,
            policy,
            cancel: None,
        }
    }

    /// Stop retrying once `flag` is set. Checked before every backoff sleep.
    pub fn cancel_on(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Run `f` until it succeeds, fails permanently, or the retry budget is spent.
    ///
    /// `f` receives the 1-based attempt number.
    pub fn run<T, E, F>(self, mut f: F) -> RetryResult<T, E>
    where
        E: std::error::Error + RetryableError + 'static,
        F: FnMut(u32) -> std::result::Result<T, E>,
    {
        let mut schedule = self.policy.schedule();
        let mut attempt = 1;

        loop {
            debug!("Attempting operation '{}' (attempt {})", self.operation, attempt);

            let err = match f(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(
                            "Operation '{}' succeeded after {} attempts",
                            self.operation, attempt
                        );
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.is_permanent() {
                warn!(
                    "Operation '{}' failed permanently on attempt {}: {}",
                    self.operation, attempt, err
                );
                return Err(RetryError::Permanent {
                    operation: self.operation,
                    attempts: attempt,
                    source: err,
                });
            }

            warn!(
                "Operation '{}' failed on attempt {}: {}",
                self.operation, attempt, err
            );

            if attempt > self.policy.max_retries {
                return Err(RetryError::MaxRetriesExceeded {
                    operation: self.operation,
                    attempts: attempt,
                    source: err,
                });
            }

            if self.is_cancelled() {
                return Err(RetryError::Cancelled {
                    operation: self.operation,
                    attempts: attempt,
                    source: err,
                });
            }

            let delay = schedule
                .next_backoff()
                .unwrap_or(self.policy.base_delay * 2);
            debug!(
                "Retrying operation '{}' in {:?}",
                self.operation, delay
            );
            std::thread::sleep(delay);

            attempt += 1;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;
    use std::time::Instant;

    #[derive(Debug)]
    struct TestError {
        transient: bool,
    }

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.transient {
                write!(f, "connection refused")
            } else {
                write!(f, "permission denied")
            }
        }
    }

    impl std::error::Error for TestError {}

    impl RetryableError for TestError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1))
    }

    #[test]
    fn test_successful_operation() {
        let result: RetryResult<&str, TestError> =
            Retry::new("test_op", fast_policy(3)).run(|_attempt| Ok("success"));

        assert_eq!(result.unwrap(), "success");
    }

    #[test]
    fn test_transient_failure_then_success() {
        let mut calls = 0;
        let result = Retry::new("test_op", fast_policy(3)).run(|attempt| {
            calls += 1;
            if attempt < 3 {
                Err(TestError { transient: true })
            } else {
                Ok(attempt)
            }
        });

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_retries_are_bounded() {
        let mut calls = 0;
        let result: RetryResult<(), TestError> =
            Retry::new("test_op", fast_policy(2)).run(|_attempt| {
                calls += 1;
                Err(TestError { transient: true })
            });

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::MaxRetriesExceeded { .. }));
        assert_eq!(err.attempts(), 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_permanent_failure_is_not_retried() {
        let mut calls = 0;
        let result: RetryResult<(), TestError> =
            Retry::new("test_op", fast_policy(5)).run(|_attempt| {
                calls += 1;
                Err(TestError { transient: false })
            });

        assert!(matches!(result, Err(RetryError::Permanent { attempts: 1, .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_cancelled_loop_stops_before_sleeping() {
        let flag = AtomicBool::new(true);
        let mut calls = 0;
        let result: RetryResult<(), TestError> = Retry::new("test_op", fast_policy(5))
            .cancel_on(&flag)
            .run(|_attempt| {
                calls += 1;
                Err(TestError { transient: true })
            });

        assert!(matches!(result, Err(RetryError::Cancelled { .. })));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_backoff_doubles_each_attempt() {
        let mut schedule = RetryPolicy::new(3, Duration::from_millis(10)).schedule();

        assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(20)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(40)));
        assert_eq!(schedule.next_backoff(), Some(Duration::from_millis(80)));
    }

    #[test]
    fn test_total_sleep_follows_schedule() {
        let start = Instant::now();
        let _: RetryResult<(), TestError> =
            Retry::new("test_op", RetryPolicy::new(2, Duration::from_millis(5)))
                .run(|_attempt| Err(TestError { transient: true }));

        // 2 * 5ms + 4 * 5ms
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_no_retry_policy() {
        let mut calls = 0;
        let result: RetryResult<(), TestError> =
            Retry::new("test_op", RetryPolicy::no_retry()).run(|_attempt| {
                calls += 1;
                Err(TestError { transient: true })
            });

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
