// crates/review-harness-core/src/retry.rs
// ============================================================================
// Module: Retry Wrapper
// Description: Fixed-delay retry for transient database errors.
// Purpose: Mask transient driver failures from callers.
// Dependencies: std
// ============================================================================

//! ## Overview
//! [`retry`] re-invokes an operation up to [`RetryPolicy::max_attempts`]
//! times, sleeping a fixed delay between attempts. Only errors whose
//! [`Retryable::is_retryable`] returns true are retried; there is no
//! backoff growth and no jitter.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use crate::session::DbError;

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Default attempt count.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Policy that never retries.
    #[must_use]
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

// ============================================================================
// SECTION: Traits
// ============================================================================

/// Classifies whether an error should be retried.
pub trait Retryable {
    /// Returns true when another attempt may succeed.
    fn is_retryable(&self) -> bool;
}

impl Retryable for DbError {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// Blocking delay used between attempts.
pub trait Sleeper: Send + Sync {
    /// Blocks the current thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Sleeper backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

// ============================================================================
// SECTION: Retry
// ============================================================================

/// Runs `op`, retrying retryable errors per `policy`.
///
/// A `max_attempts` of zero is treated as one.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once attempts are
/// exhausted.
pub fn retry<T, E, F>(policy: &RetryPolicy, sleeper: &dyn Sleeper, mut op: F) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Result<T, E>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                sleeper.sleep(policy.delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
