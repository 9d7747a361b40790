// crates/review-harness-core/src/runner.rs
// ============================================================================
// Module: Test Runner
// Description: Executes checks against pooled sessions and records results.
// Purpose: Guarantee one result per invocation and no leaked connections.
// Dependencies: serde_json, crate::{pool, log, outcome, error, retry}
// ============================================================================

//! ## Overview
//! [`TestRunner::run`] leases a session, hands the check a [`CheckContext`],
//! and appends exactly one [`TestResult`]. Check errors, lease failures, and
//! panics all become failed results; nothing a check does aborts the run.
//! The lease is dropped before the result is recorded, so the pool is back at
//! its prior availability when `run` returns.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value;
use serde_json::json;

use crate::error::CheckError;
use crate::log::HarnessLog;
use crate::log::LogEvent;
use crate::log::LogLevel;
use crate::outcome::CheckOutput;
use crate::pool::SessionSource;
use crate::result::Category;
use crate::result::TestResult;
use crate::retry::RetryPolicy;
use crate::retry::Sleeper;
use crate::retry::ThreadSleeper;
use crate::retry::retry;
use crate::session::SqlSession;
use crate::worker::panic_message;

// ============================================================================
// SECTION: Check Context
// ============================================================================

/// Return type of every check.
pub type CheckResult = Result<CheckOutput, CheckError>;

/// Everything a check may use while it runs.
pub struct CheckContext<'a> {
    /// Session leased for this check.
    session: &'a mut dyn SqlSession,
    /// Pool for checks that need extra sessions.
    sessions: &'a Arc<dyn SessionSource>,
    /// Shared log sink.
    log: &'a Arc<dyn HarnessLog>,
    /// Retry policy for transient driver errors.
    retry: RetryPolicy,
    /// Delay implementation used between retries.
    sleeper: &'a dyn Sleeper,
}

impl<'a> CheckContext<'a> {
    /// Creates a context.
    #[must_use]
    pub fn new(
        session: &'a mut dyn SqlSession,
        sessions: &'a Arc<dyn SessionSource>,
        log: &'a Arc<dyn HarnessLog>,
        retry: RetryPolicy,
        sleeper: &'a dyn Sleeper,
    ) -> Self {
        Self {
            session,
            sessions,
            log,
            retry,
            sleeper,
        }
    }

    /// Returns the leased session.
    pub fn session(&mut self) -> &mut dyn SqlSession {
        &mut *self.session
    }

    /// Returns the pool.
    #[must_use]
    pub const fn sessions(&self) -> &Arc<dyn SessionSource> {
        self.sessions
    }

    /// Returns the log sink.
    #[must_use]
    pub const fn log(&self) -> &Arc<dyn HarnessLog> {
        self.log
    }

    /// Returns the retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Runs `op` on the leased session under the retry policy.
    ///
    /// # Errors
    ///
    /// Returns the last error once attempts are exhausted, or the first
    /// non-retryable error.
    pub fn with_retry<T, F>(&mut self, mut op: F) -> Result<T, CheckError>
    where
        F: FnMut(&mut dyn SqlSession) -> Result<T, CheckError>,
    {
        let session = &mut *self.session;
        retry(&self.retry, self.sleeper, || op(&mut *session))
    }
}

// ============================================================================
// SECTION: Summary
// ============================================================================

/// Counts over the recorded results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Number of results.
    pub total: usize,
    /// Passing results.
    pub passed: usize,
    /// Failing results.
    pub failed: usize,
    /// Summed duration.
    pub duration: Duration,
}

impl RunSummary {
    /// Builds a summary over `results`.
    #[must_use]
    pub fn from_results(results: &[TestResult]) -> Self {
        let passed = results.iter().filter(|result| result.passed()).count();
        Self {
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration: results.iter().map(TestResult::duration).sum(),
        }
    }

    /// Returns `Total: N, Passed: P, Failed: F, Duration: X.XXs`.
    #[must_use]
    pub fn line(&self) -> String {
        format!(
            "Total: {}, Passed: {}, Failed: {}, Duration: {:.2}s",
            self.total,
            self.passed,
            self.failed,
            self.duration.as_secs_f64()
        )
    }
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Sequential check runner.
pub struct TestRunner {
    /// Pool that supplies one session per check.
    sessions: Arc<dyn SessionSource>,
    /// Shared log sink.
    log: Arc<dyn HarnessLog>,
    /// Retry policy handed to checks.
    retry: RetryPolicy,
    /// Sleeper handed to checks.
    sleeper: Arc<dyn Sleeper>,
    /// Results in invocation order.
    results: Vec<TestResult>,
}

impl TestRunner {
    /// Creates a runner with the default retry policy.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionSource>, log: Arc<dyn HarnessLog>) -> Self {
        Self {
            sessions,
            log,
            retry: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
            results: Vec::new(),
        }
    }

    /// Overrides the retry policy and sleeper handed to checks.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy, sleeper: Arc<dyn Sleeper>) -> Self {
        self.retry = retry;
        self.sleeper = sleeper;
        self
    }

    /// Runs one check, records its result, and returns a copy of it.
    pub fn run<F>(&mut self, category: Category, name: &str, check: F) -> TestResult
    where
        F: FnOnce(&mut CheckContext<'_>) -> CheckResult,
    {
        let started = Instant::now();
        let (passed, message, details) = match self.sessions.lease() {
            Err(err) => failure(&CheckError::from(err)),
            Ok(mut lease) => {
                let outcome = {
                    let mut ctx = CheckContext::new(
                        &mut *lease,
                        &self.sessions,
                        &self.log,
                        self.retry,
                        self.sleeper.as_ref(),
                    );
                    catch_unwind(AssertUnwindSafe(|| check(&mut ctx)))
                };
                let recorded = match outcome {
                    Ok(Ok(output)) => {
                        let details = match output.details {
                            Value::Null => None,
                            other => Some(other),
                        };
                        (output.outcome.passed(), output.outcome.message(), details)
                    }
                    Ok(Err(err)) => failure(&err),
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        (
                            false,
                            format!("panic: {message}"),
                            Some(json!({
                                "error_type": "panic",
                                "message": message,
                                "sources": [],
                            })),
                        )
                    }
                };
                if !recorded.0 {
                    // Leave no open transaction behind on the pooled session.
                    let _ = lease.rollback();
                }
                drop(lease);
                recorded
            }
        };
        let result =
            TestResult::new(category, name, passed, message, started.elapsed(), details);
        self.log.record(
            &LogEvent::new(
                "check_finished",
                if passed { LogLevel::Info } else { LogLevel::Warn },
                result.message(),
            )
            .with_field("category", category.as_str())
            .with_field("name", name)
            .with_field("passed", passed)
            .with_field("duration_ms", u64::try_from(result.duration().as_millis()).unwrap_or(u64::MAX)),
        );
        self.results.push(result.clone());
        result
    }

    /// Returns the results in invocation order.
    #[must_use]
    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    /// Consumes the runner and returns its results.
    #[must_use]
    pub fn into_results(self) -> Vec<TestResult> {
        self.results
    }

    /// Returns counts over the recorded results.
    #[must_use]
    pub fn summary(&self) -> RunSummary {
        RunSummary::from_results(&self.results)
    }

    /// Returns the one-line run summary.
    #[must_use]
    pub fn summary_line(&self) -> String {
        self.summary().line()
    }

    /// Returns true when every recorded result passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(TestResult::passed)
    }
}

/// Converts a check error into recorded failure fields.
fn failure(err: &CheckError) -> (bool, String, Option<Value>) {
    (false, err.to_string(), Some(err.details()))
}
