// crates/review-harness-checks/src/support.rs
// ============================================================================
// Module: Check Support
// Description: Shared probe fixtures, timing, and attempt classification.
// Purpose: Keep probe rows and blocked/leaked rules identical across checks.
// Dependencies: review-harness-core
// ============================================================================

//! ## Overview
//! Probe rows are written under [`PROBE_PRODUCT_ID`], a product id outside
//! the range used by application data, so cleanup can delete by product.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Instant;

use review_harness_core::CheckError;
use review_harness_core::DbError;
use review_harness_core::DbErrorKind;
use review_harness_core::Query;
use review_harness_core::SqlRows;
use review_harness_core::SqlSession;
use review_harness_core::TaskOutcome;
use serde_json::Value;
use serde_json::json;

// ============================================================================
// SECTION: Probe Data
// ============================================================================

/// Product id reserved for harness probe rows.
pub const PROBE_PRODUCT_ID: i64 = 999_000_001;
/// User id recorded on harness probe rows.
pub const PROBE_USER_ID: i64 = 999_000_001;

/// Inserts one review and returns its id.
pub const INSERT_REVIEW_SQL: &str = "INSERT INTO review_system.reviews_partitioned \
     (product_id, user_id, rating, title, content) VALUES ($1, $2, $3, $4, $5) RETURNING review_id";

/// Deletes every probe review.
const DELETE_PROBE_REVIEWS_SQL: &str =
    "DELETE FROM review_system.reviews_partitioned WHERE product_id = $1";

/// Builds the probe review insert for `rating`.
#[must_use]
pub fn probe_review_insert(rating: i64) -> Query {
    Query::new(INSERT_REVIEW_SQL)
        .bind(PROBE_PRODUCT_ID)
        .bind(PROBE_USER_ID)
        .bind(rating)
        .bind("harness probe")
        .bind("written by the review harness")
}

/// Inserts a probe review and returns its `review_id`.
///
/// # Errors
///
/// Returns [`CheckError`] when the insert fails or returns no id.
pub fn insert_probe_review(session: &mut dyn SqlSession, rating: i64) -> Result<i64, CheckError> {
    session
        .query(&probe_review_insert(rating))?
        .scalar_i64()
        .ok_or_else(|| CheckError::assertion("review insert returned no review_id"))
}

/// Deletes every probe review, returning the number removed.
///
/// # Errors
///
/// Returns [`CheckError`] when the delete fails.
pub fn delete_probe_reviews(session: &mut dyn SqlSession) -> Result<u64, CheckError> {
    Ok(session.execute(&Query::new(DELETE_PROBE_REVIEWS_SQL).bind(PROBE_PRODUCT_ID))?)
}

// ============================================================================
// SECTION: Attempts
// ============================================================================

/// Result of a hostile statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// The statement errored or returned nothing.
    Blocked {
        /// How the attempt was stopped.
        reason: String,
    },
    /// The statement returned rows.
    Leaked {
        /// Number of rows returned.
        rows: usize,
    },
    /// The statement returned nothing but had a visible side effect.
    Executed {
        /// What the payload did.
        effect: String,
    },
}

impl Attempt {
    /// Classifies a statement result.
    ///
    /// # Errors
    ///
    /// Returns the driver error when the connection itself was lost, since
    /// that says nothing about whether the attempt was blocked.
    pub fn classify(result: Result<SqlRows, DbError>) -> Result<Self, CheckError> {
        match result {
            Ok(rows) if rows.is_empty() => Ok(Self::Blocked {
                reason: "no rows returned".to_string(),
            }),
            Ok(rows) => Ok(Self::Leaked {
                rows: rows.len(),
            }),
            Err(err) if is_connection_loss(&err) => Err(err.into()),
            Err(err) => Ok(Self::Blocked {
                reason: format!("rejected ({})", err.kind),
            }),
        }
    }

    /// Returns true when the attempt was blocked.
    #[must_use]
    pub const fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Returns a one-line description.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Blocked {
                reason,
            } => format!("blocked: {reason}"),
            Self::Leaked {
                rows,
            } => format!("leaked {rows} row(s)"),
            Self::Executed {
                effect,
            } => format!("executed: {effect}"),
        }
    }
}

/// Returns true for errors that mean the session itself is gone.
#[must_use]
pub const fn is_connection_loss(err: &DbError) -> bool {
    matches!(err.kind, DbErrorKind::Connection | DbErrorKind::Terminated)
}

/// Renders an optional integer for step messages.
#[must_use]
pub fn describe(value: Option<i64>) -> String {
    value.map_or_else(|| "none".to_string(), |value| value.to_string())
}

// ============================================================================
// SECTION: Task Tally
// ============================================================================

/// Error messages kept per tally.
const MAX_SAMPLE_ERRORS: usize = 5;

/// Counts over a batch of worker task outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskTally {
    /// Tasks that returned `Ok`.
    pub succeeded: usize,
    /// Tasks that returned `Err`.
    pub failed: usize,
    /// Tasks that panicked.
    pub panicked: usize,
    /// Tasks that did not finish in time.
    pub timed_out: usize,
    /// First few error messages.
    pub sample_errors: Vec<String>,
}

impl TaskTally {
    /// Tallies task outcomes.
    #[must_use]
    pub fn from_outcomes<T>(outcomes: &[TaskOutcome<Result<T, String>>]) -> Self {
        let mut tally = Self::default();
        for outcome in outcomes {
            match outcome {
                TaskOutcome::Completed(Ok(_)) => tally.succeeded += 1,
                TaskOutcome::Completed(Err(message)) => {
                    tally.failed += 1;
                    tally.sample(message);
                }
                TaskOutcome::Panicked(message) => {
                    tally.panicked += 1;
                    tally.sample(message);
                }
                TaskOutcome::TimedOut => tally.timed_out += 1,
            }
        }
        tally
    }

    /// Keeps a message if the sample is not full.
    fn sample(&mut self, message: &str) {
        if self.sample_errors.len() < MAX_SAMPLE_ERRORS {
            self.sample_errors.push(message.to_string());
        }
    }

    /// Returns the number of tallied tasks.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.succeeded + self.failed + self.panicked + self.timed_out
    }

    /// Returns the share of tasks that did not succeed.
    #[must_use]
    pub fn error_rate(&self) -> f64 {
        ratio(self.total() - self.succeeded, self.total())
    }

    /// Renders the tally for report details.
    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "succeeded": self.succeeded,
            "failed": self.failed,
            "panicked": self.panicked,
            "timed_out": self.timed_out,
            "error_rate": self.error_rate(),
            "sample_errors": self.sample_errors,
        })
    }
}

// ============================================================================
// SECTION: Timing
// ============================================================================

/// Milliseconds since `started`, saturating.
#[must_use]
pub fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Ratio of two counts, zero when the denominator is zero.
#[must_use]
#[allow(clippy::cast_precision_loss, reason = "Operation counts stay far below 2^52.")]
pub fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 { 0.0 } else { part as f64 / whole as f64 }
}
