// crates/review-harness-checks/src/concurrent.rs
// ============================================================================
// Module: Concurrency Checks
// Description: Concurrent increments, deadlock tally, serializable conflicts.
// Purpose: Confirm PostgreSQL serializes conflicting harness writers.
// Dependencies: review-harness-core, review-harness-config, serde_json
// ============================================================================

//! ## Overview
//! These checks need rows that other sessions can see, so they commit probe
//! reviews under the reserved probe product and delete them before
//! returning, whether or not the check passed.
//!
//! Two-session checks line their tasks up with a [`Barrier`]: each task
//! runs its first statement, waits for the other, then runs its second.
//! Every task reaches the barrier exactly once, including when its lease
//! or first statement fails.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Barrier;
use std::time::Duration;

use review_harness_config::StressConfig;
use review_harness_core::CancelToken;
use review_harness_core::CheckContext;
use review_harness_core::CheckError;
use review_harness_core::CheckOutput;
use review_harness_core::CheckResult;
use review_harness_core::DbError;
use review_harness_core::DbErrorKind;
use review_harness_core::Query;
use review_harness_core::SessionSource;
use review_harness_core::SqlSession;
use review_harness_core::StepOutcome;
use review_harness_core::Task;
use review_harness_core::TaskOutcome;
use review_harness_core::WorkerPool;
use review_harness_core::session::committed;
use serde_json::json;

use crate::support::TaskTally;
use crate::support::delete_probe_reviews;
use crate::support::insert_probe_review;

// ============================================================================
// SECTION: Statements
// ============================================================================

/// Increments one review's helpful count.
const INCREMENT_SQL: &str =
    "UPDATE review_system.reviews_partitioned SET helpful_count = helpful_count + 1 WHERE review_id = $1";

/// Reads one review's helpful count.
const HELPFUL_COUNT_SQL: &str = "SELECT helpful_count::int8 AS helpful_count \
     FROM review_system.reviews_partitioned WHERE review_id = $1";

/// Takes a row lock without changing the row.
const LOCK_ROW_SQL: &str =
    "UPDATE review_system.reviews_partitioned SET helpful_count = helpful_count WHERE review_id = $1";

/// Raises the transaction to serializable isolation.
const SERIALIZABLE_SQL: &str = "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE";

/// Sums helpful counts across probe rows.
const PROBE_HELPFUL_SUM_SQL: &str = "SELECT COALESCE(SUM(helpful_count), 0)::int8 AS total \
     FROM review_system.reviews_partitioned WHERE review_id = $1 OR review_id = $2";

/// Sets one review's helpful count.
const SET_HELPFUL_SQL: &str =
    "UPDATE review_system.reviews_partitioned SET helpful_count = $2 WHERE review_id = $1";

/// Increment tasks per worker in the update check.
pub const INCREMENTS_PER_WORKER: usize = 5;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads the helpful count of a review.
fn helpful_count(session: &mut dyn SqlSession, review_id: i64) -> Result<i64, CheckError> {
    session
        .query(&Query::new(HELPFUL_COUNT_SQL).bind(review_id))?
        .scalar_i64()
        .ok_or_else(|| CheckError::assertion(format!("review {review_id} not found")))
}

/// Inserts `count` committed probe reviews.
fn committed_probe_rows(ctx: &mut CheckContext<'_>, count: usize) -> Result<Vec<i64>, CheckError> {
    let log = Arc::clone(ctx.log());
    committed(ctx.session(), log.as_ref(), |session| {
        (0 .. count).map(|_| insert_probe_review(session, 4)).collect()
    })
}

/// Deletes probe rows and reports the result as a step.
fn cleanup_step(ctx: &mut CheckContext<'_>) -> StepOutcome {
    match delete_probe_reviews(ctx.session()) {
        Ok(deleted) => StepOutcome::passed("cleanup", format!("{deleted} probe row(s) deleted")),
        Err(err) => {
            ctx.log().warn("probe_cleanup_failed", &err.to_string());
            StepOutcome::failed("cleanup", err.to_string())
        }
    }
}

/// Runs a two-statement transaction with a barrier between the statements.
///
/// # Errors
///
/// Returns the first [`DbError`]; the transaction is rolled back on error.
pub fn two_phase<T, F, S>(
    sessions: &dyn SessionSource,
    acquire_timeout: Duration,
    barrier: &Barrier,
    first: F,
    second: S,
) -> Result<(), DbError>
where
    F: FnOnce(&mut dyn SqlSession) -> Result<T, DbError>,
    S: FnOnce(&mut dyn SqlSession, T) -> Result<(), DbError>,
{
    let mut lease = match sessions.lease_timeout(acquire_timeout) {
        Ok(lease) => lease,
        Err(err) => {
            barrier.wait();
            return Err(DbError::new(DbErrorKind::Connection, err.to_string()));
        }
    };
    let opened = lease.begin().and_then(|()| first(&mut *lease));
    barrier.wait();
    let result = opened.and_then(|value| second(&mut *lease, value)).and_then(|()| lease.commit());
    if result.is_err() {
        let _ = lease.rollback();
    }
    result
}

/// Takes a row lock on one review.
fn lock_row(session: &mut dyn SqlSession, review_id: i64) -> Result<(), DbError> {
    session.execute(&Query::new(LOCK_ROW_SQL).bind(review_id)).map(|_| ())
}

/// Collects the database errors of completed two-phase tasks.
fn task_errors(outcomes: &[TaskOutcome<Result<(), DbError>>]) -> (usize, Vec<DbError>, usize) {
    let mut committed = 0;
    let mut errors = Vec::new();
    let mut unfinished = 0;
    for outcome in outcomes {
        match outcome {
            TaskOutcome::Completed(Ok(())) => committed += 1,
            TaskOutcome::Completed(Err(err)) => errors.push(err.clone()),
            TaskOutcome::Panicked(_) | TaskOutcome::TimedOut => unfinished += 1,
        }
    }
    (committed, errors, unfinished)
}

// ============================================================================
// SECTION: Concurrent Updates
// ============================================================================

/// Increments one probe review from many sessions and checks none is lost.
///
/// # Errors
///
/// Returns [`CheckError`] when the probe row cannot be created or read.
pub fn concurrent_updates(
    ctx: &mut CheckContext<'_>,
    stress: &StressConfig,
    acquire_timeout: Duration,
) -> CheckResult {
    let ids = committed_probe_rows(ctx, 1)?;
    let review_id = ids.first().copied().ok_or_else(|| CheckError::assertion("no probe review"))?;
    let result = increment_from_workers(ctx, review_id, stress, acquire_timeout);
    let cleanup = cleanup_step(ctx);
    let (mut steps, details) = result?;
    steps.push(cleanup);
    Ok(CheckOutput::steps(steps, details))
}

/// Runs the increments and compares the final count.
fn increment_from_workers(
    ctx: &mut CheckContext<'_>,
    review_id: i64,
    stress: &StressConfig,
    acquire_timeout: Duration,
) -> Result<(Vec<StepOutcome>, serde_json::Value), CheckError> {
    let baseline = helpful_count(ctx.session(), review_id)?;
    let pool = WorkerPool::new(stress.workers);
    let operations = pool.workers() * INCREMENTS_PER_WORKER;
    let tasks: Vec<Task<Result<u64, String>>> = (0 .. operations)
        .map(|_| {
            let sessions = Arc::clone(ctx.sessions());
            let log = Arc::clone(ctx.log());
            let task: Task<Result<u64, String>> = Box::new(move |_: &CancelToken| {
                let mut lease = sessions.lease_timeout(acquire_timeout).map_err(|err| err.to_string())?;
                let increment = Query::new(INCREMENT_SQL).bind(review_id);
                committed(&mut *lease, log.as_ref(), |session| session.execute(&increment))
                    .map_err(|err| err.to_string())
            });
            task
        })
        .collect();
    let outcomes = pool.run(tasks, Some(stress.adverse_timeout()));
    let applied: u64 = outcomes.iter().filter_map(|outcome| outcome.as_completed()).flatten().sum();
    let tally = TaskTally::from_outcomes(&outcomes);
    let final_count = helpful_count(ctx.session(), review_id)?;
    let observed = u64::try_from(final_count - baseline).unwrap_or(0);
    let steps = vec![
        StepOutcome::passed("probe_row", format!("review_id {review_id}")),
        StepOutcome::check(
            "all_committed",
            tally.succeeded == operations,
            format!("{}/{operations} increments committed", tally.succeeded),
        ),
        StepOutcome::check(
            "count_consistent",
            observed == applied,
            format!("helpful_count rose by {observed}, {applied} increment(s) committed"),
        ),
    ];
    let details = json!({
        "operations": operations,
        "baseline": baseline,
        "final": final_count,
        "tally": tally.to_json(),
    });
    Ok((steps, details))
}

// ============================================================================
// SECTION: Deadlocks
// ============================================================================

/// Locks two probe rows in opposite orders from two sessions.
///
/// A deadlock (`40P01`) is tallied, not fatal. The check fails only when a
/// task fails for another reason or never finishes.
///
/// # Errors
///
/// Returns [`CheckError`] when the probe rows cannot be created.
pub fn deadlock_tally(
    ctx: &mut CheckContext<'_>,
    stress: &StressConfig,
    acquire_timeout: Duration,
) -> CheckResult {
    let ids = committed_probe_rows(ctx, 2)?;
    let (Some(&first), Some(&second)) = (ids.first(), ids.get(1)) else {
        let steps = vec![StepOutcome::failed("probe_rows", "two rows not created"), cleanup_step(ctx)];
        return Ok(CheckOutput::steps(steps, json!({})));
    };
    let barrier = Arc::new(Barrier::new(2));
    let tasks: Vec<Task<Result<(), DbError>>> = [(first, second), (second, first)]
        .into_iter()
        .map(|(lock_first, lock_second)| {
            let sessions = Arc::clone(ctx.sessions());
            let barrier = Arc::clone(&barrier);
            let task: Task<Result<(), DbError>> = Box::new(move |_: &CancelToken| {
                two_phase(
                    sessions.as_ref(),
                    acquire_timeout,
                    &barrier,
                    |session| lock_row(session, lock_first),
                    |session, ()| lock_row(session, lock_second),
                )
            });
            task
        })
        .collect();
    let outcomes = WorkerPool::new(2).run(tasks, Some(stress.adverse_timeout()));
    let (committed_count, errors, unfinished) = task_errors(&outcomes);
    let deadlocks = errors.iter().filter(|err| err.is(DbErrorKind::Deadlock)).count();
    let other: Vec<String> =
        errors.iter().filter(|err| !err.is(DbErrorKind::Deadlock)).map(ToString::to_string).collect();
    if deadlocks > 0 {
        ctx.log().info("deadlock_detected", &format!("{deadlocks} deadlock(s) resolved by the server"));
    }
    let steps = vec![
        StepOutcome::check("tasks_finished", unfinished == 0, format!("{unfinished} task(s) unfinished")),
        StepOutcome::check("only_deadlocks", other.is_empty(), other.join("; ")),
        StepOutcome::check(
            "one_committed",
            committed_count >= 1,
            format!("{committed_count} transaction(s) committed"),
        ),
        cleanup_step(ctx),
    ];
    Ok(CheckOutput::steps(steps, json!({ "deadlocks": deadlocks, "committed": committed_count })))
}

// ============================================================================
// SECTION: Serializable Isolation
// ============================================================================

/// Runs two conflicting serializable transactions.
///
/// Passes when at least one commits and every failure is a serialization
/// failure (`40001`).
///
/// # Errors
///
/// Returns [`CheckError`] when the probe rows cannot be created.
pub fn serializable_probe(
    ctx: &mut CheckContext<'_>,
    stress: &StressConfig,
    acquire_timeout: Duration,
) -> CheckResult {
    let ids = committed_probe_rows(ctx, 2)?;
    let (Some(&first), Some(&second)) = (ids.first(), ids.get(1)) else {
        let steps = vec![StepOutcome::failed("probe_rows", "two rows not created"), cleanup_step(ctx)];
        return Ok(CheckOutput::steps(steps, json!({})));
    };
    let barrier = Arc::new(Barrier::new(2));
    let tasks: Vec<Task<Result<(), DbError>>> = [first, second]
        .into_iter()
        .map(|target| {
            let sessions = Arc::clone(ctx.sessions());
            let barrier = Arc::clone(&barrier);
            let task: Task<Result<(), DbError>> = Box::new(move |_: &CancelToken| {
                two_phase(
                    sessions.as_ref(),
                    acquire_timeout,
                    &barrier,
                    |session| {
                        session.batch_execute(SERIALIZABLE_SQL)?;
                        let sum = Query::new(PROBE_HELPFUL_SUM_SQL).bind(first).bind(second);
                        Ok(session.query(&sum)?.scalar_i64().unwrap_or(0))
                    },
                    |session, total: i64| {
                        let update = Query::new(SET_HELPFUL_SQL).bind(target).bind(total + 1);
                        session.execute(&update).map(|_| ())
                    },
                )
            });
            task
        })
        .collect();
    let outcomes = WorkerPool::new(2).run(tasks, Some(stress.adverse_timeout()));
    let (committed_count, errors, unfinished) = task_errors(&outcomes);
    let serialization = errors.iter().filter(|err| err.is(DbErrorKind::Serialization)).count();
    let other: Vec<String> =
        errors.iter().filter(|err| !err.is(DbErrorKind::Serialization)).map(ToString::to_string).collect();
    let steps = vec![
        StepOutcome::check("tasks_finished", unfinished == 0, format!("{unfinished} task(s) unfinished")),
        StepOutcome::check(
            "committed_any",
            committed_count >= 1,
            format!("{committed_count} transaction(s) committed"),
        ),
        StepOutcome::check("failures_are_serialization", other.is_empty(), other.join("; ")),
        cleanup_step(ctx),
    ];
    Ok(CheckOutput::steps(
        steps,
        json!({ "committed": committed_count, "serialization_failures": serialization }),
    ))
}
