// crates/review-harness-checks/src/stress.rs
// ============================================================================
// Module: Stress Checks
// Description: Bulk insert, parallel workload, and the adverse battery.
// Purpose: Probe throughput and resilience under load and induced failures.
// Dependencies: review-harness-core, review-harness-config, serde_json
// ============================================================================

//! ## Overview
//! Parallel work goes through [`WorkerPool`]. Each task leases its own
//! session and the lease guard returns it on every exit path, so a task that
//! outlives the batch deadline still gives its connection back when it
//! finishes.
//!
//! The adverse battery floods the pool and then kills a backend to confirm
//! the pool replaces the dead connection. It runs under
//! `stress.adverse_timeout_secs`; on expiry the check fails as timed out and
//! the run continues.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use review_harness_config::StressConfig;
use review_harness_core::CancelToken;
use review_harness_core::CheckContext;
use review_harness_core::CheckError;
use review_harness_core::CheckOutput;
use review_harness_core::CheckResult;
use review_harness_core::HarnessLog;
use review_harness_core::Outcome;
use review_harness_core::PoolError;
use review_harness_core::Query;
use review_harness_core::SessionSource;
use review_harness_core::SqlSession;
use review_harness_core::StepOutcome;
use review_harness_core::Task;
use review_harness_core::TaskOutcome;
use review_harness_core::WorkerPool;
use review_harness_core::run_with_timeout;
use review_harness_core::session::committed;
use review_harness_core::session::rolled_back;
use serde_json::json;

use crate::support::PROBE_PRODUCT_ID;
use crate::support::PROBE_USER_ID;
use crate::support::TaskTally;
use crate::support::elapsed_ms;
use crate::support::insert_probe_review;
use crate::support::is_connection_loss;

// ============================================================================
// SECTION: Statements
// ============================================================================

/// Set-based batch insert of probe reviews.
const BULK_INSERT_SQL: &str = "INSERT INTO review_system.reviews_partitioned \
     (product_id, user_id, rating, title, content) \
     SELECT $1, $2::int8 + g, (g % 5) + 1, 'bulk probe', 'bulk probe content' \
     FROM generate_series(1, $3::int4) AS g";

/// Read half of the parallel workload.
const WORKLOAD_READ_SQL: &str =
    "SELECT COUNT(*) AS reviews FROM review_system.reviews_partitioned WHERE product_id = $1";

/// Write half of the parallel workload; bumps the task's own probe review.
const WORKLOAD_WRITE_SQL: &str = "UPDATE review_system.reviews_partitioned \
     SET helpful_count = helpful_count + 1 WHERE review_id = $1 AND product_id = $2";

/// Removes the task's probe review once the write is done.
const WORKLOAD_CLEANUP_SQL: &str =
    "DELETE FROM review_system.reviews_partitioned WHERE review_id = $1 AND product_id = $2";

/// Liveness probe.
const ALIVE_SQL: &str = "SELECT 1 AS alive";

/// Terminates the session's own backend.
const TERMINATE_SELF_SQL: &str = "SELECT pg_terminate_backend(pg_backend_pid())";

/// How long the flood waits for a lease beyond capacity.
const OVER_CAPACITY_WAIT: Duration = Duration::from_millis(200);

// ============================================================================
// SECTION: Bulk Insert
// ============================================================================

/// Inserts `stress.bulk_rows` rows in batches inside a rolled-back
/// transaction and times the whole load.
///
/// # Errors
///
/// Returns [`CheckError`] when a batch fails.
pub fn bulk_insert(ctx: &mut CheckContext<'_>, stress: &StressConfig) -> CheckResult {
    let total = stress.bulk_rows;
    let batch = stress.bulk_batch.max(1);
    let started = Instant::now();
    let inserted = rolled_back(ctx.session(), |session| {
        let mut inserted = 0_u64;
        let mut offset = 0_u32;
        while offset < total {
            let size = batch.min(total - offset);
            let query = Query::new(BULK_INSERT_SQL)
                .bind(PROBE_PRODUCT_ID)
                .bind(PROBE_USER_ID + i64::from(offset))
                .bind(i64::from(size));
            inserted += session.execute(&query)?;
            offset += size;
        }
        Ok::<_, CheckError>(inserted)
    })?;
    let elapsed = elapsed_ms(started);
    let rows_per_sec = u64::from(total) * 1_000 / elapsed.max(1);
    let steps = vec![
        StepOutcome::check("rows_inserted", inserted == u64::from(total), format!("{inserted}/{total} rows")),
        StepOutcome::check(
            "within_time",
            elapsed <= stress.bulk_max_ms,
            format!("{elapsed} ms (limit {} ms)", stress.bulk_max_ms),
        ),
    ];
    Ok(CheckOutput::steps(
        steps,
        json!({
            "rows": total,
            "batch": batch,
            "inserted": inserted,
            "elapsed_ms": elapsed,
            "rows_per_sec": rows_per_sec,
        }),
    ))
}

// ============================================================================
// SECTION: Parallel Workload
// ============================================================================

/// Write task body: insert a probe review, update it, delete it, commit.
///
/// Returns the rows the update touched.
fn workload_write(session: &mut dyn SqlSession, log: &dyn HarnessLog) -> Result<u64, CheckError> {
    committed(session, log, |session| {
        let review_id = insert_probe_review(session, 3)?;
        let updated =
            session.execute(&Query::new(WORKLOAD_WRITE_SQL).bind(review_id).bind(PROBE_PRODUCT_ID))?;
        session.execute(&Query::new(WORKLOAD_CLEANUP_SQL).bind(review_id).bind(PROBE_PRODUCT_ID))?;
        if updated == 0 {
            return Err(CheckError::assertion(format!("update of review {review_id} touched no rows")));
        }
        Ok(updated)
    })
}

/// Builds one workload task; even indices read, odd indices write.
///
/// A task yields the number of rows it wrote.
fn workload_task(
    sessions: Arc<dyn SessionSource>,
    log: Arc<dyn HarnessLog>,
    index: usize,
    acquire_timeout: Duration,
) -> Task<Result<u64, String>> {
    Box::new(move |token: &CancelToken| {
        if token.is_cancelled() {
            return Err("cancelled before start".to_string());
        }
        let mut lease = sessions.lease_timeout(acquire_timeout).map_err(|err| err.to_string())?;
        if index % 2 == 0 {
            let query = Query::new(WORKLOAD_READ_SQL).bind(PROBE_PRODUCT_ID);
            lease.query(&query).map(|_| 0).map_err(|err| err.to_string())
        } else {
            workload_write(&mut *lease, log.as_ref()).map_err(|err| err.to_string())
        }
    })
}

/// Runs `stress.operations` mixed reads and writes on `stress.workers`
/// threads; passes when the error rate stays within bounds and the write
/// tasks actually changed rows.
///
/// # Errors
///
/// This check reports failures through its outcome and does not error.
pub fn parallel_workload(
    ctx: &mut CheckContext<'_>,
    stress: &StressConfig,
    acquire_timeout: Duration,
) -> CheckResult {
    let pool = WorkerPool::new(stress.workers);
    let tasks: Vec<Task<Result<u64, String>>> = (0 .. stress.operations)
        .map(|index| workload_task(Arc::clone(ctx.sessions()), Arc::clone(ctx.log()), index, acquire_timeout))
        .collect();
    let writes = stress.operations / 2;
    let started = Instant::now();
    let outcomes = pool.run(tasks, Some(stress.adverse_timeout()));
    let tally = TaskTally::from_outcomes(&outcomes);
    let rows_written: u64 = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            TaskOutcome::Completed(Ok(rows)) => Some(*rows),
            _ => None,
        })
        .sum();
    let rate = tally.error_rate();
    let failure = if rate > stress.max_error_rate {
        Some(format!("error rate {:.3} exceeds {:.3}", rate, stress.max_error_rate))
    } else if writes > 0 && rows_written == 0 {
        Some(format!("{writes} write task(s) changed no rows"))
    } else {
        None
    };
    Ok(CheckOutput::from_condition(
        failure.is_none(),
        failure.unwrap_or_default(),
        json!({
            "operations": stress.operations,
            "workers": pool.workers(),
            "write_tasks": writes,
            "rows_written": rows_written,
            "elapsed_ms": elapsed_ms(started),
            "max_error_rate": stress.max_error_rate,
            "tally": tally.to_json(),
        }),
    ))
}

// ============================================================================
// SECTION: Adverse Battery
// ============================================================================

/// Runs the flood and crash probes under the adverse timeout.
///
/// # Errors
///
/// This check reports failures through its outcome and does not error.
pub fn adverse_battery(
    ctx: &mut CheckContext<'_>,
    stress: &StressConfig,
    acquire_timeout: Duration,
) -> CheckResult {
    let sessions = Arc::clone(ctx.sessions());
    let timeout = stress.adverse_timeout();
    let outcome = run_with_timeout(timeout, move |token: &CancelToken| {
        let mut steps = connection_flood(sessions.as_ref(), acquire_timeout);
        if token.is_cancelled() {
            return steps;
        }
        steps.extend(simulated_crash(sessions.as_ref(), acquire_timeout));
        steps
    });
    let details = json!({ "timeout_secs": timeout.as_secs() });
    match outcome {
        TaskOutcome::Completed(steps) => Ok(CheckOutput::steps(steps, details)),
        TaskOutcome::TimedOut => {
            let message = format!("adverse battery timed out after {} s", timeout.as_secs());
            ctx.log().warn("adverse_timeout", &message);
            Ok(CheckOutput::new(Outcome::fail(message))
                .with_details(json!({ "timeout_secs": timeout.as_secs(), "timed_out": true })))
        }
        TaskOutcome::Panicked(message) => {
            let outcome = Outcome::fail(format!("adverse battery panicked: {message}"));
            Ok(CheckOutput::new(outcome).with_details(details))
        }
    }
}

/// Leases every available session, then confirms one more lease waits.
#[must_use]
pub fn connection_flood(sessions: &dyn SessionSource, acquire_timeout: Duration) -> Vec<StepOutcome> {
    let before = sessions.stats();
    let mut leases = Vec::with_capacity(before.available);
    let mut alive = 0_usize;
    for _ in 0 .. before.available {
        if let Ok(mut lease) = sessions.lease_timeout(acquire_timeout) {
            if lease.query(&Query::new(ALIVE_SQL)).is_ok() {
                alive += 1;
            }
            leases.push(lease);
        }
    }
    let mut steps = vec![StepOutcome::check(
        "flood_leased",
        alive == before.available,
        format!("{alive} of {} sessions leased and alive", before.available),
    )];
    steps.push(match sessions.lease_timeout(OVER_CAPACITY_WAIT) {
        Err(PoolError::Timeout(_)) => StepOutcome::passed("flood_bounded", "lease beyond capacity waited"),
        Err(err) => StepOutcome::failed("flood_bounded", err.to_string()),
        Ok(_) => StepOutcome::failed("flood_bounded", "pool handed out more sessions than capacity"),
    });
    drop(leases);
    let after = sessions.stats();
    steps.push(StepOutcome::check(
        "flood_released",
        after.available == before.available,
        format!("{} available after release (was {})", after.available, before.available),
    ));
    steps
}

/// Terminates a leased session's backend and confirms the pool heals.
#[must_use]
pub fn simulated_crash(sessions: &dyn SessionSource, acquire_timeout: Duration) -> Vec<StepOutcome> {
    let before = sessions.stats();
    let mut lease = match sessions.lease_timeout(acquire_timeout) {
        Ok(lease) => lease,
        Err(err) => {
            return vec![
                StepOutcome::failed("crash_terminated", format!("no session to crash: {err}")),
                StepOutcome::skipped("pool_healed", "crash did not run"),
            ];
        }
    };
    let terminated = match lease.query(&Query::new(TERMINATE_SELF_SQL)) {
        Err(err) if is_connection_loss(&err) => {
            StepOutcome::passed("crash_terminated", format!("backend terminated ({})", err.kind))
        }
        Err(err) => StepOutcome::failed("crash_terminated", err.to_string()),
        Ok(_) => StepOutcome::failed("crash_terminated", "backend survived pg_terminate_backend"),
    };
    // A follow-up statement makes the driver observe the closed socket.
    let _ = lease.query(&Query::new(ALIVE_SQL));
    drop(lease);

    let after = sessions.stats();
    let alive = sessions
        .lease_timeout(acquire_timeout)
        .map_err(CheckError::from)
        .and_then(|mut lease| Ok(lease.query(&Query::new(ALIVE_SQL))?));
    let healed = after.capacity == before.capacity
        && after.replacements > before.replacements
        && alive.is_ok();
    vec![
        terminated,
        StepOutcome::check(
            "pool_healed",
            healed,
            format!(
                "capacity {} (was {}), {} replacement(s), fresh session {}",
                after.capacity,
                before.capacity,
                after.replacements - before.replacements.min(after.replacements),
                if alive.is_ok() { "alive" } else { "failed" },
            ),
        ),
    ]
}
