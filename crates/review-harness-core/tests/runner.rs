// crates/review-harness-core/tests/runner.rs
// ============================================================================
// Module: Test Runner Tests
// Description: Result recording, failure capture, and lease hygiene.
// ============================================================================

//! Test runner tests.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::CaptureLog;
use common::CountingSleeper;
use common::FakeManager;
use review_harness_core::Category;
use review_harness_core::CheckError;
use review_harness_core::CheckOutput;
use review_harness_core::ConnectionPool;
use review_harness_core::DbError;
use review_harness_core::DbErrorKind;
use review_harness_core::HarnessLog;
use review_harness_core::Outcome;
use review_harness_core::RetryPolicy;
use review_harness_core::SessionSource;
use review_harness_core::StepOutcome;
use review_harness_core::TestRunner;
use serde_json::json;

struct Harness {
    pool: ConnectionPool<FakeManager>,
    log: Arc<CaptureLog>,
    runner: TestRunner,
}

fn harness(size: usize) -> Harness {
    let pool = ConnectionPool::new(FakeManager::default(), size).unwrap();
    let log = Arc::new(CaptureLog::default());
    let sessions: Arc<dyn SessionSource> = Arc::new(pool.clone());
    let sink: Arc<dyn HarnessLog> = log.clone();
    let runner = TestRunner::new(sessions, sink)
        .with_retry(RetryPolicy::new(3, Duration::ZERO), Arc::new(CountingSleeper::default()));
    Harness {
        pool,
        log,
        runner,
    }
}

#[test]
fn passing_check_yields_one_passing_result() {
    let mut h = harness(2);
    let result = h.runner.run(Category::Security, "SQLi block", |ctx| {
        ctx.session().batch_execute("SELECT 1")?;
        Ok(CheckOutput::pass(json!({ "blocked": 5 })))
    });
    assert!(result.passed());
    assert_eq!(result.name(), "SQLi block");
    assert_eq!(result.category(), Category::Security);
    assert_eq!(result.details().unwrap()["blocked"], 5);
    assert_eq!(h.runner.results().len(), 1);
    assert_eq!(h.pool.available(), 2);
    assert_eq!(h.log.event_names(), vec!["check_finished"]);
}

#[test]
fn failing_outcome_records_reason() {
    let mut h = harness(1);
    let result = h.runner.run(Category::Performance, "slow query", |_| {
        Ok(CheckOutput::new(Outcome::fail("took 1200 ms, limit 100 ms")))
    });
    assert!(!result.passed());
    assert_eq!(result.message(), "took 1200 ms, limit 100 ms");
    assert!(result.details().is_none());
}

#[test]
fn steps_outcome_passes_only_without_failed_steps() {
    let mut h = harness(1);
    h.runner.run(Category::Business, "composite ok", |_| {
        Ok(CheckOutput::steps(
            vec![StepOutcome::passed("insert", "ok"), StepOutcome::skipped("reply", "no table")],
            json!({}),
        ))
    });
    h.runner.run(Category::Business, "composite bad", |_| {
        Ok(CheckOutput::steps(
            vec![StepOutcome::passed("insert", "ok"), StepOutcome::failed("delete", "row remained")],
            json!({}),
        ))
    });
    let results = h.runner.results();
    assert!(results[0].passed());
    assert!(!results[1].passed());
    assert!(results[1].message().contains("failed: delete"));
}

#[test]
fn check_error_is_captured_and_lease_returned() {
    let mut h = harness(2);
    let before = h.pool.available();
    let result = h.runner.run(Category::Concurrent, "deadlock", |_| {
        Err(CheckError::Database(DbError::from_sqlstate("40P01", "deadlock detected")))
    });
    assert!(!result.passed());
    let details = result.details().unwrap();
    assert_eq!(details["error_type"], "database");
    assert_eq!(details["sqlstate"], "40P01");
    assert_eq!(details["db_kind"], DbErrorKind::Deadlock.as_str());
    assert!(details["message"].as_str().unwrap().contains("deadlock detected"));
    assert_eq!(h.pool.available(), before);
}

#[test]
fn panicking_check_is_recorded_and_lease_returned() {
    let mut h = harness(2);
    let before = h.pool.available();
    let result = h.runner.run(Category::Stress, "panics", |_| panic!("index out of range"));
    assert!(!result.passed());
    assert_eq!(result.details().unwrap()["error_type"], "panic");
    assert!(result.message().contains("index out of range"));
    assert_eq!(h.pool.available(), before);
    assert_eq!(h.pool.checked_out(), 0);
}

#[test]
fn failed_check_rolls_back_its_session() {
    let mut h = harness(1);
    h.runner.run(Category::Business, "fails mid transaction", |ctx| {
        ctx.session().begin()?;
        Err(CheckError::assertion("constraint accepted rating 6"))
    });
    let guard = h.pool.acquire().unwrap();
    assert_eq!(guard.statements, vec!["BEGIN".to_string(), "ROLLBACK".to_string()]);
}

#[test]
fn lease_failure_is_recorded_as_failed_result() {
    let mut h = harness(1);
    h.pool.close();
    let result = h.runner.run(Category::Backup, "backup exists", |_| Ok(CheckOutput::pass(json!({}))));
    assert!(!result.passed());
    assert_eq!(result.details().unwrap()["error_type"], "pool");
}

#[test]
fn with_retry_retries_driver_errors_on_the_leased_session() {
    let mut h = harness(1);
    let result = h.runner.run(Category::Performance, "flaky", |ctx| {
        let mut attempts = 0;
        let value = ctx.with_retry(|session| {
            attempts += 1;
            session.batch_execute("SELECT 1")?;
            if attempts < 3 {
                Err(CheckError::Database(DbError::new(DbErrorKind::Connection, "reset")))
            } else {
                Ok(attempts)
            }
        })?;
        Ok(CheckOutput::pass(json!({ "attempts": value })))
    });
    assert!(result.passed());
    assert_eq!(result.details().unwrap()["attempts"], 3);
}

#[test]
fn run_returns_the_recorded_result() {
    let mut h = harness(1);
    let first = h.runner.run(Category::Security, "first", |_| Ok(CheckOutput::pass(json!(null))));
    let second = h.runner.run(Category::Security, "second", |_| Ok(CheckOutput::new(Outcome::fail("no"))));
    assert_eq!(h.runner.results(), [first, second].as_slice());
    assert_eq!(h.runner.results()[1].message(), "no");
}

#[test]
fn summary_line_reports_counts_and_duration() {
    let mut h = harness(1);
    h.runner.run(Category::Security, "a", |_| Ok(CheckOutput::pass(json!(null))));
    h.runner.run(Category::Security, "b", |_| Ok(CheckOutput::new(Outcome::fail("no"))));
    let summary = h.runner.summary();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed, 1);
    assert!(!h.runner.all_passed());
    let line = h.runner.summary_line();
    assert!(line.starts_with("Total: 2, Passed: 1, Failed: 1, Duration: "));
    assert!(line.ends_with('s'));
    assert_eq!(h.runner.into_results().len(), 2);
    assert_eq!(h.log.events.lock().unwrap().len(), 2);
}

#[test]
fn sleeper_is_not_used_for_passing_checks() {
    let sleeper = Arc::new(CountingSleeper::default());
    let pool = ConnectionPool::new(FakeManager::default(), 1).unwrap();
    let sessions: Arc<dyn SessionSource> = Arc::new(pool);
    let log: Arc<dyn HarnessLog> = Arc::new(CaptureLog::default());
    let mut runner =
        TestRunner::new(sessions, log).with_retry(RetryPolicy::default(), sleeper.clone());
    runner.run(Category::Partition, "ok", |ctx| {
        ctx.with_retry(|session| Ok(session.batch_execute("SELECT 1")?))?;
        Ok(CheckOutput::pass(json!({})))
    });
    assert!(runner.all_passed());
    assert_eq!(sleeper.sleeps.load(Ordering::SeqCst), 0);
}
