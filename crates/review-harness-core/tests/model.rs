// crates/review-harness-core/tests/model.rs
// ============================================================================
// Module: Core Model Tests
// Description: Outcomes, SQL values, error classification, and log sinks.
// ============================================================================

//! Core model tests.

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

use common::CaptureLog;
use common::FakeSession;
use review_harness_core::Category;
use review_harness_core::CheckError;
use review_harness_core::CheckOutput;
use review_harness_core::DbError;
use review_harness_core::DbErrorKind;
use review_harness_core::FanoutLogSink;
use review_harness_core::FileLogSink;
use review_harness_core::HarnessLog;
use review_harness_core::LogEvent;
use review_harness_core::LogLevel;
use review_harness_core::NoopLogSink;
use review_harness_core::Outcome;
use review_harness_core::Query;
use review_harness_core::RawSql;
use review_harness_core::Retryable;
use review_harness_core::SqlRows;
use review_harness_core::SqlSession;
use review_harness_core::SqlValue;
use review_harness_core::StepOutcome;
use review_harness_core::session::committed;
use review_harness_core::session::rolled_back;
use serde_json::json;

// ============================================================================
// SECTION: Outcome
// ============================================================================

#[test]
fn empty_steps_pass() {
    let outcome = Outcome::Steps {
        steps: Vec::new(),
    };
    assert!(outcome.passed());
    assert_eq!(outcome.message(), "0/0 steps passed");
}

#[test]
fn skipped_steps_do_not_fail() {
    let outcome = Outcome::Steps {
        steps: vec![StepOutcome::passed("a", ""), StepOutcome::skipped("b", "not applicable")],
    };
    assert!(outcome.passed());
    assert_eq!(outcome.message(), "1/2 steps passed");
}

#[test]
fn step_check_maps_condition() {
    let failed = StepOutcome::check("trigger", false, "total_reviews unchanged");
    let outcome = Outcome::Steps {
        steps: vec![failed, StepOutcome::check("insert", true, "ok")],
    };
    assert!(!outcome.passed());
    assert_eq!(outcome.message(), "1/2 steps passed; failed: trigger");
}

#[test]
fn steps_output_embeds_steps_in_details() {
    let output = CheckOutput::steps(vec![StepOutcome::passed("a", "ok")], json!({ "rows": 3 }));
    assert_eq!(output.details["rows"], 3);
    assert_eq!(output.details["steps"][0]["name"], "a");
    assert_eq!(output.details["steps"][0]["status"], "passed");
    let bare = CheckOutput::steps(Vec::new(), json!(null));
    assert_eq!(bare.details["steps"], json!([]));
}

#[test]
fn from_condition_picks_outcome() {
    assert_eq!(CheckOutput::from_condition(true, "unused", json!({})).outcome, Outcome::Pass);
    assert_eq!(CheckOutput::from_condition(false, "too slow", json!({})).outcome, Outcome::fail("too slow"));
}

// ============================================================================
// SECTION: Categories And Values
// ============================================================================

#[test]
fn category_parses_case_insensitively() {
    assert_eq!("Security".parse::<Category>().unwrap(), Category::Security);
    assert_eq!(" partition ".parse::<Category>().unwrap(), Category::Partition);
    assert!("network".parse::<Category>().is_err());
    assert_eq!(Category::Concurrent.to_string(), "concurrent");
}

#[test]
fn sql_rows_accessors() {
    let rows = SqlRows::new(
        vec!["id".to_string(), "name".to_string()],
        vec![
            vec![SqlValue::Int(1), SqlValue::Text("reviews_y2024m01".to_string())],
            vec![SqlValue::Int(2), SqlValue::Null],
        ],
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.scalar_i64(), Some(1));
    assert_eq!(rows.get(0, "name").and_then(SqlValue::as_str), Some("reviews_y2024m01"));
    assert!(rows.get(1, "name").unwrap().is_null());
    assert!(rows.get(0, "missing").is_none());
    assert_eq!(rows.column_values("id").len(), 2);
    assert!(SqlRows::empty(&["x"]).is_empty());
}

#[test]
fn sql_value_conversions() {
    assert_eq!(SqlValue::from(Some(5_i64)), SqlValue::Int(5));
    assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
    assert_eq!(SqlValue::from("abc").as_str(), Some("abc"));
    assert_eq!(SqlValue::Int(3).as_f64(), Some(3.0));
    assert_eq!(SqlValue::Float(f64::NAN).to_json(), json!("NaN"));
    assert_eq!(SqlValue::Bool(true).to_json(), json!(true));
}

#[test]
fn query_binds_params_in_order() {
    let query = Query::new("SELECT $1::int + $2::int").bind(1_i64).bind(2_i64);
    assert_eq!(query.params(), &[SqlValue::Int(1), SqlValue::Int(2)]);
    assert_eq!(query.sql(), "SELECT $1::int + $2::int");
}

#[test]
fn raw_sql_interpolates_payload_verbatim() {
    let raw = RawSql::interpolated("SELECT * FROM t WHERE name = '{payload}'", "' OR '1'='1");
    assert_eq!(raw.sql(), "SELECT * FROM t WHERE name = '' OR '1'='1'");
}

// ============================================================================
// SECTION: Errors
// ============================================================================

#[test]
fn sqlstate_classification() {
    let cases = [
        ("40P01", DbErrorKind::Deadlock),
        ("40001", DbErrorKind::Serialization),
        ("57014", DbErrorKind::Timeout),
        ("42501", DbErrorKind::Permission),
        ("42601", DbErrorKind::Syntax),
        ("42P01", DbErrorKind::Syntax),
        ("23514", DbErrorKind::Constraint),
        ("23505", DbErrorKind::Constraint),
        ("08006", DbErrorKind::Connection),
        ("57P01", DbErrorKind::Terminated),
        ("XX000", DbErrorKind::Other),
    ];
    for (code, kind) in cases {
        let err = DbError::from_sqlstate(code, "boom");
        assert_eq!(err.kind, kind, "sqlstate {code}");
        assert_eq!(err.code.as_deref(), Some(code));
    }
}

#[test]
fn check_error_retryability_and_details() {
    let db = CheckError::from(DbError::from_sqlstate("40001", "could not serialize access"));
    assert!(db.is_retryable());
    assert_eq!(db.kind_label(), "database");
    assert!(db.as_db().unwrap().is(DbErrorKind::Serialization));
    let assertion = CheckError::assertion("row leaked");
    assert!(!assertion.is_retryable());
    let details = assertion.details();
    assert_eq!(details["error_type"], "assertion");
    assert_eq!(details["message"], "assertion failed: row leaked");
    assert_eq!(details["sources"], json!([]));
}

// ============================================================================
// SECTION: Transactions
// ============================================================================

#[test]
fn rolled_back_always_rolls_back() {
    let mut session = FakeSession::default();
    let value: Result<u32, DbError> = rolled_back(&mut session, |session| {
        session.batch_execute("INSERT")?;
        Ok(7)
    });
    assert_eq!(value.unwrap(), 7);
    assert_eq!(session.statements, vec!["BEGIN", "INSERT", "ROLLBACK"]);
}

#[test]
fn committed_commits_on_success_and_rolls_back_on_error() {
    let mut session = FakeSession::default();
    let log = CaptureLog::default();
    let ok: Result<(), DbError> = committed(&mut session, &log, |session| session.batch_execute("UPDATE"));
    assert!(ok.is_ok());
    let err: Result<(), CheckError> = committed(&mut session, &log, |_| Err(CheckError::assertion("nope")));
    assert!(err.is_err());
    assert_eq!(session.statements, vec!["BEGIN", "UPDATE", "COMMIT", "BEGIN", "ROLLBACK"]);
    assert!(log.events.lock().unwrap().is_empty());
}

/// Session whose `ROLLBACK` fails as if the socket dropped.
#[derive(Default)]
struct RollbackFails {
    /// Statements seen, in order.
    inner: FakeSession,
}

impl SqlSession for RollbackFails {
    fn query(&mut self, query: &Query) -> Result<SqlRows, DbError> {
        self.inner.query(query)
    }

    fn execute(&mut self, query: &Query) -> Result<u64, DbError> {
        self.inner.execute(query)
    }

    fn query_raw(&mut self, raw: &RawSql) -> Result<SqlRows, DbError> {
        self.inner.query_raw(raw)
    }

    fn batch_execute(&mut self, script: &str) -> Result<(), DbError> {
        self.inner.batch_execute(script)?;
        if script == "ROLLBACK" {
            return Err(DbError::from_sqlstate("08006", "connection lost during rollback"));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

#[test]
fn committed_logs_a_failed_rollback_and_keeps_the_body_error() {
    let mut session = RollbackFails::default();
    let log = CaptureLog::default();
    let err: Result<(), CheckError> = committed(&mut session, &log, |_| Err(CheckError::assertion("nope")));
    assert!(matches!(err, Err(CheckError::Assertion(message)) if message == "nope"));
    let events = log.events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "rollback_failed");
    assert_eq!(events[0].level, LogLevel::Warn);
    assert_eq!(events[0].fields["code"], "08006");
}

// ============================================================================
// SECTION: Logging
// ============================================================================

#[test]
fn file_sink_writes_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("harness.jsonl");
    let sink = FileLogSink::new(&path).unwrap();
    sink.record(&LogEvent::new("run_started", LogLevel::Info, "starting").with_field("checks", 12));
    sink.warn("pool_slow", "waited 2 s");
    sink.flush();
    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> =
        contents.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["event"], "run_started");
    assert_eq!(lines[0]["level"], "info");
    assert_eq!(lines[0]["fields"]["checks"], 12);
    assert_eq!(lines[1]["level"], "warn");
    assert!(lines[1].get("fields").is_none());
}

#[test]
fn timestamped_sink_prunes_old_logs() {
    let dir = tempfile::tempdir().unwrap();
    for stamp in ["1", "2", "3"] {
        std::fs::write(dir.path().join(format!("harness_{stamp}.jsonl")), "").unwrap();
    }
    std::fs::write(dir.path().join("other_1.jsonl"), "").unwrap();
    let sink = FileLogSink::timestamped(dir.path(), "harness", 2).unwrap();
    assert!(sink.path().exists());
    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 3);
    assert!(names.contains(&"harness_3.jsonl".to_string()));
    assert!(names.contains(&"other_1.jsonl".to_string()));
    assert!(!names.contains(&"harness_1.jsonl".to_string()));
}

#[test]
fn fanout_forwards_to_every_sink() {
    let first = Arc::new(CaptureLog::default());
    let second = Arc::new(CaptureLog::default());
    let sinks: Vec<Arc<dyn HarnessLog>> = vec![first.clone(), Arc::new(NoopLogSink), second.clone()];
    let fanout = FanoutLogSink::new(sinks);
    fanout.error("deploy_failed", "schema.sql failed");
    assert_eq!(first.event_names(), vec!["deploy_failed"]);
    assert_eq!(second.event_names(), vec!["deploy_failed"]);
}
