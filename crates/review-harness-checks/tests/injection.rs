// crates/review-harness-checks/tests/injection.rs
// ============================================================================
// Module: Raw Injection Tests
// Description: Interpolated probes judged blocked or leaked.
// ============================================================================

//! Raw injection battery tests.

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

use common::Fixture;
use common::Reply;
use common::rows;
use common::scalar;
use common::sqlstate;
use common::step_status;
use review_harness_checks::injection::RAW_PROBES;
use review_harness_checks::injection::raw_injection_battery;
use review_harness_core::Category;
use review_harness_core::SqlValue;

#[test]
fn rejected_and_empty_probes_count_as_blocked() {
    let mut fx = Fixture::new(1);
    fx.script.on("pg_shadow", sqlstate("42501")).on("CAST((SELECT current_user)", sqlstate("22P02"));
    let result = fx.run(Category::Injection, raw_injection_battery);
    assert!(result.passed(), "{}", result.message());
    let details = result.details().unwrap();
    assert_eq!(details["attempts"], RAW_PROBES.len());
    assert_eq!(details["blocked"], RAW_PROBES.len());
    assert_eq!(details["allowed"], 0);
    assert!(!fx.log.event_names().contains(&"injection_allowed"));
}

#[test]
fn payload_is_interpolated_into_the_statement() {
    let mut fx = Fixture::new(1);
    fx.run(Category::Injection, raw_injection_battery);
    let statements = fx.script.statements();
    assert!(statements.iter().any(|sql| sql.contains("WHERE title = '' OR '1'='1'")));
    assert_eq!(fx.script.count("BEGIN"), RAW_PROBES.len());
    assert_eq!(fx.script.count("ROLLBACK"), RAW_PROBES.len());
}

#[test]
fn leaked_rows_fail_the_probe_and_are_logged() {
    let mut fx = Fixture::new(1);
    fx.script.on(
        "tablename::text FROM pg_tables",
        Reply::Rows(rows(
            &["review_id", "title"],
            vec![vec![SqlValue::Int(0), SqlValue::from("reviews_partitioned")]],
        )),
    );
    let result = fx.run(Category::Injection, raw_injection_battery);
    assert!(!result.passed());
    assert_eq!(step_status(&result, "catalog_enumeration").as_deref(), Some("failed"));
    assert_eq!(result.details().unwrap()["allowed"], 1);
    assert!(fx.log.event_names().contains(&"injection_allowed"));
}

#[test]
fn stacked_drop_that_executes_is_not_blocked() {
    let mut fx = Fixture::new(1);
    fx.script.on("to_regclass", scalar("present", false));
    let result = fx.run(Category::Injection, raw_injection_battery);
    assert!(!result.passed());
    assert_eq!(step_status(&result, "stacked_drop").as_deref(), Some("failed"));
    assert_eq!(step_status(&result, "tautology").as_deref(), Some("passed"));
    assert_eq!(result.details().unwrap()["allowed"], 1);
    let steps = result.details().unwrap()["steps"].as_array().unwrap().clone();
    let stacked = steps.iter().find(|step| step["name"] == "stacked_drop").unwrap();
    assert!(stacked["message"].as_str().unwrap().contains("dropped before rollback"));
    assert!(fx.log.event_names().contains(&"injection_allowed"));

    let statements = fx.script.statements();
    let check = statements.iter().position(|sql| sql.contains("to_regclass")).unwrap();
    assert!(statements[check - 1].contains("DROP TABLE review_system.reviews_partitioned"));
    assert_eq!(statements[check + 1], "ROLLBACK");
}

#[test]
fn rejected_stacked_drop_skips_the_existence_check() {
    let mut fx = Fixture::new(1);
    fx.script.on("DROP TABLE", sqlstate("42501")).on("to_regclass", scalar("present", false));
    let result = fx.run(Category::Injection, raw_injection_battery);
    assert!(result.passed(), "{}", result.message());
    assert_eq!(fx.script.count("to_regclass"), 0);
}
