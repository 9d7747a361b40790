// crates/review-harness-checks/tests/backup.rs
// ============================================================================
// Module: Backup Check Tests
// Description: Bookkeeping tables, freshness, metadata, and verification.
// ============================================================================

//! Backup check tests.

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
use common::step_status;
use review_harness_checks::backup::backup_tables;
use review_harness_checks::backup::latest_backup;
use review_harness_config::BackupConfig;
use review_harness_core::Category;
use review_harness_core::SqlValue;

fn latest(backup_id: i64, age_hours: f64) -> Reply {
    Reply::Rows(rows(
        &["backup_id", "age_hours"],
        vec![vec![SqlValue::Int(backup_id), SqlValue::Float(age_hours)]],
    ))
}

fn healthy(fx: &Fixture, age_hours: f64, metadata_rows: i64) {
    fx.script
        .on("FROM review_system.backup_history", latest(12, age_hours))
        .on("FROM review_system.backup_metadata", scalar("entries", metadata_rows))
        .on("verify_backup", scalar("verified", true));
}

#[test]
fn both_bookkeeping_tables_present() {
    let mut fx = Fixture::new(1);
    fx.script.on(
        "information_schema.tables",
        Reply::Rows(rows(
            &["table_name"],
            vec![vec![SqlValue::from("backup_history")], vec![SqlValue::from("backup_metadata")]],
        )),
    );
    let result = fx.run(Category::Backup, backup_tables);
    assert!(result.passed(), "{}", result.message());
}

#[test]
fn missing_metadata_table_fails() {
    let mut fx = Fixture::new(1);
    fx.script.on(
        "information_schema.tables",
        Reply::Rows(rows(&["table_name"], vec![vec![SqlValue::from("backup_history")]])),
    );
    let result = fx.run(Category::Backup, backup_tables);
    assert!(!result.passed());
    assert_eq!(result.message(), "1/2 steps passed; failed: backup_metadata");
}

#[test]
fn fresh_verified_backup_passes() {
    let mut fx = Fixture::new(1);
    healthy(&fx, 3.5, 2);
    let config = BackupConfig::default();
    let result = fx.run(Category::Backup, |ctx| latest_backup(ctx, &config));
    assert!(result.passed(), "{}", result.message());
    let details = result.details().unwrap();
    assert_eq!(details["backup_id"], 12);
    assert_eq!(details["verified"], true);
}

#[test]
fn stale_backup_fails_freshness() {
    let mut fx = Fixture::new(1);
    healthy(&fx, 48.0, 2);
    let config = BackupConfig {
        max_age_hours: 24,
    };
    let result = fx.run(Category::Backup, |ctx| latest_backup(ctx, &config));
    assert!(!result.passed());
    assert_eq!(result.message(), "3/4 steps passed; failed: fresh");
}

#[test]
fn backup_without_metadata_is_a_failed_step() {
    let mut fx = Fixture::new(1);
    healthy(&fx, 1.0, 0);
    let config = BackupConfig::default();
    let result = fx.run(Category::Backup, |ctx| latest_backup(ctx, &config));
    assert!(!result.passed());
    assert_eq!(step_status(&result, "metadata").as_deref(), Some("failed"));
    assert_eq!(step_status(&result, "verified").as_deref(), Some("passed"));
}

#[test]
fn failed_verification_fails() {
    let mut fx = Fixture::new(1);
    fx.script.on("verify_backup", scalar("verified", false));
    healthy(&fx, 1.0, 1);
    let config = BackupConfig::default();
    let result = fx.run(Category::Backup, |ctx| latest_backup(ctx, &config));
    assert!(!result.passed());
    assert_eq!(step_status(&result, "verified").as_deref(), Some("failed"));
}

#[test]
fn no_completed_backup_skips_remaining_steps() {
    let mut fx = Fixture::new(1);
    let config = BackupConfig::default();
    let result = fx.run(Category::Backup, |ctx| latest_backup(ctx, &config));
    assert!(!result.passed());
    assert_eq!(result.message(), "0/4 steps passed; failed: latest_exists");
    assert_eq!(step_status(&result, "verified").as_deref(), Some("skipped"));
    assert_eq!(fx.script.count("verify_backup"), 0);
}
