// crates/review-harness-checks/src/backup.rs
// ============================================================================
// Module: Backup Checks
// Description: Backup bookkeeping tables, freshness, and verification.
// Purpose: Confirm recent backups exist and pass server-side verification.
// Dependencies: review-harness-core, review-harness-config, serde_json
// ============================================================================

// ============================================================================
// SECTION: Imports
// ============================================================================

use review_harness_config::BackupConfig;
use review_harness_core::CheckContext;
use review_harness_core::CheckOutput;
use review_harness_core::CheckResult;
use review_harness_core::Query;
use review_harness_core::SqlValue;
use review_harness_core::StepOutcome;
use serde_json::json;

// ============================================================================
// SECTION: Statements
// ============================================================================

/// Bookkeeping tables that must exist.
pub const BACKUP_TABLES: [&str; 2] = ["backup_history", "backup_metadata"];

/// Lists the bookkeeping tables present in the schema.
const BACKUP_TABLES_SQL: &str = "SELECT table_name::text AS table_name FROM information_schema.tables \
     WHERE table_schema = 'review_system' AND table_name IN ('backup_history', 'backup_metadata')";

/// Latest completed backup with its age.
const LATEST_BACKUP_SQL: &str = "SELECT backup_id::int8 AS backup_id, \
     EXTRACT(EPOCH FROM (now() - completed_at))::float8 / 3600.0 AS age_hours \
     FROM review_system.backup_history WHERE status = 'completed' \
     ORDER BY completed_at DESC LIMIT 1";

/// Counts metadata rows for a backup.
const BACKUP_METADATA_SQL: &str =
    "SELECT COUNT(*) AS entries FROM review_system.backup_metadata WHERE backup_id = $1";

/// Server-side verification of a backup.
const VERIFY_BACKUP_SQL: &str = "SELECT review_system.verify_backup($1) AS verified";

// ============================================================================
// SECTION: Checks
// ============================================================================

/// Both backup bookkeeping tables exist.
///
/// # Errors
///
/// Returns [`review_harness_core::CheckError`] when the catalog query fails.
pub fn backup_tables(ctx: &mut CheckContext<'_>) -> CheckResult {
    let rows = ctx.with_retry(|session| Ok(session.query(&Query::new(BACKUP_TABLES_SQL))?))?;
    let present: Vec<&str> =
        rows.column_values("table_name").into_iter().filter_map(SqlValue::as_str).collect();
    let steps = BACKUP_TABLES
        .iter()
        .map(|table| StepOutcome::check(*table, present.contains(table), format!("review_system.{table}")))
        .collect();
    Ok(CheckOutput::steps(steps, json!({ "present": present })))
}

/// The latest completed backup is fresh, has metadata, and verifies.
///
/// # Errors
///
/// Returns [`review_harness_core::CheckError`] when a query fails.
pub fn latest_backup(ctx: &mut CheckContext<'_>, backup: &BackupConfig) -> CheckResult {
    let latest = ctx.with_retry(|session| Ok(session.query(&Query::new(LATEST_BACKUP_SQL))?))?;
    let Some(backup_id) = latest.get(0, "backup_id").and_then(SqlValue::as_i64) else {
        let steps = vec![
            StepOutcome::failed("latest_exists", "no completed backup recorded"),
            StepOutcome::skipped("fresh", "no backup"),
            StepOutcome::skipped("metadata", "no backup"),
            StepOutcome::skipped("verified", "no backup"),
        ];
        return Ok(CheckOutput::steps(steps, json!({ "backup_id": null })));
    };
    let age_hours = latest.get(0, "age_hours").and_then(SqlValue::as_f64).unwrap_or(f64::INFINITY);
    #[allow(clippy::cast_precision_loss, reason = "Configured ages are small whole hours.")]
    let max_age = backup.max_age_hours as f64;

    let metadata = ctx
        .with_retry(|session| Ok(session.query(&Query::new(BACKUP_METADATA_SQL).bind(backup_id))?))?
        .scalar_i64()
        .unwrap_or(0);
    let verified = ctx
        .with_retry(|session| Ok(session.query(&Query::new(VERIFY_BACKUP_SQL).bind(backup_id))?))?
        .scalar()
        .and_then(SqlValue::as_bool)
        .unwrap_or(false);

    let steps = vec![
        StepOutcome::passed("latest_exists", format!("backup_id {backup_id}")),
        StepOutcome::check(
            "fresh",
            age_hours <= max_age,
            format!("{age_hours:.1} h old (limit {} h)", backup.max_age_hours),
        ),
        StepOutcome::check("metadata", metadata > 0, format!("{metadata} metadata row(s)")),
        StepOutcome::check("verified", verified, "verify_backup returned true"),
    ];
    Ok(CheckOutput::steps(
        steps,
        json!({
            "backup_id": backup_id,
            "age_hours": age_hours,
            "metadata_rows": metadata,
            "verified": verified,
        }),
    ))
}
