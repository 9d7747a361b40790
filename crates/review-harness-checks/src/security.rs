// crates/review-harness-checks/src/security.rs
// ============================================================================
// Module: Security Checks
// Description: Injection blocking, privilege escalation, and encryption.
// Purpose: Confirm hostile input and role abuse are stopped by the database.
// Dependencies: review-harness-core, serde_json
// ============================================================================

//! ## Overview
//! Injection payloads here travel only as bound parameters, so a blocked
//! attempt means the parameterized path treated the payload as data. The
//! raw interpolated variants live in [`crate::injection`].
//!
//! Privilege escalation statements each run in their own rolled-back
//! transaction. A rejected statement is the passing outcome.

// ============================================================================
// SECTION: Imports
// ============================================================================

use review_harness_core::CheckContext;
use review_harness_core::CheckError;
use review_harness_core::CheckOutput;
use review_harness_core::CheckResult;
use review_harness_core::DbError;
use review_harness_core::Query;
use review_harness_core::SqlValue;
use review_harness_core::StepOutcome;
use review_harness_core::StepStatus;
use review_harness_core::session::rolled_back;
use serde_json::json;

use crate::support::Attempt;
use crate::support::is_connection_loss;

// ============================================================================
// SECTION: Payloads
// ============================================================================

/// Hostile strings bound as lookup parameters.
pub const INJECTION_PAYLOADS: [&str; 7] = [
    "' OR '1'='1",
    "'; DROP TABLE review_system.reviews_partitioned; --",
    "' UNION SELECT usename, passwd FROM pg_shadow --",
    "1; SELECT pg_sleep(5)",
    "1' AND 1=CAST((SELECT version()) AS int) --",
    "admin'--",
    "1 OR 1=1",
];

/// Parameterized lookup used for every payload.
const LOOKUP_SQL: &str =
    "SELECT review_id FROM review_system.reviews_partitioned WHERE product_id::text = $1";

/// Confirms the review table survived the payloads.
const TABLE_PRESENT_SQL: &str =
    "SELECT to_regclass('review_system.reviews_partitioned') IS NOT NULL AS present";

/// Statements a harness role must not be able to run.
pub const ESCALATION_STATEMENTS: [(&str, &str); 4] = [
    ("set_role_postgres", "SET ROLE postgres"),
    ("alter_role_superuser", "ALTER ROLE CURRENT_USER SUPERUSER"),
    ("grant_schema_public", "GRANT ALL ON SCHEMA review_system TO PUBLIC"),
    ("create_superuser_role", "CREATE ROLE review_harness_escalation SUPERUSER LOGIN"),
];

/// Plaintext pushed through the encryption functions.
pub const ENCRYPTION_SAMPLE: &str = "4111-1111-1111-1111";

/// Encrypts and decrypts the sample in one round trip.
const ENCRYPTION_ROUND_TRIP_SQL: &str = "SELECT sealed::text AS ciphertext, \
     review_system.decrypt_sensitive_data(sealed)::text AS plaintext \
     FROM (SELECT review_system.encrypt_sensitive_data($1::text) AS sealed) AS probe";

// ============================================================================
// SECTION: Checks
// ============================================================================

/// Binds each injection payload into a parameterized lookup.
///
/// Passes when no payload returns rows and the review table still exists.
///
/// # Errors
///
/// Returns [`CheckError`] when the connection is lost or the table probe
/// fails.
pub fn sql_injection_block(ctx: &mut CheckContext<'_>) -> CheckResult {
    let mut steps = Vec::with_capacity(INJECTION_PAYLOADS.len() + 1);
    let mut attempts = Vec::with_capacity(INJECTION_PAYLOADS.len());
    let mut blocked = 0_usize;
    for (index, payload) in INJECTION_PAYLOADS.iter().enumerate() {
        let query = Query::new(LOOKUP_SQL).bind(*payload);
        let attempt = Attempt::classify(ctx.session().query(&query))?;
        blocked += usize::from(attempt.is_blocked());
        steps.push(StepOutcome::check(format!("payload_{index}"), attempt.is_blocked(), attempt.describe()));
        attempts.push(json!({ "payload": payload, "result": attempt.describe() }));
    }
    let present = ctx
        .with_retry(|session| Ok(session.query(&Query::new(TABLE_PRESENT_SQL))?))?
        .scalar()
        .and_then(SqlValue::as_bool)
        .unwrap_or(false);
    steps.push(StepOutcome::check("table_intact", present, "reviews_partitioned exists after payloads"));
    Ok(CheckOutput::steps(
        steps,
        json!({
            "attempts": attempts.len(),
            "blocked": blocked,
            "payloads": attempts,
        }),
    ))
}

/// Attempts role and grant escalation; every statement must be rejected.
///
/// # Errors
///
/// Returns [`CheckError`] when the connection is lost mid-check.
pub fn privilege_escalation_block(ctx: &mut CheckContext<'_>) -> CheckResult {
    let mut steps = Vec::with_capacity(ESCALATION_STATEMENTS.len());
    for (name, statement) in ESCALATION_STATEMENTS {
        let result: Result<(), DbError> =
            rolled_back(ctx.session(), |session| session.batch_execute(statement));
        let step = match result {
            Ok(()) => StepOutcome::failed(name, format!("allowed: {statement}")),
            Err(err) if is_connection_loss(&err) => return Err(err.into()),
            Err(err) => StepOutcome::passed(name, format!("blocked ({})", err.kind)),
        };
        steps.push(step);
    }
    let blocked = steps.iter().filter(|step| step.status == StepStatus::Passed).count();
    Ok(CheckOutput::steps(steps, json!({ "attempts": ESCALATION_STATEMENTS.len(), "blocked": blocked })))
}

/// Round-trips a sample value through the server-side encryption functions.
///
/// # Errors
///
/// Returns [`CheckError`] when either function fails.
pub fn sensitive_data_encryption(ctx: &mut CheckContext<'_>) -> CheckResult {
    let query = Query::new(ENCRYPTION_ROUND_TRIP_SQL).bind(ENCRYPTION_SAMPLE);
    let rows = ctx.with_retry(|session| Ok(session.query(&query)?))?;
    if rows.is_empty() {
        return Err(CheckError::assertion("encryption round trip returned no row"));
    }
    let ciphertext = rows.get(0, "ciphertext").and_then(SqlValue::as_str).unwrap_or_default();
    let plaintext = rows.get(0, "plaintext").and_then(SqlValue::as_str).unwrap_or_default();
    let hidden = !ciphertext.is_empty() && ciphertext != ENCRYPTION_SAMPLE;
    let steps = vec![
        StepOutcome::check("ciphertext_differs", hidden, "stored form hides the plaintext"),
        StepOutcome::check(
            "decrypt_restores",
            plaintext == ENCRYPTION_SAMPLE,
            "decryption returns the original value",
        ),
    ];
    Ok(CheckOutput::steps(steps, json!({ "ciphertext_length": ciphertext.len() })))
}
