// crates/review-harness-checks/src/injection.rs
// ============================================================================
// Module: Injection Probes
// Description: Raw string-interpolated injection attempts.
// Purpose: Measure what hostile SQL achieves when it reaches the server raw.
// Dependencies: review-harness-core, serde_json
// ============================================================================

//! ## Overview
//! This is the only module that builds [`RawSql`]. Each probe interpolates a
//! payload verbatim into a template and sends the result through the simple
//! query protocol inside a transaction that is always rolled back, so a
//! destructive payload that does execute leaves nothing behind.
//!
//! A probe is blocked when the server rejects it or it returns no rows. A
//! time-based probe is also judged by elapsed time: if the server slept, the
//! payload executed. A stacked destructive probe empties the leading SELECT,
//! so before the rollback it checks that its target relation still exists.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;
use std::time::Instant;

use review_harness_core::CheckContext;
use review_harness_core::CheckError;
use review_harness_core::CheckOutput;
use review_harness_core::CheckResult;
use review_harness_core::DbError;
use review_harness_core::Query;
use review_harness_core::RawSql;
use review_harness_core::SqlSession;
use review_harness_core::SqlValue;
use review_harness_core::StepOutcome;
use review_harness_core::session::rolled_back;
use serde_json::json;

use crate::support::Attempt;

// ============================================================================
// SECTION: Probes
// ============================================================================

/// One interpolated injection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawProbe {
    /// Step name.
    pub name: &'static str,
    /// SQL template containing `{payload}`.
    pub template: &'static str,
    /// Hostile payload.
    pub payload: &'static str,
    /// Server sleep the payload requests, if any.
    pub sleep: Option<Duration>,
    /// Relation the payload tries to drop, checked before the rollback.
    pub target: Option<&'static str>,
}

/// Lookup template shared by the text probes.
const TITLE_LOOKUP: &str =
    "SELECT review_id, title FROM review_system.reviews_partitioned WHERE title = '{payload}'";

/// Raw probes in execution order.
pub const RAW_PROBES: [RawProbe; 6] = [
    RawProbe {
        name: "tautology",
        template: TITLE_LOOKUP,
        payload: "' OR '1'='1",
        sleep: None,
        target: None,
    },
    RawProbe {
        name: "union_credentials",
        template: TITLE_LOOKUP,
        payload: "' UNION SELECT 0, usename || ':' || passwd FROM pg_shadow --",
        sleep: None,
        target: None,
    },
    RawProbe {
        name: "stacked_drop",
        template: TITLE_LOOKUP,
        payload: "'; DROP TABLE review_system.reviews_partitioned; --",
        sleep: None,
        target: Some("review_system.reviews_partitioned"),
    },
    RawProbe {
        name: "catalog_enumeration",
        template: TITLE_LOOKUP,
        payload: "' UNION SELECT 0, tablename::text FROM pg_tables --",
        sleep: None,
        target: None,
    },
    RawProbe {
        name: "error_based",
        template: "SELECT review_id FROM review_system.reviews_partitioned WHERE review_id = {payload}",
        payload: "1 AND 1=CAST((SELECT current_user) AS int)",
        sleep: None,
        target: None,
    },
    RawProbe {
        name: "time_based",
        template: "SELECT review_id FROM review_system.reviews_partitioned WHERE review_id = {payload}",
        payload: "1; SELECT pg_sleep(2)",
        sleep: Some(Duration::from_secs(2)),
        target: None,
    },
];

/// Returns whether `relation` resolves inside the current transaction.
const RELATION_EXISTS_SQL: &str = "SELECT to_regclass($1) IS NOT NULL AS present";

/// Returns false only when the server says `relation` is gone.
fn relation_survived(session: &mut dyn SqlSession, relation: &str) -> Result<bool, DbError> {
    let rows = session.query(&Query::new(RELATION_EXISTS_SQL).bind(relation))?;
    Ok(rows.scalar().and_then(SqlValue::as_bool).unwrap_or(true))
}

/// Interpolates and runs one probe, judging it blocked or leaked.
///
/// # Errors
///
/// Returns [`CheckError`] when the connection is lost.
pub fn run_probe(ctx: &mut CheckContext<'_>, probe: &RawProbe) -> Result<Attempt, CheckError> {
    let raw = RawSql::interpolated(probe.template, probe.payload);
    let started = Instant::now();
    let outcome = rolled_back(ctx.session(), |session| -> Result<_, CheckError> {
        let rows = match session.query_raw(&raw) {
            Ok(rows) => rows,
            Err(err) => return Ok(Err(err)),
        };
        let dropped = match probe.target {
            Some(relation) => !relation_survived(session, relation)?,
            None => false,
        };
        Ok(Ok((rows, dropped)))
    })?;
    let elapsed = started.elapsed();
    if let (Ok((_, true)), Some(relation)) = (&outcome, probe.target) {
        return Ok(Attempt::Executed {
            effect: format!("{relation} was dropped before rollback"),
        });
    }
    let attempt = Attempt::classify(outcome.map(|(rows, _)| rows))?;
    match probe.sleep {
        Some(sleep) if elapsed >= sleep => Ok(Attempt::Executed {
            effect: format!("server slept {} ms", elapsed.as_millis()),
        }),
        _ => Ok(attempt),
    }
}

// ============================================================================
// SECTION: Check
// ============================================================================

/// Sends every raw probe; passes when none leaks.
///
/// # Errors
///
/// Returns [`CheckError`] when the connection is lost.
pub fn raw_injection_battery(ctx: &mut CheckContext<'_>) -> CheckResult {
    let mut steps = Vec::with_capacity(RAW_PROBES.len());
    let mut blocked = 0_usize;
    for probe in &RAW_PROBES {
        let attempt = run_probe(ctx, probe)?;
        if attempt.is_blocked() {
            blocked += 1;
        }
        steps.push(StepOutcome::check(probe.name, attempt.is_blocked(), attempt.describe()));
    }
    let allowed = RAW_PROBES.len() - blocked;
    if allowed > 0 {
        ctx.log().warn("injection_allowed", &format!("{allowed} raw probe(s) were not blocked"));
    }
    Ok(CheckOutput::steps(
        steps,
        json!({
            "attempts": RAW_PROBES.len(),
            "blocked": blocked,
            "allowed": allowed,
        }),
    ))
}
