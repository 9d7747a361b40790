// crates/review-harness-checks/src/business.rs
// ============================================================================
// Module: Business Logic Checks
// Description: Review CRUD, rating constraints, replies, and summary triggers.
// Purpose: Confirm server-side rules hold for ordinary review traffic.
// Dependencies: review-harness-core, serde_json
// ============================================================================

//! ## Overview
//! Every check here runs inside a transaction that is rolled back, so no
//! probe review survives the check. Rating and reply rejections are expected
//! to arrive as constraint errors; each rejection probe gets its own
//! transaction because a failed statement aborts the enclosing one.

// ============================================================================
// SECTION: Imports
// ============================================================================

use review_harness_core::CheckContext;
use review_harness_core::CheckError;
use review_harness_core::CheckOutput;
use review_harness_core::CheckResult;
use review_harness_core::DbError;
use review_harness_core::DbErrorKind;
use review_harness_core::Query;
use review_harness_core::SqlSession;
use review_harness_core::SqlValue;
use review_harness_core::StepOutcome;
use review_harness_core::StepStatus;
use review_harness_core::session::rolled_back;
use serde_json::json;

use crate::support::PROBE_PRODUCT_ID;
use crate::support::PROBE_USER_ID;
use crate::support::describe;
use crate::support::insert_probe_review;
use crate::support::is_connection_loss;
use crate::support::probe_review_insert;

// ============================================================================
// SECTION: Statements
// ============================================================================

/// Reads one review back.
const SELECT_REVIEW_SQL: &str =
    "SELECT review_id, product_id, rating, title FROM review_system.reviews_partitioned WHERE review_id = $1";

/// Changes a review's rating.
const UPDATE_RATING_SQL: &str =
    "UPDATE review_system.reviews_partitioned SET rating = $2 WHERE review_id = $1";

/// Deletes one review.
const DELETE_REVIEW_SQL: &str = "DELETE FROM review_system.reviews_partitioned WHERE review_id = $1";

/// Adds a reply to a review.
const INSERT_REPLY_SQL: &str = "INSERT INTO review_system.review_replies_partitioned \
     (review_id, user_id, content) VALUES ($1, $2, $3) RETURNING reply_id";

/// Counts replies attached to a review.
const COUNT_REPLIES_SQL: &str =
    "SELECT COUNT(*) AS replies FROM review_system.review_replies_partitioned WHERE review_id = $1";

/// Reads the probe product's summary count (zero when absent).
const SUMMARY_TOTAL_SQL: &str = "SELECT COALESCE((SELECT total_reviews \
     FROM review_system.review_summary_partitioned WHERE product_id = $1), 0)::int8 AS total_reviews";

/// Review id that no review can have.
const MISSING_REVIEW_ID: i64 = -1;

// ============================================================================
// SECTION: CRUD
// ============================================================================

/// Inserts, reads, updates, and deletes a review in one rolled-back
/// transaction.
///
/// # Errors
///
/// Returns [`CheckError`] when a statement fails outright.
pub fn review_crud(ctx: &mut CheckContext<'_>) -> CheckResult {
    let steps = rolled_back(ctx.session(), crud_steps)?;
    Ok(CheckOutput::steps(steps, json!({ "product_id": PROBE_PRODUCT_ID })))
}

/// CRUD steps that follow `insert`, in order.
const CRUD_FOLLOW_UPS: [&str; 4] = ["read", "update", "update_visible", "delete"];

/// Marks the remaining CRUD steps skipped when the last step failed.
fn stop_after_failure(steps: &mut Vec<StepOutcome>) -> bool {
    if steps.last().is_none_or(|step| step.status != StepStatus::Failed) {
        return false;
    }
    let remaining = CRUD_FOLLOW_UPS.iter().skip(steps.len().saturating_sub(1));
    let skipped: Vec<StepOutcome> =
        remaining.map(|name| StepOutcome::skipped(*name, "an earlier step failed")).collect();
    steps.extend(skipped);
    true
}

/// Runs the CRUD sequence, skipping the rest once a step fails.
fn crud_steps(session: &mut dyn SqlSession) -> Result<Vec<StepOutcome>, CheckError> {
    let review_id = insert_probe_review(session, 3)?;
    let mut steps = vec![StepOutcome::passed("insert", format!("review_id {review_id}"))];

    let read = session.query(&Query::new(SELECT_REVIEW_SQL).bind(review_id))?;
    let read_ok = read.get(0, "rating").and_then(SqlValue::as_i64) == Some(3);
    steps.push(StepOutcome::check("read", read_ok, "inserted review reads back with rating 3"));
    if stop_after_failure(&mut steps) {
        return Ok(steps);
    }

    let updated = session.execute(&Query::new(UPDATE_RATING_SQL).bind(review_id).bind(4_i64))?;
    steps.push(StepOutcome::check("update", updated == 1, format!("{updated} row(s) updated")));
    if stop_after_failure(&mut steps) {
        return Ok(steps);
    }
    let reread = session.query(&Query::new(SELECT_REVIEW_SQL).bind(review_id))?;
    let rating = reread.get(0, "rating").and_then(SqlValue::as_i64);
    let visible = format!("rating now {}", describe(rating));
    steps.push(StepOutcome::check("update_visible", rating == Some(4), visible));
    if stop_after_failure(&mut steps) {
        return Ok(steps);
    }

    let deleted = session.execute(&Query::new(DELETE_REVIEW_SQL).bind(review_id))?;
    steps.push(StepOutcome::check("delete", deleted == 1, format!("{deleted} row(s) deleted")));
    Ok(steps)
}

// ============================================================================
// SECTION: Constraints
// ============================================================================

/// Expects a statement to fail with a constraint violation.
fn expect_constraint(
    name: &str,
    result: Result<(), DbError>,
    what: &str,
) -> Result<StepOutcome, CheckError> {
    match result {
        Ok(()) => Ok(StepOutcome::failed(name, format!("accepted {what}"))),
        Err(err) if err.is(DbErrorKind::Constraint) => {
            Ok(StepOutcome::passed(name, format!("rejected {what} ({})", err.code.unwrap_or_default())))
        }
        Err(err) if is_connection_loss(&err) => Err(err.into()),
        Err(err) => Ok(StepOutcome::failed(name, format!("unexpected {} error: {}", err.kind, err.message))),
    }
}

/// Out-of-range ratings must be rejected; an in-range rating accepted.
///
/// # Errors
///
/// Returns [`CheckError`] when the connection is lost.
pub fn rating_constraint(ctx: &mut CheckContext<'_>) -> CheckResult {
    let mut steps = Vec::new();
    for rating in [0_i64, 6] {
        let result = rolled_back(ctx.session(), |session| {
            session.query(&probe_review_insert(rating)).map(|_| ())
        });
        let name = format!("rating_{rating}_rejected");
        steps.push(expect_constraint(&name, result, &format!("rating {rating}"))?);
    }
    let accepted: Result<(), DbError> =
        rolled_back(ctx.session(), |session| session.query(&probe_review_insert(5)).map(|_| ()));
    steps.push(match accepted {
        Ok(()) => StepOutcome::passed("rating_5_accepted", "in-range rating stored"),
        Err(err) if is_connection_loss(&err) => return Err(err.into()),
        Err(err) => StepOutcome::failed("rating_5_accepted", err.to_string()),
    });
    Ok(CheckOutput::steps(steps, json!({ "valid_range": [1, 5] })))
}

/// Replies attach to an existing review; orphan replies are rejected.
///
/// # Errors
///
/// Returns [`CheckError`] when a statement fails outright.
pub fn reply_linkage(ctx: &mut CheckContext<'_>) -> CheckResult {
    let mut steps = rolled_back(ctx.session(), |session| {
        let review_id = insert_probe_review(session, 4)?;
        let reply = session.query(&reply_insert(review_id))?;
        let reply_id = reply.scalar_i64();
        let count = session.query(&Query::new(COUNT_REPLIES_SQL).bind(review_id))?.scalar_i64();
        Ok::<_, CheckError>(vec![
            StepOutcome::check(
                "reply_inserted",
                reply_id.is_some(),
                format!("reply_id {}", describe(reply_id)),
            ),
            StepOutcome::check(
                "reply_linked",
                count == Some(1),
                format!("{} reply row(s) for review", describe(count)),
            ),
        ])
    })?;
    let orphan = rolled_back(ctx.session(), |session| {
        session.query(&reply_insert(MISSING_REVIEW_ID)).map(|_| ())
    });
    steps.push(expect_constraint("orphan_rejected", orphan, "reply to a missing review")?);
    Ok(CheckOutput::steps(steps, json!({})))
}

/// Builds the reply insert for `review_id`.
fn reply_insert(review_id: i64) -> Query {
    Query::new(INSERT_REPLY_SQL).bind(review_id).bind(PROBE_USER_ID).bind("harness reply")
}

// ============================================================================
// SECTION: Triggers
// ============================================================================

/// The summary trigger increments `total_reviews` on insert.
///
/// # Errors
///
/// Returns [`CheckError`] when a statement fails.
pub fn summary_trigger(ctx: &mut CheckContext<'_>) -> CheckResult {
    let (before, after) = rolled_back(ctx.session(), |session| {
        let total = Query::new(SUMMARY_TOTAL_SQL).bind(PROBE_PRODUCT_ID);
        let before = session.query(&total)?.scalar_i64().unwrap_or(0);
        insert_probe_review(session, 5)?;
        let after = session.query(&total)?.scalar_i64().unwrap_or(0);
        Ok::<_, CheckError>((before, after))
    })?;
    Ok(CheckOutput::from_condition(
        after == before + 1,
        format!("total_reviews went from {before} to {after}"),
        json!({ "before": before, "after": after }),
    ))
}
