// crates/review-harness-checks/src/performance.rs
// ============================================================================
// Module: Performance Checks
// Description: Timed read queries and partition pruning plan inspection.
// Purpose: Hold common review queries to configured latency thresholds.
// Dependencies: review-harness-core, review-harness-config, serde_json
// ============================================================================

//! ## Overview
//! Each timed query runs once under the retry policy; retries count toward
//! the measured time. The pruning probe reads `EXPLAIN (FORMAT JSON)` for the
//! current-month date range query and counts the distinct partitions the
//! plan touches.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::time::Instant;

use review_harness_config::ThresholdConfig;
use review_harness_core::CheckContext;
use review_harness_core::CheckError;
use review_harness_core::CheckOutput;
use review_harness_core::CheckResult;
use review_harness_core::Query;
use review_harness_core::SqlValue;
use review_harness_core::StepOutcome;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::support::elapsed_ms;

// ============================================================================
// SECTION: Queries
// ============================================================================

/// Product id used for single-product lookups.
pub const SAMPLE_PRODUCT_ID: i64 = 1;

/// Parent table of the review partitions.
const PARENT_TABLE: &str = "reviews_partitioned";

/// Latest reviews for one product.
const RECENT_REVIEWS_SQL: &str = "SELECT review_id, rating, created_at \
     FROM review_system.reviews_partitioned WHERE product_id = $1 \
     ORDER BY created_at DESC LIMIT 20";

/// Top products by review count with average rating.
const RATING_AGGREGATION_SQL: &str = "SELECT product_id, COUNT(*) AS reviews, \
     AVG(rating)::float8 AS average_rating FROM review_system.reviews_partitioned \
     GROUP BY product_id ORDER BY reviews DESC LIMIT 10";

/// Summary row for one product.
const SUMMARY_LOOKUP_SQL: &str = "SELECT total_reviews, average_rating \
     FROM review_system.review_summary_partitioned WHERE product_id = $1";

/// Current-month review count; partition pruning applies.
const DATE_RANGE_SQL: &str = "SELECT COUNT(*) AS reviews FROM review_system.reviews_partitioned \
     WHERE created_at >= date_trunc('month', now()) \
     AND created_at < date_trunc('month', now()) + interval '1 month'";

/// Plan of [`DATE_RANGE_SQL`].
const DATE_RANGE_PLAN_SQL: &str = "EXPLAIN (FORMAT JSON) \
     SELECT COUNT(*) AS reviews FROM review_system.reviews_partitioned \
     WHERE created_at >= date_trunc('month', now()) \
     AND created_at < date_trunc('month', now()) + interval '1 month'";

/// A query measured against a threshold.
struct TimedQuery {
    /// Step name.
    name: &'static str,
    /// Statement to run.
    query: Query,
    /// Threshold in milliseconds.
    limit_ms: u64,
}

/// Builds the timed queries with their thresholds.
fn timed_queries(thresholds: &ThresholdConfig) -> Vec<TimedQuery> {
    vec![
        TimedQuery {
            name: "recent_reviews",
            query: Query::new(RECENT_REVIEWS_SQL).bind(SAMPLE_PRODUCT_ID),
            limit_ms: thresholds.recent_reviews_ms,
        },
        TimedQuery {
            name: "rating_aggregation",
            query: Query::new(RATING_AGGREGATION_SQL),
            limit_ms: thresholds.rating_aggregation_ms,
        },
        TimedQuery {
            name: "summary_lookup",
            query: Query::new(SUMMARY_LOOKUP_SQL).bind(SAMPLE_PRODUCT_ID),
            limit_ms: thresholds.summary_lookup_ms,
        },
        TimedQuery {
            name: "date_range",
            query: Query::new(DATE_RANGE_SQL),
            limit_ms: thresholds.date_range_ms,
        },
    ]
}

// ============================================================================
// SECTION: Checks
// ============================================================================

/// Times the common review queries against their thresholds.
///
/// # Errors
///
/// Returns [`CheckError`] when a query fails after retries.
pub fn query_latency(ctx: &mut CheckContext<'_>, thresholds: &ThresholdConfig) -> CheckResult {
    let mut steps = Vec::new();
    let mut timings = Map::new();
    for timed in timed_queries(thresholds) {
        let started = Instant::now();
        let rows = ctx.with_retry(|session| Ok(session.query(&timed.query)?))?;
        let elapsed = elapsed_ms(started);
        steps.push(StepOutcome::check(
            timed.name,
            elapsed <= timed.limit_ms,
            format!("{elapsed} ms (limit {} ms, {} rows)", timed.limit_ms, rows.len()),
        ));
        timings.insert(timed.name.to_string(), json!({ "ms": elapsed, "limit_ms": timed.limit_ms }));
    }
    Ok(CheckOutput::steps(steps, json!({ "timings": timings })))
}

/// Checks that the date range query is pruned to few partitions.
///
/// # Errors
///
/// Returns [`CheckError`] when `EXPLAIN` fails or returns no plan.
pub fn partition_pruning(ctx: &mut CheckContext<'_>, thresholds: &ThresholdConfig) -> CheckResult {
    let rows = ctx.with_retry(|session| Ok(session.query(&Query::new(DATE_RANGE_PLAN_SQL))?))?;
    let plan = match rows.scalar() {
        Some(SqlValue::Json(plan)) => plan.clone(),
        Some(SqlValue::Text(text)) => serde_json::from_str(text)
            .map_err(|err| CheckError::assertion(format!("unreadable plan: {err}")))?,
        _ => return Err(CheckError::assertion("EXPLAIN returned no plan")),
    };
    let scanned = scanned_partitions(&plan);
    let limit = thresholds.max_partitions_scanned;
    Ok(CheckOutput::from_condition(
        scanned.len() <= limit,
        format!("plan scans {} partitions (limit {limit})", scanned.len()),
        json!({ "partitions": scanned, "limit": limit }),
    ))
}

/// Collects the distinct child relations named anywhere in a JSON plan.
#[must_use]
pub fn scanned_partitions(plan: &Value) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    collect_relations(plan, &mut found);
    found.remove(PARENT_TABLE);
    found
}

/// Walks a plan tree collecting `Relation Name` values.
fn collect_relations(node: &Value, found: &mut BTreeSet<String>) {
    match node {
        Value::Object(map) => {
            if let Some(Value::String(name)) = map.get("Relation Name") {
                found.insert(name.clone());
            }
            map.values().for_each(|child| collect_relations(child, found));
        }
        Value::Array(items) => items.iter().for_each(|child| collect_relations(child, found)),
        _ => {}
    }
}
