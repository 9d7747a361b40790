// crates/review-harness-checks/src/partition.rs
// ============================================================================
// Module: Partition Checks
// Description: Future partition creation, inventory, naming, and upkeep.
// Purpose: Confirm partition maintenance functions keep the review table sane.
// Dependencies: review-harness-core, review-harness-config, serde_json
// ============================================================================

//! ## Overview
//! Partitions of `review_system.reviews_partitioned` are monthly and named
//! `reviews_y<YYYY>m<MM>`. Creation and optimization are server functions;
//! this module only calls them and inspects `pg_inherits`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use review_harness_config::PartitionConfig;
use review_harness_core::CheckContext;
use review_harness_core::CheckOutput;
use review_harness_core::CheckResult;
use review_harness_core::Query;
use review_harness_core::SqlValue;
use review_harness_core::StepOutcome;
use serde_json::json;

use crate::support::is_connection_loss;

// ============================================================================
// SECTION: Statements
// ============================================================================

/// Creates partitions for the coming months.
const CREATE_FUTURE_SQL: &str = "SELECT review_system.create_future_partitions($1::int4)";

/// Lists the children of the review table.
const LIST_PARTITIONS_SQL: &str = "SELECT child.relname::text AS partition \
     FROM pg_inherits \
     JOIN pg_class child ON child.oid = pg_inherits.inhrelid \
     JOIN pg_class parent ON parent.oid = pg_inherits.inhparent \
     JOIN pg_namespace ns ON ns.oid = parent.relnamespace \
     WHERE ns.nspname = 'review_system' AND parent.relname = 'reviews_partitioned' \
     ORDER BY child.relname";

/// Runs partition upkeep.
const OPTIMIZE_SQL: &str = "SELECT review_system.optimize_partitions()";

/// Partition name prefix.
const PARTITION_PREFIX: &str = "reviews_y";

// ============================================================================
// SECTION: Naming
// ============================================================================

/// Returns true for names of the form `reviews_y<YYYY>m<MM>` with a real
/// month.
#[must_use]
pub fn is_partition_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix(PARTITION_PREFIX) else {
        return false;
    };
    let Some((year, month)) = rest.split_once('m') else {
        return false;
    };
    let digits = |part: &str, len: usize| part.len() == len && part.bytes().all(|byte| byte.is_ascii_digit());
    digits(year, 4) && digits(month, 2) && matches!(month.parse::<u8>(), Ok(1 ..= 12))
}

// ============================================================================
// SECTION: Checks
// ============================================================================

/// Creates future partitions, then checks the inventory and naming.
///
/// # Errors
///
/// Returns [`review_harness_core::CheckError`] when the inventory query
/// fails or the connection is lost.
pub fn partition_maintenance(ctx: &mut CheckContext<'_>, partition: &PartitionConfig) -> CheckResult {
    let months = i64::from(partition.future_months);
    let created = match ctx.session().query(&Query::new(CREATE_FUTURE_SQL).bind(months)) {
        Ok(_) => StepOutcome::passed("create_future", format!("{months} month(s) ahead")),
        Err(err) if is_connection_loss(&err) => return Err(err.into()),
        Err(err) => StepOutcome::failed("create_future", err.to_string()),
    };
    let rows = ctx.with_retry(|session| Ok(session.query(&Query::new(LIST_PARTITIONS_SQL))?))?;
    let names: Vec<&str> = rows.column_values("partition").into_iter().filter_map(SqlValue::as_str).collect();
    let misnamed: Vec<&str> = names.iter().copied().filter(|name| !is_partition_name(name)).collect();
    let count = names.len();
    let minimum = usize::try_from(partition.min_partitions).unwrap_or(usize::MAX);
    let steps = vec![
        created,
        StepOutcome::check(
            "inventory",
            count >= minimum,
            format!("{count} partition(s) (minimum {minimum})"),
        ),
        StepOutcome::check("naming", misnamed.is_empty(), format!("misnamed: {}", misnamed.join(", "))),
    ];
    Ok(CheckOutput::steps(steps, json!({ "partitions": names, "misnamed": misnamed })))
}

/// Runs the server-side partition optimizer.
///
/// # Errors
///
/// Returns [`review_harness_core::CheckError`] when the function fails.
pub fn partition_optimization(ctx: &mut CheckContext<'_>) -> CheckResult {
    ctx.session().query(&Query::new(OPTIMIZE_SQL))?;
    Ok(CheckOutput::pass(json!({ "function": "review_system.optimize_partitions" })))
}
