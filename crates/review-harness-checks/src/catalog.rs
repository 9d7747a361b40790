// crates/review-harness-checks/src/catalog.rs
// ============================================================================
// Module: Check Catalog
// Description: Ordered list of named checks with their categories.
// Purpose: Bind config values into checks and feed them to the runner.
// Dependencies: review-harness-core, review-harness-config
// ============================================================================

//! ## Overview
//! [`default_catalog`] captures the relevant config sections by value into
//! each entry, so the runner only sees `Fn(&mut CheckContext) -> CheckResult`.
//! Entry order is the run order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use review_harness_config::HarnessConfig;
use review_harness_core::Category;
use review_harness_core::CheckContext;
use review_harness_core::CheckResult;
use review_harness_core::TestResult;
use review_harness_core::TestRunner;

use crate::backup;
use crate::business;
use crate::concurrent;
use crate::injection;
use crate::partition;
use crate::performance;
use crate::security;
use crate::stress;

// ============================================================================
// SECTION: Entries
// ============================================================================

/// Boxed check function.
pub type CheckFn = Box<dyn Fn(&mut CheckContext<'_>) -> CheckResult + Send + Sync>;

/// One named check.
pub struct CatalogEntry {
    /// Report category.
    pub category: Category,
    /// Check name, unique within the catalog.
    pub name: &'static str,
    /// Check body.
    pub check: CheckFn,
}

impl CatalogEntry {
    /// Creates an entry.
    pub fn new<F>(category: Category, name: &'static str, check: F) -> Self
    where
        F: Fn(&mut CheckContext<'_>) -> CheckResult + Send + Sync + 'static,
    {
        Self {
            category,
            name,
            check: Box::new(check),
        }
    }

    /// Runs the entry through `runner`.
    pub fn run(&self, runner: &mut TestRunner) -> TestResult {
        runner.run(self.category, self.name, |ctx| (self.check)(ctx))
    }
}

// ============================================================================
// SECTION: Default Catalog
// ============================================================================

/// Builds the full catalog from config.
#[must_use]
pub fn default_catalog(config: &HarnessConfig) -> Vec<CatalogEntry> {
    let thresholds = config.thresholds;
    let stress_config = config.stress;
    let backup_config = config.backup;
    let partition_config = config.partition;
    let acquire = config.pool.acquire_timeout();
    vec![
        CatalogEntry::new(Category::Security, "sql_injection_block", security::sql_injection_block),
        CatalogEntry::new(
            Category::Security,
            "privilege_escalation_block",
            security::privilege_escalation_block,
        ),
        CatalogEntry::new(
            Category::Security,
            "sensitive_data_encryption",
            security::sensitive_data_encryption,
        ),
        CatalogEntry::new(Category::Injection, "raw_injection_battery", injection::raw_injection_battery),
        CatalogEntry::new(Category::Performance, "query_latency", move |ctx| {
            performance::query_latency(ctx, &thresholds)
        }),
        CatalogEntry::new(Category::Performance, "partition_pruning", move |ctx| {
            performance::partition_pruning(ctx, &thresholds)
        }),
        CatalogEntry::new(Category::Business, "review_crud", business::review_crud),
        CatalogEntry::new(Category::Business, "rating_constraint", business::rating_constraint),
        CatalogEntry::new(Category::Business, "reply_linkage", business::reply_linkage),
        CatalogEntry::new(Category::Business, "summary_trigger", business::summary_trigger),
        CatalogEntry::new(Category::Stress, "bulk_insert", move |ctx| {
            stress::bulk_insert(ctx, &stress_config)
        }),
        CatalogEntry::new(Category::Stress, "parallel_workload", move |ctx| {
            stress::parallel_workload(ctx, &stress_config, acquire)
        }),
        CatalogEntry::new(Category::Stress, "adverse_battery", move |ctx| {
            stress::adverse_battery(ctx, &stress_config, acquire)
        }),
        CatalogEntry::new(Category::Concurrent, "concurrent_updates", move |ctx| {
            concurrent::concurrent_updates(ctx, &stress_config, acquire)
        }),
        CatalogEntry::new(Category::Concurrent, "deadlock_tally", move |ctx| {
            concurrent::deadlock_tally(ctx, &stress_config, acquire)
        }),
        CatalogEntry::new(Category::Concurrent, "serializable_probe", move |ctx| {
            concurrent::serializable_probe(ctx, &stress_config, acquire)
        }),
        CatalogEntry::new(Category::Backup, "backup_tables", backup::backup_tables),
        CatalogEntry::new(Category::Backup, "latest_backup", move |ctx| {
            backup::latest_backup(ctx, &backup_config)
        }),
        CatalogEntry::new(Category::Partition, "partition_maintenance", move |ctx| {
            partition::partition_maintenance(ctx, &partition_config)
        }),
        CatalogEntry::new(
            Category::Partition,
            "partition_optimization",
            partition::partition_optimization,
        ),
    ]
}

/// Keeps entries whose category is listed; an empty list keeps everything.
#[must_use]
pub fn filter_catalog(entries: Vec<CatalogEntry>, categories: &[Category]) -> Vec<CatalogEntry> {
    if categories.is_empty() {
        return entries;
    }
    entries.into_iter().filter(|entry| categories.contains(&entry.category)).collect()
}

/// Runs every entry in order.
pub fn run_catalog(runner: &mut TestRunner, entries: &[CatalogEntry]) {
    for entry in entries {
        entry.run(runner);
    }
}
