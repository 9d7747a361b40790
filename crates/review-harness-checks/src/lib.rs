// crates/review-harness-checks/src/lib.rs
// ============================================================================
// Module: Review Harness Checks Library
// Description: Check families run against the review_system schema.
// Purpose: Provide the ordered check catalog consumed by the test runner.
// Dependencies: review-harness-core, review-harness-config, csv, serde_json
// ============================================================================

//! ## Overview
//! Every check is a function of a [`review_harness_core::CheckContext`] that
//! returns a typed [`review_harness_core::CheckOutput`]. Checks exercise the
//! database's own behavior (constraints, roles, triggers, planner, server
//! functions). They never implement that behavior themselves.
//!
//! Writes made by checks run inside transactions that are rolled back,
//! except where a check needs rows visible to other sessions; those checks
//! insert probe rows under a reserved product id and delete them before
//! returning.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod backup;
pub mod business;
pub mod catalog;
pub mod concurrent;
pub mod injection;
pub mod partition;
pub mod performance;
pub mod sampling;
pub mod security;
pub mod stress;
pub mod support;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use catalog::CatalogEntry;
pub use catalog::default_catalog;
pub use catalog::filter_catalog;
pub use catalog::run_catalog;
pub use sampling::SampleError;
pub use sampling::sample_rows_csv;
pub use sampling::sample_tables;
