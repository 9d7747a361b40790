// crates/review-harness-cli/src/lib.rs
// ============================================================================
// Module: Review Harness CLI Library
// Description: Monitor and deployment workflows behind the CLI.
// Purpose: Keep command logic testable apart from argument parsing.
// Dependencies: review-harness-core, review-harness-config, review-harness-postgres
// ============================================================================

//! ## Overview
//! The `review-harness` binary parses arguments and delegates to these
//! modules. The realtime monitor polls `pg_stat_*` views through a session
//! source; deployment runs the ordered SQL files against one connection.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod deploy;
pub mod monitor;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use deploy::DeployError;
pub use deploy::DeployPlan;
pub use deploy::DeployReport;
pub use deploy::DeployStep;
pub use monitor::Monitor;
pub use monitor::MonitorError;
pub use monitor::MonitorSnapshot;
