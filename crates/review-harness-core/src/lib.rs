// crates/review-harness-core/src/lib.rs
// ============================================================================
// Module: Review Harness Core Library
// Description: Public API surface for the review harness core.
// Purpose: Expose sessions, pooling, retry, workers, runner, and reporting.
// Dependencies: crate::{session, pool, retry, worker, runner, report, log}
// ============================================================================

//! ## Overview
//! Review harness core provides the execution and reporting skeleton used to
//! probe a `review_system` `PostgreSQL` deployment: a dyn-safe SQL session
//! interface, a fixed-size connection pool, a retry wrapper, a bounded worker
//! pool, a test runner that records typed outcomes, and a report generator.
//! It is driver-agnostic; concrete drivers plug in through
//! [`r2d2::ManageConnection`] and [`SqlSession`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod error;
pub mod log;
pub mod outcome;
pub mod pool;
pub mod report;
pub mod result;
pub mod retry;
pub mod runner;
pub mod session;
pub mod worker;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use error::CheckError;
pub use log::FanoutLogSink;
pub use log::FileLogSink;
pub use log::HarnessLog;
pub use log::LogEvent;
pub use log::LogLevel;
pub use log::NoopLogSink;
pub use log::StderrLogSink;
pub use outcome::CheckOutput;
pub use outcome::Outcome;
pub use outcome::StepOutcome;
pub use outcome::StepStatus;
pub use pool::ConnectionPool;
pub use pool::PoolError;
pub use pool::PoolStats;
pub use pool::PooledConnection;
pub use pool::SessionLease;
pub use pool::SessionSource;
pub use report::CategoryReport;
pub use report::Report;
pub use report::ReportError;
pub use report::ReportSummary;
pub use report::TestDetail;
pub use report::render_html;
pub use report::write_reports;
pub use result::Category;
pub use result::TestResult;
pub use retry::RetryPolicy;
pub use retry::Retryable;
pub use retry::Sleeper;
pub use retry::ThreadSleeper;
pub use retry::retry;
pub use runner::CheckContext;
pub use runner::CheckResult;
pub use runner::RunSummary;
pub use runner::TestRunner;
pub use session::DbError;
pub use session::DbErrorKind;
pub use session::Query;
pub use session::RawSql;
pub use session::SqlRows;
pub use session::SqlSession;
pub use session::SqlValue;
pub use worker::CancelToken;
pub use worker::Task;
pub use worker::TaskOutcome;
pub use worker::WorkerPool;
pub use worker::run_with_timeout;
