// crates/review-harness-checks/src/sampling.rs
// ============================================================================
// Module: Row Sampling
// Description: CSV dumps of sample rows from allow-listed tables.
// Purpose: Attach representative table contents to a test run.
// Dependencies: review-harness-core, csv, thiserror
// ============================================================================

//! ## Overview
//! Table names come from config, so they are never interpolated. Each
//! allow-listed table maps to a static statement with a bound `LIMIT`.
//! Unknown names are rejected before any SQL runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use review_harness_core::DbError;
use review_harness_core::HarnessLog;
use review_harness_core::LogEvent;
use review_harness_core::LogLevel;
use review_harness_core::Query;
use review_harness_core::SqlSession;
use review_harness_core::SqlValue;
use thiserror::Error;

// ============================================================================
// SECTION: Allow-List
// ============================================================================

/// Tables that may be sampled, with their sampling statements.
const SAMPLE_QUERIES: [(&str, &str); 5] = [
    ("reviews_partitioned", "SELECT * FROM review_system.reviews_partitioned LIMIT $1"),
    ("review_replies_partitioned", "SELECT * FROM review_system.review_replies_partitioned LIMIT $1"),
    ("review_summary_partitioned", "SELECT * FROM review_system.review_summary_partitioned LIMIT $1"),
    ("backup_history", "SELECT * FROM review_system.backup_history LIMIT $1"),
    ("backup_metadata", "SELECT * FROM review_system.backup_metadata LIMIT $1"),
];

/// Returns the sampling statement for an allow-listed table.
#[must_use]
pub fn sample_query(table: &str) -> Option<&'static str> {
    SAMPLE_QUERIES.iter().find(|(name, _)| *name == table).map(|(_, sql)| *sql)
}

/// Returns the allow-listed table names.
#[must_use]
pub fn sampleable_tables() -> Vec<&'static str> {
    SAMPLE_QUERIES.iter().map(|(name, _)| *name).collect()
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Sampling failures.
#[derive(Debug, Error)]
pub enum SampleError {
    /// Table is not on the allow-list.
    #[error("table {0} is not sampleable")]
    UnknownTable(String),
    /// Sampling query failed.
    #[error(transparent)]
    Database(#[from] DbError),
    /// CSV encoding failed.
    #[error("csv error: {0}")]
    Csv(String),
    /// Output file could not be written.
    #[error("io error: {0}")]
    Io(String),
}

impl From<csv::Error> for SampleError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err.to_string())
    }
}

impl From<std::io::Error> for SampleError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// ============================================================================
// SECTION: Sampling
// ============================================================================

/// Writes up to `limit` rows of `table` to `path` as CSV with a header.
///
/// Returns the number of data rows written.
///
/// # Errors
///
/// Returns [`SampleError`] when the table is not allow-listed, the query
/// fails, or the file cannot be written.
pub fn sample_rows_csv(
    session: &mut dyn SqlSession,
    table: &str,
    limit: u32,
    path: &Path,
) -> Result<usize, SampleError> {
    let sql = sample_query(table).ok_or_else(|| SampleError::UnknownTable(table.to_string()))?;
    let rows = session.query(&Query::new(sql).bind(i64::from(limit)))?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(rows.columns())?;
    for row in rows.rows() {
        writer.write_record(row.iter().map(SqlValue::display_text))?;
    }
    writer.flush()?;
    Ok(rows.len())
}

/// Samples each table into `<dir>/<table>_sample.csv`.
///
/// Failures are logged and skipped; returns the files written.
pub fn sample_tables(
    session: &mut dyn SqlSession,
    tables: &[String],
    limit: u32,
    dir: &Path,
    log: &dyn HarnessLog,
) -> Vec<PathBuf> {
    if let Err(err) = fs::create_dir_all(dir) {
        log.error("sample_dir_failed", &err.to_string());
        return Vec::new();
    }
    let mut written = Vec::new();
    for table in tables {
        let path = dir.join(format!("{table}_sample.csv"));
        match sample_rows_csv(session, table, limit, &path) {
            Ok(count) => {
                log.record(
                    &LogEvent::new("sample_written", LogLevel::Info, path.display().to_string())
                        .with_field("table", table.as_str())
                        .with_field("rows", count),
                );
                written.push(path);
            }
            Err(err) => {
                log.record(
                    &LogEvent::new("sample_failed", LogLevel::Warn, err.to_string())
                        .with_field("table", table.as_str()),
                );
            }
        }
    }
    written
}
