// crates/review-harness-core/src/report.rs
// ============================================================================
// Module: Report Generator
// Description: Aggregates test results into JSON and HTML reports.
// Purpose: Produce the persisted record of a harness run.
// Dependencies: serde, serde_json, thiserror, time
// ============================================================================

//! ## Overview
//! A [`Report`] groups results by [`Category`] in the fixed report order,
//! omitting empty categories, and carries overall counts, the summed
//! duration, and the success rate. It serializes to pretty JSON and renders
//! to a self-contained HTML page with every text value escaped.
//!
//! Every value in a report is JSON-native by construction: durations are
//! finite seconds and non-finite floats become strings via [`json_f64`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Number;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::log::HarnessLog;
use crate::log::LogEvent;
use crate::log::LogLevel;
use crate::result::Category;
use crate::result::TestResult;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Report serialization errors.
#[derive(Debug, Error)]
pub enum ReportError {
    /// JSON encoding or decoding failed.
    #[error("report json error: {0}")]
    Json(String),
    /// Timestamp formatting failed.
    #[error("report timestamp error: {0}")]
    Timestamp(String),
    /// File output failed.
    #[error("report io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Types
// ============================================================================

/// Overall run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Number of results.
    pub total_tests: usize,
    /// Number of passing results.
    pub passed_tests: usize,
    /// Number of failing results.
    pub failed_tests: usize,
    /// Summed duration in seconds.
    pub total_duration: f64,
    /// Pass percentage, zero when there are no results.
    pub success_rate: f64,
}

/// One row of a category table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDetail {
    /// Check name.
    pub name: String,
    /// `PASS` or `FAIL`.
    pub status: String,
    /// Result message.
    pub message: String,
    /// Duration formatted as `<secs>s` with three decimals.
    pub duration: String,
    /// Check-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Results for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryReport {
    /// Category tag.
    pub category: Category,
    /// Number of results.
    pub total: usize,
    /// Passing results.
    pub passed: usize,
    /// Failing results.
    pub failed: usize,
    /// Summed duration in seconds.
    pub duration: f64,
    /// Per-result rows in run order.
    pub tests: Vec<TestDetail>,
}

/// Aggregated run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// RFC 3339 generation time.
    pub generated_at: String,
    /// Overall counts.
    pub summary: ReportSummary,
    /// Non-empty categories in report order.
    pub categories: Vec<CategoryReport>,
}

// ============================================================================
// SECTION: Construction
// ============================================================================

impl Report {
    /// Builds a report stamped with the current UTC time.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Timestamp`] when the time cannot be formatted.
    pub fn generate(results: &[TestResult]) -> Result<Self, ReportError> {
        Self::from_results(results, OffsetDateTime::now_utc())
    }

    /// Builds a report with an explicit generation time.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Timestamp`] when the time cannot be formatted.
    pub fn from_results(
        results: &[TestResult],
        generated_at: OffsetDateTime,
    ) -> Result<Self, ReportError> {
        let generated_at =
            generated_at.format(&Rfc3339).map_err(|err| ReportError::Timestamp(err.to_string()))?;
        let categories: Vec<CategoryReport> = Category::ALL
            .into_iter()
            .filter_map(|category| {
                let members: Vec<&TestResult> =
                    results.iter().filter(|result| result.category() == category).collect();
                if members.is_empty() {
                    return None;
                }
                let passed = members.iter().filter(|result| result.passed()).count();
                Some(CategoryReport {
                    category,
                    total: members.len(),
                    passed,
                    failed: members.len() - passed,
                    duration: members.iter().map(|result| result.duration().as_secs_f64()).sum(),
                    tests: members.iter().map(|result| detail(result)).collect(),
                })
            })
            .collect();
        let total_tests = results.len();
        let passed_tests = results.iter().filter(|result| result.passed()).count();
        let total_duration = results.iter().map(|result| result.duration().as_secs_f64()).sum();
        Ok(Self {
            generated_at,
            summary: ReportSummary {
                total_tests,
                passed_tests,
                failed_tests: total_tests - passed_tests,
                total_duration,
                success_rate: success_rate(passed_tests, total_tests),
            },
            categories,
        })
    }

    /// Returns the report for `category`, if it has results.
    #[must_use]
    pub fn category(&self, category: Category) -> Option<&CategoryReport> {
        self.categories.iter().find(|entry| entry.category == category)
    }

    /// Serializes the report as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Json`] when serialization fails.
    pub fn to_json_pretty(&self) -> Result<String, ReportError> {
        serde_json::to_string_pretty(self).map_err(|err| ReportError::Json(err.to_string()))
    }

    /// Parses a report previously written by [`Self::to_json_pretty`].
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Json`] when the input is not a report.
    pub fn from_json(input: &str) -> Result<Self, ReportError> {
        serde_json::from_str(input).map_err(|err| ReportError::Json(err.to_string()))
    }
}

/// Builds the table row for one result.
fn detail(result: &TestResult) -> TestDetail {
    TestDetail {
        name: result.name().to_string(),
        status: if result.passed() { "PASS" } else { "FAIL" }.to_string(),
        message: result.message().to_string(),
        duration: format!("{:.3}s", result.duration().as_secs_f64()),
        details: result.details().cloned(),
    }
}

/// Pass percentage of `passed` over `total`.
#[allow(clippy::cast_precision_loss, reason = "Result counts are far below 2^52.")]
fn success_rate(passed: usize, total: usize) -> f64 {
    if total == 0 { 0.0 } else { passed as f64 * 100.0 / total as f64 }
}

/// Converts a float into a JSON value, mapping non-finite values to strings.
#[must_use]
pub fn json_f64(value: f64) -> Value {
    Number::from_f64(value).map_or_else(|| Value::String(value.to_string()), Value::Number)
}

// ============================================================================
// SECTION: HTML
// ============================================================================

/// Inline stylesheet for the HTML report.
const HTML_STYLE: &str = "body{font-family:sans-serif;margin:2em;color:#222}\
table{border-collapse:collapse;width:100%;margin-bottom:2em}\
th,td{border:1px solid #ccc;padding:4px 8px;text-align:left;vertical-align:top}\
th{background:#f0f0f0}.pass{color:#1a7f37;font-weight:bold}\
.fail{color:#cf222e;font-weight:bold}pre{margin:0;white-space:pre-wrap}";

/// Escapes text for HTML element and attribute content.
#[must_use]
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Renders the report as a standalone HTML page.
#[must_use]
pub fn render_html(report: &Report) -> String {
    let summary = &report.summary;
    let mut html = String::new();
    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>Review \
         System Test Report</title>\n<style>{HTML_STYLE}</style>\n</head>\n<body>\n<h1>Review \
         System Test Report</h1>\n<p>Generated at {}</p>\n",
        escape_html(&report.generated_at)
    );
    let _ = write!(
        html,
        "<h2>Summary</h2>\n<table>\n<tr><th>Total</th><th>Passed</th><th>Failed</th><th>Duration</\
         th><th>Success Rate</th></tr>\n<tr><td>{}</td><td>{}</td><td>{}</td><td>{:.2}s</\
         td><td>{:.1}%</td></tr>\n</table>\n",
        summary.total_tests,
        summary.passed_tests,
        summary.failed_tests,
        summary.total_duration,
        summary.success_rate
    );
    for category in &report.categories {
        let _ = write!(
            html,
            "<h2>{} ({}/{} passed, {:.3}s)</h2>\n<table>\n<tr><th>Name</th><th>Status</\
             th><th>Message</th><th>Duration</th><th>Details</th></tr>\n",
            escape_html(category.category.as_str()),
            category.passed,
            category.total,
            category.duration
        );
        for test in &category.tests {
            let class = if test.status == "PASS" { "pass" } else { "fail" };
            let details = test
                .details
                .as_ref()
                .and_then(|details| serde_json::to_string_pretty(details).ok())
                .unwrap_or_default();
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td class=\"{class}\">{}</td><td>{}</td><td>{}</td><td><pre>{}</\
                 pre></td></tr>",
                escape_html(&test.name),
                escape_html(&test.status),
                escape_html(&test.message),
                escape_html(&test.duration),
                escape_html(&details)
            );
        }
        html.push_str("</table>\n");
    }
    html.push_str("</body>\n</html>\n");
    html
}

// ============================================================================
// SECTION: Output
// ============================================================================

/// Builds the `YYYYMMDD_HHMMSS` file stamp for a report.
fn file_stamp(report: &Report) -> String {
    let at = OffsetDateTime::parse(&report.generated_at, &Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc());
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

/// Writes `test_report_<stamp>.json` and `test_report_<stamp>.html` into
/// `dir`, creating it when missing. Failures are logged, not returned; the
/// paths actually written are returned.
pub fn write_reports(report: &Report, dir: &Path, log: &dyn HarnessLog) -> Vec<PathBuf> {
    let mut written = Vec::new();
    if let Err(err) = fs::create_dir_all(dir) {
        log_write_failure(log, dir, &err.to_string());
        return written;
    }
    let stamp = file_stamp(report);
    let json_path = dir.join(format!("test_report_{stamp}.json"));
    match report.to_json_pretty() {
        Ok(json) => match fs::write(&json_path, json) {
            Ok(()) => written.push(json_path),
            Err(err) => log_write_failure(log, &json_path, &err.to_string()),
        },
        Err(err) => log_write_failure(log, &json_path, &err.to_string()),
    }
    let html_path = dir.join(format!("test_report_{stamp}.html"));
    match fs::write(&html_path, render_html(report)) {
        Ok(()) => written.push(html_path),
        Err(err) => log_write_failure(log, &html_path, &err.to_string()),
    }
    for path in &written {
        log.record(
            &LogEvent::new("report_written", LogLevel::Info, "report written")
                .with_field("path", path.display().to_string()),
        );
    }
    written
}

/// Logs a swallowed report write failure.
fn log_write_failure(log: &dyn HarnessLog, path: &Path, error: &str) {
    log.record(
        &LogEvent::new("report_write_failed", LogLevel::Error, error)
            .with_field("path", path.display().to_string()),
    );
}
