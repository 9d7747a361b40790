// crates/review-harness-core/src/session.rs
// ============================================================================
// Module: SQL Sessions
// Description: Driver-agnostic SQL session interface and value model.
// Purpose: Separate parameterized statements from deliberately raw SQL.
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! Checks talk to the database through [`SqlSession`], which is object safe so
//! the runner can hand out `&mut dyn SqlSession` regardless of driver.
//!
//! Two statement types exist and they never mix:
//! - [`Query`] carries `'static` SQL text with `$n` placeholders and typed
//!   parameters. This is the only path for user-controlled values.
//! - [`RawSql`] is built by string interpolation and exists solely for the
//!   injection probes, which need to send hostile text verbatim.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::log::HarnessLog;
use crate::log::LogEvent;
use crate::log::LogLevel;

// ============================================================================
// SECTION: Values
// ============================================================================

/// A single SQL parameter or column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer value (all integer widths widen to `i64`).
    Int(i64),
    /// Floating point or numeric value.
    Float(f64),
    /// Text value (also used for types without a dedicated variant).
    Text(String),
    /// JSON or JSONB value.
    Json(Value),
}

impl SqlValue {
    /// Returns the value as an integer when it holds one.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the value as a float, widening integers.
    #[must_use]
    #[allow(clippy::cast_precision_loss, reason = "Row counts stay far below 2^52.")]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    /// Returns the value as text when it holds a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns the value as a boolean when it holds one.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns true for SQL `NULL`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Converts the value into a JSON value for report details.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(value) => Value::Bool(*value),
            Self::Int(value) => Value::from(*value),
            Self::Float(value) => crate::report::json_f64(*value),
            Self::Text(value) => Value::String(value.clone()),
            Self::Json(value) => value.clone(),
        }
    }

    /// Renders the value as plain text for CSV and terminal output.
    #[must_use]
    pub fn display_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(value) => value.to_string(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::Text(value) => value.clone(),
            Self::Json(value) => value.to_string(),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl<T: Into<Self>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// A fully materialized query result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlRows {
    /// Column names in select-list order.
    columns: Vec<String>,
    /// Row values, one vector per row, aligned with `columns`.
    rows: Vec<Vec<SqlValue>>,
}

impl SqlRows {
    /// Builds a result set from column names and rows.
    #[must_use]
    pub const fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self {
            columns,
            rows,
        }
    }

    /// Builds an empty result set with the given columns.
    #[must_use]
    pub fn empty(columns: &[&str]) -> Self {
        Self::new(columns.iter().map(|name| (*name).to_string()).collect(), Vec::new())
    }

    /// Returns the column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns all rows.
    #[must_use]
    pub fn rows(&self) -> &[Vec<SqlValue>] {
        &self.rows
    }

    /// Returns the number of rows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when the result has no rows.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns the index of a named column.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Returns a value by row index and column name.
    #[must_use]
    pub fn get(&self, row: usize, column: &str) -> Option<&SqlValue> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }

    /// Returns the first column of the first row.
    #[must_use]
    pub fn scalar(&self) -> Option<&SqlValue> {
        self.rows.first()?.first()
    }

    /// Returns the first column of the first row as an integer.
    #[must_use]
    pub fn scalar_i64(&self) -> Option<i64> {
        self.scalar().and_then(SqlValue::as_i64)
    }

    /// Collects one column across all rows.
    #[must_use]
    pub fn column_values(&self, column: &str) -> Vec<&SqlValue> {
        let Some(index) = self.column_index(column) else {
            return Vec::new();
        };
        self.rows.iter().filter_map(|row| row.get(index)).collect()
    }
}

// ============================================================================
// SECTION: Statements
// ============================================================================

/// Parameterized statement with static SQL text.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// SQL text with `$n` placeholders.
    sql: &'static str,
    /// Bound parameters in placeholder order.
    params: Vec<SqlValue>,
}

impl Query {
    /// Creates a statement with no parameters.
    #[must_use]
    pub const fn new(sql: &'static str) -> Self {
        Self {
            sql,
            params: Vec::new(),
        }
    }

    /// Binds the next positional parameter.
    #[must_use]
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Returns the SQL text.
    #[must_use]
    pub const fn sql(&self) -> &'static str {
        self.sql
    }

    /// Returns the bound parameters.
    #[must_use]
    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }
}

/// Marker substituted by [`RawSql::interpolated`].
pub const RAW_PAYLOAD_MARKER: &str = "{payload}";

/// Deliberately unsafe SQL assembled by string interpolation.
///
/// # Invariants
/// - Only injection probes construct this type.
/// - The payload is inserted verbatim with no quoting or escaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSql {
    /// Final SQL text sent to the server.
    sql: String,
}

impl RawSql {
    /// Substitutes `payload` verbatim for every `{payload}` marker.
    #[must_use]
    pub fn interpolated(template: &str, payload: &str) -> Self {
        Self {
            sql: template.replace(RAW_PAYLOAD_MARKER, payload),
        }
    }

    /// Returns the interpolated SQL text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Classification of database driver errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbErrorKind {
    /// Connection failure or closed connection (SQLSTATE class `08`).
    Connection,
    /// Deadlock detected (`40P01`).
    Deadlock,
    /// Serialization failure (`40001`).
    Serialization,
    /// Statement timeout or cancellation (`57014`).
    Timeout,
    /// Integrity constraint violation (class `23`).
    Constraint,
    /// Insufficient privilege (`42501`).
    Permission,
    /// Syntax error or access rule violation (class `42`).
    Syntax,
    /// Admin shutdown or terminated backend (class `57P`).
    Terminated,
    /// Anything else.
    Other,
}

impl DbErrorKind {
    /// Classifies a five-character SQLSTATE code.
    #[must_use]
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "40P01" => Self::Deadlock,
            "40001" => Self::Serialization,
            "57014" => Self::Timeout,
            "42501" => Self::Permission,
            _ if code.starts_with("57P") => Self::Terminated,
            _ if code.starts_with("08") => Self::Connection,
            _ if code.starts_with("23") => Self::Constraint,
            _ if code.starts_with("42") => Self::Syntax,
            _ => Self::Other,
        }
    }

    /// Returns a stable label for the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Deadlock => "deadlock",
            Self::Serialization => "serialization",
            Self::Timeout => "timeout",
            Self::Constraint => "constraint",
            Self::Permission => "permission",
            Self::Syntax => "syntax",
            Self::Terminated => "terminated",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Database driver error surfaced through a [`SqlSession`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("database error ({kind}): {message}")]
pub struct DbError {
    /// Error classification.
    pub kind: DbErrorKind,
    /// SQLSTATE code when the server supplied one.
    pub code: Option<String>,
    /// Driver or server message.
    pub message: String,
}

impl DbError {
    /// Creates an error with an explicit kind and no SQLSTATE.
    #[must_use]
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Creates an error from a SQLSTATE code, classifying it.
    #[must_use]
    pub fn from_sqlstate(code: &str, message: impl Into<String>) -> Self {
        Self {
            kind: DbErrorKind::from_sqlstate(code),
            code: Some(code.to_string()),
            message: message.into(),
        }
    }

    /// Returns true when the error has the given kind.
    #[must_use]
    pub fn is(&self, kind: DbErrorKind) -> bool {
        self.kind == kind
    }
}

// ============================================================================
// SECTION: Session Trait
// ============================================================================

/// A live database session.
pub trait SqlSession: Send {
    /// Runs a parameterized query and materializes its rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when the driver or server rejects the statement.
    fn query(&mut self, query: &Query) -> Result<SqlRows, DbError>;

    /// Runs a parameterized statement and returns the affected row count.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when the driver or server rejects the statement.
    fn execute(&mut self, query: &Query) -> Result<u64, DbError>;

    /// Runs an interpolated statement through the simple query protocol.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when the driver or server rejects the statement.
    fn query_raw(&mut self, raw: &RawSql) -> Result<SqlRows, DbError>;

    /// Runs a multi-statement script with no parameters.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when any statement in the script fails.
    fn batch_execute(&mut self, script: &str) -> Result<(), DbError>;

    /// Returns true when the underlying connection is no longer usable.
    fn is_closed(&self) -> bool;

    /// Opens a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when `BEGIN` fails.
    fn begin(&mut self) -> Result<(), DbError> {
        self.batch_execute("BEGIN")
    }

    /// Commits the open transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when `COMMIT` fails.
    fn commit(&mut self) -> Result<(), DbError> {
        self.batch_execute("COMMIT")
    }

    /// Rolls back the open transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when `ROLLBACK` fails.
    fn rollback(&mut self) -> Result<(), DbError> {
        self.batch_execute("ROLLBACK")
    }
}

// ============================================================================
// SECTION: Transaction Helpers
// ============================================================================

/// Runs `body` inside a transaction that is always rolled back.
///
/// # Errors
///
/// Returns the body's error, or the transaction error when `BEGIN` or
/// `ROLLBACK` fails after a successful body.
pub fn rolled_back<T, E, F>(session: &mut dyn SqlSession, body: F) -> Result<T, E>
where
    E: From<DbError>,
    F: FnOnce(&mut dyn SqlSession) -> Result<T, E>,
{
    session.begin()?;
    let result = body(&mut *session);
    let rollback = session.rollback();
    let value = result?;
    rollback?;
    Ok(value)
}

/// Runs `body` inside a transaction that commits on success and rolls back
/// on error. A rollback that fails is recorded on `log`; the body's error is
/// still the one returned.
///
/// # Errors
///
/// Returns the body's error or the `BEGIN`/`COMMIT` error.
pub fn committed<T, E, F>(session: &mut dyn SqlSession, log: &dyn HarnessLog, body: F) -> Result<T, E>
where
    E: From<DbError>,
    F: FnOnce(&mut dyn SqlSession) -> Result<T, E>,
{
    session.begin()?;
    match body(&mut *session) {
        Ok(value) => {
            session.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = session.rollback() {
                log.record(
                    &LogEvent::new("rollback_failed", LogLevel::Warn, rollback.message.as_str())
                        .with_field("kind", rollback.kind.as_str())
                        .with_field("code", rollback.code.clone()),
                );
            }
            Err(err)
        }
    }
}
