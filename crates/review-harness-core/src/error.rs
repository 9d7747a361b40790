// crates/review-harness-core/src/error.rs
// ============================================================================
// Module: Check Errors
// Description: Error type returned by checks and captured by the runner.
// Purpose: Distinguish retryable driver errors from logic failures.
// Dependencies: serde_json, thiserror
// ============================================================================

//! ## Overview
//! [`CheckError`] is the error half of every check's return value. Only the
//! [`CheckError::Database`] variant is retryable; everything else fails the
//! check on the first occurrence.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::pool::PoolError;
use crate::retry::Retryable;
use crate::session::DbError;

// ============================================================================
// SECTION: Error Type
// ============================================================================

/// Errors raised by checks.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Database driver or server error.
    #[error(transparent)]
    Database(#[from] DbError),
    /// Connection pool error.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// A check invariant did not hold.
    #[error("assertion failed: {0}")]
    Assertion(String),
    /// A bounded operation ran out of time.
    #[error("timed out: {0}")]
    Timeout(String),
    /// File output failure.
    #[error("io error: {0}")]
    Io(String),
}

impl CheckError {
    /// Creates an assertion failure.
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion(message.into())
    }

    /// Returns a stable label for the error variant.
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::Pool(_) => "pool",
            Self::Assertion(_) => "assertion",
            Self::Timeout(_) => "timeout",
            Self::Io(_) => "io",
        }
    }

    /// Returns the database error when this is one.
    #[must_use]
    pub const fn as_db(&self) -> Option<&DbError> {
        match self {
            Self::Database(err) => Some(err),
            _ => None,
        }
    }

    /// Builds the report payload describing this error.
    #[must_use]
    pub fn details(&self) -> Value {
        let mut sources = Vec::new();
        let mut current = std::error::Error::source(self);
        while let Some(source) = current {
            sources.push(source.to_string());
            current = source.source();
        }
        match self {
            Self::Database(err) => json!({
                "error_type": self.kind_label(),
                "message": self.to_string(),
                "db_kind": err.kind.as_str(),
                "sqlstate": err.code,
                "sources": sources,
            }),
            _ => json!({
                "error_type": self.kind_label(),
                "message": self.to_string(),
                "sources": sources,
            }),
        }
    }
}

impl From<std::io::Error> for CheckError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl Retryable for CheckError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}
