// crates/review-harness-postgres/src/error.rs
// ============================================================================
// Module: Postgres Error Classification
// Description: Maps driver errors onto the harness database error model.
// Purpose: Let checks match on error kinds instead of driver internals.
// Dependencies: postgres, review-harness-core
// ============================================================================

use std::error::Error as _;

use review_harness_core::DbError;
use review_harness_core::DbErrorKind;

/// Converts a driver error into a classified [`DbError`].
///
/// Server errors are classified by SQLSTATE. A closed client or a socket
/// failure maps to [`DbErrorKind::Connection`]; anything else (parameter or
/// column conversion, protocol errors) maps to [`DbErrorKind::Other`].
#[must_use]
pub fn classify_error(err: &postgres::Error) -> DbError {
    if let Some(db) = err.as_db_error() {
        return DbError::from_sqlstate(db.code().code(), db.message());
    }
    let io_failure = err.source().is_some_and(|source| source.is::<std::io::Error>());
    let kind = if err.is_closed() || io_failure { DbErrorKind::Connection } else { DbErrorKind::Other };
    DbError::new(kind, err.to_string())
}
