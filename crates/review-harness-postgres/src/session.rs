// crates/review-harness-postgres/src/session.rs
// ============================================================================
// Module: Postgres Session
// Description: SqlSession implementation over a synchronous postgres client.
// Purpose: Execute harness statements and materialize their results.
// Dependencies: postgres, review-harness-core
// ============================================================================

//! ## Overview
//! Parameterized statements use the extended protocol. They are prepared
//! first so that column names are known even for empty results. Raw probe
//! statements use the simple query protocol, which returns every value as
//! text and accepts several statements in one string.

// ============================================================================
// SECTION: Imports
// ============================================================================

use postgres::Client;
use postgres::SimpleQueryMessage;
use postgres_types::ToSql;
use review_harness_core::DbError;
use review_harness_core::Query;
use review_harness_core::RawSql;
use review_harness_core::SqlRows;
use review_harness_core::SqlSession;
use review_harness_core::SqlValue;

use crate::decode::decode_row;
use crate::error::classify_error;
use crate::params::SqlParam;

// ============================================================================
// SECTION: Session
// ============================================================================

/// A harness session backed by one Postgres connection.
pub struct PgSession {
    /// Underlying driver client.
    client: Client,
}

impl PgSession {
    /// Wraps a connected client.
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self {
            client,
        }
    }

    /// Returns the driver client.
    pub const fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }
}

impl SqlSession for PgSession {
    fn query(&mut self, query: &Query) -> Result<SqlRows, DbError> {
        let statement = self.client.prepare(query.sql()).map_err(|err| classify_error(&err))?;
        let params = SqlParam::bind_all(query.params());
        let rows = self
            .client
            .query(&statement, &param_refs(&params))
            .map_err(|err| classify_error(&err))?;
        let columns = statement.columns().iter().map(|column| column.name().to_string()).collect();
        let values = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;
        Ok(SqlRows::new(columns, values))
    }

    fn execute(&mut self, query: &Query) -> Result<u64, DbError> {
        let params = SqlParam::bind_all(query.params());
        self.client.execute(query.sql(), &param_refs(&params)).map_err(|err| classify_error(&err))
    }

    fn query_raw(&mut self, raw: &RawSql) -> Result<SqlRows, DbError> {
        let messages = self.client.simple_query(raw.sql()).map_err(|err| classify_error(&err))?;
        let mut columns = Vec::new();
        let mut rows = Vec::new();
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                if columns.is_empty() {
                    columns = row.columns().iter().map(|column| column.name().to_string()).collect();
                }
                let values = (0 .. row.len())
                    .map(|index| row.get(index).map_or(SqlValue::Null, SqlValue::from))
                    .collect();
                rows.push(values);
            }
        }
        Ok(SqlRows::new(columns, rows))
    }

    fn batch_execute(&mut self, script: &str) -> Result<(), DbError> {
        self.client.batch_execute(script).map_err(|err| classify_error(&err))
    }

    fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

/// Borrows bound parameters as driver trait objects.
fn param_refs<'a>(params: &'a [SqlParam<'a>]) -> Vec<&'a (dyn ToSql + Sync)> {
    params.iter().map(|param| param as &(dyn ToSql + Sync)).collect()
}
