// crates/review-harness-postgres/src/manager.rs
// ============================================================================
// Module: Postgres Connection Manager
// Description: Connection settings and pool wiring for Postgres sessions.
// Purpose: Open, validate, and heal pooled Postgres sessions.
// Dependencies: postgres, r2d2, r2d2_postgres, review-harness-config
// ============================================================================

//! ## Overview
//! Connection settings come from [`DatabaseConfig`]. Every session carries
//! the configured connect timeout and a server-side `statement_timeout`, so
//! a hung statement surfaces as a `57014` timeout instead of blocking a
//! check forever.

// ============================================================================
// SECTION: Imports
// ============================================================================

use postgres::NoTls;
use r2d2::ManageConnection;
use r2d2_postgres::PostgresConnectionManager;
use review_harness_config::DatabaseConfig;
use review_harness_core::ConnectionPool;
use review_harness_core::DbError;
use review_harness_core::PoolError;

use crate::error::classify_error;
use crate::session::PgSession;

/// Application name reported in `pg_stat_activity`.
pub const APPLICATION_NAME: &str = "review-harness";

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Builds driver settings from the database config.
#[must_use]
pub fn pg_config(database: &DatabaseConfig) -> postgres::Config {
    let mut config = postgres::Config::new();
    config
        .host(&database.host)
        .port(database.port)
        .dbname(&database.dbname)
        .user(&database.user)
        .application_name(APPLICATION_NAME)
        .connect_timeout(database.connect_timeout())
        .options(&format!(
            "-c statement_timeout={} -c search_path={},public",
            database.statement_timeout_ms, database.schema
        ));
    if !database.password.is_empty() {
        config.password(&database.password);
    }
    config
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Opens [`PgSession`]s for the core connection pool.
#[derive(Debug)]
pub struct PgSessionManager {
    /// Client manager doing the actual connecting.
    inner: PostgresConnectionManager<NoTls>,
}

impl PgSessionManager {
    /// Creates a manager for explicit driver settings.
    #[must_use]
    pub fn new(config: postgres::Config) -> Self {
        Self {
            inner: PostgresConnectionManager::new(config, NoTls),
        }
    }

    /// Creates a manager from the database config.
    #[must_use]
    pub fn from_database(database: &DatabaseConfig) -> Self {
        Self::new(pg_config(database))
    }
}

impl ManageConnection for PgSessionManager {
    type Connection = PgSession;
    type Error = postgres::Error;

    fn connect(&self) -> Result<PgSession, postgres::Error> {
        self.inner.connect().map(PgSession::new)
    }

    fn is_valid(&self, conn: &mut PgSession) -> Result<(), postgres::Error> {
        self.inner.is_valid(conn.client_mut())
    }

    fn has_broken(&self, conn: &mut PgSession) -> bool {
        self.inner.has_broken(conn.client_mut())
    }
}

// ============================================================================
// SECTION: Constructors
// ============================================================================

/// Opens a single session outside any pool.
///
/// # Errors
///
/// Returns a classified [`DbError`] when the connection fails.
pub fn connect(database: &DatabaseConfig) -> Result<PgSession, DbError> {
    PgSessionManager::from_database(database).connect().map_err(|err| classify_error(&err))
}

/// Opens a pool of exactly `size` sessions.
///
/// # Errors
///
/// Returns [`PoolError::Connect`] when any session fails to open.
pub fn connect_pool(
    database: &DatabaseConfig,
    size: usize,
) -> Result<ConnectionPool<PgSessionManager>, PoolError> {
    ConnectionPool::new(PgSessionManager::from_database(database), size)
}
