// crates/review-harness-postgres/tests/settings.rs
// ============================================================================
// Module: Postgres Settings Tests
// Description: Driver settings and connection failure classification.
// ============================================================================

//! Postgres connection settings tests.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::time::Duration;

use postgres::config::Host;
use review_harness_config::DatabaseConfig;
use review_harness_core::DbErrorKind;
use review_harness_core::PoolError;
use review_harness_postgres::APPLICATION_NAME;
use review_harness_postgres::connect;
use review_harness_postgres::connect_pool;
use review_harness_postgres::pg_config;

fn unreachable_database() -> DatabaseConfig {
    DatabaseConfig {
        host: "127.0.0.1".to_string(),
        port: 1,
        connect_timeout_ms: 1_000,
        ..DatabaseConfig::default()
    }
}

#[test]
fn settings_carry_database_config() {
    let database = DatabaseConfig {
        host: "db.internal".to_string(),
        port: 6432,
        password: "secret".to_string(),
        statement_timeout_ms: 15_000,
        ..DatabaseConfig::default()
    };
    let config = pg_config(&database);
    assert_eq!(config.get_hosts(), &[Host::Tcp("db.internal".to_string())]);
    assert_eq!(config.get_ports(), &[6432]);
    assert_eq!(config.get_dbname(), Some("review_system"));
    assert_eq!(config.get_user(), Some("postgres"));
    assert_eq!(config.get_password(), Some(b"secret".as_slice()));
    assert_eq!(config.get_application_name(), Some(APPLICATION_NAME));
    assert_eq!(config.get_connect_timeout(), Some(&Duration::from_millis(5_000)));
    let options = config.get_options().unwrap();
    assert!(options.contains("statement_timeout=15000"));
    assert!(options.contains("search_path=review_system,public"));
}

#[test]
fn empty_password_is_not_sent() {
    let config = pg_config(&DatabaseConfig::default());
    assert_eq!(config.get_password(), None);
}

#[test]
fn unreachable_server_is_a_connection_error() {
    let Err(err) = connect(&unreachable_database()) else {
        panic!("connecting to port 1 should fail");
    };
    assert_eq!(err.kind, DbErrorKind::Connection);
    assert!(err.code.is_none());
}

#[test]
fn pool_construction_fails_fast() {
    match connect_pool(&unreachable_database(), 2) {
        Err(PoolError::Connect(message)) => assert!(!message.is_empty()),
        Err(other) => panic!("unexpected pool error {other}"),
        Ok(_) => panic!("pool should not open against port 1"),
    }
}
