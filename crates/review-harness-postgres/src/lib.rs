// crates/review-harness-postgres/src/lib.rs
// ============================================================================
// Module: Review Harness Postgres Library
// Description: PostgreSQL driver binding for the review harness.
// Purpose: Back the core session interface with real Postgres connections.
// Dependencies: postgres, postgres-types, r2d2_postgres, review-harness-core
// ============================================================================

//! ## Overview
//! This crate adapts the synchronous `postgres` client to the harness
//! [`review_harness_core::SqlSession`] interface. It provides:
//! - [`PgSession`]: a session over one `postgres::Client`.
//! - [`PgSessionManager`]: an [`r2d2::ManageConnection`] that the core
//!   [`review_harness_core::ConnectionPool`] uses to open and heal slots.
//! - [`classify_error`]: SQLSTATE-based mapping onto
//!   [`review_harness_core::DbErrorKind`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod decode;
pub mod error;
pub mod manager;
pub mod params;
pub mod session;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use error::classify_error;
pub use manager::APPLICATION_NAME;
pub use manager::PgSessionManager;
pub use manager::connect;
pub use manager::connect_pool;
pub use manager::pg_config;
pub use params::SqlParam;
pub use session::PgSession;
