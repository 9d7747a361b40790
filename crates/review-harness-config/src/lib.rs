// crates/review-harness-config/src/lib.rs
// ============================================================================
// Module: Review Harness Config Library
// Description: Configuration model, environment overrides, and validation.
// Purpose: Single source of truth for review-harness.toml semantics.
// Dependencies: review-harness-core, serde, toml
// ============================================================================

//! ## Overview
//! `review-harness-config` defines the harness configuration model. Loading
//! is strict and fail-closed: oversized, non-UTF-8, or unknown-key files are
//! rejected, and validation names the first offending field.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod env;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use env::EnvOverrides;
pub use env::HarnessEnv;
