// crates/review-harness-config/src/env.rs
// ============================================================================
// Module: Environment Overrides
// Description: Strict readers for harness environment variables.
// Purpose: Overlay connection and output settings onto the file config.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Environment values must be valid UTF-8 and non-empty when set. Overrides
//! are captured into [`EnvOverrides`] once so that loading can be exercised
//! without mutating the process environment.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;

use crate::config::ConfigError;

// ============================================================================
// SECTION: Variables
// ============================================================================

/// Environment variables recognised by the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HarnessEnv {
    /// Config file path override.
    ConfigPath,
    /// Report output directory.
    ResultDir,
    /// Database host.
    DbHost,
    /// Database port.
    DbPort,
    /// Database name.
    DbName,
    /// Database user.
    DbUser,
    /// Database password.
    DbPassword,
}

impl HarnessEnv {
    /// Returns the canonical environment variable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigPath => "REVIEW_HARNESS_CONFIG",
            Self::ResultDir => "TEST_RESULT_DIR",
            Self::DbHost => "REVIEW_DB_HOST",
            Self::DbPort => "REVIEW_DB_PORT",
            Self::DbName => "REVIEW_DB_NAME",
            Self::DbUser => "REVIEW_DB_USER",
            Self::DbPassword => "REVIEW_DB_PASSWORD",
        }
    }
}

// ============================================================================
// SECTION: Overrides
// ============================================================================

/// Environment values applied on top of the file config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    /// `TEST_RESULT_DIR`.
    pub result_dir: Option<PathBuf>,
    /// `REVIEW_DB_HOST`.
    pub db_host: Option<String>,
    /// `REVIEW_DB_PORT`.
    pub db_port: Option<u16>,
    /// `REVIEW_DB_NAME`.
    pub db_name: Option<String>,
    /// `REVIEW_DB_USER`.
    pub db_user: Option<String>,
    /// `REVIEW_DB_PASSWORD`.
    pub db_password: Option<String>,
}

impl EnvOverrides {
    /// Reads overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a variable is not UTF-8, is
    /// empty, or (for the port) is not a non-zero integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_port = read_env_nonempty(HarnessEnv::DbPort.as_str())?
            .map(|raw| parse_port(HarnessEnv::DbPort.as_str(), &raw))
            .transpose()?;
        Ok(Self {
            result_dir: read_env_nonempty(HarnessEnv::ResultDir.as_str())?.map(PathBuf::from),
            db_host: read_env_nonempty(HarnessEnv::DbHost.as_str())?,
            db_port,
            db_name: read_env_nonempty(HarnessEnv::DbName.as_str())?,
            db_user: read_env_nonempty(HarnessEnv::DbUser.as_str())?,
            db_password: read_env_nonempty(HarnessEnv::DbPassword.as_str())?,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads an environment variable and enforces UTF-8 validity.
///
/// # Errors
///
/// Returns an error when the environment variable contains invalid UTF-8.
pub fn read_env_strict(name: &str) -> Result<Option<String>, ConfigError> {
    std::env::var_os(name).map_or(Ok(None), |raw| {
        raw.into_string()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(format!("{name} must be valid UTF-8")))
    })
}

/// Reads an environment variable and rejects empty values.
fn read_env_nonempty(name: &str) -> Result<Option<String>, ConfigError> {
    match read_env_strict(name)? {
        Some(value) if value.trim().is_empty() => {
            Err(ConfigError::Invalid(format!("{name} must not be empty")))
        }
        Some(value) => Ok(Some(value)),
        None => Ok(None),
    }
}

/// Parses a non-zero TCP port.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when the value is not in `1..=65535`.
pub fn parse_port(name: &str, raw: &str) -> Result<u16, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(0) | Err(_) => Err(ConfigError::Invalid(format!("{name} must be a port in 1..=65535"))),
        Ok(port) => Ok(port),
    }
}
