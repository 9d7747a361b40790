// crates/review-harness-config/src/config.rs
// ============================================================================
// Module: Review Harness Configuration
// Description: Configuration loading and validation for the review harness.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: review-harness-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from `review-harness.toml` with a size limit and a
//! UTF-8 requirement, overlaid with environment overrides, then validated.
//! Every section is optional and falls back to defaults; unknown keys are
//! rejected. An explicitly named config file must exist; a missing default
//! file yields the built-in defaults.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use review_harness_core::RetryPolicy;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::env::EnvOverrides;
use crate::env::HarnessEnv;
use crate::env::read_env_strict;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "review-harness.toml";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum pool size.
pub const MAX_POOL_SIZE: usize = 64;
/// Maximum retry attempts.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;
/// Maximum worker threads for stress workloads.
pub const MAX_STRESS_WORKERS: usize = 64;
/// Maximum PostgreSQL identifier length.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Complete harness configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Connection settings.
    pub database: DatabaseConfig,
    /// Connection pool settings.
    pub pool: PoolConfig,
    /// Retry settings.
    pub retry: RetryConfig,
    /// Report and log output settings.
    pub output: OutputConfig,
    /// Performance thresholds.
    pub thresholds: ThresholdConfig,
    /// Stress and adverse workload settings.
    pub stress: StressConfig,
    /// Backup check settings.
    pub backup: BackupConfig,
    /// Partition check settings.
    pub partition: PartitionConfig,
    /// Realtime monitor settings.
    pub monitor: MonitorConfig,
    /// Schema deployment settings.
    pub deploy: DeployConfig,
}

impl HarnessConfig {
    /// Loads configuration using the default resolution rules and the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading, overriding, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let overrides = EnvOverrides::from_env()?;
        Self::load_with(path, &overrides)
    }

    /// Loads configuration with explicit environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load_with(path: Option<&Path>, overrides: &EnvOverrides) -> Result<Self, ConfigError> {
        let mut config = match resolve_path(path)? {
            ConfigSource::Named(path) => Self::from_file(&path)?,
            ConfigSource::Default(path) => {
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a config file without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file is unreadable, oversized, not
    /// UTF-8, or not valid TOML for this model.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if path.to_string_lossy().len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        let bytes = fs::read(path).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml_str(content)
    }

    /// Parses TOML text without validating it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the text does not match the model.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies environment overrides.
    pub fn apply_overrides(&mut self, overrides: &EnvOverrides) {
        if let Some(dir) = &overrides.result_dir {
            self.output.result_dir.clone_from(dir);
        }
        if let Some(host) = &overrides.db_host {
            self.database.host.clone_from(host);
        }
        if let Some(port) = overrides.db_port {
            self.database.port = port;
        }
        if let Some(name) = &overrides.db_name {
            self.database.dbname.clone_from(name);
        }
        if let Some(user) = &overrides.db_user {
            self.database.user.clone_from(user);
        }
        if let Some(password) = &overrides.db_password {
            self.database.password.clone_from(password);
        }
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.pool.validate()?;
        self.retry.validate()?;
        self.output.validate()?;
        self.thresholds.validate()?;
        self.stress.validate()?;
        self.backup.validate()?;
        self.partition.validate()?;
        self.monitor.validate()?;
        self.deploy.validate()?;
        Ok(())
    }

    /// Serializes the configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|err| ConfigError::Parse(err.to_string()))
    }
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// Connection settings for the `review_system` database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Database name.
    pub dbname: String,
    /// Login role.
    pub user: String,
    /// Login password; may be empty for trust authentication.
    pub password: String,
    /// Schema holding the review tables.
    pub schema: String,
    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Server-side statement timeout in milliseconds.
    pub statement_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "review_system".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            schema: "review_system".to_string(),
            connect_timeout_ms: 5_000,
            statement_timeout_ms: 30_000,
        }
    }
}

impl DatabaseConfig {
    /// Returns the connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Returns the statement timeout.
    #[must_use]
    pub const fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    /// Returns `host:port` for display and TCP probes.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validates connection settings.
    fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("database.host", &self.host)?;
        require_non_empty("database.dbname", &self.dbname)?;
        require_non_empty("database.user", &self.user)?;
        if self.port == 0 {
            return Err(ConfigError::Invalid("database.port must be non-zero".to_string()));
        }
        validate_identifier("database.schema", &self.schema)?;
        require_positive("database.connect_timeout_ms", self.connect_timeout_ms)?;
        require_positive("database.statement_timeout_ms", self.statement_timeout_ms)
    }
}

/// Connection pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Number of connections opened at startup.
    pub size: usize,
    /// Maximum wait for a connection in milliseconds.
    pub acquire_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 10,
            acquire_timeout_ms: 30_000,
        }
    }
}

impl PoolConfig {
    /// Returns the acquire timeout.
    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Validates pool settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(1 ..= MAX_POOL_SIZE).contains(&self.size) {
            return Err(ConfigError::Invalid(format!("pool.size must be in 1..={MAX_POOL_SIZE}")));
        }
        require_positive("pool.acquire_timeout_ms", self.acquire_timeout_ms)
    }
}

/// Retry settings for transient driver errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Attempts including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            delay_ms: u64::try_from(policy.delay.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl RetryConfig {
    /// Converts to the runtime retry policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.delay_ms))
    }

    /// Validates retry settings.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(1 ..= MAX_RETRY_ATTEMPTS).contains(&self.max_attempts) {
            return Err(ConfigError::Invalid(format!(
                "retry.max_attempts must be in 1..={MAX_RETRY_ATTEMPTS}"
            )));
        }
        Ok(())
    }
}

/// Report, log, and sample output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Directory for JSON/HTML reports and CSV samples.
    pub result_dir: PathBuf,
    /// Directory for JSON-lines log files; unset logs to stderr only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    /// Number of log files kept per prefix.
    pub log_keep: usize,
    /// Tables sampled to CSV when sampling is requested.
    pub sample_tables: Vec<String>,
    /// Rows per table sample.
    pub sample_limit: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            result_dir: PathBuf::from("test_results"),
            log_dir: None,
            log_keep: 10,
            sample_tables: vec!["reviews_partitioned".to_string()],
            sample_limit: 100,
        }
    }
}

impl OutputConfig {
    /// Validates output settings.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("output.result_dir", &self.result_dir.to_string_lossy())?;
        if let Some(dir) = &self.log_dir {
            validate_path_string("output.log_dir", &dir.to_string_lossy())?;
        }
        if self.log_keep == 0 {
            return Err(ConfigError::Invalid("output.log_keep must be at least 1".to_string()));
        }
        for table in &self.sample_tables {
            validate_identifier("output.sample_tables", table)?;
        }
        require_positive("output.sample_limit", u64::from(self.sample_limit))
    }
}

/// Query latency thresholds in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThresholdConfig {
    /// Recent reviews by product.
    pub recent_reviews_ms: u64,
    /// Rating aggregation.
    pub rating_aggregation_ms: u64,
    /// Summary table lookup.
    pub summary_lookup_ms: u64,
    /// Partition-pruned date range scan.
    pub date_range_ms: u64,
    /// Maximum partitions the date range plan may touch.
    pub max_partitions_scanned: usize,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            recent_reviews_ms: 100,
            rating_aggregation_ms: 500,
            summary_lookup_ms: 50,
            date_range_ms: 200,
            max_partitions_scanned: 3,
        }
    }
}

impl ThresholdConfig {
    /// Validates thresholds.
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("thresholds.recent_reviews_ms", self.recent_reviews_ms)?;
        require_positive("thresholds.rating_aggregation_ms", self.rating_aggregation_ms)?;
        require_positive("thresholds.summary_lookup_ms", self.summary_lookup_ms)?;
        require_positive("thresholds.date_range_ms", self.date_range_ms)?;
        if self.max_partitions_scanned == 0 {
            return Err(ConfigError::Invalid(
                "thresholds.max_partitions_scanned must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Stress, concurrency, and adverse battery settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StressConfig {
    /// Rows inserted by the bulk insert check.
    pub bulk_rows: u32,
    /// Rows per bulk insert statement.
    pub bulk_batch: u32,
    /// Bulk insert time limit in milliseconds.
    pub bulk_max_ms: u64,
    /// Worker threads for parallel workloads.
    pub workers: usize,
    /// Tasks submitted by the parallel workload.
    pub operations: usize,
    /// Highest acceptable task error rate.
    pub max_error_rate: f64,
    /// Time limit for the adverse battery in seconds.
    pub adverse_timeout_secs: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            bulk_rows: 1_000,
            bulk_batch: 100,
            bulk_max_ms: 10_000,
            workers: 10,
            operations: 100,
            max_error_rate: 0.05,
            adverse_timeout_secs: 300,
        }
    }
}

impl StressConfig {
    /// Returns the adverse battery timeout.
    #[must_use]
    pub const fn adverse_timeout(&self) -> Duration {
        Duration::from_secs(self.adverse_timeout_secs)
    }

    /// Validates stress settings.
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("stress.bulk_rows", u64::from(self.bulk_rows))?;
        require_positive("stress.bulk_batch", u64::from(self.bulk_batch))?;
        require_positive("stress.bulk_max_ms", self.bulk_max_ms)?;
        if !(1 ..= MAX_STRESS_WORKERS).contains(&self.workers) {
            return Err(ConfigError::Invalid(format!(
                "stress.workers must be in 1..={MAX_STRESS_WORKERS}"
            )));
        }
        if self.operations == 0 {
            return Err(ConfigError::Invalid("stress.operations must be at least 1".to_string()));
        }
        require_ratio("stress.max_error_rate", self.max_error_rate)?;
        require_positive("stress.adverse_timeout_secs", self.adverse_timeout_secs)
    }
}

/// Backup check settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackupConfig {
    /// Oldest acceptable latest backup, in hours.
    pub max_age_hours: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            max_age_hours: 24,
        }
    }
}

impl BackupConfig {
    /// Validates backup settings.
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("backup.max_age_hours", self.max_age_hours)
    }
}

/// Partition check settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartitionConfig {
    /// Months of future partitions to create.
    pub future_months: u32,
    /// Minimum child partitions expected.
    pub min_partitions: u32,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            future_months: 3,
            min_partitions: 1,
        }
    }
}

impl PartitionConfig {
    /// Validates partition settings.
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("partition.future_months", u64::from(self.future_months))
    }
}

/// Realtime monitor settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Number of polls; zero polls until interrupted.
    pub iterations: u32,
    /// Delay between polls in milliseconds.
    pub interval_ms: u64,
    /// Queries running longer than this are reported, in seconds.
    pub slow_query_secs: u64,
    /// Alert when dead tuples exceed this share of live plus dead.
    pub dead_tuple_ratio_alert: f64,
    /// Alert when the cache hit ratio falls below this value.
    pub cache_hit_alert: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            interval_ms: 5_000,
            slow_query_secs: 5,
            dead_tuple_ratio_alert: 0.2,
            cache_hit_alert: 0.9,
        }
    }
}

impl MonitorConfig {
    /// Returns the poll interval.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Validates monitor settings.
    fn validate(&self) -> Result<(), ConfigError> {
        require_positive("monitor.interval_ms", self.interval_ms)?;
        require_positive("monitor.slow_query_secs", self.slow_query_secs)?;
        require_ratio("monitor.dead_tuple_ratio_alert", self.dead_tuple_ratio_alert)?;
        require_ratio("monitor.cache_hit_alert", self.cache_hit_alert)
    }
}

/// Schema deployment settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    /// Directory holding the SQL files.
    pub sql_dir: PathBuf,
    /// SQL files executed in order.
    pub sql_files: Vec<String>,
    /// Drop and recreate the schema before running the files.
    pub recreate_schema: bool,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            sql_dir: PathBuf::from("sql"),
            sql_files: [
                "schema.sql",
                "partitions.sql",
                "functions.sql",
                "triggers.sql",
                "security.sql",
                "backup.sql",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            recreate_schema: false,
        }
    }
}

impl DeployConfig {
    /// Returns the SQL file paths in execution order.
    #[must_use]
    pub fn sql_paths(&self) -> Vec<PathBuf> {
        self.sql_files.iter().map(|file| self.sql_dir.join(file)).collect()
    }

    /// Validates deployment settings.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("deploy.sql_dir", &self.sql_dir.to_string_lossy())?;
        if self.sql_files.is_empty() {
            return Err(ConfigError::Invalid("deploy.sql_files must not be empty".to_string()));
        }
        for file in &self.sql_files {
            let plain = Path::new(file).file_name().is_some_and(|name| name == file.as_str());
            if !plain || !file.ends_with(".sql") {
                return Err(ConfigError::Invalid(format!(
                    "deploy.sql_files entry {file} must be a plain .sql file name"
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Where the config is read from.
enum ConfigSource {
    /// Path given explicitly or through the environment; must exist.
    Named(PathBuf),
    /// Default file name; optional.
    Default(PathBuf),
}

/// Resolves the config path: argument, then environment, then default.
fn resolve_path(path: Option<&Path>) -> Result<ConfigSource, ConfigError> {
    if let Some(path) = path {
        return Ok(ConfigSource::Named(path.to_path_buf()));
    }
    if let Some(env_path) = read_env_strict(HarnessEnv::ConfigPath.as_str())?
        && !env_path.trim().is_empty()
    {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(ConfigSource::Named(PathBuf::from(env_path)));
    }
    Ok(ConfigSource::Default(PathBuf::from(DEFAULT_CONFIG_NAME)))
}

/// Returns true when `value` is a plain SQL identifier.
#[must_use]
pub fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    value.len() <= MAX_IDENTIFIER_LENGTH
        && (first.is_ascii_lowercase() || first == '_')
        && chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
}

/// Validates a plain SQL identifier.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] when `value` is not a plain identifier.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    if is_identifier(value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{field} must be a lowercase identifier ([a-z_][a-z0-9_]*, at most \
             {MAX_IDENTIFIER_LENGTH} chars)"
        )))
    }
}

/// Rejects empty or whitespace-only strings.
fn require_non_empty(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    Ok(())
}

/// Rejects zero.
fn require_positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid(format!("{field} must be greater than zero")));
    }
    Ok(())
}

/// Requires a finite value within `0..=1`.
fn require_ratio(field: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0 ..= 1.0).contains(&value) {
        return Err(ConfigError::Invalid(format!("{field} must be within 0..=1")));
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    Ok(())
}
