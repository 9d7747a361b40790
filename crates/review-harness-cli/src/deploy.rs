// crates/review-harness-cli/src/deploy.rs
// ============================================================================
// Module: Schema Deployment
// Description: Runs the ordered review_system SQL files against a database.
// Purpose: Stand up or refresh the schema the checks run against.
// Dependencies: review-harness-core, review-harness-config, review-harness-postgres, serde, thiserror
// ============================================================================

//! ## Overview
//! Deployment fails fast: the server is probed over TCP before connecting,
//! every SQL file must exist before the first one runs, and execution stops
//! at the first failing file. Unreachable servers produce an error carrying
//! remediation text for the operator.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io;
use std::net::TcpStream;
use std::net::ToSocketAddrs;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use review_harness_config::DatabaseConfig;
use review_harness_config::DeployConfig;
use review_harness_config::is_identifier;
use review_harness_core::DbError;
use review_harness_core::HarnessLog;
use review_harness_core::LogEvent;
use review_harness_core::LogLevel;
use review_harness_core::SqlSession;
use review_harness_postgres::connect;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Deployment failures.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The server did not accept a TCP connection.
    #[error(
        "database at {address} is unreachable ({reason}); start the PostgreSQL service, check whether \
         another process holds port {port}, or change database.port in the config"
    )]
    Unreachable {
        /// Probed `host:port`.
        address: String,
        /// Configured port.
        port: u16,
        /// Last connect error.
        reason: String,
    },
    /// A listed SQL file does not exist.
    #[error("sql file not found: {}", .0.display())]
    MissingFile(PathBuf),
    /// The schema name is not a plain identifier.
    #[error("invalid schema name: {0}")]
    InvalidSchema(String),
    /// The database connection could not be opened.
    #[error("deploy connect failed: {0}")]
    Connect(DbError),
    /// A SQL file failed to execute.
    #[error("deploy step {file} failed: {source}")]
    Step {
        /// File or step name.
        file: String,
        /// Driver error.
        source: DbError,
    },
    /// A SQL file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Read error.
        source: io::Error,
    },
}

// ============================================================================
// SECTION: Plan
// ============================================================================

/// Ordered deployment steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployPlan {
    /// Schema dropped and recreated when requested.
    pub schema: String,
    /// Whether to drop and recreate the schema first.
    pub recreate_schema: bool,
    /// SQL files in execution order.
    pub sql_files: Vec<PathBuf>,
}

impl DeployPlan {
    /// Builds a plan from config.
    #[must_use]
    pub fn from_config(database: &DatabaseConfig, deploy: &DeployConfig) -> Self {
        Self {
            schema: database.schema.clone(),
            recreate_schema: deploy.recreate_schema,
            sql_files: deploy.sql_paths(),
        }
    }

    /// Fails when any listed file is missing.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::MissingFile`] for the first missing file.
    pub fn check_files(&self) -> Result<(), DeployError> {
        match self.sql_files.iter().find(|path| !path.is_file()) {
            Some(missing) => Err(DeployError::MissingFile(missing.clone())),
            None => Ok(()),
        }
    }
}

/// One executed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployStep {
    /// File name, or `recreate_schema`.
    pub name: String,
    /// Execution time in milliseconds.
    pub duration_ms: u64,
}

/// Steps executed by a successful deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    /// Steps in execution order.
    pub steps: Vec<DeployStep>,
}

impl DeployReport {
    /// Summed step time in milliseconds.
    #[must_use]
    pub fn total_ms(&self) -> u64 {
        self.steps.iter().map(|step| step.duration_ms).sum()
    }
}

// ============================================================================
// SECTION: Preflight
// ============================================================================

/// Checks that `host:port` accepts a TCP connection within `timeout`.
///
/// # Errors
///
/// Returns [`DeployError::Unreachable`] when no resolved address connects.
pub fn preflight(host: &str, port: u16, timeout: Duration) -> Result<(), DeployError> {
    let address = format!("{host}:{port}");
    let unreachable = |reason: String| DeployError::Unreachable {
        address: address.clone(),
        port,
        reason,
    };
    let addrs = (host, port).to_socket_addrs().map_err(|err| unreachable(err.to_string()))?;
    let mut reason = "no addresses resolved".to_string();
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return Ok(()),
            Err(err) => reason = err.to_string(),
        }
    }
    Err(unreachable(reason))
}

/// Statement that drops and recreates `schema`.
///
/// # Errors
///
/// Returns [`DeployError::InvalidSchema`] unless `schema` is a plain
/// lowercase identifier.
pub fn recreate_sql(schema: &str) -> Result<String, DeployError> {
    if !is_identifier(schema) {
        return Err(DeployError::InvalidSchema(schema.to_string()));
    }
    Ok(format!("DROP SCHEMA IF EXISTS {schema} CASCADE;\nCREATE SCHEMA {schema};"))
}

// ============================================================================
// SECTION: Execution
// ============================================================================

/// Runs `plan` through `session`, stopping at the first failure.
///
/// # Errors
///
/// Returns [`DeployError`] when a file is missing or unreadable, the schema
/// name is invalid, or a step fails.
pub fn execute_plan(
    session: &mut dyn SqlSession,
    plan: &DeployPlan,
    log: &dyn HarnessLog,
) -> Result<DeployReport, DeployError> {
    plan.check_files()?;
    let mut report = DeployReport::default();
    if plan.recreate_schema {
        let sql = recreate_sql(&plan.schema)?;
        report.steps.push(run_step(session, "recreate_schema", &sql, log)?);
    }
    for path in &plan.sql_files {
        let sql = fs::read_to_string(path).map_err(|source| DeployError::Io {
            path: path.clone(),
            source,
        })?;
        report.steps.push(run_step(session, &step_name(path), &sql, log)?);
    }
    log.record(
        &LogEvent::new("deploy_complete", LogLevel::Info, "deployment complete")
            .with_field("steps", report.steps.len())
            .with_field("duration_ms", report.total_ms()),
    );
    Ok(report)
}

/// Executes one script and logs its outcome.
fn run_step(
    session: &mut dyn SqlSession,
    name: &str,
    sql: &str,
    log: &dyn HarnessLog,
) -> Result<DeployStep, DeployError> {
    let started = Instant::now();
    let result = session.batch_execute(sql);
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match result {
        Ok(()) => {
            log.record(
                &LogEvent::new("deploy_step", LogLevel::Info, format!("executed {name}"))
                    .with_field("step", name)
                    .with_field("duration_ms", duration_ms),
            );
            Ok(DeployStep {
                name: name.to_string(),
                duration_ms,
            })
        }
        Err(source) => {
            log.record(
                &LogEvent::new("deploy_step_failed", LogLevel::Error, source.to_string())
                    .with_field("step", name)
                    .with_field("duration_ms", duration_ms),
            );
            Err(DeployError::Step {
                file: name.to_string(),
                source,
            })
        }
    }
}

/// File name used in step labels.
fn step_name(path: &Path) -> String {
    path.file_name().map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

/// Probes the server, connects, and runs `plan`.
///
/// # Errors
///
/// Returns [`DeployError`] from the preflight probe, the connect, or
/// [`execute_plan`].
pub fn run_deploy(
    plan: &DeployPlan,
    database: &DatabaseConfig,
    log: &dyn HarnessLog,
) -> Result<DeployReport, DeployError> {
    preflight(&database.host, database.port, database.connect_timeout())?;
    plan.check_files()?;
    let mut session = connect(database).map_err(DeployError::Connect)?;
    execute_plan(&mut session, plan, log)
}
