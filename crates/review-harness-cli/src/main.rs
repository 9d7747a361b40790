// crates/review-harness-cli/src/main.rs
// ============================================================================
// Module: Review Harness CLI Entry Point
// Description: Command dispatcher for test runs, monitoring, and deployment.
// Purpose: Wire config, logging, and the connection pool into each workflow.
// Dependencies: clap, review-harness-checks, review-harness-config, review-harness-core, thiserror
// ============================================================================

//! ## Overview
//! `review-harness run` executes the check catalog against the
//! `review_system` schema and writes JSON and HTML reports. `monitor` polls
//! the statistics views, `deploy` runs the schema SQL files, and
//! `config validate` checks a config file without touching the database.
//! The log sink is built once per process and flushed before exit.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use review_harness_checks::default_catalog;
use review_harness_checks::filter_catalog;
use review_harness_checks::run_catalog;
use review_harness_checks::sample_tables;
use review_harness_cli::DeployPlan;
use review_harness_cli::Monitor;
use review_harness_cli::deploy::run_deploy;
use review_harness_cli::monitor::write_snapshot;
use review_harness_config::HarnessConfig;
use review_harness_config::OutputConfig;
use review_harness_core::Category;
use review_harness_core::FanoutLogSink;
use review_harness_core::FileLogSink;
use review_harness_core::HarnessLog;
use review_harness_core::LogEvent;
use review_harness_core::LogLevel;
use review_harness_core::Query;
use review_harness_core::Report;
use review_harness_core::SessionSource;
use review_harness_core::StderrLogSink;
use review_harness_core::TestRunner;
use review_harness_core::ThreadSleeper;
use review_harness_core::write_reports;
use review_harness_postgres::connect_pool;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Prefix of the JSON-lines log files.
const LOG_PREFIX: &str = "review_harness";

/// Counts schemas with the configured name.
const SCHEMA_PROBE_SQL: &str =
    "SELECT COUNT(*)::int8 AS schemas FROM information_schema.schemata WHERE schema_name = $1";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Review harness command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "review-harness",
    version,
    about = "Validation harness for the review_system PostgreSQL schema",
    disable_help_subcommand = true
)]
struct Cli {
    /// Config file; defaults to `REVIEW_HARNESS_CONFIG`, then `review-harness.toml`.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Command to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the check catalog and write reports.
    Run(RunCommand),
    /// Poll database statistics and print a dashboard.
    Monitor(MonitorCommand),
    /// Execute the schema SQL files in order.
    Deploy(DeployCommand),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Arguments for `run`.
#[derive(Args, Debug)]
struct RunCommand {
    /// Only run these categories; repeat to select several.
    #[arg(long = "category", value_name = "CATEGORY")]
    categories: Vec<Category>,
    /// Report directory; overrides `TEST_RESULT_DIR` and `output.result_dir`.
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,
    /// Write CSV samples of the configured tables.
    #[arg(long)]
    sample_rows: bool,
}

/// Arguments for `monitor`.
#[derive(Args, Debug)]
struct MonitorCommand {
    /// Number of polls; zero polls until interrupted.
    #[arg(long, value_name = "N")]
    iterations: Option<u32>,
    /// Delay between polls in milliseconds.
    #[arg(long, value_name = "MS", value_parser = clap::value_parser!(u64).range(1 ..))]
    interval_ms: Option<u64>,
    /// Write the last snapshot as JSON to this path.
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,
}

/// Arguments for `deploy`.
#[derive(Args, Debug)]
struct DeployCommand {
    /// Drop and recreate the schema before running the files.
    #[arg(long)]
    recreate_schema: bool,
    /// Directory holding the SQL files; overrides `deploy.sql_dir`.
    #[arg(long, value_name = "DIR")]
    sql_dir: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate the config, then print `config ok`.
    Validate,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for user-facing failures.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// Result alias for CLI operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let config = HarnessConfig::load(cli.config.as_deref())
        .map_err(|err| CliError::new(format!("failed to load config: {err}")))?;
    if matches!(
        cli.command,
        Commands::Config {
            command: ConfigCommand::Validate
        }
    ) {
        return command_config_validate();
    }
    let log = build_log(&config.output)?;
    let outcome = match &cli.command {
        Commands::Run(command) => command_run(&config, &log, command),
        Commands::Monitor(command) => command_monitor(&config, &log, command),
        Commands::Deploy(command) => command_deploy(&config, &log, command),
        Commands::Config {
            ..
        } => command_config_validate(),
    };
    if let Err(err) = &outcome {
        log.error("command_failed", &err.to_string());
    }
    log.flush();
    outcome
}

/// Builds the process-wide log sink.
fn build_log(output: &OutputConfig) -> CliResult<Arc<dyn HarnessLog>> {
    let stderr: Arc<dyn HarnessLog> = Arc::new(StderrLogSink);
    let Some(dir) = &output.log_dir else {
        return Ok(stderr);
    };
    let file = FileLogSink::timestamped(dir, LOG_PREFIX, output.log_keep).map_err(|err| {
        CliError::new(format!("failed to open log file in {}: {err}", dir.display()))
    })?;
    Ok(Arc::new(FanoutLogSink::new(vec![stderr, Arc::new(file)])))
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Runs the check catalog.
fn command_run(
    config: &HarnessConfig,
    log: &Arc<dyn HarnessLog>,
    command: &RunCommand,
) -> CliResult<ExitCode> {
    let output_dir = resolve_output_dir(command.output_dir.as_ref(), &config.output);
    fs::create_dir_all(&output_dir).map_err(|err| {
        CliError::new(format!("failed to create output directory {}: {err}", output_dir.display()))
    })?;
    let pool = connect_pool(&config.database, config.pool.size).map_err(|err| {
        CliError::new(format!("failed to connect to {}: {err}", config.database.address()))
    })?;
    probe_schema(&pool, config)?;
    log.record(
        &LogEvent::new("run_started", LogLevel::Info, "test run started")
            .with_field("pool_size", config.pool.size)
            .with_field("output_dir", output_dir.display().to_string()),
    );

    let sessions: Arc<dyn SessionSource> = Arc::new(pool.clone());
    let mut runner = TestRunner::new(sessions, Arc::clone(log))
        .with_retry(config.retry.policy(), Arc::new(ThreadSleeper));
    let catalog = filter_catalog(default_catalog(config), &command.categories);
    run_catalog(&mut runner, &catalog);
    write_stdout_line(&runner.summary_line())
        .map_err(|err| CliError::new(format!("failed to write summary: {err}")))?;

    match Report::generate(runner.results()) {
        Ok(report) => {
            for path in write_reports(&report, &output_dir, log.as_ref()) {
                log.info("report_path", &path.display().to_string());
            }
        }
        Err(err) => log.error("report_failed", &err.to_string()),
    }
    if command.sample_rows {
        match pool.acquire_timeout(config.pool.acquire_timeout()) {
            Ok(mut session) => {
                sample_tables(
                    &mut *session,
                    &config.output.sample_tables,
                    config.output.sample_limit,
                    &output_dir,
                    log.as_ref(),
                );
            }
            Err(err) => log.error("sample_lease_failed", &err.to_string()),
        }
    }
    pool.close();
    Ok(if runner.all_passed() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Report directory: the flag, else the config value (which already carries
/// any `TEST_RESULT_DIR` override).
fn resolve_output_dir(flag: Option<&PathBuf>, output: &OutputConfig) -> PathBuf {
    flag.cloned().unwrap_or_else(|| output.result_dir.clone())
}

/// Fails unless the configured schema exists.
fn probe_schema(sessions: &dyn SessionSource, config: &HarnessConfig) -> CliResult<()> {
    let schema = config.database.schema.as_str();
    let mut session = sessions
        .lease_timeout(config.pool.acquire_timeout())
        .map_err(|err| CliError::new(format!("schema probe could not lease a session: {err}")))?;
    let rows = session
        .query(&Query::new(SCHEMA_PROBE_SQL).bind(schema))
        .map_err(|err| CliError::new(format!("schema probe failed: {err}")))?;
    if rows.scalar_i64().unwrap_or(0) == 0 {
        return Err(CliError::new(format!(
            "schema {schema} not found in database {}; run `review-harness deploy` first",
            config.database.dbname
        )));
    }
    Ok(())
}

/// Runs the realtime monitor.
fn command_monitor(
    config: &HarnessConfig,
    log: &Arc<dyn HarnessLog>,
    command: &MonitorCommand,
) -> CliResult<ExitCode> {
    let mut monitor_config = config.monitor;
    if let Some(iterations) = command.iterations {
        monitor_config.iterations = iterations;
    }
    if let Some(interval_ms) = command.interval_ms {
        monitor_config.interval_ms = interval_ms;
    }
    let pool = connect_pool(&config.database, 1).map_err(|err| {
        CliError::new(format!("failed to connect to {}: {err}", config.database.address()))
    })?;
    let sleeper = ThreadSleeper;
    let monitor = Monitor {
        sessions: &pool,
        config: monitor_config,
        schema: &config.database.schema,
        retry: config.retry.policy(),
        acquire_timeout: config.pool.acquire_timeout(),
        sleeper: &sleeper,
        log: log.as_ref(),
    };
    let mut stdout = std::io::stdout();
    let last = monitor.run(&mut stdout).map_err(|err| CliError::new(err.to_string()))?;
    pool.close();
    let Some(snapshot) = last else {
        return Err(CliError::new("monitor completed without a successful poll".to_string()));
    };
    if let Some(path) = &command.snapshot {
        write_snapshot(&snapshot, path).map_err(|err| CliError::new(err.to_string()))?;
        write_stdout_line(&format!("snapshot written to {}", path.display()))
            .map_err(|err| CliError::new(format!("failed to write stdout: {err}")))?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Deploys the schema SQL files.
fn command_deploy(
    config: &HarnessConfig,
    log: &Arc<dyn HarnessLog>,
    command: &DeployCommand,
) -> CliResult<ExitCode> {
    let mut deploy = config.deploy.clone();
    deploy.recreate_schema |= command.recreate_schema;
    if let Some(sql_dir) = &command.sql_dir {
        deploy.sql_dir.clone_from(sql_dir);
    }
    let plan = DeployPlan::from_config(&config.database, &deploy);
    let report =
        run_deploy(&plan, &config.database, log.as_ref()).map_err(|err| CliError::new(err.to_string()))?;
    let mut lines: Vec<String> =
        report.steps.iter().map(|step| format!("{:<32} {:>8} ms", step.name, step.duration_ms)).collect();
    lines.push(format!("deployed {} steps in {} ms", report.steps.len(), report.total_ms()));
    for line in lines {
        write_stdout_line(&line).map_err(|err| CliError::new(format!("failed to write stdout: {err}")))?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Reports a loaded and validated config.
fn command_config_validate() -> CliResult<ExitCode> {
    write_stdout_line("config ok").map_err(|err| CliError::new(format!("failed to write stdout: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
