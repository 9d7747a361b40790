// crates/review-harness-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Unit tests for argument parsing and output helpers.
// Purpose: Keep the command surface and output-directory precedence stable.
// Dependencies: review-harness-cli main helpers
// ============================================================================

//! ## Overview
//! Parses representative command lines and checks the helpers that resolve
//! the report directory and build the log sink.

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
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use clap::CommandFactory;
use clap::Parser;
use review_harness_config::OutputConfig;
use review_harness_core::Category;
use review_harness_core::LogEvent;
use review_harness_core::LogLevel;

use super::Cli;
use super::Commands;
use super::ConfigCommand;
use super::build_log;
use super::resolve_output_dir;

// ============================================================================
// SECTION: Parsing
// ============================================================================

#[test]
fn command_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn run_parses_repeated_categories() {
    let cli = Cli::try_parse_from([
        "review-harness",
        "run",
        "--category",
        "security",
        "--category",
        "stress",
        "--sample-rows",
    ])
    .unwrap();
    let Commands::Run(command) = cli.command else {
        panic!("expected run command");
    };
    assert_eq!(command.categories, vec![Category::Security, Category::Stress]);
    assert!(command.sample_rows);
    assert!(command.output_dir.is_none());
}

#[test]
fn run_rejects_unknown_category() {
    assert!(Cli::try_parse_from(["review-harness", "run", "--category", "chaos"]).is_err());
}

#[test]
fn global_config_flag_follows_subcommand() {
    let cli = Cli::try_parse_from(["review-harness", "config", "validate", "--config", "alt.toml"]).unwrap();
    assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
    assert!(matches!(
        cli.command,
        Commands::Config {
            command: ConfigCommand::Validate
        }
    ));
}

#[test]
fn monitor_parses_overrides() {
    let cli = Cli::try_parse_from([
        "review-harness",
        "monitor",
        "--iterations",
        "0",
        "--interval-ms",
        "250",
        "--snapshot",
        "out/metrics.json",
    ])
    .unwrap();
    let Commands::Monitor(command) = cli.command else {
        panic!("expected monitor command");
    };
    assert_eq!(command.iterations, Some(0));
    assert_eq!(command.interval_ms, Some(250));
    assert_eq!(command.snapshot, Some(PathBuf::from("out/metrics.json")));
}

#[test]
fn monitor_rejects_zero_interval() {
    assert!(Cli::try_parse_from(["review-harness", "monitor", "--interval-ms", "0"]).is_err());
}

#[test]
fn deploy_parses_flags() {
    let args = ["review-harness", "deploy", "--recreate-schema", "--sql-dir", "db/sql"];
    let cli = Cli::try_parse_from(args).unwrap();
    let Commands::Deploy(command) = cli.command else {
        panic!("expected deploy command");
    };
    assert!(command.recreate_schema);
    assert_eq!(command.sql_dir, Some(PathBuf::from("db/sql")));
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

#[test]
fn output_dir_flag_wins_over_config() {
    let output = OutputConfig {
        result_dir: PathBuf::from("from_config"),
        ..OutputConfig::default()
    };
    let flag = PathBuf::from("from_flag");
    assert_eq!(resolve_output_dir(Some(&flag), &output), Path::new("from_flag"));
    assert_eq!(resolve_output_dir(None, &output), Path::new("from_config"));
}

#[test]
fn build_log_without_dir_creates_no_files() {
    let output = OutputConfig::default();
    assert!(output.log_dir.is_none());
    let log = build_log(&output).unwrap();
    log.flush();
}

#[test]
fn build_log_with_dir_writes_jsonl() {
    let dir = tempfile::tempdir().unwrap();
    let output = OutputConfig {
        log_dir: Some(dir.path().join("logs")),
        ..OutputConfig::default()
    };
    let log = build_log(&output).unwrap();
    log.record(&LogEvent::new("unit_test", LogLevel::Info, "hello"));
    log.flush();
    let files: Vec<PathBuf> =
        std::fs::read_dir(dir.path().join("logs")).unwrap().map(|entry| entry.unwrap().path()).collect();
    assert_eq!(files.len(), 1);
    let content = std::fs::read_to_string(&files[0]).unwrap();
    assert!(content.contains("\"event\":\"unit_test\""));
}
