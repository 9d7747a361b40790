// crates/review-harness-cli/src/monitor.rs
// ============================================================================
// Module: Realtime Monitor
// Description: Polls PostgreSQL statistics views and renders a dashboard.
// Purpose: Watch connection, table, and cache health while workloads run.
// Dependencies: review-harness-core, review-harness-config, serde, serde_json, thiserror
// ============================================================================

//! ## Overview
//! Each poll leases a session, reads `pg_stat_activity`,
//! `pg_stat_user_tables`, and `pg_stat_database`, and folds the rows into a
//! [`MonitorSnapshot`]. Polls are guarded by the retry wrapper; a poll that
//! still fails is logged and the loop moves on to the next interval.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use review_harness_config::MonitorConfig;
use review_harness_core::DbError;
use review_harness_core::HarnessLog;
use review_harness_core::LogEvent;
use review_harness_core::LogLevel;
use review_harness_core::PoolError;
use review_harness_core::Query;
use review_harness_core::RetryPolicy;
use review_harness_core::Retryable;
use review_harness_core::SessionSource;
use review_harness_core::Sleeper;
use review_harness_core::SqlRows;
use review_harness_core::SqlSession;
use review_harness_core::SqlValue;
use review_harness_core::log::now_ms;
use review_harness_core::retry;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Statements
// ============================================================================

/// Connection counts by state for the current database.
const CONNECTIONS_SQL: &str = "SELECT COALESCE(state, 'unknown') AS state, COUNT(*)::int8 AS connections \
     FROM pg_stat_activity WHERE datname = current_database() GROUP BY 1 ORDER BY 1";

/// Per-table counters for one schema.
const TABLE_STATS_SQL: &str = "SELECT relname::text AS table_name, seq_scan, \
     COALESCE(idx_scan, 0) AS idx_scan, n_live_tup, n_dead_tup, n_tup_ins, n_tup_upd, n_tup_del \
     FROM pg_stat_user_tables WHERE schemaname = $1 ORDER BY relname";

/// Database-wide cache and transaction counters.
const DATABASE_STATS_SQL: &str = "SELECT COALESCE(blks_hit::float8 / NULLIF(blks_hit + blks_read, 0), 1.0) \
     AS cache_hit_ratio, xact_commit, xact_rollback, deadlocks \
     FROM pg_stat_database WHERE datname = current_database()";

/// Non-idle statements running longer than `$1` seconds.
const SLOW_QUERIES_SQL: &str = "SELECT pid::int8 AS pid, COALESCE(usename::text, '') AS usename, \
     COALESCE(state, '') AS state, EXTRACT(EPOCH FROM now() - query_start)::float8 AS running_secs, \
     LEFT(query, 200) AS query FROM pg_stat_activity \
     WHERE datname = current_database() AND state <> 'idle' AND pid <> pg_backend_pid() \
     AND query_start < now() - make_interval(secs => $1) ORDER BY query_start";

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Monitor failures.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// A statistics query failed.
    #[error("monitor query failed: {0}")]
    Database(#[from] DbError),
    /// No session could be leased.
    #[error("monitor lease failed: {0}")]
    Pool(#[from] PoolError),
    /// Dashboard or snapshot output failed.
    #[error("monitor io error: {0}")]
    Io(#[from] io::Error),
    /// Snapshot serialization failed.
    #[error("monitor snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl Retryable for MonitorError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Pool(_))
    }
}

// ============================================================================
// SECTION: Snapshot
// ============================================================================

/// Number of backends in one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCount {
    /// Backend state (`active`, `idle`, ...).
    pub state: String,
    /// Backends in that state.
    pub connections: i64,
}

/// Counters for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    /// Table name.
    pub table_name: String,
    /// Sequential scans.
    pub seq_scan: i64,
    /// Index scans.
    pub idx_scan: i64,
    /// Estimated live tuples.
    pub live_tuples: i64,
    /// Estimated dead tuples.
    pub dead_tuples: i64,
    /// Inserted tuples.
    pub inserts: i64,
    /// Updated tuples.
    pub updates: i64,
    /// Deleted tuples.
    pub deletes: i64,
    /// Dead tuples as a share of live plus dead; zero for an empty table.
    pub dead_ratio: f64,
}

/// Database-wide counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStats {
    /// Buffer cache hit ratio in `0..=1`.
    pub cache_hit_ratio: f64,
    /// Committed transactions.
    pub commits: i64,
    /// Rolled back transactions.
    pub rollbacks: i64,
    /// Detected deadlocks.
    pub deadlocks: i64,
}

impl Default for DatabaseStats {
    fn default() -> Self {
        Self {
            cache_hit_ratio: 1.0,
            commits: 0,
            rollbacks: 0,
            deadlocks: 0,
        }
    }
}

/// A statement that has been running past the slow-query threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowQuery {
    /// Backend process id.
    pub pid: i64,
    /// Session user.
    pub user: String,
    /// Backend state.
    pub state: String,
    /// Seconds since the statement started.
    pub running_secs: f64,
    /// Statement text, truncated.
    pub query: String,
}

/// One monitor poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSnapshot {
    /// Poll time in milliseconds since the epoch.
    pub taken_at_ms: u64,
    /// Backends by state.
    pub connections: Vec<ConnectionCount>,
    /// Per-table counters.
    pub tables: Vec<TableStats>,
    /// Database-wide counters.
    pub database: DatabaseStats,
    /// Long-running statements.
    pub slow_queries: Vec<SlowQuery>,
}

impl MonitorSnapshot {
    /// Total backends across all states.
    #[must_use]
    pub fn total_connections(&self) -> i64 {
        self.connections.iter().map(|count| count.connections).sum()
    }
}

// ============================================================================
// SECTION: Collection
// ============================================================================

/// Reads one snapshot through `session`.
///
/// # Errors
///
/// Returns [`MonitorError::Database`] when any statistics query fails.
pub fn collect_snapshot(
    session: &mut dyn SqlSession,
    schema: &str,
    slow_query_secs: u64,
) -> Result<MonitorSnapshot, MonitorError> {
    let connections = session.query(&Query::new(CONNECTIONS_SQL))?;
    let tables = session.query(&Query::new(TABLE_STATS_SQL).bind(schema))?;
    let database = session.query(&Query::new(DATABASE_STATS_SQL))?;
    let threshold = f64::from(u32::try_from(slow_query_secs).unwrap_or(u32::MAX));
    let slow = session.query(&Query::new(SLOW_QUERIES_SQL).bind(threshold))?;
    Ok(MonitorSnapshot {
        taken_at_ms: u64::try_from(now_ms()).unwrap_or(u64::MAX),
        connections: (0 .. connections.len())
            .map(|row| ConnectionCount {
                state: text(&connections, row, "state"),
                connections: int(&connections, row, "connections"),
            })
            .collect(),
        tables: (0 .. tables.len()).map(|row| table_stats(&tables, row)).collect(),
        database: if database.is_empty() {
            DatabaseStats::default()
        } else {
            DatabaseStats {
                cache_hit_ratio: float(&database, 0, "cache_hit_ratio").unwrap_or(1.0),
                commits: int(&database, 0, "xact_commit"),
                rollbacks: int(&database, 0, "xact_rollback"),
                deadlocks: int(&database, 0, "deadlocks"),
            }
        },
        slow_queries: (0 .. slow.len())
            .map(|row| SlowQuery {
                pid: int(&slow, row, "pid"),
                user: text(&slow, row, "usename"),
                state: text(&slow, row, "state"),
                running_secs: float(&slow, row, "running_secs").unwrap_or(0.0),
                query: text(&slow, row, "query"),
            })
            .collect(),
    })
}

/// Builds table counters from one `pg_stat_user_tables` row.
fn table_stats(rows: &SqlRows, row: usize) -> TableStats {
    let live_tuples = int(rows, row, "n_live_tup");
    let dead_tuples = int(rows, row, "n_dead_tup");
    TableStats {
        table_name: text(rows, row, "table_name"),
        seq_scan: int(rows, row, "seq_scan"),
        idx_scan: int(rows, row, "idx_scan"),
        live_tuples,
        dead_tuples,
        inserts: int(rows, row, "n_tup_ins"),
        updates: int(rows, row, "n_tup_upd"),
        deletes: int(rows, row, "n_tup_del"),
        dead_ratio: dead_ratio(live_tuples, dead_tuples),
    }
}

/// Dead share of all tuples; zero when the table holds none.
#[must_use]
#[allow(clippy::cast_precision_loss, reason = "Tuple counts stay far below 2^52.")]
pub fn dead_ratio(live: i64, dead: i64) -> f64 {
    let total = live.saturating_add(dead);
    if total <= 0 { 0.0 } else { dead as f64 / total as f64 }
}

/// Integer column, zero when null or missing.
fn int(rows: &SqlRows, row: usize, column: &str) -> i64 {
    rows.get(row, column).and_then(SqlValue::as_i64).unwrap_or(0)
}

/// Float column, widening integers.
fn float(rows: &SqlRows, row: usize, column: &str) -> Option<f64> {
    rows.get(row, column).and_then(SqlValue::as_f64)
}

/// Text column, empty when null or missing.
fn text(rows: &SqlRows, row: usize, column: &str) -> String {
    rows.get(row, column).map(SqlValue::display_text).unwrap_or_default()
}

// ============================================================================
// SECTION: Alerts And Rendering
// ============================================================================

/// Lists threshold breaches in `snapshot`.
#[must_use]
pub fn alerts(snapshot: &MonitorSnapshot, config: &MonitorConfig) -> Vec<String> {
    let mut alerts: Vec<String> = snapshot
        .tables
        .iter()
        .filter(|table| table.dead_ratio > config.dead_tuple_ratio_alert)
        .map(|table| {
            format!(
                "table {}: dead tuple ratio {:.2} exceeds {:.2}",
                table.table_name, table.dead_ratio, config.dead_tuple_ratio_alert
            )
        })
        .collect();
    if snapshot.database.cache_hit_ratio < config.cache_hit_alert {
        alerts.push(format!(
            "cache hit ratio {:.3} below {:.3}",
            snapshot.database.cache_hit_ratio, config.cache_hit_alert
        ));
    }
    alerts
}

/// Renders a fixed-width text dashboard.
#[must_use]
pub fn render_dashboard(snapshot: &MonitorSnapshot, alerts: &[String]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== review_system monitor @ {} ms ==", snapshot.taken_at_ms);
    let _ = writeln!(out, "Connections ({} total)", snapshot.total_connections());
    let _ = writeln!(out, "  {:<24} {:>8}", "state", "count");
    for count in &snapshot.connections {
        let _ = writeln!(out, "  {:<24} {:>8}", count.state, count.connections);
    }
    let _ = writeln!(out, "Tables");
    let _ = writeln!(
        out,
        "  {:<32} {:>10} {:>10} {:>10} {:>10} {:>7}",
        "table", "seq_scan", "idx_scan", "live", "dead", "dead%"
    );
    for table in &snapshot.tables {
        let _ = writeln!(
            out,
            "  {:<32} {:>10} {:>10} {:>10} {:>10} {:>6.1}%",
            table.table_name,
            table.seq_scan,
            table.idx_scan,
            table.live_tuples,
            table.dead_tuples,
            table.dead_ratio * 100.0
        );
    }
    let database = &snapshot.database;
    let _ = writeln!(out, "Database");
    let _ = writeln!(
        out,
        "  cache hit {:.3}  commits {}  rollbacks {}  deadlocks {}",
        database.cache_hit_ratio, database.commits, database.rollbacks, database.deadlocks
    );
    let _ = writeln!(out, "Slow queries ({})", snapshot.slow_queries.len());
    for slow in &snapshot.slow_queries {
        let _ = writeln!(
            out,
            "  {:>8} {:<16} {:>8.1}s  {}",
            slow.pid, slow.user, slow.running_secs, slow.query
        );
    }
    if !alerts.is_empty() {
        let _ = writeln!(out, "Alerts");
        for alert in alerts {
            let _ = writeln!(out, "  ! {alert}");
        }
    }
    out
}

/// Writes `snapshot` as pretty JSON, creating the parent directory.
///
/// # Errors
///
/// Returns [`MonitorError`] when serialization or the write fails.
pub fn write_snapshot(snapshot: &MonitorSnapshot, path: &Path) -> Result<(), MonitorError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(snapshot)?;
    fs::write(path, json)?;
    Ok(())
}

// ============================================================================
// SECTION: Poll Loop
// ============================================================================

/// Poll loop over a session source.
pub struct Monitor<'a> {
    /// Source of pooled sessions.
    pub sessions: &'a dyn SessionSource,
    /// Poll count, interval, and alert thresholds.
    pub config: MonitorConfig,
    /// Schema whose tables are reported.
    pub schema: &'a str,
    /// Retry policy applied to each poll.
    pub retry: RetryPolicy,
    /// Maximum wait for a session per attempt.
    pub acquire_timeout: Duration,
    /// Delay provider for retries and intervals.
    pub sleeper: &'a dyn Sleeper,
    /// Event sink.
    pub log: &'a dyn HarnessLog,
}

impl Monitor<'_> {
    /// Takes one snapshot, retrying lease and query failures.
    ///
    /// # Errors
    ///
    /// Returns the last [`MonitorError`] once retries are exhausted.
    pub fn poll(&self) -> Result<MonitorSnapshot, MonitorError> {
        retry(&self.retry, self.sleeper, || {
            let mut lease = self.sessions.lease_timeout(self.acquire_timeout)?;
            collect_snapshot(&mut *lease, self.schema, self.config.slow_query_secs)
        })
    }

    /// Polls `config.iterations` times (forever when zero), writing a
    /// dashboard to `out` after each successful poll.
    ///
    /// Returns the last successful snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Io`] when the dashboard cannot be written.
    /// Poll failures are logged and do not end the loop.
    pub fn run(&self, out: &mut dyn Write) -> Result<Option<MonitorSnapshot>, MonitorError> {
        let mut last = None;
        let mut iteration: u32 = 0;
        loop {
            iteration = iteration.saturating_add(1);
            match self.poll() {
                Ok(snapshot) => {
                    let alerts = alerts(&snapshot, &self.config);
                    for alert in &alerts {
                        self.log.warn("monitor_alert", alert);
                    }
                    out.write_all(render_dashboard(&snapshot, &alerts).as_bytes())?;
                    out.flush()?;
                    self.log.record(
                        &LogEvent::new("monitor_poll", LogLevel::Info, "monitor poll complete")
                            .with_field("iteration", iteration)
                            .with_field("connections", snapshot.total_connections())
                            .with_field("alerts", alerts.len()),
                    );
                    last = Some(snapshot);
                }
                Err(err) => self.log.record(
                    &LogEvent::new("monitor_poll_failed", LogLevel::Error, err.to_string())
                        .with_field("iteration", iteration),
                ),
            }
            if self.config.iterations != 0 && iteration >= self.config.iterations {
                return Ok(last);
            }
            self.sleeper.sleep(self.config.interval());
        }
    }
}
