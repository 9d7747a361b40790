// crates/review-harness-checks/tests/common/mod.rs
// ============================================================================
// Module: Check Test Fixtures
// Description: Scripted sessions keyed by SQL substrings, plus a runner.
// Purpose: Drive every check family without a live database.
// ============================================================================

#![allow(dead_code, reason = "Each test binary uses a different subset of fixtures.")]

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use review_harness_core::Category;
use review_harness_core::CheckContext;
use review_harness_core::CheckResult;
use review_harness_core::ConnectionPool;
use review_harness_core::DbError;
use review_harness_core::DbErrorKind;
use review_harness_core::HarnessLog;
use review_harness_core::LogEvent;
use review_harness_core::Query;
use review_harness_core::RawSql;
use review_harness_core::RetryPolicy;
use review_harness_core::SessionSource;
use review_harness_core::Sleeper;
use review_harness_core::SqlRows;
use review_harness_core::SqlSession;
use review_harness_core::SqlValue;
use review_harness_core::TestResult;
use review_harness_core::TestRunner;

// ============================================================================
// SECTION: Script
// ============================================================================

/// Scripted response to a statement.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Return these rows.
    Rows(SqlRows),
    /// Report this many affected rows.
    Affected(u64),
    /// Fail with this error.
    Fail(DbError),
    /// Fail with this error and mark the session closed.
    FailAndClose(DbError),
}

/// One needle-to-reply rule.
#[derive(Debug)]
struct Rule {
    /// Substring the statement must contain.
    needle: String,
    /// Reply to return.
    reply: Reply,
    /// Whether the rule is consumed on first match.
    once: bool,
}

/// Shared script consulted by every session of a pool.
///
/// Rules match by substring in insertion order; `once` rules are consumed
/// on first match. Unmatched queries return no rows and unmatched writes
/// affect one row.
#[derive(Debug, Default)]
pub struct Script {
    /// Rules in match order.
    rules: Mutex<Vec<Rule>>,
    /// Statements seen by any session.
    statements: Mutex<Vec<String>>,
}

impl Script {
    pub fn on(&self, needle: &str, reply: Reply) -> &Self {
        self.push(needle, reply, false)
    }

    pub fn once(&self, needle: &str, reply: Reply) -> &Self {
        self.push(needle, reply, true)
    }

    fn push(&self, needle: &str, reply: Reply, once: bool) -> &Self {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            reply,
            once,
        });
        self
    }

    fn reply(&self, sql: &str) -> Option<Reply> {
        self.statements.lock().unwrap().push(sql.to_string());
        let mut rules = self.rules.lock().unwrap();
        let index = rules.iter().position(|rule| sql.contains(&rule.needle))?;
        if rules[index].once { Some(rules.remove(index).reply) } else { Some(rules[index].reply.clone()) }
    }

    /// Every statement seen, in order.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    /// Number of statements containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.statements.lock().unwrap().iter().filter(|sql| sql.contains(needle)).count()
    }
}

// ============================================================================
// SECTION: Session
// ============================================================================

/// Session answering from a [`Script`].
#[derive(Debug)]
pub struct ScriptedSession {
    /// Shared script.
    script: Arc<Script>,
    /// Whether a scripted failure closed the session.
    closed: bool,
}

impl ScriptedSession {
    fn run(&mut self, sql: &str) -> Result<Option<Reply>, DbError> {
        if self.closed {
            return Err(DbError::new(DbErrorKind::Connection, "connection closed"));
        }
        match self.script.reply(sql) {
            Some(Reply::Fail(err)) => Err(err),
            Some(Reply::FailAndClose(err)) => {
                self.closed = true;
                Err(err)
            }
            other => Ok(other),
        }
    }

    fn rows(&mut self, sql: &str) -> Result<SqlRows, DbError> {
        match self.run(sql)? {
            Some(Reply::Rows(rows)) => Ok(rows),
            _ => Ok(SqlRows::empty(&["value"])),
        }
    }
}

impl SqlSession for ScriptedSession {
    fn query(&mut self, query: &Query) -> Result<SqlRows, DbError> {
        self.rows(query.sql())
    }

    fn execute(&mut self, query: &Query) -> Result<u64, DbError> {
        match self.run(query.sql())? {
            Some(Reply::Affected(count)) => Ok(count),
            Some(Reply::Rows(rows)) => Ok(u64::try_from(rows.len()).unwrap()),
            _ => Ok(1),
        }
    }

    fn query_raw(&mut self, raw: &RawSql) -> Result<SqlRows, DbError> {
        self.rows(raw.sql())
    }

    fn batch_execute(&mut self, script: &str) -> Result<(), DbError> {
        self.run(script).map(|_| ())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Connect failure; never raised by [`ScriptedManager`].
#[derive(Debug)]
pub struct ScriptedConnectError;

impl fmt::Display for ScriptedConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("connection refused")
    }
}

impl std::error::Error for ScriptedConnectError {}

/// Manager handing out sessions that share one script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedManager {
    /// Script shared by every session.
    pub script: Arc<Script>,
    /// Number of connects, including replacements.
    pub connects: Arc<AtomicUsize>,
}

impl r2d2::ManageConnection for ScriptedManager {
    type Connection = ScriptedSession;
    type Error = ScriptedConnectError;

    fn connect(&self) -> Result<ScriptedSession, ScriptedConnectError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedSession {
            script: Arc::clone(&self.script),
            closed: false,
        })
    }

    fn is_valid(&self, conn: &mut ScriptedSession) -> Result<(), ScriptedConnectError> {
        if conn.closed { Err(ScriptedConnectError) } else { Ok(()) }
    }

    fn has_broken(&self, conn: &mut ScriptedSession) -> bool {
        conn.closed
    }
}

// ============================================================================
// SECTION: Log And Sleep
// ============================================================================

/// Log sink that keeps every event in memory.
#[derive(Default)]
pub struct CaptureLog {
    /// Recorded events.
    pub events: Mutex<Vec<LogEvent>>,
}

impl CaptureLog {
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|event| event.event).collect()
    }
}

impl HarnessLog for CaptureLog {
    fn record(&self, event: &LogEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Sleeper that returns immediately.
pub struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

// ============================================================================
// SECTION: Fixture
// ============================================================================

/// Pool, script, log, and runner wired together.
pub struct Fixture {
    /// Script shared by the pool's sessions.
    pub script: Arc<Script>,
    /// Manager behind the pool.
    pub manager: ScriptedManager,
    /// Pool the runner leases from.
    pub pool: ConnectionPool<ScriptedManager>,
    /// Captured log events.
    pub log: Arc<CaptureLog>,
    /// Runner under test.
    pub runner: TestRunner,
}

impl Fixture {
    pub fn new(size: usize) -> Self {
        let manager = ScriptedManager::default();
        let script = Arc::clone(&manager.script);
        let pool = ConnectionPool::new(manager.clone(), size).unwrap();
        let log = Arc::new(CaptureLog::default());
        let sessions: Arc<dyn SessionSource> = Arc::new(pool.clone());
        let sink: Arc<dyn HarnessLog> = log.clone();
        let runner = TestRunner::new(sessions, sink)
            .with_retry(RetryPolicy::new(2, Duration::ZERO), Arc::new(NoSleep));
        Self {
            script,
            manager,
            pool,
            log,
            runner,
        }
    }

    /// Runs one check and returns a copy of its result.
    pub fn run<F>(&mut self, category: Category, check: F) -> TestResult
    where
        F: FnOnce(&mut CheckContext<'_>) -> CheckResult,
    {
        self.runner.run(category, "check", check)
    }

    /// Sessions shared with the runner.
    pub fn sessions(&self) -> Arc<dyn SessionSource> {
        Arc::new(self.pool.clone())
    }
}

// ============================================================================
// SECTION: Builders
// ============================================================================

pub fn rows(columns: &[&str], values: Vec<Vec<SqlValue>>) -> SqlRows {
    SqlRows::new(columns.iter().map(|name| (*name).to_string()).collect(), values)
}

pub fn scalar(column: &str, value: impl Into<SqlValue>) -> Reply {
    Reply::Rows(rows(&[column], vec![vec![value.into()]]))
}

pub fn sqlstate(code: &str) -> Reply {
    Reply::Fail(DbError::from_sqlstate(code, format!("server error {code}")))
}

/// Status label of the named step in a result's details.
pub fn step_status(result: &TestResult, name: &str) -> Option<String> {
    result.details()?["steps"]
        .as_array()?
        .iter()
        .find(|step| step["name"] == name)
        .and_then(|step| step["status"].as_str())
        .map(ToString::to_string)
}
