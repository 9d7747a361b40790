// crates/review-harness-cli/tests/common/mod.rs
// ============================================================================
// Module: CLI Test Fixtures
// Description: Scripted sessions and a pooled manager for monitor and deploy tests.
// Purpose: Exercise command workflows without a live database.
// ============================================================================

#![allow(dead_code, reason = "Each test binary uses a different subset of fixtures.")]

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use review_harness_core::DbError;
use review_harness_core::HarnessLog;
use review_harness_core::LogEvent;
use review_harness_core::Query;
use review_harness_core::RawSql;
use review_harness_core::Sleeper;
use review_harness_core::SqlRows;
use review_harness_core::SqlSession;
use review_harness_core::SqlValue;

// ============================================================================
// SECTION: Script
// ============================================================================

/// Scripted response to a statement.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Return these rows.
    Rows(SqlRows),
    /// Fail with this error.
    Fail(DbError),
}

/// Substring rules shared by every session; `once` rules are consumed.
#[derive(Debug, Default)]
pub struct Script {
    /// `(needle, reply, once)` in match order.
    rules: Mutex<Vec<(String, Reply, bool)>>,
    /// Statements seen, in order.
    statements: Mutex<Vec<String>>,
}

impl Script {
    pub fn on(&self, needle: &str, reply: Reply) -> &Self {
        self.rules.lock().unwrap().push((needle.to_string(), reply, false));
        self
    }

    pub fn once(&self, needle: &str, reply: Reply) -> &Self {
        self.rules.lock().unwrap().push((needle.to_string(), reply, true));
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    fn reply(&self, sql: &str) -> Result<SqlRows, DbError> {
        self.statements.lock().unwrap().push(sql.to_string());
        let mut rules = self.rules.lock().unwrap();
        let Some(index) = rules.iter().position(|(needle, _, _)| sql.contains(needle.as_str())) else {
            return Ok(SqlRows::empty(&["value"]));
        };
        let reply = if rules[index].2 { rules.remove(index).1 } else { rules[index].1.clone() };
        match reply {
            Reply::Rows(rows) => Ok(rows),
            Reply::Fail(err) => Err(err),
        }
    }
}

// ============================================================================
// SECTION: Session And Manager
// ============================================================================

/// Session answering from a shared [`Script`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedSession {
    /// Shared script.
    pub script: Arc<Script>,
}

impl SqlSession for ScriptedSession {
    fn query(&mut self, query: &Query) -> Result<SqlRows, DbError> {
        self.script.reply(query.sql())
    }

    fn execute(&mut self, query: &Query) -> Result<u64, DbError> {
        self.script.reply(query.sql()).map(|_| 1)
    }

    fn query_raw(&mut self, raw: &RawSql) -> Result<SqlRows, DbError> {
        self.script.reply(raw.sql())
    }

    fn batch_execute(&mut self, script: &str) -> Result<(), DbError> {
        self.script.reply(script).map(|_| ())
    }

    fn is_closed(&self) -> bool {
        false
    }
}

/// Connect failure; never raised.
#[derive(Debug)]
pub struct NeverFails;

impl fmt::Display for NeverFails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unreachable")
    }
}

impl std::error::Error for NeverFails {}

/// Manager handing out sessions over one script.
#[derive(Debug, Clone, Default)]
pub struct ScriptedManager {
    /// Script shared by every session.
    pub script: Arc<Script>,
}

impl r2d2::ManageConnection for ScriptedManager {
    type Connection = ScriptedSession;
    type Error = NeverFails;

    fn connect(&self) -> Result<ScriptedSession, NeverFails> {
        Ok(ScriptedSession {
            script: Arc::clone(&self.script),
        })
    }

    fn is_valid(&self, _conn: &mut ScriptedSession) -> Result<(), NeverFails> {
        Ok(())
    }

    fn has_broken(&self, _conn: &mut ScriptedSession) -> bool {
        false
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

/// Sleeper that records requested delays without blocking.
#[derive(Default)]
pub struct RecordingSleeper {
    /// Requested delays.
    pub sleeps: Mutex<Vec<Duration>>,
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

// ============================================================================
// SECTION: Builders
// ============================================================================

pub fn rows(columns: &[&str], values: Vec<Vec<SqlValue>>) -> Reply {
    Reply::Rows(SqlRows::new(columns.iter().map(|name| (*name).to_string()).collect(), values))
}
