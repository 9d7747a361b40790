// crates/review-harness-core/tests/common/mod.rs
// ============================================================================
// Module: Core Test Fixtures
// Description: In-memory sessions, connection managers, and log capture.
// Purpose: Exercise pooling, running, and reporting without a database.
// ============================================================================

#![allow(dead_code, reason = "Each test binary uses a different subset of fixtures.")]

use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use review_harness_core::DbError;
use review_harness_core::HarnessLog;
use review_harness_core::LogEvent;
use review_harness_core::Query;
use review_harness_core::RawSql;
use review_harness_core::Sleeper;
use review_harness_core::SqlRows;
use review_harness_core::SqlSession;

// ============================================================================
// SECTION: Session
// ============================================================================

/// Session that records statements and can be marked closed.
#[derive(Debug, Default)]
pub struct FakeSession {
    /// Serial number assigned by the manager.
    pub serial: usize,
    /// Statements seen, in order.
    pub statements: Vec<String>,
    /// Whether the session reports itself closed.
    pub closed: bool,
}

impl SqlSession for FakeSession {
    fn query(&mut self, query: &Query) -> Result<SqlRows, DbError> {
        self.statements.push(query.sql().to_string());
        Ok(SqlRows::empty(&["value"]))
    }

    fn execute(&mut self, query: &Query) -> Result<u64, DbError> {
        self.statements.push(query.sql().to_string());
        Ok(1)
    }

    fn query_raw(&mut self, raw: &RawSql) -> Result<SqlRows, DbError> {
        self.statements.push(raw.sql().to_string());
        Ok(SqlRows::empty(&["value"]))
    }

    fn batch_execute(&mut self, script: &str) -> Result<(), DbError> {
        self.statements.push(script.to_string());
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

// ============================================================================
// SECTION: Manager
// ============================================================================

/// Connect failure raised by [`FakeManager`].
#[derive(Debug)]
pub struct FakeConnectError;

impl fmt::Display for FakeConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("connection refused")
    }
}

impl std::error::Error for FakeConnectError {}

/// Connection manager handing out [`FakeSession`]s.
#[derive(Debug, Clone, Default)]
pub struct FakeManager {
    /// Number of successful connects.
    pub connects: Arc<AtomicUsize>,
    /// When set, `connect` fails.
    pub refuse: Arc<AtomicBool>,
}

impl r2d2::ManageConnection for FakeManager {
    type Connection = FakeSession;
    type Error = FakeConnectError;

    fn connect(&self) -> Result<FakeSession, FakeConnectError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(FakeConnectError);
        }
        let serial = self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            serial,
            ..FakeSession::default()
        })
    }

    fn is_valid(&self, conn: &mut FakeSession) -> Result<(), FakeConnectError> {
        if conn.closed { Err(FakeConnectError) } else { Ok(()) }
    }

    fn has_broken(&self, conn: &mut FakeSession) -> bool {
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
    /// Returns the recorded event identifiers.
    pub fn event_names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|event| event.event).collect()
    }
}

impl HarnessLog for CaptureLog {
    fn record(&self, event: &LogEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Sleeper that counts calls instead of sleeping.
#[derive(Default)]
pub struct CountingSleeper {
    /// Number of sleeps requested.
    pub sleeps: AtomicUsize,
}

impl Sleeper for CountingSleeper {
    fn sleep(&self, _duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
    }
}
