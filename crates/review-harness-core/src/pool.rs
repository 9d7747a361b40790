// crates/review-harness-core/src/pool.rs
// ============================================================================
// Module: Connection Pool
// Description: Fixed-size slot arena of eagerly opened connections.
// Purpose: Bound concurrent database sessions and heal broken connections.
// Dependencies: r2d2 (ManageConnection), thiserror
// ============================================================================

//! ## Overview
//! [`ConnectionPool`] opens exactly `size` connections up front through an
//! [`r2d2::ManageConnection`] manager and stores them in a slot arena. Slot
//! indices move between a FIFO `available` queue and checked-out
//! [`PooledConnection`] guards.
//!
//! Invariants:
//! - Every slot index is either queued as available or held by one guard.
//! - A guard returns its slot on drop, on every exit path.
//! - A broken connection is replaced in its slot on release; if the
//!   replacement fails the slot is queued vacant and reconnects on its next
//!   acquire, so capacity never shrinks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::VecDeque;
use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use r2d2::ManageConnection;
use serde::Serialize;
use thiserror::Error;

use crate::session::SqlSession;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Connection pool errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// A physical connection could not be opened.
    #[error("pool connect error: {0}")]
    Connect(String),
    /// No connection became available before the deadline.
    #[error("pool acquire timed out after {} ms", .0.as_millis())]
    Timeout(Duration),
    /// The pool has been closed.
    #[error("pool closed")]
    Closed,
    /// Invalid pool configuration.
    #[error("invalid pool size: {0}")]
    InvalidSize(usize),
}

// ============================================================================
// SECTION: State
// ============================================================================

/// One arena slot.
enum Slot<C> {
    /// Open connection waiting in the pool.
    Idle(C),
    /// Slot whose connection must be reopened on next acquire.
    Vacant,
    /// Connection currently held by a guard.
    CheckedOut,
}

/// Mutable pool state guarded by the pool mutex.
struct PoolState<C> {
    /// Connection slots indexed `0..capacity`.
    slots: Vec<Slot<C>>,
    /// FIFO of slot indices that may be acquired.
    available: VecDeque<usize>,
    /// Whether the pool rejects further acquires.
    closed: bool,
}

/// Shared pool internals.
struct PoolShared<M: ManageConnection> {
    /// Connection factory.
    manager: M,
    /// Slot arena and queue.
    state: Mutex<PoolState<M::Connection>>,
    /// Signalled when a slot is returned.
    ready: Condvar,
    /// Number of broken connections replaced on release.
    replacements: AtomicU64,
}

impl<M: ManageConnection> PoolShared<M> {
    /// Locks the pool state, recovering from a poisoned mutex.
    fn lock(&self) -> MutexGuard<'_, PoolState<M::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a slot to the pool, replacing broken connections.
    fn release(&self, index: usize, mut conn: M::Connection) {
        let slot = if self.manager.has_broken(&mut conn) {
            drop(conn);
            if self.lock().closed {
                Slot::Vacant
            } else {
                self.replacements.fetch_add(1, Ordering::Relaxed);
                self.manager.connect().map_or(Slot::Vacant, Slot::Idle)
            }
        } else {
            Slot::Idle(conn)
        };
        let mut state = self.lock();
        let closed = state.closed;
        if let Some(entry) = state.slots.get_mut(index) {
            *entry = if closed { Slot::Vacant } else { slot };
        }
        if !closed {
            state.available.push_back(index);
        }
        drop(state);
        self.ready.notify_one();
    }

    /// Requeues a slot whose reconnect attempt failed.
    fn requeue_vacant(&self, index: usize) {
        let mut state = self.lock();
        if let Some(entry) = state.slots.get_mut(index) {
            *entry = Slot::Vacant;
        }
        if !state.closed {
            state.available.push_back(index);
        }
        drop(state);
        self.ready.notify_one();
    }
}

// ============================================================================
// SECTION: Pool
// ============================================================================

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Total slot count.
    pub capacity: usize,
    /// Slots that can be acquired without waiting.
    pub available: usize,
    /// Slots held by guards.
    pub checked_out: usize,
    /// Broken connections replaced so far.
    pub replacements: u64,
}

/// Fixed-capacity connection pool.
pub struct ConnectionPool<M: ManageConnection> {
    /// Shared state; clones of the pool share one arena.
    shared: Arc<PoolShared<M>>,
}

impl<M: ManageConnection> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ManageConnection> ConnectionPool<M> {
    /// Opens exactly `size` connections.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidSize`] for a zero size and
    /// [`PoolError::Connect`] when any connection fails to open.
    pub fn new(manager: M, size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::InvalidSize(size));
        }
        let mut slots = Vec::with_capacity(size);
        for _ in 0 .. size {
            let conn = manager.connect().map_err(|err| PoolError::Connect(err.to_string()))?;
            slots.push(Slot::Idle(conn));
        }
        let state = PoolState {
            slots,
            available: (0 .. size).collect(),
            closed: false,
        };
        Ok(Self {
            shared: Arc::new(PoolShared {
                manager,
                state: Mutex::new(state),
                ready: Condvar::new(),
                replacements: AtomicU64::new(0),
            }),
        })
    }

    /// Blocks until a connection is available.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] after [`Self::close`], or
    /// [`PoolError::Connect`] when a vacant slot cannot be reopened.
    pub fn acquire(&self) -> Result<PooledConnection<M>, PoolError> {
        self.acquire_until(None)
    }

    /// Waits at most `timeout` for a connection.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Timeout`] on expiry, plus the errors of
    /// [`Self::acquire`].
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<PooledConnection<M>, PoolError> {
        self.acquire_until(Some((Instant::now() + timeout, timeout)))
    }

    /// Shared acquire loop with an optional deadline.
    fn acquire_until(
        &self,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<PooledConnection<M>, PoolError> {
        let mut state = self.shared.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(index) = state.available.pop_front() {
                let taken = state
                    .slots
                    .get_mut(index)
                    .map(|entry| std::mem::replace(entry, Slot::CheckedOut));
                match taken {
                    Some(Slot::Idle(conn)) => return Ok(self.guard(index, conn)),
                    Some(Slot::Vacant) => {
                        drop(state);
                        return match self.shared.manager.connect() {
                            Ok(conn) => Ok(self.guard(index, conn)),
                            Err(err) => {
                                self.shared.requeue_vacant(index);
                                Err(PoolError::Connect(err.to_string()))
                            }
                        };
                    }
                    Some(Slot::CheckedOut) | None => continue,
                }
            }
            state = match deadline {
                None => self.shared.ready.wait(state).unwrap_or_else(PoisonError::into_inner),
                Some((deadline, timeout)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PoolError::Timeout(timeout));
                    }
                    self.shared
                        .ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    /// Wraps a checked-out connection in a guard.
    fn guard(&self, index: usize, conn: M::Connection) -> PooledConnection<M> {
        PooledConnection {
            shared: Arc::clone(&self.shared),
            index,
            conn: Some(conn),
        }
    }

    /// Returns the total slot count.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.lock().slots.len()
    }

    /// Returns the number of slots that can be acquired without waiting.
    #[must_use]
    pub fn available(&self) -> usize {
        self.shared.lock().available.len()
    }

    /// Returns the number of slots held by guards.
    #[must_use]
    pub fn checked_out(&self) -> usize {
        self.shared.lock().slots.iter().filter(|slot| matches!(slot, Slot::CheckedOut)).count()
    }

    /// Returns all counters under one lock.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.lock();
        PoolStats {
            capacity: state.slots.len(),
            available: state.available.len(),
            checked_out: state
                .slots
                .iter()
                .filter(|slot| matches!(slot, Slot::CheckedOut))
                .count(),
            replacements: self.shared.replacements.load(Ordering::Relaxed),
        }
    }

    /// Closes the pool: idle connections are dropped now, checked-out ones
    /// when their guards drop, and waiters wake with [`PoolError::Closed`].
    pub fn close(&self) {
        let mut state = self.shared.lock();
        state.closed = true;
        state.available.clear();
        for slot in &mut state.slots {
            if matches!(slot, Slot::Idle(_)) {
                *slot = Slot::Vacant;
            }
        }
        drop(state);
        self.shared.ready.notify_all();
    }

    /// Returns true once [`Self::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

// ============================================================================
// SECTION: Guard
// ============================================================================

/// Checked-out connection; returns itself to the pool on drop.
pub struct PooledConnection<M: ManageConnection> {
    /// Owning pool.
    shared: Arc<PoolShared<M>>,
    /// Arena slot index.
    index: usize,
    /// Connection; present until drop.
    conn: Option<M::Connection>,
}

impl<M: ManageConnection> PooledConnection<M> {
    /// Returns the arena slot index held by this guard.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.index
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    #[allow(clippy::expect_used, reason = "The connection is only taken in Drop.")]
    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("pooled connection present until drop")
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    #[allow(clippy::expect_used, reason = "The connection is only taken in Drop.")]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("pooled connection present until drop")
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.release(self.index, conn);
        }
    }
}

// ============================================================================
// SECTION: Session Source
// ============================================================================

/// Object-safe view of a pool that hands out SQL sessions.
pub trait SessionSource: Send + Sync {
    /// Blocks until a session is available.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError`] when the pool is closed or cannot reconnect.
    fn lease(&self) -> Result<SessionLease, PoolError>;

    /// Waits at most `timeout` for a session.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Timeout`] on expiry, plus the errors of
    /// [`Self::lease`].
    fn lease_timeout(&self, timeout: Duration) -> Result<SessionLease, PoolError>;

    /// Returns pool counters.
    fn stats(&self) -> PoolStats;
}

/// Type-erased guard access used by [`SessionLease`].
trait LeasedSession: Send {
    /// Returns the session.
    fn session(&self) -> &(dyn SqlSession + 'static);
    /// Returns the session mutably.
    fn session_mut(&mut self) -> &mut (dyn SqlSession + 'static);
}

impl<M> LeasedSession for PooledConnection<M>
where
    M: ManageConnection,
    M::Connection: SqlSession,
{
    fn session(&self) -> &(dyn SqlSession + 'static) {
        &**self
    }

    fn session_mut(&mut self) -> &mut (dyn SqlSession + 'static) {
        &mut **self
    }
}

/// A pooled SQL session; dropping it returns the connection.
pub struct SessionLease {
    /// Underlying pool guard.
    inner: Box<dyn LeasedSession>,
}

impl Deref for SessionLease {
    type Target = dyn SqlSession;

    fn deref(&self) -> &Self::Target {
        self.inner.session()
    }
}

impl DerefMut for SessionLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.session_mut()
    }
}

impl<M> SessionSource for ConnectionPool<M>
where
    M: ManageConnection,
    M::Connection: SqlSession,
{
    fn lease(&self) -> Result<SessionLease, PoolError> {
        let guard = self.acquire()?;
        Ok(SessionLease {
            inner: Box::new(guard),
        })
    }

    fn lease_timeout(&self, timeout: Duration) -> Result<SessionLease, PoolError> {
        let guard = self.acquire_timeout(timeout)?;
        Ok(SessionLease {
            inner: Box::new(guard),
        })
    }

    fn stats(&self) -> PoolStats {
        Self::stats(self)
    }
}
