// crates/review-harness-core/src/worker.rs
// ============================================================================
// Module: Worker Pool
// Description: Bounded worker threads with cancellation and join-with-timeout.
// Purpose: Run parallel database workloads without abandoning connections.
// Dependencies: std
// ============================================================================

//! ## Overview
//! [`WorkerPool::run`] executes boxed tasks on at most `workers` threads and
//! returns one [`TaskOutcome`] per task in submission order. When a timeout
//! is given and expires, the shared [`CancelToken`] is cancelled, queued
//! tasks never start, and unfinished tasks are reported as
//! [`TaskOutcome::TimedOut`].
//!
//! Tasks own any pooled sessions they lease. A task that outlives the timeout
//! keeps running until it observes the token or finishes, and its lease
//! returns the connection to the pool when it drops.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use std::time::Instant;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Upper bound on worker threads per batch.
pub const MAX_WORKERS: usize = 64;

// ============================================================================
// SECTION: Cancellation
// ============================================================================

/// Cooperative cancellation flag shared by a batch of tasks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    /// Set once the batch is cancelled.
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates an uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SECTION: Tasks
// ============================================================================

/// A unit of work submitted to the pool.
pub type Task<T> = Box<dyn FnOnce(&CancelToken) -> T + Send + 'static>;

/// Outcome of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    /// The task returned a value.
    Completed(T),
    /// The task panicked; carries the panic message.
    Panicked(String),
    /// The task did not finish before the batch deadline.
    TimedOut,
}

impl<T> TaskOutcome<T> {
    /// Returns the completed value.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Panicked(_) | Self::TimedOut => None,
        }
    }

    /// Returns a borrowed completed value.
    pub const fn as_completed(&self) -> Option<&T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Panicked(_) | Self::TimedOut => None,
        }
    }

    /// Returns true when the task timed out.
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Returns a stable label.
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Panicked(_) => "panicked",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

// ============================================================================
// SECTION: Worker Pool
// ============================================================================

/// Bounded pool of worker threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    /// Worker thread count, in `1..=MAX_WORKERS`.
    workers: usize,
}

impl WorkerPool {
    /// Creates a pool, clamping `workers` into `1..=MAX_WORKERS`.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.clamp(1, MAX_WORKERS),
        }
    }

    /// Returns the worker count.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `tasks` and waits up to `timeout` (unbounded when `None`).
    #[must_use]
    pub fn run<T: Send + 'static>(
        &self,
        tasks: Vec<Task<T>>,
        timeout: Option<Duration>,
    ) -> Vec<TaskOutcome<T>> {
        let total = tasks.len();
        if total == 0 {
            return Vec::new();
        }
        let queue: Arc<Mutex<VecDeque<(usize, Task<T>)>>> =
            Arc::new(Mutex::new(tasks.into_iter().enumerate().collect()));
        let token = CancelToken::new();
        let (sender, receiver) = mpsc::channel::<(usize, TaskOutcome<T>)>();
        let mut handles = Vec::new();
        for _ in 0 .. self.workers.min(total) {
            let queue = Arc::clone(&queue);
            let token = token.clone();
            let sender = sender.clone();
            handles.push(thread::spawn(move || {
                loop {
                    if token.is_cancelled() {
                        break;
                    }
                    let next = queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
                    let Some((index, task)) = next else {
                        break;
                    };
                    let outcome = match catch_unwind(AssertUnwindSafe(|| task(&token))) {
                        Ok(value) => TaskOutcome::Completed(value),
                        Err(payload) => TaskOutcome::Panicked(panic_message(payload.as_ref())),
                    };
                    if sender.send((index, outcome)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(sender);

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut slots: Vec<Option<TaskOutcome<T>>> = (0 .. total).map(|_| None).collect();
        let mut received = 0;
        while received < total {
            let next = match deadline {
                None => receiver.recv().ok(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        None
                    } else {
                        receiver.recv_timeout(deadline - now).ok()
                    }
                }
            };
            let Some((index, outcome)) = next else {
                break;
            };
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(outcome);
                received += 1;
            }
        }

        if received < total {
            token.cancel();
        } else {
            for handle in handles {
                let _ = handle.join();
            }
        }
        slots.into_iter().map(|slot| slot.unwrap_or(TaskOutcome::TimedOut)).collect()
    }
}

/// Runs one closure on its own thread with a deadline.
#[must_use]
pub fn run_with_timeout<T, F>(timeout: Duration, task: F) -> TaskOutcome<T>
where
    T: Send + 'static,
    F: FnOnce(&CancelToken) -> T + Send + 'static,
{
    let tasks: Vec<Task<T>> = vec![Box::new(task)];
    WorkerPool::new(1).run(tasks, Some(timeout)).pop().unwrap_or(TaskOutcome::TimedOut)
}
