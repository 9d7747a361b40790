// crates/review-harness-core/tests/worker.rs
// ============================================================================
// Module: Worker Pool Tests
// Description: Ordering, panics, timeouts, and cancellation.
// ============================================================================

//! Worker pool tests.

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
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use common::FakeManager;
use review_harness_core::CancelToken;
use review_harness_core::ConnectionPool;
use review_harness_core::Task;
use review_harness_core::TaskOutcome;
use review_harness_core::WorkerPool;
use review_harness_core::run_with_timeout;

#[test]
fn worker_count_is_clamped() {
    assert_eq!(WorkerPool::new(0).workers(), 1);
    assert_eq!(WorkerPool::new(8).workers(), 8);
    assert_eq!(WorkerPool::new(1_000).workers(), 64);
}

#[test]
fn outcomes_follow_submission_order() {
    let tasks: Vec<Task<u64>> = (0 .. 10u64)
        .map(|index| -> Task<u64> {
            Box::new(move |_: &CancelToken| -> u64 {
                thread::sleep(Duration::from_millis((10 - index) * 2));
                index * index
            })
        })
        .collect();
    let outcomes = WorkerPool::new(4).run(tasks, None);
    let values: Vec<u64> = outcomes.into_iter().map(|outcome| outcome.completed().unwrap()).collect();
    assert_eq!(values, (0 .. 10).map(|index| index * index).collect::<Vec<_>>());
}

#[test]
fn empty_batch_returns_nothing() {
    let outcomes = WorkerPool::new(4).run(Vec::<Task<()>>::new(), Some(Duration::from_millis(10)));
    assert!(outcomes.is_empty());
}

#[test]
fn panicking_task_is_reported_without_affecting_others() {
    let tasks: Vec<Task<u32>> = vec![
        Box::new(|_: &CancelToken| -> u32 { 1 }),
        Box::new(|_: &CancelToken| -> u32 { panic!("worker exploded") }),
        Box::new(|_: &CancelToken| -> u32 { 3 }),
    ];
    let outcomes = WorkerPool::new(2).run(tasks, Some(Duration::from_secs(5)));
    assert_eq!(outcomes[0], TaskOutcome::Completed(1));
    assert_eq!(outcomes[1], TaskOutcome::Panicked("worker exploded".to_string()));
    assert_eq!(outcomes[2], TaskOutcome::Completed(3));
    assert_eq!(outcomes[1].label(), "panicked");
}

#[test]
fn timeout_marks_unfinished_tasks_and_cancels_token() {
    let observed_cancel = Arc::new(AtomicBool::new(false));
    let slow = {
        let observed_cancel = Arc::clone(&observed_cancel);
        move |token: &CancelToken| -> u32 {
            for _ in 0 .. 200 {
                if token.is_cancelled() {
                    observed_cancel.store(true, Ordering::SeqCst);
                    return 0;
                }
                thread::sleep(Duration::from_millis(5));
            }
            1
        }
    };
    let tasks: Vec<Task<u32>> = vec![Box::new(|_: &CancelToken| -> u32 { 7 }), Box::new(slow)];
    let outcomes = WorkerPool::new(2).run(tasks, Some(Duration::from_millis(50)));
    assert_eq!(outcomes[0], TaskOutcome::Completed(7));
    assert!(outcomes[1].is_timed_out());
    for _ in 0 .. 100 {
        if observed_cancel.load(Ordering::SeqCst) {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert!(observed_cancel.load(Ordering::SeqCst));
}

#[test]
fn timed_out_task_returns_its_connection_when_done() {
    let pool = ConnectionPool::new(FakeManager::default(), 1).unwrap();
    let task_pool = pool.clone();
    let outcome = run_with_timeout(Duration::from_millis(20), move |_: &CancelToken| {
        let _guard = task_pool.acquire().unwrap();
        thread::sleep(Duration::from_millis(100));
    });
    assert!(outcome.is_timed_out());
    let guard = pool.acquire_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(guard.slot(), 0);
}

#[test]
fn run_with_timeout_returns_value() {
    let outcome = run_with_timeout(Duration::from_secs(5), |token: &CancelToken| !token.is_cancelled());
    assert_eq!(outcome.as_completed(), Some(&true));
}
