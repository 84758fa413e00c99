//! End-to-end tests for the edge capture subsystem.
//!
//! Host-side: `inject_edge` stands in for the GPIO ISR with explicit
//! timestamps, so debounce outcomes are deterministic; the only waiting is
//! for the consumer task to drain its queue.

#![cfg(not(target_os = "espidf"))]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use edgebus::{
    EdgeDelegate, EdgePin, Error, InputMode, LifecycleError, TaskOptions, TriggerMode,
};

struct CountingDelegate(Arc<AtomicU32>);

impl EdgeDelegate for CountingDelegate {
    fn on_pin_interrupt(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn wait_until(timeout_ms: u64, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

#[test]
fn chatter_collapses_to_one_invocation() {
    let count = Arc::new(AtomicU32::new(0));
    let mut pin = EdgePin::new(16, 50, InputMode::PullUp, TriggerMode::FallingEdge);
    pin.start_tasks(CountingDelegate(Arc::clone(&count)), TaskOptions::default())
        .unwrap();

    // Three edges 10ms apart, all inside the 50ms window.
    pin.inject_edge(1_000);
    pin.inject_edge(1_010);
    pin.inject_edge(1_020);
    assert!(wait_until(2_000, || count.load(Ordering::SeqCst) == 1));
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // 60ms after the accepted edge: a second invocation.
    pin.inject_edge(1_060);
    assert!(wait_until(2_000, || count.load(Ordering::SeqCst) == 2));

    pin.stop();
}

#[test]
fn spaced_edges_each_invoke_handler() {
    let count = Arc::new(AtomicU32::new(0));
    let mut pin = EdgePin::new(5, 50, InputMode::PullDown, TriggerMode::RisingEdge);
    pin.start_tasks(CountingDelegate(Arc::clone(&count)), TaskOptions::default())
        .unwrap();

    pin.inject_edge(0);
    pin.inject_edge(60);
    pin.inject_edge(120);
    assert!(wait_until(2_000, || count.load(Ordering::SeqCst) == 3));

    pin.stop();
}

#[test]
fn no_invocation_after_stop() {
    let count = Arc::new(AtomicU32::new(0));
    let mut pin = EdgePin::new(7, 10, InputMode::Floating, TriggerMode::AnyEdge);
    pin.start_tasks(CountingDelegate(Arc::clone(&count)), TaskOptions::default())
        .unwrap();

    pin.inject_edge(100);
    assert!(wait_until(2_000, || count.load(Ordering::SeqCst) == 1));

    pin.stop();
    pin.inject_edge(10_000);
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn repeated_start_stop_cycles_leave_no_residue() {
    let count = Arc::new(AtomicU32::new(0));
    for cycle in 0..5u32 {
        let mut pin = EdgePin::new(4, 10, InputMode::Floating, TriggerMode::AnyEdge);
        assert!(!pin.is_running());
        pin.start_tasks(CountingDelegate(Arc::clone(&count)), TaskOptions::default())
            .unwrap();
        assert!(pin.is_running());

        pin.inject_edge(cycle * 1_000);
        assert!(wait_until(2_000, || count.load(Ordering::SeqCst) == cycle + 1));

        pin.stop();
        assert!(!pin.is_running());
    }
}

#[test]
fn double_start_fails() {
    let count = Arc::new(AtomicU32::new(0));
    let mut pin = EdgePin::new(9, 20, InputMode::PullUp, TriggerMode::FallingEdge);
    pin.start_tasks(CountingDelegate(Arc::clone(&count)), TaskOptions::default())
        .unwrap();

    let second = pin.start_tasks(CountingDelegate(Arc::clone(&count)), TaskOptions::default());
    assert!(matches!(
        second,
        Err(Error::Lifecycle(LifecycleError::TaskAlreadyStarted))
    ));

    pin.stop();
}

#[test]
fn stop_before_start_is_a_noop() {
    let mut pin = EdgePin::new(2, 20, InputMode::PullUp, TriggerMode::FallingEdge);
    pin.stop();
    pin.stop();
    assert!(!pin.is_running());
}

#[test]
fn drop_while_running_tears_down() {
    let count = Arc::new(AtomicU32::new(0));
    let mut pin = EdgePin::new(3, 10, InputMode::PullUp, TriggerMode::AnyEdge);
    pin.start_tasks(CountingDelegate(Arc::clone(&count)), TaskOptions::default())
        .unwrap();
    pin.inject_edge(50);
    assert!(wait_until(2_000, || count.load(Ordering::SeqCst) == 1));
    drop(pin);
}

#[test]
fn raw_timestamp_visible_from_task_context() {
    let count = Arc::new(AtomicU32::new(0));
    let mut pin = EdgePin::new(8, 50, InputMode::PullUp, TriggerMode::FallingEdge);
    pin.start_tasks(CountingDelegate(Arc::clone(&count)), TaskOptions::default())
        .unwrap();

    pin.inject_edge(777);
    assert!(wait_until(2_000, || pin.last_edge_ms() == 777));

    // A rejected (debounced) edge still updates the raw timestamp.
    pin.inject_edge(800);
    assert!(wait_until(2_000, || pin.last_edge_ms() == 800));
    assert!(wait_until(2_000, || count.load(Ordering::SeqCst) == 1));

    pin.stop();
}
