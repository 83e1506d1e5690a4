//! Tests for the phase barrier

use super::*;

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

#[test]
fn test_initial_state() {
    let orchestrator = Orchestrator::new();
    assert_eq!(orchestrator.current_phase(), 0);
    assert!(orchestrator.more_phases());
    assert!(orchestrator.continue_running());
}

#[test]
fn test_single_participant_cycle() {
    let orchestrator = Orchestrator::new();
    orchestrator.add_required_tokens(1);

    // Watermark defaults to 0, so exactly one phase runs.
    assert_eq!(orchestrator.await_phase_start(true, 1), 0);
    assert!(!orchestrator.await_phase_end(true, 1));
    assert_eq!(orchestrator.current_phase(), 1);
    assert!(!orchestrator.more_phases());
}

#[test]
fn test_watermark_extends_run() {
    let orchestrator = Orchestrator::new();
    orchestrator.add_required_tokens(1);
    orchestrator.phases_at_least_to(2);

    let mut visited = Vec::new();
    while orchestrator.more_phases() {
        visited.push(orchestrator.await_phase_start(true, 1));
        orchestrator.await_phase_end(true, 1);
    }

    assert_eq!(visited, vec![0, 1, 2]);
}

#[test]
fn test_watermark_lower_value_is_noop() {
    let orchestrator = Orchestrator::new();
    orchestrator.phases_at_least_to(5);
    orchestrator.phases_at_least_to(3);

    orchestrator.add_required_tokens(1);
    let mut last = 0;
    while orchestrator.more_phases() {
        last = orchestrator.await_phase_start(true, 1);
        orchestrator.await_phase_end(true, 1);
    }
    assert_eq!(last, 5);
}

#[test]
fn test_watermark_raised_mid_run() {
    let orchestrator = Orchestrator::new();
    orchestrator.add_required_tokens(1);

    assert_eq!(orchestrator.await_phase_start(true, 1), 0);
    // Another participant could learn about later phases while this one runs.
    orchestrator.phases_at_least_to(1);
    assert!(orchestrator.await_phase_end(true, 1));
    assert!(orchestrator.more_phases());
}

#[test]
fn test_two_threads_agree_on_phase() {
    let orchestrator = Orchestrator::new();
    orchestrator.add_required_tokens(2);

    let started = AtomicU32::new(0);
    let observed_after_end = AtomicU32::new(u32::MAX);

    thread::scope(|scope| {
        for _ in 0..2 {
            scope.spawn(|| {
                let phase = orchestrator.await_phase_start(true, 1);
                assert_eq!(phase, 0);
                started.fetch_add(1, Ordering::SeqCst);

                orchestrator.await_phase_end(true, 1);
                // Both waiters wake with the transition already applied.
                observed_after_end.fetch_min(orchestrator.current_phase(), Ordering::SeqCst);
            });
        }
    });

    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(observed_after_end.load(Ordering::SeqCst), 1);
    assert_eq!(orchestrator.current_phase(), 1);
}

#[test]
fn test_blocking_start_waits_for_quota() {
    let orchestrator = Orchestrator::new();
    orchestrator.add_required_tokens(2);

    let peer_started = AtomicU32::new(0);

    thread::scope(|scope| {
        scope.spawn(|| {
            orchestrator.await_phase_start(true, 1);
            peer_started.fetch_add(1, Ordering::SeqCst);
        });

        // The peer must still be parked: its vote alone does not meet quota.
        thread::sleep(Duration::from_millis(30));
        assert_eq!(peer_started.load(Ordering::SeqCst), 0);

        orchestrator.await_phase_start(true, 1);
    });

    assert_eq!(peer_started.load(Ordering::SeqCst), 1);
}

#[test]
fn test_one_thread_may_carry_multiple_tokens() {
    let orchestrator = Orchestrator::new();
    orchestrator.add_required_tokens(3);

    // One thread represents three logical participants.
    assert_eq!(orchestrator.await_phase_start(true, 3), 0);
    assert!(!orchestrator.await_phase_end(true, 3));
    assert_eq!(orchestrator.current_phase(), 1);
}

#[test]
fn test_non_blocking_start_returns_immediately() {
    let orchestrator = Orchestrator::new();
    orchestrator.add_required_tokens(2);

    // Quota not met, but a non-blocking call must not park.
    assert_eq!(orchestrator.await_phase_start(false, 1), 0);

    // The registered vote still counts: the second arrival crosses the
    // barrier without waiting.
    assert_eq!(orchestrator.await_phase_start(true, 1), 0);
    assert!(orchestrator.await_phase_end(false, 1));
    assert!(!orchestrator.await_phase_end(true, 1));
    assert_eq!(orchestrator.current_phase(), 1);
}

#[test]
fn test_abort_unblocks_phase_start() {
    let orchestrator = Orchestrator::new();
    orchestrator.add_required_tokens(2);

    thread::scope(|scope| {
        let parked = scope.spawn(|| orchestrator.await_phase_start(true, 1));

        thread::sleep(Duration::from_millis(20));
        orchestrator.abort();

        // Unblocked without the quota ever being met.
        assert_eq!(parked.join().unwrap(), 0);
    });

    assert!(!orchestrator.more_phases());
    assert!(!orchestrator.continue_running());
}

#[test]
fn test_abort_unblocks_phase_end() {
    let orchestrator = Orchestrator::new();
    orchestrator.add_required_tokens(2);

    // Both participants arrive; only one departs, then the run aborts.
    thread::scope(|scope| {
        scope.spawn(|| {
            orchestrator.await_phase_start(true, 1);
            assert!(!orchestrator.await_phase_end(true, 1));
        });

        orchestrator.await_phase_start(true, 1);
        thread::sleep(Duration::from_millis(20));
        orchestrator.abort();
    });

    assert!(!orchestrator.more_phases());
}

#[test]
fn test_abort_is_sticky_and_idempotent() {
    let orchestrator = Orchestrator::new();
    orchestrator.abort();
    orchestrator.abort();

    assert!(!orchestrator.continue_running());
    assert!(!orchestrator.more_phases());
    // Future calls return immediately with neutral results.
    assert_eq!(orchestrator.await_phase_start(true, 1), 0);
    assert!(!orchestrator.await_phase_end(true, 1));
}

#[test]
fn test_debug_format() {
    let orchestrator = Orchestrator::new();
    let debug = format!("{orchestrator:?}");
    assert!(debug.contains("Orchestrator"));
    assert!(debug.contains("current_phase"));
}
